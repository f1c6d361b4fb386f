//! # Tick Arithmetic Kernel
//!
//! Converts a note-length token (`/4`, `*2`, `4.`, `4..`, `4t`, `4t7:4`,
//! `4+32`, ...) into an integer tick count for a given sequence resolution
//! (ticks per quarter note). Pure; holds no state (spec §4.1).
//!
//! ## Grammar
//! ```text
//! length   = element { "+" element } .
//! element  = primitive { modifier } .
//! primitive= "/" power2 | "*" power2 | digit .
//! power2   = "1" | "2" | "4" | "8" | "16" | "32" .
//! digit    = "1" | "2" | "4" | "5" | "8" | "16" | "32" .
//! modifier = "." | "t" | "t" uint ":" uint .
//! ```
//!
//! ## Dotted notes
//! A run of `n` consecutive dots multiplies the value that was in effect
//! *before the run started* by `(2^(n+1) - 1) / 2^n` — the standard
//! geometric dotted-note series (1 dot = 1.5x, 2 dots = 1.75x, 3 dots =
//! 1.875x, ...), not a naive repeated `3/2` multiply of the running total
//! (which would give 1 dot = 1.5x but 2 dots = 2.25x). The worked example in
//! spec §8 (`*4..` = 13440 at resolution 480, i.e. 1.75x of `*4` = 7680) only
//! holds under the geometric series, so that's what's implemented; see
//! DESIGN.md for the reasoning.
//!
//! ## Tuplets
//! `t` alone multiplies by `2/3`; `tN:M` multiplies by `M/N`. All
//! multiplications are carried on exact `(numerator, denominator)` pairs and
//! only flattened to an integer once, at the end of the element, using
//! round-half-to-even — this is what keeps `*4t7:4` landing on `4389`
//! instead of drifting from repeated floating point multiplication.

use crate::error::MplError;
use crate::lexer::SourceLoc;
use crate::mpl_err;

const POWERS_OF_TWO: [u32; 6] = [1, 2, 4, 8, 16, 32];

/// An exact rational number, reduced after every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ratio {
    num: i64,
    den: i64,
}

impl Ratio {
    fn new(num: i64, den: i64) -> Self {
        assert!(den != 0);
        let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
        let g = gcd(num.unsigned_abs(), den.unsigned_abs()).max(1) as i64;
        Ratio {
            num: num / g,
            den: den / g,
        }
    }

    fn mul(self, other: Ratio) -> Self {
        Ratio::new(self.num * other.num, self.den * other.den)
    }

    /// Flattens to an integer using round-half-to-even on the fractional
    /// remainder (banker's rounding), per spec §3's "tuplet divisions
    /// rounded half-to-even". The returned bool is `true` when the value
    /// wasn't already a whole number, i.e. rounding lost precision.
    fn round_half_even(self) -> (i64, bool) {
        let q = self.num.div_euclid(self.den);
        let r = self.num - q * self.den;
        if r == 0 {
            return (q, false);
        }
        let twice_r = r * 2;
        let cmp = twice_r.abs().cmp(&self.den.abs());
        use std::cmp::Ordering::*;
        let rounded = match cmp {
            Less => q,
            Greater => q + 1,
            Equal => {
                if q % 2 == 0 {
                    q
                } else {
                    q + 1
                }
            }
        };
        (rounded, true)
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Total multiplier contributed by `n` consecutive dots: `sum_{i=0}^{n} (1/2)^i`.
fn dot_multiplier(n: u32) -> Ratio {
    // = (2^(n+1) - 1) / 2^n
    let den = 1i64 << n;
    let num = (1i64 << (n + 1)) - 1;
    Ratio::new(num, den)
}

struct Chars<'a> {
    inner: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Chars<'a> {
    fn new(s: &'a str) -> Self {
        Chars {
            inner: s.chars().peekable(),
        }
    }
    fn peek(&mut self) -> Option<char> {
        self.inner.peek().copied()
    }
    fn next(&mut self) -> Option<char> {
        self.inner.next()
    }
}

fn parse_uint(chars: &mut Chars, loc: &SourceLoc, token: &str) -> Result<u32, MplError> {
    let mut s = String::new();
    while let Some(c) = chars.peek() {
        if c.is_ascii_digit() {
            s.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if s.is_empty() {
        return Err(mpl_err!(
            loc,
            BadLength,
            "expected a number in length '{}'",
            token
        ));
    }
    s.parse::<u32>()
        .map_err(|_| mpl_err!(loc, BadLength, "number too large in length '{}'", token))
}

fn parse_power2(chars: &mut Chars, loc: &SourceLoc, token: &str) -> Result<u32, MplError> {
    let n = parse_uint(chars, loc, token)?;
    if POWERS_OF_TWO.contains(&n) {
        Ok(n)
    } else {
        Err(mpl_err!(
            loc,
            BadLength,
            "'{}' is not a valid power-of-two denominator in length '{}'",
            n,
            token
        ))
    }
}

/// Legacy digit form: whole note divided by `n`, except `5` which is a
/// special 5/4-of-a-quarter value (spec §4.1's reference table).
fn digit_ticks(n: u32, whole: i64, loc: &SourceLoc, token: &str) -> Result<Ratio, MplError> {
    match n {
        1 | 2 | 4 | 8 | 16 | 32 => Ok(Ratio::new(whole, n as i64)),
        5 => Ok(Ratio::new(whole * 5, 16)),
        _ => Err(mpl_err!(
            loc,
            BadLength,
            "'{}' is not a valid legacy length digit in '{}'",
            n,
            token
        )),
    }
}

fn parse_element(chars: &mut Chars, whole: i64, loc: &SourceLoc, token: &str) -> Result<(i64, bool), MplError> {
    let base = match chars.peek() {
        Some('/') => {
            chars.next();
            let n = parse_power2(chars, loc, token)?;
            Ratio::new(whole, n as i64)
        }
        Some('*') => {
            chars.next();
            let n = parse_power2(chars, loc, token)?;
            Ratio::new(whole * n as i64, 1)
        }
        Some(c) if c.is_ascii_digit() => {
            let n = parse_uint(chars, loc, token)?;
            digit_ticks(n, whole, loc, token)?
        }
        Some(c) => {
            return Err(mpl_err!(
                loc,
                BadLength,
                "unexpected character '{}' in length '{}'",
                c,
                token
            ))
        }
        None => return Err(mpl_err!(loc, BadLength, "empty length element in '{}'", token)),
    };

    let mut value = Ratio::new(1, 1);
    let mut base_for_dots = value;
    let mut dot_run = 0u32;

    loop {
        match chars.peek() {
            Some('.') => {
                chars.next();
                dot_run += 1;
                value = base_for_dots.mul(dot_multiplier(dot_run));
            }
            Some('t') => {
                chars.next();
                let ratio = if let Some(c) = chars.peek() {
                    if c.is_ascii_digit() {
                        let n = parse_uint(chars, loc, token)?;
                        match chars.next() {
                            Some(':') => {}
                            _ => {
                                return Err(mpl_err!(
                                    loc,
                                    BadLength,
                                    "expected ':' in tuplet modifier of '{}'",
                                    token
                                ))
                            }
                        }
                        let m = parse_uint(chars, loc, token)?;
                        if n == 0 {
                            return Err(mpl_err!(
                                loc,
                                BadLength,
                                "tuplet denominator cannot be zero in '{}'",
                                token
                            ));
                        }
                        Ratio::new(m as i64, n as i64)
                    } else {
                        Ratio::new(2, 3)
                    }
                } else {
                    Ratio::new(2, 3)
                };
                value = value.mul(ratio);
                base_for_dots = value;
                dot_run = 0;
            }
            _ => break,
        }
    }

    Ok(base.mul(value).round_half_even())
}

/// Parse a length token into a tick count at the given resolution (ticks per
/// quarter note). The whole-note length is `4 * resolution`. Returns
/// alongside whether any element's exact rational value had to be rounded to
/// land on an integer tick count — callers that surface warnings (spec §7)
/// use this to flag a rest/note length that can't be represented exactly.
pub fn parse_length_checked(token: &str, resolution: u32, loc: &SourceLoc) -> Result<(u32, bool), MplError> {
    if token.is_empty() {
        return Err(mpl_err!(loc, BadLength, "empty length token"));
    }
    let whole = 4i64 * resolution as i64;
    let mut chars = Chars::new(token);
    let mut total: i64 = 0;
    let mut lost_precision = false;
    loop {
        let (value, rounded) = parse_element(&mut chars, whole, loc, token)?;
        total += value;
        lost_precision |= rounded;
        match chars.peek() {
            Some('+') => {
                chars.next();
                if chars.peek().is_none() {
                    return Err(mpl_err!(
                        loc,
                        BadLength,
                        "trailing '+' in length '{}'",
                        token
                    ));
                }
            }
            Some(c) => {
                return Err(mpl_err!(
                    loc,
                    BadLength,
                    "unexpected character '{}' in length '{}'",
                    c,
                    token
                ))
            }
            None => break,
        }
    }
    if total < 0 {
        return Err(mpl_err!(loc, BadLength, "negative length in '{}'", token));
    }
    Ok((total as u32, lost_precision))
}

/// Parse a length token into a tick count, discarding the precision-loss
/// flag [`parse_length_checked`] reports. Used wherever the caller has no
/// warning side channel to report into (tests, documentation examples).
pub fn parse_length(token: &str, resolution: u32, loc: &SourceLoc) -> Result<u32, MplError> {
    Ok(parse_length_checked(token, resolution, loc)?.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLoc {
        SourceLoc::synthetic()
    }

    #[test]
    fn primitive_slash_and_star() {
        assert_eq!(parse_length("/4", 480, &loc()).unwrap(), 480);
        assert_eq!(parse_length("/2", 480, &loc()).unwrap(), 960);
        assert_eq!(parse_length("*2", 480, &loc()).unwrap(), 3840);
    }

    #[test]
    fn dots_use_geometric_series() {
        assert_eq!(parse_length("*4.", 480, &loc()).unwrap(), 11520);
        assert_eq!(parse_length("*4..", 480, &loc()).unwrap(), 13440);
    }

    #[test]
    fn triplet_modifiers() {
        assert_eq!(parse_length("*4t", 480, &loc()).unwrap(), 5120);
        assert_eq!(parse_length("*4tt", 480, &loc()).unwrap(), 3413);
        assert_eq!(parse_length("*4t7:4", 480, &loc()).unwrap(), 4389);
    }

    #[test]
    fn summed_elements() {
        assert_eq!(parse_length("4+32+1", 480, &loc()).unwrap(), 2460);
    }

    #[test]
    fn rejects_bad_power() {
        assert!(parse_length("/64", 480, &loc()).is_err());
        assert!(parse_length("*64", 480, &loc()).is_err());
        assert!(parse_length("xyz", 480, &loc()).is_err());
        assert!(parse_length("/4+", 480, &loc()).is_err());
        assert!(parse_length("", 480, &loc()).is_err());
    }

    #[test]
    fn legacy_digit_five_is_five_quarters_of_sixteenth() {
        // 5 -> whole * 5/16 = 1920*5/16 = 600 at resolution 480
        assert_eq!(parse_length("5", 480, &loc()).unwrap(), 600);
    }
}
