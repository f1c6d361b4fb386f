//! # Option parser & option frames
//!
//! Parses the trailing `,`-separated option list of any command or block
//! header (spec §4.4), and models inheritance through the chain of active
//! blocks/calls as immutable records with a parent pointer (spec §9's
//! design note: "this replaces any object-oriented stacked-context pattern
//! in the source"). Grounded on the teacher's `RawMetadata` → `Metadata`
//! two-stage parse-then-resolve shape for the parsing half; the parent-
//! pointer frame chain itself has no teacher analogue and is built directly
//! from the design note's instructions.

use std::rc::Rc;

use crate::error::MplError;
use crate::lexer::SourceLoc;
use crate::mpl_err;

/// One parsed `key[=value]` option, before being folded into a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Opt {
    Velocity(u8),
    /// Duration ratio as an exact `(num, den)` fraction of 1.
    Duration(u32, u32),
    Quantity(u32),
    Multiple,
    Shift(i32),
    Lyrics(String),
    Tremolo(u32),
}

/// Splits a trailing option list on top-level commas — commas inside a
/// `{...}`-quoted lyric fragment don't split (spec §4.2: "separated by `,`
/// outside of brace-quoted fragments").
fn split_top_level_commas(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() || !parts.is_empty() {
        parts.push(tail);
    }
    parts.into_iter().filter(|s| !s.is_empty()).collect()
}

/// Splits a channel-command/header line at its first top-level comma — the
/// boundary between the command text and its trailing option list. A comma
/// inside a `{...}`-quoted lyric fragment doesn't count, matching
/// [`split_top_level_commas`]'s brace-depth tracking.
pub(crate) fn split_command_and_options(text: &str) -> (&str, &str) {
    let mut depth = 0i32;
    for (i, c) in text.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            ',' if depth == 0 => return (text[..i].trim(), text[i + 1..].trim()),
            _ => {}
        }
    }
    (text.trim(), "")
}

fn parse_percent_or_range(value: &str, loc: &SourceLoc) -> Result<(u32, u32), MplError> {
    if let Some(pct) = value.strip_suffix('%') {
        let p: u32 = pct.parse().map_err(|_| {
            mpl_err!(loc, BadOption, "invalid duration percentage '{}'", value)
        })?;
        return Ok((p, 100));
    }
    if let Some((_lo, hi)) = value.split_once("..") {
        // Range form `0.5..1.5`: only the upper bound is meaningful as a
        // plain ratio since the executor has no notion of a duration range,
        // only a single effective ratio; this keeps `d=0.5..1.5` parseable
        // without pretending the lower bound does anything.
        return parse_decimal_ratio(hi, loc);
    }
    parse_decimal_ratio(value, loc)
}

fn parse_decimal_ratio(value: &str, loc: &SourceLoc) -> Result<(u32, u32), MplError> {
    let (int_part, frac_part) = value.split_once('.').unwrap_or((value, ""));
    let den = 10u32.pow(frac_part.len() as u32);
    let int_val: u32 = int_part.parse().unwrap_or(0);
    let frac_val: u32 = if frac_part.is_empty() {
        0
    } else {
        frac_part
            .parse()
            .map_err(|_| mpl_err!(loc, BadOption, "invalid duration value '{}'", value))?
    };
    Ok((int_val * den + frac_val, den))
}

/// Parses a single `key[=value]` option token.
fn parse_one(token: &str, loc: &SourceLoc) -> Result<Opt, MplError> {
    let (key, value) = match token.split_once('=') {
        Some((k, v)) => (k.trim(), Some(v.trim())),
        None => (token.trim(), None),
    };
    let key = key.to_ascii_lowercase();

    macro_rules! need_value {
        () => {
            value.ok_or_else(|| mpl_err!(loc, BadOption, "option '{}' requires a value", key))?
        };
    }

    match key.as_str() {
        "velocity" | "v" => {
            let v = need_value!();
            let n: u8 = v
                .parse()
                .map_err(|_| mpl_err!(loc, BadOption, "invalid velocity '{}'", v))?;
            if n > 127 {
                return Err(mpl_err!(loc, BadOption, "velocity {} out of range 0..127", n));
            }
            Ok(Opt::Velocity(n))
        }
        "duration" | "d" => {
            let v = need_value!();
            let (num, den) = parse_percent_or_range(v, loc)?;
            Ok(Opt::Duration(num, den))
        }
        "quantity" | "q" => {
            let v = need_value!();
            let n: u32 = v
                .parse()
                .map_err(|_| mpl_err!(loc, BadOption, "invalid quantity '{}'", v))?;
            Ok(Opt::Quantity(n))
        }
        "multiple" | "m" => {
            if value.is_some() {
                return Err(mpl_err!(loc, BadOption, "'multiple'/'m' takes no value"));
            }
            Ok(Opt::Multiple)
        }
        "shift" | "s" => {
            let v = need_value!();
            let n: i32 = v
                .parse()
                .map_err(|_| mpl_err!(loc, BadOption, "invalid shift '{}'", v))?;
            Ok(Opt::Shift(n))
        }
        "lyrics" | "l" => {
            let v = need_value!();
            let text = v
                .trim_start_matches('{')
                .trim_end_matches('}')
                .replace('_', " ")
                .replace("\\c", ",");
            Ok(Opt::Lyrics(text))
        }
        "tremolo" | "tr" => {
            let v = need_value!();
            let n: u32 = v
                .parse()
                .map_err(|_| mpl_err!(loc, BadOption, "invalid tremolo count '{}'", v))?;
            Ok(Opt::Tremolo(n))
        }
        _ => Err(mpl_err!(loc, BadOption, "unknown option key '{}'", key)),
    }
}

/// Parses a full trailing option list, enforcing that every key besides
/// `q`/`m` appears at most once in a single header (spec §4.4).
pub fn parse_options(text: &str, loc: &SourceLoc) -> Result<Vec<Opt>, MplError> {
    let mut seen_velocity = false;
    let mut seen_duration = false;
    let mut seen_shift = false;
    let mut seen_lyrics = false;
    let mut seen_tremolo = false;
    let mut out = Vec::new();

    for token in split_top_level_commas(text) {
        let opt = parse_one(token, loc)?;
        let dup = match &opt {
            Opt::Velocity(_) => std::mem::replace(&mut seen_velocity, true),
            Opt::Duration(..) => std::mem::replace(&mut seen_duration, true),
            Opt::Shift(_) => std::mem::replace(&mut seen_shift, true),
            Opt::Lyrics(_) => std::mem::replace(&mut seen_lyrics, true),
            Opt::Tremolo(_) => std::mem::replace(&mut seen_tremolo, true),
            Opt::Quantity(_) | Opt::Multiple => false,
        };
        if dup {
            return Err(mpl_err!(loc, BadOption, "option repeated in the same header"));
        }
        out.push(opt);
    }
    Ok(out)
}

/// An immutable option record with a parent pointer (spec §9). "Effective
/// value" for an inherited key is a lookup up the chain; `q`/`m` belong only
/// to the frame they were declared on and are never inherited.
#[derive(Debug, Clone)]
pub struct OptionFrame {
    parent: Option<Rc<OptionFrame>>,
    velocity: Option<u8>,
    duration_ratio: Option<(u32, u32)>,
    shift: Option<i32>,
    pub quantity: u32,
    pub multiple: bool,
    pub lyrics: Option<String>,
    pub tremolo: Option<u32>,
}

impl OptionFrame {
    /// The root frame: spec defaults (velocity 64, duration ratio 1/1, no
    /// shift), `q=1`, `m` unset.
    pub fn root() -> Rc<OptionFrame> {
        Rc::new(OptionFrame {
            parent: None,
            velocity: Some(64),
            duration_ratio: Some((1, 1)),
            shift: Some(0),
            quantity: 1,
            multiple: false,
            lyrics: None,
            tremolo: None,
        })
    }

    /// Builds a child frame inheriting from `parent`, applying `opts` on
    /// top. Inherited keys (`v`, `d`, `s`) are overridden only if present
    /// in `opts`; `q`/`m` belong solely to this frame.
    pub fn child(parent: &Rc<OptionFrame>, opts: &[Opt]) -> Rc<OptionFrame> {
        let mut velocity = None;
        let mut duration_ratio = None;
        let mut shift = None;
        let mut quantity = 1;
        let mut multiple = false;
        let mut lyrics = None;
        let mut tremolo = None;

        for opt in opts {
            match opt {
                Opt::Velocity(v) => velocity = Some(*v),
                Opt::Duration(n, d) => duration_ratio = Some((*n, *d)),
                Opt::Shift(s) => shift = Some(*s),
                Opt::Quantity(q) => quantity = *q,
                Opt::Multiple => multiple = true,
                Opt::Lyrics(l) => lyrics = Some(l.clone()),
                Opt::Tremolo(n) => tremolo = Some(*n),
            }
        }

        Rc::new(OptionFrame {
            parent: Some(Rc::clone(parent)),
            velocity,
            duration_ratio,
            shift,
            quantity,
            multiple,
            lyrics,
            tremolo,
        })
    }

    pub fn effective_velocity(&self) -> u8 {
        self.velocity
            .or_else(|| self.parent.as_ref().map(|p| p.effective_velocity()))
            .unwrap_or(64)
    }

    pub fn effective_duration_ratio(&self) -> (u32, u32) {
        self.duration_ratio
            .or_else(|| self.parent.as_ref().map(|p| p.effective_duration_ratio()))
            .unwrap_or((1, 1))
    }

    /// Octave shift composes additively up the chain (spec §8 scenario 3:
    /// "successive calls with different `s` values compose with the
    /// current frame's shift"), unlike velocity/duration which simply
    /// override.
    pub fn effective_shift(&self) -> i32 {
        let own = self.shift.unwrap_or(0);
        let parent = self
            .parent
            .as_ref()
            .map(|p| p.effective_shift())
            .unwrap_or(0);
        own + parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLoc {
        SourceLoc::synthetic()
    }

    #[test]
    fn splits_command_from_options_at_top_level_comma() {
        assert_eq!(split_command_and_options("0 c /4, d=50%"), ("0 c /4", "d=50%"));
        assert_eq!(split_command_and_options("0 c /4"), ("0 c /4", ""));
        assert_eq!(
            split_command_and_options("0 c /4, l={hi,_there}"),
            ("0 c /4", "l={hi,_there}")
        );
    }

    #[test]
    fn parses_simple_list() {
        let opts = parse_options("v=100, d=75%, q=3, m", &loc()).unwrap();
        assert_eq!(
            opts,
            vec![
                Opt::Velocity(100),
                Opt::Duration(75, 100),
                Opt::Quantity(3),
                Opt::Multiple,
            ]
        );
    }

    #[test]
    fn rejects_unknown_key() {
        assert!(parse_options("bogus=1", &loc()).is_err());
    }

    #[test]
    fn rejects_repeated_non_composable_key() {
        assert!(parse_options("v=1,v=2", &loc()).is_err());
    }

    #[test]
    fn allows_repeated_q_and_m_is_not_applicable_but_single_q_is_fine() {
        assert!(parse_options("q=5", &loc()).is_ok());
    }

    #[test]
    fn braces_protect_commas_in_lyrics() {
        let opts = parse_options("l={hel_lo,_world}", &loc()).unwrap();
        assert_eq!(opts, vec![Opt::Lyrics("hel lo, world".to_string())]);
    }

    #[test]
    fn shift_composes_additively_up_the_chain() {
        let root = OptionFrame::root();
        let first = OptionFrame::child(&root, &[Opt::Shift(12)]);
        let second = OptionFrame::child(&first, &[Opt::Shift(12)]);
        assert_eq!(first.effective_shift(), 12);
        assert_eq!(second.effective_shift(), 24);
    }

    #[test]
    fn velocity_and_duration_are_overridden_not_composed() {
        let root = OptionFrame::root();
        let child = OptionFrame::child(&root, &[Opt::Velocity(100)]);
        assert_eq!(child.effective_velocity(), 100);
        assert_eq!(child.effective_duration_ratio(), (1, 1));
        let grandchild = OptionFrame::child(&child, &[]);
        assert_eq!(grandchild.effective_velocity(), 100);
    }

    #[test]
    fn quantity_and_multiple_belong_only_to_their_own_frame() {
        let root = OptionFrame::root();
        let child = OptionFrame::child(&root, &[Opt::Quantity(4), Opt::Multiple]);
        assert_eq!(child.quantity, 4);
        assert!(child.multiple);
        let grandchild = OptionFrame::child(&child, &[]);
        assert_eq!(grandchild.quantity, 1);
        assert!(!grandchild.multiple);
    }
}
