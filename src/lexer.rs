//! # Lexer / line classifier
//!
//! MPL is line-oriented, not token-stream-oriented like the notation
//! language this crate started from — so rather than emitting a flat
//! `Vec<Token>`, the lexer's job is to turn raw source into a sequence of
//! typed, located *logical lines* and hand the rest of each line's text to
//! the component that actually knows its inner grammar (the option parser,
//! the resolver, the executor). The character-by-character scan with
//! `line`/`column` tracking and string-prefix lookahead is the same idiom
//! the original note-token lexer used, just aimed at a coarser unit.

use std::rc::Rc;

use log::trace;

use crate::error::MplError;
use crate::mpl_err;

/// A location in a source file, attached to every lexed line and carried
/// into every error raised about it.
#[derive(Debug, Clone)]
pub struct SourceLoc {
    pub file: Rc<str>,
    pub line: usize,
    pub column: Option<usize>,
}

impl SourceLoc {
    pub fn new(file: Rc<str>, line: usize, column: Option<usize>) -> Self {
        SourceLoc { file, line, column }
    }

    /// A location for tests and other call sites with no real source file.
    #[cfg(test)]
    pub fn synthetic() -> Self {
        SourceLoc {
            file: Rc::from("<test>"),
            line: 1,
            column: None,
        }
    }
}

/// A classified logical line. Most variants carry their trailing text
/// unparsed (`rest`) — the resolver substitutes `$name` references in it and
/// the executor/option-parser take it from there, exactly at the point
/// where spec §4.3 says expansion "may introduce new options or a different
/// command kind" and must be re-lexed rather than cached.
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    /// `tempo 120`, `time 3/4`, `key c/major`.
    Global { directive: String, rest: String },
    /// `<ch> <note-or-chord-or-rest> <length> [, options]`.
    ChannelCmd { rest: String },
    InstrumentsOpen,
    /// A raw line inside an open `INSTRUMENTS` block.
    InstrumentsEntry { text: String },
    MetaOpen,
    /// A raw line inside an open `META` block.
    MetaEntry { text: String },
    FunctionDefOpen { name: String },
    /// Closes whichever of `FUNCTION` / `INSTRUMENTS` / `META` is
    /// currently open; which one is determined by the caller's own nesting
    /// state, not by the lexer (see module docs in `executor/pass1.rs`).
    End,
    BlockOpen { rest: String },
    BlockClose { rest: String },
    Call { rest: String },
    Include { path: String },
    IncludeFile { path: String },
    Var { rest: String },
    Const { rest: String },
    Chord { rest: String },
}

/// A classified line plus its source location.
#[derive(Debug, Clone)]
pub struct Line {
    pub kind: LineKind,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Normal,
    Instruments,
    Meta,
}

/// Splits raw source into logical lines: `\`-continuations joined, `//`
/// comments stripped outside double-quoted spans, blank lines dropped.
/// Returns each logical line's text paired with the 1-based physical line
/// number it started on. Used both by [`Lexer`] (single-file convenience
/// wrapper) and by the executor's include-expansion step, which splices
/// several files' raw lines together before any classification happens.
pub(crate) fn split_source(input: &str) -> Vec<(String, usize)> {
    join_logical_lines(input)
        .into_iter()
        .map(|(text, line)| (strip_comment(&text), line))
        .filter(|(text, _)| !text.trim().is_empty())
        .collect()
}

/// Classifies already-split logical lines one at a time, carrying the
/// `INSTRUMENTS`/`META` raw-entry mode across calls. Stateful only in that
/// narrow sense — nesting of blocks and functions is the executor's own
/// concern (see `executor::pass1`), not the classifier's. Takes a fully
/// formed [`SourceLoc`] per line rather than owning a single fixed file
/// name, so the executor can drive one classifier across lines spliced in
/// from several `INCLUDE`d files.
#[derive(Default)]
pub struct LineClassifier {
    mode: Mode,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Normal
    }
}

impl LineClassifier {
    pub fn new() -> Self {
        LineClassifier::default()
    }

    pub fn classify_line(&mut self, text: &str, loc: &SourceLoc) -> Result<Line, MplError> {
        let kind = self.classify(text.trim(), loc)?;
        Ok(Line {
            kind,
            loc: loc.clone(),
        })
    }

    fn classify(&mut self, line: &str, loc: &SourceLoc) -> Result<LineKind, MplError> {
        if let Mode::Instruments | Mode::Meta = self.mode {
            if is_keyword(line, "END") {
                trace!("{}:{}: leaving {:?} raw-entry mode", loc.file, loc.line, self.mode);
                self.mode = Mode::Normal;
                return Ok(LineKind::End);
            }
            return Ok(match self.mode {
                Mode::Instruments => LineKind::InstrumentsEntry {
                    text: line.to_string(),
                },
                Mode::Meta => LineKind::MetaEntry {
                    text: line.to_string(),
                },
                Mode::Normal => unreachable!(),
            });
        }

        if let Some(rest) = line.strip_prefix('{') {
            return Ok(LineKind::BlockOpen {
                rest: rest.trim_start_matches(',').trim().to_string(),
            });
        }
        if let Some(rest) = line.strip_prefix('}') {
            return Ok(LineKind::BlockClose {
                rest: rest.trim_start_matches(',').trim().to_string(),
            });
        }

        let (word, rest) = split_first_word(line);
        let upper = word.to_ascii_uppercase();

        match upper.as_str() {
            "INSTRUMENTS" => {
                if !rest.trim().is_empty() {
                    return Err(mpl_err!(loc, ContextViolation, "INSTRUMENTS takes no parameters"));
                }
                self.mode = Mode::Instruments;
                trace!("{}:{}: entering INSTRUMENTS raw-entry mode", loc.file, loc.line);
                Ok(LineKind::InstrumentsOpen)
            }
            "META" => {
                if !rest.trim().is_empty() {
                    return Err(mpl_err!(loc, ContextViolation, "META takes no parameters"));
                }
                self.mode = Mode::Meta;
                trace!("{}:{}: entering META raw-entry mode", loc.file, loc.line);
                Ok(LineKind::MetaOpen)
            }
            "FUNCTION" => {
                let name = rest.trim();
                if name.is_empty() {
                    return Err(mpl_err!(loc, UnknownToken, "FUNCTION requires a name"));
                }
                Ok(LineKind::FunctionDefOpen {
                    name: name.to_string(),
                })
            }
            "END" => {
                if !rest.trim().is_empty() {
                    return Err(mpl_err!(loc, ContextViolation, "END takes no parameters"));
                }
                Ok(LineKind::End)
            }
            "CALL" => Ok(LineKind::Call {
                rest: rest.trim().to_string(),
            }),
            "INCLUDE" => Ok(LineKind::Include {
                path: rest.trim().to_string(),
            }),
            "INCLUDEFILE" => Ok(LineKind::IncludeFile {
                path: rest.trim().to_string(),
            }),
            "VAR" => Ok(LineKind::Var {
                rest: rest.trim().to_string(),
            }),
            "CONST" => Ok(LineKind::Const {
                rest: rest.trim().to_string(),
            }),
            "CHORD" => Ok(LineKind::Chord {
                rest: rest.trim().to_string(),
            }),
            "TEMPO" | "TIME" | "KEY" => Ok(LineKind::Global {
                directive: upper.to_ascii_lowercase(),
                rest: rest.trim().to_string(),
            }),
            _ if is_channel_ref(&word) => Ok(LineKind::ChannelCmd {
                rest: line.to_string(),
            }),
            _ => Err(mpl_err!(
                loc,
                UnknownToken,
                "unrecognized line start '{}'",
                word
            )),
        }
    }
}

/// Convenience single-file lexer: splits and classifies source in one call.
/// The executor drives [`split_source`] and [`LineClassifier`] directly
/// when several files need to be spliced together by `INCLUDE`.
pub struct Lexer<'a> {
    input: &'a str,
    file: Rc<str>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str, file: impl Into<Rc<str>>) -> Self {
        Lexer {
            input,
            file: file.into(),
        }
    }

    pub fn lex(self) -> Result<Vec<Line>, MplError> {
        let mut classifier = LineClassifier::new();
        split_source(self.input)
            .into_iter()
            .map(|(text, line)| {
                let loc = SourceLoc::new(self.file.clone(), line, None);
                classifier.classify_line(&text, &loc)
            })
            .collect()
    }
}

fn is_keyword(line: &str, kw: &str) -> bool {
    let (word, rest) = split_first_word(line);
    word.eq_ignore_ascii_case(kw) && rest.trim().is_empty()
}

/// Parses a channel reference token (`0`..`15`, or `p`/`P` as an alias for
/// the percussion channel) shared by `INSTRUMENTS` entries and channel
/// commands alike.
pub(crate) fn parse_channel_ref(word: &str, loc: &SourceLoc) -> Result<u8, MplError> {
    if word.eq_ignore_ascii_case("p") {
        return Ok(crate::channel::PERCUSSION_CHANNEL);
    }
    word.parse::<u8>()
        .ok()
        .filter(|&n| (n as usize) < crate::channel::CHANNEL_COUNT)
        .ok_or_else(|| mpl_err!(loc, UnknownToken, "invalid channel reference '{}'", word))
}

fn is_channel_ref(word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    if word.eq_ignore_ascii_case("p") {
        return true;
    }
    word.chars().all(|c| c.is_ascii_digit())
}

fn split_first_word(line: &str) -> (String, &str) {
    let idx = line.find(char::is_whitespace).unwrap_or(line.len());
    (line[..idx].to_string(), &line[idx..])
}

/// Strips a `//` line comment that starts outside a double-quoted span.
fn strip_comment(line: &str) -> String {
    let mut in_quotes = false;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '"' {
            in_quotes = !in_quotes;
        } else if !in_quotes && c == '/' && chars.get(i + 1) == Some(&'/') {
            return chars[..i].iter().collect();
        }
        i += 1;
    }
    line.to_string()
}

/// Joins `\`-continued physical lines into logical lines, returning each
/// logical line's text paired with the 1-based line number it started on.
/// A continuation is only recognized when the trailing `\` is outside a
/// double-quoted span, matching [`strip_comment`]'s quote tracking.
fn join_logical_lines(input: &str) -> Vec<(String, usize)> {
    let mut out = Vec::new();
    let mut pending = String::new();
    let mut pending_start = 1;
    let mut in_progress = false;

    for (idx, raw) in input.lines().enumerate() {
        let line_no = idx + 1;
        if !in_progress {
            pending_start = line_no;
        }
        let ends_in_quotes_balanced = raw.chars().filter(|&c| c == '"').count() % 2 == 0;
        let continues = ends_in_quotes_balanced && raw.trim_end().ends_with('\\');
        if continues {
            let without_backslash = raw.trim_end();
            let without_backslash = &without_backslash[..without_backslash.len() - 1];
            pending.push_str(without_backslash);
            pending.push(' ');
            in_progress = true;
        } else {
            pending.push_str(raw);
            out.push((std::mem::take(&mut pending), pending_start));
            in_progress = false;
        }
    }
    if in_progress {
        out.push((pending, pending_start));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<LineKind> {
        Lexer::new(src, "test.mpl")
            .lex()
            .unwrap()
            .into_iter()
            .map(|l| l.kind)
            .collect()
    }

    #[test]
    fn classifies_channel_command() {
        let kinds = lex("0 c /4\n");
        assert_eq!(
            kinds,
            vec![LineKind::ChannelCmd {
                rest: "0 c /4".to_string()
            }]
        );
    }

    #[test]
    fn classifies_global_directive() {
        let kinds = lex("tempo 120\n");
        assert_eq!(
            kinds,
            vec![LineKind::Global {
                directive: "tempo".to_string(),
                rest: "120".to_string()
            }]
        );
    }

    #[test]
    fn strips_line_comments() {
        let kinds = lex("0 c /4 // play middle c\n");
        assert_eq!(
            kinds,
            vec![LineKind::ChannelCmd {
                rest: "0 c /4".to_string()
            }]
        );
    }

    #[test]
    fn joins_backslash_continuations() {
        let kinds = lex("CALL test1, \\\n  s=12\n");
        assert_eq!(
            kinds,
            vec![LineKind::Call {
                rest: "test1,    s=12".to_string()
            }]
        );
    }

    #[test]
    fn instruments_block_entries_are_raw() {
        let kinds = lex("INSTRUMENTS\n0 piano\n1 2/0/0\nEND\n");
        assert_eq!(
            kinds,
            vec![
                LineKind::InstrumentsOpen,
                LineKind::InstrumentsEntry {
                    text: "0 piano".to_string()
                },
                LineKind::InstrumentsEntry {
                    text: "1 2/0/0".to_string()
                },
                LineKind::End,
            ]
        );
    }

    #[test]
    fn block_delimiters_carry_trailing_options() {
        let kinds = lex("{ q=3, m\n}\n");
        assert_eq!(
            kinds,
            vec![
                LineKind::BlockOpen {
                    rest: "q=3, m".to_string()
                },
                LineKind::BlockClose {
                    rest: "".to_string()
                },
            ]
        );
    }

    #[test]
    fn unknown_first_token_is_an_error() {
        let err = Lexer::new("xyz foo\n", "test.mpl").lex();
        assert!(matches!(err, Err(MplError::UnknownToken { .. })));
    }

    #[test]
    fn parses_channel_refs() {
        let loc = SourceLoc::synthetic();
        assert_eq!(parse_channel_ref("0", &loc).unwrap(), 0);
        assert_eq!(parse_channel_ref("15", &loc).unwrap(), 15);
        assert_eq!(parse_channel_ref("p", &loc).unwrap(), 9);
        assert_eq!(parse_channel_ref("P", &loc).unwrap(), 9);
        assert!(parse_channel_ref("16", &loc).is_err());
        assert!(parse_channel_ref("x", &loc).is_err());
    }

    #[test]
    fn percussion_channel_alias() {
        let kinds = lex("p snare /4\n");
        assert_eq!(
            kinds,
            vec![LineKind::ChannelCmd {
                rest: "p snare /4".to_string()
            }]
        );
    }
}
