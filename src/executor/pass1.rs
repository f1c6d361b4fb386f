//! # Pass 1 — structural pre-pass
//!
//! Walks the source once, without emitting any events, to discover
//! everything pass 2 needs ahead of time: function bodies, chord
//! definitions, `INSTRUMENTS`/`META` block contents, and the top-level line
//! sequence. Mirrors the teacher's `Parser`'s metadata-first scan in
//! `parser/mod.rs`, generalized from "collect mod-points and a key
//! signature" to "collect every top-level definition", and catches every
//! structural violation spec §4.5 assigns to this pass rather than to pass 2.
//!
//! `INCLUDE`/`INCLUDEFILE` expansion also happens here rather than as a
//! pre-pass over raw text, because rejecting one found inside a block or
//! function body (spec §4.5) needs exactly the nesting state (`stack`,
//! `block_stack`) this walk already tracks — a text-level splice run before
//! this pass would have no notion of "currently inside a function body" to
//! check against.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{debug, trace};

use super::{Function, InstrumentEntry, Program};
use crate::dictionary::{resolve_note_token, Dictionary};
use crate::error::MplError;
use crate::lexer::{parse_channel_ref, split_source, LineClassifier, LineKind, SourceLoc};
use crate::mpl_err;

/// A capturing context currently open at the top level. Unlike `{ ... }`
/// blocks (which are *not* capturing — their contents pass straight through
/// to `top_level` for pass 2 to replay), these three consume every line
/// until their matching `END` and never appear in the top-level stream.
enum Frame {
    Function {
        name: String,
        open_loc: SourceLoc,
        body: Vec<(String, SourceLoc)>,
        /// Nested `{`/`}` inside the body, tracked so a function can't be
        /// closed by `END` while one of its own blocks is still open.
        braces: Vec<SourceLoc>,
    },
    Instruments {
        open_loc: SourceLoc,
    },
    Meta {
        open_loc: SourceLoc,
    },
}

/// Runs pass 1 over `source` (the entry file), expanding `INCLUDE`/
/// `INCLUDEFILE` as it goes. `base_path` resolves bare `INCLUDE` names to
/// `<base_path>/<name>.mpl`; `INCLUDEFILE` paths are used as given.
pub fn run(
    source: &str,
    file: Rc<str>,
    base_path: &Path,
    dictionary: &Dictionary,
) -> Result<Program, MplError> {
    let mut classifier = LineClassifier::new();
    let mut program = Program::default();
    let mut stack: Vec<Frame> = Vec::new();
    let mut block_stack: Vec<SourceLoc> = Vec::new();
    let mut open_stack: Vec<String> = Vec::new();

    process_source(
        source,
        file,
        base_path,
        dictionary,
        &mut classifier,
        &mut program,
        &mut stack,
        &mut block_stack,
        &mut open_stack,
    )?;

    if let Some(frame) = stack.into_iter().next() {
        let open_loc = match &frame {
            Frame::Function { open_loc, .. }
            | Frame::Instruments { open_loc }
            | Frame::Meta { open_loc } => open_loc.clone(),
        };
        return Err(mpl_err!(
            &open_loc,
            StructuralMismatch,
            "unclosed block still open at end of file"
        ));
    }
    if let Some(open_loc) = block_stack.first() {
        return Err(mpl_err!(
            open_loc,
            StructuralMismatch,
            "unclosed '{{' still open at end of file"
        ));
    }

    Ok(program)
}

/// Walks one file's logical lines, splicing in `INCLUDE`/`INCLUDEFILE`
/// targets depth-first as they're encountered and recursing into this same
/// function for each. Shares `classifier`/`program`/`stack`/`block_stack`
/// across files so nesting state and `INSTRUMENTS`/`META`/`FUNCTION` mode
/// carries through a splice exactly as if the included text had been
/// written inline.
#[allow(clippy::too_many_arguments)]
fn process_source(
    source: &str,
    file: Rc<str>,
    base_path: &Path,
    dictionary: &Dictionary,
    classifier: &mut LineClassifier,
    program: &mut Program,
    stack: &mut Vec<Frame>,
    block_stack: &mut Vec<SourceLoc>,
    open_stack: &mut Vec<String>,
) -> Result<(), MplError> {
    for (text, physical_line) in split_source(source) {
        let loc = SourceLoc::new(file.clone(), physical_line, None);
        let line = classifier.classify_line(&text, &loc)?;

        if let LineKind::Include { path } | LineKind::IncludeFile { path } = &line.kind {
            if !stack.is_empty() || !block_stack.is_empty() {
                return Err(mpl_err!(
                    &loc,
                    ContextViolation,
                    "INCLUDE is not allowed inside a block or function body"
                ));
            }
            let resolved = if matches!(line.kind, LineKind::Include { .. }) {
                base_path.join(format!("{}.mpl", path.trim()))
            } else {
                PathBuf::from(path.trim())
            };
            let key = resolved.to_string_lossy().to_string();
            if open_stack.contains(&key) {
                return Err(mpl_err!(&loc, IncludeCycle, "'{}' includes itself", key));
            }
            let included_source = std::fs::read_to_string(&resolved).map_err(|e| {
                mpl_err!(&loc, IncludeFailure, "could not read '{}': {}", key, e)
            })?;
            debug!("{}:{}: splicing in '{}'", loc.file, loc.line, key);
            open_stack.push(key.clone());
            process_source(
                &included_source,
                key.into(),
                base_path,
                dictionary,
                classifier,
                program,
                stack,
                block_stack,
                open_stack,
            )?;
            open_stack.pop();
            continue;
        }

        let text = &text;
        let loc = &loc;

        if matches!(stack.last(), Some(Frame::Function { .. })) {
            match &line.kind {
                LineKind::FunctionDefOpen { .. } => {
                    return Err(mpl_err!(
                        loc,
                        ContextViolation,
                        "nested FUNCTION definitions are not allowed"
                    ))
                }
                LineKind::InstrumentsOpen => {
                    return Err(mpl_err!(
                        loc,
                        ContextViolation,
                        "INSTRUMENTS is not allowed inside a function body"
                    ))
                }
                LineKind::MetaOpen => {
                    return Err(mpl_err!(
                        loc,
                        ContextViolation,
                        "META is not allowed inside a function body"
                    ))
                }
                LineKind::Chord { .. } => {
                    return Err(mpl_err!(
                        loc,
                        ContextViolation,
                        "CHORD is not allowed inside a function body"
                    ))
                }
                LineKind::Global { .. } => {
                    return Err(mpl_err!(
                        loc,
                        ContextViolation,
                        "global directives are not allowed inside a function body"
                    ))
                }
                LineKind::BlockOpen { .. } => {
                    if let Some(Frame::Function { braces, body, .. }) = stack.last_mut() {
                        braces.push(loc.clone());
                        body.push((text.clone(), loc.clone()));
                    }
                }
                LineKind::BlockClose { .. } => {
                    if let Some(Frame::Function { braces, body, .. }) = stack.last_mut() {
                        if braces.pop().is_none() {
                            return Err(mpl_err!(
                                loc,
                                StructuralMismatch,
                                "unmatched '}}' inside function body"
                            ));
                        }
                        body.push((text.clone(), loc.clone()));
                    }
                }
                LineKind::End => {
                    if let Some(Frame::Function { braces, .. }) = stack.last() {
                        if let Some(open) = braces.last() {
                            return Err(mpl_err!(
                                open,
                                StructuralMismatch,
                                "unclosed '{{' inside function body"
                            ));
                        }
                    }
                    let Some(Frame::Function { name, body, .. }) = stack.pop() else {
                        unreachable!()
                    };
                    if program.functions.contains_key(&name) {
                        return Err(mpl_err!(
                            loc,
                            Redefinition,
                            "function '{}' is already defined",
                            name
                        ));
                    }
                    trace!("{}:{}: leaving FUNCTION '{}' body ({} lines)", loc.file, loc.line, name, body.len());
                    program.functions.insert(name, Function { body });
                }
                _ => {
                    if let Some(Frame::Function { body, .. }) = stack.last_mut() {
                        body.push((text.clone(), loc.clone()));
                    }
                }
            }
            continue;
        }

        if matches!(stack.last(), Some(Frame::Instruments { .. })) {
            match &line.kind {
                LineKind::InstrumentsEntry { text: entry } => {
                    let first_word = entry.split_whitespace().next().unwrap_or_default();
                    if first_word.eq_ignore_ascii_case("VAR") {
                        return Err(mpl_err!(
                            loc,
                            ContextViolation,
                            "VAR is not allowed inside INSTRUMENTS"
                        ));
                    }
                    program.instruments.push(parse_instrument_entry(entry, loc)?);
                }
                LineKind::End => {
                    stack.pop();
                }
                _ => unreachable!("classifier only yields InstrumentsEntry/End in Instruments mode"),
            }
            continue;
        }

        if matches!(stack.last(), Some(Frame::Meta { .. })) {
            match &line.kind {
                LineKind::MetaEntry { text: entry } => {
                    program.meta_lines.push((entry.clone(), loc.clone()))
                }
                LineKind::End => {
                    stack.pop();
                }
                _ => unreachable!("classifier only yields MetaEntry/End in Meta mode"),
            }
            continue;
        }

        // Top level: no capturing frame is open.
        match &line.kind {
            LineKind::FunctionDefOpen { name } => {
                if !block_stack.is_empty() {
                    return Err(mpl_err!(
                        loc,
                        ContextViolation,
                        "FUNCTION is not allowed inside a block"
                    ));
                }
                trace!("{}:{}: entering FUNCTION '{}' body", loc.file, loc.line, name);
                stack.push(Frame::Function {
                    name: name.clone(),
                    open_loc: loc.clone(),
                    body: Vec::new(),
                    braces: Vec::new(),
                });
            }
            LineKind::InstrumentsOpen => {
                if !block_stack.is_empty() {
                    return Err(mpl_err!(
                        loc,
                        ContextViolation,
                        "INSTRUMENTS is not allowed inside a block"
                    ));
                }
                stack.push(Frame::Instruments {
                    open_loc: loc.clone(),
                });
            }
            LineKind::MetaOpen => {
                if !block_stack.is_empty() {
                    return Err(mpl_err!(
                        loc,
                        ContextViolation,
                        "META is not allowed inside a block"
                    ));
                }
                stack.push(Frame::Meta {
                    open_loc: loc.clone(),
                });
            }
            LineKind::End => {
                return Err(mpl_err!(loc, StructuralMismatch, "unmatched END"));
            }
            LineKind::Chord { rest } => {
                register_chord(program, dictionary, rest, loc)?;
            }
            LineKind::BlockOpen { .. } => {
                block_stack.push(loc.clone());
                program.top_level.push((text.clone(), loc.clone()));
            }
            LineKind::BlockClose { .. } => {
                if block_stack.pop().is_none() {
                    return Err(mpl_err!(loc, StructuralMismatch, "unmatched '}}'"));
                }
                program.top_level.push((text.clone(), loc.clone()));
            }
            LineKind::Global { .. } => {
                if !block_stack.is_empty() {
                    return Err(mpl_err!(
                        loc,
                        ContextViolation,
                        "global directives are not allowed inside a block"
                    ));
                }
                program.top_level.push((text.clone(), loc.clone()));
            }
            _ => program.top_level.push((text.clone(), loc.clone())),
        }
    }

    Ok(())
}

/// Parses one `INSTRUMENTS` entry: `<ch> <program>[/<bankMSB>[/<bankLSB>]] [<name>]`.
/// When the token after the channel isn't numeric (e.g. `piano`), the whole
/// remainder is treated as a display name and the channel falls back to
/// automatic program 0 with no bank, per spec §4.5's default.
fn parse_instrument_entry(entry: &str, loc: &SourceLoc) -> Result<InstrumentEntry, MplError> {
    let mut tokens = entry.split_whitespace();
    let ch_tok = tokens
        .next()
        .ok_or_else(|| mpl_err!(loc, ContextViolation, "empty INSTRUMENTS entry"))?;
    let channel = parse_channel_ref(ch_tok, loc)?;

    let prog_tok = tokens
        .next()
        .ok_or_else(|| mpl_err!(loc, ContextViolation, "INSTRUMENTS entry '{}' has no program", entry))?;
    let name_tokens: Vec<&str> = tokens.collect();

    let (program, bank_msb, bank_lsb, name) = match parse_program_and_bank(prog_tok) {
        Some((p, msb, lsb)) => (p, msb, lsb, name_tokens.join(" ")),
        None => {
            let name = std::iter::once(prog_tok)
                .chain(name_tokens.iter().copied())
                .collect::<Vec<_>>()
                .join(" ");
            (0u8, 0u8, 0u8, name)
        }
    };

    if bank_msb > 127 {
        return Err(mpl_err!(loc, BankOutOfRange, "bank MSB {} out of range 0..127", bank_msb));
    }
    if bank_lsb > 127 {
        return Err(mpl_err!(loc, BankOutOfRange, "bank LSB {} out of range 0..127", bank_lsb));
    }

    Ok(InstrumentEntry {
        channel,
        program,
        bank_msb,
        bank_lsb,
        name,
    })
}

/// Parses a `<program>[/<msb>[/<lsb>]]` token, `None` if it isn't numeric.
fn parse_program_and_bank(token: &str) -> Option<(u8, u8, u8)> {
    let mut fields = token.split('/');
    let program: u8 = fields.next()?.parse().ok()?;
    let msb: u8 = match fields.next() {
        Some(f) => f.parse().ok()?,
        None => 0,
    };
    let lsb: u8 = match fields.next() {
        Some(f) => f.parse().ok()?,
        None => 0,
    };
    if fields.next().is_some() {
        return None;
    }
    Some((program, msb, lsb))
}

/// Registers a `CHORD name = note, note, ...` definition, resolving each
/// member note against the dictionary up front (spec §3's `Chord`).
fn register_chord(
    program: &mut Program,
    dictionary: &Dictionary,
    rest: &str,
    loc: &SourceLoc,
) -> Result<(), MplError> {
    let (name, notes_text) = rest
        .split_once('=')
        .ok_or_else(|| mpl_err!(loc, UnknownToken, "malformed CHORD definition '{}'", rest))?;
    let name = name.trim().to_string();

    if dictionary.is_note_name(&name) || dictionary.is_percussion_name(&name) {
        return Err(mpl_err!(
            loc,
            Redefinition,
            "chord name '{}' collides with a note or percussion name",
            name
        ));
    }
    if program.chords.contains_key(&name) {
        return Err(mpl_err!(loc, Redefinition, "chord '{}' is already defined", name));
    }

    let notes = notes_text
        .split(',')
        .map(|tok| resolve_note_token(dictionary, tok.trim(), loc))
        .collect::<Result<Vec<_>, _>>()?;
    program.chords.insert(name, notes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_source(src: &str) -> Result<Program, MplError> {
        let dict = Dictionary::default();
        let file: Rc<str> = "test.mpl".into();
        run(src, file, Path::new("inc"), &dict)
    }

    #[test]
    fn captures_function_body_raw() {
        let program = run_source("FUNCTION test1\n0 c /4\nEND\n").unwrap();
        let f = program.functions.get("test1").unwrap();
        assert_eq!(f.body.len(), 1);
        assert_eq!(f.body[0].0, "0 c /4");
    }

    #[test]
    fn collects_instruments_with_bank_numbers() {
        let program = run_source(
            "INSTRUMENTS\n0 piano\n1 2/0/0\n10 24/120/0\n15 24/120/1\nEND\n",
        )
        .unwrap();
        assert_eq!(program.instruments.len(), 4);
        let ch1 = program.instruments.iter().find(|e| e.channel == 1).unwrap();
        assert_eq!((ch1.program, ch1.bank_msb, ch1.bank_lsb), (2, 0, 0));
        let ch15 = program.instruments.iter().find(|e| e.channel == 15).unwrap();
        assert_eq!((ch15.program, ch15.bank_msb, ch15.bank_lsb), (24, 120, 1));
    }

    #[test]
    fn chord_colliding_with_note_name_is_redefinition() {
        let err = run_source("CHORD c = c,d\n").unwrap_err();
        assert!(matches!(err, MplError::Redefinition { .. }));
    }

    #[test]
    fn var_inside_instruments_is_context_violation() {
        let err = run_source("INSTRUMENTS\nVAR $x = 1\nEND\n").unwrap_err();
        assert!(matches!(err, MplError::ContextViolation { .. }));
    }

    #[test]
    fn unclosed_block_is_structural_mismatch() {
        let err = run_source("{ q=2\n0 c /4\n").unwrap_err();
        assert!(matches!(err, MplError::StructuralMismatch { .. }));
    }

    #[test]
    fn chord_inside_function_is_context_violation() {
        let err = run_source("FUNCTION f\nCHORD x = c,e,g\nEND\n").unwrap_err();
        assert!(matches!(err, MplError::ContextViolation { .. }));
    }

    #[test]
    fn top_level_preserves_block_delimiters_for_pass_two() {
        let program = run_source("{ q=2\n0 c /4\n}\n").unwrap();
        assert_eq!(program.top_level.len(), 3);
    }

    #[test]
    fn include_inside_function_body_is_context_violation() {
        let err = run_source("FUNCTION f\nINCLUDE foo\nEND\n").unwrap_err();
        assert!(matches!(err, MplError::ContextViolation { .. }));
    }

    #[test]
    fn include_inside_block_is_context_violation() {
        let err = run_source("{ q=2\nINCLUDEFILE foo.mpl\n}\n").unwrap_err();
        assert!(matches!(err, MplError::ContextViolation { .. }));
    }
}
