//! # Pass 2 — execution
//!
//! Walks the top-level line stream pass 1 produced, expanding blocks and
//! `CALL`s inline and feeding note/meta events to the [`Emitter`] as it
//! goes. Grounded on the teacher's second `Parser` pass, which consumes the
//! token stream with the metadata pass 1 already gathered available as
//! context — generalized here from "parse with context, building an AST" to
//! "execute with context, emitting events directly", since this executor has
//! no AST to hand back: the sequence itself is the result.

use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::channel::{scaled_duration, Channels};
use crate::dictionary::{resolve_channel_note, Dictionary, Resolved};
use crate::error::{MplError, Warning};
use crate::length::parse_length_checked;
use crate::lexer::{parse_channel_ref, LineClassifier, LineKind, SourceLoc};
use crate::mpl_err;
use crate::options::{parse_options, split_command_and_options, OptionFrame};
use crate::sequence::{Emitter, MetaKind};

use super::{CompileOutput, Program};

pub fn run(program: &Program, dictionary: &Arc<Dictionary>, resolution: u32) -> Result<CompileOutput, MplError> {
    let mut ctx = Ctx {
        dictionary,
        program,
        resolution,
        channels: Channels::default(),
        emitter: Emitter::new(resolution),
        resolver: crate::resolver::Resolver::new(),
        call_stack: HashSet::new(),
        warnings: Vec::new(),
    };

    for entry in &program.instruments {
        let state = ctx.channels.get_mut(entry.channel);
        state.program = entry.program;
        state.bank_msb = entry.bank_msb;
        state.bank_lsb = entry.bank_lsb;
        state.name = entry.name.clone();
        state.declared = true;
        ctx.emitter.emit_program_change(entry.channel, entry.program, 0);
        ctx.emitter
            .emit_bank_select(entry.channel, entry.bank_msb, entry.bank_lsb, 0);
        if !entry.name.is_empty() {
            ctx.emitter.emit_instrument_name(entry.channel, &entry.name, 0);
        }
    }

    if !program.meta_lines.is_empty() {
        let text = program
            .meta_lines
            .iter()
            .map(|(t, _)| t.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        ctx.emitter.emit_meta(MetaKind::Text(text), 0);
    }

    let root = OptionFrame::root();
    ctx.exec_lines(&program.top_level, &root)?;

    Ok(ctx.finish())
}

struct Ctx<'a> {
    dictionary: &'a Dictionary,
    program: &'a Program,
    resolution: u32,
    channels: Channels,
    emitter: Emitter,
    resolver: crate::resolver::Resolver,
    call_stack: HashSet<String>,
    warnings: Vec<Warning>,
}

impl<'a> Ctx<'a> {
    fn finish(self) -> CompileOutput {
        CompileOutput {
            sequence: self.emitter.finish(),
            warnings: self.warnings,
        }
    }

    /// Executes one line list in source order. Nested `{ ... }` blocks are
    /// located on the fly (pass 1 validated overall brace balance, so the
    /// scan here never fails in practice); `CALL` bodies are re-resolved and
    /// re-classified fresh from the captured raw text on every invocation.
    fn exec_lines(&mut self, lines: &[(String, SourceLoc)], frame: &Rc<OptionFrame>) -> Result<(), MplError> {
        let mut i = 0;
        while i < lines.len() {
            let (raw_text, loc) = &lines[i];
            let resolved_text = self.resolver.resolve_line(raw_text, loc)?;
            let line = LineClassifier::new().classify_line(&resolved_text, loc)?;

            match line.kind {
                LineKind::BlockOpen { rest } => {
                    let close = find_matching_close(lines, i)?;
                    let body = lines[i + 1..close].to_vec();
                    let opts = parse_options(&rest, loc)?;
                    let child = OptionFrame::child(frame, &opts);
                    trace!(
                        "{}:{}: entering block (q={}, m={})",
                        loc.file, loc.line, child.quantity, child.multiple
                    );
                    self.exec_repeated(&body, &child)?;
                    trace!("{}:{}: exiting block", loc.file, loc.line);
                    i = close + 1;
                }
                LineKind::BlockClose { .. } => {
                    return Err(mpl_err!(loc, StructuralMismatch, "unexpected '}}'"));
                }
                LineKind::Call { rest } => {
                    let (name, opt_text) = split_call_header(&rest);
                    if self.call_stack.contains(&name) {
                        return Err(mpl_err!(
                            loc,
                            RecursiveCall,
                            "function '{}' calls itself",
                            name
                        ));
                    }
                    let body = self
                        .program
                        .functions
                        .get(&name)
                        .ok_or_else(|| {
                            mpl_err!(loc, UnknownToken, "call to undefined function '{}'", name)
                        })?
                        .body
                        .clone();
                    let opts = parse_options(opt_text, loc)?;
                    let child = OptionFrame::child(frame, &opts);
                    debug!("{}:{}: calling function '{}'", loc.file, loc.line, name);
                    self.call_stack.insert(name.clone());
                    let result = self.exec_repeated(&body, &child);
                    self.call_stack.remove(&name);
                    result?;
                    trace!("{}:{}: returned from '{}'", loc.file, loc.line, name);
                    i += 1;
                }
                LineKind::Global { directive, rest } => {
                    self.exec_global(&directive, &rest, loc)?;
                    i += 1;
                }
                LineKind::ChannelCmd { rest } => {
                    self.exec_channel_cmd(&rest, loc, frame)?;
                    i += 1;
                }
                LineKind::Var { rest } => {
                    let (name, value) = split_assignment(&rest, loc)?;
                    self.resolver.assign_var(&name, &value);
                    i += 1;
                }
                LineKind::Const { rest } => {
                    let (name, value) = split_assignment(&rest, loc)?;
                    self.resolver.define_const(&name, &value, loc)?;
                    i += 1;
                }
                _ => i += 1,
            }
        }
        Ok(())
    }

    /// Runs `body` `frame.quantity` times (0 iterations, no side effects, if
    /// `q=0`), restoring channel ticks once at the end if `frame.multiple`.
    fn exec_repeated(&mut self, body: &[(String, SourceLoc)], frame: &Rc<OptionFrame>) -> Result<(), MplError> {
        let snapshot = self.channels.snapshot_ticks();
        for _ in 0..frame.quantity {
            self.exec_lines(body, frame)?;
        }
        if frame.multiple {
            self.channels.restore_ticks(snapshot);
        }
        Ok(())
    }

    fn exec_channel_cmd(&mut self, rest: &str, loc: &SourceLoc, frame: &Rc<OptionFrame>) -> Result<(), MplError> {
        let (main, opt_text) = split_command_and_options(rest);
        let mut tokens = main.split_whitespace();
        let ch_tok = tokens
            .next()
            .ok_or_else(|| mpl_err!(loc, UnknownToken, "empty channel command"))?;
        let channel = parse_channel_ref(ch_tok, loc)?;
        let note_tok = tokens
            .next()
            .ok_or_else(|| mpl_err!(loc, UnknownToken, "channel command missing note/length"))?;
        let length_tok = tokens
            .next()
            .ok_or_else(|| mpl_err!(loc, UnknownToken, "channel command missing length"))?;
        if tokens.next().is_some() {
            return Err(mpl_err!(
                loc,
                UnknownToken,
                "unexpected trailing tokens in channel command"
            ));
        }

        let opts = parse_options(opt_text, loc)?;
        let cmd_frame = OptionFrame::child(frame, &opts);

        // Channels used without an `INSTRUMENTS` entry implicitly default to
        // program 0 (spec §4.5); using one marks it declared from here on.
        self.channels.get_mut(channel).declared = true;

        let snapshot = self.channels.snapshot_ticks();
        if cmd_frame.quantity == 0 {
            // Emits nothing, but bookkeeping still advances by one computed
            // length (spec's option table entry for q=0).
            let (length, lost_precision) = parse_length_checked(length_tok, self.resolution, loc)?;
            if lost_precision {
                self.warn_imprecise_length(note_tok, length_tok, length, loc);
            }
            let tick = self.channels.get(channel).current_tick;
            self.channels.get_mut(channel).current_tick = tick + length;
        } else {
            for _ in 0..cmd_frame.quantity {
                self.emit_one(channel, note_tok, length_tok, loc, &cmd_frame)?;
            }
        }
        if cmd_frame.multiple {
            self.channels.restore_ticks(snapshot);
        }
        Ok(())
    }

    fn emit_one(
        &mut self,
        channel: u8,
        note_tok: &str,
        length_tok: &str,
        loc: &SourceLoc,
        frame: &Rc<OptionFrame>,
    ) -> Result<(), MplError> {
        let (length, lost_precision) = parse_length_checked(length_tok, self.resolution, loc)?;
        if lost_precision {
            self.warn_imprecise_length(note_tok, length_tok, length, loc);
        }
        let tick = self.channels.get(channel).current_tick;
        let velocity = frame.effective_velocity();
        let duration_ratio = frame.effective_duration_ratio();
        let shift = frame.effective_shift();

        if note_tok.eq_ignore_ascii_case("rest") {
            if let Some(lyrics) = &frame.lyrics {
                self.emitter.emit_meta(MetaKind::Lyrics(lyrics.clone()), tick);
            }
        } else if let Some(notes) = self.program.chords.get(note_tok).cloned() {
            self.emit_notes(channel, &notes, velocity, shift, tick, length, duration_ratio, frame);
        } else {
            match resolve_channel_note(self.dictionary, note_tok, channel, loc)? {
                Resolved::Percussion(n) => {
                    self.emit_notes(channel, &[n], velocity, 0, tick, length, duration_ratio, frame)
                }
                Resolved::Note(n) => {
                    self.emit_notes(channel, &[n], velocity, shift, tick, length, duration_ratio, frame)
                }
            }
        }

        self.channels.get_mut(channel).current_tick = tick + length;
        Ok(())
    }

    /// Emits one or more notes (a chord shares its tick across members).
    /// `tremolo=N` splits `length` into `N` equal sub-notes played in
    /// sequence, the last absorbing the rounding remainder so the total
    /// advance still equals `length` exactly.
    fn emit_notes(
        &mut self,
        channel: u8,
        notes: &[i32],
        velocity: u8,
        shift: i32,
        tick: u32,
        length: u32,
        duration_ratio: (u32, u32),
        frame: &Rc<OptionFrame>,
    ) {
        let sub_count = frame.tremolo.unwrap_or(1).max(1);
        let base = length / sub_count;
        let remainder = length - base * (sub_count - 1);

        let mut t = tick;
        for sub in 0..sub_count {
            let sub_len = if sub + 1 == sub_count { remainder } else { base };
            for &n in notes {
                let pitch = (n + shift).clamp(0, 127) as u8;
                self.emitter.emit_note_on(channel, pitch, velocity, t);
            }
            let off_tick = t + scaled_duration(sub_len, duration_ratio);
            for &n in notes {
                let pitch = (n + shift).clamp(0, 127) as u8;
                self.emitter.emit_note_off(channel, pitch, off_tick);
            }
            if sub == 0 {
                if let Some(lyrics) = &frame.lyrics {
                    self.emitter.emit_meta(MetaKind::Lyrics(lyrics.clone()), t);
                }
            }
            t += sub_len;
        }
    }

    /// Records a rest/note whose length token couldn't be represented
    /// exactly at this resolution and had to be rounded (spec §7).
    fn warn_imprecise_length(&mut self, note_tok: &str, length_tok: &str, rounded: u32, loc: &SourceLoc) {
        let what = if note_tok.eq_ignore_ascii_case("rest") {
            "rest"
        } else {
            "note"
        };
        let message = format!(
            "{} length '{}' is not exact at this resolution; rounded to {} ticks",
            what, length_tok, rounded
        );
        warn!("{}:{}: {}", loc.file, loc.line, message);
        self.warnings.push(Warning {
            file: loc.file.to_string(),
            line: loc.line,
            message,
        });
    }

    fn exec_global(&mut self, directive: &str, rest: &str, loc: &SourceLoc) -> Result<(), MplError> {
        let tick = self.channels.max_declared_tick();
        match directive {
            "tempo" => {
                let bpm: f64 = rest
                    .trim()
                    .parse()
                    .map_err(|_| mpl_err!(loc, BadOption, "invalid tempo '{}'", rest))?;
                if bpm <= 0.0 {
                    return Err(mpl_err!(loc, BadOption, "tempo must be positive, got '{}'", rest));
                }
                let micros_per_quarter = (60_000_000.0 / bpm).round() as u32;
                self.emitter.emit_meta(MetaKind::SetTempo(micros_per_quarter), tick);
            }
            "time" => {
                let (num, den) = rest
                    .split_once('/')
                    .ok_or_else(|| mpl_err!(loc, BadOption, "invalid time signature '{}'", rest))?;
                let numerator: u8 = num
                    .trim()
                    .parse()
                    .map_err(|_| mpl_err!(loc, BadOption, "invalid time numerator '{}'", num))?;
                let denominator: u8 = den
                    .trim()
                    .parse()
                    .map_err(|_| mpl_err!(loc, BadOption, "invalid time denominator '{}'", den))?;
                self.emitter.emit_meta(
                    MetaKind::TimeSig {
                        numerator,
                        denominator,
                    },
                    tick,
                );
            }
            "key" => {
                let (note, mode) = rest
                    .split_once('/')
                    .ok_or_else(|| mpl_err!(loc, BadOption, "invalid key signature '{}'", rest))?;
                let (fifths, minor) = key_to_fifths(note.trim(), mode.trim(), loc)?;
                self.emitter.emit_meta(MetaKind::KeySig { fifths, minor }, tick);
            }
            other => unreachable!("lexer only yields tempo/time/key globals, got '{}'", other),
        }
        debug!(
            "{}:{}: '{}' directive synchronizes all declared channels to tick {}",
            loc.file, loc.line, directive, tick
        );
        self.channels.synchronize_to(tick);
        Ok(())
    }
}

fn find_matching_close(lines: &[(String, SourceLoc)], open_index: usize) -> Result<usize, MplError> {
    let mut depth = 1i32;
    for (i, (text, _)) in lines.iter().enumerate().skip(open_index + 1) {
        let trimmed = text.trim();
        if trimmed.starts_with('{') {
            depth += 1;
        } else if trimmed.starts_with('}') {
            depth -= 1;
            if depth == 0 {
                return Ok(i);
            }
        }
    }
    Err(mpl_err!(&lines[open_index].1, StructuralMismatch, "unclosed '{{'"))
}

fn split_call_header(rest: &str) -> (String, &str) {
    match rest.split_once(',') {
        Some((name, opts)) => (name.trim().to_string(), opts.trim()),
        None => (rest.trim().to_string(), ""),
    }
}

fn split_assignment(rest: &str, loc: &SourceLoc) -> Result<(String, String), MplError> {
    let (name_part, value) = rest
        .split_once('=')
        .ok_or_else(|| mpl_err!(loc, UnknownToken, "malformed assignment '{}'", rest))?;
    let name = name_part.trim().trim_start_matches('$').to_string();
    Ok((name, value.trim().to_string()))
}

/// Maps a `key <note>/<mode>` directive to a signed fifths count and
/// major/minor flag (spec §6's `key_sig` meta event), using the standard
/// circle-of-fifths ordering.
fn key_to_fifths(note: &str, mode: &str, loc: &SourceLoc) -> Result<(i8, bool), MplError> {
    let minor = mode.eq_ignore_ascii_case("minor");
    let fifths = match note.to_ascii_lowercase().as_str() {
        "c" => 0,
        "g" => 1,
        "d" => 2,
        "a" => 3,
        "e" => 4,
        "b" => 5,
        "f#" | "gb" => 6,
        "c#" | "db" => -5,
        "ab" => -4,
        "eb" => -3,
        "bb" => -2,
        "f" => -1,
        other => return Err(mpl_err!(loc, BadOption, "unknown key '{}'", other)),
    };
    Ok((fifths, minor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::Dictionary;
    use crate::executor::pass1;
    use std::path::Path;

    fn compile(src: &str) -> CompileOutput {
        let dict = Arc::new(Dictionary::default());
        let file: Rc<str> = "test.mpl".into();
        let program = pass1::run(src, file, Path::new("inc"), &dict).unwrap();
        run(&program, &dict, 480).unwrap()
    }

    #[test]
    fn single_note_advances_tick_and_pairs_note_off() {
        let out = compile("0 c /4\n");
        assert_eq!(out.sequence.channel_tracks[0].len(), 2);
        assert_eq!(out.sequence.channel_tracks[0][0].tick, 0);
        assert_eq!(out.sequence.channel_tracks[0][1].tick, 480);
    }

    #[test]
    fn duration_ratio_only_affects_note_off() {
        let out = compile("0 c /4, d=50%\n");
        assert_eq!(out.sequence.channel_tracks[0][1].tick, 240);
    }

    #[test]
    fn block_with_quantity_repeats_body() {
        let out = compile("{ q=3\n0 c /4\n}\n");
        assert_eq!(out.sequence.channel_tracks[0].len(), 6);
        let last_on = out.sequence.channel_tracks[0][4].tick;
        assert_eq!(last_on, 960);
    }

    #[test]
    fn multiple_block_restores_tick() {
        let out = compile("{ q=3, m\n0 c /4\n}\n0 c /2\n");
        // The m-block emits 3 note-on/off pairs but leaves tick at 0, so the
        // trailing note starts right after it.
        let trailing_on = out
            .sequence
            .channel_tracks[0]
            .iter()
            .rev()
            .find(|e| matches!(e.event, crate::sequence::ChannelEvent::NoteOn { .. }))
            .unwrap();
        assert_eq!(trailing_on.tick, 0);
    }

    #[test]
    fn recursive_call_is_rejected() {
        let dict = Arc::new(Dictionary::default());
        let file: Rc<str> = "test.mpl".into();
        let src = "FUNCTION f\nCALL f\nEND\nCALL f\n";
        let program = pass1::run(src, file, Path::new("inc"), &dict).unwrap();
        let err = run(&program, &dict, 480).unwrap_err();
        assert!(matches!(err, MplError::RecursiveCall { .. }));
    }

    #[test]
    fn imprecise_length_is_collected_as_a_warning() {
        // *4tt (two chained thirds) rounds to 3413, not 3413.33..., so this
        // rest's length can't be represented exactly at this resolution.
        let dict = Arc::new(Dictionary::default());
        let file: Rc<str> = "test.mpl".into();
        let src = "0 rest *4tt\n";
        let program = pass1::run(src, file, Path::new("inc"), &dict).unwrap();
        let out = run(&program, &dict, 480).unwrap();
        assert!(
            !out.warnings.is_empty(),
            "a rest length that doesn't divide evenly should produce a warning"
        );
        assert!(out.warnings[0].message.contains("rest"));
    }

    #[test]
    fn zero_quantity_channel_command_advances_tick_without_emitting() {
        let out = compile("0 c /4, q=0\n0 d /4\n");
        let track = &out.sequence.channel_tracks[0];
        // Only the second command (q defaults to 1) emits a note on/off pair,
        // but it starts at tick 480: the q=0 command still consumed a /4.
        assert_eq!(track.len(), 2);
        assert_eq!(track[0].tick, 480);
    }

    #[test]
    fn tempo_directive_synchronizes_declared_channels() {
        let out = compile("0 c /4\n1 d /2\ntempo 120\n");
        assert_eq!(out.sequence.channel_tracks[0][1].tick, 480);
        // Both declared channels are synchronized to tick 960 (channel 1's
        // current tick, the max among declared channels) by the directive.
        assert!(out
            .sequence
            .meta_track
            .iter()
            .any(|e| matches!(e.event, MetaKind::SetTempo(_)) && e.tick == 960));
    }

    #[test]
    fn tremolo_splits_note_into_equal_sub_notes() {
        let out = compile("0 c /4, tr=4\n");
        let note_ons: Vec<u32> = out
            .sequence
            .channel_tracks[0]
            .iter()
            .filter(|e| matches!(e.event, crate::sequence::ChannelEvent::NoteOn { .. }))
            .map(|e| e.tick)
            .collect();
        assert_eq!(note_ons, vec![0, 120, 240, 360]);
    }

    #[test]
    fn shift_option_transposes_note() {
        let out = compile("FUNCTION f\n0 c /4\nEND\nCALL f, s=12\n");
        let first_on = &out.sequence.channel_tracks[0][0];
        match first_on.event {
            crate::sequence::ChannelEvent::NoteOn { note, .. } => assert_eq!(note, 72),
            _ => panic!("expected a note-on"),
        }
    }
}
