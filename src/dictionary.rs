//! # Note / chord / percussion dictionary
//!
//! Bidirectional maps between note names, percussion shortcuts, and MIDI
//! numbers (spec §2 component 2). Loaded once, read-only for the rest of a
//! compilation. Grounded on the note-name-to-MIDI-number mapping the teacher
//! keeps as a fixed 7-entry enum match (`Note::to_midi_note`), generalized
//! here into an open, data-driven table parsed from a flat text format
//! instead of a closed Rust enum, since MPL's note/percussion vocabulary is
//! open (percussion shortcuts, user dictionary overrides) rather than fixed.

use std::collections::HashMap;

use crate::error::MplError;
use crate::lexer::SourceLoc;
use crate::mpl_err;

/// `c=0, d=2, e=4, f=5, g=7, a=9, b=11` relative to the octave's `c`.
/// `c` at octave 0 (no `+`/`-` modifiers) is MIDI note 60 (middle C).
const DEFAULT_TABLE: &str = "\
note.c=0
note.d=2
note.e=4
note.f=5
note.g=7
note.a=9
note.b=11
percussion.kick=36
percussion.snare=38
percussion.sidestick=37
percussion.clap=39
percussion.hihat_closed=42
percussion.hihat_pedal=44
percussion.hihat_open=46
percussion.tom_low=45
percussion.tom_mid=47
percussion.tom_high=50
percussion.crash=49
percussion.ride=51
percussion.cowbell=56
percussion.tambourine=54
percussion.claves=75
percussion.shaker=70
";

const REFERENCE_MIDI_C: i32 = 60;

/// A resolved note or percussion name, one semitone value away from being a
/// MIDI note number (percussion entries ignore octave shift; see
/// [`Dictionary::resolve`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    /// A pitched note at this absolute MIDI number (before `octave_shift`).
    Note(i32),
    /// A percussion shortcut; always on channel 9, never octave-shifted.
    Percussion(i32),
}

/// The loaded note/percussion table. Immutable after construction; safe to
/// share across parallel compiler instances behind an `Arc` (spec §5).
#[derive(Debug, Clone)]
pub struct Dictionary {
    notes: HashMap<String, i32>,
    percussion: HashMap<String, i32>,
}

impl Default for Dictionary {
    fn default() -> Self {
        Dictionary::parse(DEFAULT_TABLE, &SourceLoc::new("<builtin>".into(), 0, None))
            .expect("builtin dictionary table must be well-formed")
    }
}

impl Dictionary {
    /// Parses a flat `section.name=value` table, one entry per line, blank
    /// lines and `#`-prefixed comments ignored. Used for both the embedded
    /// default and user override files (`config::load_overrides`).
    pub fn parse(text: &str, loc: &SourceLoc) -> Result<Dictionary, MplError> {
        let mut notes = HashMap::new();
        let mut percussion = HashMap::new();

        for (i, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut entry_loc = loc.clone();
            entry_loc.line = loc.line + i;

            let (key, value) = line.split_once('=').ok_or_else(|| {
                mpl_err!(
                    &entry_loc,
                    FileNotFound,
                    "malformed dictionary entry '{}': expected 'key=value'",
                    line
                )
            })?;
            let (section, name) = key.split_once('.').ok_or_else(|| {
                mpl_err!(
                    &entry_loc,
                    FileNotFound,
                    "malformed dictionary key '{}': expected 'section.name'",
                    key
                )
            })?;
            let number: i32 = value.trim().parse().map_err(|_| {
                mpl_err!(
                    &entry_loc,
                    FileNotFound,
                    "dictionary value '{}' for '{}' is not an integer",
                    value,
                    key
                )
            })?;

            match section {
                "note" => {
                    notes.insert(name.to_ascii_lowercase(), number);
                }
                "percussion" => {
                    percussion.insert(name.to_ascii_lowercase(), number);
                }
                other => {
                    return Err(mpl_err!(
                        &entry_loc,
                        FileNotFound,
                        "unknown dictionary section '{}'",
                        other
                    ))
                }
            }
        }

        Ok(Dictionary { notes, percussion })
    }

    /// Overlays `other`'s entries on top of `self`, `other` winning ties.
    /// Used by `config::Dictionary::with_overrides` to merge a user file
    /// over the built-in default without losing unoverridden entries.
    pub fn merged_with(mut self, other: &Dictionary) -> Dictionary {
        for (k, v) in &other.notes {
            self.notes.insert(k.clone(), *v);
        }
        for (k, v) in &other.percussion {
            self.percussion.insert(k.clone(), *v);
        }
        self
    }

    pub fn is_note_name(&self, name: &str) -> bool {
        self.notes.contains_key(&name.to_ascii_lowercase())
    }

    pub fn is_percussion_name(&self, name: &str) -> bool {
        self.percussion.contains_key(&name.to_ascii_lowercase())
    }

    /// Resolves a bare note-name token (already stripped of octave
    /// modifiers by the caller) or a percussion shortcut, on the given
    /// channel (percussion only resolves on channel 9).
    pub fn resolve(&self, token: &str, channel: u8, loc: &SourceLoc) -> Result<Resolved, MplError> {
        let lower = token.to_ascii_lowercase();
        if channel == 9 {
            if let Some(&num) = self.percussion.get(&lower) {
                return Ok(Resolved::Percussion(num));
            }
        }
        if let Some(&offset) = self.notes.get(&lower) {
            return Ok(Resolved::Note(REFERENCE_MIDI_C + offset));
        }
        Err(mpl_err!(
            loc,
            UnknownNote,
            "'{}' is not a known note name{}",
            token,
            if channel == 9 { " or percussion shortcut" } else { "" }
        ))
    }
}

/// Splits a bare note token (`c`, `c+2`, `g-`, ...) into its name and
/// trailing octave-modifier suffix. The name is whatever leading run of
/// alphabetic characters precedes the first `+`/`-`/digit.
fn split_note_token(token: &str) -> (&str, &str) {
    let idx = token
        .find(|c: char| c == '+' || c == '-')
        .unwrap_or(token.len());
    token.split_at(idx)
}

/// Resolves a non-percussion note token to an absolute MIDI pitch: either a
/// bare numeric literal (`67`) or a dictionary note name with an optional
/// octave-modifier suffix (`c`, `c+2`, `g-`). Used for chord member notes
/// (spec §3's `Chord`), which are always resolved against channel 0 since
/// chord definitions carry no channel context of their own.
pub fn resolve_note_token(dict: &Dictionary, token: &str, loc: &SourceLoc) -> Result<i32, MplError> {
    match resolve_channel_note(dict, token, 0, loc)? {
        Resolved::Note(n) => Ok(n),
        Resolved::Percussion(n) => Ok(n),
    }
}

/// Resolves a note token on a specific channel: a bare numeric literal, or a
/// dictionary name with an optional octave-modifier suffix. On channel 9 a
/// percussion shortcut is tried first and returned unshifted (percussion
/// ignores octave modifiers); everything else resolves as a pitched note.
pub fn resolve_channel_note(
    dict: &Dictionary,
    token: &str,
    channel: u8,
    loc: &SourceLoc,
) -> Result<Resolved, MplError> {
    if let Ok(n) = token.parse::<i32>() {
        return Ok(Resolved::Note(n));
    }
    let (name, suffix) = split_note_token(token);
    match dict.resolve(name, channel, loc)? {
        Resolved::Note(base) => Ok(Resolved::Note(base + parse_octave_suffix(suffix, loc)?)),
        percussion @ Resolved::Percussion(_) => Ok(percussion),
    }
}

/// Parses the octave-modifier suffix of a note token (`+`, `-`, `+2`, `-3`,
/// ...) into a semitone offset. Each `+`/`-` is one octave (12 semitones);
/// an optional trailing digit multiplies the count of octaves, mirroring
/// the single-symbol-per-octave convention (`c+`, `c+2`) spec §3 describes
/// rather than stacking repeated symbols (`c++`).
pub fn parse_octave_suffix(suffix: &str, loc: &SourceLoc) -> Result<i32, MplError> {
    if suffix.is_empty() {
        return Ok(0);
    }
    let sign = match suffix.chars().next() {
        Some('+') => 1,
        Some('-') => -1,
        Some(c) => {
            return Err(mpl_err!(
                loc,
                UnknownNote,
                "unexpected octave modifier character '{}'",
                c
            ))
        }
        None => return Ok(0),
    };
    let digits = &suffix[1..];
    let count: i32 = if digits.is_empty() {
        1
    } else {
        digits.parse().map_err(|_| {
            mpl_err!(
                loc,
                UnknownNote,
                "invalid octave count in modifier '{}'",
                suffix
            )
        })?
    };
    Ok(sign * count * 12)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_base_notes() {
        let dict = Dictionary::default();
        assert_eq!(dict.resolve("c", 0, &SourceLoc::synthetic()).unwrap(), Resolved::Note(60));
        assert_eq!(dict.resolve("g", 0, &SourceLoc::synthetic()).unwrap(), Resolved::Note(67));
    }

    #[test]
    fn resolves_percussion_only_on_channel_nine() {
        let dict = Dictionary::default();
        assert_eq!(
            dict.resolve("snare", 9, &SourceLoc::synthetic()).unwrap(),
            Resolved::Percussion(38)
        );
        assert!(dict.resolve("snare", 0, &SourceLoc::synthetic()).is_err());
    }

    #[test]
    fn unknown_note_is_an_error() {
        let dict = Dictionary::default();
        assert!(matches!(
            dict.resolve("h", 0, &SourceLoc::synthetic()),
            Err(MplError::UnknownNote { .. })
        ));
    }

    #[test]
    fn octave_suffix_parsing() {
        let loc = SourceLoc::synthetic();
        assert_eq!(parse_octave_suffix("", &loc).unwrap(), 0);
        assert_eq!(parse_octave_suffix("+", &loc).unwrap(), 12);
        assert_eq!(parse_octave_suffix("-", &loc).unwrap(), -12);
        assert_eq!(parse_octave_suffix("+2", &loc).unwrap(), 24);
        assert_eq!(parse_octave_suffix("-3", &loc).unwrap(), -36);
    }

    #[test]
    fn resolve_note_token_handles_names_numbers_and_octaves() {
        let dict = Dictionary::default();
        let loc = SourceLoc::synthetic();
        assert_eq!(resolve_note_token(&dict, "c", &loc).unwrap(), 60);
        assert_eq!(resolve_note_token(&dict, "c+", &loc).unwrap(), 72);
        assert_eq!(resolve_note_token(&dict, "g-2", &loc).unwrap(), 43);
        assert_eq!(resolve_note_token(&dict, "67", &loc).unwrap(), 67);
    }

    #[test]
    fn resolve_channel_note_tries_percussion_first_on_channel_nine() {
        let dict = Dictionary::default();
        let loc = SourceLoc::synthetic();
        assert_eq!(
            resolve_channel_note(&dict, "snare", 9, &loc).unwrap(),
            Resolved::Percussion(38)
        );
        assert_eq!(
            resolve_channel_note(&dict, "c+", 9, &loc).unwrap(),
            Resolved::Note(72)
        );
    }

    #[test]
    fn override_merge_wins_over_default() {
        let dict = Dictionary::default();
        let overrides = Dictionary::parse("note.c=1\n", &SourceLoc::synthetic()).unwrap();
        let merged = dict.merged_with(&overrides);
        assert_eq!(
            merged.resolve("c", 0, &SourceLoc::synthetic()).unwrap(),
            Resolved::Note(61)
        );
        // Unrelated entries survive the merge.
        assert_eq!(
            merged.resolve("d", 0, &SourceLoc::synthetic()).unwrap(),
            Resolved::Note(62)
        );
    }
}
