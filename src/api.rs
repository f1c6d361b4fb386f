//! # Public API
//!
//! Thin wrapper functions layered over the two-pass pipeline (spec §6).
//! Grounded on `gen-compiler/src/api.rs`'s `compile`/`compile_unchecked`/
//! `compile_with_options` layering of convenience entry points over
//! `parse`/`validate`/`to_musicxml` — the same shape, generalized from
//! "parse, validate, render" to "lex+resolve+structure, execute, optionally
//! frame as MIDI bytes" since this pipeline has no separate validation stage
//! of its own (structural checks happen inline in pass 1/pass 2).
//!
//! ## Typical usage
//! ```rust
//! use mpl::compile;
//!
//! let source = "0 c /4\n0 d /4\n";
//! let output = compile(source, "song.mpl")?;
//! assert!(!output.sequence.channel_tracks[0].is_empty());
//! # Ok::<(), mpl::MplError>(())
//! ```

use std::sync::Arc;

use crate::dictionary::Dictionary;
use crate::error::MplError;
use crate::executor::{CompileOutput, Compiler};
use crate::midi;

/// Compiles `source` with the built-in default dictionary at the default
/// resolution (480 ticks per quarter note).
pub fn compile(source: &str, file: &str) -> Result<CompileOutput, MplError> {
    Compiler::new(Arc::new(Dictionary::default())).compile(source, file)
}

/// Compiles `source` with a caller-supplied dictionary, for embedders who've
/// loaded a custom instrument/percussion table (spec §4.7).
pub fn compile_with_dictionary(
    source: &str,
    file: &str,
    dictionary: &Dictionary,
) -> Result<CompileOutput, MplError> {
    Compiler::new(Arc::new(dictionary.clone())).compile(source, file)
}

/// Compiles `source` and frames the resulting sequence as Standard MIDI File
/// bytes, ready to write to a `.mid` file.
pub fn compile_to_midi(source: &str, file: &str) -> Result<Vec<u8>, MplError> {
    let output = compile(source, file)?;
    Ok(midi::write_smf(&output.sequence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_minimal_program() {
        let output = compile("0 c /4\n", "test.mpl").unwrap();
        assert_eq!(output.sequence.channel_tracks[0].len(), 2);
    }

    #[test]
    fn compile_to_midi_produces_smf_bytes() {
        let bytes = compile_to_midi("0 c /4\n", "test.mpl").unwrap();
        assert_eq!(&bytes[0..4], b"MThd");
    }

    #[test]
    fn compile_with_dictionary_uses_caller_overrides() {
        let overrides = Dictionary::parse("note.c=1\n", &crate::lexer::SourceLoc::synthetic()).unwrap();
        let dict = Dictionary::default().merged_with(&overrides);
        let output = compile_with_dictionary("0 c /4\n", "test.mpl", &dict).unwrap();
        match &output.sequence.channel_tracks[0][0].event {
            crate::sequence::ChannelEvent::NoteOn { note, .. } => assert_eq!(*note, 61),
            _ => panic!("expected a note-on"),
        }
    }
}
