//! # MPL — a line-oriented music programming language
//!
//! A two-pass compiler that turns MPL source into a tick-stamped MIDI event
//! stream.
//!
//! ## Compilation pipeline
//!
//! ```text
//! .mpl source → lexer → resolver → pass 1 (structure) → pass 2 (execute) → Sequence → (optional) SMF bytes
//! ```
//!
//! 1. **Lexer** ([`lexer`]) — splits source into typed, located logical lines.
//! 2. **Resolver** ([`resolver`]) — substitutes `$name` variable/constant
//!    references before each line is reinterpreted as a command.
//! 3. **Executor** ([`executor`]) — `pass1` discovers functions, chords,
//!    `INSTRUMENTS`/`META` contents, and the top-level line stream without
//!    emitting anything; `pass2` walks that stream, tracking per-channel tick
//!    state ([`channel`]) and option-frame inheritance ([`options`]), and
//!    feeds events to the emitter.
//! 4. **Sequence** ([`sequence`]) — accumulates ordered channel/meta events
//!    into the final tick-sorted `Sequence`.
//! 5. **MIDI writer** ([`midi`]) — an optional, out-of-scope collaborator
//!    that frames a `Sequence` as Standard MIDI File bytes.
//!
//! ## Quick start
//!
//! ```rust
//! use mpl::compile;
//!
//! let source = r#"
//! INSTRUMENTS
//! 0 piano
//! END
//!
//! tempo 120
//! 0 c /4
//! 0 e /4
//! 0 g /2
//! "#;
//!
//! let output = compile(source, "song.mpl")?;
//! assert_eq!(output.sequence.channel_tracks[0].len(), 6);
//! # Ok::<(), mpl::MplError>(())
//! ```
//!
//! ## Public API entry points
//!
//! - [`compile()`] — full compile with the built-in dictionary.
//! - [`compile_with_dictionary()`] — compile with a caller-supplied dictionary.
//! - [`compile_to_midi()`] — compile straight to Standard MIDI File bytes.
//!
//! ## Module structure
//!
//! - [`length`] — tick arithmetic kernel (note-length grammar → integer ticks).
//! - [`dictionary`] — note/percussion/keyword name tables.
//! - [`lexer`] — logical-line splitting and classification.
//! - [`resolver`] — `$name` variable/constant substitution.
//! - [`channel`] — per-channel mutable state (`ChannelState`, `Channels`).
//! - [`options`] — option-list parsing and the option-frame inheritance model.
//! - [`executor`] — the two-pass block engine (`pass1`, `pass2`).
//! - [`sequence`] — the event emitter and the built `Sequence`/`Warning` types.
//! - [`config`] — dictionary override loading.
//! - [`midi`] — Standard MIDI File byte writer.
//! - [`error`] — the closed `MplError` set.

pub mod channel;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod executor;
pub mod length;
pub mod lexer;
pub mod midi;
pub mod options;
pub mod resolver;
pub mod sequence;

pub mod api;

pub use dictionary::Dictionary;
pub use error::{MplError, Warning};
pub use executor::{CompileOutput, Compiler};
pub use sequence::Sequence;

pub use api::{compile, compile_to_midi, compile_with_dictionary};
