//! # Executor / block engine
//!
//! The two-pass driver (spec §2 component 7, ~45% of the core). Grounded
//! on the teacher's two-pass `Parser` in `parser/mod.rs`: a first pass that
//! collects metadata/mod-points/key-changes before any AST is built, and a
//! second pass that parses the music with that context available. This
//! module keeps the same shape — `pass1` discovers structure without
//! emitting anything, `pass2` walks the program and emits — generalized
//! from "parse with context" to "execute with context" since here pass 2
//! has side effects (tick bookkeeping, event emission) instead of building
//! a pure AST.

pub mod pass1;
pub mod pass2;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::debug;

use crate::dictionary::Dictionary;
use crate::error::{MplError, Warning};
use crate::lexer::SourceLoc;
use crate::sequence::Sequence;

pub const DEFAULT_RESOLUTION: u32 = 480;

/// A captured function body: raw, unresolved line text plus location.
/// Re-resolved and re-classified fresh at every `CALL`, rather than once at
/// definition time — see DESIGN.md for why: variables are file-scoped by
/// most-recent-assignment, not captured per function, so the body has to be
/// replayed through whatever resolver state exists at the call site.
#[derive(Debug, Clone, Default)]
pub struct Function {
    pub body: Vec<(String, SourceLoc)>,
}

#[derive(Debug, Clone)]
pub struct InstrumentEntry {
    pub channel: u8,
    pub program: u8,
    pub bank_msb: u8,
    pub bank_lsb: u8,
    pub name: String,
}

/// Everything pass 1 discovers about the program's top-level structure.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub functions: HashMap<String, Function>,
    pub chords: HashMap<String, Vec<i32>>,
    pub instruments: Vec<InstrumentEntry>,
    pub meta_lines: Vec<(String, SourceLoc)>,
    /// Top-level lines to execute in pass 2, in source order. `INSTRUMENTS`
    /// / `META` block bodies and `FUNCTION` bodies are excluded here; they
    /// were captured above.
    pub top_level: Vec<(String, SourceLoc)>,
}

/// The public result of a full compile: the built sequence plus any
/// collected warnings (spec §7's side channel).
#[derive(Debug)]
pub struct CompileOutput {
    pub sequence: Sequence,
    pub warnings: Vec<Warning>,
}

/// Owns the immutable dictionary and the settings that don't change across
/// a compilation. May be constructed many times in parallel (spec §5); the
/// `Arc`-wrapped dictionary means doing so doesn't re-parse the default
/// table per instance.
pub struct Compiler {
    pub dictionary: Arc<Dictionary>,
    pub resolution: u32,
    pub base_path: PathBuf,
}

impl Compiler {
    pub fn new(dictionary: Arc<Dictionary>) -> Self {
        Compiler {
            dictionary,
            resolution: DEFAULT_RESOLUTION,
            base_path: PathBuf::from("inc"),
        }
    }

    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn compile(&self, source: &str, file: &str) -> Result<CompileOutput, MplError> {
        debug!("compiling '{file}' at resolution {}", self.resolution);
        let program = pass1::run(source, file.into(), &self.base_path, &self.dictionary)?;
        pass2::run(&program, &self.dictionary, self.resolution)
    }
}
