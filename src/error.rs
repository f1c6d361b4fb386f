//! # Error Types
//!
//! Every error in the closed set from spec §7 carries `file`, 1-based
//! `line`, an optional `column`, and a short message. One `thiserror`-derived
//! enum covers the lexer, the resolver, and the executor alike, the same way
//! the teacher's `GenError` covers lexer/metadata/semantic failures in one
//! enum rather than one error type per module.

use thiserror::Error;

fn loc(file: &str, line: usize, column: &Option<usize>) -> String {
    match column {
        Some(c) => format!("{file}:{line}:{c}"),
        None => format!("{file}:{line}"),
    }
}

#[derive(Error, Debug)]
pub enum MplError {
    /// Raw lexical failure: unterminated continuation, stray character, etc.
    #[error("lex error at {}: {message}", loc(file, *line, column))]
    LexError {
        file: String,
        line: usize,
        column: Option<usize>,
        message: String,
    },

    /// First token of a logical line doesn't match any known command kind.
    #[error("unknown token at {}: {message}", loc(file, *line, column))]
    UnknownToken {
        file: String,
        line: usize,
        column: Option<usize>,
        message: String,
    },

    /// A note-length token doesn't match the length grammar (spec §4.1).
    #[error("bad length at {}: {message}", loc(file, *line, column))]
    BadLength {
        file: String,
        line: usize,
        column: Option<usize>,
        message: String,
    },

    /// An option key is unknown, or repeated where repetition isn't allowed.
    #[error("bad option at {}: {message}", loc(file, *line, column))]
    BadOption {
        file: String,
        line: usize,
        column: Option<usize>,
        message: String,
    },

    /// `$name` referenced but never defined in scope.
    #[error("unknown variable at {}: {message}", loc(file, *line, column))]
    UnknownVar {
        file: String,
        line: usize,
        column: Option<usize>,
        message: String,
    },

    /// A function, chord, or constant was defined more than once.
    #[error("redefinition at {}: {message}", loc(file, *line, column))]
    Redefinition {
        file: String,
        line: usize,
        column: Option<usize>,
        message: String,
    },

    /// A function called itself, directly or transitively.
    #[error("recursive call at {}: {message}", loc(file, *line, column))]
    RecursiveCall {
        file: String,
        line: usize,
        column: Option<usize>,
        message: String,
    },

    /// Unmatched `END` / `}` / an opener still open at EOF.
    #[error("structural mismatch at {}: {message}", loc(file, *line, column))]
    StructuralMismatch {
        file: String,
        line: usize,
        column: Option<usize>,
        message: String,
    },

    /// A construct appeared somewhere it isn't allowed (e.g. `VAR` inside
    /// `INSTRUMENTS`, a global command inside a block).
    #[error("context violation at {}: {message}", loc(file, *line, column))]
    ContextViolation {
        file: String,
        line: usize,
        column: Option<usize>,
        message: String,
    },

    /// A note/percussion/chord name didn't resolve in the dictionary.
    #[error("unknown note at {}: {message}", loc(file, *line, column))]
    UnknownNote {
        file: String,
        line: usize,
        column: Option<usize>,
        message: String,
    },

    /// A channel emitted a note without ever appearing in `INSTRUMENTS`
    /// and isn't the percussion channel.
    #[error("unknown channel use at {}: {message}", loc(file, *line, column))]
    UnknownChannelUse {
        file: String,
        line: usize,
        column: Option<usize>,
        message: String,
    },

    /// A bank MSB/LSB value fell outside 0..127.
    #[error("bank out of range at {}: {message}", loc(file, *line, column))]
    BankOutOfRange {
        file: String,
        line: usize,
        column: Option<usize>,
        message: String,
    },

    /// An `INCLUDE`/`INCLUDEFILE` target couldn't be read.
    #[error("include failure at {}: {message}", loc(file, *line, column))]
    IncludeFailure {
        file: String,
        line: usize,
        column: Option<usize>,
        message: String,
    },

    /// An `INCLUDE` chain formed a cycle.
    #[error("include cycle at {}: {message}", loc(file, *line, column))]
    IncludeCycle {
        file: String,
        line: usize,
        column: Option<usize>,
        message: String,
    },

    /// A source or dictionary-override file doesn't exist.
    #[error("file not found at {}: {message}", loc(file, *line, column))]
    FileNotFound {
        file: String,
        line: usize,
        column: Option<usize>,
        message: String,
    },
}

impl MplError {
    pub fn file(&self) -> &str {
        match self {
            MplError::LexError { file, .. }
            | MplError::UnknownToken { file, .. }
            | MplError::BadLength { file, .. }
            | MplError::BadOption { file, .. }
            | MplError::UnknownVar { file, .. }
            | MplError::Redefinition { file, .. }
            | MplError::RecursiveCall { file, .. }
            | MplError::StructuralMismatch { file, .. }
            | MplError::ContextViolation { file, .. }
            | MplError::UnknownNote { file, .. }
            | MplError::UnknownChannelUse { file, .. }
            | MplError::BankOutOfRange { file, .. }
            | MplError::IncludeFailure { file, .. }
            | MplError::IncludeCycle { file, .. }
            | MplError::FileNotFound { file, .. } => file,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            MplError::LexError { line, .. }
            | MplError::UnknownToken { line, .. }
            | MplError::BadLength { line, .. }
            | MplError::BadOption { line, .. }
            | MplError::UnknownVar { line, .. }
            | MplError::Redefinition { line, .. }
            | MplError::RecursiveCall { line, .. }
            | MplError::StructuralMismatch { line, .. }
            | MplError::ContextViolation { line, .. }
            | MplError::UnknownNote { line, .. }
            | MplError::UnknownChannelUse { line, .. }
            | MplError::BankOutOfRange { line, .. }
            | MplError::IncludeFailure { line, .. }
            | MplError::IncludeCycle { line, .. }
            | MplError::FileNotFound { line, .. } => *line,
        }
    }
}

/// Build a [`MplError`] of the given variant at a source location.
///
/// `mpl_err!(loc, BadLength, "unknown primitive '{}'", c)` saves every call
/// site from repeating `file`/`line`/`column` to satisfy spec §7's
/// requirement that every error carry them.
#[macro_export]
macro_rules! mpl_err {
    ($loc:expr, $variant:ident, $($arg:tt)*) => {
        $crate::error::MplError::$variant {
            file: $loc.file.to_string(),
            line: $loc.line,
            column: $loc.column,
            message: format!($($arg)*),
        }
    };
}

/// A non-fatal advisory collected on the side channel (spec §7), e.g. "rest
/// too small to be represented exactly".
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub file: String,
    pub line: usize,
    pub message: String,
}
