//! # Variable / constant resolver
//!
//! A single textual pass over each logical line that replaces `$name`
//! occurrences before the line is reinterpreted as a command (spec §4.3).
//! Grounded on the teacher's metadata-then-reparse shape in
//! `parser/mod.rs` (resolve the YAML frontmatter once, then hand the
//! expanded text back through ordinary parsing) — generalized here from a
//! one-shot metadata block to every logical line, since MPL substitution
//! can touch any command.

use std::collections::HashMap;

use crate::error::MplError;
use crate::lexer::SourceLoc;
use crate::mpl_err;

/// Constants are global once defined and immutable; variables are
/// file-scoped and may be reassigned, with the most recent assignment at
/// the lexical point of use winning (spec §3).
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    constants: HashMap<String, String>,
    variables: HashMap<String, String>,
}

impl Resolver {
    pub fn new() -> Self {
        Resolver::default()
    }

    pub fn define_const(&mut self, name: &str, value: &str, loc: &SourceLoc) -> Result<(), MplError> {
        if self.constants.contains_key(name) {
            return Err(mpl_err!(
                loc,
                Redefinition,
                "constant '${}' is already defined",
                name
            ));
        }
        self.constants.insert(name.to_string(), value.to_string());
        Ok(())
    }

    /// Variables may be assigned any number of times; each assignment
    /// simply overwrites the current value for lookups from this point on.
    pub fn assign_var(&mut self, name: &str, value: &str) {
        self.variables.insert(name.to_string(), value.to_string());
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        // Constants win over variables whenever the name was declared
        // CONST, per spec §4.3; checking the constants map first gives
        // exactly that precedence without needing a separate "was this
        // name declared CONST" flag.
        self.constants
            .get(name)
            .or_else(|| self.variables.get(name))
            .map(String::as_str)
    }

    /// Replaces every `$name` occurrence in `line` with its resolved value.
    /// An unresolved `$name` is a [`MplError::UnknownVar`].
    pub fn resolve_line(&self, line: &str, loc: &SourceLoc) -> Result<String, MplError> {
        let mut out = String::with_capacity(line.len());
        let mut chars = line.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            let name_start = i + 1;
            let mut name_end = name_start;
            while let Some(&(j, nc)) = chars.peek() {
                if nc.is_ascii_alphanumeric() || nc == '_' {
                    name_end = j + nc.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let name = &line[name_start..name_end];
            if name.is_empty() {
                return Err(mpl_err!(loc, UnknownVar, "bare '$' with no variable name"));
            }
            match self.lookup(name) {
                Some(value) => out.push_str(value),
                None => {
                    return Err(mpl_err!(
                        loc,
                        UnknownVar,
                        "unresolved variable '${}'",
                        name
                    ))
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLoc {
        SourceLoc::synthetic()
    }

    #[test]
    fn substitutes_variable() {
        let mut r = Resolver::new();
        r.assign_var("len", "/4");
        assert_eq!(r.resolve_line("0 c $len", &loc()).unwrap(), "0 c /4");
    }

    #[test]
    fn most_recent_assignment_wins() {
        let mut r = Resolver::new();
        r.assign_var("len", "/4");
        r.assign_var("len", "/2");
        assert_eq!(r.resolve_line("0 c $len", &loc()).unwrap(), "0 c /2");
    }

    #[test]
    fn constants_are_immutable_and_take_precedence() {
        let mut r = Resolver::new();
        r.define_const("tonic", "c", &loc()).unwrap();
        r.assign_var("tonic", "d");
        assert_eq!(r.resolve_line("0 $tonic /4", &loc()).unwrap(), "0 c /4");
        assert!(r.define_const("tonic", "e", &loc()).is_err());
    }

    #[test]
    fn unresolved_variable_is_an_error() {
        let r = Resolver::new();
        assert!(matches!(
            r.resolve_line("0 $missing /4", &loc()),
            Err(MplError::UnknownVar { .. })
        ));
    }

    #[test]
    fn multiple_substitutions_in_one_line() {
        let mut r = Resolver::new();
        r.assign_var("note", "c");
        r.assign_var("len", "/4");
        assert_eq!(r.resolve_line("0 $note $len", &loc()).unwrap(), "0 c /4");
    }
}
