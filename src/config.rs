//! # Dictionary configuration loading
//!
//! Loads the note/percussion/keyword dictionary (component 2) from the
//! embedded default and, optionally, a user-supplied override file merged on
//! top. Grounded on `gen-compiler/src/parser/mod.rs`'s "resolve an embedded
//! default, allow a user override" shape for the YAML frontmatter it parses
//! — generalized here to a flat key=value table instead of nested YAML,
//! since MPL's dictionary has no nested structure to model. No new crate:
//! I/O failures are reported through the same `MplError` enum used
//! everywhere else, per spec's closed error set.

use std::path::Path;

use crate::dictionary::Dictionary;
use crate::error::MplError;
use crate::lexer::SourceLoc;
use crate::mpl_err;

impl Dictionary {
    /// Loads the built-in default table and merges `path`'s entries over it,
    /// `path`'s entries winning ties. `path` not existing or being malformed
    /// is reported as [`MplError::FileNotFound`].
    pub fn with_overrides(path: impl AsRef<Path>) -> Result<Dictionary, MplError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            mpl_err!(
                &SourceLoc::new(path.to_string_lossy().into_owned().into(), 0, None),
                FileNotFound,
                "could not read dictionary override file '{}': {}",
                path.display(),
                e
            )
        })?;
        let loc = SourceLoc::new(path.to_string_lossy().into_owned().into(), 1, None);
        let overrides = Dictionary::parse(&text, &loc)?;
        Ok(Dictionary::default().merged_with(&overrides))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::Resolved;

    #[test]
    fn missing_override_file_is_file_not_found() {
        let err = Dictionary::with_overrides("/nonexistent/path/to/dict.txt").unwrap_err();
        assert!(matches!(err, MplError::FileNotFound { .. }));
    }

    #[test]
    fn overrides_merge_over_builtin_defaults() {
        let dir = std::env::temp_dir().join(format!("mpl-dict-test-{}", std::process::id()));
        std::fs::write(&dir, "note.c=1\n").unwrap();
        let dict = Dictionary::with_overrides(&dir).unwrap();
        std::fs::remove_file(&dir).ok();
        assert_eq!(
            dict.resolve("c", 0, &SourceLoc::synthetic()).unwrap(),
            Resolved::Note(61)
        );
    }
}
