//! Candidate edits and their voting signatures
//!
//! An edit arrives as a literal search/replace fragment. For consensus
//! voting each edit is reduced to a canonical signature that ignores
//! comments and whitespace runs, so formatting-only variants of the same
//! change count as the same vote. The comment stripping is Python-specific
//! on purpose.

use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const SEARCH_MARKER: &str = "<<<<<<< SEARCH";
pub const SEPARATOR_MARKER: &str = "=======";
pub const REPLACE_MARKER: &str = ">>>>>>> REPLACE";

/// One proposed change: a target file plus a literal search/replace fragment.
///
/// The fragment text is preserved verbatim from the oracle; only signatures
/// are derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateEdit {
    pub file_path: String,
    pub search_replace: String,
}

/// The ordered edits produced by one generation attempt.
pub type CandidateSet = Vec<CandidateEdit>;

fn search_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"(?s){SEARCH_MARKER}\n(.*?)\n{SEPARATOR_MARKER}\n"))
            .expect("valid regex")
    })
}

fn replace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"(?s){SEPARATOR_MARKER}\n(.*?)\n{REPLACE_MARKER}"))
            .expect("valid regex")
    })
}

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)#.*$").expect("valid regex"))
}

fn blank_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").expect("valid regex"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Split an edit fragment into its search and replace blocks.
///
/// Returns `None` unless all three markers appear in order, each on its own
/// line.
pub fn extract_search_replace(fragment: &str) -> Option<(String, String)> {
    let search = search_re().captures(fragment)?.get(1)?.as_str().to_string();
    let replace = replace_re().captures(fragment)?.get(1)?.as_str().to_string();
    Some((search, replace))
}

/// Strip `#` comments, drop blank lines, and squeeze all remaining
/// whitespace runs (newlines included) to single spaces.
pub fn strip_comments_and_whitespace(code: &str) -> String {
    let code = comment_re().replace_all(code, "");
    let code = blank_run_re().replace_all(&code, "\n");
    let code = whitespace_re().replace_all(&code, " ");
    code.trim().to_string()
}

/// Produce the voting signature for one edit.
///
/// Well-formed fragments normalize to `SEARCH:<search>|REPLACE:<replace>`
/// over the squeezed block texts. A fragment with missing or out-of-order
/// markers falls back to its raw trimmed text so the candidate still
/// participates in voting instead of being dropped.
pub fn normalize(edit: &CandidateEdit) -> String {
    match extract_search_replace(&edit.search_replace) {
        Some((search, replace)) => format!(
            "SEARCH:{}|REPLACE:{}",
            strip_comments_and_whitespace(&search),
            strip_comments_and_whitespace(&replace),
        ),
        None => {
            warn!(
                "malformed search/replace fragment for {}, voting on raw text",
                edit.file_path
            );
            edit.search_replace.trim().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(search: &str, replace: &str) -> String {
        format!("{SEARCH_MARKER}\n{search}\n{SEPARATOR_MARKER}\n{replace}\n{REPLACE_MARKER}")
    }

    fn edit(search: &str, replace: &str) -> CandidateEdit {
        CandidateEdit {
            file_path: "app.py".to_string(),
            search_replace: fragment(search, replace),
        }
    }

    #[test]
    fn test_extract_search_replace_blocks() {
        let text = fragment("def f():\n    return 1", "def f():\n    return 2");
        let (search, replace) = extract_search_replace(&text).unwrap();

        assert_eq!(search, "def f():\n    return 1");
        assert_eq!(replace, "def f():\n    return 2");
    }

    #[test]
    fn test_extract_allows_empty_blocks() {
        let (search, replace) = extract_search_replace(&fragment("", "")).unwrap();
        assert_eq!(search, "");
        assert_eq!(replace, "");
    }

    #[test]
    fn test_signature_ignores_comments_and_whitespace() {
        let a = edit("x = 1  # old value\n\n\ny = 2", "x = 3");
        let b = edit("x = 1\ny = 2", "x = 3  # bumped");

        assert_eq!(normalize(&a), normalize(&b));
    }

    #[test]
    fn test_signature_distinguishes_different_replacements() {
        let a = edit("x = 1", "x = 2");
        let b = edit("x = 1", "x = 3");

        assert_ne!(normalize(&a), normalize(&b));
    }

    #[test]
    fn test_signature_squeezes_interior_newlines() {
        let e = edit("import os\nimport sys", "import sys");
        assert_eq!(
            normalize(&e),
            "SEARCH:import os import sys|REPLACE:import sys"
        );
    }

    #[test]
    fn test_missing_separator_falls_back_to_raw() {
        let e = CandidateEdit {
            file_path: "app.py".to_string(),
            search_replace: format!("{SEARCH_MARKER}\nx = 1\n{REPLACE_MARKER}\n"),
        };

        assert_eq!(
            normalize(&e),
            format!("{SEARCH_MARKER}\nx = 1\n{REPLACE_MARKER}")
        );
    }

    #[test]
    fn test_out_of_order_markers_fall_back_to_raw() {
        let e = CandidateEdit {
            file_path: "app.py".to_string(),
            search_replace: format!(
                "{REPLACE_MARKER}\nnew\n{SEPARATOR_MARKER}\nold\n{SEARCH_MARKER}"
            ),
        };

        let sig = normalize(&e);
        assert!(sig.starts_with(REPLACE_MARKER));
        assert!(!sig.starts_with("SEARCH:"));
    }

    #[test]
    fn test_strip_comments_and_whitespace() {
        let code = "# leading comment\nx = 1   # trailing\n\n\n   y  =  2\n";
        assert_eq!(strip_comments_and_whitespace(code), "x = 1 y = 2");
    }
}
