//! Majority voting over candidate sets
//!
//! Each whole set is reduced to one signature; the signature seen most often
//! wins and the first set that carried it is returned untouched, so the
//! oracle-authored edit text survives verbatim.

use crate::edit::{self, CandidateSet};

/// Outcome of a vote: the winning set by reference, never a copy.
#[derive(Debug, Clone, Copy)]
pub struct ConsensusResult<'a> {
    pub winner: &'a CandidateSet,
    pub votes: usize,
    pub total: usize,
}

/// Signature of a whole set: the sorted per-edit signatures joined with `|`.
///
/// Sorting makes the signature insensitive to edit order within a set. A set
/// with no edits signs as the empty string.
pub fn set_signature(set: &CandidateSet) -> String {
    let mut sigs: Vec<String> = set.iter().map(edit::normalize).collect();
    sigs.sort();
    sigs.join("|")
}

/// Pick the set whose signature occurs most often across `sets`.
///
/// Ties break to the signature whose first carrier was submitted earliest.
/// Empty signatures are ordinary votes and can win. Returns `None` only for
/// an empty input.
pub fn select(sets: &[CandidateSet]) -> Option<ConsensusResult<'_>> {
    if sets.is_empty() {
        return None;
    }

    let signatures: Vec<String> = sets.iter().map(set_signature).collect();

    let mut best: Option<(usize, usize)> = None;
    for (idx, sig) in signatures.iter().enumerate() {
        // Each signature is considered once, at its earliest index.
        if signatures[..idx].contains(sig) {
            continue;
        }
        let votes = signatures.iter().filter(|s| *s == sig).count();
        match best {
            Some((_, best_votes)) if best_votes >= votes => {}
            _ => best = Some((idx, votes)),
        }
    }

    best.map(|(idx, votes)| ConsensusResult {
        winner: &sets[idx],
        votes,
        total: sets.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::{CandidateEdit, REPLACE_MARKER, SEARCH_MARKER, SEPARATOR_MARKER};

    fn edit(search: &str, replace: &str) -> CandidateEdit {
        CandidateEdit {
            file_path: "app.py".to_string(),
            search_replace: format!(
                "{SEARCH_MARKER}\n{search}\n{SEPARATOR_MARKER}\n{replace}\n{REPLACE_MARKER}"
            ),
        }
    }

    #[test]
    fn test_select_empty_returns_none() {
        assert!(select(&[]).is_none());
    }

    #[test]
    fn test_single_set_wins() {
        let sets = vec![vec![edit("x = 1", "x = 2")]];
        let result = select(&sets).unwrap();

        assert_eq!(result.votes, 1);
        assert_eq!(result.total, 1);
        assert!(std::ptr::eq(result.winner, &sets[0]));
    }

    #[test]
    fn test_majority_beats_minority() {
        let sets = vec![
            vec![edit("x = 1", "x = 2")],
            vec![edit("y = 1", "y = 9")],
            // Formatting variant of the first set: same vote.
            vec![edit("x = 1  # note", "x = 2")],
        ];
        let result = select(&sets).unwrap();

        assert_eq!(result.votes, 2);
        assert_eq!(result.total, 3);
        // The first carrier of the winning signature is returned, verbatim.
        assert!(std::ptr::eq(result.winner, &sets[0]));
    }

    #[test]
    fn test_all_distinct_ties_break_to_first_submitted() {
        let sets = vec![
            vec![edit("a = 1", "a = 2")],
            vec![edit("b = 1", "b = 2")],
            vec![edit("c = 1", "c = 2")],
        ];
        let result = select(&sets).unwrap();

        assert_eq!(result.votes, 1);
        assert!(std::ptr::eq(result.winner, &sets[0]));
    }

    #[test]
    fn test_empty_set_can_win() {
        let sets = vec![
            Vec::new(),
            vec![edit("x = 1", "x = 2")],
            Vec::new(),
        ];
        let result = select(&sets).unwrap();

        assert_eq!(result.votes, 2);
        assert!(result.winner.is_empty());
        assert!(std::ptr::eq(result.winner, &sets[0]));
    }

    #[test]
    fn test_edit_order_within_set_is_ignored() {
        let first = edit("x = 1", "x = 2");
        let second = edit("y = 1", "y = 2");

        let sets = vec![
            vec![first.clone(), second.clone()],
            vec![second, first],
            vec![edit("z = 1", "z = 2")],
        ];
        let result = select(&sets).unwrap();

        assert_eq!(result.votes, 2);
        assert!(std::ptr::eq(result.winner, &sets[0]));
    }

    #[test]
    fn test_set_signature_sorts_edit_signatures() {
        let a = vec![edit("x = 1", "x = 2"), edit("y = 1", "y = 2")];
        let b = vec![edit("y = 1", "y = 2"), edit("x = 1", "x = 2")];

        assert_eq!(set_signature(&a), set_signature(&b));
    }
}
