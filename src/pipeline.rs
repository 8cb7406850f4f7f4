//! Pipeline orchestrator
//!
//! Runs one repair task end to end: repository structure, relevant-file
//! selection, skeleton, problem locations, sampled candidate generation,
//! consensus vote, presentation. The oracle is injected so every stage is
//! testable without network access.

use crate::consensus;
use crate::directory::RepoMap;
use crate::edit::{CandidateSet, REPLACE_MARKER, SEARCH_MARKER, SEPARATOR_MARKER};
use crate::oracle::Oracle;
use anyhow::Result;
use futures::{stream, StreamExt};
use log::{debug, info, warn};
use std::path::Path;

/// Candidate sets requested per task unless overridden on the CLI.
pub const N_SAMPLES: usize = 8;

/// Upper bound on in-flight candidate-generation calls.
pub const MAX_CONCURRENT_SAMPLES: usize = 16;

/// The oracle is asked for at most this many relevant files, and any excess
/// in its reply is dropped.
pub const MAX_RELEVANT_FILES: usize = 5;

/// Outcome of one task run.
#[derive(Debug)]
pub struct RunReport {
    /// Paths the oracle selected, in decreasing importance, truncated.
    pub relevant_files: Vec<String>,
    /// Winning candidate set; None when no sample succeeded.
    pub winner: Option<CandidateSet>,
    /// Votes the winner received.
    pub votes: usize,
    /// Candidate sets that entered the vote.
    pub total_sets: usize,
    /// Human-readable rendering of the winner.
    pub rendered: String,
}

/// Run one repair task against the repository at `repo_root`.
pub async fn run_task<O: Oracle>(
    oracle: &O,
    repo_root: &Path,
    problem: &str,
    n_samples: usize,
) -> Result<RunReport> {
    let map = RepoMap::new(repo_root);
    let structure = map.structure(oracle).await?;

    let mut relevant = oracle.relevant_files(problem, &structure).await?;
    relevant.truncate(MAX_RELEVANT_FILES);
    info!("Relevant files: {:?}", relevant);

    let skeleton = map.skeleton(&relevant);

    let locations = oracle.problem_locations(problem, &skeleton).await?;
    info!("Identified {} potential problem locations", locations.len());

    // Identical inputs per sample; diversity comes from sampling temperature.
    // Buffered streams yield in submission order, which keeps the consensus
    // tie-break deterministic across runs.
    let mut samples: Vec<CandidateSet> = Vec::new();
    let mut generations = stream::iter(
        (0..n_samples).map(|_| oracle.candidate_edits(problem, &skeleton, &locations)),
    )
    .buffered(MAX_CONCURRENT_SAMPLES);

    while let Some(result) = generations.next().await {
        match result {
            Ok(set) => {
                debug!("Sample produced {} edits", set.len());
                samples.push(set);
            }
            Err(err) => warn!("Failed to generate sample: {:#}", err),
        }
    }
    info!("Collected {}/{} candidate sets", samples.len(), n_samples);

    let result = consensus::select(&samples);
    if let Some(consensus) = &result {
        info!(
            "Winning set: {} of {} votes, {} edits",
            consensus.votes,
            consensus.total,
            consensus.winner.len()
        );
    }

    let winner_ref = result.as_ref().map(|r| r.winner);
    let (votes, total_sets) = result
        .as_ref()
        .map(|r| (r.votes, r.total))
        .unwrap_or((0, 0));
    let rendered = render_report(winner_ref);

    Ok(RunReport {
        relevant_files: relevant,
        winner: winner_ref.cloned(),
        votes,
        total_sets,
        rendered,
    })
}

/// Render the winning candidate set for display.
///
/// An absent or empty winner renders as an explicit "no edits" line rather
/// than an empty document.
pub fn render_report(winner: Option<&CandidateSet>) -> String {
    let mut out = String::new();
    out.push_str("\n=== Top Ranked Sample ===\n");
    match winner {
        Some(edits) if !edits.is_empty() => {
            for (i, edit) in edits.iter().enumerate() {
                out.push_str(&format!("\nEdit {}:\n", i + 1));
                out.push_str(&format!("File: {}\n", edit.file_path));
                out.push_str("Edit:\n");
                render_edit_fragment(&mut out, &edit.search_replace);
                out.push_str(&"-".repeat(50));
                out.push('\n');
            }
        }
        _ => out.push_str("No edits were found after reranking.\n"),
    }
    out
}

/// Pretty-print one search/replace fragment.
///
/// Markdown fences toggle a code-block state and are dropped; `###` headers
/// and search/replace marker lines always print (headers and the opening
/// marker get a separating blank line); code-block lines are indented; prose
/// outside code blocks is dropped.
fn render_edit_fragment(out: &mut String, fragment: &str) {
    let mut in_code_block = false;
    for line in fragment.split('\n') {
        if line.starts_with("```") {
            in_code_block = !in_code_block;
            continue;
        }
        if line.starts_with("###") {
            out.push('\n');
            out.push_str(line);
            out.push('\n');
            continue;
        }
        if line.contains(SEARCH_MARKER) {
            out.push('\n');
            out.push_str(line);
            out.push('\n');
            continue;
        }
        if line.contains(SEPARATOR_MARKER) || line.contains(REPLACE_MARKER) {
            out.push_str(line);
            out.push('\n');
            continue;
        }
        if in_code_block {
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::CandidateEdit;
    use crate::oracle::{CodeLocation, LocationKind, ProblemLocation};
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::Mutex;

    struct ScriptedOracle {
        files: Vec<String>,
        locations: Vec<ProblemLocation>,
        edits: Mutex<VecDeque<Result<CandidateSet>>>,
    }

    impl ScriptedOracle {
        fn new(
            files: Vec<&str>,
            locations: Vec<ProblemLocation>,
            edits: Vec<Result<CandidateSet>>,
        ) -> Self {
            Self {
                files: files.into_iter().map(String::from).collect(),
                locations,
                edits: Mutex::new(edits.into()),
            }
        }
    }

    impl Oracle for ScriptedOracle {
        async fn relevant_files(&self, _problem: &str, _structure: &str) -> Result<Vec<String>> {
            Ok(self.files.clone())
        }

        async fn problem_locations(
            &self,
            _problem: &str,
            _skeleton: &str,
        ) -> Result<Vec<ProblemLocation>> {
            Ok(self.locations.clone())
        }

        async fn candidate_edits(
            &self,
            _problem: &str,
            _skeleton: &str,
            _locations: &[ProblemLocation],
        ) -> Result<CandidateSet> {
            let mut edits = self.edits.lock().unwrap();
            edits
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no more scripted samples")))
        }

        async fn file_summary(&self, _path: &str, _content: &str) -> Result<String> {
            Ok("A test file.".to_string())
        }
    }

    fn edit(file: &str, search: &str, replace: &str) -> CandidateEdit {
        CandidateEdit {
            file_path: file.to_string(),
            search_replace: format!(
                "{SEARCH_MARKER}\n{search}\n{SEPARATOR_MARKER}\n{replace}\n{REPLACE_MARKER}"
            ),
        }
    }

    fn app_locations() -> Vec<ProblemLocation> {
        vec![ProblemLocation {
            file_path: "app.py".to_string(),
            locations: vec![CodeLocation {
                kind: LocationKind::Function,
                name: "f".to_string(),
            }],
        }]
    }

    #[tokio::test]
    async fn test_run_task_selects_majority_sample() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("app.py"), "def f():\n    return 1\n").unwrap();

        // Two samples agree modulo whitespace, the third differs.
        let agree_a = vec![edit("app.py", "return 1", "return 2")];
        let agree_b = vec![edit("app.py", "return   1", "return   2")];
        let outlier = vec![edit("app.py", "return 1", "return 3")];
        let oracle = ScriptedOracle::new(
            vec!["app.py"],
            app_locations(),
            vec![Ok(agree_a), Ok(outlier), Ok(agree_b)],
        );

        let report = run_task(&oracle, root.path(), "make f return 2", 3)
            .await
            .unwrap();

        assert_eq!(report.votes, 2);
        assert_eq!(report.total_sets, 3);
        let winner = report.winner.unwrap();
        assert_eq!(winner.len(), 1);
        // The majority signature won, not the outlier.
        assert_eq!(
            consensus::set_signature(&winner),
            consensus::set_signature(&vec![edit("app.py", "return 1", "return 2")])
        );
        assert!(report.rendered.contains("=== Top Ranked Sample ==="));
        assert!(report.rendered.contains("File: app.py"));
    }

    #[tokio::test]
    async fn test_run_task_tolerates_failed_samples() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("app.py"), "x = 1\n").unwrap();

        let only = vec![edit("app.py", "x = 1", "x = 2")];
        let oracle = ScriptedOracle::new(
            vec!["app.py"],
            app_locations(),
            vec![
                Err(anyhow::anyhow!("model hiccup")),
                Ok(only),
                Err(anyhow::anyhow!("model hiccup")),
            ],
        );

        let report = run_task(&oracle, root.path(), "bump x", 3).await.unwrap();
        assert_eq!(report.votes, 1);
        assert_eq!(report.total_sets, 1);
        assert!(report.winner.is_some());
    }

    #[tokio::test]
    async fn test_run_task_with_no_successful_samples_is_not_an_error() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("app.py"), "x = 1\n").unwrap();

        let oracle = ScriptedOracle::new(
            vec!["app.py"],
            app_locations(),
            vec![
                Err(anyhow::anyhow!("model hiccup")),
                Err(anyhow::anyhow!("model hiccup")),
            ],
        );

        let report = run_task(&oracle, root.path(), "bump x", 2).await.unwrap();
        assert!(report.winner.is_none());
        assert_eq!(report.total_sets, 0);
        assert!(report
            .rendered
            .contains("No edits were found after reranking."));
    }

    #[tokio::test]
    async fn test_run_task_truncates_relevant_files() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("app.py"), "x = 1\n").unwrap();

        let oracle = ScriptedOracle::new(
            vec!["a.py", "b.py", "c.py", "d.py", "e.py", "f.py", "g.py"],
            app_locations(),
            vec![Ok(vec![])],
        );

        let report = run_task(&oracle, root.path(), "tidy up", 1).await.unwrap();
        assert_eq!(report.relevant_files.len(), MAX_RELEVANT_FILES);
        assert_eq!(report.relevant_files[0], "a.py");
    }

    #[test]
    fn test_render_report_fence_aware() {
        let winner = vec![CandidateEdit {
            file_path: "app.py".to_string(),
            search_replace: concat!(
                "```python\n",
                "### app.py\n",
                "<<<<<<< SEARCH\n",
                "old\n",
                "=======\n",
                "new\n",
                ">>>>>>> REPLACE\n",
                "```",
            )
            .to_string(),
        }];

        let rendered = render_report(Some(&winner));
        let expected = concat!(
            "\n=== Top Ranked Sample ===\n",
            "\nEdit 1:\n",
            "File: app.py\n",
            "Edit:\n",
            "\n### app.py\n",
            "\n<<<<<<< SEARCH\n",
            "  old\n",
            "=======\n",
            "  new\n",
            ">>>>>>> REPLACE\n",
            "--------------------------------------------------\n",
        );
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_render_report_drops_prose_outside_fences() {
        let winner = vec![CandidateEdit {
            file_path: "app.py".to_string(),
            search_replace: concat!(
                "Here is the fix you asked for:\n",
                "```python\n",
                "x = 2\n",
                "```\n",
                "Let me know if it works.",
            )
            .to_string(),
        }];

        let rendered = render_report(Some(&winner));
        assert!(rendered.contains("  x = 2\n"));
        assert!(!rendered.contains("Here is the fix"));
        assert!(!rendered.contains("Let me know"));
    }

    #[test]
    fn test_render_report_empty_winner() {
        let empty: CandidateSet = Vec::new();
        let rendered = render_report(Some(&empty));
        assert!(rendered.contains("No edits were found after reranking."));
        assert_eq!(
            render_report(None),
            "\n=== Top Ranked Sample ===\nNo edits were found after reranking.\n"
        );
    }
}
