//! Task loading
//!
//! Tasks arrive as a JSONL file, one `{"problem": .., "env": ..}` object per
//! line. Environments name subdirectories of the envs dir.

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One repair task: a natural-language problem against a named environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub problem: String,
    pub env: String,
}

/// Load tasks from a JSONL file.
///
/// Blank lines are skipped. Invalid lines are logged and skipped so one bad
/// row never aborts the batch; a missing file is an error.
pub fn load_tasks(path: &Path) -> Result<Vec<Task>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read tasks file {}", path.display()))?;

    let mut tasks = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Task>(line) {
            Ok(task) => tasks.push(task),
            Err(err) => warn!("Skipping invalid task on line {}: {}", idx + 1, err),
        }
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_tasks_skips_invalid_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.jsonl");
        fs::write(
            &path,
            concat!(
                "{\"problem\": \"fix the crash\", \"env\": \"proj-a\"}\n",
                "\n",
                "not json at all\n",
                "{\"problem\": \"remove dead code\", \"env\": \"proj-b\"}\n",
            ),
        )
        .unwrap();

        let tasks = load_tasks(&path).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].problem, "fix the crash");
        assert_eq!(tasks[0].env, "proj-a");
        assert_eq!(tasks[1].env, "proj-b");
    }

    #[test]
    fn test_load_tasks_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.jsonl");
        assert!(load_tasks(&missing).is_err());
    }
}
