//! Prompt construction for oracle calls

use super::ProblemLocation;

pub const PROBLEM_LOCATIONS_SYSTEM: &str = r#"Identify all locations (global variables, functions, classes, and/or methods) that need inspection or editing to fix the problem below. If you include a class, you do not need to also list its specific methods.

List locations by relevant file. In each file, enumerate each identifier (and its kind) for inspection.

Respond with a JSON object of this shape:
{"locations": [{"file_path": "path/to/file.py", "locations": [{"kind": "variable|function|class|method", "name": "identifier"}]}]}"#;

pub const CANDIDATE_EDITS_SYSTEM: &str = r#"Localize the bug based on the problem description, and then generate a comprehensive set of *SEARCH/REPLACE* edits to fix the issue.

Every *SEARCH/REPLACE* edit must use this format:
1. The start of search block: <<<<<<< SEARCH
2. A contiguous chunk of lines to search for in the existing source code
3. The dividing line: =======
4. The lines to replace into the source code
5. The end of the replace block: >>>>>>> REPLACE

Here is an example:
```python
### mathweb/flask/app.py
<<<<<<< SEARCH
from flask import Flask
=======
import math
from flask import Flask
>>>>>>> REPLACE
```

Every *SEARCH/REPLACE* edit REQUIRES PROPER INDENTATION. If you would like to add the line '        print(x)', you must fully write that out, with all those spaces before the code. Wrap each *SEARCH/REPLACE* edit in a ```python...``` block.

Respond with a JSON object of this shape:
{"edits": [{"file_path": "path/to/file.py", "search_replace": "the full edit block"}]}"#;

pub const FILE_SUMMARY_SYSTEM: &str =
    "You are a helpful assistant that writes 1 sentence summaries of files.";

pub fn relevant_files_system(max_files: usize) -> String {
    format!(
        "Extract the file paths that might be relevant or need to be edited to fix the given \
         problem.\n\nRespond with a JSON object of this shape:\n{{\"file_paths\": \
         [\"path/to/file.py\"]}}\nlisting at most {max_files} full paths in decreasing \
         importance, files to be edited first."
    )
}

pub fn relevant_files_user(problem: &str, structure: &str) -> String {
    format!("Repository structure:\n{structure}\n\nProblem description:\n{problem}")
}

pub fn problem_locations_user(problem: &str, skeleton: &str) -> String {
    format!("Problem description:\n{problem}\n\nSkeleton of relevant files:\n{skeleton}")
}

pub fn candidate_edits_user(
    problem: &str,
    skeleton: &str,
    locations: &[ProblemLocation],
) -> String {
    let mut rendered = String::new();
    for location in locations {
        rendered.push_str(&location.file_path);
        rendered.push_str(":\n");
        for item in &location.locations {
            rendered.push_str(&format!("  - {} {}\n", item.kind, item.name));
        }
    }
    format!(
        "Problem description:\n{problem}\n\nSkeleton of relevant files:\n{skeleton}\n\n\
         Potential problem locations:\n{rendered}"
    )
}

pub fn file_summary_user(path: &str, content: &str) -> String {
    format!("File: {path}\n\nSummarize this file in 1 sentence: {content}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{CodeLocation, LocationKind};

    #[test]
    fn test_relevant_files_system_states_cap() {
        assert!(relevant_files_system(5).contains("at most 5"));
    }

    #[test]
    fn test_candidate_edits_user_lists_locations() {
        let locations = vec![ProblemLocation {
            file_path: "app.py".to_string(),
            locations: vec![
                CodeLocation {
                    kind: LocationKind::Function,
                    name: "compute".to_string(),
                },
                CodeLocation {
                    kind: LocationKind::Class,
                    name: "Config".to_string(),
                },
            ],
        }];

        let prompt = candidate_edits_user("it crashes", "<files></files>", &locations);
        assert!(prompt.contains("app.py:"));
        assert!(prompt.contains("  - function compute"));
        assert!(prompt.contains("  - class Config"));
        assert!(prompt.contains("it crashes"));
    }
}
