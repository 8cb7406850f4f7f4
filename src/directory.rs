//! Repository map
//!
//! Walks a repository into a `<directory>` structure document with a
//! one-sentence oracle description per file, and renders skeletons for
//! selected files. Descriptions are cached in `.codemend/` keyed by
//! content hash.

use crate::cache::{Cache, DescriptionCache};
use crate::oracle::Oracle;
use crate::skeleton::{self, escape_xml};
use crate::util;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Paths that are never listed or summarized
const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "__pycache__",
    "scratch",
    ".git",
    ".codemend",
    "*.pyc",
    "*.pyo",
    "*.pyd",
    ".DS_Store",
];

/// A repository root plus its effective ignore patterns.
pub struct RepoMap {
    root: PathBuf,
    ignore_patterns: HashSet<String>,
}

impl RepoMap {
    /// Create a map for `root`, folding in `.gitignore` patterns when present.
    pub fn new(root: &Path) -> Self {
        let mut ignore_patterns: HashSet<String> = DEFAULT_IGNORE_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .collect();

        let gitignore = root.join(".gitignore");
        if let Ok(content) = fs::read_to_string(&gitignore) {
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                ignore_patterns.insert(line.trim_matches('/').to_string());
            }
        }

        Self {
            root: root.to_path_buf(),
            ignore_patterns,
        }
    }

    /// Check a repo-relative path against the ignore patterns.
    ///
    /// Patterns containing `*` match by suffix (wildcard stripped), all
    /// others by substring.
    fn is_ignored(&self, rel_path: &str) -> bool {
        self.ignore_patterns.iter().any(|pattern| {
            if pattern.contains('*') {
                let suffix = pattern.replace('*', "");
                rel_path.ends_with(&suffix)
            } else {
                rel_path.contains(pattern.as_str())
            }
        })
    }

    fn rel_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Build the `<directory>` structure document.
    ///
    /// Files are listed before subfolders at every level, two-space indent
    /// per level. Each file carries an oracle-written description, served
    /// from the description cache when the file is unchanged.
    pub async fn structure<O: Oracle>(&self, oracle: &O) -> Result<String> {
        info!("Scanning repository structure: {}", self.root.display());

        let cache = Cache::new(&self.root);
        let mut descriptions = cache.load_descriptions().unwrap_or_default();
        let mut dirty = false;

        let mut lines = vec!["<directory>".to_string()];
        let mut open_dirs: Vec<String> = Vec::new();

        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by(|a, b| {
                a.file_type()
                    .is_dir()
                    .cmp(&b.file_type().is_dir())
                    .then_with(|| a.file_name().cmp(b.file_name()))
            })
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !self.is_ignored(&self.rel_path(entry.path()))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry: {}", err);
                    continue;
                }
            };

            let depth = entry.depth();
            while open_dirs.len() >= depth {
                open_dirs.pop();
                lines.push(format!("{}</folder>", "  ".repeat(open_dirs.len() + 1)));
            }

            let indent = "  ".repeat(depth);
            let name = entry.file_name().to_string_lossy().to_string();

            if entry.file_type().is_dir() {
                lines.push(format!("{}<folder name=\"{}\">", indent, escape_xml(&name)));
                open_dirs.push(name);
            } else if entry.file_type().is_file() {
                let rel = self.rel_path(entry.path());
                let description = self
                    .describe_file(oracle, entry.path(), &rel, &mut descriptions, &mut dirty)
                    .await?;
                lines.push(format!(
                    "{}<file name=\"{}\" description=\"{}\" />",
                    indent,
                    escape_xml(&name),
                    escape_xml(&description)
                ));
            }
        }

        while open_dirs.pop().is_some() {
            lines.push(format!("{}</folder>", "  ".repeat(open_dirs.len() + 1)));
        }
        lines.push("</directory>".to_string());

        if dirty {
            if let Err(err) = cache.save_descriptions(&descriptions) {
                warn!("Failed to save description cache: {:#}", err);
            }
        }

        Ok(lines.join("\n"))
    }

    async fn describe_file<O: Oracle>(
        &self,
        oracle: &O,
        path: &Path,
        rel: &str,
        descriptions: &mut DescriptionCache,
        dirty: &mut bool,
    ) -> Result<String> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Failed to read {}: {}", rel, err);
                Vec::new()
            }
        };
        let hash = util::hash_bytes(&bytes);

        if let Some(cached) = descriptions.get(Path::new(rel), &hash) {
            debug!("Description cache hit for {}", rel);
            return Ok(cached.to_string());
        }

        // Undecodable content is summarized from the path alone.
        let content = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => {
                warn!("Non-UTF-8 content in {}, summarizing without it", rel);
                String::new()
            }
        };

        let description = oracle.file_summary(rel, &content).await?;
        descriptions.set_description(PathBuf::from(rel), description.clone(), hash);
        *dirty = true;
        Ok(description)
    }

    /// Render the skeleton document for the given repo-relative paths.
    ///
    /// Paths come back from the oracle, so they are resolved with traversal
    /// guards; any unresolvable or unreadable path is flagged inline rather
    /// than dropped.
    pub fn skeleton(&self, paths: &[String]) -> String {
        skeleton::render(paths, |path| {
            let full = util::resolve_repo_path(&self.root, path)?;
            fs::read_to_string(&full)
                .with_context(|| format!("Failed to read {}", full.display()))
        })
    }
}
