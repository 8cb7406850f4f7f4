//! Cache module for codemend
//!
//! Persists oracle-generated file descriptions to the .codemend/ directory
//! so repeated runs against the same repository skip redundant LLM calls.
//!
//! Cache operations are best-effort. Callers typically use
//! `let _ = cache.save_descriptions(..)` because a cache failure is
//! recoverable (descriptions are regenerated next run) and should never
//! interrupt a repair run.

use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration as StdDuration, Instant};

const CACHE_DIR: &str = ".codemend";
const DESCRIPTIONS_CACHE_FILE: &str = "descriptions.json";
const CACHE_LOCK_TIMEOUT_SECS: u64 = 5;
const CACHE_LOCK_RETRY_MS: u64 = 50;

/// Descriptions older than this are regenerated even if the file is unchanged.
const DESCRIPTION_CACHE_DAYS: i64 = 30;

/// A single oracle-generated description with a hash for change detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptionEntry {
    /// The one-sentence file description
    pub description: String,
    /// Hash of file content for change detection
    pub file_hash: String,
    /// When this description was generated
    pub generated_at: DateTime<Utc>,
}

/// Cached oracle-generated file descriptions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptionCache {
    /// Map of repo-relative file paths to their description entries
    pub entries: HashMap<PathBuf, DescriptionEntry>,
    /// When the cache was last updated
    pub cached_at: DateTime<Utc>,
}

impl DescriptionCache {
    /// Create a new empty cache
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            cached_at: Utc::now(),
        }
    }

    /// Check if a file's description is still valid (not changed and not too old)
    pub fn is_file_valid(&self, path: &Path, current_hash: &str) -> bool {
        if let Some(entry) = self.entries.get(path) {
            if entry.file_hash != current_hash {
                return false;
            }
            let age = Utc::now() - entry.generated_at;
            age < Duration::days(DESCRIPTION_CACHE_DAYS)
        } else {
            false
        }
    }

    /// Get the description for a file if still valid
    pub fn get(&self, path: &Path, current_hash: &str) -> Option<&str> {
        if !self.is_file_valid(path, current_hash) {
            return None;
        }
        self.entries.get(path).map(|e| e.description.as_str())
    }

    /// Update or insert a description
    pub fn set_description(&mut self, path: PathBuf, description: String, file_hash: String) {
        self.entries.insert(
            path,
            DescriptionEntry {
                description,
                file_hash,
                generated_at: Utc::now(),
            },
        );
        self.cached_at = Utc::now();
    }
}

impl Default for DescriptionCache {
    fn default() -> Self {
        Self::new()
    }
}

/// The cache manager
pub struct Cache {
    cache_dir: PathBuf,
}

struct CacheLock {
    file: std::fs::File,
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl Cache {
    /// Create a new cache manager for a repository
    pub fn new(repo_root: &Path) -> Self {
        let cache_dir = repo_root.join(CACHE_DIR);
        Self { cache_dir }
    }

    /// Ensure the cache directory exists
    fn ensure_dir(&self) -> anyhow::Result<()> {
        if !self.cache_dir.exists() {
            fs::create_dir_all(&self.cache_dir)?;
        }
        self.ensure_cache_ignored()?;
        Ok(())
    }

    fn ensure_cache_ignored(&self) -> anyhow::Result<()> {
        let Some(repo_root) = self.cache_dir.parent() else {
            return Ok(());
        };

        let gitignore_path = repo_root.join(".gitignore");
        if gitignore_path.exists() {
            append_ignore_entry(&gitignore_path, ".codemend/")?;
            return Ok(());
        }

        let git_dir = repo_root.join(".git");
        if git_dir.is_dir() {
            let info_exclude_path = git_dir.join("info").join("exclude");
            if let Some(parent) = info_exclude_path.parent() {
                if fs::create_dir_all(parent).is_ok()
                    && append_ignore_entry(&info_exclude_path, ".codemend/").is_ok()
                {
                    return Ok(());
                }
            }
        }

        append_ignore_entry(&gitignore_path, ".codemend/")?;
        Ok(())
    }

    fn lock(&self, exclusive: bool) -> anyhow::Result<CacheLock> {
        if exclusive {
            self.ensure_dir()?;
        } else if !self.cache_dir.exists() {
            return Err(anyhow::anyhow!("Cache directory missing"));
        }

        let lock_path = self.cache_dir.join(".lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false) // Lock file content doesn't matter, just the lock
            .open(&lock_path)?;

        let start = Instant::now();
        loop {
            let result = if exclusive {
                FileExt::try_lock_exclusive(&file)
            } else {
                FileExt::try_lock_shared(&file)
            };
            match result {
                Ok(()) => break,
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(err.into());
                    }
                    if start.elapsed() >= StdDuration::from_secs(CACHE_LOCK_TIMEOUT_SECS) {
                        return Err(anyhow::anyhow!(
                            "Timed out waiting for cache lock ({}s)",
                            CACHE_LOCK_TIMEOUT_SECS
                        ));
                    }
                    std::thread::sleep(StdDuration::from_millis(CACHE_LOCK_RETRY_MS));
                }
            }
        }

        Ok(CacheLock { file })
    }

    /// Load the descriptions cache
    pub fn load_descriptions(&self) -> Option<DescriptionCache> {
        let path = self.cache_dir.join(DESCRIPTIONS_CACHE_FILE);
        if !path.exists() {
            return None;
        }

        let _lock = self.lock(false).ok()?;
        let content = fs::read_to_string(&path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Save the descriptions cache
    pub fn save_descriptions(&self, cache: &DescriptionCache) -> anyhow::Result<()> {
        let _lock = self.lock(true)?;
        let path = self.cache_dir.join(DESCRIPTIONS_CACHE_FILE);
        let content = serde_json::to_string(cache)?;
        write_atomic(&path, &content)?;
        Ok(())
    }
}

fn append_ignore_entry(path: &Path, entry: &str) -> anyhow::Result<()> {
    let content = fs::read_to_string(path).unwrap_or_default();
    let already_present = content.lines().any(|line| {
        let trimmed = line.trim();
        trimmed == entry || trimmed == ".codemend"
    });
    if already_present {
        return Ok(());
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    use std::io::Write;
    if !content.trim().is_empty() && !content.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "# codemend cache")?;
    writeln!(file, "{}", entry)?;
    Ok(())
}

/// Write content atomically by writing to a temp file first, then renaming.
///
/// # Platform Notes
/// - **Unix**: Uses atomic `rename()` which is guaranteed to be atomic by POSIX.
/// - **Windows**: Uses a backup-and-restore pattern since `rename()` can fail if the
///   destination exists. This is NOT truly atomic - if the process crashes between
///   the backup rename and the final rename, the file may be left in an inconsistent
///   state. The backup file (.bak) can be used for recovery. For cache files, this
///   trade-off is acceptable as the cache can be regenerated.
fn write_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, content)?;

    // Set restrictive permissions on Unix before renaming
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600); // Owner read/write only
        let _ = std::fs::set_permissions(&tmp_path, perms);
    }

    #[cfg(windows)]
    {
        let backup_path = path.with_extension("bak");
        // Clean up any stale backup from a previous crash
        if backup_path.exists() {
            let _ = fs::remove_file(&backup_path);
        }
        if path.exists() {
            if let Err(err) = fs::rename(path, &backup_path) {
                let _ = fs::remove_file(&tmp_path);
                return Err(err.into());
            }
        }
        if let Err(err) = fs::rename(&tmp_path, path) {
            // Attempt rollback on failure
            if backup_path.exists() {
                let _ = fs::rename(&backup_path, path);
            }
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
        // Clean up backup on success
        if backup_path.exists() {
            let _ = fs::remove_file(&backup_path);
        }
        return Ok(());
    }

    #[cfg(not(windows))]
    {
        if let Err(err) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_cache_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let cache = Cache::new(root.path());

        let mut descriptions = DescriptionCache::new();
        descriptions.set_description(
            PathBuf::from("src/app.py"),
            "Entry point wiring the HTTP routes.".to_string(),
            "abc123".to_string(),
        );
        cache.save_descriptions(&descriptions).unwrap();

        let loaded = cache.load_descriptions().unwrap();
        assert_eq!(
            loaded.get(Path::new("src/app.py"), "abc123"),
            Some("Entry point wiring the HTTP routes.")
        );
    }

    #[test]
    fn test_description_invalidated_on_hash_change() {
        let mut descriptions = DescriptionCache::new();
        descriptions.set_description(
            PathBuf::from("src/app.py"),
            "Old description.".to_string(),
            "abc123".to_string(),
        );
        assert!(descriptions.is_file_valid(Path::new("src/app.py"), "abc123"));
        assert!(!descriptions.is_file_valid(Path::new("src/app.py"), "def456"));
        assert_eq!(descriptions.get(Path::new("src/app.py"), "def456"), None);
    }

    #[test]
    fn test_expired_description_is_invalid() {
        let mut descriptions = DescriptionCache::new();
        descriptions.entries.insert(
            PathBuf::from("src/app.py"),
            DescriptionEntry {
                description: "Stale description.".to_string(),
                file_hash: "abc123".to_string(),
                generated_at: Utc::now() - Duration::days(DESCRIPTION_CACHE_DAYS + 1),
            },
        );
        assert!(!descriptions.is_file_valid(Path::new("src/app.py"), "abc123"));
    }

    #[test]
    fn test_missing_cache_loads_as_none() {
        let root = tempfile::tempdir().unwrap();
        let cache = Cache::new(root.path());
        assert!(cache.load_descriptions().is_none());
    }

    #[test]
    fn test_gitignore_gains_cache_entry_once() {
        let root = tempfile::tempdir().unwrap();
        let gitignore = root.path().join(".gitignore");
        fs::write(&gitignore, "target/\n").unwrap();

        let cache = Cache::new(root.path());
        cache.save_descriptions(&DescriptionCache::new()).unwrap();
        cache.save_descriptions(&DescriptionCache::new()).unwrap();

        let content = fs::read_to_string(&gitignore).unwrap();
        assert!(content.contains("target/"));
        assert_eq!(content.matches(".codemend/").count(), 1);
    }
}
