use std::path::{Component, Path, PathBuf};

/// Truncate a string to `max` characters, appending `...` when shortened.
pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Resolve an oracle-provided relative path against the repository root.
///
/// Oracle responses are untrusted: absolute paths and parent traversal are
/// rejected so a malformed response can never read outside the repo.
pub fn resolve_repo_path(repo_root: &Path, candidate: &str) -> anyhow::Result<PathBuf> {
    let candidate = Path::new(candidate);
    if candidate.as_os_str().is_empty() {
        return Err(anyhow::anyhow!("Path is empty"));
    }
    if candidate.is_absolute() {
        return Err(anyhow::anyhow!(
            "Absolute paths are not allowed: {}",
            candidate.display()
        ));
    }
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(anyhow::anyhow!(
            "Parent traversal is not allowed: {}",
            candidate.display()
        ));
    }

    Ok(repo_root.join(candidate))
}

/// Compute a stable hash of file contents (FNV-1a 64-bit).
pub fn hash_bytes(content: &[u8]) -> String {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET_BASIS;
    for byte in content {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }

    format!("{:016x}", hash)
}

pub fn hash_str(content: &str) -> String {
    hash_bytes(content.as_bytes())
}
