use std::path::{Component, Path, PathBuf};

/// Char-safe truncation with a trailing ellipsis marker.
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

/// Normalize CRLF line endings to LF so diffs don't report spurious hunks.
pub fn normalize_newlines(s: &str) -> String {
    if s.contains('\r') {
        s.replace("\r\n", "\n")
    } else {
        s.to_string()
    }
}

pub struct RepoPath {
    pub absolute: PathBuf,
    pub relative: PathBuf,
}

/// Resolve a repo-relative path for reading or writing. The file does not
/// need to exist yet, but the path must stay inside the root.
pub fn resolve_repo_path_allow_new(
    repo_root: &Path,
    candidate: &str,
) -> Result<RepoPath, crate::error::PatchError> {
    use crate::error::PatchError;

    let invalid = |reason: &str| PatchError::InvalidPath {
        path: candidate.to_string(),
        reason: reason.to_string(),
    };

    if candidate.trim().is_empty() {
        return Err(invalid("path is empty"));
    }

    let candidate_path = Path::new(candidate);
    if candidate_path.is_absolute() {
        return Err(invalid("absolute paths are not allowed"));
    }
    if candidate_path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(invalid("parent traversal is not allowed"));
    }

    let relative: PathBuf = candidate_path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if relative.as_os_str().is_empty() {
        return Err(invalid("path resolves to the repository root"));
    }

    Ok(RepoPath {
        absolute: repo_root.join(&relative),
        relative,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_strings_intact() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn truncate_marks_long_strings() {
        let out = truncate("hello world", 8);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), 8);
    }

    #[test]
    fn truncate_is_char_safe() {
        // multi-byte chars must not be split
        let out = truncate("héllo wörld", 8);
        assert_eq!(out.chars().count(), 8);
    }

    #[test]
    fn normalize_newlines_strips_crlf() {
        assert_eq!(normalize_newlines("a\r\nb\r\n"), "a\nb\n");
        assert_eq!(normalize_newlines("a\nb\n"), "a\nb\n");
    }

    #[test]
    fn repo_path_rejects_escapes() {
        let root = Path::new("/repo");
        assert!(resolve_repo_path_allow_new(root, "").is_err());
        assert!(resolve_repo_path_allow_new(root, "/etc/passwd").is_err());
        assert!(resolve_repo_path_allow_new(root, "../outside.rs").is_err());
        assert!(resolve_repo_path_allow_new(root, "src/../../outside.rs").is_err());
    }

    #[test]
    fn repo_path_accepts_new_nested_files() {
        let root = Path::new("/repo");
        let resolved = resolve_repo_path_allow_new(root, "./src/new_module.rs").unwrap();
        assert_eq!(resolved.relative, PathBuf::from("src/new_module.rs"));
        assert_eq!(resolved.absolute, PathBuf::from("/repo/src/new_module.rs"));
    }
}
