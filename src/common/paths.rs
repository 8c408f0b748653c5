//! Path helpers and user-level directories
//!
//! Settings and reference lookups compare paths case-insensitively and
//! independent of separator style, so every cache key and de-duplication key
//! goes through [`path_key`].

use std::path::{Component, Path, PathBuf};

/// Name used for the configuration and log directories
const APP_NAME: &str = "jsharness";

/// Normalize a path into a case-insensitive, forward-slash comparison key
///
/// Trailing separators are removed so `a/b/` and `A\B` share a key.
pub fn path_key(path: &Path) -> String {
    let normalized = normalize(path);
    let mut key = normalized.to_string_lossy().replace('\\', "/").to_lowercase();
    while key.len() > 1 && key.ends_with('/') {
        key.pop();
    }
    key
}

/// Lexically normalize a path, resolving `.` and `..` without touching disk
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Never pop past a root or prefix
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if popped {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve `value` against `base` unless it is already absolute
pub fn resolve_against(base: &Path, value: &str) -> PathBuf {
    let candidate = PathBuf::from(value);
    if candidate.is_absolute() {
        normalize(&candidate)
    } else {
        normalize(&base.join(candidate))
    }
}

/// Whether a reference points at a remote resource rather than the file system
pub fn is_url(value: &str) -> bool {
    let lower = value.trim().to_lowercase();
    lower.starts_with("http://")
        || lower.starts_with("https://")
        || lower.starts_with("file://")
        || lower.starts_with("//")
}

/// Whether a reference starts at a path root (`/foo` or `\foo`)
pub fn is_rooted(value: &str) -> bool {
    !is_url(value) && (value.starts_with('/') || value.starts_with('\\'))
}

/// Compute the path of `target` relative to the directory `base`
///
/// Both paths are normalized first. Comparison is case-insensitive; the
/// returned segments keep the casing of `target`.
pub fn relative_to(base: &Path, target: &Path) -> PathBuf {
    let base = normalize(base);
    let target = normalize(target);
    let base_parts: Vec<_> = base.components().collect();
    let target_parts: Vec<_> = target.components().collect();

    let common = base_parts
        .iter()
        .zip(target_parts.iter())
        .take_while(|(a, b)| {
            a.as_os_str().to_string_lossy().to_lowercase()
                == b.as_os_str().to_string_lossy().to_lowercase()
        })
        .count();

    let mut out = PathBuf::new();
    for _ in common..base_parts.len() {
        out.push("..");
    }
    for part in &target_parts[common..] {
        out.push(part.as_os_str());
    }
    out
}

/// Render a relative path with forward slashes
pub fn to_forward_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Lower-cased extension of a path including the dot, e.g. `.js`
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}

/// Get the configuration directory path
///
/// - Linux: `~/.config/jsharness/`
/// - macOS: `~/Library/Application Support/jsharness/`
/// - Windows: `%APPDATA%\jsharness\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the user configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

/// The user's home directory, if one can be determined
pub fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_key_ignores_case_and_separators() {
        assert_eq!(path_key(Path::new("/Proj/Tests/")), "/proj/tests");
        assert_eq!(path_key(Path::new("/proj/a/../Tests")), "/proj/tests");
        assert_eq!(
            path_key(Path::new("/proj/x.JS")),
            path_key(Path::new("/PROJ/./x.js"))
        );
    }

    #[test]
    fn test_normalize_keeps_root() {
        assert_eq!(normalize(Path::new("/a/../../b")), PathBuf::from("/b"));
        assert_eq!(normalize(Path::new("a/./b/../c")), PathBuf::from("a/c"));
        assert_eq!(normalize(Path::new("../a")), PathBuf::from("../a"));
    }

    #[test]
    fn test_url_and_rooted_detection() {
        assert!(is_url("http://cdn.example.com/lib.js"));
        assert!(is_url("//cdn.example.com/lib.js"));
        assert!(!is_url("lib/x.js"));
        assert!(is_rooted("/lib/x.js"));
        assert!(!is_rooted("//cdn.example.com/lib.js"));
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(
            relative_to(Path::new("/proj/out"), Path::new("/proj/src/app/a.js")),
            PathBuf::from("../src/app/a.js")
        );
        assert_eq!(
            relative_to(Path::new("/Proj"), Path::new("/proj/a.js")),
            PathBuf::from("a.js")
        );
    }

    #[test]
    fn test_config_dir_is_valid() {
        // Not every sandbox has a home directory; only check the shape when present
        if let Some(path) = config_path() {
            assert!(path.ends_with("config.toml"));
        }
    }
}
