//! AMD module paths
//!
//! Two layouts coexist. The current one takes paths relative to
//! `AMDAppDirectory`, else `AMDBaseUrl`, else the harness directory. The
//! legacy one only applies when `AMDBasePath` is the sole AMD setting, and
//! follows URI rules: the base's last segment is treated as a file unless it
//! ends with a separator, so `/proj/scripts` resolves relative to `/proj`.

use std::path::{Path, PathBuf};

use super::types::ReferencedFile;
use crate::common::paths::{is_url, relative_to, to_forward_slashes};
use crate::settings::SettingsScope;

/// Assign module paths to every local file in a flattened reference list
pub fn assign_amd_paths(files: &mut [ReferencedFile], harness_dir: &Path, scope: &SettingsScope) {
    for file in files.iter_mut().filter(|f| f.is_local) {
        file.amd_path = Some(amd_path(&file.effective_path(), harness_dir, scope));
    }
}

/// Module path for a single file: relative, forward slashes, no extension
pub fn amd_path(file: &Path, harness_dir: &Path, scope: &SettingsScope) -> String {
    let relative = match legacy_base(scope) {
        Some(base) => relative_to(&legacy_base_dir(base), file),
        None => relative_to(&amd_root(scope, harness_dir), file),
    };
    strip_extension(&to_forward_slashes(&relative))
}

fn legacy_base(scope: &SettingsScope) -> Option<&str> {
    if scope.amd_app_directory.is_some() || scope.amd_base_url.is_some() {
        return None;
    }
    scope.amd_base_path.as_deref()
}

fn legacy_base_dir(base: &str) -> PathBuf {
    if base.ends_with(['/', '\\']) {
        PathBuf::from(base)
    } else {
        Path::new(base).parent().map(Path::to_path_buf).unwrap_or_default()
    }
}

fn amd_root(scope: &SettingsScope, harness_dir: &Path) -> PathBuf {
    [scope.amd_app_directory.as_deref(), scope.amd_base_url.as_deref()]
        .into_iter()
        .flatten()
        .find(|value| !is_url(value))
        .map(PathBuf::from)
        .unwrap_or_else(|| harness_dir.to_path_buf())
}

fn strip_extension(path: &str) -> String {
    let name_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[name_start..].rfind('.') {
        Some(dot) if dot > 0 => path[..name_start + dot].to_string(),
        _ => path.to_string(),
    }
}
