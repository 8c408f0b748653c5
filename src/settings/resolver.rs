//! Settings resolution with caching and inheritance
//!
//! `SettingsResolver` owns its cache; construct one per run (or keep one for
//! the lifetime of a host process) and share it behind an `Arc`.

use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::common::paths::{normalize, path_key};
use crate::common::{Error, Result};
use crate::fs::FileSystem;

use super::expand::{expand_scope, system_variables, SettingsEnvironments, VariableTable};
use super::types::{ServerSettings, SettingsScope, SETTINGS_FILE_NAME};

/// Resolves the settings scope governing a directory
pub struct SettingsResolver {
    fs: Arc<dyn FileSystem>,
    /// Keyed by normalized directory; entries are only ever added
    cache: DashMap<String, Arc<SettingsScope>>,
    default_scope: Arc<SettingsScope>,
    env: HashMap<String, String>,
    system_vars: Vec<(String, String)>,
}

impl SettingsResolver {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            cache: DashMap::new(),
            default_scope: Arc::new(SettingsScope::default_sentinel()),
            env: std::env::vars().collect(),
            system_vars: system_variables(),
        }
    }

    /// Replace the environment variables used for `%NAME%` expansion
    pub fn with_environment_variables(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Make every scope adopt the given server configuration
    pub fn with_forced_server(mut self, server: ServerSettings) -> Self {
        let mut default_scope = SettingsScope::default_sentinel();
        default_scope.server = Some(ServerSettings {
            forced: true,
            ..server
        });
        self.default_scope = Arc::new(default_scope);
        self
    }

    /// The scope returned for directories without a settings file
    pub fn default_scope(&self) -> Arc<SettingsScope> {
        Arc::clone(&self.default_scope)
    }

    /// Resolve the scope for `dir`, using the cache when possible
    pub fn resolve(
        &self,
        dir: &Path,
        environments: Option<&SettingsEnvironments>,
    ) -> Result<Arc<SettingsScope>> {
        self.resolve_inner(dir, environments, false, &mut Vec::new())
    }

    /// Drop every cached scope
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn cached(&self, key: &str) -> Option<Arc<SettingsScope>> {
        self.cache.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Store under `key` unless something is already there; return what is stored
    fn add_if_absent(&self, key: String, scope: &Arc<SettingsScope>) -> Arc<SettingsScope> {
        Arc::clone(
            self.cache
                .entry(key)
                .or_insert_with(|| Arc::clone(scope))
                .value(),
        )
    }

    fn resolve_inner(
        &self,
        dir: &Path,
        environments: Option<&SettingsEnvironments>,
        force_fresh: bool,
        chain: &mut Vec<String>,
    ) -> Result<Arc<SettingsScope>> {
        let query_key = path_key(dir);
        if !force_fresh {
            if let Some(hit) = self.cached(&query_key) {
                tracing::trace!(dir = %dir.display(), "settings cache hit");
                return Ok(hit);
            }
        }

        let Some(settings_file) = self.locate(dir) else {
            return Ok(self.default_scope());
        };
        let settings_dir = settings_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let found_key = path_key(&settings_dir);

        if !force_fresh {
            if let Some(hit) = self.cached(&found_key) {
                return Ok(self.add_if_absent(query_key, &hit));
            }
        }

        let text = self.fs.read_text(&settings_file)?;
        let mut scope: SettingsScope = serde_json::from_str(&text)
            .map_err(|e| Error::config_parse(&settings_file, e))?;
        scope.settings_dir = Some(settings_dir.clone());
        scope.settings_file = Some(settings_file.clone());

        let properties = environments.and_then(|envs| envs.properties_for(&settings_dir));
        let table = VariableTable::new(&settings_dir, properties, &self.system_vars);
        expand_scope(&mut scope, &table, &self.env);

        // A parent cached under another environment must not leak into this chain
        let fresh_parent = force_fresh || properties.is_some_and(|p| !p.is_empty());

        chain.push(found_key.clone());
        if let Some(parent_dir) = self.parent_search_dir(&scope) {
            self.merge_parent(&mut scope, &parent_dir, environments, fresh_parent, chain)?;
        }
        scope.inherit_from(&self.default_scope);

        tracing::debug!(
            settings = %settings_file.display(),
            "resolved settings scope"
        );

        let scope = Arc::new(scope);
        if force_fresh {
            self.add_if_absent(found_key, &scope);
            self.add_if_absent(query_key, &scope);
            return Ok(scope);
        }
        let stored = self.add_if_absent(found_key, &scope);
        self.add_if_absent(query_key, &stored);
        Ok(stored)
    }

    fn merge_parent(
        &self,
        scope: &mut SettingsScope,
        parent_dir: &Path,
        environments: Option<&SettingsEnvironments>,
        fresh: bool,
        chain: &mut Vec<String>,
    ) -> Result<()> {
        let Some(parent_file) = self.locate(parent_dir) else {
            tracing::debug!(dir = %parent_dir.display(), "no parent settings file");
            return Ok(());
        };
        let parent_key = parent_file.parent().map(path_key).unwrap_or_default();
        if chain.contains(&parent_key) {
            tracing::warn!(
                settings = %parent_file.display(),
                "settings inheritance cycle; ignoring parent"
            );
            return Ok(());
        }

        let parent = self.resolve_inner(parent_dir, environments, fresh, chain)?;
        if !parent.is_default {
            scope.inherit_from(&parent);
        }
        Ok(())
    }

    /// Directory to start the parent search from, if the scope inherits
    fn parent_search_dir(&self, scope: &SettingsScope) -> Option<PathBuf> {
        if let Some(path) = scope.inherit_from_path.as_deref() {
            let path = PathBuf::from(path);
            if self.fs.is_dir(&path) {
                return Some(path);
            }
            if self.fs.is_file(&path) {
                return path.parent().map(Path::to_path_buf);
            }
            tracing::warn!(path = %path.display(), "InheritFromPath does not exist");
            return None;
        }
        if scope.inherit_from_parent {
            return scope
                .settings_dir()
                .and_then(Path::parent)
                .map(Path::to_path_buf);
        }
        None
    }

    /// Walk upward from `dir` to the nearest settings file
    fn locate(&self, dir: &Path) -> Option<PathBuf> {
        let start = normalize(dir);
        start
            .ancestors()
            .map(|d| d.join(SETTINGS_FILE_NAME))
            .find(|candidate| self.fs.is_file(candidate))
    }
}
