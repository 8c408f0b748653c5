//! Placeholder expansion for settings paths
//!
//! Values may contain `%NAME%` tokens. Process environment variables are
//! substituted first, then the variable table (settings directory aliases,
//! system paths, and properties from a matching environment override).
//! Tokens that match nothing are left as written.

use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::common::paths::{is_url, path_key, resolve_against};

use super::types::SettingsScope;

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| {
        Regex::new(r"%([A-Za-z_][A-Za-z0-9_.\-]*)%").expect("token pattern is valid")
    })
}

/// Per-directory property overrides
#[derive(Debug, Clone, Default)]
pub struct SettingsEnvironment {
    /// Directory the overrides apply to (and everything below it)
    pub path: PathBuf,
    pub properties: BTreeMap<String, String>,
}

impl SettingsEnvironment {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

/// A set of environment overrides; the longest matching path prefix wins
#[derive(Debug, Clone, Default)]
pub struct SettingsEnvironments(pub Vec<SettingsEnvironment>);

impl SettingsEnvironments {
    /// Properties of the environment whose path is the longest prefix of `dir`
    pub fn properties_for(&self, dir: &Path) -> Option<&BTreeMap<String, String>> {
        let dir_key = path_key(dir);
        self.0
            .iter()
            .filter_map(|env| {
                let env_key = path_key(&env.path);
                let is_prefix = dir_key == env_key
                    || (env_key.ends_with('/') && dir_key.starts_with(&env_key))
                    || dir_key.starts_with(&format!("{}/", env_key));
                is_prefix.then_some((env_key.len(), &env.properties))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, props)| props)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Variables available to one settings file
#[derive(Debug, Clone)]
pub struct VariableTable {
    /// Lower-cased name to value
    vars: HashMap<String, String>,
}

impl VariableTable {
    pub fn new(
        settings_dir: &Path,
        properties: Option<&BTreeMap<String, String>>,
        system: &[(String, String)],
    ) -> Self {
        let mut vars = HashMap::new();
        for (name, value) in system {
            vars.insert(name.to_lowercase(), value.clone());
        }
        let dir = settings_dir.to_string_lossy().into_owned();
        vars.insert("settingsfiledirectory".to_string(), dir.clone());
        vars.insert("settingsdir".to_string(), dir);
        if let Some(props) = properties {
            for (name, value) in props {
                vars.insert(name.to_lowercase(), value.clone());
            }
        }
        Self { vars }
    }

    /// Substitute environment variables, then table variables
    pub fn expand(&self, value: &str, env: &HashMap<String, String>) -> String {
        let with_env = substitute(value, |name| {
            env.get(name).cloned().or_else(|| {
                env.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v.clone())
            })
        });
        substitute(&with_env, |name| self.vars.get(&name.to_lowercase()).cloned())
    }
}

fn substitute(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    token_regex()
        .replace_all(value, |caps: &Captures<'_>| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Fixed variables every settings file can use
pub fn system_variables() -> Vec<(String, String)> {
    let mut vars = vec![(
        "TempDir".to_string(),
        std::env::temp_dir().to_string_lossy().into_owned(),
    )];
    if let Some(home) = crate::common::paths::home_dir() {
        vars.push(("HomeDir".to_string(), home.to_string_lossy().into_owned()));
    }
    if let Ok(cwd) = std::env::current_dir() {
        vars.push(("CurrentDir".to_string(), cwd.to_string_lossy().into_owned()));
    }
    vars
}

struct Expander<'a> {
    dir: &'a Path,
    table: &'a VariableTable,
    env: &'a HashMap<String, String>,
}

impl Expander<'_> {
    fn text(&self, value: &str) -> String {
        self.table.expand(value, self.env)
    }

    fn path(&self, value: &str) -> String {
        let expanded = self.text(value);
        if is_url(&expanded) {
            return expanded;
        }
        let mut resolved = resolve_against(self.dir, &expanded)
            .to_string_lossy()
            .into_owned();
        // A trailing separator marks a directory for URI-style arithmetic
        if expanded.ends_with(['/', '\\']) && !resolved.ends_with(['/', '\\']) {
            resolved.push(std::path::MAIN_SEPARATOR);
        }
        resolved
    }

    fn path_or_dir(&self, value: Option<&str>) -> String {
        match value {
            Some(v) if !v.trim().is_empty() => self.path(v),
            _ => self.dir.to_string_lossy().into_owned(),
        }
    }

    fn opt_path(&self, value: &mut Option<String>) {
        if let Some(v) = value.as_mut() {
            *v = self.path(v);
        }
    }

    fn texts(&self, values: &mut [String]) {
        for v in values {
            *v = self.text(v);
        }
    }

    /// Executables without a directory part are left for PATH lookup
    fn executable(&self, value: &str) -> String {
        let expanded = self.text(value);
        if expanded.contains('/') || expanded.contains('\\') {
            self.path(&expanded)
        } else {
            expanded
        }
    }
}

/// Expand every path-bearing field of a freshly loaded scope in place
pub fn expand_scope(
    scope: &mut SettingsScope,
    table: &VariableTable,
    env: &HashMap<String, String>,
) {
    let Some(dir) = scope.settings_dir.clone() else {
        return;
    };
    let x = Expander {
        dir: &dir,
        table,
        env,
    };

    x.opt_path(&mut scope.inherit_from_path);
    x.opt_path(&mut scope.test_harness_directory);
    x.opt_path(&mut scope.custom_test_harness_path);
    x.opt_path(&mut scope.amd_base_url);
    x.opt_path(&mut scope.amd_app_directory);
    x.opt_path(&mut scope.amd_base_path);
    x.opt_path(&mut scope.trace_file_path);

    x.texts(&mut scope.code_coverage_includes);
    x.texts(&mut scope.code_coverage_excludes);
    x.texts(&mut scope.code_coverage_ignores);

    for reference in &mut scope.references {
        reference.path = Some(x.path_or_dir(reference.path.as_deref()));
        x.texts(&mut reference.includes);
        x.texts(&mut reference.excludes);
        reference.settings_dir = dir.clone();
    }

    for test in &mut scope.tests {
        test.path = Some(x.path_or_dir(test.path.as_deref()));
        x.texts(&mut test.includes);
        x.texts(&mut test.excludes);
        test.settings_dir = dir.clone();
    }

    for transform in &mut scope.transforms {
        x.opt_path(&mut transform.path);
    }

    if let Some(compile) = scope.compile.as_mut() {
        compile.executable = compile.executable.as_deref().map(|e| x.executable(e));
        compile.arguments = compile.arguments.as_deref().map(|a| x.text(a));
        compile.working_directory = Some(x.path_or_dir(compile.working_directory.as_deref()));
        for map in &mut compile.paths {
            let source = x.path_or_dir(map.source_path.as_deref());
            map.output_path = Some(match map.output_path.as_deref() {
                Some(out) if !out.trim().is_empty() => x.path(out),
                _ => source.clone(),
            });
            map.source_path = Some(source);
        }
        compile.settings_dir = dir.clone();
    }

    if let Some(server) = scope.server.as_mut() {
        server.root_path = Some(x.path_or_dir(server.root_path.as_deref()));
    }
}
