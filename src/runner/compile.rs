//! Batch compilation
//!
//! Units whose scope carries a `Compile` block are grouped by the settings
//! directory that declared it. Each group's compiler runs once, then every
//! compilable reference in the group is pointed at its generated output.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::context::TestContext;
use super::launcher::{ProcessLauncher, ProcessSpec};
use crate::common::paths::{extension_of, path_key, relative_to};
use crate::common::{Error, Result};
use crate::fs::FileSystem;
use crate::settings::{CompileMode, CompileSettings};

const DEFAULT_COMPILE_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_EXTENSIONS: [&str; 3] = [".ts", ".tsx", ".coffee"];
const DEFAULT_EXTENSIONS_WITH_NO_OUTPUT: [&str; 1] = [".d.ts"];

/// A compile group that failed, with the ids of the contexts it takes down
#[derive(Debug)]
pub struct CompileFailure {
    pub context_ids: Vec<usize>,
    pub error: Error,
}

/// Runs batch compilers for built contexts
pub struct BatchCompiler {
    fs: Arc<dyn FileSystem>,
    launcher: Arc<dyn ProcessLauncher>,
}

impl BatchCompiler {
    pub fn new(fs: Arc<dyn FileSystem>, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self { fs, launcher }
    }

    /// Compile every group and assign generated paths
    ///
    /// Contexts of a failed group are left untouched and listed in the result.
    pub async fn compile(&self, contexts: &mut [TestContext]) -> Vec<CompileFailure> {
        let mut failures = Vec::new();

        for (settings, members) in groups(contexts) {
            let sources = compilable_sources(contexts, &members, &settings);
            let context_ids = members.iter().map(|&i| contexts[i].id).collect::<Vec<_>>();

            if mode(&settings) == CompileMode::Executable && !sources.is_empty() {
                let skip = settings.skip_if_unchanged.unwrap_or(true)
                    && self.outputs_up_to_date(&sources, &settings);
                if skip {
                    tracing::debug!(settings_dir = %settings.settings_dir.display(), "compiled outputs up to date");
                } else if let Err(error) = self.run(&settings).await {
                    tracing::warn!(settings_dir = %settings.settings_dir.display(), "{}", error);
                    failures.push(CompileFailure { context_ids, error });
                    continue;
                }
            }

            for &index in &members {
                for file in contexts[index].references.iter_mut() {
                    let Some(source) = file.local_path().map(Path::to_path_buf) else {
                        continue;
                    };
                    if !is_compilable(&source, &settings) {
                        continue;
                    }
                    match generated_path(&source, &settings) {
                        Some(output) if self.fs.is_file(&output) => file.generated_path = Some(output),
                        Some(output) => tracing::warn!(
                            source = %source.display(),
                            output = %output.display(),
                            "no generated output for source"
                        ),
                        None => file.include_in_harness = false,
                    }
                }
            }
        }
        failures
    }

    fn outputs_up_to_date(&self, sources: &[PathBuf], settings: &CompileSettings) -> bool {
        sources.iter().all(|source| {
            let Some(output) = generated_path(source, settings) else {
                return true;
            };
            match (self.fs.modified(source), self.fs.modified(&output)) {
                (Some(src), Some(out)) => out >= src,
                _ => false,
            }
        })
    }

    async fn run(&self, settings: &CompileSettings) -> Result<()> {
        let dir = &settings.settings_dir;
        let executable = settings
            .executable
            .as_deref()
            .ok_or_else(|| Error::compile(dir, "no Executable configured"))?;
        let working_dir = settings
            .working_directory
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| dir.clone());
        let spec = ProcessSpec::new(executable)
            .args(split_arguments(settings.arguments.as_deref().unwrap_or("")))
            .current_dir(working_dir);
        let timeout = Duration::from_millis(settings.timeout.unwrap_or(DEFAULT_COMPILE_TIMEOUT_MS));

        tracing::info!(settings_dir = %dir.display(), executable, "running batch compile");
        let output = self
            .launcher
            .run_to_completion(&spec, Some(timeout))
            .await
            .map_err(|e| Error::compile(dir, e))?;

        if !output.success() {
            let code = output
                .exit_code
                .map_or_else(|| "none".to_string(), |c| c.to_string());
            return Err(Error::compile(
                dir,
                format!(
                    "compiler exited with code {}\n{}{}",
                    code,
                    output.stdout.trim_end(),
                    output.stderr.trim_end()
                ),
            ));
        }
        Ok(())
    }
}

/// Contexts with a compile block, grouped by declaring directory in first-seen order
fn groups(contexts: &[TestContext]) -> Vec<(CompileSettings, Vec<usize>)> {
    let mut groups: Vec<(String, CompileSettings, Vec<usize>)> = Vec::new();
    for (index, context) in contexts.iter().enumerate() {
        let Some(settings) = context.scope.compile.as_ref() else {
            continue;
        };
        let key = path_key(&settings.settings_dir);
        match groups.iter_mut().find(|(k, _, _)| *k == key) {
            Some((_, _, members)) => members.push(index),
            None => groups.push((key, settings.clone(), vec![index])),
        }
    }
    groups
        .into_iter()
        .map(|(_, settings, members)| (settings, members))
        .collect()
}

fn mode(settings: &CompileSettings) -> CompileMode {
    settings.mode.unwrap_or(if settings.executable.is_some() {
        CompileMode::Executable
    } else {
        CompileMode::External
    })
}

fn compilable_sources(contexts: &[TestContext], members: &[usize], settings: &CompileSettings) -> Vec<PathBuf> {
    let mut seen = std::collections::HashSet::new();
    members
        .iter()
        .flat_map(|&i| contexts[i].references.iter())
        .filter_map(|f| f.local_path())
        .filter(|p| is_compilable(p, settings))
        .filter(|p| seen.insert(path_key(p)))
        .map(Path::to_path_buf)
        .collect()
}

fn is_compilable(path: &Path, settings: &CompileSettings) -> bool {
    let Some(ext) = extension_of(path) else {
        return false;
    };
    match settings.extensions.as_deref() {
        Some(list) => list.iter().any(|e| e.eq_ignore_ascii_case(&ext)),
        None => DEFAULT_EXTENSIONS.contains(&ext.as_str()),
    }
}

fn has_no_output(path: &Path, settings: &CompileSettings) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match settings.extensions_with_no_output.as_deref() {
        Some(list) => list.iter().any(|e| name.ends_with(&e.to_lowercase())),
        None => DEFAULT_EXTENSIONS_WITH_NO_OUTPUT.iter().any(|e| name.ends_with(e)),
    }
}

/// Where the compiler writes the output for `source`, or `None` if it writes nothing
///
/// The first `Paths` entry covering the source wins; a source outside every
/// entry compiles in place.
pub fn generated_path(source: &Path, settings: &CompileSettings) -> Option<PathBuf> {
    if has_no_output(source, settings) {
        return None;
    }
    let source_key = path_key(source);

    for map in &settings.paths {
        let (Some(from), Some(to)) = (map.source_path.as_deref(), map.output_path.as_deref()) else {
            continue;
        };
        let from_key = path_key(Path::new(from));
        let to = Path::new(to);

        if source_key == from_key {
            // File-to-file mapping, unless the output names a directory
            let is_file_output = extension_of(to).is_some_and(|e| e == ".js");
            return Some(if is_file_output {
                to.to_path_buf()
            } else {
                to.join(source.file_name()?).with_extension("js")
            });
        }
        if source_key.starts_with(&format!("{}/", from_key)) {
            let relative = relative_to(Path::new(from), source);
            return Some(to.join(relative).with_extension("js"));
        }
    }
    Some(source.with_extension("js"))
}

/// Split a command line on whitespace, honoring double and single quotes
pub fn split_arguments(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_arg = false;

    for ch in line.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None if ch == '"' || ch == '\'' => {
                quote = Some(ch);
                in_arg = true;
            }
            None if ch.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            None => {
                current.push(ch);
                in_arg = true;
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::CompilePathMap;

    fn settings(paths: Vec<(&str, &str)>) -> CompileSettings {
        CompileSettings {
            paths: paths
                .into_iter()
                .map(|(s, o)| CompilePathMap {
                    source_path: Some(s.to_string()),
                    output_path: Some(o.to_string()),
                })
                .collect(),
            settings_dir: PathBuf::from("/proj"),
            ..Default::default()
        }
    }

    #[test]
    fn test_generated_path_mapping() {
        let s = settings(vec![("/proj/src", "/proj/out"), ("/proj/one.ts", "/proj/dist/bundle.js")]);
        assert_eq!(
            generated_path(Path::new("/proj/src/app/a.ts"), &s),
            Some(PathBuf::from("/proj/out/app/a.js"))
        );
        assert_eq!(
            generated_path(Path::new("/proj/one.ts"), &s),
            Some(PathBuf::from("/proj/dist/bundle.js"))
        );
        assert_eq!(
            generated_path(Path::new("/proj/other/b.coffee"), &s),
            Some(PathBuf::from("/proj/other/b.js"))
        );
        assert_eq!(generated_path(Path::new("/proj/src/types.d.ts"), &s), None);
    }

    #[test]
    fn test_compilable_extensions() {
        let mut s = settings(vec![]);
        assert!(is_compilable(Path::new("a.TS"), &s));
        assert!(!is_compilable(Path::new("a.js"), &s));
        s.extensions = Some(vec![".js".into()]);
        assert!(is_compilable(Path::new("a.js"), &s));
    }

    #[test]
    fn test_split_arguments() {
        assert_eq!(
            split_arguments(r#"-p "my project/tsconfig.json" --outDir 'out dir' -x"#),
            vec!["-p", "my project/tsconfig.json", "--outDir", "out dir", "-x"]
        );
        assert_eq!(split_arguments("  "), Vec::<String>::new());
        assert_eq!(split_arguments(r#"a "" b"#), vec!["a", "", "b"]);
    }

    #[test]
    fn test_mode_defaults_from_executable() {
        let mut s = settings(vec![]);
        assert_eq!(mode(&s), CompileMode::External);
        s.executable = Some("tsc".into());
        assert_eq!(mode(&s), CompileMode::Executable);
    }
}
