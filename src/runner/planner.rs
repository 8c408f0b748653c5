//! Grouping discovered files into execution units

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::settings::SettingsScope;

/// A test file together with the scope that governs it
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub scope: Arc<SettingsScope>,
}

/// Files run by a single runner invocation
#[derive(Debug, Clone)]
pub struct ExecutionUnit {
    pub scope: Arc<SettingsScope>,
    pub files: Vec<PathBuf>,
}

/// Group files into units
///
/// Files whose scope enables batching share one unit per scope; every other
/// file gets a unit of its own. Units keep the order in which their first
/// file was discovered.
pub fn plan(files: Vec<DiscoveredFile>) -> Vec<ExecutionUnit> {
    let mut units: Vec<ExecutionUnit> = Vec::new();
    let mut batches: HashMap<String, usize> = HashMap::new();

    for file in files {
        if file.scope.batching_enabled() && !file.scope.is_default {
            let key = file.scope.key();
            if let Some(&index) = batches.get(&key) {
                units[index].files.push(file.path);
                continue;
            }
            batches.insert(key, units.len());
        }
        units.push(ExecutionUnit {
            scope: file.scope,
            files: vec![file.path],
        });
    }
    units
}

/// Effective degree of parallelism for a run
///
/// The smallest of the requested value, every scope override and the number
/// of processors; never less than one.
pub fn effective_parallelism(requested: Option<usize>, units: &[ExecutionUnit], cpus: usize) -> usize {
    let scope_limit = units.iter().filter_map(|u| u.scope.parallelism).min();
    [requested, scope_limit, Some(cpus)]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(1)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(dir: &str, batching: bool, parallelism: Option<usize>) -> Arc<SettingsScope> {
        Arc::new(SettingsScope {
            settings_dir: Some(PathBuf::from(dir)),
            enable_test_file_batching: Some(batching),
            parallelism,
            ..Default::default()
        })
    }

    fn file(path: &str, scope: &Arc<SettingsScope>) -> DiscoveredFile {
        DiscoveredFile {
            path: PathBuf::from(path),
            scope: scope.clone(),
        }
    }

    #[test]
    fn test_batched_scope_forms_one_unit() {
        let batched = scope("/proj/a", true, None);
        let single = scope("/proj/b", false, None);
        let units = plan(vec![
            file("/proj/a/1.js", &batched),
            file("/proj/b/1.js", &single),
            file("/proj/a/2.js", &batched),
            file("/proj/b/2.js", &single),
        ]);

        assert_eq!(units.len(), 3);
        assert_eq!(
            units[0].files,
            vec![PathBuf::from("/proj/a/1.js"), PathBuf::from("/proj/a/2.js")]
        );
        assert_eq!(units[1].files, vec![PathBuf::from("/proj/b/1.js")]);
        assert_eq!(units[2].files, vec![PathBuf::from("/proj/b/2.js")]);
    }

    #[test]
    fn test_parallelism_is_most_restrictive() {
        let units = vec![
            ExecutionUnit {
                scope: scope("/a", false, Some(3)),
                files: vec![],
            },
            ExecutionUnit {
                scope: scope("/b", false, Some(2)),
                files: vec![],
            },
        ];
        assert_eq!(effective_parallelism(Some(8), &units, 16), 2);
        assert_eq!(effective_parallelism(Some(1), &units, 16), 1);
        assert_eq!(effective_parallelism(None, &[], 4), 4);
        assert_eq!(effective_parallelism(Some(0), &[], 4), 1);
    }
}
