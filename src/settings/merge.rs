//! Inheritance merge rules
//!
//! Scalars: the child keeps its value when set, otherwise adopts the parent's.
//! Lists: parent entries come first, then the child's.
//! Maps: child keys win, parent entries fill the gaps.

use super::types::{CompileSettings, SettingsScope};

fn adopt<T: Clone>(child: &mut Option<T>, parent: &Option<T>) {
    if child.is_none() {
        child.clone_from(parent);
    }
}

fn prepend<T: Clone>(child: &mut Vec<T>, parent: &[T]) {
    if parent.is_empty() {
        return;
    }
    let mut merged = parent.to_vec();
    merged.append(child);
    *child = merged;
}

impl SettingsScope {
    /// Merge values from `parent` into this scope
    pub fn inherit_from(&mut self, parent: &SettingsScope) {
        adopt(&mut self.framework, &parent.framework);
        adopt(&mut self.enable_test_file_batching, &parent.enable_test_file_batching);
        adopt(&mut self.parallelism, &parent.parallelism);
        adopt(&mut self.test_file_timeout, &parent.test_file_timeout);
        adopt(&mut self.test_pattern, &parent.test_pattern);
        adopt(&mut self.test_harness_location_mode, &parent.test_harness_location_mode);
        adopt(&mut self.test_harness_directory, &parent.test_harness_directory);
        adopt(&mut self.test_harness_reference_mode, &parent.test_harness_reference_mode);
        adopt(&mut self.root_reference_path_mode, &parent.root_reference_path_mode);
        adopt(&mut self.custom_test_harness_path, &parent.custom_test_harness_path);
        adopt(
            &mut self.code_coverage_success_percentage,
            &parent.code_coverage_success_percentage,
        );
        adopt(&mut self.amd_base_url, &parent.amd_base_url);
        adopt(&mut self.amd_app_directory, &parent.amd_app_directory);
        adopt(&mut self.amd_base_path, &parent.amd_base_path);
        adopt(&mut self.user_agent, &parent.user_agent);
        adopt(
            &mut self.ignore_resource_loading_errors,
            &parent.ignore_resource_loading_errors,
        );
        adopt(&mut self.enable_tracing, &parent.enable_tracing);
        adopt(&mut self.trace_file_path, &parent.trace_file_path);

        prepend(&mut self.references, &parent.references);
        prepend(&mut self.code_coverage_includes, &parent.code_coverage_includes);
        prepend(&mut self.code_coverage_excludes, &parent.code_coverage_excludes);
        prepend(&mut self.code_coverage_ignores, &parent.code_coverage_ignores);
        prepend(&mut self.transforms, &parent.transforms);

        for (key, value) in &parent.browser_arguments {
            self.browser_arguments
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }

        if let Some(parent_compile) = parent.compile.as_ref() {
            match self.compile.as_mut() {
                Some(compile) => compile.inherit_from(parent_compile),
                None => self.compile = Some(parent_compile.clone()),
            }
        }

        let parent_forced = parent.server.as_ref().is_some_and(|s| s.forced);
        if parent_forced || self.server.is_none() {
            self.server.clone_from(&parent.server);
        }
    }
}

impl CompileSettings {
    fn inherit_from(&mut self, parent: &CompileSettings) {
        adopt(&mut self.mode, &parent.mode);
        adopt(&mut self.executable, &parent.executable);
        adopt(&mut self.arguments, &parent.arguments);
        adopt(&mut self.working_directory, &parent.working_directory);
        adopt(&mut self.timeout, &parent.timeout);
        adopt(&mut self.extensions, &parent.extensions);
        adopt(&mut self.extensions_with_no_output, &parent.extensions_with_no_output);
        adopt(&mut self.use_source_maps, &parent.use_source_maps);
        adopt(&mut self.skip_if_unchanged, &parent.skip_if_unchanged);
        // Child mappings are consulted first
        self.paths.extend(parent.paths.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::types::{CompilePathMap, ReferenceDeclaration, ServerSettings};

    fn reference(path: &str) -> ReferenceDeclaration {
        serde_json::from_value(serde_json::json!({ "Path": path })).unwrap()
    }

    #[test]
    fn test_scalars_child_wins_unless_unset() {
        let mut child = SettingsScope {
            parallelism: Some(2),
            ..Default::default()
        };
        let parent = SettingsScope {
            parallelism: Some(8),
            test_file_timeout: Some(500),
            ..Default::default()
        };
        child.inherit_from(&parent);
        assert_eq!(child.parallelism, Some(2));
        assert_eq!(child.test_file_timeout, Some(500));
    }

    #[test]
    fn test_lists_prepend_parent_and_maps_fill_gaps() {
        let mut child = SettingsScope {
            references: vec![reference("/child.js")],
            ..Default::default()
        };
        child.browser_arguments.insert("chrome".into(), "child".into());
        let mut parent = SettingsScope {
            references: vec![reference("/parent.js")],
            ..Default::default()
        };
        parent.browser_arguments.insert("chrome".into(), "parent".into());
        parent.browser_arguments.insert("firefox".into(), "parent".into());

        child.inherit_from(&parent);

        let paths: Vec<_> = child
            .references
            .iter()
            .map(|r| r.path.clone().unwrap())
            .collect();
        assert_eq!(paths, vec!["/parent.js", "/child.js"]);
        assert_eq!(child.browser_arguments["chrome"], "child");
        assert_eq!(child.browser_arguments["firefox"], "parent");
    }

    #[test]
    fn test_compile_merges_fields_and_paths_child_first() {
        let map = |s: &str| CompilePathMap {
            source_path: Some(s.to_string()),
            output_path: None,
        };
        let mut child = SettingsScope {
            compile: Some(CompileSettings {
                arguments: Some("--child".into()),
                paths: vec![map("/c")],
                ..Default::default()
            }),
            ..Default::default()
        };
        let parent = SettingsScope {
            compile: Some(CompileSettings {
                executable: Some("tsc".into()),
                arguments: Some("--parent".into()),
                paths: vec![map("/p")],
                ..Default::default()
            }),
            ..Default::default()
        };

        child.inherit_from(&parent);

        let compile = child.compile.unwrap();
        assert_eq!(compile.executable.as_deref(), Some("tsc"));
        assert_eq!(compile.arguments.as_deref(), Some("--child"));
        assert_eq!(compile.paths, vec![map("/c"), map("/p")]);
    }

    #[test]
    fn test_server_kept_unless_parent_forced() {
        let own = ServerSettings {
            enabled: Some(false),
            ..Default::default()
        };
        let mut child = SettingsScope {
            server: Some(own.clone()),
            ..Default::default()
        };
        let parent = SettingsScope {
            server: Some(ServerSettings {
                enabled: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        child.inherit_from(&parent);
        assert_eq!(child.server, Some(own));

        let forced = SettingsScope {
            server: Some(ServerSettings::forced(Some(9000), None)),
            ..Default::default()
        };
        child.inherit_from(&forced);
        assert!(child.server.as_ref().unwrap().forced);
        assert!(child.server_enabled());
    }
}
