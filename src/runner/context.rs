//! Built test contexts
//!
//! A [`TestContext`] is everything needed to render and run one unit's
//! harness: its scope, framework, the flattened reference list and where the
//! harness goes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use url::Url;

use super::planner::ExecutionUnit;
use super::server::WebServerHandle;
use crate::common::{Error, Result};
use crate::framework::{self, FrameworkDefinition};
use crate::fs::FileSystem;
use crate::protocol::StreamContext;
use crate::references::{assign_amd_paths, ReferenceGraphResolver, ReferencedFile};
use crate::settings::{HarnessLocationMode, HarnessReferenceMode, SettingsScope};

/// One unit, ready for compile and execution
#[derive(Clone)]
pub struct TestContext {
    /// Position of the unit in the plan
    pub id: usize,
    pub input_files: Vec<PathBuf>,
    pub scope: Arc<SettingsScope>,
    pub framework: Option<Arc<dyn FrameworkDefinition>>,
    /// Flattened, dependency-ordered references including the files under test
    pub references: Vec<ReferencedFile>,
    pub harness_dir: PathBuf,
    /// Set once the harness has been written
    pub harness_path: Option<PathBuf>,
    pub server: Option<WebServerHandle>,
    /// Set when rendering the harness failed; cleanup skips such units
    pub harness_creation_failed: bool,
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("id", &self.id)
            .field("input_files", &self.input_files)
            .field("framework", &self.framework.as_ref().map(|fw| fw.name().to_string()))
            .field("references", &self.references.len())
            .field("harness_dir", &self.harness_dir)
            .field("harness_path", &self.harness_path)
            .field("server", &self.server)
            .finish()
    }
}

impl TestContext {
    /// Whether this unit's scope asks for its harness to be served over HTTP
    pub fn wants_server(&self) -> bool {
        self.scope.server_enabled()
    }

    /// Fill in AMD module paths when the scope loads references through AMD
    pub fn assign_amd_paths(&mut self) {
        if self.scope.reference_mode() == HarnessReferenceMode::Amd {
            assign_amd_paths(&mut self.references, &self.harness_dir, &self.scope);
        }
    }

    /// URL the runner or browser should open
    ///
    /// HTTP when a server is attached, `file://` otherwise.
    pub fn harness_url(&self) -> Result<String> {
        let harness = self
            .harness_path
            .as_deref()
            .ok_or_else(|| Error::Harness("Harness has not been built".to_string()))?;
        let url = match &self.server {
            Some(server) => server.url_for(harness)?,
            None => Url::from_file_path(harness).map_err(|_| {
                Error::Harness(format!("'{}' cannot be expressed as a file URL", harness.display()))
            })?,
        };
        Ok(url.into())
    }

    /// Attribution data for the unit's event stream
    pub fn stream_context(&self) -> StreamContext {
        StreamContext::from_references(self.input_files.clone(), &self.references)
    }
}

/// Builds contexts from planned units
pub struct ContextBuilder {
    graph: ReferenceGraphResolver,
    frameworks: Vec<Arc<dyn FrameworkDefinition>>,
}

impl ContextBuilder {
    pub fn new(fs: Arc<dyn FileSystem>, frameworks: Vec<Arc<dyn FrameworkDefinition>>) -> Self {
        Self {
            graph: ReferenceGraphResolver::new(fs),
            frameworks,
        }
    }

    /// Expand the unit's references and choose its harness location
    pub fn build(&self, unit: ExecutionUnit, id: usize) -> Result<TestContext> {
        let framework = framework::select(&self.frameworks, &unit.scope);
        let references = self
            .graph
            .expand(&unit.files, &unit.scope, framework.as_deref())?;
        let harness_dir = harness_dir(&unit.scope, &unit.files)?;

        tracing::debug!(
            unit = id,
            files = unit.files.len(),
            references = references.len(),
            harness_dir = %harness_dir.display(),
            "built test context"
        );
        Ok(TestContext {
            id,
            input_files: unit.files,
            scope: unit.scope,
            framework,
            references,
            harness_dir,
            harness_path: None,
            server: None,
            harness_creation_failed: false,
        })
    }
}

/// Directory the harness is written to, per `TestHarnessLocationMode`
pub fn harness_dir(scope: &SettingsScope, files: &[PathBuf]) -> Result<PathBuf> {
    let adjacent = files
        .first()
        .and_then(|f| f.parent())
        .map(Path::to_path_buf)
        .ok_or_else(|| Error::Internal("Execution unit without files".to_string()))?;

    let dir = match scope.harness_location_mode() {
        HarnessLocationMode::TestFileAdjacent => None,
        HarnessLocationMode::SettingsFileAdjacent => scope.settings_dir().map(Path::to_path_buf),
        HarnessLocationMode::Custom => scope.test_harness_directory.as_deref().map(PathBuf::from),
    };
    Ok(dir.unwrap_or(adjacent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_dir_modes() {
        let files = vec![PathBuf::from("/proj/tests/a.js")];
        let mut scope = SettingsScope {
            settings_dir: Some(PathBuf::from("/proj")),
            test_harness_directory: Some("/proj/out".into()),
            ..Default::default()
        };
        assert_eq!(harness_dir(&scope, &files).unwrap(), PathBuf::from("/proj/tests"));

        scope.test_harness_location_mode = Some(HarnessLocationMode::SettingsFileAdjacent);
        assert_eq!(harness_dir(&scope, &files).unwrap(), PathBuf::from("/proj"));

        scope.test_harness_location_mode = Some(HarnessLocationMode::Custom);
        assert_eq!(harness_dir(&scope, &files).unwrap(), PathBuf::from("/proj/out"));

        assert!(harness_dir(&scope, &[]).is_err());
    }

    #[test]
    fn test_harness_url_file_and_server() {
        let mut context = TestContext {
            id: 0,
            input_files: vec![PathBuf::from("/proj/a.js")],
            scope: Arc::new(SettingsScope::default()),
            framework: None,
            references: Vec::new(),
            harness_dir: PathBuf::from("/proj"),
            harness_path: None,
            server: None,
            harness_creation_failed: false,
        };
        assert!(context.harness_url().is_err());

        context.harness_path = Some(PathBuf::from("/proj/_jsharness.a.test.html"));
        #[cfg(unix)]
        assert_eq!(context.harness_url().unwrap(), "file:///proj/_jsharness.a.test.html");

        context.server = Some(WebServerHandle {
            root: PathBuf::from("/proj"),
            port: 9100,
        });
        assert_eq!(
            context.harness_url().unwrap(),
            "http://localhost:9100/_jsharness.a.test.html"
        );
    }
}
