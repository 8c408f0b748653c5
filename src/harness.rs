//! Harness documents
//!
//! The harness is the HTML page the runner loads. [`BasicHarnessBuilder`]
//! writes one next to the unit's chosen harness directory, with every
//! reference in dependency order. A scope can supply its own template via
//! `CustomTestHarnessPath`, and otherwise the unit's framework may name one.
//! These placeholders are replaced:
//!
//! | Placeholder | Content |
//! |---|---|
//! | `@@Title@@` | file names of the unit |
//! | `@@Stylesheets@@` | `<link>` tags for referenced CSS |
//! | `@@FrameworkFiles@@` | framework scripts |
//! | `@@ReferencedFiles@@` | dependency scripts |
//! | `@@TestFiles@@` | files under test, or the AMD `require` call |
//! | `@@Templates@@` | HTML templates |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::common::paths::{extension_of, relative_to, to_forward_slashes};
use crate::common::{Error, Result};
use crate::fs::FileSystem;
use crate::references::{ReferencedFile, TEMP_FILE_PREFIX};
use crate::runner::TestContext;
use crate::settings::{HarnessReferenceMode, TemplateMode};

const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8" />
    <title>@@Title@@</title>
@@Stylesheets@@
@@FrameworkFiles@@
@@ReferencedFiles@@
</head>
<body>
@@Templates@@
@@TestFiles@@
</body>
</html>
"#;

/// Renders and removes harness documents
pub trait HarnessBuilder: Send + Sync {
    /// Write the harness for `context` and return its path
    fn build(&self, context: &TestContext) -> Result<PathBuf>;

    /// Remove whatever `build` left on disk
    fn cleanup(&self, context: &TestContext) -> Result<()>;
}

/// Writes a plain HTML harness through the [`FileSystem`]
pub struct BasicHarnessBuilder {
    fs: Arc<dyn FileSystem>,
}

impl BasicHarnessBuilder {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    fn template(&self, context: &TestContext) -> Result<String> {
        let path = context
            .scope
            .custom_test_harness_path
            .as_deref()
            .map(Path::new)
            .or_else(|| context.framework.as_deref().and_then(|f| f.harness_template()));
        match path {
            Some(path) => self.fs.read_text(path).map_err(|e| {
                Error::Harness(format!("Cannot read harness template '{}': {}", path.display(), e))
            }),
            None => Ok(DEFAULT_TEMPLATE.to_string()),
        }
    }

    fn render(&self, context: &TestContext) -> Result<String> {
        let dir = &context.harness_dir;
        let amd = context.scope.reference_mode() == HarnessReferenceMode::Amd;

        let mut stylesheets = Vec::new();
        let mut framework = Vec::new();
        let mut referenced = Vec::new();
        let mut tests = Vec::new();
        let mut templates = Vec::new();
        let mut modules = Vec::new();

        for file in context.references.iter().filter(|f| f.include_in_harness) {
            if let Some(options) = &file.template {
                let body = self.fs.read_text(Path::new(&file.path))?;
                templates.push(match options.mode {
                    TemplateMode::Raw => body,
                    TemplateMode::Script => format!(
                        "<script id=\"{}\" type=\"{}\">\n{}\n</script>",
                        options.id.as_deref().unwrap_or_default(),
                        options.script_type.as_deref().unwrap_or("text/html"),
                        body
                    ),
                });
                continue;
            }

            let src = source_of(file, dir);
            if is_stylesheet(file) {
                stylesheets.push(format!("    <link rel=\"stylesheet\" href=\"{}\" />", src));
            } else if file.is_test_framework_file {
                framework.push(script_tag(&src));
            } else if file.is_file_under_test {
                match (amd, file.amd_path.as_deref()) {
                    (true, Some(module)) => modules.push(format!("\"{}\"", module)),
                    _ => tests.push(script_tag(&src)),
                }
            } else if amd && file.amd_path.is_some() {
                // Loaded on demand by the module loader
                continue;
            } else {
                referenced.push(script_tag(&src));
            }
        }
        if !modules.is_empty() {
            tests.push(format!("    <script>require([{}]);</script>", modules.join(", ")));
        }

        let title = context
            .input_files
            .iter()
            .filter_map(|f| f.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(", ");

        Ok(self
            .template(context)?
            .replace("@@Title@@", &title)
            .replace("@@Stylesheets@@", &stylesheets.join("\n"))
            .replace("@@FrameworkFiles@@", &framework.join("\n"))
            .replace("@@ReferencedFiles@@", &referenced.join("\n"))
            .replace("@@Templates@@", &templates.join("\n"))
            .replace("@@TestFiles@@", &tests.join("\n")))
    }
}

impl HarnessBuilder for BasicHarnessBuilder {
    fn build(&self, context: &TestContext) -> Result<PathBuf> {
        let html = self.render(context)?;
        let path = context.harness_dir.join(harness_file_name(context));
        self.fs
            .write_text(&path, &html)
            .map_err(|e| Error::Harness(format!("Cannot write '{}': {}", path.display(), e)))?;
        tracing::debug!(harness = %path.display(), "harness written");
        Ok(path)
    }

    fn cleanup(&self, context: &TestContext) -> Result<()> {
        if let Some(path) = &context.harness_path {
            if self.fs.is_file(path) {
                self.fs.remove_file(path)?;
            }
        }
        Ok(())
    }
}

/// `_jsharness.<stem>.test.html` for single files, one name per batch otherwise
pub fn harness_file_name(context: &TestContext) -> String {
    match context.input_files.as_slice() {
        [single] => {
            let stem = single
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            format!("{}{}.test.html", TEMP_FILE_PREFIX, stem)
        }
        _ => format!("{}batch{}.test.html", TEMP_FILE_PREFIX, context.id),
    }
}

fn source_of(file: &ReferencedFile, harness_dir: &Path) -> String {
    if !file.is_local {
        return file.path.clone();
    }
    to_forward_slashes(&relative_to(harness_dir, &file.effective_path()))
}

fn is_stylesheet(file: &ReferencedFile) -> bool {
    extension_of(Path::new(&file.path)).is_some_and(|e| e == ".css")
}

fn script_tag(src: &str) -> String {
    format!("    <script type=\"text/javascript\" src=\"{}\"></script>", src)
}
