//! Command-line front end
//!
//! Parses arguments into [`RunOptions`], wires the orchestrator with the
//! standard collaborators and renders progress and the final summary.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::common::config::{Config, FrameworkConfig};
use crate::common::logging;
use crate::common::{Error, Result, RunError};
use crate::framework::DeclaredFramework;
use crate::fs::FileSystem;
use crate::protocol::{TestCase, TestError, TestLog, TestSummary};
use crate::runner::{
    LaunchMode, RunCallback, RunOptions, RunOrchestrator, RunOutcome, TestExecutionMode, TestingMode,
};
use crate::settings::{SettingsEnvironment, SettingsEnvironments, SettingsResolver};

#[derive(Parser, Debug)]
#[command(name = "jsharness", about = "Run JavaScript tests in a headless browser")]
#[command(version, long_about = None)]
pub struct Cli {
    /// Test files, directories or jsharness.json files
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Maximum number of units run at once (default: number of CPUs)
    #[arg(long)]
    pub parallelism: Option<usize>,

    /// Per-file timeout in milliseconds
    #[arg(long = "timeout", value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Stop building units after this many
    #[arg(long)]
    pub file_search_limit: Option<usize>,

    /// Open each harness in a browser instead of running headless
    #[arg(long)]
    pub open_in_browser: bool,

    /// List tests without running them
    #[arg(long)]
    pub discover: bool,

    /// Which test files to pick up
    #[arg(long, value_enum, default_value_t = ModeArg::All)]
    pub mode: ModeArg,

    /// Settings variables for a directory: DIR;NAME=VALUE;...
    /// Can be specified multiple times
    #[arg(long = "env", value_name = "DIR;NAME=VALUE")]
    pub environments: Vec<String>,

    /// Write a detailed trace log to FILE
    #[arg(long, value_name = "FILE")]
    pub trace: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Js,
    Ts,
    Coffee,
    Html,
    All,
}

impl From<ModeArg> for TestingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Js => TestingMode::JavaScript,
            ModeArg::Ts => TestingMode::TypeScript,
            ModeArg::Coffee => TestingMode::CoffeeScript,
            ModeArg::Html => TestingMode::Html,
            ModeArg::All => TestingMode::All,
        }
    }
}

impl Cli {
    /// Run options: config file values overridden by flags
    pub fn options(&self, config: &Config) -> Result<RunOptions> {
        let mut options = RunOptions::from_config(config);
        if self.parallelism.is_some() {
            options.parallelism = self.parallelism;
        }
        if self.timeout_ms.is_some() {
            options.timeout_ms = self.timeout_ms;
        }
        if let Some(limit) = self.file_search_limit {
            options.file_search_limit = limit;
        }
        if self.open_in_browser {
            options.launch_mode = LaunchMode::FullBrowser;
        }
        if self.discover {
            options.execution_mode = TestExecutionMode::Discovery;
        }
        options.testing_mode = self.mode.into();
        options.environments = SettingsEnvironments(
            self.environments
                .iter()
                .map(|e| parse_environment(e))
                .collect::<Result<_>>()?,
        );
        Ok(options)
    }
}

/// Parse `DIR;NAME=VALUE;...`
pub fn parse_environment(value: &str) -> Result<SettingsEnvironment> {
    let mut parts = value.split(';').filter(|p| !p.trim().is_empty());
    let dir = parts
        .next()
        .ok_or_else(|| Error::Config(format!("Empty environment '{}'", value)))?;

    let mut environment = SettingsEnvironment::new(dir.trim());
    for property in parts {
        let (name, value) = property.split_once('=').ok_or_else(|| {
            Error::Config(format!("Expected NAME=VALUE in environment, got '{}'", property))
        })?;
        environment = environment.with_property(name.trim(), value);
    }
    Ok(environment)
}

fn framework_from_config(config: &FrameworkConfig) -> Result<Option<DeclaredFramework>> {
    let Some(name) = config.name.as_deref() else {
        return Ok(None);
    };
    let mut framework = DeclaredFramework::new(name)
        .with_dependencies(config.dependencies.clone())
        .with_known_files(config.known_files.as_slice());
    if let Some(pattern) = config.test_pattern.as_deref() {
        framework = framework.with_test_pattern(pattern)?;
    }
    if let Some(template) = &config.harness_template {
        framework = framework.with_harness_template(template);
    }
    Ok(Some(framework))
}

/// Trace file for this invocation
///
/// `--trace` wins; otherwise the settings governing the first path may turn
/// tracing on with `EnableTracing`.
pub fn trace_file(cli: &Cli, options: &RunOptions, settings: &SettingsResolver) -> Option<PathBuf> {
    if let Some(path) = &cli.trace {
        return Some(path.clone());
    }
    let first = cli.paths.first()?;
    let dir = if first.is_dir() {
        first.as_path()
    } else {
        first.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."))
    };
    let scope = settings.resolve(dir, Some(&options.environments)).ok()?;
    logging::trace_file_for(&scope)
}

/// Run the tests named on the command line
///
/// Returns whether every test passed and no unit failed.
pub async fn run(
    cli: &Cli,
    config: &Config,
    options: &RunOptions,
    fs: Arc<dyn FileSystem>,
    settings: Arc<SettingsResolver>,
) -> Result<bool> {
    let mut orchestrator = RunOrchestrator::new(fs, settings);
    if let Some(framework) = framework_from_config(&config.framework)? {
        orchestrator = orchestrator.with_framework(Arc::new(framework));
    }

    let callback = ConsoleCallback::new(cli.discover);
    let started = Instant::now();
    let outcome = orchestrator.run(&cli.paths, options, &callback).await?;

    if cli.discover {
        print_discovered(&outcome.summary);
    }
    print_summary(&outcome, started.elapsed());
    Ok(outcome.succeeded())
}

/// Progress display for a terminal
pub struct ConsoleCallback {
    progress: ProgressBar,
    failed: AtomicUsize,
    quiet: bool,
}

impl ConsoleCallback {
    pub fn new(quiet: bool) -> Self {
        let progress = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("  {spinner:.cyan} {pos} tests {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        progress.set_style(style);
        Self {
            progress,
            failed: AtomicUsize::new(0),
            quiet,
        }
    }
}

impl RunCallback for ConsoleCallback {
    fn test_suite_started(&self) {
        self.progress.enable_steady_tick(Duration::from_millis(100));
    }

    fn test_suite_finished(&self, _summary: &TestSummary) {
        self.progress.finish_and_clear();
    }

    fn test_finished(&self, test: &TestCase) {
        self.progress.inc(1);
        if self.quiet || test.passed() {
            return;
        }
        let failed = self.failed.fetch_add(1, Ordering::SeqCst) + 1;
        self.progress.set_message(format!("({} failed)", failed).red().to_string());
        self.progress.println(format!("  {} {}", "✗".red(), test_label(test)));
        for result in test.test_results.iter().filter(|r| !r.passed) {
            if let Some(message) = &result.message {
                self.progress.println(format!("      {}", message.dimmed()));
            }
        }
    }

    fn file_log(&self, log: &TestLog) {
        if !self.quiet {
            self.progress.println(format!("  {} {}", "log".dimmed(), log.message));
        }
    }

    fn file_error(&self, error: &TestError) {
        self.progress.println(format!("  {} {}", "error".red().bold(), error.message));
    }

    fn exception_thrown(&self, error: &RunError) {
        let files = error
            .input_files
            .iter()
            .map(|f| f.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.progress.println(format!(
            "  {} {:?} {}: {}",
            "!".yellow().bold(),
            error.kind,
            files.dimmed(),
            error.message
        ));
    }
}

fn test_label(test: &TestCase) -> String {
    let name = match &test.module_name {
        Some(module) if !module.is_empty() => format!("{} > {}", module, test.test_name),
        _ => test.test_name.clone(),
    };
    match (&test.input_test_file, test.line) {
        (Some(file), Some(line)) => format!("{} {}", name, format!("({}:{})", file.display(), line).dimmed()),
        (Some(file), None) => format!("{} {}", name, format!("({})", file.display()).dimmed()),
        _ => name,
    }
}

fn print_discovered(summary: &TestSummary) {
    println!("\n{}", "Discovered tests:".blue().bold());
    for test in &summary.tests {
        println!("  {}", test_label(test));
    }
}

fn print_summary(outcome: &RunOutcome, elapsed: Duration) {
    let summary = &outcome.summary;
    let passed = summary.passed_count();
    let failed = summary.failed_count();

    println!();
    if outcome.succeeded() {
        println!("{} {}", "✓".green().bold(), "All tests passed".green().bold());
    } else {
        println!("{} {}", "✗".red().bold(), "Test run failed".red().bold());
    }
    println!(
        "  {} passed, {} failed, {} errors, {} run errors ({:.2}s)",
        passed.to_string().green(),
        if failed > 0 { failed.to_string().red() } else { failed.to_string().normal() },
        summary.errors.len(),
        outcome.errors.len(),
        elapsed.as_secs_f64()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_environment() {
        let env = parse_environment("/proj;Root=/srv/app;Empty=").unwrap();
        assert_eq!(env.path, PathBuf::from("/proj"));
        assert_eq!(env.properties.get("Root").map(String::as_str), Some("/srv/app"));
        assert_eq!(env.properties.get("Empty").map(String::as_str), Some(""));

        assert!(matches!(parse_environment("/proj;novalue"), Err(Error::Config(_))));
        assert!(parse_environment(";;").is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let config = Config::parse("[defaults]\nparallelism = 8\ntimeout_ms = 1000\n").unwrap();
        let cli = Cli::try_parse_from([
            "jsharness",
            "tests",
            "--parallelism",
            "2",
            "--discover",
            "--mode",
            "ts",
            "--env",
            "/proj;Out=dist",
        ])
        .unwrap();

        let options = cli.options(&config).unwrap();
        assert_eq!(options.parallelism, Some(2));
        assert_eq!(options.timeout_ms, Some(1000));
        assert_eq!(options.execution_mode, TestExecutionMode::Discovery);
        assert_eq!(options.testing_mode, TestingMode::TypeScript);
        assert_eq!(options.environments.0.len(), 1);
        assert!(options.launch_mode.is_headless());
    }

    #[test]
    fn test_paths_are_required() {
        assert!(Cli::try_parse_from(["jsharness"]).is_err());
    }

    #[test]
    fn test_trace_file_from_flag_or_settings() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(crate::settings::SETTINGS_FILE_NAME),
            r#"{ "EnableTracing": true, "TraceFilePath": "logs/run.trace" }"#,
        )
        .unwrap();
        std::fs::write(tmp.path().join("a.spec.js"), "").unwrap();
        let test_file = tmp.path().join("a.spec.js");

        let fs: Arc<dyn FileSystem> = Arc::new(crate::fs::StdFileSystem);
        let settings = SettingsResolver::new(fs);
        let options = RunOptions::default();

        let file_arg = test_file.to_str().unwrap();
        let cli = Cli::try_parse_from(["jsharness", file_arg]).unwrap();
        let trace = trace_file(&cli, &options, &settings).unwrap();
        assert!(trace.starts_with(tmp.path()));
        assert!(trace.ends_with("logs/run.trace"));

        let cli = Cli::try_parse_from(["jsharness", file_arg, "--trace", "/tmp/flag.log"]).unwrap();
        assert_eq!(trace_file(&cli, &options, &settings), Some(PathBuf::from("/tmp/flag.log")));

        let plain = tempfile::TempDir::new().unwrap();
        let cli = Cli::try_parse_from(["jsharness", plain.path().to_str().unwrap()]).unwrap();
        assert_eq!(trace_file(&cli, &options, &settings), None);
    }

    #[test]
    fn test_framework_from_config() {
        let config = Config::parse("[framework]\nname = \"qunit\"\ntest_pattern = \"QUnit\\\\.test\\\\(\"\n").unwrap();
        let framework = framework_from_config(&config.framework).unwrap().unwrap();
        use crate::framework::FrameworkDefinition;
        assert_eq!(framework.name(), "qunit");
        assert!(framework.test_pattern().is_some());

        assert!(framework_from_config(&FrameworkConfig::default()).unwrap().is_none());
    }
}
