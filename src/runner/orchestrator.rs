//! Run orchestration
//!
//! A run goes through fixed phases: discovery, planning, context building
//! (bounded parallelism, capped by the file search limit), batch compile,
//! shared web server setup, execution (bounded parallelism) and cleanup.
//! Failures inside a unit become [`RunError`]s reported through the
//! callback; they never stop sibling units. Only a missing runner executable
//! stops the run before anything executes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tokio::io::BufReader;
use tokio::time::Instant;

use super::callback::RunCallback;
use super::compile::{split_arguments, BatchCompiler};
use super::context::{ContextBuilder, TestContext};
use super::discovery::TestDiscovery;
use super::launcher::{platform_opener, ProcessLauncher, ProcessSpec, TokioProcessLauncher};
use super::options::{LaunchMode, RunOptions, RunnerCommand};
use super::planner::{effective_parallelism, plan, ExecutionUnit};
use super::server::{ReusingServerHost, StaticFileHost, WebServerHandle, WebServerHost};
use crate::common::config::locate;
use crate::common::{Error, Result, RunError, RunErrorKind};
use crate::framework::FrameworkDefinition;
use crate::fs::FileSystem;
use crate::harness::{BasicHarnessBuilder, HarnessBuilder};
use crate::protocol::{ProtocolReader, StreamEnd, TestSummary};
use crate::settings::SettingsResolver;

/// Exit code the headless runner uses for a timeout
pub const RUNNER_TIMEOUT_EXIT_CODE: i32 = 2;

/// Slack on top of the per-file timeout before the runner is killed
const RUNNER_GRACE: Duration = Duration::from_millis(5_000);

/// Everything a run produced
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub summary: TestSummary,
    pub errors: Vec<RunError>,
}

impl RunOutcome {
    /// No failed test and no error of any kind
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty() && self.summary.succeeded()
    }
}

/// Mutable state owned by one run
#[derive(Default)]
struct RunState {
    summary: TestSummary,
    errors: Vec<RunError>,
    server: Option<WebServerHandle>,
}

impl RunState {
    fn fail(&mut self, callback: &dyn RunCallback, error: RunError) {
        tracing::warn!(kind = ?error.kind, files = ?error.input_files, "{}", error.message);
        callback.exception_thrown(&error);
        self.errors.push(error);
    }
}

/// Plans and executes test runs
pub struct RunOrchestrator {
    fs: Arc<dyn FileSystem>,
    settings: Arc<SettingsResolver>,
    frameworks: Vec<Arc<dyn FrameworkDefinition>>,
    launcher: Arc<dyn ProcessLauncher>,
    harness: Arc<dyn HarnessBuilder>,
    server_host: Arc<dyn WebServerHost>,
    runner_grace: Duration,
    cpus: usize,
}

impl RunOrchestrator {
    pub fn new(fs: Arc<dyn FileSystem>, settings: Arc<SettingsResolver>) -> Self {
        Self {
            harness: Arc::new(BasicHarnessBuilder::new(fs.clone())),
            fs,
            settings,
            frameworks: Vec::new(),
            launcher: Arc::new(TokioProcessLauncher),
            server_host: Arc::new(ReusingServerHost::new(StaticFileHost::default())),
            runner_grace: RUNNER_GRACE,
            cpus: num_cpus::get(),
        }
    }

    pub fn with_framework(mut self, framework: Arc<dyn FrameworkDefinition>) -> Self {
        self.frameworks.push(framework);
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_harness_builder(mut self, harness: Arc<dyn HarnessBuilder>) -> Self {
        self.harness = harness;
        self
    }

    pub fn with_server_host(mut self, host: Arc<dyn WebServerHost>) -> Self {
        self.server_host = host;
        self
    }

    /// Time a headless runner gets beyond its per-file timeouts before it is killed
    pub fn with_runner_grace(mut self, grace: Duration) -> Self {
        self.runner_grace = grace;
        self
    }

    pub fn settings(&self) -> &SettingsResolver {
        &self.settings
    }

    /// Discover, plan and execute the tests under `paths`
    ///
    /// The summary is returned even when units failed; their failures are in
    /// [`RunOutcome::errors`].
    pub async fn run(
        &self,
        paths: &[PathBuf],
        options: &RunOptions,
        callback: &dyn RunCallback,
    ) -> Result<RunOutcome> {
        let runner = check_setup(options)?;
        callback.test_suite_started();
        let mut state = RunState::default();

        let discovery = TestDiscovery::new(
            self.fs.as_ref(),
            &self.settings,
            options.testing_mode,
            &options.environments,
        )
        .discover(paths);
        for error in discovery.errors {
            state.fail(callback, error);
        }

        let units = plan(discovery.files);
        let parallelism = effective_parallelism(options.parallelism, &units, self.cpus);
        tracing::info!(units = units.len(), parallelism, "planned test run");

        let mut contexts = self
            .build_contexts(units, parallelism, options.file_search_limit, &mut state, callback)
            .await;

        self.compile(&mut contexts, &mut state, callback).await;
        self.attach_server(&mut contexts, &mut state, callback).await;

        let outcomes = stream::iter(contexts.iter_mut())
            .map(|context| self.execute(context, options, &runner, callback))
            .buffer_unordered(parallelism)
            .collect::<Vec<_>>()
            .await;
        for (summary, errors) in outcomes {
            state.summary.append(summary);
            state.errors.extend(errors);
        }

        // A browser opened by the user still needs the files and the server
        if options.launch_mode.is_headless() {
            for context in contexts.iter().filter(|c| !c.harness_creation_failed) {
                if let Err(e) = self.harness.cleanup(context) {
                    tracing::warn!(unit = context.id, "harness cleanup failed: {}", e);
                }
            }
            if let Some(server) = &state.server {
                if let Err(e) = self.server_host.dispose(server).await {
                    tracing::warn!(port = server.port, "failed to stop web server: {}", e);
                }
            }
        }

        tracing::info!(
            passed = state.summary.passed_count(),
            failed = state.summary.failed_count(),
            errors = state.errors.len(),
            "test run finished"
        );
        callback.test_suite_finished(&state.summary);
        Ok(RunOutcome {
            summary: state.summary,
            errors: state.errors,
        })
    }

    /// Build contexts with bounded parallelism until the file search limit is hit
    async fn build_contexts(
        &self,
        units: Vec<ExecutionUnit>,
        parallelism: usize,
        file_search_limit: usize,
        state: &mut RunState,
        callback: &dyn RunCallback,
    ) -> Vec<TestContext> {
        let builder = Arc::new(ContextBuilder::new(self.fs.clone(), self.frameworks.clone()));
        let attempted = AtomicUsize::new(0);
        let cancelled = AtomicBool::new(false);
        let total = units.len();

        let results = stream::iter(units.into_iter().enumerate())
            .map(|(id, unit)| {
                let builder = builder.clone();
                let attempted = &attempted;
                let cancelled = &cancelled;
                async move {
                    if cancelled.load(Ordering::SeqCst) {
                        return None;
                    }
                    let count = attempted.fetch_add(1, Ordering::SeqCst) + 1;
                    if count > file_search_limit {
                        cancelled.store(true, Ordering::SeqCst);
                        return None;
                    }
                    if count == file_search_limit {
                        tracing::info!(limit = file_search_limit, "file search limit reached");
                        cancelled.store(true, Ordering::SeqCst);
                    }

                    let files = unit.files.clone();
                    let built = tokio::task::spawn_blocking(move || builder.build(unit, id)).await;
                    Some(match built {
                        Ok(Ok(context)) => Ok(context),
                        Ok(Err(e)) => Err(RunError::new(RunErrorKind::ContextBuild, &files, e.to_string())),
                        Err(e) => Err(RunError::new(
                            RunErrorKind::ContextBuild,
                            &files,
                            format!("Context build task failed: {}", e),
                        )),
                    })
                }
            })
            .buffer_unordered(parallelism)
            .collect::<Vec<_>>()
            .await;

        let mut contexts = Vec::new();
        let mut skipped = 0;
        for result in results {
            match result {
                Some(Ok(context)) => contexts.push(context),
                Some(Err(error)) => state.fail(callback, error),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::info!(skipped, total, "units not built after reaching the file search limit");
        }
        contexts.sort_by_key(|c| c.id);
        contexts
    }

    /// Run batch compilers; contexts of a failed compile group are dropped
    async fn compile(&self, contexts: &mut Vec<TestContext>, state: &mut RunState, callback: &dyn RunCallback) {
        let compiler = BatchCompiler::new(self.fs.clone(), self.launcher.clone());
        for failure in compiler.compile(contexts).await {
            for context in contexts.iter().filter(|c| failure.context_ids.contains(&c.id)) {
                state.fail(callback, RunError::from_error(&failure.error, &context.input_files));
            }
            contexts.retain(|c| !failure.context_ids.contains(&c.id));
        }
    }

    /// Start or reuse the shared server and hand it to every context that wants one
    async fn attach_server(
        &self,
        contexts: &mut Vec<TestContext>,
        state: &mut RunState,
        callback: &dyn RunCallback,
    ) {
        let Some(first) = contexts.iter().find(|c| c.wants_server()) else {
            return;
        };
        let settings = first.scope.server.clone().unwrap_or_default();
        let root = settings
            .root_path
            .map(PathBuf::from)
            .or_else(|| first.scope.settings_dir().map(|d| d.to_path_buf()))
            .unwrap_or_else(|| first.harness_dir.clone());

        match self.server_host.start(&root, settings.default_port).await {
            Ok(handle) => {
                for context in contexts.iter_mut().filter(|c| c.wants_server()) {
                    context.server = Some(handle.clone());
                }
                state.server = Some(handle);
            }
            Err(e) => {
                for context in contexts.iter().filter(|c| c.wants_server()) {
                    let error = RunError::new(RunErrorKind::Execution, &context.input_files, e.to_string());
                    state.fail(callback, error);
                }
                contexts.retain(|c| !c.wants_server());
            }
        }
    }

    /// Render and run one unit, converting any failure into a run error
    async fn execute(
        &self,
        context: &mut TestContext,
        options: &RunOptions,
        runner: &RunnerCommand,
        callback: &dyn RunCallback,
    ) -> (TestSummary, Vec<RunError>) {
        match self.execute_unit(context, options, runner, callback).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let error = RunError::from_error(&e, &context.input_files);
                tracing::warn!(unit = context.id, kind = ?error.kind, "{}", error.message);
                callback.exception_thrown(&error);
                (TestSummary::default(), vec![error])
            }
        }
    }

    async fn execute_unit(
        &self,
        context: &mut TestContext,
        options: &RunOptions,
        runner: &RunnerCommand,
        callback: &dyn RunCallback,
    ) -> Result<(TestSummary, Vec<RunError>)> {
        context.assign_amd_paths();
        let harness = match self.harness.build(context) {
            Ok(path) => path,
            Err(e) => {
                context.harness_creation_failed = true;
                return Err(match e {
                    Error::Harness(_) => e,
                    other => Error::Harness(other.to_string()),
                });
            }
        };
        context.harness_path = Some(harness);
        let url = context.harness_url()?;

        match &options.launch_mode {
            LaunchMode::Headless => self.run_headless(context, &url, options, runner, callback).await,
            LaunchMode::FullBrowser => {
                let spec = browser_spec(options, context, &url);
                self.launcher.launch_detached(&spec).await?;
                Ok((TestSummary::default(), Vec::new()))
            }
            LaunchMode::Custom(launcher) => {
                launcher.launch(context, &url).await?;
                Ok((TestSummary::default(), Vec::new()))
            }
        }
    }

    async fn run_headless(
        &self,
        context: &TestContext,
        url: &str,
        options: &RunOptions,
        runner: &RunnerCommand,
        callback: &dyn RunCallback,
    ) -> Result<(TestSummary, Vec<RunError>)> {
        let timeout_ms = options
            .timeout_ms
            .unwrap_or_else(|| context.scope.test_file_timeout_ms());

        let mut spec = ProcessSpec::new(&runner.executable).args(runner.args.iter().cloned());
        if let Some(script) = &runner.script {
            spec = spec.arg(script.to_string_lossy());
        }
        spec = spec
            .arg(url)
            .arg(options.execution_mode.as_arg())
            .arg(timeout_ms.to_string())
            .arg(context.scope.ignore_resource_loading_errors().to_string());
        if let Some(agent) = context.scope.user_agent.as_deref().or(options.user_agent.as_deref()) {
            spec = spec.arg(agent);
        }

        let mut process = self.launcher.spawn(&spec).await?;
        let stdout = process
            .take_stdout()
            .ok_or_else(|| Error::ProcessLaunch("Runner stdout is not available".to_string()))?;

        let stream = context.stream_context();
        let mut reader = ProtocolReader::new(&stream, callback);
        let files = context.input_files.len().max(1) as u64;
        let budget = Duration::from_millis(timeout_ms.saturating_mul(files)).saturating_add(self.runner_grace);
        let now = Instant::now();
        let deadline = now.checked_add(budget).unwrap_or(now + Duration::from_secs(86_400));

        let end = match reader.read_stream(BufReader::new(stdout), Some(deadline)).await {
            Ok(end) => end,
            Err(e) => {
                let _ = process.kill().await;
                return Err(Error::Protocol(format!("Failed to read runner output: {}", e)));
            }
        };
        // Closing stdout does not mean the runner exited; the deadline covers the wait too
        let exited = match end {
            StreamEnd::Closed => tokio::time::timeout_at(deadline, process.wait()).await.ok(),
            StreamEnd::DeadlineElapsed => None,
        };
        let exit_code = match exited {
            Some(status) => {
                status.map_err(|e| Error::ProcessLaunch(format!("Failed to wait for runner: {}", e)))?
            }
            None => {
                tracing::warn!(
                    unit = context.id,
                    budget_ms = budget.as_millis() as u64,
                    "runner did not finish; killing it"
                );
                let _ = process.kill().await;
                Some(RUNNER_TIMEOUT_EXIT_CODE)
            }
        };

        // A bad exit is recorded once, as a run error, and not mirrored into the summary
        let summary = reader.finish();
        let error = match exit_code {
            Some(0) | Some(1) => return Ok((summary, Vec::new())),
            Some(RUNNER_TIMEOUT_EXIT_CODE) => RunError::new(
                RunErrorKind::Timeout,
                &context.input_files,
                format!("Timeout occurred when executing test file (limit {} ms)", timeout_ms),
            ),
            other => RunError::new(
                RunErrorKind::Unknown,
                &context.input_files,
                format!(
                    "Unknown error occurred when executing test file (exit code {})",
                    other.map_or_else(|| "none".to_string(), |c| c.to_string())
                ),
            ),
        };
        tracing::warn!(unit = context.id, kind = ?error.kind, "{}", error.message);
        callback.exception_thrown(&error);
        Ok((summary, vec![error]))
    }
}

/// Fail before anything runs if the headless runner cannot be found
fn check_setup(options: &RunOptions) -> Result<RunnerCommand> {
    if !options.launch_mode.is_headless() {
        return Ok(options.runner.clone());
    }
    let executable = locate(&options.runner.executable)?;
    if let Some(script) = &options.runner.script {
        if !script.is_file() {
            return Err(Error::ProcessSetup(format!(
                "Runner script '{}' does not exist",
                script.display()
            )));
        }
    }
    Ok(RunnerCommand {
        executable,
        ..options.runner.clone()
    })
}

/// Browser command for full-browser mode
///
/// `BrowserArguments` entries are keyed by browser name, matched against the
/// executable's file stem.
fn browser_spec(options: &RunOptions, context: &TestContext, url: &str) -> ProcessSpec {
    let Some(browser) = &options.browser else {
        return platform_opener().arg(url);
    };
    let name = browser
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let extra = context
        .scope
        .browser_arguments
        .iter()
        .find(|(key, _)| key.to_lowercase() == name)
        .map(|(_, value)| split_arguments(value))
        .unwrap_or_default();
    ProcessSpec::new(browser).args(extra).arg(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsScope;

    fn context(scope: SettingsScope) -> TestContext {
        TestContext {
            id: 0,
            input_files: vec![PathBuf::from("/proj/a.js")],
            scope: Arc::new(scope),
            framework: None,
            references: Vec::new(),
            harness_dir: PathBuf::from("/proj"),
            harness_path: None,
            server: None,
            harness_creation_failed: false,
        }
    }

    #[test]
    fn test_missing_runner_fails_setup() {
        let options = RunOptions {
            runner: RunnerCommand {
                executable: PathBuf::from("/no/such/runner"),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(check_setup(&options), Err(Error::ProcessSetup(_))));

        let browser = RunOptions {
            launch_mode: LaunchMode::FullBrowser,
            ..options
        };
        assert!(check_setup(&browser).is_ok());
    }

    #[test]
    fn test_browser_arguments_by_name() {
        let mut scope = SettingsScope::default();
        scope
            .browser_arguments
            .insert("Chrome".into(), "--incognito --window-size=800,600".into());
        let options = RunOptions {
            browser: Some(PathBuf::from("/usr/bin/chrome")),
            ..Default::default()
        };

        let spec = browser_spec(&options, &context(scope), "file:///proj/h.html");
        assert_eq!(spec.program, PathBuf::from("/usr/bin/chrome"));
        assert_eq!(
            spec.args,
            vec!["--incognito", "--window-size=800,600", "file:///proj/h.html"]
        );
    }

    #[test]
    fn test_outcome_success() {
        let mut outcome = RunOutcome::default();
        assert!(outcome.succeeded());
        outcome
            .errors
            .push(RunError::new(RunErrorKind::Timeout, &[], "slow"));
        assert!(!outcome.succeeded());
    }
}
