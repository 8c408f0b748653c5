//! Process launching
//!
//! The orchestrator starts three kinds of processes: the headless runner
//! (streamed), the batch compiler (run to completion) and an interactive
//! browser (detached). All go through [`ProcessLauncher`] so tests can
//! substitute scripted processes.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};

use crate::common::{Error, Result};

/// Program, arguments and working directory of a process to start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Captured result of a process run to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A started process whose output is being streamed
#[async_trait]
pub trait RunningProcess: Send {
    /// Standard output; available once
    fn take_stdout(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>>;

    /// Wait for exit and return the exit code
    async fn wait(&mut self) -> Result<Option<i32>>;

    /// Terminate the process
    async fn kill(&mut self) -> Result<()>;
}

/// Starts processes for the orchestrator
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start a process with piped stdout
    async fn spawn(&self, spec: &ProcessSpec) -> Result<Box<dyn RunningProcess>>;

    /// Run a process to completion, capturing stdout and stderr
    ///
    /// Fails with [`Error::Timeout`] if `timeout` elapses first; the process
    /// is killed in that case.
    async fn run_to_completion(
        &self,
        spec: &ProcessSpec,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput>;

    /// Start a process and leave it running
    async fn launch_detached(&self, spec: &ProcessSpec) -> Result<()>;
}

/// [`ProcessLauncher`] backed by `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessLauncher;

struct TokioProcess {
    child: Child,
}

#[async_trait]
impl RunningProcess for TokioProcess {
    fn take_stdout(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        self.child
            .stdout
            .take()
            .map(|stdout| Box::new(stdout) as Box<dyn AsyncRead + Send + Unpin>)
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    async fn kill(&mut self) -> Result<()> {
        self.child.kill().await?;
        Ok(())
    }
}

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn spawn(&self, spec: &ProcessSpec) -> Result<Box<dyn RunningProcess>> {
        tracing::debug!(program = %spec.program.display(), args = ?spec.args, "spawning runner");
        let child = spec
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::ProcessLaunch(format!("Failed to start {}: {}", spec.program.display(), e))
            })?;
        Ok(Box::new(TokioProcess { child }))
    }

    async fn run_to_completion(
        &self,
        spec: &ProcessSpec,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput> {
        tracing::debug!(program = %spec.program.display(), args = ?spec.args, "running to completion");
        let child = spec
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::ProcessLaunch(format!("Failed to start {}: {}", spec.program.display(), e))
            })?;

        // Dropping the child on timeout kills it
        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| Error::Timeout(limit.as_millis() as u64))??,
            None => child.wait_with_output().await?,
        };

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn launch_detached(&self, spec: &ProcessSpec) -> Result<()> {
        tracing::debug!(program = %spec.program.display(), args = ?spec.args, "launching detached");
        spec.command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                Error::ProcessLaunch(format!("Failed to start {}: {}", spec.program.display(), e))
            })?;
        Ok(())
    }
}

/// Command that opens a URL in the user's default browser
pub fn platform_opener() -> ProcessSpec {
    if cfg!(target_os = "macos") {
        ProcessSpec::new("open")
    } else if cfg!(windows) {
        ProcessSpec::new("cmd").args(["/C", "start", ""])
    } else {
        ProcessSpec::new("xdg-open")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_run_to_completion_captures_output() {
        let spec = ProcessSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = TokioProcessLauncher.run_to_completion(&spec, None).await.unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_run_to_completion_times_out() {
        let spec = ProcessSpec::new("sh").args(["-c", "sleep 5"]);
        let err = TokioProcessLauncher
            .run_to_completion(&spec, Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(100)));
    }

    #[tokio::test]
    async fn test_spawn_streams_stdout() {
        let spec = ProcessSpec::new("sh").args(["-c", "printf 'a\\nb\\n'; exit 1"]);
        let mut process = TokioProcessLauncher.spawn(&spec).await.unwrap();
        let mut stdout = process.take_stdout().unwrap();
        assert!(process.take_stdout().is_none());

        let mut text = String::new();
        stdout.read_to_string(&mut text).await.unwrap();
        assert_eq!(text, "a\nb\n");
        assert_eq!(process.wait().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let spec = ProcessSpec::new("/no/such/program");
        assert!(matches!(
            TokioProcessLauncher.spawn(&spec).await,
            Err(Error::ProcessLaunch(_))
        ));
    }
}
