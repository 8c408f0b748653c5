//! Test run orchestration
//!
//! Discovery, planning, context building, compilation, the shared server and
//! runner execution. [`RunOrchestrator`] drives the phases; the traits here
//! ([`ProcessLauncher`], [`WebServerHost`], [`CustomLauncher`],
//! [`RunCallback`]) are the seams callers and tests plug into.

mod callback;
mod compile;
mod context;
mod discovery;
mod launcher;
mod options;
mod orchestrator;
mod planner;
mod server;

pub use callback::{NullCallback, RunCallback};
pub use compile::{generated_path, split_arguments, BatchCompiler, CompileFailure};
pub use context::{harness_dir, ContextBuilder, TestContext};
pub use discovery::{Discovery, TestDiscovery};
pub use launcher::{
    platform_opener, ProcessLauncher, ProcessOutput, ProcessSpec, RunningProcess, TokioProcessLauncher,
};
pub use options::{
    CustomLauncher, LaunchMode, RunOptions, RunnerCommand, TestExecutionMode, TestingMode,
};
pub use orchestrator::{RunOrchestrator, RunOutcome, RUNNER_TIMEOUT_EXIT_CODE};
pub use planner::{effective_parallelism, plan, DiscoveredFile, ExecutionUnit};
pub use server::{ReusingServerHost, StaticFileHost, WebServerHandle, WebServerHost};
