pub mod tokio_process;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use crate::models::{CoreError, CoreErrorKind, DiscoveryStep, PackageIdentity};

pub use tokio_process::TokioProcessExecutor;

pub type ExecutionResult<T> = Result<T, CoreError>;

pub type ProcessFuture = Pin<Box<dyn Future<Output = ExecutionResult<ProcessOutput>> + Send>>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// One external command run on behalf of a discovery step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessRequest {
    pub app: Option<PackageIdentity>,
    pub step: DiscoveryStep,
    pub command: CommandSpec,
    pub timeout: Option<Duration>,
}

impl ProcessRequest {
    pub fn new(step: DiscoveryStep, command: CommandSpec) -> Self {
        Self {
            app: None,
            step,
            command,
            timeout: None,
        }
    }

    pub fn app(mut self, app: PackageIdentity) -> Self {
        self.app = Some(app);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> ExecutionResult<()> {
        if self.command.program.as_os_str().is_empty() {
            return Err(self.invalid("command program path must not be empty"));
        }

        if self
            .command
            .args
            .iter()
            .any(|arg| arg.is_empty() || arg.contains('\0'))
        {
            return Err(self.invalid("command args must be non-empty and free of NUL bytes"));
        }

        if self.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(self.invalid("timeout must be greater than zero when provided"));
        }

        Ok(())
    }

    fn invalid(&self, message: &str) -> CoreError {
        CoreError {
            app: self.app.clone(),
            step: Some(self.step),
            kind: CoreErrorKind::InvalidInput,
            message: message.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessExitStatus {
    ExitCode(i32),
    Terminated,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessOutput {
    pub status: ProcessExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn succeeded(&self) -> bool {
        self.status == ProcessExitStatus::ExitCode(0)
    }

    /// Last non-blank stderr line, the usual place tools put their verdict.
    pub fn last_stderr_line(&self) -> Option<String> {
        String::from_utf8_lossy(&self.stderr)
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }
}

/// Runs a command to completion, killing it when its timeout elapses.
pub trait ProcessExecutor: Send + Sync {
    fn run(&self, request: ProcessRequest) -> ProcessFuture;
}

pub async fn run_validated(
    executor: &dyn ProcessExecutor,
    request: ProcessRequest,
) -> ExecutionResult<ProcessOutput> {
    request.validate()?;
    executor.run(request).await
}
