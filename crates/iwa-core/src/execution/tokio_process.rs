use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;

use crate::execution::{
    ProcessExecutor, ProcessExitStatus, ProcessFuture, ProcessOutput, ProcessRequest,
};
use crate::models::{CoreError, CoreErrorKind};

const OUTPUT_DRAIN_WINDOW: Duration = Duration::from_millis(250);
const REAP_WINDOW: Duration = Duration::from_secs(1);

/// Spawns each command in its own process group so a timeout takes down any
/// helpers it started as well.
pub struct TokioProcessExecutor;

impl ProcessExecutor for TokioProcessExecutor {
    fn run(&self, request: ProcessRequest) -> ProcessFuture {
        Box::pin(async move {
            let mut cmd = tokio::process::Command::new(&request.command.program);
            cmd.args(&request.command.args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            #[cfg(unix)]
            cmd.process_group(0);

            let mut child = cmd.spawn().map_err(|error| {
                let program = request.command.program.display();
                failure(&request, format!("failed to spawn {program}: {error}"))
            })?;
            let started = Instant::now();
            let stdout = drain(child.stdout.take());
            let stderr = drain(child.stderr.take());

            let waited = match request.timeout {
                Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
                None => Some(child.wait().await),
            };
            let Some(status) = waited else {
                kill_tree(&mut child).await;
                stdout.abort();
                stderr.abort();
                let limit = request.timeout.unwrap_or_default();
                return Err(CoreError {
                    app: request.app.clone(),
                    step: Some(request.step),
                    kind: CoreErrorKind::Timeout,
                    message: format!("process timed out after {}ms", limit.as_millis()),
                });
            };
            let status = status.map_err(|error| {
                failure(&request, format!("failed to wait for process: {error}"))
            })?;

            // Helpers may keep the pipes open after the main process exits.
            let stdout = collect(stdout).await;
            let stderr = collect(stderr).await;

            Ok(ProcessOutput {
                status: match status.code() {
                    Some(code) => ProcessExitStatus::ExitCode(code),
                    None => ProcessExitStatus::Terminated,
                },
                stdout,
                stderr,
                elapsed: started.elapsed(),
            })
        })
    }
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer).await;
        }
        buffer
    })
}

async fn collect(reader: JoinHandle<Vec<u8>>) -> Vec<u8> {
    match tokio::time::timeout(OUTPUT_DRAIN_WINDOW, reader).await {
        Ok(Ok(buffer)) => buffer,
        _ => Vec::new(),
    }
}

async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: signalling a process group we created; a stale group only yields ESRCH.
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
    let _ = child.start_kill();
    let _ = tokio::time::timeout(REAP_WINDOW, child.wait()).await;
}

fn failure(request: &ProcessRequest, message: String) -> CoreError {
    CoreError {
        app: request.app.clone(),
        step: Some(request.step),
        kind: CoreErrorKind::ProcessFailure,
        message,
    }
}
