use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::execution::{
    CommandSpec, ProcessExecutor, ProcessExitStatus, ProcessRequest, run_validated,
};
use crate::install::{
    DryRunFuture, DryRunInstaller, DryRunRequest, TrustDecision, TrustFuture, TrustVerifier,
};
use crate::models::{CoreError, CoreErrorKind, DiscoveryStep};

const BUNDLE_PLACEHOLDER: &str = "{bundle}";
const APP_PLACEHOLDER: &str = "{app}";
const VERSION_PLACEHOLDER: &str = "{version}";

/// External tool invocation. `{bundle}`, `{app}` and `{version}` in `args`
/// are substituted per request; without a `{bundle}` argument the bundle path
/// is appended.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct ExternalCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ExternalCommand {
    fn render(&self, step: DiscoveryStep, request: &DryRunRequest) -> ProcessRequest {
        let bundle = request.bundle_path.display().to_string();
        let version = request.expected_version.to_string();
        let mut mentions_bundle = false;

        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                mentions_bundle |= arg.contains(BUNDLE_PLACEHOLDER);
                arg.replace(BUNDLE_PLACEHOLDER, &bundle)
                    .replace(APP_PLACEHOLDER, request.app.as_str())
                    .replace(VERSION_PLACEHOLDER, &version)
            })
            .collect();

        let mut command = CommandSpec::new(&self.program).args(args);
        if !mentions_bundle {
            command = command.arg(bundle);
        }
        ProcessRequest::new(step, command)
            .app(request.app.clone())
            .timeout(request.timeout)
    }
}

/// Dry-run installer backed by an external command; exit status 0 means the
/// bundle is installable.
pub struct ProcessDryRunInstaller {
    executor: Arc<dyn ProcessExecutor>,
    command: ExternalCommand,
}

impl ProcessDryRunInstaller {
    pub fn new(executor: Arc<dyn ProcessExecutor>, command: ExternalCommand) -> Self {
        Self { executor, command }
    }
}

impl DryRunInstaller for ProcessDryRunInstaller {
    fn dry_run(&self, request: DryRunRequest) -> DryRunFuture {
        let process = self.command.render(DiscoveryStep::DryRunInstall, &request);
        let executor = self.executor.clone();

        Box::pin(async move {
            let output = run_validated(executor.as_ref(), process).await?;
            tracing::debug!(
                app = %request.app,
                status = ?output.status,
                elapsed_ms = output.elapsed.as_millis() as u64,
                "dry-run installer finished"
            );
            if output.succeeded() {
                return Ok(());
            }

            let detail = output
                .last_stderr_line()
                .unwrap_or_else(|| "no diagnostic output".to_string());
            Err(CoreError {
                app: Some(request.app),
                step: Some(DiscoveryStep::DryRunInstall),
                kind: CoreErrorKind::ProcessFailure,
                message: format!("installer exited with {:?}: {detail}", output.status),
            })
        })
    }
}

/// Signature check backed by an external command. Exit 0 trusts the bundle,
/// any other exit code rejects it with the last stderr line as the reason.
pub struct ProcessTrustVerifier {
    executor: Arc<dyn ProcessExecutor>,
    command: ExternalCommand,
}

impl ProcessTrustVerifier {
    pub fn new(executor: Arc<dyn ProcessExecutor>, command: ExternalCommand) -> Self {
        Self { executor, command }
    }
}

impl TrustVerifier for ProcessTrustVerifier {
    fn verify(&self, request: &DryRunRequest) -> TrustFuture {
        let process = self.command.render(DiscoveryStep::VerifyTrust, request);
        let executor = self.executor.clone();
        let app = request.app.clone();

        Box::pin(async move {
            let output = run_validated(executor.as_ref(), process).await?;
            match output.status {
                ProcessExitStatus::ExitCode(0) => Ok(TrustDecision::Trusted),
                ProcessExitStatus::ExitCode(code) => Ok(TrustDecision::Untrusted {
                    reason: output
                        .last_stderr_line()
                        .unwrap_or_else(|| format!("verifier exited with code {code}")),
                }),
                ProcessExitStatus::Terminated => Err(CoreError {
                    app: Some(app),
                    step: Some(DiscoveryStep::VerifyTrust),
                    kind: CoreErrorKind::ProcessFailure,
                    message: "verifier was terminated by a signal".to_string(),
                }),
            }
        })
    }
}
