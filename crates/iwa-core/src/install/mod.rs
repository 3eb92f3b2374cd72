pub mod process;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use semver::Version;

use crate::models::{CoreError, CoreErrorKind, DiscoveryStep, PackageIdentity};

pub use process::{ExternalCommand, ProcessDryRunInstaller, ProcessTrustVerifier};

pub type InstallResult<T> = Result<T, CoreError>;

pub type DryRunFuture = Pin<Box<dyn Future<Output = InstallResult<()>> + Send>>;

pub type TrustFuture = Pin<Box<dyn Future<Output = InstallResult<TrustDecision>> + Send>>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DryRunRequest {
    pub app: PackageIdentity,
    pub bundle_path: PathBuf,
    pub expected_version: Version,
    pub timeout: Duration,
}

/// Installs a bundle into a throwaway context to prove it is installable.
/// Implementations must never touch the live app record.
pub trait DryRunInstaller: Send + Sync {
    fn dry_run(&self, request: DryRunRequest) -> DryRunFuture;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TrustDecision {
    Trusted,
    Untrusted { reason: String },
}

/// Checks a bundle's signature against the identity it claims to belong to.
pub trait TrustVerifier: Send + Sync {
    fn verify(&self, request: &DryRunRequest) -> TrustFuture;
}

/// Runs the trust check before handing the bundle to the wrapped installer.
pub struct VerifyingInstaller {
    verifier: Arc<dyn TrustVerifier>,
    inner: Arc<dyn DryRunInstaller>,
}

impl VerifyingInstaller {
    pub fn new(verifier: Arc<dyn TrustVerifier>, inner: Arc<dyn DryRunInstaller>) -> Self {
        Self { verifier, inner }
    }
}

impl DryRunInstaller for VerifyingInstaller {
    fn dry_run(&self, request: DryRunRequest) -> DryRunFuture {
        let verifying = self.verifier.verify(&request);
        let inner = self.inner.clone();

        Box::pin(async move {
            let decision = verifying
                .await
                .map_err(|error| error.attributed(&request.app, DiscoveryStep::VerifyTrust))?;

            match decision {
                TrustDecision::Trusted => {
                    tracing::debug!(app = %request.app, "bundle passed trust verification");
                    inner.dry_run(request).await
                }
                TrustDecision::Untrusted { reason } => Err(CoreError {
                    app: Some(request.app),
                    step: Some(DiscoveryStep::VerifyTrust),
                    kind: CoreErrorKind::Untrusted,
                    message: format!("bundle failed trust verification: {reason}"),
                }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use semver::Version;

    use super::{
        DryRunFuture, DryRunInstaller, DryRunRequest, TrustDecision, TrustFuture, TrustVerifier,
        VerifyingInstaller,
    };
    use crate::models::{CoreError, CoreErrorKind, DiscoveryStep, PackageIdentity};

    enum FixedVerifier {
        Decides(TrustDecision),
        Fails,
    }

    impl TrustVerifier for FixedVerifier {
        fn verify(&self, _request: &DryRunRequest) -> TrustFuture {
            let result = match self {
                Self::Decides(decision) => Ok(decision.clone()),
                Self::Fails => Err(CoreError::new(
                    CoreErrorKind::ProcessFailure,
                    "verifier crashed",
                )),
            };
            Box::pin(async move { result })
        }
    }

    #[derive(Default)]
    struct CountingInstaller {
        calls: AtomicUsize,
    }

    impl DryRunInstaller for CountingInstaller {
        fn dry_run(&self, _request: DryRunRequest) -> DryRunFuture {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    fn request() -> DryRunRequest {
        DryRunRequest {
            app: PackageIdentity::new("app").unwrap(),
            bundle_path: PathBuf::from("/tmp/bundle.swbn"),
            expected_version: Version::new(2, 0, 0),
            timeout: Duration::from_secs(1),
        }
    }

    fn installer(verifier: FixedVerifier) -> (VerifyingInstaller, Arc<CountingInstaller>) {
        let inner = Arc::new(CountingInstaller::default());
        (
            VerifyingInstaller::new(Arc::new(verifier), inner.clone()),
            inner,
        )
    }

    #[tokio::test]
    async fn trusted_bundle_reaches_inner_installer() {
        let (installer, inner) = installer(FixedVerifier::Decides(TrustDecision::Trusted));

        installer.dry_run(request()).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn untrusted_bundle_never_reaches_inner_installer() {
        let (installer, inner) = installer(FixedVerifier::Decides(TrustDecision::Untrusted {
            reason: "signature key mismatch".to_string(),
        }));

        let error = installer.dry_run(request()).await.unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::Untrusted);
        assert_eq!(error.step, Some(DiscoveryStep::VerifyTrust));
        assert!(error.message.contains("signature key mismatch"));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn verifier_errors_block_the_install() {
        let (installer, inner) = installer(FixedVerifier::Fails);

        let error = installer.dry_run(request()).await.unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::ProcessFailure);
        assert_eq!(error.step, Some(DiscoveryStep::VerifyTrust));
        assert_eq!(error.app, Some(PackageIdentity::new("app").unwrap()));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
    }
}
