use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use semver::Version;
use url::Url;

use crate::fetch::{BundleFetcher, FetchRequest, HttpFetcher, download};
use crate::install::{DryRunInstaller, DryRunRequest};
use crate::manifest::{ManifestEntry, UpdateManifest};
use crate::models::{
    CoreError, CoreErrorKind, DiscoveryError, DiscoveryOutcome, DiscoveryReport, DiscoveryStep,
    DiscoverySuccess, InstalledAppRecord, PackageIdentity, PendingUpdate, outcome_tag,
};
use crate::persistence::AppRegistry;
use crate::staging::{ScratchBundle, StagingArea};

const MAX_MANIFEST_BYTES: u64 = 1024 * 1024;

/// Services a discovery attempt talks to.
#[derive(Clone)]
pub struct DiscoveryCollaborators {
    pub registry: Arc<dyn AppRegistry>,
    pub fetcher: Arc<dyn HttpFetcher>,
    pub installer: Arc<dyn DryRunInstaller>,
    pub staging: StagingArea,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DiscoveryLimits {
    pub manifest_timeout: Duration,
    pub bundle_timeout: Duration,
    pub dry_run_timeout: Duration,
    pub max_bundle_bytes: u64,
}

impl Default for DiscoveryLimits {
    fn default() -> Self {
        Self {
            manifest_timeout: Duration::from_secs(30),
            bundle_timeout: Duration::from_secs(600),
            dry_run_timeout: Duration::from_secs(300),
            max_bundle_bytes: 512 * 1024 * 1024,
        }
    }
}

/// One discovery attempt for one app.
///
/// The attempt walks manifest fetch, version selection, installed-state
/// check, version comparison, bundle fetch, dry-run install and pending
/// update write in that order. The first failing step ends the attempt; no
/// step is retried.
pub struct UpdateDiscoveryTask {
    app: PackageIdentity,
    manifest_url: String,
    collaborators: DiscoveryCollaborators,
    limits: DiscoveryLimits,
}

impl UpdateDiscoveryTask {
    pub fn new(
        app: PackageIdentity,
        manifest_url: impl Into<String>,
        collaborators: DiscoveryCollaborators,
        limits: DiscoveryLimits,
    ) -> Self {
        Self {
            app,
            manifest_url: manifest_url.into(),
            collaborators,
            limits,
        }
    }

    pub fn app(&self) -> &PackageIdentity {
        &self.app
    }

    pub fn manifest_url(&self) -> &str {
        &self.manifest_url
    }

    pub async fn run(self) -> DiscoveryReport {
        let started_at = SystemTime::now();
        let mut selected_version = None;
        let outcome = self.execute(&mut selected_version).await;

        match &outcome {
            Ok(success) => tracing::info!(
                app = %self.app,
                version = ?selected_version.as_ref().map(ToString::to_string),
                outcome = success.log_label(),
                "update discovery finished"
            ),
            Err(error) => tracing::warn!(
                app = %self.app,
                version = ?selected_version.as_ref().map(ToString::to_string),
                outcome = outcome_tag(&outcome),
                error = %error,
                "update discovery failed"
            ),
        }

        DiscoveryReport {
            app: self.app,
            manifest_url: self.manifest_url,
            selected_version,
            outcome,
            started_at,
            finished_at: SystemTime::now(),
        }
    }

    async fn execute(&self, selected_version: &mut Option<Version>) -> DiscoveryOutcome {
        let manifest = self.fetch_manifest().await?;

        let entry = manifest
            .select_latest()
            .cloned()
            .ok_or(DiscoveryError::ManifestNoApplicableVersion)?;
        *selected_version = Some(entry.version.clone());
        tracing::debug!(
            app = %self.app,
            version = %entry.version,
            source = %entry.source,
            "selected manifest entry"
        );

        let record = self.installed_record().await?;

        if entry.version <= record.current_version {
            return Ok(DiscoverySuccess::NoUpdateFound);
        }
        if record
            .pending_update
            .as_ref()
            .is_some_and(|pending| pending.version == entry.version)
        {
            return Ok(DiscoverySuccess::UpdateAlreadyPending);
        }

        let scratch = self.fetch_bundle(&entry).await?;
        self.dry_run(&entry, &scratch).await?;
        self.persist_pending_update(entry.version, scratch).await
    }

    async fn fetch_manifest(&self) -> Result<UpdateManifest, DiscoveryError> {
        let url = Url::parse(&self.manifest_url).map_err(|error| {
            DiscoveryError::ManifestDownloadFailed(format!(
                "invalid manifest URL '{}': {error}",
                self.manifest_url
            ))
        })?;

        let body = download(
            self.collaborators.fetcher.as_ref(),
            FetchRequest {
                url: url.clone(),
                timeout: self.limits.manifest_timeout,
                max_bytes: MAX_MANIFEST_BYTES,
            },
        )
        .await
        .map_err(|error| {
            let message = self.step_failed(DiscoveryStep::FetchManifest, error);
            DiscoveryError::ManifestDownloadFailed(message)
        })?;

        Ok(UpdateManifest::parse(&body, &url)?)
    }

    async fn installed_record(&self) -> Result<InstalledAppRecord, DiscoveryError> {
        let registry = self.collaborators.registry.clone();
        let app = self.app.clone();
        let record = tokio::task::spawn_blocking(move || registry.get_app(&app))
            .await
            .map_err(|join_error| {
                DiscoveryError::RegistryFailure(format!(
                    "registry lookup join failure: {join_error}"
                ))
            })?
            .map_err(|error| {
                registry_error(&self.app, DiscoveryStep::CheckInstalledState, error)
            })?;

        match record {
            Some(record) if record.is_isolated() => Ok(record),
            Some(record) => Err(DiscoveryError::IwaNotInstalled(format!(
                "'{}' is registered as a {} app",
                self.app,
                record.kind.as_str()
            ))),
            None => Err(DiscoveryError::IwaNotInstalled(format!(
                "'{}' is not in the app registry",
                self.app
            ))),
        }
    }

    async fn fetch_bundle(&self, entry: &ManifestEntry) -> Result<ScratchBundle, DiscoveryError> {
        let bundles = BundleFetcher::new(
            self.collaborators.fetcher.clone(),
            self.collaborators.staging.clone(),
            self.limits.max_bundle_bytes,
        );
        let scratch = bundles
            .fetch_bundle(
                &self.app,
                &entry.version,
                &entry.source,
                self.limits.bundle_timeout,
            )
            .await
            .map_err(|error| {
                let message = self.step_failed(DiscoveryStep::FetchBundle, error);
                DiscoveryError::BundleDownloadError(message)
            })?;

        tracing::debug!(
            app = %self.app,
            version = %entry.version,
            sha256 = %scratch.sha256,
            size = scratch.size,
            "downloaded update bundle"
        );
        Ok(scratch)
    }

    async fn dry_run(
        &self,
        entry: &ManifestEntry,
        scratch: &ScratchBundle,
    ) -> Result<(), DiscoveryError> {
        let timeout = self.limits.dry_run_timeout;
        let request = DryRunRequest {
            app: self.app.clone(),
            bundle_path: scratch.path.clone(),
            expected_version: entry.version.clone(),
            timeout,
        };

        let installing = self.collaborators.installer.dry_run(request);
        let result = match tokio::time::timeout(timeout, installing).await {
            Ok(result) => result,
            Err(_) => Err(CoreError {
                app: Some(self.app.clone()),
                step: Some(DiscoveryStep::DryRunInstall),
                kind: CoreErrorKind::Timeout,
                message: format!("dry-run install timed out after {}ms", timeout.as_millis()),
            }),
        };

        result.map_err(|error| {
            self.collaborators.staging.discard(&scratch.path);
            let message = self.step_failed(DiscoveryStep::DryRunInstall, error);
            DiscoveryError::UpdateDryRunFailed(message)
        })
    }

    /// Logs a collaborator failure with its step and kind, which the flat
    /// discovery error does not carry, and returns its message.
    fn step_failed(&self, step: DiscoveryStep, error: CoreError) -> String {
        let error = error.attributed(&self.app, step);
        tracing::debug!(
            app = %self.app,
            step = ?error.step,
            kind = ?error.kind,
            error = %error.message,
            "discovery step failed"
        );
        error.message
    }

    async fn persist_pending_update(
        &self,
        version: Version,
        scratch: ScratchBundle,
    ) -> DiscoveryOutcome {
        let registry = self.collaborators.registry.clone();
        let staging = self.collaborators.staging.clone();
        let app = self.app.clone();

        tokio::task::spawn_blocking(move || {
            let staged_location = match staging.promote(&app, &version, &scratch) {
                Ok(location) => location,
                Err(error) => {
                    staging.discard(&scratch.path);
                    return Err(DiscoveryError::BundleDownloadError(error.message));
                }
            };

            let pending = PendingUpdate {
                staged_location: staged_location.clone(),
                version,
            };
            match registry.set_pending_update(&app, &pending) {
                Ok(previous) => {
                    if let Some(previous) = previous {
                        remove_superseded(&staging, &staged_location, previous.staged_location);
                    }
                    Ok(DiscoverySuccess::UpdateFoundAndSavedInDatabase)
                }
                Err(error) => {
                    staging.discard(&staged_location);
                    Err(registry_error(&app, DiscoveryStep::PersistPendingUpdate, error))
                }
            }
        })
        .await
        .unwrap_or_else(|join_error| {
            Err(DiscoveryError::RegistryFailure(format!(
                "pending update write join failure: {join_error}"
            )))
        })
    }
}

/// Only bundles this staging area owns are removed.
fn remove_superseded(staging: &StagingArea, current: &Path, previous: PathBuf) {
    if previous != current && previous.starts_with(staging.root()) {
        staging.discard(&previous);
    }
}

fn registry_error(app: &PackageIdentity, step: DiscoveryStep, error: CoreError) -> DiscoveryError {
    let error = error.attributed(app, step);
    match error.kind {
        CoreErrorKind::NotInstalled => DiscoveryError::IwaNotInstalled(error.message),
        _ => DiscoveryError::RegistryFailure(error.message),
    }
}
