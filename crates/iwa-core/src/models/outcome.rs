use std::time::SystemTime;

use semver::Version;

use crate::models::PackageIdentity;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DiscoverySuccess {
    NoUpdateFound,
    UpdateAlreadyPending,
    UpdateFoundAndSavedInDatabase,
}

impl DiscoverySuccess {
    pub fn tag(self) -> &'static str {
        match self {
            Self::NoUpdateFound => "NoUpdateFound",
            Self::UpdateAlreadyPending => "UpdateAlreadyPending",
            Self::UpdateFoundAndSavedInDatabase => "UpdateFoundAndSavedInDatabase",
        }
    }

    /// Label used by cycle summaries.
    pub fn log_label(self) -> &'static str {
        match self {
            Self::UpdateFoundAndSavedInDatabase => "UpdateFoundAndDryRunSuccessful",
            other => other.tag(),
        }
    }
}

/// Terminal failures of a discovery attempt. None of them are retried within
/// the attempt; the next scheduled cycle is the retry.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to download update manifest: {0}")]
    ManifestDownloadFailed(String),

    #[error("update manifest is not valid JSON: {0}")]
    ManifestInvalidJson(String),

    #[error("update manifest is malformed: {0}")]
    ManifestInvalidManifest(String),

    #[error("update manifest lists no applicable version")]
    ManifestNoApplicableVersion,

    #[error("isolated app is not installed: {0}")]
    IwaNotInstalled(String),

    #[error("failed to download bundle: {0}")]
    BundleDownloadError(String),

    #[error("dry-run install of the update failed: {0}")]
    UpdateDryRunFailed(String),

    #[error("app registry failure: {0}")]
    RegistryFailure(String),
}

impl DiscoveryError {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ManifestDownloadFailed(_) => "ManifestDownloadFailed",
            Self::ManifestInvalidJson(_) => "ManifestInvalidJson",
            Self::ManifestInvalidManifest(_) => "ManifestInvalidManifest",
            Self::ManifestNoApplicableVersion => "ManifestNoApplicableVersion",
            Self::IwaNotInstalled(_) => "IwaNotInstalled",
            Self::BundleDownloadError(_) => "BundleDownloadError",
            Self::UpdateDryRunFailed(_) => "UpdateDryRunFailed",
            Self::RegistryFailure(_) => "RegistryFailure",
        }
    }
}

pub type DiscoveryOutcome = Result<DiscoverySuccess, DiscoveryError>;

pub fn outcome_tag(outcome: &DiscoveryOutcome) -> &'static str {
    match outcome {
        Ok(success) => success.tag(),
        Err(error) => error.tag(),
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiscoveryReport {
    pub app: PackageIdentity,
    pub manifest_url: String,
    pub selected_version: Option<Version>,
    pub outcome: DiscoveryOutcome,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
}

impl DiscoveryReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}
