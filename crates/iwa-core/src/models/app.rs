use std::path::PathBuf;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::models::PackageIdentity;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppKind {
    Isolated,
    Web,
}

impl AppKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Isolated => "isolated",
            Self::Web => "web",
        }
    }
}

/// A downloaded, validated bundle waiting for the swap-in step.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PendingUpdate {
    pub staged_location: PathBuf,
    pub version: Version,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InstalledAppRecord {
    pub identity: PackageIdentity,
    pub kind: AppKind,
    pub current_version: Version,
    pub current_location: PathBuf,
    pub update_manifest_url: Option<String>,
    pub pending_update: Option<PendingUpdate>,
}

impl InstalledAppRecord {
    pub fn isolated(
        identity: PackageIdentity,
        current_version: Version,
        current_location: impl Into<PathBuf>,
    ) -> Self {
        Self {
            identity,
            kind: AppKind::Isolated,
            current_version,
            current_location: current_location.into(),
            update_manifest_url: None,
            pending_update: None,
        }
    }

    pub fn with_update_manifest_url(mut self, url: impl Into<String>) -> Self {
        self.update_manifest_url = Some(url.into());
        self
    }

    pub fn is_isolated(&self) -> bool {
        self.kind == AppKind::Isolated
    }
}

/// One force-install policy pair. Policy apps are enrolled in discovery with
/// this manifest URL regardless of what the registry knows about them.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ForceInstallEntry {
    pub update_manifest_url: String,
    pub web_bundle_id: PackageIdentity,
}
