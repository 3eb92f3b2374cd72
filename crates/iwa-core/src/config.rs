use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::DiscoveryLimits;
use crate::models::{CoreError, CoreErrorKind, ForceInstallEntry};

pub const DEFAULT_DISCOVERY_INTERVAL_SECS: u64 = 5 * 60 * 60;
pub const DEFAULT_REGISTRY_POLL_SECS: u64 = 60;

/// Both toggles must be on for the recurring timer to start.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureToggles {
    pub isolated_web_apps: bool,
    pub automatic_updates: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            isolated_web_apps: true,
            automatic_updates: true,
        }
    }
}

impl FeatureToggles {
    pub fn automatic_discovery_enabled(&self) -> bool {
        self.isolated_web_apps && self.automatic_updates
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateManagerConfig {
    pub discovery_interval_secs: u64,
    /// How often a long-running manager re-reads the registry to start or
    /// stop the discovery timer for changes made by other processes.
    pub registry_poll_secs: u64,
    pub manifest_timeout_secs: u64,
    pub bundle_timeout_secs: u64,
    pub dry_run_timeout_secs: u64,
    pub max_concurrent_discoveries: usize,
    pub debug_log_capacity: usize,
    pub max_bundle_bytes: u64,
    pub features: FeatureToggles,
    pub force_install: Vec<ForceInstallEntry>,
}

impl Default for UpdateManagerConfig {
    fn default() -> Self {
        let limits = DiscoveryLimits::default();
        Self {
            discovery_interval_secs: DEFAULT_DISCOVERY_INTERVAL_SECS,
            registry_poll_secs: DEFAULT_REGISTRY_POLL_SECS,
            manifest_timeout_secs: limits.manifest_timeout.as_secs(),
            bundle_timeout_secs: limits.bundle_timeout.as_secs(),
            dry_run_timeout_secs: limits.dry_run_timeout.as_secs(),
            max_concurrent_discoveries: 4,
            debug_log_capacity: 100,
            max_bundle_bytes: limits.max_bundle_bytes,
            features: FeatureToggles::default(),
            force_install: Vec::new(),
        }
    }
}

impl UpdateManagerConfig {
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn registry_poll_interval(&self) -> Duration {
        Duration::from_secs(self.registry_poll_secs)
    }

    pub fn limits(&self) -> DiscoveryLimits {
        DiscoveryLimits {
            manifest_timeout: Duration::from_secs(self.manifest_timeout_secs),
            bundle_timeout: Duration::from_secs(self.bundle_timeout_secs),
            dry_run_timeout: Duration::from_secs(self.dry_run_timeout_secs),
            max_bundle_bytes: self.max_bundle_bytes,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let zero_field = [
            ("discovery_interval_secs", self.discovery_interval_secs == 0),
            ("registry_poll_secs", self.registry_poll_secs == 0),
            ("manifest_timeout_secs", self.manifest_timeout_secs == 0),
            ("bundle_timeout_secs", self.bundle_timeout_secs == 0),
            ("dry_run_timeout_secs", self.dry_run_timeout_secs == 0),
            ("max_concurrent_discoveries", self.max_concurrent_discoveries == 0),
            ("max_bundle_bytes", self.max_bundle_bytes == 0),
        ]
        .into_iter()
        .find_map(|(name, is_zero)| is_zero.then_some(name));

        match zero_field {
            Some(name) => Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("update manager config field '{name}' must be greater than zero"),
            )),
            None => Ok(()),
        }
    }
}
