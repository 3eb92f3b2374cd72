pub mod app;
pub mod error;
pub mod identity;
pub mod outcome;
pub mod task;

pub use app::{AppKind, ForceInstallEntry, InstalledAppRecord, PendingUpdate};
pub use error::{CoreError, CoreErrorKind};
pub use identity::PackageIdentity;
pub use outcome::{
    DiscoveryError, DiscoveryOutcome, DiscoveryReport, DiscoverySuccess, outcome_tag,
};
pub use task::{DiscoveryStep, TaskId, TaskStatus};
