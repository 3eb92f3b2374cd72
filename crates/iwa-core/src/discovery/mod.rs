pub mod debug_log;
pub mod task;

pub use debug_log::{DiscoveryLog, DiscoveryLogEntry};
pub use task::{DiscoveryCollaborators, DiscoveryLimits, UpdateDiscoveryTask};
