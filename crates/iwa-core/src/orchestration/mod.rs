pub mod runtime_queue;
pub mod scheduler;

pub use runtime_queue::{
    DiscoveryTaskQueue, TaskOperation, TaskRuntimeSnapshot, task_operation,
};
pub use scheduler::{DiscoveryScheduler, TickControl};

use crate::models::CoreError;

pub type OrchestrationResult<T> = Result<T, CoreError>;
