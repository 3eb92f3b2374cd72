use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::time::timeout;

use crate::models::{
    CoreError, CoreErrorKind, DiscoveryReport, PackageIdentity, TaskId, TaskStatus,
};
use crate::orchestration::OrchestrationResult;

pub type TaskOperation =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = DiscoveryReport> + Send>> + Send>;

pub fn task_operation<F, Fut>(f: F) -> TaskOperation
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = DiscoveryReport> + Send + 'static,
{
    Box::new(move || Box::pin(f()) as Pin<Box<dyn Future<Output = DiscoveryReport> + Send>>)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskRuntimeSnapshot {
    pub id: TaskId,
    pub app: PackageIdentity,
    pub status: TaskStatus,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
    pub report: Option<DiscoveryReport>,
    pub error_message: Option<String>,
}

/// Runs discovery operations on the tokio runtime. Operations for the same
/// app run one at a time, in submission order; operations for different apps
/// run concurrently up to the worker limit.
#[derive(Clone)]
pub struct DiscoveryTaskQueue {
    inner: Arc<Mutex<QueueState>>,
    workers: Arc<Semaphore>,
}

#[derive(Default)]
struct QueueState {
    next_task_id: u64,
    tasks: HashMap<TaskId, TaskRuntimeSnapshot>,
    app_locks: HashMap<PackageIdentity, Arc<Mutex<()>>>,
    completion_notifiers: HashMap<TaskId, Arc<Notify>>,
}

impl DiscoveryTaskQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueState::default())),
            workers: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub async fn spawn(
        &self,
        app: PackageIdentity,
        operation: TaskOperation,
    ) -> OrchestrationResult<TaskId> {
        let (task_id, app_lock, completion_notify) = {
            let mut state = self.inner.lock().await;
            let task_id = TaskId(state.next_task_id);
            state.next_task_id = state.next_task_id.saturating_add(1);

            state.tasks.insert(
                task_id,
                TaskRuntimeSnapshot {
                    id: task_id,
                    app: app.clone(),
                    status: TaskStatus::Queued,
                    created_at: SystemTime::now(),
                    started_at: None,
                    finished_at: None,
                    report: None,
                    error_message: None,
                },
            );

            let app_lock = state
                .app_locks
                .entry(app.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            let completion_notify = Arc::new(Notify::new());
            state
                .completion_notifiers
                .insert(task_id, completion_notify.clone());

            (task_id, app_lock, completion_notify)
        };

        let inner = self.inner.clone();
        let workers = self.workers.clone();
        tokio::spawn(async move {
            // The app lock is taken before a worker permit so that tasks
            // waiting on a busy app do not hold workers.
            let _app_guard = app_lock.lock().await;
            let _permit = match workers.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    set_failed(&inner, task_id, "worker pool closed".to_string()).await;
                    completion_notify.notify_waiters();
                    return;
                }
            };

            set_running(&inner, task_id).await;

            // Running the operation on its own task keeps a panic from
            // leaving this task (and its waiters) stuck in `Running`.
            match tokio::spawn(operation()).await {
                Ok(report) => set_completed(&inner, task_id, report).await,
                Err(join_error) => {
                    tracing::error!(
                        app = %app,
                        task_id = task_id.0,
                        error = %join_error,
                        "discovery task aborted"
                    );
                    set_failed(
                        &inner,
                        task_id,
                        format!("discovery task aborted: {join_error}"),
                    )
                    .await;
                }
            }

            completion_notify.notify_waiters();
        });

        Ok(task_id)
    }

    pub async fn snapshot(&self, task_id: TaskId) -> OrchestrationResult<TaskRuntimeSnapshot> {
        let state = self.inner.lock().await;
        state
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| task_lookup_error(task_id))
    }

    pub async fn status(&self, task_id: TaskId) -> OrchestrationResult<TaskStatus> {
        Ok(self.snapshot(task_id).await?.status)
    }

    /// Whether a queued or running task exists for `app`.
    pub async fn in_flight(&self, app: &PackageIdentity) -> bool {
        let state = self.inner.lock().await;
        state
            .tasks
            .values()
            .any(|task| &task.app == app && !task.status.is_terminal())
    }

    /// Drops bookkeeping for finished tasks and returns how many were removed.
    pub async fn prune_terminal(&self) -> usize {
        let mut state = self.inner.lock().await;
        let finished: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|task| task.status.is_terminal())
            .map(|task| task.id)
            .collect();
        for task_id in &finished {
            state.tasks.remove(task_id);
            state.completion_notifiers.remove(task_id);
        }

        let active_apps: Vec<PackageIdentity> =
            state.tasks.values().map(|task| task.app.clone()).collect();
        state
            .app_locks
            .retain(|app, _| active_apps.contains(app));

        finished.len()
    }

    pub async fn wait_for_terminal(
        &self,
        task_id: TaskId,
        timeout_duration: Option<Duration>,
    ) -> OrchestrationResult<TaskRuntimeSnapshot> {
        loop {
            let (snapshot, notify) = {
                let state = self.inner.lock().await;
                let snapshot = state
                    .tasks
                    .get(&task_id)
                    .cloned()
                    .ok_or_else(|| task_lookup_error(task_id))?;
                let notify = state
                    .completion_notifiers
                    .get(&task_id)
                    .cloned()
                    .ok_or_else(|| task_lookup_error(task_id))?;
                (snapshot, notify)
            };

            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }

            // Register interest before re-checking so a completion between the
            // check above and the await below is not missed.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.status(task_id).await?.is_terminal() {
                continue;
            }

            if let Some(duration) = timeout_duration {
                timeout(duration, notified).await.map_err(|_| CoreError {
                    app: Some(snapshot.app.clone()),
                    step: None,
                    kind: CoreErrorKind::Timeout,
                    message: format!("timed out waiting for task '{}' to complete", task_id.0),
                })?;
            } else {
                notified.await;
            }
        }
    }
}

async fn set_running(inner: &Arc<Mutex<QueueState>>, task_id: TaskId) {
    let mut state = inner.lock().await;
    if let Some(task) = state.tasks.get_mut(&task_id) {
        task.status = TaskStatus::Running;
        task.started_at = Some(SystemTime::now());
    }
}

async fn set_completed(inner: &Arc<Mutex<QueueState>>, task_id: TaskId, report: DiscoveryReport) {
    let mut state = inner.lock().await;
    if let Some(task) = state.tasks.get_mut(&task_id) {
        task.status = TaskStatus::Completed;
        task.finished_at = Some(SystemTime::now());
        task.report = Some(report);
    }
}

async fn set_failed(inner: &Arc<Mutex<QueueState>>, task_id: TaskId, message: String) {
    let mut state = inner.lock().await;
    if let Some(task) = state.tasks.get_mut(&task_id) {
        task.status = TaskStatus::Failed;
        task.finished_at = Some(SystemTime::now());
        task.error_message = Some(message);
    }
}

fn task_lookup_error(task_id: TaskId) -> CoreError {
    CoreError::new(
        CoreErrorKind::InvalidInput,
        format!("unknown task id '{}'", task_id.0),
    )
}
