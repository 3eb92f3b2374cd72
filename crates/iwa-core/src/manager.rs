use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::config::UpdateManagerConfig;
use crate::discovery::{
    DiscoveryCollaborators, DiscoveryLog, DiscoveryLogEntry, UpdateDiscoveryTask,
};
use crate::models::{
    CoreError, CoreErrorKind, DiscoveryReport, ForceInstallEntry, InstalledAppRecord,
    PackageIdentity, TaskId,
};
use crate::orchestration::{DiscoveryScheduler, DiscoveryTaskQueue, TickControl, task_operation};

pub type ManagerResult<T> = Result<T, CoreError>;

/// Owns the set of apps eligible for update discovery and the timer that
/// re-runs discovery for all of them.
///
/// The manager never promotes a pending update; it only stages them.
pub struct UpdateManager {
    config: UpdateManagerConfig,
    collaborators: DiscoveryCollaborators,
    queue: DiscoveryTaskQueue,
    policy: Mutex<Vec<ForceInstallEntry>>,
    debug_log: Arc<Mutex<DiscoveryLog>>,
    scheduler: Mutex<DiscoveryScheduler>,
    registry_watch: Mutex<DiscoveryScheduler>,
    this: Weak<UpdateManager>,
}

impl UpdateManager {
    pub fn new(
        config: UpdateManagerConfig,
        collaborators: DiscoveryCollaborators,
    ) -> ManagerResult<Arc<Self>> {
        config.validate()?;

        Ok(Arc::new_cyclic(|this| Self {
            queue: DiscoveryTaskQueue::new(config.max_concurrent_discoveries),
            policy: Mutex::new(config.force_install.clone()),
            debug_log: Arc::new(Mutex::new(DiscoveryLog::new(config.debug_log_capacity))),
            scheduler: Mutex::new(DiscoveryScheduler::new(config.discovery_interval())),
            registry_watch: Mutex::new(DiscoveryScheduler::new(config.registry_poll_interval())),
            collaborators,
            config,
            this: this.clone(),
        }))
    }

    pub fn config(&self) -> &UpdateManagerConfig {
        &self.config
    }

    /// Starts the timer when the first isolated app appears and stops it when
    /// the last one goes away. Returns whether the timer is running.
    pub async fn refresh_scheduler(&self) -> ManagerResult<bool> {
        let mut scheduler = self.scheduler.lock().await;

        if !self.config.features.automatic_discovery_enabled() {
            if scheduler.is_running() {
                scheduler.stop();
            }
            tracing::debug!("automatic update discovery disabled by feature toggles");
            return Ok(false);
        }

        let installed = self
            .installed_apps()
            .await?
            .iter()
            .filter(|record| record.is_isolated())
            .count();

        match (installed > 0, scheduler.is_running()) {
            (true, false) => {
                let this = self.this.clone();
                scheduler.start(move || scheduled_tick(this.clone()));
                tracing::info!(
                    installed,
                    interval_secs = self.config.discovery_interval_secs,
                    "started update discovery timer"
                );
            }
            (false, true) => {
                scheduler.stop();
                tracing::info!("stopped update discovery timer; no isolated apps installed");
            }
            _ => {}
        }

        Ok(scheduler.is_running())
    }

    /// Refreshes the timer now and again every `registry_poll_secs`, so apps
    /// registered or removed behind the manager's back still start or stop it.
    pub async fn start_registry_watch(&self) -> ManagerResult<bool> {
        let running = self.refresh_scheduler().await?;

        let this = self.this.clone();
        self.registry_watch
            .lock()
            .await
            .start(move || registry_tick(this.clone()));
        tracing::debug!(
            poll_secs = self.config.registry_poll_secs,
            "watching app registry for changes"
        );
        Ok(running)
    }

    pub async fn on_app_installed(&self, app: &PackageIdentity) -> ManagerResult<()> {
        tracing::debug!(app = %app, "isolated app installed");
        self.refresh_scheduler().await.map(|_| ())
    }

    pub async fn on_app_uninstalled(&self, app: &PackageIdentity) -> ManagerResult<()> {
        tracing::debug!(app = %app, "isolated app uninstalled");
        self.refresh_scheduler().await.map(|_| ())
    }

    /// Replaces the force-install list used by the next cycle.
    pub async fn set_policy(&self, entries: Vec<ForceInstallEntry>) {
        *self.policy.lock().await = entries;
    }

    pub async fn policy(&self) -> Vec<ForceInstallEntry> {
        self.policy.lock().await.clone()
    }

    /// Queues one discovery task per eligible app and returns the task ids.
    /// Apps that already have a queued or running task are skipped.
    pub async fn discover_updates_now(&self) -> ManagerResult<Vec<TaskId>> {
        if !self.config.features.isolated_web_apps {
            tracing::debug!("isolated apps disabled; skipping update discovery");
            return Ok(Vec::new());
        }

        self.queue.prune_terminal().await;

        let candidates = self.discovery_candidates().await?;
        let mut task_ids = Vec::with_capacity(candidates.len());
        for (app, manifest_url) in candidates {
            if self.queue.in_flight(&app).await {
                tracing::debug!(app = %app, "discovery already in flight; skipping");
                continue;
            }

            let task = UpdateDiscoveryTask::new(
                app.clone(),
                manifest_url,
                self.collaborators.clone(),
                self.config.limits(),
            );
            let debug_log = self.debug_log.clone();
            let task_id = self
                .queue
                .spawn(
                    app,
                    task_operation(move || async move {
                        let report = task.run().await;
                        debug_log.lock().await.record(&report);
                        report
                    }),
                )
                .await?;
            task_ids.push(task_id);
        }

        tracing::info!(queued = task_ids.len(), "queued update discovery cycle");
        Ok(task_ids)
    }

    /// Runs one cycle to completion and returns the reports of the tasks that
    /// finished.
    pub async fn run_discovery_cycle(&self) -> ManagerResult<Vec<DiscoveryReport>> {
        let task_ids = self.discover_updates_now().await?;
        let mut reports = Vec::with_capacity(task_ids.len());
        for task_id in task_ids {
            let snapshot = self.queue.wait_for_terminal(task_id, None).await?;
            match snapshot.report {
                Some(report) => reports.push(report),
                None => tracing::error!(
                    app = %snapshot.app,
                    task_id = task_id.0,
                    error = snapshot.error_message.as_deref().unwrap_or("unknown"),
                    "discovery task ended without a report"
                ),
            }
        }
        Ok(reports)
    }

    pub async fn debug_log(&self) -> Vec<DiscoveryLogEntry> {
        self.debug_log.lock().await.entries()
    }

    /// Snapshot of manager state for support tooling.
    pub async fn debug_value(&self) -> Value {
        let scheduler_running = self.is_scheduler_running().await;
        let policy = self.policy().await;
        let entries = self.debug_log().await;

        json!({
            "scheduler_running": scheduler_running,
            "discovery_interval_secs": self.config.discovery_interval_secs,
            "registry_poll_secs": self.config.registry_poll_secs,
            "features": self.config.features,
            "force_install": policy,
            "discovery_log": entries,
        })
    }

    pub async fn is_scheduler_running(&self) -> bool {
        self.scheduler.lock().await.is_running()
    }

    pub async fn shutdown(&self) {
        self.registry_watch.lock().await.stop();
        self.scheduler.lock().await.stop();
        tracing::info!("update manager shut down");
    }

    async fn installed_apps(&self) -> ManagerResult<Vec<InstalledAppRecord>> {
        let registry = self.collaborators.registry.clone();
        tokio::task::spawn_blocking(move || registry.list_apps())
            .await
            .map_err(|join_error| {
                CoreError::new(
                    CoreErrorKind::Internal,
                    format!("registry listing join failure: {join_error}"),
                )
            })?
    }

    /// Installed isolated apps with a manifest URL plus every policy pair.
    /// A policy URL wins over the one stored with the app.
    async fn discovery_candidates(&self) -> ManagerResult<BTreeMap<PackageIdentity, String>> {
        let mut candidates = BTreeMap::new();
        for record in self.installed_apps().await? {
            if !record.is_isolated() {
                continue;
            }
            if let Some(manifest_url) = record.update_manifest_url {
                candidates.insert(record.identity, manifest_url);
            }
        }
        for entry in self.policy.lock().await.iter() {
            candidates.insert(
                entry.web_bundle_id.clone(),
                entry.update_manifest_url.clone(),
            );
        }
        Ok(candidates)
    }
}

fn scheduled_tick(
    manager: Weak<UpdateManager>,
) -> Pin<Box<dyn Future<Output = TickControl> + Send>> {
    Box::pin(async move {
        let Some(manager) = manager.upgrade() else {
            return TickControl::Stop;
        };
        match manager.refresh_scheduler().await {
            Ok(true) => {}
            Ok(false) => return TickControl::Stop,
            Err(error) => tracing::warn!(
                kind = ?error.kind,
                error = %error.message,
                "failed to re-check installed apps before discovery"
            ),
        }
        if let Err(error) = manager.discover_updates_now().await {
            tracing::error!(
                kind = ?error.kind,
                error = %error.message,
                "scheduled update discovery failed"
            );
        }
        TickControl::Continue
    })
}

async fn registry_tick(manager: Weak<UpdateManager>) -> TickControl {
    let Some(manager) = manager.upgrade() else {
        return TickControl::Stop;
    };
    if let Err(error) = manager.refresh_scheduler().await {
        tracing::warn!(
            kind = ?error.kind,
            error = %error.message,
            "registry re-check failed"
        );
    }
    TickControl::Continue
}
