mod common;

use std::sync::Arc;
use std::time::Duration;

use iwa_core::models::{
    AppKind, DiscoveryError, DiscoverySuccess, ForceInstallEntry, InstalledAppRecord,
};
use iwa_core::persistence::{AppRegistry, InMemoryAppRegistry};
use iwa_core::{FeatureToggles, UpdateManager, UpdateManagerConfig};

use common::{Harness, bundle_url, identity, manifest_url, version};

fn installed(app: &str, current: &str) -> InstalledAppRecord {
    InstalledAppRecord::isolated(
        identity(app),
        version(current),
        format!("/apps/{app}/{current}.swbn"),
    )
    .with_update_manifest_url(manifest_url(app))
}

fn config() -> UpdateManagerConfig {
    UpdateManagerConfig {
        manifest_timeout_secs: 5,
        bundle_timeout_secs: 5,
        dry_run_timeout_secs: 5,
        ..UpdateManagerConfig::default()
    }
}

fn manager_with(
    test_name: &str,
    records: Vec<InstalledAppRecord>,
    config: UpdateManagerConfig,
) -> (Harness, Arc<UpdateManager>) {
    let harness = Harness::new(test_name, Arc::new(InMemoryAppRegistry::with_apps(records)));
    let manager = UpdateManager::new(config, harness.collaborators()).unwrap();
    (harness, manager)
}

#[tokio::test]
async fn timer_starts_with_the_first_isolated_app_and_stops_with_the_last() {
    let (harness, manager) = manager_with("timer-transitions", Vec::new(), config());

    assert!(!manager.refresh_scheduler().await.unwrap());
    assert!(!manager.is_scheduler_running().await);

    harness.registry.upsert_app(&installed("app", "1.0.0")).unwrap();
    manager.on_app_installed(&identity("app")).await.unwrap();
    assert!(manager.is_scheduler_running().await);

    harness.registry.upsert_app(&installed("second", "1.0.0")).unwrap();
    manager.on_app_installed(&identity("second")).await.unwrap();
    assert!(manager.is_scheduler_running().await);

    harness.registry.remove_app(&identity("app")).unwrap();
    manager.on_app_uninstalled(&identity("app")).await.unwrap();
    assert!(manager.is_scheduler_running().await);

    harness.registry.remove_app(&identity("second")).unwrap();
    manager.on_app_uninstalled(&identity("second")).await.unwrap();
    assert!(!manager.is_scheduler_running().await);
}

#[tokio::test]
async fn non_isolated_apps_do_not_start_the_timer() {
    let mut web_app = installed("web", "1.0.0");
    web_app.kind = AppKind::Web;
    let (_harness, manager) = manager_with("timer-web-only", vec![web_app], config());

    assert!(!manager.refresh_scheduler().await.unwrap());
}

#[tokio::test]
async fn either_feature_toggle_off_keeps_the_timer_stopped() {
    for features in [
        FeatureToggles {
            isolated_web_apps: false,
            automatic_updates: true,
        },
        FeatureToggles {
            isolated_web_apps: true,
            automatic_updates: false,
        },
    ] {
        let (_harness, manager) = manager_with(
            "timer-toggles",
            vec![installed("app", "1.0.0")],
            UpdateManagerConfig {
                features,
                ..config()
            },
        );

        assert!(!manager.refresh_scheduler().await.unwrap());
        assert!(!manager.is_scheduler_running().await);
    }
}

#[tokio::test]
async fn isolated_apps_toggle_off_disables_manual_discovery() {
    let (harness, manager) = manager_with(
        "manual-disabled",
        vec![installed("app", "1.0.0")],
        UpdateManagerConfig {
            features: FeatureToggles {
                isolated_web_apps: false,
                automatic_updates: true,
            },
            ..config()
        },
    );
    harness.fetcher.publish("app", &["2.0.0"]);

    assert!(manager.discover_updates_now().await.unwrap().is_empty());
    assert!(harness.fetcher.requests().is_empty());
}

#[tokio::test]
async fn one_failing_app_does_not_affect_another() {
    let (harness, manager) = manager_with(
        "failure-isolation",
        vec![installed("broken", "1.0.0"), installed("healthy", "1.0.0")],
        config(),
    );
    harness
        .fetcher
        .respond(manifest_url("broken"), 200, "definitely not json");
    harness.fetcher.publish("healthy", &["2.0.0"]);

    let reports = manager.run_discovery_cycle().await.unwrap();

    assert_eq!(reports.len(), 2);
    let broken = reports
        .iter()
        .find(|report| report.app == identity("broken"))
        .unwrap();
    let healthy = reports
        .iter()
        .find(|report| report.app == identity("healthy"))
        .unwrap();
    assert!(matches!(
        broken.outcome,
        Err(DiscoveryError::ManifestInvalidJson(_))
    ));
    assert_eq!(
        healthy.outcome,
        Ok(DiscoverySuccess::UpdateFoundAndSavedInDatabase)
    );

    let record = harness
        .registry
        .get_app(&identity("healthy"))
        .unwrap()
        .unwrap();
    assert_eq!(record.pending_update.unwrap().version, version("2.0.0"));
    assert!(
        harness
            .registry
            .get_app(&identity("broken"))
            .unwrap()
            .unwrap()
            .pending_update
            .is_none()
    );
}

#[tokio::test]
async fn apps_without_a_manifest_url_are_not_discovered() {
    let without_url =
        InstalledAppRecord::isolated(identity("local"), version("1.0.0"), "/apps/local");
    let (_harness, manager) = manager_with("no-manifest-url", vec![without_url], config());

    assert!(manager.run_discovery_cycle().await.unwrap().is_empty());
}

#[tokio::test]
async fn policy_only_apps_are_reported_as_not_installed() {
    let (harness, manager) = manager_with("policy-only", Vec::new(), config());
    harness.fetcher.publish("forced", &["1.0.0"]);
    manager
        .set_policy(vec![ForceInstallEntry {
            update_manifest_url: manifest_url("forced"),
            web_bundle_id: identity("forced"),
        }])
        .await;

    let reports = manager.run_discovery_cycle().await.unwrap();

    assert_eq!(reports.len(), 1);
    assert!(matches!(
        reports[0].outcome,
        Err(DiscoveryError::IwaNotInstalled(_))
    ));
    assert_eq!(harness.fetcher.request_count(&bundle_url("forced", "1.0.0")), 0);
}

#[tokio::test]
async fn policy_manifest_url_overrides_the_stored_one() {
    let policy_url = "https://policy.example.test/app/manifest.json";
    let (harness, manager) = manager_with(
        "policy-override",
        vec![installed("app", "1.0.0")],
        UpdateManagerConfig {
            force_install: vec![ForceInstallEntry {
                update_manifest_url: policy_url.to_string(),
                web_bundle_id: identity("app"),
            }],
            ..config()
        },
    );
    harness.fetcher.respond(
        policy_url,
        200,
        format!(
            r#"{{"versions": [{{"src": "{}", "version": "3.0.0"}}]}}"#,
            bundle_url("app", "3.0.0")
        ),
    );
    harness
        .fetcher
        .respond(bundle_url("app", "3.0.0"), 200, b"bundle".to_vec());

    let reports = manager.run_discovery_cycle().await.unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].manifest_url, policy_url);
    assert_eq!(
        reports[0].outcome,
        Ok(DiscoverySuccess::UpdateFoundAndSavedInDatabase)
    );
    assert_eq!(harness.fetcher.request_count(&manifest_url("app")), 0);
}

#[tokio::test]
async fn apps_with_discovery_in_flight_are_skipped() {
    let (harness, manager) =
        manager_with("in-flight-skip", vec![installed("app", "1.0.0")], config());
    harness.fetcher.publish("app", &["1.0.0"]);
    harness
        .fetcher
        .delay(manifest_url("app"), Duration::from_millis(200));

    let first = manager.discover_updates_now().await.unwrap();
    let second = manager.discover_updates_now().await.unwrap();

    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
}

#[tokio::test]
async fn cycle_outcomes_land_in_the_debug_log() {
    let (harness, manager) = manager_with(
        "debug-log",
        vec![installed("current", "2.0.0"), installed("stale", "1.0.0")],
        UpdateManagerConfig {
            debug_log_capacity: 3,
            ..config()
        },
    );
    harness.fetcher.publish("current", &["2.0.0"]);
    harness.fetcher.publish("stale", &["1.1.0"]);

    manager.run_discovery_cycle().await.unwrap();
    manager.run_discovery_cycle().await.unwrap();

    let entries = manager.debug_log().await;
    assert_eq!(entries.len(), 3);
    let stale: Vec<&str> = entries
        .iter()
        .filter(|entry| entry.app_id == "stale")
        .map(|entry| entry.outcome.as_str())
        .collect();
    assert!(stale.contains(&"UpdateAlreadyPending"));
    assert!(
        entries
            .iter()
            .filter(|entry| entry.app_id == "current")
            .all(|entry| entry.outcome == "NoUpdateFound")
    );

    let value = manager.debug_value().await;
    assert_eq!(value["discovery_log"].as_array().unwrap().len(), 3);
    assert_eq!(value["scheduler_running"], false);
    assert_eq!(value["discovery_interval_secs"], 18_000);
    assert_eq!(value["registry_poll_secs"], 60);
}

#[tokio::test]
async fn timer_tick_runs_a_discovery_cycle() {
    let (harness, manager) = manager_with(
        "timer-tick",
        vec![installed("app", "1.0.0")],
        UpdateManagerConfig {
            discovery_interval_secs: 1,
            ..config()
        },
    );
    harness.fetcher.publish("app", &["2.0.0"]);

    assert!(manager.refresh_scheduler().await.unwrap());
    assert!(manager.debug_log().await.is_empty());

    let mut entries = Vec::new();
    for _ in 0..60 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        entries = manager.debug_log().await;
        if !entries.is_empty() {
            break;
        }
    }

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, "UpdateFoundAndDryRunSuccessful");

    manager.shutdown().await;
    assert!(!manager.is_scheduler_running().await);
}

async fn wait_for_scheduler(manager: &UpdateManager, running: bool) -> bool {
    for _ in 0..80 {
        if manager.is_scheduler_running().await == running {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn registry_watch_follows_changes_made_without_hooks() {
    let (harness, manager) = manager_with(
        "registry-watch",
        Vec::new(),
        UpdateManagerConfig {
            registry_poll_secs: 1,
            ..config()
        },
    );

    assert!(!manager.start_registry_watch().await.unwrap());

    harness.registry.upsert_app(&installed("app", "1.0.0")).unwrap();
    assert!(wait_for_scheduler(&manager, true).await, "timer never started");

    harness.registry.remove_app(&identity("app")).unwrap();
    assert!(wait_for_scheduler(&manager, false).await, "timer never stopped");

    manager.shutdown().await;
}

#[tokio::test]
async fn timer_tick_stops_the_timer_once_the_last_app_is_gone() {
    let (harness, manager) = manager_with(
        "timer-tick-stop",
        vec![installed("app", "1.0.0")],
        UpdateManagerConfig {
            discovery_interval_secs: 1,
            ..config()
        },
    );
    harness.fetcher.publish("app", &["2.0.0"]);
    assert!(manager.refresh_scheduler().await.unwrap());

    harness.registry.remove_app(&identity("app")).unwrap();
    assert!(wait_for_scheduler(&manager, false).await, "timer kept running");
    assert!(manager.debug_log().await.is_empty());
    assert!(harness.fetcher.requests().is_empty());
}

#[test]
fn zero_interval_config_is_rejected() {
    let harness = Harness::new("zero-interval", Arc::new(InMemoryAppRegistry::new()));
    let result = UpdateManager::new(
        UpdateManagerConfig {
            discovery_interval_secs: 0,
            ..UpdateManagerConfig::default()
        },
        harness.collaborators(),
    );

    assert!(result.is_err());
}
