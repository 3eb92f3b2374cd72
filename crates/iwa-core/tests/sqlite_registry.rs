mod common;

use std::path::PathBuf;
use std::sync::Arc;

use iwa_core::discovery::UpdateDiscoveryTask;
use iwa_core::models::{
    AppKind, CoreErrorKind, DiscoverySuccess, InstalledAppRecord, PendingUpdate,
};
use iwa_core::persistence::{AppRegistry, MigrationStore};
use iwa_core::sqlite::{SqliteStore, current_schema_version, migration, migrations};

use common::{Harness, identity, manifest_url, unique_temp_path, version};

fn migrated_store(test_name: &str) -> SqliteStore {
    let store = SqliteStore::new(unique_temp_path(test_name).with_extension("sqlite3"));
    store.migrate_to_latest().unwrap();
    store
}

fn cleanup(store: &SqliteStore) {
    let _ = std::fs::remove_file(store.database_path());
}

fn record(app: &str) -> InstalledAppRecord {
    InstalledAppRecord::isolated(identity(app), version("1.2.3"), format!("/apps/{app}.swbn"))
        .with_update_manifest_url(manifest_url(app))
}

#[test]
fn migration_versions_are_strictly_increasing_with_both_directions_defined() {
    let mut previous = 0;
    for entry in migrations() {
        assert!(entry.version > previous);
        assert!(!entry.up_sql.trim().is_empty());
        assert!(!entry.down_sql.trim().is_empty());
        previous = entry.version;
    }
    assert_eq!(
        migration(current_schema_version()).map(|entry| entry.version),
        Some(current_schema_version())
    );
}

#[test]
fn migrations_apply_and_roll_back() {
    let store = SqliteStore::new(unique_temp_path("migrations").with_extension("sqlite3"));
    assert_eq!(store.current_version().unwrap(), 0);
    assert_eq!(store.planned_migrations(0).len(), migrations().len());

    store.migrate_to_latest().unwrap();
    assert_eq!(store.current_version().unwrap(), current_schema_version());
    store.upsert_app(&record("app")).unwrap();

    store.apply_migration(0).unwrap();
    assert_eq!(store.current_version().unwrap(), 0);

    store.migrate_to_latest().unwrap();
    assert!(store.list_apps().unwrap().is_empty());

    let error = store
        .apply_migration(current_schema_version() + 1)
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::StorageFailure);

    cleanup(&store);
}

#[test]
fn registry_operations_require_a_migrated_schema() {
    let store = SqliteStore::new(unique_temp_path("unmigrated").with_extension("sqlite3"));

    let error = store.list_apps().unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::StorageFailure);
    assert!(error.message.contains("migrations"));

    cleanup(&store);
}

#[test]
fn records_round_trip_through_sqlite() {
    let store = migrated_store("round-trip");
    let mut web = record("web");
    web.kind = AppKind::Web;
    web.update_manifest_url = None;
    let mut pending = record("pending");
    pending.pending_update = Some(PendingUpdate {
        staged_location: PathBuf::from("/staging/pending/2.0.0.swbn"),
        version: version("2.0.0-rc.1"),
    });

    for app in [&web, &pending, &record("plain")] {
        store.upsert_app(app).unwrap();
    }

    assert_eq!(store.get_app(&identity("web")).unwrap(), Some(web.clone()));
    assert_eq!(
        store.get_app(&identity("pending")).unwrap(),
        Some(pending.clone())
    );
    assert_eq!(store.get_app(&identity("missing")).unwrap(), None);

    let listed: Vec<String> = store
        .list_apps()
        .unwrap()
        .into_iter()
        .map(|app| app.identity.to_string())
        .collect();
    assert_eq!(listed, vec!["pending", "plain", "web"]);

    let mut updated = record("plain");
    updated.current_version = version("1.3.0");
    store.upsert_app(&updated).unwrap();
    assert_eq!(
        store.get_app(&identity("plain")).unwrap().unwrap().current_version,
        version("1.3.0")
    );

    assert!(store.remove_app(&identity("plain")).unwrap());
    assert!(!store.remove_app(&identity("plain")).unwrap());

    cleanup(&store);
}

#[test]
fn pending_update_write_touches_only_the_pending_fields() {
    let store = migrated_store("pending-write");
    store.upsert_app(&record("app")).unwrap();

    let first = PendingUpdate {
        staged_location: PathBuf::from("/staging/app/2.0.0.swbn"),
        version: version("2.0.0"),
    };
    let second = PendingUpdate {
        staged_location: PathBuf::from("/staging/app/2.1.0.swbn"),
        version: version("2.1.0"),
    };

    assert_eq!(store.set_pending_update(&identity("app"), &first).unwrap(), None);
    assert_eq!(
        store.set_pending_update(&identity("app"), &second).unwrap(),
        Some(first)
    );

    let stored = store.get_app(&identity("app")).unwrap().unwrap();
    assert_eq!(stored.current_version, version("1.2.3"));
    assert_eq!(stored.current_location, PathBuf::from("/apps/app.swbn"));
    assert_eq!(stored.update_manifest_url, Some(manifest_url("app")));
    assert_eq!(stored.pending_update, Some(second));

    cleanup(&store);
}

#[test]
fn pending_update_write_rejects_missing_and_non_isolated_apps() {
    let store = migrated_store("pending-reject");
    let mut web = record("web");
    web.kind = AppKind::Web;
    store.upsert_app(&web).unwrap();
    let pending = PendingUpdate {
        staged_location: PathBuf::from("/staging/x.swbn"),
        version: version("9.0.0"),
    };

    for app in ["missing", "web"] {
        let error = store
            .set_pending_update(&identity(app), &pending)
            .unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::NotInstalled);
        assert_eq!(error.app, Some(identity(app)));
    }
    assert_eq!(store.get_app(&identity("web")).unwrap(), Some(web));

    cleanup(&store);
}

#[tokio::test]
async fn discovery_stages_updates_into_a_sqlite_registry() {
    let store = Arc::new(migrated_store("sqlite-discovery"));
    store.upsert_app(&record("app")).unwrap();
    let harness = Harness::new("sqlite-discovery", store.clone());
    harness.fetcher.publish("app", &["1.2.3", "1.4.0"]);

    let run = || {
        UpdateDiscoveryTask::new(
            identity("app"),
            manifest_url("app"),
            harness.collaborators(),
            harness.limits(),
        )
        .run()
    };

    assert_eq!(
        run().await.outcome,
        Ok(DiscoverySuccess::UpdateFoundAndSavedInDatabase)
    );
    assert_eq!(run().await.outcome, Ok(DiscoverySuccess::UpdateAlreadyPending));

    let pending = store
        .get_app(&identity("app"))
        .unwrap()
        .unwrap()
        .pending_update
        .unwrap();
    assert_eq!(pending.version, version("1.4.0"));
    assert!(pending.staged_location.exists());

    cleanup(&store);
}
