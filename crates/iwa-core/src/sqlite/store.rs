use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use semver::Version;

use crate::models::{
    AppKind, CoreError, CoreErrorKind, InstalledAppRecord, PackageIdentity, PendingUpdate,
};
use crate::persistence::{AppRegistry, MigrationStore, PersistenceResult};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migration, migrations};

const MIGRATIONS_TABLE: &str = "iwa_schema_migrations";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const APP_COLUMNS: &str = "identity, app_kind, current_version, current_location, \
     update_manifest_url, pending_version, pending_location";

pub struct SqliteStore {
    database_path: PathBuf,
}

impl SqliteStore {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn planned_migrations(&self, from_version: i64) -> Vec<&'static SqliteMigration> {
        migrations()
            .iter()
            .filter(|entry| entry.version > from_version)
            .collect()
    }

    pub fn migrate_to_latest(&self) -> PersistenceResult<()> {
        self.apply_migration(current_schema_version())
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = open_connection(&self.database_path)
            .map_err(|error| storage_error(operation_name, error))?;
        operation(&mut connection).map_err(|error| storage_error(operation_name, error))
    }
}

impl MigrationStore for SqliteStore {
    fn current_version(&self) -> PersistenceResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            read_current_version(connection)
        })
    }

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(storage_error_text(
                "apply_migration",
                format!("invalid migration target version '{target_version}'"),
            ));
        }

        self.with_connection("apply_migration", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;

            if target_version > current_version {
                for version in (current_version + 1)..=target_version {
                    apply_up_migration(connection, defined_migration(version)?)?;
                }
            } else if target_version < current_version {
                for version in ((target_version + 1)..=current_version).rev() {
                    apply_down_migration(connection, defined_migration(version)?)?;
                }
            } else {
                // A recorded version with missing tables is repaired by
                // replaying the DDL; column additions tolerate reruns.
                for version in 1..=target_version {
                    execute_batch_tolerant(connection, defined_migration(version)?.up_sql)?;
                }
            }

            Ok(())
        })
    }
}

impl AppRegistry for SqliteStore {
    fn get_app(&self, identity: &PackageIdentity) -> PersistenceResult<Option<InstalledAppRecord>> {
        self.with_connection("get_app", |connection| {
            ensure_schema_ready(connection)?;
            connection
                .query_row(
                    &format!("SELECT {APP_COLUMNS} FROM installed_apps WHERE identity = ?1"),
                    [identity.as_str()],
                    read_app_row,
                )
                .optional()
        })
    }

    fn list_apps(&self) -> PersistenceResult<Vec<InstalledAppRecord>> {
        self.with_connection("list_apps", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(&format!(
                "SELECT {APP_COLUMNS} FROM installed_apps ORDER BY identity ASC"
            ))?;
            let apps = statement
                .query_map([], read_app_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(apps)
        })
    }

    fn upsert_app(&self, record: &InstalledAppRecord) -> PersistenceResult<()> {
        self.with_connection("upsert_app", |connection| {
            ensure_schema_ready(connection)?;
            let (pending_version, pending_location) = split_pending(record.pending_update.as_ref());
            connection.execute(
                "
INSERT INTO installed_apps (
    identity, app_kind, current_version, current_location, update_manifest_url,
    pending_version, pending_location, updated_at_unix
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, strftime('%s', 'now'))
ON CONFLICT(identity) DO UPDATE SET
    app_kind = excluded.app_kind,
    current_version = excluded.current_version,
    current_location = excluded.current_location,
    update_manifest_url = excluded.update_manifest_url,
    pending_version = excluded.pending_version,
    pending_location = excluded.pending_location,
    updated_at_unix = excluded.updated_at_unix
",
                (
                    record.identity.as_str(),
                    record.kind.as_str(),
                    record.current_version.to_string(),
                    path_to_sqlite(&record.current_location),
                    record.update_manifest_url.as_deref(),
                    pending_version,
                    pending_location,
                ),
            )?;
            Ok(())
        })
    }

    fn remove_app(&self, identity: &PackageIdentity) -> PersistenceResult<bool> {
        self.with_connection("remove_app", |connection| {
            ensure_schema_ready(connection)?;
            let removed = connection.execute(
                "DELETE FROM installed_apps WHERE identity = ?1",
                [identity.as_str()],
            )?;
            Ok(removed > 0)
        })
    }

    fn set_pending_update(
        &self,
        identity: &PackageIdentity,
        pending: &PendingUpdate,
    ) -> PersistenceResult<Option<PendingUpdate>> {
        let outcome = self.with_connection("set_pending_update", |connection| {
            ensure_schema_ready(connection)?;
            // IMMEDIATE takes the write lock up front so the read below and the
            // update cannot interleave with another writer.
            let transaction =
                connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let existing = transaction
                .query_row(
                    "SELECT app_kind, pending_version, pending_location
                     FROM installed_apps WHERE identity = ?1",
                    [identity.as_str()],
                    |row| {
                        let kind = parse_app_kind(&row.get::<_, String>(0)?)?;
                        let previous =
                            join_pending(row.get::<_, Option<String>>(1)?, row.get(2)?)?;
                        Ok((kind, previous))
                    },
                )
                .optional()?;

            let Some((AppKind::Isolated, previous)) = existing else {
                return Ok(None);
            };

            let (pending_version, pending_location) = split_pending(Some(pending));
            transaction.execute(
                "UPDATE installed_apps
                 SET pending_version = ?2, pending_location = ?3,
                     updated_at_unix = strftime('%s', 'now')
                 WHERE identity = ?1",
                (identity.as_str(), pending_version, pending_location),
            )?;
            transaction.commit()?;
            Ok(Some(previous))
        })?;

        outcome.ok_or_else(|| CoreError {
            app: Some(identity.clone()),
            step: None,
            kind: CoreErrorKind::NotInstalled,
            message: format!("no installed isolated app '{identity}'"),
        })
    }
}

fn defined_migration(version: i64) -> rusqlite::Result<&'static SqliteMigration> {
    migration(version).ok_or_else(|| {
        storage_error_sqlite(&format!("migration version '{version}' is not defined"))
    })
}

fn open_connection(database_path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    let connection = Connection::open(database_path)?;
    connection.busy_timeout(BUSY_TIMEOUT)?;
    Ok(connection)
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
"
    ))?;
    Ok(())
}

fn ensure_schema_ready(connection: &Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(connection)?;
    let version = read_current_version(connection)?;
    if version < current_schema_version() {
        return Err(storage_error_sqlite(
            "database schema is not up to date; apply migrations before registry operations",
        ));
    }
    Ok(())
}

fn read_current_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

fn apply_up_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    execute_batch_tolerant(&transaction, migration.up_sql)?;
    transaction.execute(
        &format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
             VALUES (?1, ?2, strftime('%s', 'now'))"
        ),
        (migration.version, migration.name),
    )?;
    transaction.commit()?;
    Ok(())
}

/// `ALTER TABLE ADD COLUMN` is not idempotent in SQLite; a rerun reports a
/// duplicate column, which is accepted here.
fn execute_batch_tolerant(connection: &Connection, sql: &str) -> rusqlite::Result<()> {
    match connection.execute_batch(sql) {
        Ok(()) => Ok(()),
        Err(error) if error.to_string().contains("duplicate column name") => Ok(()),
        Err(error) => Err(error),
    }
}

fn apply_down_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.down_sql)?;
    transaction.execute(
        &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?1"),
        [migration.version],
    )?;
    transaction.commit()?;
    Ok(())
}

fn read_app_row(row: &Row<'_>) -> rusqlite::Result<InstalledAppRecord> {
    let identity = parse_identity(&row.get::<_, String>(0)?)?;
    let kind = parse_app_kind(&row.get::<_, String>(1)?)?;
    let current_version = parse_version(&row.get::<_, String>(2)?)?;
    let current_location = PathBuf::from(row.get::<_, String>(3)?);
    let update_manifest_url = row.get(4)?;
    let pending_update = join_pending(row.get(5)?, row.get(6)?)?;

    Ok(InstalledAppRecord {
        identity,
        kind,
        current_version,
        current_location,
        update_manifest_url,
        pending_update,
    })
}

fn split_pending(pending: Option<&PendingUpdate>) -> (Option<String>, Option<String>) {
    match pending {
        Some(pending) => (
            Some(pending.version.to_string()),
            Some(path_to_sqlite(&pending.staged_location)),
        ),
        None => (None, None),
    }
}

fn join_pending(
    version: Option<String>,
    location: Option<String>,
) -> rusqlite::Result<Option<PendingUpdate>> {
    match (version, location) {
        (Some(version), Some(location)) => Ok(Some(PendingUpdate {
            staged_location: PathBuf::from(location),
            version: parse_version(&version)?,
        })),
        (None, None) => Ok(None),
        _ => Err(storage_error_sqlite(
            "pending update record must have both a version and a location",
        )),
    }
}

fn path_to_sqlite(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn parse_identity(raw: &str) -> rusqlite::Result<PackageIdentity> {
    PackageIdentity::new(raw).map_err(|_| {
        storage_error_sqlite(&format!(
            "invalid package identity '{raw}' found in persisted sqlite record"
        ))
    })
}

fn parse_app_kind(raw: &str) -> rusqlite::Result<AppKind> {
    match raw {
        "isolated" => Ok(AppKind::Isolated),
        "web" => Ok(AppKind::Web),
        _ => Err(storage_error_sqlite(&format!(
            "unknown app kind '{raw}' in sqlite record"
        ))),
    }
}

fn parse_version(raw: &str) -> rusqlite::Result<Version> {
    Version::parse(raw).map_err(|error| {
        storage_error_sqlite(&format!("invalid version '{raw}' in sqlite record: {error}"))
    })
}

fn storage_error(operation: &str, error: rusqlite::Error) -> CoreError {
    storage_error_text(operation, error.to_string())
}

fn storage_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

fn storage_error_text(operation: &str, message: impl AsRef<str>) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("sqlite {operation} failed: {}", message.as_ref()),
    )
}
