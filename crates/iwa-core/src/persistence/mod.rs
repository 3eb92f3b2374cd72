pub mod in_memory;

use crate::models::{CoreError, InstalledAppRecord, PackageIdentity, PendingUpdate};

pub use in_memory::InMemoryAppRegistry;

pub type PersistenceResult<T> = Result<T, CoreError>;

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

/// Installed-app records. Record writes for one app are exclusive: a pending
/// update write and a concurrent uninstall of the same app never interleave.
pub trait AppRegistry: Send + Sync {
    fn get_app(&self, identity: &PackageIdentity) -> PersistenceResult<Option<InstalledAppRecord>>;

    fn list_apps(&self) -> PersistenceResult<Vec<InstalledAppRecord>>;

    fn upsert_app(&self, record: &InstalledAppRecord) -> PersistenceResult<()>;

    /// Returns whether a record was removed.
    fn remove_app(&self, identity: &PackageIdentity) -> PersistenceResult<bool>;

    /// Replaces only the pending update of an installed isolated app and
    /// returns the pending update it superseded. Fails with
    /// `CoreErrorKind::NotInstalled` when no such app exists.
    fn set_pending_update(
        &self,
        identity: &PackageIdentity,
        pending: &PendingUpdate,
    ) -> PersistenceResult<Option<PendingUpdate>>;
}
