use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::models::{CoreError, CoreErrorKind, InstalledAppRecord, PackageIdentity, PendingUpdate};
use crate::persistence::{AppRegistry, PersistenceResult};

type AppMap = BTreeMap<PackageIdentity, InstalledAppRecord>;

#[derive(Default)]
pub struct InMemoryAppRegistry {
    apps: Mutex<AppMap>,
}

impl InMemoryAppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_apps(records: impl IntoIterator<Item = InstalledAppRecord>) -> Self {
        let apps = records
            .into_iter()
            .map(|record| (record.identity.clone(), record))
            .collect();
        Self {
            apps: Mutex::new(apps),
        }
    }

    fn lock_apps(&self) -> PersistenceResult<MutexGuard<'_, AppMap>> {
        self.apps.lock().map_err(|_| {
            CoreError::new(CoreErrorKind::Internal, "app registry mutex poisoned")
        })
    }
}

impl AppRegistry for InMemoryAppRegistry {
    fn get_app(&self, identity: &PackageIdentity) -> PersistenceResult<Option<InstalledAppRecord>> {
        Ok(self.lock_apps()?.get(identity).cloned())
    }

    fn list_apps(&self) -> PersistenceResult<Vec<InstalledAppRecord>> {
        Ok(self.lock_apps()?.values().cloned().collect())
    }

    fn upsert_app(&self, record: &InstalledAppRecord) -> PersistenceResult<()> {
        self.lock_apps()?.insert(record.identity.clone(), record.clone());
        Ok(())
    }

    fn remove_app(&self, identity: &PackageIdentity) -> PersistenceResult<bool> {
        Ok(self.lock_apps()?.remove(identity).is_some())
    }

    fn set_pending_update(
        &self,
        identity: &PackageIdentity,
        pending: &PendingUpdate,
    ) -> PersistenceResult<Option<PendingUpdate>> {
        let mut apps = self.lock_apps()?;
        match apps.get_mut(identity) {
            Some(record) if record.is_isolated() => {
                Ok(record.pending_update.replace(pending.clone()))
            }
            _ => Err(CoreError {
                app: Some(identity.clone()),
                step: None,
                kind: CoreErrorKind::NotInstalled,
                message: format!("no installed isolated app '{identity}'"),
            }),
        }
    }
}
