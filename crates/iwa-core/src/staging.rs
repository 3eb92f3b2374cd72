use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use semver::Version;
use sha2::{Digest, Sha256};

use crate::models::{CoreError, CoreErrorKind, PackageIdentity};

const SCRATCH_DIR: &str = ".scratch";
const BUNDLE_EXTENSION: &str = "swbn";

/// A downloaded bundle that has not been validated yet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScratchBundle {
    pub path: PathBuf,
    pub sha256: String,
    pub size: u64,
}

/// Directory layout for downloaded bundles:
///
/// - `<root>/.scratch/<app>-<version>.swbn.partial` while a bundle is being
///   validated,
/// - `<root>/<app>/<version>-<sha256 prefix>.swbn` once it is staged as a
///   pending update.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn app_dir(&self, app: &PackageIdentity) -> PathBuf {
        self.root.join(app.as_str())
    }

    pub fn scratch_path(&self, app: &PackageIdentity, version: &Version) -> PathBuf {
        self.root
            .join(SCRATCH_DIR)
            .join(format!("{app}-{version}.{BUNDLE_EXTENSION}.partial"))
    }

    pub fn write_scratch(
        &self,
        app: &PackageIdentity,
        version: &Version,
        bytes: &[u8],
    ) -> Result<ScratchBundle, CoreError> {
        let path = self.scratch_path(app, version);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|error| io_error("create scratch dir", error))?;
        }
        fs::write(&path, bytes).map_err(|error| io_error("write scratch bundle", error))?;

        Ok(ScratchBundle {
            path,
            sha256: sha256_hex(bytes),
            size: bytes.len() as u64,
        })
    }

    /// Moves a validated scratch bundle into the app's permanent staging
    /// directory and returns its new location.
    pub fn promote(
        &self,
        app: &PackageIdentity,
        version: &Version,
        scratch: &ScratchBundle,
    ) -> Result<PathBuf, CoreError> {
        let app_dir = self.app_dir(app);
        fs::create_dir_all(&app_dir).map_err(|error| io_error("create staging dir", error))?;

        let digest_prefix = &scratch.sha256[..scratch.sha256.len().min(16)];
        let destination = app_dir.join(format!("{version}-{digest_prefix}.{BUNDLE_EXTENSION}"));
        fs::rename(&scratch.path, &destination)
            .map_err(|error| io_error("move bundle into staging", error))?;
        Ok(destination)
    }

    /// Best-effort removal of a bundle file.
    pub fn discard(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to remove bundle file"
                );
            }
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

fn io_error(operation: &str, error: io::Error) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("staging {operation} failed: {error}"),
    )
}
