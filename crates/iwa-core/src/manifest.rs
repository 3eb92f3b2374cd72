//! Update manifest parsing and version selection.
//!
//! The manifest is a small JSON index served next to an app's bundles:
//!
//! ```json
//! { "versions": [ { "src": "https://example.com/app-2.0.0.swbn", "version": "2.0.0" } ] }
//! ```
//!
//! Entries that are not well formed are skipped. A document whose `versions`
//! list is non-empty but contains no usable entry is rejected as malformed; an
//! empty or missing list parses into an empty manifest, which has no
//! applicable version.

use semver::Version;
use serde_json::Value;
use url::Url;

use crate::models::DiscoveryError;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ManifestEntry {
    pub source: Url,
    pub version: Version,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UpdateManifest {
    entries: Vec<ManifestEntry>,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ManifestError {
    #[error("{0}")]
    InvalidJson(String),

    #[error("{0}")]
    InvalidManifest(String),
}

impl From<ManifestError> for DiscoveryError {
    fn from(error: ManifestError) -> Self {
        match error {
            ManifestError::InvalidJson(message) => Self::ManifestInvalidJson(message),
            ManifestError::InvalidManifest(message) => Self::ManifestInvalidManifest(message),
        }
    }
}

impl UpdateManifest {
    pub fn parse(body: &[u8], manifest_url: &Url) -> Result<Self, ManifestError> {
        let document: Value = serde_json::from_slice(body)
            .map_err(|error| ManifestError::InvalidJson(error.to_string()))?;

        let Value::Object(root) = document else {
            return Err(ManifestError::InvalidManifest(
                "manifest root must be a JSON object".to_string(),
            ));
        };

        let raw_versions = match root.get("versions") {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(ManifestError::InvalidManifest(
                    "'versions' must be an array".to_string(),
                ));
            }
        };

        let entries: Vec<ManifestEntry> = raw_versions
            .iter()
            .enumerate()
            .filter_map(|(index, item)| match parse_entry(item, manifest_url) {
                Ok(entry) => Some(entry),
                Err(reason) => {
                    tracing::debug!(
                        manifest_url = %manifest_url,
                        index,
                        reason = %reason,
                        "skipping malformed manifest entry"
                    );
                    None
                }
            })
            .collect();

        if entries.is_empty() && !raw_versions.is_empty() {
            return Err(ManifestError::InvalidManifest(format!(
                "none of the {} manifest entries is well formed",
                raw_versions.len()
            )));
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Highest version in the manifest. Among equal versions the first one
    /// listed wins.
    pub fn select_latest(&self) -> Option<&ManifestEntry> {
        self.entries.iter().fold(None, |best, entry| match best {
            Some(current) if current.version >= entry.version => Some(current),
            _ => Some(entry),
        })
    }
}

fn parse_entry(item: &Value, manifest_url: &Url) -> Result<ManifestEntry, String> {
    let object = item
        .as_object()
        .ok_or_else(|| "entry is not an object".to_string())?;

    let src = object
        .get("src")
        .and_then(Value::as_str)
        .ok_or_else(|| "entry has no string 'src'".to_string())?;
    let source = manifest_url
        .join(src)
        .map_err(|error| format!("invalid src '{src}': {error}"))?;
    if !matches!(source.scheme(), "http" | "https") {
        return Err(format!("unsupported src scheme '{}'", source.scheme()));
    }

    let raw_version = object
        .get("version")
        .and_then(Value::as_str)
        .ok_or_else(|| "entry has no string 'version'".to_string())?;
    let version = Version::parse(raw_version.trim())
        .map_err(|error| format!("invalid version '{raw_version}': {error}"))?;

    Ok(ManifestEntry { source, version })
}
