#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use iwa_core::discovery::{DiscoveryCollaborators, DiscoveryLimits};
use iwa_core::fetch::{FetchFuture, FetchRequest, FetchResponse, HttpFetcher};
use iwa_core::install::{DryRunFuture, DryRunInstaller, DryRunRequest};
use iwa_core::models::{CoreError, CoreErrorKind, PackageIdentity};
use iwa_core::persistence::AppRegistry;
use iwa_core::staging::StagingArea;
use semver::Version;

pub fn identity(value: &str) -> PackageIdentity {
    PackageIdentity::new(value).expect("test identity must be valid")
}

pub fn version(value: &str) -> Version {
    Version::parse(value).expect("test version must be valid")
}

pub fn unique_temp_path(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("iwa-{test_name}-{nanos}"))
}

pub fn manifest_url(app: &str) -> String {
    format!("https://updates.example.test/{app}/manifest.json")
}

pub fn bundle_url(app: &str, version: &str) -> String {
    format!("https://updates.example.test/{app}/{app}-{version}.swbn")
}

/// `{"versions": [...]}` listing absolute bundle URLs for `app`.
pub fn manifest_body(app: &str, versions: &[&str]) -> Vec<u8> {
    let entries: Vec<serde_json::Value> = versions
        .iter()
        .map(|version| {
            serde_json::json!({
                "src": bundle_url(app, version),
                "version": version,
            })
        })
        .collect();
    serde_json::to_vec(&serde_json::json!({ "versions": entries }))
        .expect("manifest serialization")
}

pub fn bundle_bytes(app: &str, version: &str) -> Vec<u8> {
    format!("signed-web-bundle:{app}:{version}").into_bytes()
}

#[derive(Clone)]
enum Route {
    Respond { status: u16, body: Vec<u8> },
    Fail(String),
}

/// Serves canned responses by URL. Unknown URLs answer 404.
#[derive(Default)]
pub struct FakeFetcher {
    routes: Mutex<HashMap<String, Route>>,
    delays: Mutex<HashMap<String, Duration>>,
    requests: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) {
        self.routes.lock().unwrap().insert(
            url.into(),
            Route::Respond {
                status,
                body: body.into(),
            },
        );
    }

    pub fn fail(&self, url: impl Into<String>, message: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.into(), Route::Fail(message.to_string()));
    }

    pub fn delay(&self, url: impl Into<String>, delay: Duration) {
        self.delays.lock().unwrap().insert(url.into(), delay);
    }

    /// Serves a manifest listing `versions` plus a bundle for each of them.
    pub fn publish(&self, app: &str, versions: &[&str]) {
        self.respond(manifest_url(app), 200, manifest_body(app, versions));
        for version in versions {
            self.respond(bundle_url(app, version), 200, bundle_bytes(app, version));
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|requested| requested.as_str() == url)
            .count()
    }
}

impl HttpFetcher for FakeFetcher {
    fn get(&self, request: FetchRequest) -> FetchFuture {
        let url = request.url.to_string();
        self.requests.lock().unwrap().push(url.clone());
        let route = self.routes.lock().unwrap().get(&url).cloned();
        let delay = self.delays.lock().unwrap().get(&url).copied();

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match route {
                Some(Route::Respond { status, body }) => Ok(FetchResponse { status, body }),
                Some(Route::Fail(message)) => {
                    Err(CoreError::new(CoreErrorKind::TransportFailure, message))
                }
                None => Ok(FetchResponse {
                    status: 404,
                    body: Vec::new(),
                }),
            }
        })
    }
}

/// Dry-run installer that succeeds unless told otherwise and records the
/// bundles it was handed.
#[derive(Default)]
pub struct FakeInstaller {
    failure: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<(PackageIdentity, Version, Vec<u8>)>>,
    on_dry_run: Mutex<Option<Box<dyn Fn(&DryRunRequest) + Send + Sync>>>,
}

impl FakeInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        let installer = Self::default();
        installer.fail_with(message);
        installer
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Runs `hook` synchronously at the start of every dry run.
    pub fn on_dry_run(&self, hook: impl Fn(&DryRunRequest) + Send + Sync + 'static) {
        *self.on_dry_run.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<(PackageIdentity, Version, Vec<u8>)> {
        self.seen.lock().unwrap().clone()
    }
}

impl DryRunInstaller for FakeInstaller {
    fn dry_run(&self, request: DryRunRequest) -> DryRunFuture {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.on_dry_run.lock().unwrap().as_ref() {
            hook(&request);
        }
        let bytes = std::fs::read(&request.bundle_path).unwrap_or_default();
        self.seen.lock().unwrap().push((
            request.app.clone(),
            request.expected_version.clone(),
            bytes,
        ));

        let failure = self.failure.lock().unwrap().clone();
        let delay = *self.delay.lock().unwrap();
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match failure {
                Some(message) => Err(CoreError {
                    app: Some(request.app),
                    step: None,
                    kind: CoreErrorKind::ProcessFailure,
                    message,
                }),
                None => Ok(()),
            }
        })
    }
}

pub struct Harness {
    pub registry: Arc<dyn AppRegistry>,
    pub fetcher: Arc<FakeFetcher>,
    pub installer: Arc<FakeInstaller>,
    pub staging: StagingArea,
}

impl Harness {
    pub fn new(test_name: &str, registry: Arc<dyn AppRegistry>) -> Self {
        Self {
            registry,
            fetcher: Arc::new(FakeFetcher::new()),
            installer: Arc::new(FakeInstaller::new()),
            staging: StagingArea::new(unique_temp_path(test_name)),
        }
    }

    pub fn collaborators(&self) -> DiscoveryCollaborators {
        DiscoveryCollaborators {
            registry: self.registry.clone(),
            fetcher: self.fetcher.clone(),
            installer: self.installer.clone(),
            staging: self.staging.clone(),
        }
    }

    pub fn limits(&self) -> DiscoveryLimits {
        DiscoveryLimits {
            manifest_timeout: Duration::from_secs(5),
            bundle_timeout: Duration::from_secs(5),
            dry_run_timeout: Duration::from_secs(5),
            max_bundle_bytes: 1024 * 1024,
        }
    }

    /// Files currently staged for `app`, sorted by name.
    pub fn staged_files(&self, app: &PackageIdentity) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = match std::fs::read_dir(self.staging.app_dir(app)) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .collect(),
            Err(_) => Vec::new(),
        };
        files.sort();
        files
    }

    pub fn scratch_files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.staging.root().join(".scratch")) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(self.staging.root());
    }
}
