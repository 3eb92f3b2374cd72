use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use semver::Version;
use url::Url;

use crate::models::{CoreError, CoreErrorKind, DiscoveryStep, PackageIdentity};
use crate::staging::{ScratchBundle, StagingArea};

pub type FetchResult<T> = Result<T, CoreError>;

pub type FetchFuture = Pin<Box<dyn Future<Output = FetchResult<FetchResponse>> + Send>>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchRequest {
    pub url: Url,
    pub timeout: Duration,
    pub max_bytes: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Plain HTTP(S) GET. Implementations report transport problems as errors and
/// return every received response, whatever its status.
pub trait HttpFetcher: Send + Sync {
    fn get(&self, request: FetchRequest) -> FetchFuture;
}

/// GETs `request.url`, enforcing the request timeout, a 2xx status and the
/// body size cap.
pub async fn download(fetcher: &dyn HttpFetcher, request: FetchRequest) -> FetchResult<Vec<u8>> {
    let url = request.url.clone();
    let timeout = request.timeout;
    let max_bytes = request.max_bytes;

    let response = tokio::time::timeout(timeout, fetcher.get(request))
        .await
        .map_err(|_| {
            CoreError::new(
                CoreErrorKind::Timeout,
                format!("GET {url} timed out after {}ms", timeout.as_millis()),
            )
        })??;

    if !response.is_success() {
        return Err(CoreError::new(
            CoreErrorKind::HttpStatus,
            format!("GET {url} returned HTTP {}", response.status),
        ));
    }

    let size = response.body.len() as u64;
    if size > max_bytes {
        return Err(CoreError::new(
            CoreErrorKind::TransportFailure,
            format!("GET {url} returned {size} bytes, over the {max_bytes} byte limit"),
        ));
    }

    Ok(response.body)
}

/// Downloads bundles into the scratch area of a [`StagingArea`].
#[derive(Clone)]
pub struct BundleFetcher {
    fetcher: Arc<dyn HttpFetcher>,
    staging: StagingArea,
    max_bytes: u64,
}

impl BundleFetcher {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, staging: StagingArea, max_bytes: u64) -> Self {
        Self {
            fetcher,
            staging,
            max_bytes,
        }
    }

    pub async fn fetch_bundle(
        &self,
        app: &PackageIdentity,
        version: &Version,
        source: &Url,
        timeout: Duration,
    ) -> FetchResult<ScratchBundle> {
        let body = download(
            self.fetcher.as_ref(),
            FetchRequest {
                url: source.clone(),
                timeout,
                max_bytes: self.max_bytes,
            },
        )
        .await
        .map_err(|error| error.attributed(app, DiscoveryStep::FetchBundle))?;

        let staging = self.staging.clone();
        let app_for_write = app.clone();
        let version = version.clone();
        tokio::task::spawn_blocking(move || staging.write_scratch(&app_for_write, &version, &body))
            .await
            .map_err(|join_error| CoreError {
                app: Some(app.clone()),
                step: Some(DiscoveryStep::FetchBundle),
                kind: CoreErrorKind::Internal,
                message: format!("scratch write join failure: {join_error}"),
            })?
            .map_err(|error| error.attributed(app, DiscoveryStep::FetchBundle))
    }
}
