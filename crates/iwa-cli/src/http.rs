use std::io::Read;
use std::time::Duration;

use iwa_core::fetch::{FetchFuture, FetchRequest, FetchResponse, FetchResult, HttpFetcher};
use iwa_core::models::{CoreError, CoreErrorKind};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = concat!("iwa-updater/", env!("CARGO_PKG_VERSION"));

/// Blocking `ureq` client run on the blocking pool.
#[derive(Clone)]
pub struct UreqFetcher {
    agent: ureq::Agent,
}

impl UreqFetcher {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(CONNECT_TIMEOUT)
                .user_agent(USER_AGENT)
                .build(),
        }
    }
}

impl Default for UreqFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher for UreqFetcher {
    fn get(&self, request: FetchRequest) -> FetchFuture {
        let agent = self.agent.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || blocking_get(&agent, &request))
                .await
                .map_err(|join_error| {
                    CoreError::new(
                        CoreErrorKind::Internal,
                        format!("http fetch join failure: {join_error}"),
                    )
                })?
        })
    }
}

fn blocking_get(agent: &ureq::Agent, request: &FetchRequest) -> FetchResult<FetchResponse> {
    tracing::debug!(url = %request.url, "GET");
    let response = match agent
        .get(request.url.as_str())
        .timeout(request.timeout)
        .call()
    {
        Ok(response) => response,
        // Non-2xx answers are still responses; the caller decides what they mean.
        Err(ureq::Error::Status(_, response)) => response,
        Err(ureq::Error::Transport(transport)) => {
            return Err(CoreError::new(
                CoreErrorKind::TransportFailure,
                format!("GET {} failed: {transport}", request.url),
            ));
        }
    };

    let status = response.status();
    let body = read_limited(response, request.max_bytes).map_err(|message| {
        CoreError::new(
            CoreErrorKind::TransportFailure,
            format!("GET {} failed: {message}", request.url),
        )
    })?;

    Ok(FetchResponse { status, body })
}

fn read_limited(response: ureq::Response, max_bytes: u64) -> Result<Vec<u8>, String> {
    if let Some(length) = response
        .header("Content-Length")
        .and_then(|value| value.parse::<u64>().ok())
        && length > max_bytes
    {
        return Err(format!("response of {length} bytes exceeds the {max_bytes} byte limit"));
    }

    let mut body = Vec::new();
    response
        .into_reader()
        .take(max_bytes.saturating_add(1))
        .read_to_end(&mut body)
        .map_err(|error| format!("failed to read response body: {error}"))?;

    if body.len() as u64 > max_bytes {
        return Err(format!("response body exceeds the {max_bytes} byte limit"));
    }
    Ok(body)
}
