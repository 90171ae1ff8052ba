//! Pre-connection HTTP probe
//!
//! Browser-grade WebSocket clients surface only an opaque failure when the
//! server rejects the upgrade handshake. Probing the endpoint over plain
//! HTTP first turns authentication and routing problems into typed errors
//! before the opaque stream is attempted.

use crate::traits::error::{InteractiveError, PreflightError, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};
use url::Url;

/// Body the server answers with when only the upgrade handshake is missing
///
/// An HTTP 400 carrying exactly these ten bytes means the endpoint is
/// routable and the credentials were accepted; the probe has succeeded and
/// the real stream must now be opened.
const UPGRADE_REQUIRED_BODY: &str = "Bad Request\n";

/// Translate a stream URL into its HTTP equivalent (`ws`→`http`, `wss`→`https`)
pub fn probe_url(stream_url: &str) -> Result<Url> {
    let mut url = Url::parse(stream_url)
        .map_err(|e| PreflightError::Transport(format!("invalid stream url: {e}")))?;
    let scheme = match url.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => {
            return Err(
                PreflightError::Transport(format!("unsupported url scheme: {other}")).into(),
            )
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| PreflightError::Transport("could not translate url scheme".to_string()))?;
    Ok(url)
}

/// Classify a probe response into success or a typed error
fn classify(status: u16, body: &str) -> std::result::Result<(), PreflightError> {
    match status {
        200 => Ok(()),
        400 if body == UPGRADE_REQUIRED_BODY => Ok(()),
        _ => Err(PreflightError::from_status(status, body)),
    }
}

/// Probe the stream endpoint with the given connect-time headers
///
/// Issues a single GET against the HTTP translation of `stream_url`.
///
/// # Errors
///
/// Returns a typed [`PreflightError`] for classified HTTP rejections, or
/// [`PreflightError::Transport`] when the probe itself could not complete.
pub async fn preflight(stream_url: &str, headers: &[(String, String)]) -> Result<()> {
    let client = reqwest::Client::new();
    preflight_with(&client, stream_url, headers).await
}

/// [`preflight`] over a caller-owned HTTP client
pub(crate) async fn preflight_with(
    client: &reqwest::Client,
    stream_url: &str,
    headers: &[(String, String)],
) -> Result<()> {
    let url = probe_url(stream_url)?;
    debug!("Preflight probe: GET {}", url);

    let response = client
        .get(url)
        .headers(build_header_map(headers))
        .send()
        .await
        .map_err(|e| PreflightError::Transport(e.to_string()))?;

    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| PreflightError::Transport(e.to_string()))?;

    debug!("Preflight response: status {}", status);
    classify(status, &body).map_err(InteractiveError::from)
}

/// Build a reqwest header map, skipping malformed entries
fn build_header_map(headers: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        match (
            key.parse::<HeaderName>(),
            value.parse::<HeaderValue>(),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => {
                warn!("Invalid preflight header '{}': skipping", key);
            }
        }
    }
    map
}
