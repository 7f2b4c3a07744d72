//! Byte-capped HTTP page acquisition.

use futures_util::StreamExt;
use pagemark_core::{Error, Result};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MAX_BYTES: u64 = 5_000_000;
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared client: bounded redirects, connect and overall timeouts.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("pagemark/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(180))
        .build()
        .map_err(|e| Error::Fetch(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

impl Page {
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).to_string()
    }
}

/// Read a response body, stopping at `max_bytes`. The flag reports truncation.
pub(crate) async fn read_capped(resp: reqwest::Response, max_bytes: u64) -> Result<(Vec<u8>, bool)> {
    let max_bytes = usize::try_from(max_bytes).unwrap_or(usize::MAX);
    let mut bytes = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::Fetch(e.to_string()))?;
        if bytes.len().saturating_add(chunk.len()) > max_bytes {
            let can_take = max_bytes.saturating_sub(bytes.len());
            bytes.extend_from_slice(&chunk[..can_take]);
            return Ok((bytes, true));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok((bytes, false))
}

/// GET an http(s) page. Non-success statuses are errors.
pub async fn fetch_page(client: &reqwest::Client, url: &str, max_bytes: u64) -> Result<Page> {
    let parsed = url::Url::parse(url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidUrl(format!(
            "unsupported scheme: {}",
            parsed.scheme()
        )));
    }

    let resp = client
        .get(parsed)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .map_err(|e| Error::Fetch(e.to_string()))?;
    let final_url = resp.url().to_string();
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Fetch(format!("HTTP {status} for {final_url}")));
    }
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let (bytes, truncated) = read_capped(resp, max_bytes).await?;
    debug!(url, bytes = bytes.len(), truncated, "fetched page");
    Ok(Page {
        url: url.to_string(),
        final_url,
        status: status.as_u16(),
        content_type,
        bytes,
        truncated,
    })
}
