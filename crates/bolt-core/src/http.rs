//! HTTP client shared by the prober and all segment workers.
//!
//! One [`reqwest::Client`] backs every engine created by a manager; its
//! internal pool keeps connections alive per origin and shares TLS
//! sessions across segments, which is exactly the connection cache the
//! workers want. HTTP/2 is negotiated when the server offers it.

use reqwest::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE,
};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, info};

use crate::config::{CONNECT_TIMEOUT, MAX_REDIRECTS, READ_TIMEOUT};
use crate::error::{BoltError, Result};
use crate::url::RemoteUrl;
use bolt_types::ServerFacts;

const USER_AGENT: &str = concat!("bolt/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP transport. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| BoltError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    /// Probe the resource: size, range support, content type, hinted
    /// filename, final URL after redirects.
    ///
    /// Some servers omit `Content-Length` on HEAD; those get a second
    /// chance via a one-byte ranged GET whose `Content-Range` carries
    /// the total.
    pub async fn head(&self, url: &RemoteUrl) -> Result<ServerFacts> {
        info!(url = %url, "probing");

        let response = self.client.head(url.as_str()).send().await?;
        let status = response.status();
        if let Some(err) = BoltError::from_status(status.as_u16()) {
            return Err(err);
        }

        let headers = response.headers();
        let mut facts = ServerFacts {
            status: status.as_u16(),
            content_length: header_u64(headers, CONTENT_LENGTH).unwrap_or(0),
            accepts_ranges: headers
                .get(ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.contains("bytes"))
                .unwrap_or(false),
            content_type: header_str(headers, CONTENT_TYPE),
            filename: header_str(headers, CONTENT_DISPOSITION)
                .as_deref()
                .and_then(parse_content_disposition),
            final_url: None,
        };

        let final_url = response.url().to_string();
        if final_url != url.as_str() {
            facts.final_url = Some(final_url.clone());
        }

        if facts.content_length == 0 {
            self.probe_with_range(&final_url, &mut facts).await;
        }

        Ok(facts)
    }

    /// Fallback probe: `GET bytes=0-0` and read the total out of
    /// `Content-Range: bytes 0-0/<total>`.
    async fn probe_with_range(&self, url: &str, facts: &mut ServerFacts) {
        debug!("HEAD carried no Content-Length, probing with a ranged GET");
        let response = match self
            .client
            .get(url)
            .header(RANGE, "bytes=0-0")
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "range probe failed, continuing without a size");
                return;
            }
        };

        if let Some(total) = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit('/').next())
            .filter(|total| *total != "*")
            .and_then(|total| total.parse::<u64>().ok())
        {
            facts.content_length = total;
            facts.accepts_ranges = true;
        } else if response.status() == StatusCode::OK {
            // Server ignored the Range header entirely.
            facts.accepts_ranges = false;
            if let Some(len) = header_u64(response.headers(), CONTENT_LENGTH) {
                facts.content_length = len;
            }
        } else if response.status() == StatusCode::PARTIAL_CONTENT {
            facts.accepts_ranges = true;
        }
    }

    /// Issue a ranged GET for `[start, end]` (inclusive, HTTP
    /// convention). The response status is already classified; callers
    /// stream the body.
    pub async fn get_range(&self, url: &str, start: u64, end: u64) -> Result<Response> {
        let range = format!("bytes={start}-{end}");
        debug!(url, range = %range, "ranged GET");
        let response = self
            .client
            .get(url)
            .header(RANGE, range)
            .send()
            .await?;
        match BoltError::from_status(response.status().as_u16()) {
            Some(err) => Err(err),
            None => Ok(response),
        }
    }

    /// Plain GET for resources with unknown length or no range support.
    pub async fn get_full(&self, url: &str) -> Result<Response> {
        debug!(url, "full GET");
        let response = self.client.get(url).send().await?;
        match BoltError::from_status(response.status().as_u16()) {
            Some(err) => Err(err),
            None => Ok(response),
        }
    }
}

fn header_str(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn header_u64(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Extract the filename out of `attachment; filename="file.zip"`.
pub fn parse_content_disposition(value: &str) -> Option<String> {
    let rest = value.split("filename=").nth(1)?;
    let name = rest
        .split(';')
        .next()
        .unwrap_or(rest)
        .trim()
        .trim_matches(|c| c == '"' || c == '\'');
    if name.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(name)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| name.to_string());
    Some(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_disposition_quoted() {
        assert_eq!(
            parse_content_disposition("attachment; filename=\"archive.zip\""),
            Some("archive.zip".to_string())
        );
    }

    #[test]
    fn content_disposition_bare() {
        assert_eq!(
            parse_content_disposition("attachment; filename=data.bin"),
            Some("data.bin".to_string())
        );
    }

    #[test]
    fn content_disposition_with_trailing_params() {
        assert_eq!(
            parse_content_disposition("attachment; filename=a.txt; size=100"),
            Some("a.txt".to_string())
        );
    }

    #[test]
    fn content_disposition_without_filename() {
        assert_eq!(parse_content_disposition("inline"), None);
        assert_eq!(parse_content_disposition("attachment; filename="), None);
    }
}
