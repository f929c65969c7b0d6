//! Blocking HTTP transport.
//!
//! Everything network-facing in the download paths goes through [`Transport`]
//! so the engines can be driven by an in-memory fake in tests. The real
//! implementation wraps two `reqwest` blocking clients: a short-timeout one
//! for manifests and chunks, and a long-read one for ranged blob blocks.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;

use crate::cdn::CdnError;

const SMALL_TIMEOUT: Duration = Duration::from_secs(30);
const RANGE_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const RANGE_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Minimal HTTP surface the mirror needs: plain GET, ranged GET, and
/// Content-Length discovery via HEAD.
pub trait Transport: Sync {
    fn get(&self, url: &str) -> Result<Vec<u8>, CdnError>;

    /// Inclusive byte range. Servers may answer 206 or, for a full-file
    /// range, 200; both are accepted and the caller validates the length.
    fn get_range(&self, url: &str, start: u64, end: u64) -> Result<Vec<u8>, CdnError>;

    fn content_length(&self, url: &str) -> Result<u64, CdnError>;
}

pub struct HttpFetcher {
    client: Client,
    ranged: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, CdnError> {
        let client = Client::builder().timeout(SMALL_TIMEOUT).build()?;
        let ranged = Client::builder()
            .connect_timeout(RANGE_CONNECT_TIMEOUT)
            .timeout(RANGE_READ_TIMEOUT)
            .build()?;
        Ok(Self { client, ranged })
    }

    fn check_status(url: &str, status: StatusCode) -> Result<(), CdnError> {
        if status.is_client_error() {
            return Err(CdnError::NotFound {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(CdnError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

impl Transport for HttpFetcher {
    fn get(&self, url: &str) -> Result<Vec<u8>, CdnError> {
        let response = self.client.get(url).send()?;
        Self::check_status(url, response.status())?;

        let expected = response.content_length();
        let body = response.bytes()?.to_vec();
        if let Some(expected) = expected {
            if body.len() as u64 != expected {
                return Err(CdnError::Truncated {
                    expected,
                    actual: body.len() as u64,
                });
            }
        }
        Ok(body)
    }

    fn get_range(&self, url: &str, start: u64, end: u64) -> Result<Vec<u8>, CdnError> {
        let response = self
            .ranged
            .get(url)
            .header(RANGE, format!("bytes={start}-{end}"))
            .send()?;
        let status = response.status();
        if status != StatusCode::PARTIAL_CONTENT && status != StatusCode::OK {
            Self::check_status(url, status)?;
            return Err(CdnError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes()?.to_vec())
    }

    fn content_length(&self, url: &str) -> Result<u64, CdnError> {
        let response = self.client.head(url).send()?;
        Self::check_status(url, response.status())?;
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| CdnError::Transport(format!("no Content-Length from {url}")))
    }
}
