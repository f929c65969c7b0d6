//! CDN collaborator interfaces: endpoint templates, the secure-link minter
//! boundary, and the blocking HTTP transport.
//!
//! Commands that only read the archive never construct any of this; only the
//! download paths require a transport, and only content downloads require a
//! link minter.

pub mod endpoints;
pub mod fetcher;
pub mod secure_link;

pub use endpoints::Endpoints;
pub use fetcher::{HttpFetcher, Transport};
pub use secure_link::{LinkMinter, PlainBaseMinter, SecureLink, SecureLinkEndpoint};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CdnError {
    #[error("Not found ({status}): {url}")]
    NotFound { url: String, status: u16 },

    #[error("Unexpected HTTP status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Truncated response: expected {expected} bytes, got {actual}")]
    Truncated { expected: u64, actual: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for CdnError {
    fn from(err: reqwest::Error) -> Self {
        CdnError::Transport(err.to_string())
    }
}

impl CdnError {
    /// 4xx responses are expected for absent content and are handled
    /// per-item; everything else aborts the batch.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CdnError::NotFound { .. })
    }
}
