//! Manifest data model and cache for both content-system generations.
//!
//! Generation 1 describes a build as a "repository": depots reference a JSON
//! manifest each, and every file lives at an offset inside a shared packed
//! binary. Generation 2 is content-addressed: depot manifests enumerate files
//! as ordered chunk lists, with chunks named by the MD5 of their compressed
//! bytes.
//!
//! Raw CDN bytes are the authoritative artifact on disk; decompression
//! happens transparently on read and prettified JSON siblings are only ever
//! debug output.

pub mod cache;
pub mod v1;
pub mod v2;

use std::io::{self, Read};

use flate2::read::{GzDecoder, ZlibDecoder};
use thiserror::Error;

pub use cache::ManifestCache;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Manifest not found: {0}")]
    NotFound(String),

    #[error("Failed to decompress manifest: {0}")]
    Decompress(String),

    #[error("Invalid manifest JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Cdn(#[from] crate::cdn::CdnError),
}

/// Decode raw manifest bytes into JSON text. Accepts gzip (`1f 8b` prefix),
/// zlib (`78` prefix, 15-bit window), or plain bytes.
pub fn decode_manifest_bytes(raw: &[u8]) -> Result<Vec<u8>, ManifestError> {
    if raw.starts_with(&[0x1f, 0x8b]) {
        let mut out = Vec::new();
        GzDecoder::new(raw)
            .read_to_end(&mut out)
            .map_err(|e| ManifestError::Decompress(e.to_string()))?;
        return Ok(out);
    }
    if raw.first() == Some(&0x78) {
        let mut out = Vec::new();
        ZlibDecoder::new(raw)
            .read_to_end(&mut out)
            .map_err(|e| ManifestError::Decompress(e.to_string()))?;
        return Ok(out);
    }
    Ok(raw.to_vec())
}

/// Decode and parse raw bytes into a typed manifest.
pub fn parse_raw<T: serde::de::DeserializeOwned>(raw: &[u8]) -> Result<T, ManifestError> {
    let decoded = decode_manifest_bytes(raw)?;
    Ok(serde_json::from_slice(&decoded)?)
}
