//! Download engine: parallel chunk transfer for gen-2 content and the
//! resumable, hash-checkpointed block engine for gen-1 blobs.

pub mod blob;
pub mod chunks;

use std::io;

use thiserror::Error;

pub use blob::{BlobDownloader, BlobOutcome, BlobState, BLOCK_SIZE};
pub use chunks::{ChunkBatchReport, ChunkDownloader};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Cdn(#[from] crate::cdn::CdnError),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Sidecar JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Block {id} length mismatch: expected {expected} bytes, got {actual}")]
    BlockLength { id: u64, expected: u64, actual: u64 },
}
