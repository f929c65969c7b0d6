//! Content-addressable mirror and extractor for a two-generation
//! game-distribution CDN.
//!
//! The mirror discovers every manifest describing a build, persists all
//! referenced binary content under a CDN-shaped directory layout, verifies
//! integrity end to end, and can reconstruct the original file tree on
//! demand.
//!
//! # Architecture
//!
//! - Generation 1 packs a build's files into one large binary (`main.bin`)
//!   addressed by offsets; the mirror fetches it in resumable 100 MiB blocks
//!   with per-block hash checkpoints.
//! - Generation 2 is content-addressed: small zlib chunks named by the MD5
//!   of their compressed bytes, fetched by a bounded worker pool.
//!
//! The filesystem is the source of truth for all content presence; only
//! build records are persisted in the index.
//!
//! # Modules
//!
//! - [`paths`]: CDN URL ↔ archive path codec
//! - [`store`]: content-addressed store with atomic writes
//! - [`manifest`]: typed manifests for both generations plus the cache
//! - [`cdn`]: endpoints, secure-link minting, HTTP transport
//! - [`download`]: chunk pool and resumable blob engine
//! - [`archive`]: the orchestrator walking build → depot → content
//! - [`index`]: the persistent build database
//! - [`validate`]: bottom-up integrity verification
//! - [`extract`]: file-tree reconstruction

pub mod archive;
pub mod cdn;
pub mod commands;
pub mod download;
pub mod extract;
pub mod index;
pub mod manifest;
pub mod paths;
pub mod store;
pub mod validate;

// Re-export commonly used types at the crate root for convenience
pub use archive::{ArchiveOptions, ArchiveReport, Archiver};
pub use index::{BuildIndex, BuildRecord};
pub use paths::{galaxy_path, ArchiveLayout, Generation};
pub use store::{ContentStatus, ContentStore};
