//! Parallel download of gen-2 content-addressed chunks.
//!
//! Chunks are validated against the store first (filesystem truth), then the
//! missing or corrupted subset is fetched by a bounded worker pool. Every
//! downloaded payload must hash to its own name before the store accepts it;
//! mismatches are discarded and counted as failures, never written.

use std::collections::BTreeSet;

use rayon::ThreadPoolBuilder;
use tracing::{debug, info, warn};

use crate::cdn::{Endpoints, SecureLink, Transport};
use crate::store::{ContentStatus, ContentStore};

/// Aggregated result of one chunk batch.
#[derive(Debug, Default)]
pub struct ChunkBatchReport {
    pub requested: usize,
    pub already_valid: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl ChunkBatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

pub struct ChunkDownloader<'a> {
    transport: &'a dyn Transport,
    store: &'a ContentStore,
    workers: usize,
}

impl<'a> ChunkDownloader<'a> {
    pub fn new(transport: &'a dyn Transport, store: &'a ContentStore, workers: usize) -> Self {
        Self {
            transport,
            store,
            workers: workers.max(1),
        }
    }

    /// Download every chunk in `chunk_ids` that is not already valid in the
    /// store. The secure link is minted once per batch by the caller; CDN
    /// tokens are session-scoped, not per-URL.
    pub fn download_batch(
        &self,
        link: &SecureLink,
        endpoints: &Endpoints,
        product_id: &str,
        chunk_ids: &BTreeSet<String>,
    ) -> ChunkBatchReport {
        let mut report = ChunkBatchReport {
            requested: chunk_ids.len(),
            ..Default::default()
        };

        let mut to_download = Vec::new();
        for chunk_id in chunk_ids {
            match self.store.chunk_status(chunk_id) {
                ContentStatus::Ok => report.already_valid += 1,
                status => {
                    if status == ContentStatus::Corrupted {
                        // The store never overwrites an existing name; drop
                        // the bad file so the fresh payload can land.
                        if let Err(err) = self.store.remove_chunk(chunk_id) {
                            warn!(chunk = %chunk_id, "could not remove corrupted chunk: {err}");
                        }
                    }
                    debug!(chunk = %chunk_id, ?status, "queueing chunk");
                    to_download.push(chunk_id.clone());
                }
            }
        }

        if to_download.is_empty() {
            info!("all {} chunks already valid in store", chunk_ids.len());
            return report;
        }
        info!(
            "downloading {} of {} chunks with {} workers",
            to_download.len(),
            chunk_ids.len(),
            self.workers
        );

        let pool = match ThreadPoolBuilder::new().num_threads(self.workers).build() {
            Ok(pool) => pool,
            Err(err) => {
                report.failed = to_download.len();
                report.errors.push(format!("worker pool: {err}"));
                return report;
            }
        };

        let results: Vec<Result<(), String>> = pool.install(|| {
            use rayon::prelude::*;
            to_download
                .par_iter()
                .map(|chunk_id| self.download_one(link, endpoints, product_id, chunk_id))
                .collect()
        });

        for result in results {
            match result {
                Ok(()) => report.downloaded += 1,
                Err(msg) => {
                    warn!("{msg}");
                    report.failed += 1;
                    report.errors.push(msg);
                }
            }
        }
        report
    }

    fn download_one(
        &self,
        link: &SecureLink,
        endpoints: &Endpoints,
        product_id: &str,
        chunk_id: &str,
    ) -> Result<(), String> {
        let path = endpoints.v2_chunk_path(product_id, chunk_id);
        let url = link
            .url_for(&path)
            .map_err(|e| format!("chunk {chunk_id}: {e}"))?;

        let data = self
            .transport
            .get(&url)
            .map_err(|e| format!("chunk {chunk_id}: {e}"))?;

        // write_chunk hashes the payload; a mismatch discards the download.
        match self.store.write_chunk(chunk_id, &data) {
            Ok(_) => Ok(()),
            Err(err) => Err(format!("chunk {chunk_id}: {err}")),
        }
    }
}
