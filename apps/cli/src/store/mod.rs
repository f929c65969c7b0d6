//! Content-addressable store backed by the archive filesystem.
//!
//! The filesystem is the single source of truth for chunk, blob, and
//! depot-manifest presence: nothing here is mirrored in memory or in the
//! build index. Chunk files are named by the MD5 of their content, so a
//! file that exists and hashes to its own name is valid by definition.
//!
//! All writes go through a temp-file-then-rename sequence so a crash can
//! never leave a partially written object under its final name.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use thiserror::Error;
use walkdir::WalkDir;

use crate::paths::ArchiveLayout;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Classification of a chunk against the store, used by the repair path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentStatus {
    Ok,
    Missing,
    Corrupted,
}

/// Rolled-up store statistics for the `list` command.
#[derive(Debug, Default)]
pub struct StoreStats {
    pub chunk_count: usize,
    pub chunk_bytes: u64,
    pub blob_count: usize,
    pub blob_bytes: u64,
    pub manifest_count: usize,
}

pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Write `data` to `path` atomically: temp file in the same directory,
/// fsync, rename. Parent directories are created lazily.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// File-system-backed content store for one archive root.
pub struct ContentStore {
    layout: ArchiveLayout,
}

impl ContentStore {
    pub fn new(layout: ArchiveLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ArchiveLayout {
        &self.layout
    }

    // ========== Chunk Operations ==========

    pub fn contains_chunk(&self, compressed_md5: &str) -> bool {
        self.layout.chunk_path(compressed_md5).exists()
    }

    /// Store a chunk under its hash name. The hash of `data` must equal
    /// `compressed_md5`; a mismatched payload is rejected and nothing is
    /// written. Returns false when the chunk already existed.
    pub fn write_chunk(&self, compressed_md5: &str, data: &[u8]) -> Result<bool, StoreError> {
        let actual = md5_hex(data);
        if actual != compressed_md5.to_lowercase() {
            return Err(StoreError::ChecksumMismatch {
                expected: compressed_md5.to_lowercase(),
                actual,
            });
        }

        let path = self.layout.chunk_path(compressed_md5);
        if path.exists() {
            return Ok(false);
        }
        atomic_write(&path, data)?;
        Ok(true)
    }

    /// Load a chunk, verifying its content against the name.
    pub fn read_chunk(&self, compressed_md5: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.layout.chunk_path(compressed_md5);
        if !path.exists() {
            return Err(StoreError::NotFound(compressed_md5.to_string()));
        }

        let data = fs::read(&path)?;
        let actual = md5_hex(&data);
        if actual != compressed_md5.to_lowercase() {
            return Err(StoreError::ChecksumMismatch {
                expected: compressed_md5.to_lowercase(),
                actual,
            });
        }
        Ok(data)
    }

    /// Classify a chunk: `Ok` means the file exists and hashes to its name.
    pub fn chunk_status(&self, compressed_md5: &str) -> ContentStatus {
        let path = self.layout.chunk_path(compressed_md5);
        if !path.exists() {
            return ContentStatus::Missing;
        }
        match fs::read(&path) {
            Ok(data) if md5_hex(&data) == compressed_md5.to_lowercase() => ContentStatus::Ok,
            _ => ContentStatus::Corrupted,
        }
    }

    /// Discard a chunk file.
    pub fn remove_chunk(&self, compressed_md5: &str) -> io::Result<()> {
        let path = self.layout.chunk_path(compressed_md5);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    // ========== Blob Operations ==========

    /// Locate a gen-1 blob, preferring the repository-id directory and
    /// falling back to the build-id directory kept by legacy archives.
    pub fn find_blob(&self, repository_id: &str, build_id: &str) -> Option<PathBuf> {
        let by_repo = self.layout.blob_path(repository_id);
        if by_repo.exists() {
            return Some(by_repo);
        }
        let by_build = self.layout.blob_path(build_id);
        if by_build.exists() {
            return Some(by_build);
        }
        None
    }

    pub fn blob_size(&self, id: &str) -> Option<u64> {
        fs::metadata(self.layout.blob_path(id)).ok().map(|m| m.len())
    }

    // ========== Manifest Operations ==========

    pub fn contains_v2_depot_manifest(&self, manifest_id: &str) -> bool {
        self.layout.find_v2_depot_manifest(manifest_id).is_some()
    }

    pub fn contains_v1_depot_manifest(
        &self,
        product_id: &str,
        platform: &str,
        repository_id: &str,
        manifest_name: &str,
    ) -> bool {
        self.layout
            .v1_depot_manifest_path(product_id, platform, repository_id, manifest_name)
            .exists()
    }

    // ========== Stats ==========

    /// Walk the store and tally object counts and sizes.
    pub fn stats(&self) -> io::Result<StoreStats> {
        let mut stats = StoreStats::default();

        for entry in walk_files(&self.layout.chunks_dir()) {
            stats.chunk_count += 1;
            stats.chunk_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
        for entry in walk_files(&self.layout.blobs_dir()) {
            if entry.file_name() == "main.bin" {
                stats.blob_count += 1;
                stats.blob_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        for entry in walk_files(&self.layout.manifests_dir()) {
            // Pretty siblings are debug artifacts, not manifests.
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".pretty.json") {
                stats.manifest_count += 1;
            }
        }
        Ok(stats)
    }

    /// Hex names of every chunk currently in the store.
    pub fn list_chunks(&self) -> Vec<String> {
        walk_files(&self.layout.chunks_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect()
    }

    /// Blob directory ids that contain a `main.bin`.
    pub fn list_blobs(&self) -> Vec<String> {
        let dir = self.layout.blobs_dir();
        let mut ids = Vec::new();
        if let Ok(entries) = fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let id = entry.file_name().to_string_lossy().into_owned();
                if entry.path().join("main.bin").exists() {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        ids
    }
}

fn walk_files(dir: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
}
