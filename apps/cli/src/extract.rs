//! Reconstruct the original file tree of an archived build.
//!
//! Gen-1: every depot's file records point into the shared packed binary;
//! the union is sorted by offset and the blob is read in one forward pass.
//! Gen-2: each file is the in-order concatenation of its decompressed
//! chunks, streamed to the output so large assets never sit in memory whole.
//!
//! Per-file failures are logged and counted; extraction continues with the
//! remaining files.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use md5::{Digest, Md5};
use thiserror::Error;
use tracing::{debug, info};

use crate::index::{BuildIndex, BuildRecord};
use crate::manifest::v2::DepotFileRecord;
use crate::manifest::{ManifestCache, ManifestError};
use crate::paths::{ArchiveLayout, Generation};
use crate::store::ContentStore;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Build not found in index: {product_id}/{build_id}/{platform}")]
    BuildNotFound {
        product_id: String,
        build_id: String,
        platform: String,
    },

    #[error("Blob not found for repository {0}")]
    BlobNotFound(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ExtractOptions {
    /// Verify compressed chunk hashes, decompressed sizes and hashes (gen-2)
    /// and per-file MD5s (gen-1) while extracting.
    pub verify_checksums: bool,
}

#[derive(Debug, Default)]
pub struct ExtractReport {
    pub files_extracted: usize,
    pub bytes_written: u64,
    pub errors: Vec<String>,
}

impl ExtractReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct Extractor {
    layout: ArchiveLayout,
    store: ContentStore,
    cache: ManifestCache,
}

impl Extractor {
    pub fn new(layout: ArchiveLayout) -> Self {
        Self {
            store: ContentStore::new(layout.clone()),
            cache: ManifestCache::new(layout.clone()),
            layout,
        }
    }

    pub fn extract_build(
        &self,
        index: &BuildIndex,
        product_id: &str,
        build_id: &str,
        platform: &str,
        out_dir: &Path,
        options: ExtractOptions,
    ) -> Result<ExtractReport, ExtractError> {
        let record = index
            .get(product_id, build_id, platform)
            .ok_or_else(|| ExtractError::BuildNotFound {
                product_id: product_id.to_string(),
                build_id: build_id.to_string(),
                platform: platform.to_string(),
            })?;
        fs::create_dir_all(out_dir)?;

        info!(
            "extracting {}/{}/{} ({}) to {}",
            product_id,
            build_id,
            platform,
            record.generation,
            out_dir.display()
        );
        match record.generation {
            Generation::V1 => self.extract_v1(record, out_dir, options),
            Generation::V2 => self.extract_v2(record, out_dir, options),
        }
    }

    // ========== Gen-1 ==========

    fn extract_v1(
        &self,
        record: &BuildRecord,
        out_dir: &Path,
        options: ExtractOptions,
    ) -> Result<ExtractReport, ExtractError> {
        let mut report = ExtractReport::default();
        let manifest_path = self.layout.root().join(&record.archive_path);
        let repository = self.cache.load_v1_repository(&manifest_path)?;
        let repository_id = record.repository_id.clone().unwrap_or_default();

        let mut files = Vec::new();
        for entry in &repository.product.depots {
            let Some(name) = entry.manifest_name() else {
                continue;
            };
            match self.cache.load_v1_depot_manifest(
                &record.product_id,
                &record.platform,
                &repository_id,
                name,
            ) {
                Ok(depot) => files.extend(depot.files().cloned().collect::<Vec<_>>()),
                Err(err) => report.errors.push(format!("depot manifest {name}: {err}")),
            }
        }
        files.sort_by_key(|f| f.offset);

        let blob_path = self
            .store
            .find_blob(&repository_id, &record.build_id)
            .ok_or_else(|| ExtractError::BlobNotFound(repository_id.clone()))?;
        let mut blob = File::open(&blob_path)?;

        for file in &files {
            // Manifest paths are rooted; outputs are relative.
            let rel_path = file.path.trim_start_matches('/');
            match self.extract_v1_file(&mut blob, file.offset, file.size, &file.hash, options) {
                Ok(data) => {
                    let out_path = out_dir.join(rel_path);
                    if let Err(err) = write_output(&out_path, &data) {
                        report.errors.push(format!("{rel_path}: {err}"));
                        continue;
                    }
                    debug!("extracted {rel_path} ({} bytes)", data.len());
                    report.files_extracted += 1;
                    report.bytes_written += data.len() as u64;
                }
                Err(err) => report.errors.push(format!("{rel_path}: {err}")),
            }
        }
        info!(
            "extraction complete: {} files, {} bytes, {} errors",
            report.files_extracted,
            report.bytes_written,
            report.errors.len()
        );
        Ok(report)
    }

    fn extract_v1_file(
        &self,
        blob: &mut File,
        offset: u64,
        size: u64,
        expected_md5: &str,
        options: ExtractOptions,
    ) -> Result<Vec<u8>, String> {
        blob.seek(SeekFrom::Start(offset))
            .map_err(|e| e.to_string())?;
        let mut data = vec![0u8; size as usize];
        blob.read_exact(&mut data)
            .map_err(|e| format!("short read at offset {offset}: {e}"))?;

        if options.verify_checksums {
            let actual = hex::encode(Md5::digest(&data));
            if !actual.eq_ignore_ascii_case(expected_md5) {
                return Err(format!(
                    "MD5 mismatch: expected {expected_md5}, got {actual}"
                ));
            }
        }
        Ok(data)
    }

    // ========== Gen-2 ==========

    fn extract_v2(
        &self,
        record: &BuildRecord,
        out_dir: &Path,
        options: ExtractOptions,
    ) -> Result<ExtractReport, ExtractError> {
        let mut report = ExtractReport::default();
        let manifest_path = self.layout.root().join(&record.archive_path);
        let manifest = self.cache.load_v2_build_manifest(&manifest_path)?;

        for depot_ref in &manifest.depots {
            let depot = match self.cache.load_v2_depot_manifest(&depot_ref.manifest) {
                Ok(d) => d,
                Err(err) => {
                    report
                        .errors
                        .push(format!("depot manifest {}: {err}", depot_ref.manifest));
                    continue;
                }
            };

            for file in depot.files() {
                match self.extract_v2_file(file, out_dir, options) {
                    Ok(written) => {
                        debug!("extracted {} ({written} bytes)", file.path);
                        report.files_extracted += 1;
                        report.bytes_written += written;
                    }
                    Err(err) => report.errors.push(format!("{}: {err}", file.path)),
                }
            }
        }
        info!(
            "extraction complete: {} files, {} bytes, {} errors",
            report.files_extracted,
            report.bytes_written,
            report.errors.len()
        );
        Ok(report)
    }

    /// Stream one file's chunks into the output tree. A failed chunk aborts
    /// the file and removes the partial output.
    fn extract_v2_file(
        &self,
        file: &DepotFileRecord,
        out_dir: &Path,
        options: ExtractOptions,
    ) -> Result<u64, String> {
        let rel_path = file.path.trim_start_matches('/');
        let out_path = out_dir.join(rel_path);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }

        let mut out = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&out_path)
            .map_err(|e| e.to_string())?;

        let mut written = 0u64;
        for chunk in &file.chunks {
            match self.read_and_decompress_chunk(chunk, options) {
                Ok(data) => {
                    out.write_all(&data).map_err(|e| e.to_string())?;
                    written += data.len() as u64;
                }
                Err(err) => {
                    drop(out);
                    let _ = fs::remove_file(&out_path);
                    return Err(err);
                }
            }
        }
        Ok(written)
    }

    fn read_and_decompress_chunk(
        &self,
        chunk: &crate::manifest::v2::ChunkRecord,
        options: ExtractOptions,
    ) -> Result<Vec<u8>, String> {
        let chunk_path = self.layout.chunk_path(&chunk.compressed_md5);
        let compressed = fs::read(&chunk_path)
            .map_err(|_| format!("chunk not found: {}", chunk.compressed_md5))?;

        if options.verify_checksums {
            let actual = hex::encode(Md5::digest(&compressed));
            if !actual.eq_ignore_ascii_case(&chunk.compressed_md5) {
                return Err(format!(
                    "compressed chunk hash mismatch for {}: got {actual}",
                    chunk.compressed_md5
                ));
            }
        }

        let mut data = Vec::with_capacity(chunk.size as usize);
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut data)
            .map_err(|e| format!("decompressing chunk {}: {e}", chunk.compressed_md5))?;

        if options.verify_checksums {
            if data.len() as u64 != chunk.size {
                return Err(format!(
                    "decompressed size mismatch for {}: expected {}, got {}",
                    chunk.compressed_md5,
                    chunk.size,
                    data.len()
                ));
            }
            let actual = hex::encode(Md5::digest(&data));
            if !actual.eq_ignore_ascii_case(&chunk.md5) {
                return Err(format!(
                    "decompressed hash mismatch for chunk {}: expected {}, got {actual}",
                    chunk.compressed_md5, chunk.md5
                ));
            }
        }
        Ok(data)
    }
}

fn write_output(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, data)
}

/// Join helper shared by commands so `extract --out` accepts both relative
/// and absolute targets.
pub fn resolve_out_dir(out: &Path) -> PathBuf {
    if out.is_absolute() {
        out.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(out))
            .unwrap_or_else(|_| out.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::md5_hex;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use tempfile::tempdir;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn record(layout: &ArchiveLayout, generation: Generation, build_path: &Path) -> BuildRecord {
        BuildRecord {
            product_id: "1207".into(),
            build_id: "b1".into(),
            build_hash: String::new(),
            platform: "windows".into(),
            generation,
            archive_path: layout.relative(build_path).to_string_lossy().into_owned(),
            source_url: String::new(),
            repository_id: Some("37794096".into()),
            version_label: String::new(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_v1_round_trip() {
        let temp = tempdir().unwrap();
        let layout = ArchiveLayout::new(temp.path().join("archive"));

        let file_a = b"alpha contents".to_vec();
        let file_b = b"beta contents, somewhat longer".to_vec();
        let mut blob = file_a.clone();
        blob.extend_from_slice(&file_b);
        fs::create_dir_all(layout.blob_dir("37794096")).unwrap();
        fs::write(layout.blob_path("37794096"), &blob).unwrap();

        let depot = serde_json::json!({
            "depot": {"files": [
                {"path": "/game/sub/a.dat", "size": file_a.len(), "hash": md5_hex(&file_a),
                 "url": "37794096/main.bin", "offset": 0},
                {"path": "/game/b.dat", "size": file_b.len(), "hash": md5_hex(&file_b),
                 "url": "37794096/main.bin", "offset": file_a.len()}
            ]}
        });
        let depot_path =
            layout.v1_depot_manifest_path("1207", "windows", "37794096", "manifest_main.json");
        fs::create_dir_all(depot_path.parent().unwrap()).unwrap();
        fs::write(&depot_path, serde_json::to_vec(&depot).unwrap()).unwrap();

        let repository =
            serde_json::json!({"product": {"depots": [{"manifest": "manifest_main.json"}]}});
        let build_path = layout.build_manifest_path_for_url(
            "https://cdn.example.com/content-system/v1/manifests/1207/windows/37794096/repository.json",
        );
        fs::create_dir_all(build_path.parent().unwrap()).unwrap();
        fs::write(&build_path, serde_json::to_vec(&repository).unwrap()).unwrap();

        let mut index = BuildIndex::load(&layout).unwrap();
        index.upsert(record(&layout, Generation::V1, &build_path));

        let out = temp.path().join("out");
        let report = Extractor::new(layout)
            .extract_build(
                &index,
                "1207",
                "b1",
                "windows",
                &out,
                ExtractOptions {
                    verify_checksums: true,
                },
            )
            .unwrap();

        assert!(report.is_ok(), "errors: {:?}", report.errors);
        assert_eq!(report.files_extracted, 2);
        assert_eq!(fs::read(out.join("game/sub/a.dat")).unwrap(), file_a);
        assert_eq!(fs::read(out.join("game/b.dat")).unwrap(), file_b);
    }

    #[test]
    fn test_v2_round_trip() {
        let temp = tempdir().unwrap();
        let layout = ArchiveLayout::new(temp.path().join("archive"));
        let store = ContentStore::new(layout.clone());

        // One file split into two chunks.
        let part_a = b"first half of the file ".to_vec();
        let part_b = b"and the second half".to_vec();
        let mut whole = part_a.clone();
        whole.extend_from_slice(&part_b);

        let comp_a = zlib(&part_a);
        let comp_b = zlib(&part_b);
        let id_a = md5_hex(&comp_a);
        let id_b = md5_hex(&comp_b);
        store.write_chunk(&id_a, &comp_a).unwrap();
        store.write_chunk(&id_b, &comp_b).unwrap();

        let depot_id = "db5f65c5b09c1ad45c4f88d3e1a9b79f";
        let depot = serde_json::json!({
            "depot": {"items": [
                {"type": "DepotFile", "path": "game/whole.bin", "md5": md5_hex(&whole),
                 "chunks": [
                    {"compressedMd5": id_a, "md5": md5_hex(&part_a),
                     "compressedSize": comp_a.len(), "size": part_a.len(), "offset": 0},
                    {"compressedMd5": id_b, "md5": md5_hex(&part_b),
                     "compressedSize": comp_b.len(), "size": part_b.len(), "offset": part_a.len()}
                 ]},
                {"type": "DepotDirectory", "path": "game/empty"}
            ]}
        });
        let depot_path = layout.v2_depot_manifest_paths(depot_id)[0].clone();
        fs::create_dir_all(depot_path.parent().unwrap()).unwrap();
        fs::write(&depot_path, serde_json::to_vec(&depot).unwrap()).unwrap();

        let build = serde_json::json!({"version": 2, "depots": [{"manifest": depot_id}]});
        let build_path = layout
            .build_manifest_path_for_url("https://cdn.example.com/content-system/v2/meta/ab/cd/abcd");
        fs::create_dir_all(build_path.parent().unwrap()).unwrap();
        fs::write(&build_path, serde_json::to_vec(&build).unwrap()).unwrap();

        let mut index = BuildIndex::load(&layout).unwrap();
        index.upsert(record(&layout, Generation::V2, &build_path));

        let out = temp.path().join("out");
        let report = Extractor::new(layout)
            .extract_build(
                &index,
                "1207",
                "b1",
                "windows",
                &out,
                ExtractOptions {
                    verify_checksums: true,
                },
            )
            .unwrap();

        assert!(report.is_ok(), "errors: {:?}", report.errors);
        assert_eq!(report.files_extracted, 1);
        let extracted = fs::read(out.join("game/whole.bin")).unwrap();
        assert_eq!(extracted, whole);
        assert_eq!(md5_hex(&extracted), md5_hex(&whole));
    }

    #[test]
    fn test_v2_missing_chunk_skips_file_and_continues() {
        let temp = tempdir().unwrap();
        let layout = ArchiveLayout::new(temp.path().join("archive"));
        let store = ContentStore::new(layout.clone());

        let good = zlib(b"intact");
        let good_id = md5_hex(&good);
        store.write_chunk(&good_id, &good).unwrap();

        let depot_id = "db5f65c5b09c1ad45c4f88d3e1a9b79f";
        let depot = serde_json::json!({
            "depot": {"items": [
                {"type": "DepotFile", "path": "broken.bin",
                 "chunks": [{"compressedMd5": "00000000000000000000000000000000", "md5": "00",
                             "compressedSize": 1, "size": 1, "offset": 0}]},
                {"type": "DepotFile", "path": "fine.bin",
                 "chunks": [{"compressedMd5": good_id, "md5": md5_hex(b"intact"),
                             "compressedSize": good.len(), "size": 6, "offset": 0}]}
            ]}
        });
        let depot_path = layout.v2_depot_manifest_paths(depot_id)[0].clone();
        fs::create_dir_all(depot_path.parent().unwrap()).unwrap();
        fs::write(&depot_path, serde_json::to_vec(&depot).unwrap()).unwrap();

        let build = serde_json::json!({"version": 2, "depots": [{"manifest": depot_id}]});
        let build_path = layout
            .build_manifest_path_for_url("https://cdn.example.com/content-system/v2/meta/ab/cd/abce");
        fs::create_dir_all(build_path.parent().unwrap()).unwrap();
        fs::write(&build_path, serde_json::to_vec(&build).unwrap()).unwrap();

        let mut index = BuildIndex::load(&layout).unwrap();
        index.upsert(record(&layout, Generation::V2, &build_path));

        let out = temp.path().join("out");
        let report = Extractor::new(layout)
            .extract_build(&index, "1207", "b1", "windows", &out, ExtractOptions::default())
            .unwrap();

        // The broken file is reported; the good one still lands.
        assert_eq!(report.files_extracted, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(!out.join("broken.bin").exists());
        assert_eq!(fs::read(out.join("fine.bin")).unwrap(), b"intact");
    }
}
