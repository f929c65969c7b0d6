//! Bottom-up archive integrity verification.
//!
//! Gen-2 builds: every chunk referenced by every depot manifest must exist
//! and hash to its own filename. Gen-1 builds: file records from all depots
//! are sorted by offset and checked against the shared blob in one
//! sequential pass, comparing each file's MD5 at its recorded offset.
//! Overlapping records are reported as warnings; they occur in real legacy
//! manifests and are not fatal.
//!
//! The validator never mutates the archive.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use md5::{Digest, Md5};

use crate::index::{BuildIndex, BuildRecord};
use crate::manifest::ManifestCache;
use crate::paths::{ArchiveLayout, Generation};
use crate::store::{ContentStatus, ContentStore};

/// Counted result of one validation sweep.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub builds_checked: usize,
    pub builds_passed: usize,
    pub builds_failed: usize,
    pub chunks_validated: usize,
    pub chunks_failed: usize,
    pub files_validated: usize,
    pub files_failed: usize,
    pub blobs_validated: usize,
    pub blobs_failed: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty() && self.builds_failed == 0
    }
}

pub struct Validator {
    layout: ArchiveLayout,
    store: ContentStore,
    cache: ManifestCache,
}

impl Validator {
    pub fn new(layout: ArchiveLayout) -> Self {
        Self {
            store: ContentStore::new(layout.clone()),
            cache: ManifestCache::new(layout.clone()),
            layout,
        }
    }

    /// Validate every indexed build matching the optional product/build
    /// filters.
    pub fn validate(
        &self,
        index: &BuildIndex,
        product_id: Option<&str>,
        build_id: Option<&str>,
    ) -> ValidationReport {
        let mut report = ValidationReport::default();

        for record in index.builds() {
            if product_id.is_some_and(|p| p != record.product_id) {
                continue;
            }
            if build_id.is_some_and(|b| b != record.build_id) {
                continue;
            }

            report.builds_checked += 1;
            let failures_before = report.chunks_failed + report.files_failed + report.blobs_failed;
            let errors_before = report.errors.len();

            match record.generation {
                Generation::V2 => self.validate_v2_build(record, &mut report),
                Generation::V1 => self.validate_v1_build(record, &mut report),
            }

            let failed = report.chunks_failed + report.files_failed + report.blobs_failed
                > failures_before
                || report.errors.len() > errors_before;
            if failed {
                report.builds_failed += 1;
            } else {
                report.builds_passed += 1;
            }
        }
        report
    }

    fn validate_v2_build(&self, record: &BuildRecord, report: &mut ValidationReport) {
        let path = self.layout.root().join(&record.archive_path);
        let manifest = match self.cache.load_v2_build_manifest(&path) {
            Ok(m) => m,
            Err(err) => {
                report
                    .errors
                    .push(format!("build manifest {}: {err}", record.archive_path));
                return;
            }
        };

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

            let chunk_ids: std::collections::BTreeSet<&str> =
                depot.chunks().map(|c| c.compressed_md5.as_str()).collect();
            for chunk_id in chunk_ids {
                match self.store.chunk_status(chunk_id) {
                    ContentStatus::Ok => report.chunks_validated += 1,
                    ContentStatus::Missing => {
                        report.chunks_failed += 1;
                        report.errors.push(format!("chunk missing: {chunk_id}"));
                    }
                    ContentStatus::Corrupted => {
                        report.chunks_failed += 1;
                        report.errors.push(format!("chunk corrupted: {chunk_id}"));
                    }
                }
            }
        }
    }

    fn validate_v1_build(&self, record: &BuildRecord, report: &mut ValidationReport) {
        let path = self.layout.root().join(&record.archive_path);
        let repository = match self.cache.load_v1_repository(&path) {
            Ok(r) => r,
            Err(err) => {
                report
                    .errors
                    .push(format!("repository manifest {}: {err}", record.archive_path));
                return;
            }
        };
        let Some(repository_id) = record.repository_id.as_deref() else {
            report.errors.push(format!(
                "build {} has no repository id recorded",
                record.build_id
            ));
            return;
        };

        // Union of file records across every manifest-bearing depot, then
        // one offset-sorted pass over the shared blob.
        let mut files = Vec::new();
        for entry in &repository.product.depots {
            let Some(name) = entry.manifest_name() else {
                continue;
            };
            match self.cache.load_v1_depot_manifest(
                &record.product_id,
                &record.platform,
                repository_id,
                name,
            ) {
                Ok(depot) => files.extend(depot.files().cloned().collect::<Vec<_>>()),
                Err(err) => report.errors.push(format!("depot manifest {name}: {err}")),
            }
        }

        if files.is_empty() {
            return;
        }
        files.sort_by_key(|f| f.offset);

        let Some(blob_path) = self.store.find_blob(repository_id, &record.build_id) else {
            report.blobs_failed += 1;
            report
                .errors
                .push(format!("blob not found: blobs/{repository_id}/main.bin"));
            return;
        };

        let blob_size = std::fs::metadata(&blob_path).map(|m| m.len()).unwrap_or(0);
        let max_extent = files
            .iter()
            .map(|f| f.offset + f.size)
            .max()
            .unwrap_or(0);
        if blob_size < max_extent {
            report.blobs_failed += 1;
            report.errors.push(format!(
                "blob {} too short: {blob_size} bytes, manifests extend to {max_extent}",
                blob_path.display()
            ));
            return;
        }
        report.blobs_validated += 1;

        let mut blob = match File::open(&blob_path) {
            Ok(f) => f,
            Err(err) => {
                report
                    .errors
                    .push(format!("opening blob {}: {err}", blob_path.display()));
                return;
            }
        };

        let mut prev: Option<(&str, u64)> = None;
        for file in &files {
            if let Some((prev_path, prev_end)) = prev {
                if file.offset < prev_end {
                    report.warnings.push(format!(
                        "file overlap: {prev_path} ends at {prev_end}, {} starts at {}",
                        file.path, file.offset
                    ));
                }
            }
            prev = Some((&file.path, file.offset + file.size));

            match read_at(&mut blob, file.offset, file.size) {
                Ok(data) => {
                    let actual = hex::encode(Md5::digest(&data));
                    if actual.eq_ignore_ascii_case(&file.hash) {
                        report.files_validated += 1;
                    } else {
                        report.files_failed += 1;
                        report.errors.push(format!(
                            "MD5 mismatch for {}: expected {}, got {actual}",
                            file.path, file.hash
                        ));
                    }
                }
                Err(err) => {
                    report.files_failed += 1;
                    report
                        .errors
                        .push(format!("reading {} from blob: {err}", file.path));
                }
            }
        }
    }
}

fn read_at(file: &mut File, offset: u64, size: u64) -> std::io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; size as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::BuildRecord;
    use crate::store::md5_hex;
    use std::fs;
    use tempfile::tempdir;

    fn v1_record(root: &std::path::Path) -> (ArchiveLayout, BuildRecord) {
        let layout = ArchiveLayout::new(root);

        // Blob packs two files back to back.
        let file_a = b"first file contents".to_vec();
        let file_b = b"second file, longer contents".to_vec();
        let mut blob = file_a.clone();
        blob.extend_from_slice(&file_b);
        fs::create_dir_all(layout.blob_dir("37794096")).unwrap();
        fs::write(layout.blob_path("37794096"), &blob).unwrap();

        let depot = serde_json::json!({
            "depot": {"files": [
                {"path": "/game/a.dat", "size": file_a.len(), "hash": md5_hex(&file_a),
                 "url": "37794096/main.bin", "offset": 0},
                {"path": "/game/b.dat", "size": file_b.len(), "hash": md5_hex(&file_b),
                 "url": "37794096/main.bin", "offset": file_a.len()}
            ]},
            "version": 1
        });
        let depot_path =
            layout.v1_depot_manifest_path("1207", "windows", "37794096", "manifest_main.json");
        fs::create_dir_all(depot_path.parent().unwrap()).unwrap();
        fs::write(&depot_path, serde_json::to_vec(&depot).unwrap()).unwrap();

        let repository = serde_json::json!({
            "product": {"depots": [{"manifest": "manifest_main.json"}]},
            "version": 1
        });
        let build_path = layout.build_manifest_path_for_url(
            "https://cdn.example.com/content-system/v1/manifests/1207/windows/37794096/repository.json",
        );
        fs::create_dir_all(build_path.parent().unwrap()).unwrap();
        fs::write(&build_path, serde_json::to_vec(&repository).unwrap()).unwrap();

        let record = BuildRecord {
            product_id: "1207".into(),
            build_id: "b1".into(),
            build_hash: String::new(),
            platform: "windows".into(),
            generation: Generation::V1,
            archive_path: layout.relative(&build_path).to_string_lossy().into_owned(),
            source_url: String::new(),
            repository_id: Some("37794096".into()),
            version_label: String::new(),
            tags: Vec::new(),
        };
        (layout, record)
    }

    #[test]
    fn test_v1_validation_passes() {
        let temp = tempdir().unwrap();
        let (layout, record) = v1_record(temp.path());

        let mut index = BuildIndex::load(&layout).unwrap();
        index.upsert(record);

        let report = Validator::new(layout).validate(&index, None, None);
        assert!(report.is_ok(), "errors: {:?}", report.errors);
        assert_eq!(report.files_validated, 2);
        assert_eq!(report.files_failed, 0);
        assert_eq!(report.blobs_validated, 1);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_v1_detects_corrupted_file() {
        let temp = tempdir().unwrap();
        let (layout, record) = v1_record(temp.path());

        // Flip a byte inside the first packed file.
        let blob_path = layout.blob_path("37794096");
        let mut blob = fs::read(&blob_path).unwrap();
        blob[0] ^= 0xff;
        fs::write(&blob_path, &blob).unwrap();

        let mut index = BuildIndex::load(&layout).unwrap();
        index.upsert(record);

        let report = Validator::new(layout).validate(&index, None, None);
        assert!(!report.is_ok());
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.files_validated, 1);
        assert_eq!(report.builds_failed, 1);
    }

    #[test]
    fn test_v1_short_blob_detected() {
        let temp = tempdir().unwrap();
        let (layout, record) = v1_record(temp.path());

        let blob_path = layout.blob_path("37794096");
        let blob = fs::read(&blob_path).unwrap();
        fs::write(&blob_path, &blob[..blob.len() - 4]).unwrap();

        let mut index = BuildIndex::load(&layout).unwrap();
        index.upsert(record);

        let report = Validator::new(layout).validate(&index, None, None);
        assert_eq!(report.blobs_failed, 1);
        assert!(!report.is_ok());
    }

    #[test]
    fn test_v2_validation() {
        let temp = tempdir().unwrap();
        let layout = ArchiveLayout::new(temp.path());
        let store = ContentStore::new(layout.clone());

        let chunk = b"compressed chunk bytes".to_vec();
        let chunk_id = md5_hex(&chunk);
        store.write_chunk(&chunk_id, &chunk).unwrap();

        let depot_id = "db5f65c5b09c1ad45c4f88d3e1a9b79f";
        let depot = serde_json::json!({
            "depot": {"items": [
                {"type": "DepotFile", "path": "game/a.dat",
                 "chunks": [{"compressedMd5": chunk_id, "md5": "00", "compressedSize": chunk.len(), "size": 40, "offset": 0}]}
            ]},
            "version": 2
        });
        let depot_path = layout.v2_depot_manifest_paths(depot_id)[0].clone();
        fs::create_dir_all(depot_path.parent().unwrap()).unwrap();
        fs::write(&depot_path, serde_json::to_vec(&depot).unwrap()).unwrap();

        let build = serde_json::json!({"version": 2, "depots": [{"manifest": depot_id}]});
        let build_path = layout
            .build_manifest_path_for_url("https://cdn.example.com/content-system/v2/meta/ab/cd/abcd");
        fs::create_dir_all(build_path.parent().unwrap()).unwrap();
        fs::write(&build_path, serde_json::to_vec(&build).unwrap()).unwrap();

        let record = BuildRecord {
            product_id: "1207".into(),
            build_id: "b2".into(),
            build_hash: String::new(),
            platform: "windows".into(),
            generation: Generation::V2,
            archive_path: layout.relative(&build_path).to_string_lossy().into_owned(),
            source_url: String::new(),
            repository_id: None,
            version_label: String::new(),
            tags: Vec::new(),
        };
        let mut index = BuildIndex::load(&layout).unwrap();
        index.upsert(record);

        let report = Validator::new(layout.clone()).validate(&index, None, None);
        assert!(report.is_ok(), "errors: {:?}", report.errors);
        assert_eq!(report.chunks_validated, 1);

        // Delete the chunk: validation must fail without mutating anything.
        fs::remove_file(layout.chunk_path(&chunk_id)).unwrap();
        let report = Validator::new(layout).validate(&index, None, None);
        assert_eq!(report.chunks_failed, 1);
        assert!(!report.is_ok());
    }
}
