//! Fetch, persist, and load build and depot manifests.
//!
//! The cache treats on-disk presence as authoritative: a manifest that
//! already exists under its derived path is never re-fetched and never
//! overwritten. Raw CDN bytes are stored verbatim; a prettified JSON sibling
//! is written next to each fetched manifest purely for debuggability and can
//! always be re-derived.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::cdn::{Endpoints, Transport};
use crate::manifest::v1::{RepositoryManifest, V1DepotManifest};
use crate::manifest::v2::{V2BuildManifest, V2DepotManifest};
use crate::manifest::{decode_manifest_bytes, parse_raw, ManifestError};
use crate::paths::ArchiveLayout;
use crate::store::atomic_write;

/// Result of one cache lookup: where the manifest lives and whether the
/// network was touched.
#[derive(Debug)]
pub struct CachedManifest {
    pub path: PathBuf,
    pub fetched: bool,
}

pub struct ManifestCache {
    layout: ArchiveLayout,
}

impl ManifestCache {
    pub fn new(layout: ArchiveLayout) -> Self {
        Self { layout }
    }

    // ========== Build Manifests ==========

    /// Fetch a build manifest from its source URL unless it is already on
    /// disk. Returns the archive path and the raw bytes.
    pub fn fetch_build_manifest(
        &self,
        transport: &dyn Transport,
        source_url: &str,
    ) -> Result<(CachedManifest, Vec<u8>), ManifestError> {
        let path = self.layout.build_manifest_path_for_url(source_url);
        if path.exists() {
            debug!(path = %path.display(), "build manifest already cached");
            let raw = fs::read(&path)?;
            return Ok((CachedManifest { path, fetched: false }, raw));
        }

        let raw = transport.get(source_url)?;
        atomic_write(&path, &raw)?;
        write_pretty_sibling(&path, &raw);
        Ok((CachedManifest { path, fetched: true }, raw))
    }

    pub fn load_v2_build_manifest(&self, path: &Path) -> Result<V2BuildManifest, ManifestError> {
        let raw = fs::read(path)?;
        parse_raw(&raw)
    }

    pub fn load_v1_repository(&self, path: &Path) -> Result<RepositoryManifest, ManifestError> {
        let raw = fs::read(path)?;
        parse_raw(&raw)
    }

    // ========== Depot Manifests ==========

    /// Fetch a gen-2 depot manifest, trying each known location in order.
    /// The winning URL decides the on-disk location.
    pub fn fetch_v2_depot_manifest(
        &self,
        transport: &dyn Transport,
        endpoints: &Endpoints,
        manifest_id: &str,
    ) -> Result<CachedManifest, ManifestError> {
        if let Some(path) = self.layout.find_v2_depot_manifest(manifest_id) {
            return Ok(CachedManifest { path, fetched: false });
        }

        for url in endpoints.v2_depot_manifest_urls(manifest_id) {
            match transport.get(&url) {
                Ok(raw) => {
                    let path = self.layout.depot_manifest_path_for_url(&url);
                    atomic_write(&path, &raw)?;
                    write_pretty_sibling(&path, &raw);
                    return Ok(CachedManifest { path, fetched: true });
                }
                Err(err) if err.is_not_found() => {
                    debug!(%url, "depot manifest not at this location");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(ManifestError::NotFound(manifest_id.to_string()))
    }

    /// Fetch a gen-1 depot manifest (plain JSON, single known location).
    pub fn fetch_v1_depot_manifest(
        &self,
        transport: &dyn Transport,
        endpoints: &Endpoints,
        product_id: &str,
        platform: &str,
        repository_id: &str,
        manifest_name: &str,
    ) -> Result<CachedManifest, ManifestError> {
        let path =
            self.layout
                .v1_depot_manifest_path(product_id, platform, repository_id, manifest_name);
        if path.exists() {
            return Ok(CachedManifest { path, fetched: false });
        }

        let url =
            endpoints.v1_depot_manifest_url(product_id, platform, repository_id, manifest_name);
        let raw = transport.get(&url)?;
        atomic_write(&path, &raw)?;
        Ok(CachedManifest { path, fetched: true })
    }

    pub fn load_v2_depot_manifest(
        &self,
        manifest_id: &str,
    ) -> Result<V2DepotManifest, ManifestError> {
        let path = self
            .layout
            .find_v2_depot_manifest(manifest_id)
            .ok_or_else(|| ManifestError::NotFound(manifest_id.to_string()))?;
        let raw = fs::read(path)?;
        parse_raw(&raw)
    }

    pub fn load_v1_depot_manifest(
        &self,
        product_id: &str,
        platform: &str,
        repository_id: &str,
        manifest_name: &str,
    ) -> Result<V1DepotManifest, ManifestError> {
        let path =
            self.layout
                .v1_depot_manifest_path(product_id, platform, repository_id, manifest_name);
        if !path.exists() {
            return Err(ManifestError::NotFound(manifest_name.to_string()));
        }
        let raw = fs::read(path)?;
        parse_raw(&raw)
    }
}

/// Write the prettified JSON sibling of a raw manifest. Best effort: a
/// manifest that fails to decode still keeps its raw bytes, which remain the
/// authoritative artifact.
fn write_pretty_sibling(raw_path: &Path, raw: &[u8]) {
    let pretty_path = pretty_sibling_path(raw_path);
    let result = decode_manifest_bytes(raw)
        .ok()
        .and_then(|decoded| serde_json::from_slice::<serde_json::Value>(&decoded).ok())
        .and_then(|value| serde_json::to_vec_pretty(&value).ok())
        .map(|pretty| atomic_write(&pretty_path, &pretty));

    match result {
        Some(Ok(())) => {}
        _ => warn!(path = %raw_path.display(), "could not write prettified manifest copy"),
    }
}

/// `repository.json` gets a `repository.pretty.json` sibling so the raw file
/// is not shadowed; extensionless gen-2 blobs get a `.json` suffix.
pub fn pretty_sibling_path(raw_path: &Path) -> PathBuf {
    match raw_path.extension() {
        Some(ext) if ext == "json" => raw_path.with_extension("pretty.json"),
        _ => {
            let mut name = raw_path.file_name().unwrap_or_default().to_os_string();
            name.push(".json");
            raw_path.with_file_name(name)
        }
    }
}
