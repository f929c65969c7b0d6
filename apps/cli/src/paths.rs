//! Archive path codec.
//!
//! Translates CDN URLs into stable on-disk locations under the archive root
//! and derives the two-level fan-out ("galaxy") paths used for every
//! hash-addressed file. The mapping is deterministic and lossless: every URL
//! the mirror fetches has exactly one archive path.
//!
//! Layout:
//! ```text
//! <archive_root>/
//! ├── blobs/<id>/main.bin            (gen-1 packed binaries + sidecars)
//! ├── chunks/ab/cd/abcd...           (gen-2 chunks, MD5-named)
//! ├── manifests/v1/manifests/...     (gen-1 depot manifests)
//! ├── manifests/v2/{depots,meta}/... (gen-2 depot manifests)
//! ├── builds/v1/manifests/...        (gen-1 repository manifests)
//! ├── builds/v2/...                  (gen-2 build manifests)
//! └── metadata/archive_database.json
//! ```

use std::path::{Path, PathBuf};

use url::Url;

/// Host of the alternate manifest collector. Build and depot manifests served
/// from here carry no `/v2/` marker in their path.
pub const COLLECTOR_HOST: &str = "downloadable-manifests-collector.gog.com";

/// Expand a hex hash into its `ab/cd/abcd...` fan-out form. Hashes that
/// already contain a separator are passed through untouched.
pub fn galaxy_path(hash: &str) -> String {
    if hash.contains('/') || hash.len() < 4 {
        return hash.to_string();
    }
    format!("{}/{}/{}", &hash[0..2], &hash[2..4], hash)
}

/// Manifest generation, mirroring the CDN's two content-system APIs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Generation {
    V1,
    V2,
}

impl Generation {
    pub fn as_number(&self) -> u8 {
        match self {
            Generation::V1 => 1,
            Generation::V2 => 2,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Generation::V1),
            2 => Some(Generation::V2),
            _ => None,
        }
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.as_number())
    }
}

/// Classify a CDN URL by generation marker. Collector-host URLs are always
/// generation 2 even though they carry no `/v2/` segment.
pub fn classify_url(url: &str) -> Option<Generation> {
    if url.contains("/v1/") {
        Some(Generation::V1)
    } else if url.contains("/v2/") {
        Some(Generation::V2)
    } else if is_collector_url(url) {
        Some(Generation::V2)
    } else {
        None
    }
}

fn is_collector_url(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == COLLECTOR_HOST))
        .unwrap_or(false)
}

fn url_filename(url: &str) -> String {
    url.rsplit('/').next().unwrap_or(url).to_string()
}

/// The on-disk layout of one archive root. All path derivation goes through
/// here; nothing else in the crate hardcodes directory names.
#[derive(Clone, Debug)]
pub struct ArchiveLayout {
    root: PathBuf,
}

impl ArchiveLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.root.join("chunks")
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    pub fn builds_dir(&self) -> PathBuf {
        self.root.join("builds")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join("metadata")
    }

    pub fn database_path(&self) -> PathBuf {
        self.metadata_dir().join("archive_database.json")
    }

    /// `chunks/ab/cd/abcd...` for a chunk named by its compressed MD5.
    pub fn chunk_path(&self, compressed_md5: &str) -> PathBuf {
        self.chunks_dir().join(galaxy_path(compressed_md5))
    }

    /// Directory holding one gen-1 packed binary and its sidecars.
    pub fn blob_dir(&self, id: &str) -> PathBuf {
        self.blobs_dir().join(id)
    }

    pub fn blob_path(&self, id: &str) -> PathBuf {
        self.blob_dir(id).join("main.bin")
    }

    pub fn blob_sidecar_path(&self, id: &str) -> PathBuf {
        self.blob_dir(id).join("main.json")
    }

    pub fn blob_xml_path(&self, id: &str) -> PathBuf {
        self.blob_dir(id).join("main.xml")
    }

    /// Gen-1 depot manifests keep the CDN's product/platform/repository tree.
    pub fn v1_depot_manifest_path(
        &self,
        product_id: &str,
        platform: &str,
        repository_id: &str,
        manifest_name: &str,
    ) -> PathBuf {
        self.manifests_dir()
            .join("v1")
            .join("manifests")
            .join(product_id)
            .join(platform)
            .join(repository_id)
            .join(manifest_name)
    }

    /// Both accepted locations of a gen-2 depot manifest, in lookup order.
    pub fn v2_depot_manifest_paths(&self, manifest_id: &str) -> [PathBuf; 2] {
        let gp = galaxy_path(manifest_id);
        let base = self.manifests_dir().join("v2");
        [base.join("depots").join(&gp), base.join("meta").join(&gp)]
    }

    /// First existing location of a gen-2 depot manifest, if any.
    pub fn find_v2_depot_manifest(&self, manifest_id: &str) -> Option<PathBuf> {
        self.v2_depot_manifest_paths(manifest_id)
            .into_iter()
            .find(|p| p.exists())
    }

    /// Where a fetched depot manifest is persisted, keyed off the URL that
    /// actually served it.
    pub fn depot_manifest_path_for_url(&self, url: &str) -> PathBuf {
        if let Some(rest) = url.split_once("/v1/").map(|(_, r)| r) {
            return self.manifests_dir().join("v1").join(rest);
        }
        if let Some(rest) = url.split_once("/v2/").map(|(_, r)| r) {
            return self.manifests_dir().join("v2").join(rest);
        }
        if is_collector_url(url) {
            // Collector serves depot manifests from /manifests/depots/<gp>
            // or /depots/<gp>; both map onto the depots tree.
            for marker in ["/manifests/depots/", "/depots/"] {
                if let Some(rest) = url.split_once(marker).map(|(_, r)| r) {
                    return self.manifests_dir().join("v2").join("depots").join(rest);
                }
            }
        }
        self.manifests_dir().join(url_filename(url))
    }

    /// Where a fetched build manifest is persisted, keyed off its source URL.
    /// Unknown URLs fall back to a root-level filename under `builds/`.
    pub fn build_manifest_path_for_url(&self, url: &str) -> PathBuf {
        // Repository-mode URLs carry no generation marker in the path; the
        // product/platform/repository triple keeps the mapping collision-free.
        if let Some((gen, product, platform, repo)) = parse_repository_endpoint(url) {
            return self
                .builds_dir()
                .join(gen.to_string())
                .join("manifests")
                .join(product)
                .join(platform)
                .join(repo)
                .join("repository.json");
        }
        if url.contains("/v1/") {
            return match url.split_once("/v1/manifests/") {
                Some((_, rest)) => self.builds_dir().join("v1").join("manifests").join(rest),
                None => self.builds_dir().join("v1").join(url_filename(url)),
            };
        }
        if url.contains("/v2/") {
            return match url.split_once("/v2/") {
                Some((_, rest)) => self.builds_dir().join("v2").join(rest),
                None => self.builds_dir().join("v2").join(url_filename(url)),
            };
        }
        if is_collector_url(url) {
            return match url.split_once("/manifests/builds/") {
                Some((_, rest)) => self.builds_dir().join("v2").join("builds").join(rest),
                None => self
                    .builds_dir()
                    .join("v2")
                    .join("builds")
                    .join(url_filename(url)),
            };
        }
        self.builds_dir().join(url_filename(url))
    }

    /// Archive-relative form of a path under the root, for index records.
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Recognize the content-system repository endpoint
/// (`.../products/<product>/os/<platform>/builds/<repo>/repository`,
/// optionally `?generation=2`) and return its addressing triple.
fn parse_repository_endpoint(url: &str) -> Option<(Generation, String, String, String)> {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    let n = segments.len();
    if n < 7 || segments[n - 1] != "repository" || segments[n - 3] != "builds" {
        return None;
    }
    if segments[n - 7] != "products" || segments[n - 5] != "os" {
        return None;
    }
    let gen = if query.contains("generation=2") {
        Generation::V2
    } else {
        Generation::V1
    };
    Some((
        gen,
        segments[n - 6].to_string(),
        segments[n - 4].to_string(),
        segments[n - 2].to_string(),
    ))
}

/// Extract the repository id from a build-manifest source URL.
///
/// Gen-1 links end in `.../<repository_id>/repository.json`; gen-2 links end
/// in the manifest hash itself.
pub fn repository_id_from_url(url: &str) -> Option<String> {
    if let Some((_, _, _, repo)) = parse_repository_endpoint(url) {
        return Some(repo);
    }
    let trimmed = url.trim_end_matches('/');
    let mut segments = trimmed.rsplit('/');
    let last = segments.next()?;
    if url.contains("/v1/manifests/") {
        if last == "repository.json" {
            return segments.next().map(str::to_string);
        }
        return None;
    }
    if url.contains("/v2/meta/") || is_collector_url(url) {
        return Some(last.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_galaxy_path_fanout() {
        assert_eq!(
            galaxy_path("f732fe8750ba3a2f86dea9496f208b69"),
            "f7/32/f732fe8750ba3a2f86dea9496f208b69"
        );
        // Already expanded values pass through.
        assert_eq!(galaxy_path("f7/32/f732"), "f7/32/f732");
        assert_eq!(galaxy_path("ab"), "ab");
    }

    #[test]
    fn test_classify_url() {
        assert_eq!(
            classify_url(
                "https://cdn.example.com/content-system/v1/manifests/1/windows/2/repository.json"
            ),
            Some(Generation::V1)
        );
        assert_eq!(
            classify_url("https://cdn.example.com/content-system/v2/meta/92/ab/92ab42"),
            Some(Generation::V2)
        );
        assert_eq!(
            classify_url(
                "https://downloadable-manifests-collector.gog.com/manifests/builds/2e/18/2e18ff"
            ),
            Some(Generation::V2)
        );
        assert_eq!(classify_url("https://example.com/whatever"), None);
    }

    #[test]
    fn test_build_manifest_paths() {
        let layout = ArchiveLayout::new("/archive");
        assert_eq!(
            layout.build_manifest_path_for_url(
                "https://cdn.example.com/content-system/v1/manifests/1207658930/windows/37794096/repository.json"
            ),
            PathBuf::from("/archive/builds/v1/manifests/1207658930/windows/37794096/repository.json")
        );
        assert_eq!(
            layout.build_manifest_path_for_url(
                "https://cdn.example.com/content-system/v2/meta/92/ab/92ab42631ff4742b309bb62c175e6306"
            ),
            PathBuf::from("/archive/builds/v2/meta/92/ab/92ab42631ff4742b309bb62c175e6306")
        );
        assert_eq!(
            layout.build_manifest_path_for_url(
                "https://downloadable-manifests-collector.gog.com/manifests/builds/2e/18/2e18ff86c77e4960f905a9e5a1545468"
            ),
            PathBuf::from("/archive/builds/v2/builds/2e/18/2e18ff86c77e4960f905a9e5a1545468")
        );
        // Unknown URLs land on a root-level filename.
        assert_eq!(
            layout.build_manifest_path_for_url("https://example.com/one-off.bin"),
            PathBuf::from("/archive/builds/one-off.bin")
        );
        // Repository endpoints map onto the product/platform/repo tree so
        // different repositories never collide.
        assert_eq!(
            layout.build_manifest_path_for_url(
                "https://content-system.gog.com/products/1207658930/os/windows/builds/37794096/repository"
            ),
            PathBuf::from("/archive/builds/v1/manifests/1207658930/windows/37794096/repository.json")
        );
        assert_eq!(
            layout.build_manifest_path_for_url(
                "https://content-system.gog.com/products/1207658930/os/windows/builds/abcd1234/repository?generation=2"
            ),
            PathBuf::from("/archive/builds/v2/manifests/1207658930/windows/abcd1234/repository.json")
        );
    }

    #[test]
    fn test_depot_manifest_paths() {
        let layout = ArchiveLayout::new("/archive");
        assert_eq!(
            layout.depot_manifest_path_for_url(
                "https://cdn.example.com/content-system/v2/depots/db/5f/db5f65c5b09c1ad45c4f88d3e1a9b79f"
            ),
            PathBuf::from("/archive/manifests/v2/depots/db/5f/db5f65c5b09c1ad45c4f88d3e1a9b79f")
        );
        assert_eq!(
            layout.depot_manifest_path_for_url(
                "https://cdn.example.com/content-system/v2/meta/db/5f/db5f65c5b09c1ad45c4f88d3e1a9b79f"
            ),
            PathBuf::from("/archive/manifests/v2/meta/db/5f/db5f65c5b09c1ad45c4f88d3e1a9b79f")
        );
        assert_eq!(
            layout.depot_manifest_path_for_url(
                "https://downloadable-manifests-collector.gog.com/manifests/depots/db/5f/db5f65c5b09c1ad45c4f88d3e1a9b79f"
            ),
            PathBuf::from("/archive/manifests/v2/depots/db/5f/db5f65c5b09c1ad45c4f88d3e1a9b79f")
        );
        assert_eq!(
            layout.depot_manifest_path_for_url(
                "https://cdn.example.com/content-system/v1/manifests/1207658930/windows/37794096/manifest_x.json"
            ),
            PathBuf::from("/archive/manifests/v1/manifests/1207658930/windows/37794096/manifest_x.json")
        );
    }

    #[test]
    fn test_chunk_and_blob_paths() {
        let layout = ArchiveLayout::new("/archive");
        assert_eq!(
            layout.chunk_path("f732fe8750ba3a2f86dea9496f208b69"),
            PathBuf::from("/archive/chunks/f7/32/f732fe8750ba3a2f86dea9496f208b69")
        );
        assert_eq!(
            layout.blob_path("37794096"),
            PathBuf::from("/archive/blobs/37794096/main.bin")
        );
        assert_eq!(
            layout.blob_sidecar_path("37794096"),
            PathBuf::from("/archive/blobs/37794096/main.json")
        );
    }

    #[test]
    fn test_repository_id_from_url() {
        assert_eq!(
            repository_id_from_url(
                "https://cdn.example.com/content-system/v1/manifests/1207658930/windows/37794096/repository.json"
            ),
            Some("37794096".to_string())
        );
        assert_eq!(
            repository_id_from_url(
                "https://cdn.example.com/content-system/v2/meta/e5/18/e518c17d90805e8e3998a35fac8b8505"
            ),
            Some("e518c17d90805e8e3998a35fac8b8505".to_string())
        );
        assert_eq!(
            repository_id_from_url(
                "https://content-system.gog.com/products/1207658930/os/windows/builds/37794096/repository"
            ),
            Some("37794096".to_string())
        );
        assert_eq!(repository_id_from_url("https://example.com/nothing"), None);
    }
}
