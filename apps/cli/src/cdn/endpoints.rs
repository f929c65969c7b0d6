//! Endpoint templates for the content-system API and the two manifest hosts.

use crate::paths::{galaxy_path, Generation};

pub const DEFAULT_CONTENT_SYSTEM: &str = "https://content-system.gog.com";
pub const DEFAULT_CDN: &str = "https://gog-cdn-fastly.gog.com";
pub const DEFAULT_COLLECTOR: &str = "https://downloadable-manifests-collector.gog.com";

/// Host configuration. Defaults match the production CDN; tests point these
/// at fixtures.
#[derive(Clone, Debug)]
pub struct Endpoints {
    pub content_system: String,
    pub cdn: String,
    pub collector: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            content_system: DEFAULT_CONTENT_SYSTEM.to_string(),
            cdn: DEFAULT_CDN.to_string(),
            collector: DEFAULT_COLLECTOR.to_string(),
        }
    }
}

impl Endpoints {
    /// Build listing for a product/platform. Generation 1 is the parameterless
    /// form; generation 2 is requested explicitly.
    pub fn builds_url(&self, product_id: &str, platform: &str, generation: Generation) -> String {
        let base = format!(
            "{}/products/{}/os/{}/builds",
            self.content_system, product_id, platform
        );
        match generation {
            Generation::V1 => base,
            Generation::V2 => format!("{base}?generation=2"),
        }
    }

    /// Synthesized build-manifest URL for repository mode, where the caller
    /// already knows the repository id and API generation.
    pub fn repository_url(
        &self,
        product_id: &str,
        platform: &str,
        repository_id: &str,
        generation: Generation,
    ) -> String {
        let base = format!(
            "{}/products/{}/os/{}/builds/{}/repository",
            self.content_system, product_id, platform, repository_id
        );
        match generation {
            Generation::V1 => base,
            Generation::V2 => format!("{base}?generation=2"),
        }
    }

    pub fn v1_depot_manifest_url(
        &self,
        product_id: &str,
        platform: &str,
        repository_id: &str,
        manifest_name: &str,
    ) -> String {
        format!(
            "{}/content-system/v1/manifests/{}/{}/{}/{}",
            self.cdn, product_id, platform, repository_id, manifest_name
        )
    }

    /// Candidate URLs for a gen-2 depot manifest, in fetch order: the
    /// collector's current location, the CDN's legacy meta location, then the
    /// collector's alternate location. First success wins.
    pub fn v2_depot_manifest_urls(&self, manifest_id: &str) -> [String; 3] {
        let gp = galaxy_path(manifest_id);
        [
            format!("{}/manifests/depots/{}", self.collector, gp),
            format!("{}/content-system/v2/meta/{}", self.cdn, gp),
            format!("{}/depots/{}", self.collector, gp),
        ]
    }

    /// Archive path of a gen-2 chunk below a signed base.
    pub fn v2_chunk_path(&self, product_id: &str, compressed_md5: &str) -> String {
        format!(
            "/content-system/v2/store/{}/{}",
            product_id,
            galaxy_path(compressed_md5)
        )
    }

    /// Archive path of a gen-1 blob below a signed base.
    pub fn v1_blob_path(&self, platform: &str, repository_id: &str) -> String {
        format!("/{}/{}/main.bin", platform, repository_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_url_generation_parameter() {
        let ep = Endpoints::default();
        assert_eq!(
            ep.builds_url("1207658930", "windows", Generation::V1),
            "https://content-system.gog.com/products/1207658930/os/windows/builds"
        );
        assert!(ep
            .builds_url("1207658930", "windows", Generation::V2)
            .ends_with("/builds?generation=2"));
    }

    #[test]
    fn test_v2_depot_fallback_order() {
        let ep = Endpoints::default();
        let urls = ep.v2_depot_manifest_urls("db5f65c5b09c1ad45c4f88d3e1a9b79f");
        assert!(urls[0].contains("/manifests/depots/db/5f/"));
        assert!(urls[1].contains("/content-system/v2/meta/db/5f/"));
        assert!(urls[2].contains("/depots/db/5f/"));
    }

    #[test]
    fn test_content_paths() {
        let ep = Endpoints::default();
        assert_eq!(
            ep.v2_chunk_path("1207658930", "f732fe8750ba3a2f86dea9496f208b69"),
            "/content-system/v2/store/1207658930/f7/32/f732fe8750ba3a2f86dea9496f208b69"
        );
        assert_eq!(
            ep.v1_blob_path("windows", "37794096"),
            "/windows/37794096/main.bin"
        );
    }
}
