//! Generation-2 manifest types.
//!
//! Gen-2 build manifests list depot references by manifest hash; depot
//! manifests enumerate items discriminated by `type`, and every `DepotFile`
//! carries an ordered chunk list. A chunk is stored on the CDN (and in the
//! archive) under `compressedMd5`; `md5` is the digest of the decompressed
//! bytes. The two hashes are independent and never interchangeable.

use serde::Deserialize;

/// Top-level gen-2 build manifest.
#[derive(Clone, Debug, Deserialize)]
pub struct V2BuildManifest {
    #[serde(default)]
    pub version: Option<u8>,
    #[serde(rename = "buildId", default)]
    pub build_id: Option<String>,
    #[serde(default)]
    pub depots: Vec<V2DepotReference>,
    #[serde(rename = "offlineDepot", default)]
    pub offline_depot: Option<V2DepotReference>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(rename = "versionName", default)]
    pub version_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

/// Reference from a build manifest to one depot manifest.
#[derive(Clone, Debug, Deserialize)]
pub struct V2DepotReference {
    pub manifest: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(rename = "compressedSize", default)]
    pub compressed_size: Option<u64>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(rename = "productId", default)]
    pub product_id: Option<String>,
    #[serde(rename = "isGogDepot", default)]
    pub is_gog_depot: bool,
}

/// Gen-2 depot manifest.
#[derive(Clone, Debug, Deserialize)]
pub struct V2DepotManifest {
    pub depot: V2Depot,
    #[serde(default)]
    pub version: Option<u8>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct V2Depot {
    #[serde(default)]
    pub items: Vec<DepotItem>,
}

/// One item of a depot, discriminated by the wire `type` field. Only
/// `DepotFile` items carry content.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type")]
pub enum DepotItem {
    DepotFile(DepotFileRecord),
    DepotDirectory(DepotDirectoryRecord),
    DepotLink(DepotLinkRecord),
}

#[derive(Clone, Debug, Deserialize)]
pub struct DepotFileRecord {
    pub path: String,
    #[serde(default)]
    pub chunks: Vec<ChunkRecord>,
    /// MD5 of the whole file; the CDN omits it for some single-chunk files.
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
}

impl DepotFileRecord {
    /// Uncompressed file size, derived from the chunk list.
    pub fn size(&self) -> u64 {
        self.chunks.iter().map(|c| c.size).sum()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DepotDirectoryRecord {
    pub path: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DepotLinkRecord {
    pub path: String,
    #[serde(default)]
    pub target: Option<String>,
}

/// One content-addressed fragment of a file.
#[derive(Clone, Debug, Deserialize)]
pub struct ChunkRecord {
    /// MD5 of the compressed bytes; names the chunk on the CDN and on disk.
    #[serde(rename = "compressedMd5")]
    pub compressed_md5: String,
    /// MD5 of the decompressed bytes.
    pub md5: String,
    #[serde(rename = "compressedSize")]
    pub compressed_size: u64,
    pub size: u64,
    /// Offset of this chunk's decompressed bytes inside the file.
    #[serde(default)]
    pub offset: u64,
}

impl V2DepotManifest {
    /// File records only, directories and links filtered out.
    pub fn files(&self) -> impl Iterator<Item = &DepotFileRecord> {
        self.depot.items.iter().filter_map(|item| match item {
            DepotItem::DepotFile(f) => Some(f),
            _ => None,
        })
    }

    /// Every chunk referenced by this depot, in manifest order.
    pub fn chunks(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.files().flat_map(|f| f.chunks.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPOT_JSON: &str = r#"{
        "depot": {
            "items": [
                {
                    "type": "DepotFile",
                    "path": "game/data.pak",
                    "md5": "11111111111111111111111111111111",
                    "chunks": [
                        {"compressedMd5": "aaaa", "md5": "bbbb", "compressedSize": 10, "size": 20, "offset": 0},
                        {"compressedMd5": "cccc", "md5": "dddd", "compressedSize": 5, "size": 8, "offset": 20}
                    ]
                },
                {"type": "DepotDirectory", "path": "game/empty"},
                {"type": "DepotLink", "path": "game/link", "target": "data.pak"}
            ]
        },
        "version": 2
    }"#;

    #[test]
    fn test_items_discriminated_by_type() {
        let manifest: V2DepotManifest = serde_json::from_str(DEPOT_JSON).unwrap();
        assert_eq!(manifest.depot.items.len(), 3);

        let files: Vec<_> = manifest.files().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "game/data.pak");
        assert_eq!(files[0].size(), 28);

        let chunks: Vec<_> = manifest.chunks().collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].compressed_md5, "aaaa");
        assert_eq!(chunks[0].md5, "bbbb");
    }

    #[test]
    fn test_build_manifest() {
        let json = r#"{
            "version": 2,
            "buildId": "56789",
            "versionName": "3.5.0",
            "tags": ["csb_10"],
            "depots": [
                {"manifest": "db5f65c5b09c1ad45c4f88d3e1a9b79f", "size": 100, "languages": ["*"]}
            ],
            "offlineDepot": {"manifest": "ffffffffffffffffffffffffffffffff"}
        }"#;
        let build: V2BuildManifest = serde_json::from_str(json).unwrap();
        assert_eq!(build.depots.len(), 1);
        assert_eq!(build.depots[0].manifest, "db5f65c5b09c1ad45c4f88d3e1a9b79f");
        assert!(build.offline_depot.is_some());
        assert_eq!(build.version_name.as_deref(), Some("3.5.0"));
    }
}
