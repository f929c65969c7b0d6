//! Generation-1 manifest types.
//!
//! A gen-1 build manifest ("repository") nests its depot list under
//! `product.depots`. Depot entries either reference a depot-manifest JSON
//! file or mark a redistributable package; redistributables carry no content
//! of their own and are skipped by the archiver.

use serde::Deserialize;

/// Top-level gen-1 repository manifest (`repository.json`).
#[derive(Clone, Debug, Deserialize)]
pub struct RepositoryManifest {
    pub product: RepositoryProduct,
    #[serde(default)]
    pub version: Option<u8>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RepositoryProduct {
    #[serde(default)]
    pub depots: Vec<DepotEntry>,
    #[serde(rename = "offlineDepot", default)]
    pub offline_depot: Option<DepotEntry>,
    #[serde(rename = "rootGameID", default)]
    pub root_game_id: Option<String>,
    #[serde(rename = "timestamp", default)]
    pub timestamp: Option<u64>,
}

/// One entry of `product.depots`. The wire format distinguishes the two
/// shapes only by which keys are present.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum DepotEntry {
    Depot(DepotReference),
    Redistributable(RedistributableMarker),
}

impl DepotEntry {
    /// The referenced depot-manifest filename, if this entry has one.
    pub fn manifest_name(&self) -> Option<&str> {
        match self {
            DepotEntry::Depot(d) => Some(&d.manifest),
            DepotEntry::Redistributable(_) => None,
        }
    }
}

/// Depot entry that references a depot manifest. For gen-1 the `manifest`
/// value is a filename and already carries its `.json` extension.
#[derive(Clone, Debug, Deserialize)]
pub struct DepotReference {
    pub manifest: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub systems: Vec<String>,
}

/// Depot entry that only names a redistributable package.
#[derive(Clone, Debug, Deserialize)]
pub struct RedistributableMarker {
    #[serde(default)]
    pub redist: Option<String>,
    #[serde(default)]
    pub executable: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
}

/// Gen-1 depot manifest: a flat list of files at offsets inside the shared
/// packed binary.
#[derive(Clone, Debug, Deserialize)]
pub struct V1DepotManifest {
    pub depot: V1Depot,
    #[serde(default)]
    pub version: Option<u8>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct V1Depot {
    #[serde(default)]
    pub files: Vec<V1DepotEntry>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A row of `depot.files`: either a directory marker or a file record.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum V1DepotEntry {
    Directory(V1DirectoryRecord),
    File(V1FileRecord),
}

#[derive(Clone, Debug, Deserialize)]
pub struct V1DirectoryRecord {
    pub path: String,
    pub directory: bool,
}

/// A file packed into the shared blob. `url` identifies the blob (typically
/// `<repository_id>/main.bin`), `offset` the file's position inside it, and
/// `hash` the MD5 of the file's bytes.
#[derive(Clone, Debug, Deserialize)]
pub struct V1FileRecord {
    pub path: String,
    pub size: u64,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub offset: u64,
}

impl V1DepotManifest {
    /// File records only, directory markers filtered out.
    pub fn files(&self) -> impl Iterator<Item = &V1FileRecord> {
        self.depot.files.iter().filter_map(|entry| match entry {
            V1DepotEntry::File(f) => Some(f),
            V1DepotEntry::Directory(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPOSITORY_JSON: &str = r#"{
        "product": {
            "rootGameID": "1207658930",
            "depots": [
                {"manifest": "manifest_main.json", "size": "123", "languages": ["English"]},
                {"redist": "vcredist", "executable": "redist/vc.exe", "size": "42"}
            ],
            "offlineDepot": {"manifest": "manifest_offline.json"}
        },
        "version": 1
    }"#;

    #[test]
    fn test_repository_entries_discriminated() {
        let repo: RepositoryManifest = serde_json::from_str(REPOSITORY_JSON).unwrap();
        assert_eq!(repo.product.depots.len(), 2);
        assert_eq!(
            repo.product.depots[0].manifest_name(),
            Some("manifest_main.json")
        );
        assert!(matches!(
            repo.product.depots[1],
            DepotEntry::Redistributable(_)
        ));
        assert_eq!(
            repo.product
                .offline_depot
                .as_ref()
                .and_then(|d| d.manifest_name()),
            Some("manifest_offline.json")
        );
    }

    #[test]
    fn test_depot_manifest_skips_directories() {
        let json = r#"{
            "depot": {
                "files": [
                    {"path": "/game", "directory": true},
                    {"path": "/game/a.dat", "size": 10, "hash": "aa", "url": "37794096/main.bin", "offset": 0},
                    {"path": "/game/b.dat", "size": 20, "hash": "bb", "url": "37794096/main.bin", "offset": 10}
                ]
            },
            "version": 1
        }"#;
        let manifest: V1DepotManifest = serde_json::from_str(json).unwrap();
        let files: Vec<_> = manifest.files().collect();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "/game/a.dat");
        assert_eq!(files[1].offset, 10);
    }
}
