//! Persistent record of archived builds.
//!
//! The index is the only state worth serializing: chunk, blob, and manifest
//! presence is always re-derived from the filesystem. One JSON document at
//! `metadata/archive_database.json`, written atomically and only at coarse
//! phase boundaries.
//!
//! Loading accepts the key names used by earlier versions of the archive
//! database (`game_id`, `version`, `cdn_url`, `version_name`,
//! `manifest_hash`) so legacy archives keep working.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths::{ArchiveLayout, Generation};
use crate::store::atomic_write;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid index JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One archived build. Keyed by `(product_id, build_id, platform)`;
/// immutable after creation except for metadata backfill.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildRecord {
    #[serde(alias = "game_id")]
    pub product_id: String,
    pub build_id: String,
    #[serde(alias = "manifest_hash", default)]
    pub build_hash: String,
    pub platform: String,
    #[serde(alias = "version", with = "generation_number")]
    pub generation: Generation,
    #[serde(default)]
    pub archive_path: String,
    #[serde(alias = "cdn_url", default)]
    pub source_url: String,
    #[serde(default)]
    pub repository_id: Option<String>,
    #[serde(alias = "version_name", default)]
    pub version_label: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl BuildRecord {
    pub fn key(&self) -> (String, String, String) {
        (
            self.product_id.clone(),
            self.build_id.clone(),
            self.platform.clone(),
        )
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexDocument {
    #[serde(default)]
    builds: Vec<BuildRecord>,
    #[serde(default)]
    last_updated: f64,
}

/// In-memory handle on the archive database.
pub struct BuildIndex {
    path: PathBuf,
    builds: Vec<BuildRecord>,
}

impl BuildIndex {
    /// Load the index for an archive root. A missing database file is an
    /// empty index, not an error.
    pub fn load(layout: &ArchiveLayout) -> Result<Self, IndexError> {
        let path = layout.database_path();
        let builds = if path.exists() {
            let raw = std::fs::read(&path)?;
            let doc: IndexDocument = serde_json::from_slice(&raw)?;
            doc.builds
        } else {
            Vec::new()
        };
        Ok(Self { path, builds })
    }

    pub fn save(&self) -> Result<(), IndexError> {
        let doc = IndexDocument {
            builds: self.builds.clone(),
            last_updated: chrono::Utc::now().timestamp() as f64,
        };
        let json = serde_json::to_vec_pretty(&doc)?;
        atomic_write(&self.path, &json)?;
        Ok(())
    }

    pub fn builds(&self) -> &[BuildRecord] {
        &self.builds
    }

    pub fn len(&self) -> usize {
        self.builds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }

    pub fn get(&self, product_id: &str, build_id: &str, platform: &str) -> Option<&BuildRecord> {
        self.builds.iter().find(|b| {
            b.product_id == product_id && b.build_id == build_id && b.platform == platform
        })
    }

    pub fn get_mut(
        &mut self,
        product_id: &str,
        build_id: &str,
        platform: &str,
    ) -> Option<&mut BuildRecord> {
        self.builds.iter_mut().find(|b| {
            b.product_id == product_id && b.build_id == build_id && b.platform == platform
        })
    }

    /// All records for a product, any platform.
    pub fn builds_for_product(&self, product_id: &str) -> Vec<&BuildRecord> {
        self.builds
            .iter()
            .filter(|b| b.product_id == product_id)
            .collect()
    }

    /// Record for a repository id, any platform (repository ids are already
    /// platform-specific).
    pub fn find_by_repository(&self, product_id: &str, repository_id: &str) -> Option<&BuildRecord> {
        self.builds.iter().find(|b| {
            b.product_id == product_id && b.repository_id.as_deref() == Some(repository_id)
        })
    }

    /// Insert or replace the record with the same key. Returns true when a
    /// new record was added.
    pub fn upsert(&mut self, record: BuildRecord) -> bool {
        if let Some(existing) = self.get_mut(&record.product_id, &record.build_id, &record.platform)
        {
            *existing = record;
            false
        } else {
            self.builds.push(record);
            true
        }
    }
}

/// Generations travel as the numbers 1 and 2 in the database document.
mod generation_number {
    use super::Generation;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Generation, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(value.as_number())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Generation, D::Error> {
        let n = u8::deserialize(deserializer)?;
        Generation::from_number(n)
            .ok_or_else(|| D::Error::custom(format!("unknown generation: {n}")))
    }
}
