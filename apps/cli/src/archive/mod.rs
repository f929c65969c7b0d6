//! Archiver orchestrator: walks the build → depot → content graph and drives
//! discovery, manifest caching, content download, and the build index.
//!
//! Presence questions are always answered by the filesystem (through the
//! store and the manifest cache); the index only records builds. Content
//! downloads are deduplicated structurally: gen-2 chunk ids are unioned
//! across depots before download, and gen-1 blob URLs are unioned so a blob
//! shared by several depots is fetched exactly once.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cdn::{CdnError, Endpoints, LinkMinter, Transport};
use crate::download::{BlobDownloader, ChunkDownloader, DownloadError};
use crate::index::{BuildIndex, BuildRecord, IndexError};
use crate::manifest::{ManifestCache, ManifestError};
use crate::paths::{classify_url, repository_id_from_url, ArchiveLayout, Generation};
use crate::store::{ContentStatus, ContentStore};

pub const DEFAULT_PLATFORMS: &[&str] = &["windows", "osx", "linux"];

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Cdn(#[from] CdnError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Build {build_id} not found for product {product_id}")]
    BuildNotFound { product_id: String, build_id: String },

    #[error("Repository {repository_id} not found for product {product_id}")]
    RepositoryNotFound {
        product_id: String,
        repository_id: String,
    },

    #[error("{0}")]
    Config(String),
}

/// Knobs shared by every archival walk.
#[derive(Clone, Debug)]
pub struct ArchiveOptions {
    pub platforms: Vec<String>,
    pub workers: usize,
    /// Stop after caching build and depot manifests.
    pub manifests_only: bool,
    /// Analyze and report only; fetch nothing beyond the build manifest.
    pub dry_run: bool,
    /// Offline-depot manifests 404 frequently on the CDN and are skipped by
    /// default; enabling this may surface NotFound errors.
    pub include_offline_depots: bool,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            platforms: vec!["windows".to_string()],
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            manifests_only: false,
            dry_run: false,
            include_offline_depots: false,
        }
    }
}

/// Aggregated outcome of one archival walk.
#[derive(Debug, Default)]
pub struct ArchiveReport {
    pub builds_archived: usize,
    pub depot_manifests_fetched: usize,
    pub depot_manifests_cached: usize,
    pub chunks_downloaded: usize,
    pub chunks_already_valid: usize,
    pub blobs_downloaded: usize,
    pub blobs_skipped: usize,
    pub errors: Vec<String>,
}

impl ArchiveReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Chunk verify-and-repair outcome.
#[derive(Debug, Default)]
pub struct ChunkRepairReport {
    pub total_chunks: usize,
    pub ok: usize,
    pub missing: usize,
    pub corrupted: usize,
    pub downloaded: usize,
    pub errors: Vec<String>,
}

/// One build as listed by the content-system API.
#[derive(Clone, Debug, Deserialize)]
pub struct DiscoveredBuild {
    #[serde(deserialize_with = "string_or_number")]
    pub build_id: String,
    pub link: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub legacy: bool,
    #[serde(default)]
    pub date_published: Option<String>,
    #[serde(default)]
    pub version_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub legacy_build_id: Option<String>,
    #[serde(default = "default_true")]
    pub public: bool,
    /// Filled in during discovery, not part of the wire format.
    #[serde(skip)]
    pub platform: String,
}

impl DiscoveredBuild {
    /// Generation of the linked manifest, derived from the URL pattern
    /// rather than from the query that returned it.
    pub fn generation(&self) -> Option<Generation> {
        classify_url(&self.link)
    }
}

#[derive(Debug, Deserialize)]
struct BuildsResponse {
    #[serde(default)]
    items: Vec<DiscoveredBuild>,
}

pub struct Archiver<'a> {
    layout: ArchiveLayout,
    store: ContentStore,
    cache: ManifestCache,
    endpoints: Endpoints,
    transport: &'a dyn Transport,
    minter: Option<&'a dyn LinkMinter>,
    index: BuildIndex,
    options: ArchiveOptions,
}

impl<'a> Archiver<'a> {
    pub fn new(
        layout: ArchiveLayout,
        endpoints: Endpoints,
        transport: &'a dyn Transport,
        minter: Option<&'a dyn LinkMinter>,
        options: ArchiveOptions,
    ) -> Result<Self, ArchiveError> {
        let index = BuildIndex::load(&layout)?;
        Ok(Self {
            store: ContentStore::new(layout.clone()),
            cache: ManifestCache::new(layout.clone()),
            layout,
            endpoints,
            transport,
            minter,
            index,
            options,
        })
    }

    pub fn index(&self) -> &BuildIndex {
        &self.index
    }

    // ========== Discovery ==========

    /// List builds for a product across the requested platforms, merging
    /// both API generations. When a build id appears in both, the gen-1
    /// entry wins: its repository manifest carries strictly more detail.
    pub fn discover_builds(
        &self,
        product_id: &str,
        generation: Option<Generation>,
    ) -> Result<Vec<DiscoveredBuild>, ArchiveError> {
        let generations: &[Generation] = match generation {
            Some(Generation::V1) => &[Generation::V1],
            Some(Generation::V2) => &[Generation::V2],
            None => &[Generation::V1, Generation::V2],
        };

        let mut all = Vec::new();
        let platforms = self.options.platforms.clone();
        for platform in &platforms {
            let mut by_id: BTreeMap<String, DiscoveredBuild> = BTreeMap::new();
            for gen in generations {
                let url = self.endpoints.builds_url(product_id, platform, *gen);
                let raw = match self.transport.get(&url) {
                    Ok(raw) => raw,
                    Err(err) if err.is_not_found() => {
                        debug!(%url, "no build listing");
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                };
                let response: BuildsResponse = serde_json::from_slice(&raw)
                    .map_err(|e| ManifestError::Json(e))?;

                for mut build in response.items {
                    build.platform = platform.clone();
                    let is_v1 = build.generation() == Some(Generation::V1);
                    match by_id.get(&build.build_id) {
                        None => {
                            by_id.insert(build.build_id.clone(), build);
                        }
                        Some(_) if is_v1 => {
                            by_id.insert(build.build_id.clone(), build);
                        }
                        Some(_) => {}
                    }
                }
            }
            let mut builds: Vec<_> = by_id.into_values().collect();
            builds.sort_by(|a, b| b.date_published.cmp(&a.date_published));
            all.extend(builds);
        }
        Ok(all)
    }

    // ========== Entry points ==========

    /// Archive one build: find its source URL across both generations,
    /// record the build manifest, then walk depots and content.
    pub fn archive_build(&mut self, product_id: &str, build_id: &str) -> ArchiveReport {
        let mut report = ArchiveReport::default();
        let platforms = self.options.platforms.clone();

        for platform in &platforms {
            match self.archive_build_on_platform(product_id, build_id, platform, &mut report) {
                Ok(()) => {}
                Err(ArchiveError::BuildNotFound { .. }) => {
                    debug!(product_id, build_id, %platform, "build not on this platform");
                }
                Err(err) => report
                    .errors
                    .push(format!("{product_id}/{build_id}/{platform}: {err}")),
            }
        }

        if report.builds_archived == 0 && report.errors.is_empty() {
            report
                .errors
                .push(format!("build {build_id} not found for product {product_id}"));
        }
        self.save_index(&mut report);
        report
    }

    /// Archive by repository id: the source URL is synthesized directly, no
    /// listing round trip. Platforms are probed until one answers.
    pub fn archive_repository(
        &mut self,
        product_id: &str,
        repository_id: &str,
        generation: Generation,
    ) -> ArchiveReport {
        let mut report = ArchiveReport::default();

        if let Some(existing) = self.index.find_by_repository(product_id, repository_id) {
            info!(
                "repository {repository_id} already recorded for platform {}",
                existing.platform
            );
            let record = existing.clone();
            report.builds_archived += 1;
            self.archive_content(&record, &mut report);
            self.save_index(&mut report);
            return report;
        }

        let platforms = self.options.platforms.clone();
        for platform in &platforms {
            let url =
                self.endpoints
                    .repository_url(product_id, platform, repository_id, generation);
            match self.ingest_build_manifest(
                product_id,
                platform,
                &url,
                None,
                Some(repository_id.to_string()),
            ) {
                Ok(record) => {
                    report.builds_archived += 1;
                    self.archive_content(&record, &mut report);
                    self.save_index(&mut report);
                    return report;
                }
                Err(ArchiveError::Cdn(err)) if err.is_not_found() => {
                    debug!(%platform, "repository not on this platform");
                }
                Err(err) => report
                    .errors
                    .push(format!("{product_id}/{repository_id}/{platform}: {err}")),
            }
        }

        if report.errors.is_empty() {
            report.errors.push(
                ArchiveError::RepositoryNotFound {
                    product_id: product_id.to_string(),
                    repository_id: repository_id.to_string(),
                }
                .to_string(),
            );
        }
        report
    }

    /// Scan every gen-2 depot manifest of a repository, classify all
    /// referenced chunks against the store, and re-download the missing and
    /// corrupted subset.
    pub fn verify_repository_chunks(
        &mut self,
        product_id: &str,
        repository_id: &str,
        generation: Generation,
    ) -> ChunkRepairReport {
        let mut report = ChunkRepairReport::default();

        // Manifests must be in place before the scan; re-running this is
        // cheap because of the cache.
        let manifests_only = std::mem::replace(&mut self.options.manifests_only, true);
        let manifest_report = self.archive_repository(product_id, repository_id, generation);
        self.options.manifests_only = manifests_only;
        if !manifest_report.is_ok() {
            report.errors.extend(manifest_report.errors);
            return report;
        }

        let Some(record) = self
            .index
            .find_by_repository(product_id, repository_id)
            .cloned()
        else {
            report
                .errors
                .push(format!("repository {repository_id} missing from index"));
            return report;
        };

        let chunks = match self.collect_chunks(&record) {
            Ok(chunks) => chunks,
            Err(err) => {
                report.errors.push(err.to_string());
                return report;
            }
        };
        report.total_chunks = chunks.len();

        let mut to_repair = BTreeSet::new();
        for chunk_id in &chunks {
            match self.store.chunk_status(chunk_id) {
                ContentStatus::Ok => report.ok += 1,
                ContentStatus::Missing => {
                    report.missing += 1;
                    to_repair.insert(chunk_id.clone());
                }
                ContentStatus::Corrupted => {
                    report.corrupted += 1;
                    to_repair.insert(chunk_id.clone());
                }
            }
        }

        if to_repair.is_empty() {
            return report;
        }

        match self.mint_link("/", &record.product_id, Generation::V2) {
            Ok(link) => {
                let downloader =
                    ChunkDownloader::new(self.transport, &self.store, self.options.workers);
                let batch = downloader.download_batch(
                    &link,
                    &self.endpoints,
                    &record.product_id,
                    &to_repair,
                );
                report.downloaded = batch.downloaded;
                report.errors.extend(batch.errors);
            }
            Err(err) => report.errors.push(err.to_string()),
        }
        report
    }

    // ========== Build manifest ingestion ==========

    fn archive_build_on_platform(
        &mut self,
        product_id: &str,
        build_id: &str,
        platform: &str,
        report: &mut ArchiveReport,
    ) -> Result<(), ArchiveError> {
        // Reuse the recorded build when we have it; otherwise discover.
        let record = match self.index.get(product_id, build_id, platform) {
            Some(record) => record.clone(),
            None => {
                let discovered = self.find_build(product_id, build_id, platform)?;
                self.ingest_build_manifest(
                    product_id,
                    platform,
                    &discovered.link,
                    Some(&discovered),
                    None,
                )?
            }
        };

        report.builds_archived += 1;
        self.archive_content(&record, report);
        Ok(())
    }

    /// Cross-generation search for one build id, gen-1 first.
    fn find_build(
        &self,
        product_id: &str,
        build_id: &str,
        platform: &str,
    ) -> Result<DiscoveredBuild, ArchiveError> {
        for gen in [Generation::V1, Generation::V2] {
            let url = self.endpoints.builds_url(product_id, platform, gen);
            let raw = match self.transport.get(&url) {
                Ok(raw) => raw,
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err.into()),
            };
            let response: BuildsResponse =
                serde_json::from_slice(&raw).map_err(ManifestError::Json)?;
            if let Some(mut build) = response
                .items
                .into_iter()
                .find(|b| b.build_id == build_id)
            {
                build.platform = platform.to_string();
                return Ok(build);
            }
        }
        Err(ArchiveError::BuildNotFound {
            product_id: product_id.to_string(),
            build_id: build_id.to_string(),
        })
    }

    /// Fetch a build manifest, persist it, and upsert the index record.
    /// Rediscovery of an existing record only backfills metadata.
    fn ingest_build_manifest(
        &mut self,
        product_id: &str,
        platform: &str,
        source_url: &str,
        discovered: Option<&DiscoveredBuild>,
        known_repository_id: Option<String>,
    ) -> Result<BuildRecord, ArchiveError> {
        let (cached, raw) = self.cache.fetch_build_manifest(self.transport, source_url)?;

        let generation = classify_url(source_url)
            .or_else(|| peek_generation(&raw))
            .unwrap_or(Generation::V2);

        let mut build_id = discovered.map(|d| d.build_id.clone());
        let mut version_label = discovered.map(|d| d.version_name.clone()).unwrap_or_default();
        let mut tags = discovered.map(|d| d.tags.clone()).unwrap_or_default();

        // Repository mode learns the build id from the manifest body.
        if build_id.is_none() {
            if let Ok(decoded) = crate::manifest::decode_manifest_bytes(&raw) {
                if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&decoded) {
                    build_id = value
                        .get("buildId")
                        .or_else(|| value.get("build_id"))
                        .map(json_to_string);
                    if version_label.is_empty() {
                        version_label = value
                            .get("versionName")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                    }
                    if tags.is_empty() {
                        tags = value
                            .get("tags")
                            .and_then(|v| v.as_array())
                            .map(|a| {
                                a.iter()
                                    .filter_map(|t| t.as_str().map(str::to_string))
                                    .collect()
                            })
                            .unwrap_or_default();
                    }
                }
            }
        }
        let build_id = build_id
            .or_else(|| known_repository_id.clone())
            .ok_or_else(|| ArchiveError::Config(format!("no build id derivable from {source_url}")))?;

        let repository_id = known_repository_id
            .or_else(|| repository_id_from_url(source_url))
            .or_else(|| discovered.and_then(|d| d.legacy_build_id.clone()));

        let build_hash = hex::encode(Sha256::digest(&raw));
        let archive_path = self.layout.relative(&cached.path);

        if let Some(existing) = self.index.get_mut(product_id, &build_id, platform) {
            // Metadata backfill only; the record itself is immutable.
            if existing.version_label.is_empty() && !version_label.is_empty() {
                existing.version_label = version_label;
            }
            if existing.tags.is_empty() && !tags.is_empty() {
                existing.tags = tags;
            }
            if existing.repository_id.is_none() {
                existing.repository_id = repository_id;
            }
            return Ok(existing.clone());
        }

        let record = BuildRecord {
            product_id: product_id.to_string(),
            build_id,
            build_hash,
            platform: platform.to_string(),
            generation,
            archive_path: archive_path.to_string_lossy().into_owned(),
            source_url: source_url.to_string(),
            repository_id,
            version_label,
            tags,
        };
        info!(
            "archived build manifest {}/{}/{} ({})",
            record.product_id, record.build_id, record.platform, record.generation
        );
        self.index.upsert(record.clone());
        Ok(record)
    }

    // ========== Content walk ==========

    fn archive_content(&mut self, record: &BuildRecord, report: &mut ArchiveReport) {
        let result = match record.generation {
            Generation::V2 => self.archive_v2_content(record, report),
            Generation::V1 => self.archive_v1_content(record, report),
        };
        if let Err(err) = result {
            report.errors.push(format!(
                "{}/{}/{}: {err}",
                record.product_id, record.build_id, record.platform
            ));
        }
    }

    fn build_manifest_path(&self, record: &BuildRecord) -> std::path::PathBuf {
        self.layout.root().join(&record.archive_path)
    }

    fn archive_v2_content(
        &mut self,
        record: &BuildRecord,
        report: &mut ArchiveReport,
    ) -> Result<(), ArchiveError> {
        let manifest = self
            .cache
            .load_v2_build_manifest(&self.build_manifest_path(record))?;

        let mut depot_ids: Vec<String> =
            manifest.depots.iter().map(|d| d.manifest.clone()).collect();
        if let Some(offline) = &manifest.offline_depot {
            if self.options.include_offline_depots {
                depot_ids.push(offline.manifest.clone());
            } else {
                debug!(
                    manifest = %offline.manifest,
                    "skipping offline depot (enable with --include-offline-depots)"
                );
            }
        }

        if self.options.dry_run {
            self.analyze_v2(record, &depot_ids, report);
            return Ok(());
        }

        let mut chunk_ids = BTreeSet::new();
        for depot_id in &depot_ids {
            match self
                .cache
                .fetch_v2_depot_manifest(self.transport, &self.endpoints, depot_id)
            {
                Ok(cached) => {
                    if cached.fetched {
                        report.depot_manifests_fetched += 1;
                    } else {
                        report.depot_manifests_cached += 1;
                    }
                }
                Err(err) => {
                    report.errors.push(format!("depot {depot_id}: {err}"));
                    continue;
                }
            }
            if !self.options.manifests_only {
                match self.cache.load_v2_depot_manifest(depot_id) {
                    Ok(depot) => {
                        chunk_ids.extend(depot.chunks().map(|c| c.compressed_md5.clone()))
                    }
                    Err(err) => report.errors.push(format!("depot {depot_id}: {err}")),
                }
            }
        }

        if self.options.manifests_only || chunk_ids.is_empty() {
            return Ok(());
        }

        let link = self.mint_link("/", &record.product_id, Generation::V2)?;
        let downloader = ChunkDownloader::new(self.transport, &self.store, self.options.workers);
        let batch = downloader.download_batch(&link, &self.endpoints, &record.product_id, &chunk_ids);
        report.chunks_downloaded += batch.downloaded;
        report.chunks_already_valid += batch.already_valid;
        report.errors.extend(batch.errors);
        Ok(())
    }

    fn archive_v1_content(
        &mut self,
        record: &BuildRecord,
        report: &mut ArchiveReport,
    ) -> Result<(), ArchiveError> {
        let repository = self
            .cache
            .load_v1_repository(&self.build_manifest_path(record))?;
        let repository_id = record
            .repository_id
            .clone()
            .ok_or_else(|| ArchiveError::Config(format!(
                "build {} has no repository id",
                record.build_id
            )))?;

        let mut manifest_names: Vec<String> = repository
            .product
            .depots
            .iter()
            .filter_map(|d| d.manifest_name().map(str::to_string))
            .collect();
        if let Some(offline) = &repository.product.offline_depot {
            if let Some(name) = offline.manifest_name() {
                if self.options.include_offline_depots {
                    manifest_names.push(name.to_string());
                } else {
                    debug!(manifest = name, "skipping offline depot");
                }
            }
        }

        if self.options.dry_run {
            self.analyze_v1(record, &repository_id, &manifest_names, report);
            return Ok(());
        }

        let mut blob_urls = BTreeSet::new();
        for name in &manifest_names {
            match self.cache.fetch_v1_depot_manifest(
                self.transport,
                &self.endpoints,
                &record.product_id,
                &record.platform,
                &repository_id,
                name,
            ) {
                Ok(cached) => {
                    if cached.fetched {
                        report.depot_manifests_fetched += 1;
                    } else {
                        report.depot_manifests_cached += 1;
                    }
                }
                Err(err) => {
                    report.errors.push(format!("depot {name}: {err}"));
                    continue;
                }
            }
            if !self.options.manifests_only {
                match self.cache.load_v1_depot_manifest(
                    &record.product_id,
                    &record.platform,
                    &repository_id,
                    name,
                ) {
                    Ok(depot) => blob_urls.extend(
                        depot
                            .files()
                            .filter(|f| !f.url.is_empty())
                            .map(|f| f.url.clone()),
                    ),
                    Err(err) => report.errors.push(format!("depot {name}: {err}")),
                }
            }
        }

        if self.options.manifests_only || blob_urls.is_empty() {
            return Ok(());
        }

        // Depots overwhelmingly share one packed binary; download each
        // distinct URL exactly once.
        info!(
            "{} unique blob URL(s) across {} depot manifest(s)",
            blob_urls.len(),
            manifest_names.len()
        );
        for blob_url in blob_urls {
            if let Err(err) = self.download_blob(record, &repository_id, &blob_url, report) {
                report.errors.push(format!("blob {blob_url}: {err}"));
            }
        }
        Ok(())
    }

    fn download_blob(
        &mut self,
        record: &BuildRecord,
        repository_id: &str,
        blob_url: &str,
        report: &mut ArchiveReport,
    ) -> Result<(), ArchiveError> {
        let link = self.mint_link(
            &format!("/{}/{}/", record.platform, repository_id),
            &record.product_id,
            Generation::V1,
        )?;
        let url = link.url_for(
            &self
                .endpoints
                .v1_blob_path(&record.platform, repository_id),
        )?;

        let expected_size = self.transport.content_length(&url)?;
        let blob_path = self.layout.blob_path(repository_id);

        if let Some(actual) = self.store.blob_size(repository_id) {
            if expected_size > 0 && actual == expected_size {
                info!(
                    "blob {repository_id}/main.bin already complete ({actual} bytes), skipping"
                );
                report.blobs_skipped += 1;
                return Ok(());
            }
            warn!(
                "blob {repository_id}/main.bin size {actual} != server {expected_size}, resuming"
            );
        }

        debug!(%blob_url, "downloading blob as {}", blob_path.display());
        let downloader = BlobDownloader::new(self.transport);
        let outcome = downloader.download(
            &url,
            &blob_path,
            &self.layout.blob_sidecar_path(repository_id),
            &self.layout.blob_xml_path(repository_id),
            expected_size,
        )?;
        info!(
            "blob complete: {} blocks downloaded, {} reused",
            outcome.blocks_downloaded, outcome.blocks_reused
        );
        report.blobs_downloaded += 1;
        Ok(())
    }

    // ========== Dry-run analysis ==========

    fn analyze_v2(&self, record: &BuildRecord, depot_ids: &[String], report: &mut ArchiveReport) {
        println!(
            "Dry run: build {}/{} ({}), {} depot manifest(s)",
            record.product_id,
            record.build_id,
            record.generation,
            depot_ids.len()
        );
        for depot_id in depot_ids {
            match self.cache.load_v2_depot_manifest(depot_id) {
                Ok(depot) => {
                    let chunk_ids: BTreeSet<_> =
                        depot.chunks().map(|c| c.compressed_md5.clone()).collect();
                    let present = chunk_ids
                        .iter()
                        .filter(|id| self.store.contains_chunk(id))
                        .count();
                    report.chunks_already_valid += present;
                    println!(
                        "  depot {depot_id}: cached, {} files, {}/{} chunks present",
                        depot.files().count(),
                        present,
                        chunk_ids.len()
                    );
                }
                Err(_) => {
                    println!("  depot {depot_id}: not cached, would download manifest and chunks");
                }
            }
        }
    }

    fn analyze_v1(
        &self,
        record: &BuildRecord,
        repository_id: &str,
        manifest_names: &[String],
        _report: &mut ArchiveReport,
    ) {
        println!(
            "Dry run: repository {repository_id} of {}/{} ({} depot manifest(s))",
            record.product_id,
            record.build_id,
            manifest_names.len()
        );
        for name in manifest_names {
            let cached = self.store.contains_v1_depot_manifest(
                &record.product_id,
                &record.platform,
                repository_id,
                name,
            );
            println!(
                "  depot {name}: {}",
                if cached { "cached" } else { "would download" }
            );
        }
        match self.store.blob_size(repository_id) {
            Some(size) => println!("  blob main.bin: present ({size} bytes)"),
            None => println!("  blob main.bin: would download"),
        }
    }

    // ========== Helpers ==========

    fn collect_chunks(&self, record: &BuildRecord) -> Result<BTreeSet<String>, ArchiveError> {
        let mut chunks = BTreeSet::new();
        if record.generation != Generation::V2 {
            return Ok(chunks);
        }
        let manifest = self
            .cache
            .load_v2_build_manifest(&self.build_manifest_path(record))?;
        for depot in &manifest.depots {
            let depot_manifest = self.cache.load_v2_depot_manifest(&depot.manifest)?;
            chunks.extend(depot_manifest.chunks().map(|c| c.compressed_md5.clone()));
        }
        Ok(chunks)
    }

    fn mint_link(
        &self,
        path: &str,
        product_id: &str,
        generation: Generation,
    ) -> Result<crate::cdn::SecureLink, ArchiveError> {
        let minter = self.minter.ok_or_else(|| {
            ArchiveError::Config(
                "content download requires a secure-link source (--cdn-base or --secure-link-config)"
                    .to_string(),
            )
        })?;
        Ok(minter.secure_link(path, product_id, generation)?)
    }

    fn save_index(&mut self, report: &mut ArchiveReport) {
        if let Err(err) = self.index.save() {
            report.errors.push(format!("saving build index: {err}"));
        }
    }
}

fn default_true() -> bool {
    true
}

fn json_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build ids arrive as numbers or strings depending on API generation.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Peek at decoded manifest bytes for a `version` field when the URL shape
/// is ambiguous.
fn peek_generation(raw: &[u8]) -> Option<Generation> {
    let decoded = crate::manifest::decode_manifest_bytes(raw).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    value
        .get("version")
        .and_then(|v| v.as_u64())
        .and_then(|n| Generation::from_number(n as u8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovered_build_parsing() {
        // Numeric and string build ids both parse; legacy_build_id follows.
        let json = r#"{
            "items": [
                {"build_id": 54321, "link": "https://cdn.example.com/content-system/v2/meta/ab/cd/abcd", "legacy_build_id": 37794096},
                {"build_id": "54322", "link": "https://cdn.example.com/content-system/v1/manifests/1/windows/2/repository.json"}
            ]
        }"#;
        let response: BuildsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.items[0].build_id, "54321");
        assert_eq!(response.items[0].legacy_build_id.as_deref(), Some("37794096"));
        assert_eq!(response.items[0].generation(), Some(Generation::V2));
        assert_eq!(response.items[1].generation(), Some(Generation::V1));
        assert!(response.items[0].public);
    }

    #[test]
    fn test_peek_generation() {
        assert_eq!(
            peek_generation(br#"{"version": 1, "product": {}}"#),
            Some(Generation::V1)
        );
        assert_eq!(
            peek_generation(br#"{"version": 2, "depots": []}"#),
            Some(Generation::V2)
        );
        assert_eq!(peek_generation(b"not json"), None);
    }
}
