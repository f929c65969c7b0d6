//! `list` command: inspect archived builds, chunks, blobs, and manifests,
//! or query the remote build listing for a product.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use console::style;

use crate::archive::{ArchiveOptions, Archiver};
use crate::cdn::{Endpoints, HttpFetcher};
use crate::download::BlobState;
use crate::index::BuildIndex;
use crate::paths::ArchiveLayout;
use crate::store::ContentStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListKind {
    Builds,
    Chunks,
    Blobs,
    Manifests,
}

#[derive(Debug)]
pub struct ListArgs {
    pub archive_root: PathBuf,
    pub kind: ListKind,
    pub detailed: bool,
    /// Query the content-system API instead of the local index. Requires
    /// `product`.
    pub remote: bool,
    pub product: Option<String>,
    pub platforms: Vec<String>,
}

pub fn list(args: ListArgs) -> Result<()> {
    let layout = ArchiveLayout::new(&args.archive_root);

    if args.remote {
        return list_remote(&args, layout);
    }

    match args.kind {
        ListKind::Builds => list_builds(&args, &layout),
        ListKind::Chunks => list_chunks(&args, &layout),
        ListKind::Blobs => list_blobs(&args, &layout),
        ListKind::Manifests => list_manifests(&args, &layout),
    }
}

fn list_builds(args: &ListArgs, layout: &ArchiveLayout) -> Result<()> {
    let index = BuildIndex::load(layout)?;
    let builds: Vec<_> = match &args.product {
        Some(product) => index.builds_for_product(product),
        None => index.builds().iter().collect(),
    };

    println!("{}", style(format!("{} archived build(s)", builds.len())).bold());
    for build in builds {
        if args.detailed {
            println!();
            println!(
                "  {} {}/{} [{}]",
                style(&build.build_id).bold(),
                build.product_id,
                build.platform,
                build.generation
            );
            println!("    version:    {}", ordash(&build.version_label));
            println!(
                "    repository: {}",
                ordash(build.repository_id.as_deref().unwrap_or(""))
            );
            println!("    hash:       {}", ordash(&build.build_hash));
            println!("    manifest:   {}", build.archive_path);
            if !build.tags.is_empty() {
                println!("    tags:       {}", build.tags.join(", "));
            }
        } else {
            println!(
                "  {}  {}  {}  {}  {}",
                build.product_id,
                build.build_id,
                build.platform,
                build.generation,
                ordash(&build.version_label)
            );
        }
    }
    Ok(())
}

fn list_chunks(args: &ListArgs, layout: &ArchiveLayout) -> Result<()> {
    let store = ContentStore::new(layout.clone());
    let stats = store.stats()?;
    println!(
        "{}",
        style(format!(
            "{} chunk(s), {} bytes",
            stats.chunk_count, stats.chunk_bytes
        ))
        .bold()
    );
    if args.detailed {
        let mut chunks = store.list_chunks();
        chunks.sort();
        for chunk in chunks {
            println!("  {chunk}");
        }
    }
    Ok(())
}

fn list_blobs(args: &ListArgs, layout: &ArchiveLayout) -> Result<()> {
    let store = ContentStore::new(layout.clone());
    let blobs = store.list_blobs();
    println!("{}", style(format!("{} blob(s)", blobs.len())).bold());
    for id in blobs {
        let size = store.blob_size(&id).unwrap_or(0);
        if args.detailed {
            let status = match BlobState::load(&layout.blob_sidecar_path(&id)) {
                Ok(state) if state.available => format!(
                    "complete, {}/{} blocks, md5 {}",
                    state.completed_chunks, state.total_chunks, state.overall_hashes.md5
                ),
                Ok(state) => format!(
                    "partial, {}/{} blocks",
                    state.completed_chunks, state.total_chunks
                ),
                Err(_) => "no sidecar".to_string(),
            };
            println!("  {id}/main.bin  {size} bytes  ({status})");
        } else {
            println!("  {id}/main.bin  {size} bytes");
        }
    }
    Ok(())
}

fn list_manifests(args: &ListArgs, layout: &ArchiveLayout) -> Result<()> {
    let store = ContentStore::new(layout.clone());
    let stats = store.stats()?;
    println!(
        "{}",
        style(format!("{} depot manifest file(s)", stats.manifest_count)).bold()
    );
    if args.detailed {
        for entry in walkdir::WalkDir::new(layout.manifests_dir())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy();
            if name.ends_with(".pretty.json") {
                continue;
            }
            println!("  {}", layout.relative(entry.path()).display());
        }
    }
    Ok(())
}

fn list_remote(args: &ListArgs, layout: ArchiveLayout) -> Result<()> {
    let Some(product) = &args.product else {
        bail!("--remote requires --product");
    };

    let mut options = ArchiveOptions::default();
    options.platforms = if args.platforms.is_empty() {
        // Discovery sweeps cover every platform by default.
        crate::archive::DEFAULT_PLATFORMS
            .iter()
            .map(|p| p.to_string())
            .collect()
    } else {
        args.platforms.clone()
    };

    let transport = HttpFetcher::new().context("building HTTP client")?;
    let archiver = Archiver::new(layout, Endpoints::default(), &transport, None, options)?;
    let builds = archiver.discover_builds(product, None)?;

    println!(
        "{}",
        style(format!("{} build(s) for product {product}", builds.len())).bold()
    );
    for build in builds {
        let generation = build
            .generation()
            .map(|g| g.to_string())
            .unwrap_or_else(|| "?".to_string());
        if args.detailed {
            println!();
            println!(
                "  {} [{}] {}",
                style(&build.build_id).bold(),
                generation,
                build.platform
            );
            println!("    version:   {}", ordash(&build.version_name));
            println!("    published: {}", ordash(build.date_published.as_deref().unwrap_or("")));
            println!("    branch:    {}", ordash(build.branch.as_deref().unwrap_or("")));
            println!("    link:      {}", build.link);
            if !build.tags.is_empty() {
                println!("    tags:      {}", build.tags.join(", "));
            }
        } else {
            println!(
                "  {}  {}  {}  {}",
                build.build_id,
                build.platform,
                generation,
                ordash(&build.version_name)
            );
        }
    }
    Ok(())
}

fn ordash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}
