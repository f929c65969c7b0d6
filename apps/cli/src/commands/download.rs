//! `download` command: archive a build or repository into the mirror.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use console::style;

use crate::archive::{ArchiveOptions, ArchiveReport, Archiver};
use crate::cdn::secure_link::FileLinkMinter;
use crate::cdn::{Endpoints, HttpFetcher, LinkMinter, PlainBaseMinter};
use crate::paths::{ArchiveLayout, Generation};

#[derive(Debug)]
pub struct DownloadArgs {
    pub archive_root: PathBuf,
    pub product: String,
    pub build: Option<String>,
    pub repository: Option<String>,
    pub generation: Option<Generation>,
    pub platforms: Vec<String>,
    pub manifests_only: bool,
    pub dry_run: bool,
    pub repair: bool,
    pub max_workers: Option<usize>,
    pub include_offline_depots: bool,
    pub cdn_base: Option<String>,
    pub secure_link_config: Option<PathBuf>,
}

pub fn download(args: DownloadArgs) -> Result<()> {
    let minter = build_minter(&args)?;
    let needs_content = !args.manifests_only && !args.dry_run;
    if needs_content && minter.is_none() {
        bail!(
            "content download requires a secure-link source; \
             pass --cdn-base or --secure-link-config (or use --manifests-only)"
        );
    }

    let mut options = ArchiveOptions {
        manifests_only: args.manifests_only,
        dry_run: args.dry_run,
        include_offline_depots: args.include_offline_depots,
        ..Default::default()
    };
    if !args.platforms.is_empty() {
        options.platforms = args.platforms.clone();
    }
    if let Some(workers) = args.max_workers {
        options.workers = workers;
    }

    let transport = HttpFetcher::new().context("building HTTP client")?;
    let layout = ArchiveLayout::new(&args.archive_root);
    let mut archiver = Archiver::new(
        layout,
        Endpoints::default(),
        &transport,
        minter.as_deref(),
        options,
    )?;

    if args.repair {
        let Some(repository_id) = &args.repository else {
            bail!("--repair requires --repository");
        };
        let report = archiver.verify_repository_chunks(
            &args.product,
            repository_id,
            args.generation.unwrap_or(Generation::V2),
        );
        print_repair_report(&report);
        if !report.errors.is_empty() {
            bail!("{} error(s) during chunk repair", report.errors.len());
        }
        return Ok(());
    }

    let report = match (&args.build, &args.repository) {
        (Some(build_id), None) => archiver.archive_build(&args.product, build_id),
        (None, Some(repository_id)) => {
            archive_repository(&mut archiver, &args.product, repository_id, args.generation)
        }
        (Some(_), Some(_)) => bail!("--build and --repository are mutually exclusive"),
        (None, None) => bail!("one of --build or --repository is required"),
    };

    print_report(&report);
    if !report.is_ok() {
        bail!("{} error(s) during archival", report.errors.len());
    }
    Ok(())
}

/// Without an explicit generation, probe gen-1 first: when a repository id
/// exists in both APIs the gen-1 manifest is the richer one.
fn archive_repository(
    archiver: &mut Archiver,
    product: &str,
    repository_id: &str,
    generation: Option<Generation>,
) -> ArchiveReport {
    match generation {
        Some(gen) => archiver.archive_repository(product, repository_id, gen),
        None => {
            let report = archiver.archive_repository(product, repository_id, Generation::V1);
            if report.builds_archived > 0 {
                report
            } else {
                archiver.archive_repository(product, repository_id, Generation::V2)
            }
        }
    }
}

fn build_minter(args: &DownloadArgs) -> Result<Option<Box<dyn LinkMinter>>> {
    match (&args.cdn_base, &args.secure_link_config) {
        (Some(_), Some(_)) => bail!("--cdn-base and --secure-link-config are mutually exclusive"),
        (Some(base), None) => Ok(Some(Box::new(PlainBaseMinter::new(base.clone())))),
        (None, Some(path)) => Ok(Some(Box::new(
            FileLinkMinter::load(path).context("loading secure-link config")?,
        ))),
        (None, None) => Ok(None),
    }
}

fn print_repair_report(report: &crate::archive::ChunkRepairReport) {
    println!();
    println!("{}", style("Chunk Verification Results:").bold().underlined());
    println!("  Total chunks referenced: {}", report.total_chunks);
    println!("  Verified OK:             {}", report.ok);
    println!("  Missing:                 {}", report.missing);
    println!("  Corrupted:               {}", report.corrupted);
    println!("  Re-downloaded:           {}", report.downloaded);

    if report.errors.is_empty() {
        println!();
        println!(
            "{} {}",
            style("✓").green().bold(),
            style("All referenced chunks are valid.").green()
        );
    } else {
        println!();
        println!("{}", style("Errors:").red().bold());
        for error in &report.errors {
            println!("  {} {}", style("✗").red(), error);
        }
    }
}

fn print_report(report: &ArchiveReport) {
    println!();
    println!("{}", style("Archive Results:").bold().underlined());
    println!("  Builds archived:        {}", report.builds_archived);
    println!(
        "  Depot manifests:        {} fetched, {} already cached",
        report.depot_manifests_fetched, report.depot_manifests_cached
    );
    println!(
        "  Chunks:                 {} downloaded, {} already valid",
        report.chunks_downloaded, report.chunks_already_valid
    );
    println!(
        "  Blobs:                  {} downloaded, {} skipped",
        report.blobs_downloaded, report.blobs_skipped
    );

    if report.errors.is_empty() {
        println!();
        println!("{} {}", style("✓").green().bold(), style("Archive is consistent.").green());
    } else {
        println!();
        println!("{}", style("Errors:").red().bold());
        for error in &report.errors {
            println!("  {} {}", style("✗").red(), error);
        }
    }
}
