//! galaxy-mirror - content-addressable mirror and extractor for the Galaxy
//! content-system CDN.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use galaxy_mirror::commands::{self, DownloadArgs, ExtractArgs, ListArgs, ListKind, ValidateArgs};
use galaxy_mirror::paths::Generation;

#[derive(Parser)]
#[command(name = "galaxy-mirror")]
#[command(about = "Content-addressable mirror and extractor for the Galaxy content-system CDN")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive a build or repository: manifests, chunks, and blobs
    Download {
        /// Archive root directory
        #[arg(long)]
        archive_root: PathBuf,

        /// Product id
        #[arg(long)]
        product: String,

        /// Build id to archive
        #[arg(long, conflicts_with = "repository")]
        build: Option<String>,

        /// Repository id to archive (legacy addressing)
        #[arg(long)]
        repository: Option<String>,

        /// Force generation-1 API
        #[arg(long, conflicts_with = "v2")]
        v1: bool,

        /// Force generation-2 API
        #[arg(long)]
        v2: bool,

        /// Platforms to archive (comma separated)
        #[arg(long, value_delimiter = ',')]
        platforms: Vec<String>,

        /// Stop after caching build and depot manifests
        #[arg(long)]
        manifests_only: bool,

        /// Analyze what would be downloaded without fetching content
        #[arg(long)]
        dry_run: bool,

        /// Verify all chunks of a repository and re-download the missing or
        /// corrupted subset (requires --repository)
        #[arg(long, requires = "repository")]
        repair: bool,

        /// Worker threads for chunk downloads (default: CPU count)
        #[arg(long)]
        max_workers: Option<usize>,

        /// Also fetch offline-depot manifests and content; these frequently
        /// 404 on the CDN
        #[arg(long)]
        include_offline_depots: bool,

        /// Unsigned CDN base URL for content downloads
        #[arg(long)]
        cdn_base: Option<String>,

        /// JSON file with secure-link endpoint records
        #[arg(long)]
        secure_link_config: Option<PathBuf>,
    },

    /// Verify archive integrity (chunk hashes, blob offsets); reports only
    Validate {
        /// Archive root directory
        #[arg(long)]
        archive_root: PathBuf,

        /// Limit to one product
        #[arg(long)]
        product: Option<String>,

        /// Limit to one build
        #[arg(long)]
        build: Option<String>,
    },

    /// List archived builds, chunks, blobs, or manifests
    List {
        /// Archive root directory
        #[arg(long)]
        archive_root: PathBuf,

        /// List archived builds (default)
        #[arg(long)]
        builds: bool,

        /// List stored chunks
        #[arg(long, conflicts_with_all = ["builds", "blobs", "manifests"])]
        chunks: bool,

        /// List stored blobs
        #[arg(long, conflicts_with_all = ["builds", "manifests"])]
        blobs: bool,

        /// List stored depot manifests
        #[arg(long, conflicts_with = "builds")]
        manifests: bool,

        /// Show per-entry detail
        #[arg(long)]
        detailed: bool,

        /// Query the content-system API for available builds instead of the
        /// local index (requires --product)
        #[arg(long)]
        remote: bool,

        /// Product id filter
        #[arg(long)]
        product: Option<String>,

        /// Platforms for --remote (comma separated)
        #[arg(long, value_delimiter = ',')]
        platforms: Vec<String>,
    },

    /// Reconstruct a build's original file tree from the archive
    Extract {
        /// Archive root directory
        #[arg(long)]
        archive_root: PathBuf,

        /// Output directory
        #[arg(long)]
        out: PathBuf,

        /// Product id
        #[arg(long)]
        product: String,

        /// Build id
        #[arg(long)]
        build: String,

        /// Platform
        #[arg(long, default_value = "windows")]
        platform: String,

        /// Verify chunk and file hashes while extracting
        #[arg(long)]
        verify_checksums: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Download {
            archive_root,
            product,
            build,
            repository,
            v1,
            v2,
            platforms,
            manifests_only,
            dry_run,
            repair,
            max_workers,
            include_offline_depots,
            cdn_base,
            secure_link_config,
        } => {
            let generation = match (v1, v2) {
                (true, _) => Some(Generation::V1),
                (_, true) => Some(Generation::V2),
                _ => None,
            };
            commands::download(DownloadArgs {
                archive_root,
                product,
                build,
                repository,
                generation,
                platforms,
                manifests_only,
                dry_run,
                repair,
                max_workers,
                include_offline_depots,
                cdn_base,
                secure_link_config,
            })
        }
        Commands::Validate {
            archive_root,
            product,
            build,
        } => commands::validate(ValidateArgs {
            archive_root,
            product,
            build,
        }),
        Commands::List {
            archive_root,
            builds: _,
            chunks,
            blobs,
            manifests,
            detailed,
            remote,
            product,
            platforms,
        } => {
            let kind = if chunks {
                ListKind::Chunks
            } else if blobs {
                ListKind::Blobs
            } else if manifests {
                ListKind::Manifests
            } else {
                ListKind::Builds
            };
            commands::list(ListArgs {
                archive_root,
                kind,
                detailed,
                remote,
                product,
                platforms,
            })
        }
        Commands::Extract {
            archive_root,
            out,
            product,
            build,
            platform,
            verify_checksums,
        } => commands::extract(ExtractArgs {
            archive_root,
            out,
            product,
            build,
            platform,
            verify_checksums,
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
