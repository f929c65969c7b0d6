//! `extract` command: rebuild the original file tree from the archive.

use std::path::PathBuf;

use anyhow::{bail, Result};
use console::style;

use crate::extract::{resolve_out_dir, ExtractOptions, Extractor};
use crate::index::BuildIndex;
use crate::paths::ArchiveLayout;

#[derive(Debug)]
pub struct ExtractArgs {
    pub archive_root: PathBuf,
    pub out: PathBuf,
    pub product: String,
    pub build: String,
    pub platform: String,
    pub verify_checksums: bool,
}

pub fn extract(args: ExtractArgs) -> Result<()> {
    let layout = ArchiveLayout::new(&args.archive_root);
    let index = BuildIndex::load(&layout)?;
    let out_dir = resolve_out_dir(&args.out);

    let report = Extractor::new(layout).extract_build(
        &index,
        &args.product,
        &args.build,
        &args.platform,
        &out_dir,
        ExtractOptions {
            verify_checksums: args.verify_checksums,
        },
    )?;

    println!();
    println!("{}", style("Extraction Results:").bold().underlined());
    println!("  Files extracted: {}", report.files_extracted);
    println!("  Bytes written:   {}", report.bytes_written);
    println!("  Output:          {}", out_dir.display());

    if report.is_ok() {
        println!();
        println!(
            "{} {}",
            style("✓").green().bold(),
            style("Extraction complete.").green()
        );
        Ok(())
    } else {
        println!();
        println!("{}", style("Errors:").red().bold());
        for error in &report.errors {
            println!("  {} {}", style("✗").red(), error);
        }
        bail!("{} file(s) failed to extract", report.errors.len());
    }
}
