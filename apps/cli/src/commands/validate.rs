//! `validate` command: verify archive integrity bottom-up, reporting only.

use std::path::PathBuf;

use anyhow::{bail, Result};
use console::style;

use crate::index::BuildIndex;
use crate::paths::ArchiveLayout;
use crate::validate::Validator;

#[derive(Debug)]
pub struct ValidateArgs {
    pub archive_root: PathBuf,
    pub product: Option<String>,
    pub build: Option<String>,
}

pub fn validate(args: ValidateArgs) -> Result<()> {
    let layout = ArchiveLayout::new(&args.archive_root);
    let index = BuildIndex::load(&layout)?;

    println!("{}", style("Checking archive integrity...").bold());
    println!();

    let report = Validator::new(layout).validate(
        &index,
        args.product.as_deref(),
        args.build.as_deref(),
    );

    println!("{}", style("Integrity Check Results:").bold().underlined());
    println!();
    println!("  Builds checked:   {}", report.builds_checked);
    println!("    Passed:         {}", report.builds_passed);
    println!("    Failed:         {}", report.builds_failed);
    println!("  Chunks validated: {}", report.chunks_validated);
    println!("  Chunks failed:    {}", report.chunks_failed);
    println!("  Files validated:  {}", report.files_validated);
    println!("  Files failed:     {}", report.files_failed);
    println!("  Blobs validated:  {}", report.blobs_validated);
    println!("  Blobs failed:     {}", report.blobs_failed);
    println!();

    if !report.warnings.is_empty() {
        println!("{}", style("Warnings:").yellow().bold());
        for warning in &report.warnings {
            println!("  {} {}", style("⚠").yellow(), warning);
        }
        println!();
    }

    if report.is_ok() {
        println!(
            "{} {}",
            style("✓").green().bold(),
            style("Archive is healthy.").green()
        );
        Ok(())
    } else {
        println!("{}", style("Errors:").red().bold());
        for error in &report.errors {
            println!("  {} {}", style("✗").red(), error);
        }
        println!();
        bail!("{} integrity failure(s) found", report.errors.len());
    }
}
