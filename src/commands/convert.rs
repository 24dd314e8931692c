use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crate::notebooks::convert_tree;

#[derive(Args)]
pub struct ConvertArgs {
    /// Directory containing .ipynb notebooks
    #[arg(default_value = "analysis/notebooks")]
    src: PathBuf,

    /// Mirror directory for the generated scripts
    #[arg(default_value = "analysis/scripts")]
    dst: PathBuf,

    /// Regenerate scripts even when they are newer than their notebook
    #[arg(long)]
    force: bool,
}

pub fn convert(args: ConvertArgs) -> Result<()> {
    let report = convert_tree(&args.src, &args.dst, args.force)
        .with_context(|| format!("Failed to convert notebooks under {}", args.src.display()))?;
    for path in &report.converted {
        println!("wrote {}", path.display());
    }
    println!(
        "{} converted, {} up to date",
        report.converted.len(),
        report.skipped
    );
    Ok(())
}
