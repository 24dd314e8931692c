use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use crate::prism::wrangle::{clean_files, tissue_summary};
use crate::state::AppState;

#[derive(Args)]
pub struct WrangleArgs {
    /// Output CSV (default: <data.processed>/processed_depmap_prism_ic50.csv)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print per-tissue cell line and combination counts
    #[arg(long)]
    summary: bool,
}

pub fn wrangle(config: Option<&Path>, args: WrangleArgs) -> Result<()> {
    let state = AppState::load(config, None)?;
    let paths = state.config.validate_data_paths()?;
    let output = args.output.unwrap_or_else(|| paths.processed_file());

    let (cleaned, report) = clean_files(&paths.dose_response, &paths.cell_line_info, &output)
        .with_context(|| {
            format!(
                "Failed to clean {} into {}",
                paths.dose_response.display(),
                output.display()
            )
        })?;

    println!(
        "input rows: {}\nafter QC: {}\nMTS010: {} -> {}\nHTS002: {} -> {}\noutput rows: {}",
        report.input_rows,
        report.after_qc,
        report.mts010_rows,
        report.mts010_kept,
        report.hts002_rows,
        report.hts002_kept,
        report.output_rows,
    );

    if args.summary {
        for (tissue, counts) in tissue_summary(&cleaned) {
            println!("{tissue}\t{} cell lines\t{} combos", counts.cell_lines, counts.combos);
        }
    }
    Ok(())
}
