mod cache_stats;
mod convert;
mod lookup;
mod run;
mod wrangle;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "prism-agent")]
#[command(about = "Lab-in-the-loop IC50 prediction sandbox over DepMap PRISM", long_about = None)]
pub struct Cli {
    /// Path to config.yml (default: nearest one above the working directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Tool cache root, overriding config and AGENTIC_CACHE_DIR
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Clean the raw PRISM screens into the processed IC50 table
    Wrangle(wrangle::WrangleArgs),
    /// Look up one (drug, cell line) pair through the cached tool path
    Lookup(lookup::LookupArgs),
    /// Run the agent over a queue of (drug, cell line) tasks
    Run(run::RunArgs),
    /// Show statistics for a tool cache
    CacheStats(cache_stats::CacheStatsArgs),
    /// Mirror a notebook tree as Python scripts
    ConvertNotebooks(convert::ConvertArgs),
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config.as_deref();
    let cache_dir = cli.cache_dir.as_deref();
    match cli.command {
        Command::Wrangle(args) => wrangle::wrangle(config, args),
        Command::Lookup(args) => lookup::lookup(config, cache_dir, args).await,
        Command::Run(args) => run::run(config, cache_dir, args).await,
        Command::CacheStats(args) => cache_stats::cache_stats(config, cache_dir, args).await,
        Command::ConvertNotebooks(args) => convert::convert(args),
    }
}
