use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use serde_json::json;
use tracing::info;

use crate::state::AppState;
use crate::tools::prism_tool::PRISM_IC50;
use crate::tools::{PrismIc50Tool, TaskDispatcher, ToolCall};

#[derive(Args)]
pub struct LookupArgs {
    /// Drug name as it appears in the `name` column
    drug: String,

    /// CCLE cell line name
    cell_line: String,

    /// Processed PRISM CSV (default: from config)
    #[arg(long)]
    data: Option<PathBuf>,

    /// Match drug and cell line case-insensitively
    #[arg(long)]
    casefold: bool,

    /// Fail on a cache miss instead of reading the table
    #[arg(long)]
    offline: bool,

    /// Bypass the tool cache
    #[arg(long, conflicts_with = "offline")]
    no_cache: bool,
}

pub async fn lookup(config: Option<&Path>, cache_dir: Option<&Path>, args: LookupArgs) -> Result<()> {
    let state = AppState::load(config, cache_dir)?;
    let dataset = state.dataset(args.data.as_deref(), args.casefold)?;
    let tool = Arc::new(PrismIc50Tool::new(dataset.lookup.clone()));

    let mut dispatcher = TaskDispatcher::new();
    if args.no_cache {
        dispatcher.register(tool);
    } else {
        dispatcher.register_cached(tool, state.prism_cache(&dataset, args.offline)?);
    }

    let call = ToolCall::new(
        PRISM_IC50,
        json!({"drug": args.drug, "cell_line": args.cell_line}),
    );
    let payload = dispatcher.dispatch(&call).await?;
    info!(drug = %args.drug, cell_line = %args.cell_line, "lookup served");
    println!("{payload}");
    Ok(())
}
