use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use crate::config::CacheSection;
use crate::state::AppState;
use crate::tools::prism_tool::PRISM_IC50;
use crate::tools::ToolCache;

#[derive(Args)]
pub struct CacheStatsArgs {
    /// Cache name (one directory per tool)
    #[arg(long, default_value = PRISM_IC50)]
    name: String,
}

pub async fn cache_stats(config: Option<&Path>, cache_dir: Option<&Path>, args: CacheStatsArgs) -> Result<()> {
    // a config file is optional here; the environment and defaults still apply
    let (settings, root) = match AppState::load(config, cache_dir) {
        Ok(state) => (state.config.cache_settings(&args.name), state.cache_root),
        Err(err) => {
            debug!(%err, "no usable config, resolving cache from environment");
            let section = CacheSection::default();
            (section.settings(&args.name), section.root(Path::new(""), cache_dir))
        }
    };
    let cache = ToolCache::on_disk(settings, &root)
        .with_context(|| format!("Failed to open cache under {}", root.display()))?;

    let stats = cache.stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
