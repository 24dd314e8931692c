use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::prism::{ColumnMap, LookupOptions, PrismLookup};
use crate::tools::prism_tool::PRISM_IC50;
use crate::tools::pubchem::{PubChemClient, PUBCHEM_CACHE};
use crate::tools::{RateLimiter, ToolCache};

/// Loaded configuration and the cache root every tool cache lives under.
pub struct AppState {
    pub config: Config,
    pub cache_root: PathBuf,
}

/// The processed PRISM table loaded for one command.
pub struct Dataset {
    pub lookup: Arc<PrismLookup>,
    /// Content hash of the CSV plus the matching mode; tags cached lookups.
    pub fingerprint: String,
}

/// blake3 over the file bytes, suffixed with the key matching mode.
pub fn dataset_fingerprint(path: &Path, casefold: bool) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let hash = blake3::hash(&bytes).to_hex().to_string();
    let mode = if casefold { "casefold" } else { "exact" };
    Ok(format!("{}-{mode}", &hash[..16]))
}

impl AppState {
    /// Load `path`, or discover `config.yml` from the working directory.
    pub fn load(path: Option<&Path>, cache_dir: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Config::discover(&std::env::current_dir()?)?,
        };
        let config = Config::load(&config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?;
        let cache_root = config.cache_root(cache_dir);
        info!(path = %config_path.display(), cache = %cache_root.display(), "config loaded");
        Ok(Self { config, cache_root })
    }

    /// Cleaned PRISM table, from `data` or the configured processed file.
    pub fn dataset(&self, data: Option<&Path>, casefold: bool) -> Result<Dataset> {
        let path = data
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.processed_file());
        if !path.is_file() {
            anyhow::bail!(
                "processed dataset not found at {}; run `prism-agent wrangle` first",
                path.display()
            );
        }
        let options = LookupOptions {
            casefold,
            validate_unique: true,
        };
        let lookup = PrismLookup::from_csv(&path, &ColumnMap::default(), options)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        let fingerprint = dataset_fingerprint(&path, casefold)?;
        info!(records = lookup.len(), path = %path.display(), %fingerprint, "PRISM lookup ready");
        Ok(Dataset {
            lookup: Arc::new(lookup),
            fingerprint,
        })
    }

    /// Disk cache for one tool under the resolved cache root.
    pub fn tool_cache(&self, name: &str, tag: Option<String>, offline: bool) -> Result<Arc<ToolCache>> {
        let mut settings = self.config.cache_settings(name);
        settings.tag = tag;
        settings.offline_only = offline;
        let cache = ToolCache::on_disk(settings, &self.cache_root)
            .with_context(|| format!("Failed to open cache under {}", self.cache_root.display()))?;
        Ok(Arc::new(cache))
    }

    /// Per-run cache that never touches disk.
    pub fn memory_cache(&self, name: &str) -> Arc<ToolCache> {
        Arc::new(ToolCache::in_memory(self.config.cache_settings(name)))
    }

    /// `prism_ic50` results are only valid for the table they were read from.
    pub fn prism_cache(&self, dataset: &Dataset, offline: bool) -> Result<Arc<ToolCache>> {
        self.tool_cache(PRISM_IC50, Some(dataset.fingerprint.clone()), offline)
    }

    /// Shared PubChem client, cache and limiter for every PubChem tool.
    pub fn pubchem(&self, offline: bool) -> Result<(Arc<PubChemClient>, Arc<ToolCache>, Arc<RateLimiter>)> {
        let section = &self.config.pubchem;
        let client = PubChemClient::new(&section.base_url, section.fetch_limit(), Duration::from_secs(1))?;
        let limiter = RateLimiter::new(PUBCHEM_CACHE, section.max_requests, section.window()?)?;
        let cache = self.tool_cache(PUBCHEM_CACHE, None, offline)?;
        Ok((Arc::new(client), cache, Arc::new(limiter)))
    }
}
