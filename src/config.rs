use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{PrismError, Result};
use crate::tools::CacheSettings;

pub const CONFIG_FILE: &str = "config.yml";
pub const PROCESSED_FILE: &str = "processed_depmap_prism_ic50.csv";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-5-nano";
const DEFAULT_PUBCHEM_URL: &str = "https://pubchem.ncbi.nlm.nih.gov/rest/pug";
const DEFAULT_FETCH_LIMIT: usize = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// Directory holding the raw PRISM release.
    pub depmap_prism: PathBuf,
    /// Relative to `depmap_prism`.
    pub cell_line_info: PathBuf,
    /// Relative to `depmap_prism`.
    pub dose_response: PathBuf,
    #[serde(default = "default_processed")]
    pub processed: PathBuf,
}

fn default_processed() -> PathBuf {
    PathBuf::from("data/processed")
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiEntry {
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LmSection {
    /// Name of the `api` entry holding the key.
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheSection {
    pub root: Option<PathBuf>,
    pub size_limit_bytes: Option<u64>,
    pub expire_secs: Option<u64>,
    pub version: Option<String>,
}

/// PubChem PUG REST endpoint and the request budget it is queried under.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PubChemSection {
    pub base_url: String,
    pub max_requests: usize,
    pub window_secs: f64,
    /// Upper bound on CIDs returned by a name search.
    pub fetch_limit: Option<usize>,
}

impl Default for PubChemSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PUBCHEM_URL.to_string(),
            max_requests: 5,
            window_secs: 1.0,
            fetch_limit: None,
        }
    }
}

impl PubChemSection {
    pub fn window(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.window_secs).map_err(|_| {
            PrismError::Config(format!(
                "pubchem.window_secs must be a positive number, got {}",
                self.window_secs
            ))
        })
    }

    /// Config file, then `AGENTIC_TOOL_FETCH_LIMIT`, then 5. Zero is ignored.
    pub fn fetch_limit(&self) -> usize {
        self.fetch_limit_with(env_var)
    }

    fn fetch_limit_with(&self, env: impl Fn(&str) -> Option<String>) -> usize {
        self.fetch_limit
            .or_else(|| env("AGENTIC_TOOL_FETCH_LIMIT").and_then(|v| v.trim().parse().ok()))
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_FETCH_LIMIT)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub data: DataConfig,
    #[serde(default)]
    pub api: BTreeMap<String, ApiEntry>,
    #[serde(default)]
    pub lm: LmSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub pubchem: PubChemSection,
    /// Directory of the loaded file; relative paths resolve against it.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Settings for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct LmConfig {
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub seed: Option<u64>,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            temperature: 1.0,
            max_tokens: 20_000,
            seed: Some(42),
        }
    }
}

/// Resolved, existing input paths for wrangling.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub depmap_prism: PathBuf,
    pub cell_line_info: PathBuf,
    pub dose_response: PathBuf,
    pub processed_dir: PathBuf,
}

impl DataPaths {
    pub fn processed_file(&self) -> PathBuf {
        self.processed_dir.join(PROCESSED_FILE)
    }
}

fn env_var(name: &str) -> Option<String> {
    dotenv::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PrismError::Config(format!(
                "config file not found at {}",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&text)?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Find `config.yml` in `start` or the nearest ancestor.
    pub fn discover(start: &Path) -> Result<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                PrismError::Config(format!(
                    "no {CONFIG_FILE} in {} or any parent directory",
                    start.display()
                ))
            })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Resolve the data section and fail if any input is missing.
    pub fn validate_data_paths(&self) -> Result<DataPaths> {
        let base = self.resolve(&self.data.depmap_prism);
        let paths = DataPaths {
            cell_line_info: base.join(&self.data.cell_line_info),
            dose_response: base.join(&self.data.dose_response),
            processed_dir: self.resolve(&self.data.processed),
            depmap_prism: base,
        };

        let mut errors = Vec::new();
        if !paths.depmap_prism.is_dir() {
            errors.push(format!("directory missing: {}", paths.depmap_prism.display()));
        }
        for (key, path) in [
            ("cell_line_info", &paths.cell_line_info),
            ("dose_response", &paths.dose_response),
        ] {
            if !path.is_file() {
                errors.push(format!("file missing for `{key}`: {}", path.display()));
            }
        }
        if !errors.is_empty() {
            return Err(PrismError::Config(errors.join("; ")));
        }
        info!(dir = %paths.depmap_prism.display(), "data paths validated");
        Ok(paths)
    }

    /// Location of the cleaned dataset, whether or not it exists yet.
    pub fn processed_file(&self) -> PathBuf {
        self.resolve(&self.data.processed).join(PROCESSED_FILE)
    }

    pub fn api_key(&self, provider: &str) -> Result<&str> {
        let entry = self.api.get(provider).ok_or_else(|| {
            PrismError::Config(format!("missing `api.{provider}` section in {CONFIG_FILE}"))
        })?;
        entry
            .key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| PrismError::Config(format!("missing `key` for `{provider}` in {CONFIG_FILE}")))
    }

    pub fn lm_config(&self) -> Result<LmConfig> {
        self.lm_config_with(env_var)
    }

    /// Config file first, then environment, then defaults. A named provider
    /// without a key anywhere is an error.
    fn lm_config_with(&self, env: impl Fn(&str) -> Option<String>) -> Result<LmConfig> {
        let defaults = LmConfig::default();
        let lm = &self.lm;

        let api_key = match lm.provider.as_deref() {
            Some(provider) => match self.api_key(provider) {
                Ok(key) => Some(key.to_string()),
                Err(err) => Some(env("LLM_API_KEY").ok_or(err)?),
            },
            None => env("LLM_API_KEY"),
        };

        Ok(LmConfig {
            model: lm
                .model
                .clone()
                .or_else(|| env("LLM_MODEL"))
                .unwrap_or(defaults.model),
            base_url: lm
                .base_url
                .clone()
                .or_else(|| env("LLM_BASE_URL"))
                .unwrap_or(defaults.base_url),
            api_key,
            temperature: lm.temperature.unwrap_or(defaults.temperature),
            max_tokens: lm.max_tokens.unwrap_or(defaults.max_tokens),
            seed: lm.seed.or(defaults.seed),
        })
    }

    /// A relative `cache.root` resolves against the config file's directory.
    pub fn cache_root(&self, cli: Option<&Path>) -> PathBuf {
        self.cache.root(&self.base_dir, cli)
    }

    pub fn cache_settings(&self, name: &str) -> CacheSettings {
        self.cache.settings(name)
    }
}

impl CacheSection {
    pub fn root(&self, base: &Path, cli: Option<&Path>) -> PathBuf {
        self.root_with(base, cli, env_var)
    }

    pub fn settings(&self, name: &str) -> CacheSettings {
        self.settings_with(name, env_var)
    }

    /// CLI flag, config file (relative to `base`), `AGENTIC_CACHE_DIR`, then
    /// `~/.cache/agentic_tools`.
    pub fn root_with(
        &self,
        base: &Path,
        cli: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> PathBuf {
        if let Some(path) = cli {
            return path.to_path_buf();
        }
        if let Some(path) = &self.root {
            return base.join(path);
        }
        if let Some(path) = env("AGENTIC_CACHE_DIR") {
            return PathBuf::from(path);
        }
        default_cache_root()
    }

    pub fn settings_with(&self, name: &str, env: impl Fn(&str) -> Option<String>) -> CacheSettings {
        let parse_u64 = |var: &str| env(var).and_then(|v| v.trim().parse::<u64>().ok());
        let mut settings = CacheSettings::new(name);
        settings.size_limit_bytes = self
            .size_limit_bytes
            .or_else(|| parse_u64("AGENTIC_CACHE_SIZE_LIMIT_BYTES"));
        settings.expire_secs = self
            .expire_secs
            .or_else(|| parse_u64("AGENTIC_CACHE_EXPIRE_SECS"));
        if let Some(version) = &self.version {
            settings.version = version.clone();
        }
        settings
    }
}

pub fn default_cache_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cache")
        .join("agentic_tools")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const MINIMAL: &str = "\
data:
  depmap_prism: raw/prism
  cell_line_info: secondary-screen-cell-line-info.csv
  dose_response: secondary-screen-dose-response-curve-parameters.csv
";

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn validate_reports_missing_inputs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, MINIMAL).unwrap();

        let config = Config::load(&path).unwrap();
        let err = config.validate_data_paths().unwrap_err().to_string();
        assert!(err.contains("directory missing"));
        assert!(err.contains("dose_response"));

        let raw = dir.path().join("raw/prism");
        std::fs::create_dir_all(&raw).unwrap();
        std::fs::write(raw.join("secondary-screen-cell-line-info.csv"), "a\n").unwrap();
        std::fs::write(
            raw.join("secondary-screen-dose-response-curve-parameters.csv"),
            "a\n",
        )
        .unwrap();

        let paths = config.validate_data_paths().unwrap();
        assert_eq!(paths.depmap_prism, raw);
        assert_eq!(
            paths.processed_file(),
            dir.path().join("data/processed").join(PROCESSED_FILE)
        );
    }

    #[test]
    fn missing_file_fails_fast() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load(&dir.path().join(CONFIG_FILE)).is_err());
        assert!(Config::discover(dir.path()).is_err());
    }

    #[test]
    fn discover_walks_up() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), MINIMAL).unwrap();
        let nested = dir.path().join("analysis/scripts");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(
            Config::discover(&nested).unwrap(),
            dir.path().join(CONFIG_FILE)
        );
    }

    #[test]
    fn named_provider_requires_a_key() {
        let text = format!("{MINIMAL}lm:\n  provider: openai\napi:\n  openai: {{}}\n");
        let config = Config::parse(&text).unwrap();
        assert!(config.lm_config_with(env_of(&[])).is_err());

        let lm = config
            .lm_config_with(env_of(&[("LLM_API_KEY", "from-env")]))
            .unwrap();
        assert_eq!(lm.api_key.as_deref(), Some("from-env"));

        let text = format!("{MINIMAL}lm:\n  provider: openai\napi:\n  openai:\n    key: sk-test\n");
        let config = Config::parse(&text).unwrap();
        let lm = config
            .lm_config_with(env_of(&[("LLM_API_KEY", "from-env")]))
            .unwrap();
        assert_eq!(lm.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn lm_settings_prefer_file_over_env() {
        let text = format!("{MINIMAL}lm:\n  model: local-model\n  temperature: 0.2\n");
        let config = Config::parse(&text).unwrap();
        let lm = config
            .lm_config_with(env_of(&[
                ("LLM_MODEL", "env-model"),
                ("LLM_BASE_URL", "http://localhost:8000/v1"),
            ]))
            .unwrap();
        assert_eq!(lm.model, "local-model");
        assert_eq!(lm.base_url, "http://localhost:8000/v1");
        assert_eq!(lm.temperature, 0.2);
        assert_eq!(lm.max_tokens, 20_000);
        assert_eq!(lm.api_key, None);
    }

    #[test]
    fn cache_root_precedence() {
        let env = env_of(&[("AGENTIC_CACHE_DIR", "/env/cache")]);
        let base = Path::new("/project");
        let empty = CacheSection::default();
        assert_eq!(empty.root_with(base, None, &env), PathBuf::from("/env/cache"));
        assert_eq!(
            empty.root_with(base, Some(Path::new("/cli")), &env),
            PathBuf::from("/cli")
        );

        let configured = CacheSection {
            root: Some(PathBuf::from("/file")),
            ..Default::default()
        };
        assert_eq!(configured.root_with(base, None, &env), PathBuf::from("/file"));
        assert!(empty
            .root_with(base, None, env_of(&[]))
            .ends_with(".cache/agentic_tools"));
    }

    #[test]
    fn relative_cache_root_follows_config_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, format!("{MINIMAL}cache:\n  root: .cache/tools\n")).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.cache_root(None), dir.path().join(".cache/tools"));
        assert_eq!(
            config.cache_root(Some(Path::new("rel"))),
            PathBuf::from("rel")
        );
    }

    #[test]
    fn pubchem_section_defaults_and_overrides() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.pubchem.max_requests, 5);
        assert_eq!(config.pubchem.window().unwrap(), Duration::from_secs(1));
        assert_eq!(config.pubchem.fetch_limit_with(env_of(&[])), 5);
        assert_eq!(
            config
                .pubchem
                .fetch_limit_with(env_of(&[("AGENTIC_TOOL_FETCH_LIMIT", "3")])),
            3
        );

        let text = format!("{MINIMAL}pubchem:\n  base_url: http://localhost:9/pug\n  window_secs: -1\n  fetch_limit: 0\n");
        let config = Config::parse(&text).unwrap();
        assert_eq!(config.pubchem.base_url, "http://localhost:9/pug");
        assert!(config.pubchem.window().is_err());
        assert_eq!(config.pubchem.fetch_limit_with(env_of(&[])), 5);
    }

    #[test]
    fn cache_limits_from_env() {
        let env = env_of(&[
            ("AGENTIC_CACHE_SIZE_LIMIT_BYTES", "2000"),
            ("AGENTIC_CACHE_EXPIRE_SECS", "120"),
        ]);
        let settings = CacheSection::default().settings_with("prism", env);
        assert_eq!(settings.size_limit_bytes, Some(2000));
        assert_eq!(settings.expire_secs, Some(120));
        assert_eq!(settings.version, "1");
    }
}
