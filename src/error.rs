use thiserror::Error;

/// Errors raised by the dataset, dispatch, cache and agent layers.
#[derive(Debug, Error)]
pub enum PrismError {
    #[error("config error: {0}")]
    Config(String),

    #[error("column `{0}` not found in {1}")]
    MissingColumn(String, String),

    #[error("duplicate (drug, cell) keys found; first few: {0:?}")]
    DuplicateKeys(Vec<(String, String)>),

    #[error("found {} duplicate (cell line, drug) pairs after cleaning; first few: {:?}", .0.len(), .0.iter().take(5).collect::<Vec<_>>())]
    DuplicatePairs(Vec<(String, String)>),

    #[error("{} (drug, cell) keys are not in the lookup; first few: {:?}", .0.len(), .0.iter().take(5).collect::<Vec<_>>())]
    UnknownKeys(Vec<(String, String)>),

    #[error("no tool registered under `{0}`")]
    UnknownTool(String),

    #[error("invalid arguments for tool `{tool}`: {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// A remote tool's service failed or answered with an error.
    #[error("tool `{tool}` backend failed: {reason}")]
    Backend { tool: String, reason: String },

    #[error("cache miss in offline mode for key {key} (cache={dir})")]
    CacheMiss { key: String, dir: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("could not parse model output: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, PrismError>;
