pub mod cache;
pub mod dispatch;
pub mod prism_tool;
pub mod pubchem;
pub mod rate_limiter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PrismError, Result};

pub use cache::{CacheSettings, ToolCache};
pub use dispatch::TaskDispatcher;
pub use prism_tool::{PrismIc50Tool, ScreenHistoryTool};
pub use pubchem::{PubChemPropertiesTool, SearchPubChemCidTool};
pub use rate_limiter::RateLimiter;

/// A structured request emitted by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default, alias = "args", alias = "parameters")]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// A backend the agent can call through the [`TaskDispatcher`].
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Argument names with a short description each, for the prompt manifest.
    fn parameters(&self) -> &[(&'static str, &'static str)];

    async fn call(&self, args: &Value) -> Result<Value>;
}

/// Read a required string argument.
pub(crate) fn str_arg<'a>(tool: &str, args: &'a Value, name: &str) -> Result<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PrismError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("missing string argument `{name}`"),
        })
}
