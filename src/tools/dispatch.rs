use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, info_span, Instrument};

use super::{RateLimiter, Tool, ToolCache, ToolCall};
use crate::error::{PrismError, Result};

struct Route {
    tool: Arc<dyn Tool>,
    cache: Option<Arc<ToolCache>>,
    limiter: Option<Arc<RateLimiter>>,
}

/// Static routing table from tool name to backend.
///
/// Each route may carry its own cache and rate limiter. The limiter is only
/// consulted when a request actually reaches the backend.
#[derive(Default)]
pub struct TaskDispatcher {
    routes: BTreeMap<String, Route>,
}

impl TaskDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `tool` with no cache. Replaces any tool registered under the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        self.insert(tool, None)
    }

    pub fn register_cached(&mut self, tool: Arc<dyn Tool>, cache: Arc<ToolCache>) -> &mut Self {
        self.insert(tool, Some(cache))
    }

    fn insert(&mut self, tool: Arc<dyn Tool>, cache: Option<Arc<ToolCache>>) -> &mut Self {
        let name = tool.name().to_string();
        self.routes.insert(
            name,
            Route {
                tool,
                cache,
                limiter: None,
            },
        );
        self
    }

    /// Attach a rate limiter to an already registered route.
    pub fn with_limiter(&mut self, name: &str, limiter: Arc<RateLimiter>) -> Result<&mut Self> {
        let route = self
            .routes
            .get_mut(name)
            .ok_or_else(|| PrismError::UnknownTool(name.to_string()))?;
        route.limiter = Some(limiter);
        Ok(self)
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.routes.keys().map(String::as_str).collect()
    }

    /// Every distinct cache attached to a route.
    pub fn caches(&self) -> Vec<Arc<ToolCache>> {
        let mut out: Vec<Arc<ToolCache>> = Vec::new();
        for cache in self.routes.values().filter_map(|r| r.cache.as_ref()) {
            if !out.iter().any(|c| Arc::ptr_eq(c, cache)) {
                out.push(cache.clone());
            }
        }
        out
    }

    /// Route `call` and return the serialized JSON result.
    pub async fn dispatch(&self, call: &ToolCall) -> Result<String> {
        let route = self
            .routes
            .get(&call.name)
            .ok_or_else(|| PrismError::UnknownTool(call.name.clone()))?;

        let span = info_span!("dispatch", tool = %call.name);
        Self::serve(route, call).instrument(span).await
    }

    async fn serve(route: &Route, call: &ToolCall) -> Result<String> {
        let fetch = move || async move {
            if let Some(limiter) = &route.limiter {
                limiter.acquire().await;
            }
            route.tool.call(&call.arguments).await
        };

        match &route.cache {
            Some(cache) => {
                let (payload, hit) = cache.get_or_fetch(call, fetch).await?;
                debug!(hit, "tool call served");
                Ok(payload)
            }
            None => {
                let value = fetch().await?;
                Ok(serde_json::to_string(&value)?)
            }
        }
    }

    /// Tool descriptions in the order they are routed, for the system prompt.
    pub fn manifest(&self) -> String {
        let mut out = String::new();
        for (name, route) in &self.routes {
            let _ = writeln!(out, "- {name}: {}", route.tool.description());
            for (arg, desc) in route.tool.parameters() {
                let _ = writeln!(out, "    {arg}: {desc}");
            }
        }
        out
    }
}
