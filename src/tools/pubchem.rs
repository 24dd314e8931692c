//! PubChem PUG REST lookups for compound context.
//!
//! Both tools share one client, one `pubchem` disk cache and one rate
//! limiter. A 404 from PUG REST is an answer ("not found") and is cached;
//! transport failures and other error statuses are not.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{str_arg, Tool};
use crate::error::{PrismError, Result};
use crate::llm::snippet;

pub const PUBCHEM_CACHE: &str = "pubchem";
pub const SEARCH_PUBCHEM_CID: &str = "search_pubchem_cid";
pub const PUBCHEM_PROPERTIES: &str = "pubchem_properties";

const PROPERTIES: &str = "IUPACName,MolecularFormula,MolecularWeight,XLogP,HBondDonorCount,\
HBondAcceptorCount,RotatableBondCount,Complexity,HeavyAtomCount,Charge,ConnectivitySMILES";
const MAX_ATTEMPTS: u32 = 3;
const TIMEOUT: Duration = Duration::from_secs(30);

pub struct PubChemClient {
    client: reqwest::Client,
    base: Url,
    fetch_limit: usize,
    retry_delay: Duration,
}

impl PubChemClient {
    pub fn new(base_url: &str, fetch_limit: usize, retry_delay: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .ok()
            .filter(|u| !u.cannot_be_a_base())
            .ok_or_else(|| PrismError::Config(format!("invalid PubChem base URL `{base_url}`")))?;
        let client = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .build()
            .map_err(|e| PrismError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base,
            fetch_limit,
            retry_delay,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| PrismError::Config(format!("invalid PubChem base URL `{}`", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET with retries on transport errors, 429 and 5xx. `None` on 404.
    async fn get_json(&self, tool: &str, url: Url, query: &[(&str, String)]) -> Result<Option<Value>> {
        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.client.get(url.clone()).query(query).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if status.is_success() {
                        return resp.json::<Value>().await.map(Some).map_err(|e| {
                            PrismError::Backend {
                                tool: tool.to_string(),
                                reason: format!("invalid JSON from PubChem: {e}"),
                            }
                        });
                    }
                    let body = resp.text().await.unwrap_or_default();
                    last_error = format!("PubChem returned {status}: {}", snippet(&body, 200));
                    if !(status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS) {
                        break;
                    }
                }
                Err(e) => last_error = format!("PubChem request failed: {e}"),
            }
            if attempt < MAX_ATTEMPTS {
                debug!(tool, attempt, error = %last_error, "retrying PubChem request");
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        warn!(tool, error = %last_error, "PubChem request gave up");
        Err(PrismError::Backend {
            tool: tool.to_string(),
            reason: last_error,
        })
    }

    /// CIDs registered under a compound name or synonym, at most `fetch_limit`.
    pub async fn search_cids(&self, name: &str) -> Result<Vec<u64>> {
        let url = self.url(&["compound", "name", name, "cids", "JSON"])?;
        let query = [("MaxRecords", self.fetch_limit.to_string())];
        let Some(json) = self.get_json(SEARCH_PUBCHEM_CID, url, &query).await? else {
            return Ok(Vec::new());
        };
        Ok(json["IdentifierList"]["CID"]
            .as_array()
            .map(|cids| cids.iter().filter_map(Value::as_u64).take(self.fetch_limit).collect())
            .unwrap_or_default())
    }

    /// Computed descriptors for one CID.
    pub async fn properties(&self, cid: u64) -> Result<Option<Value>> {
        let cid = cid.to_string();
        let url = self.url(&["compound", "cid", &cid, "property", PROPERTIES, "JSON"])?;
        let Some(json) = self.get_json(PUBCHEM_PROPERTIES, url, &[]).await? else {
            return Ok(None);
        };
        Ok(json["PropertyTable"]["Properties"].get(0).cloned())
    }
}

/// Read a CID given either as a JSON number or a numeric string.
fn cid_arg(tool: &str, args: &Value) -> Result<u64> {
    let cid = args.get("cid");
    cid.and_then(Value::as_u64)
        .or_else(|| cid.and_then(Value::as_str).and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| PrismError::InvalidArguments {
            tool: tool.to_string(),
            reason: "`cid` must be a positive integer".to_string(),
        })
}

pub struct SearchPubChemCidTool {
    client: Arc<PubChemClient>,
}

impl SearchPubChemCidTool {
    pub fn new(client: Arc<PubChemClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for SearchPubChemCidTool {
    fn name(&self) -> &str {
        SEARCH_PUBCHEM_CID
    }

    fn description(&self) -> &str {
        "Find PubChem compound ids (CIDs) for a drug name or synonym."
    }

    fn parameters(&self) -> &[(&'static str, &'static str)] {
        &[("query", "compound name or synonym")]
    }

    async fn call(&self, args: &Value) -> Result<Value> {
        let query = str_arg(SEARCH_PUBCHEM_CID, args, "query")?;
        let cids = self.client.search_cids(query).await?;
        Ok(if cids.is_empty() {
            json!({"status": "not_found", "query": query})
        } else {
            json!({"status": "found", "query": query, "cids": cids})
        })
    }
}

pub struct PubChemPropertiesTool {
    client: Arc<PubChemClient>,
}

impl PubChemPropertiesTool {
    pub fn new(client: Arc<PubChemClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for PubChemPropertiesTool {
    fn name(&self) -> &str {
        PUBCHEM_PROPERTIES
    }

    fn description(&self) -> &str {
        "Molecular formula, weight, XLogP, H-bond counts and other computed properties \
         for a PubChem CID."
    }

    fn parameters(&self) -> &[(&'static str, &'static str)] {
        &[("cid", "PubChem compound id")]
    }

    async fn call(&self, args: &Value) -> Result<Value> {
        let cid = cid_arg(PUBCHEM_PROPERTIES, args)?;
        Ok(match self.client.properties(cid).await? {
            Some(properties) => json!({"status": "found", "cid": cid, "properties": properties}),
            None => json!({"status": "not_found", "cid": cid}),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use super::*;
    use crate::test_support::StubServer;
    use crate::tools::{CacheSettings, RateLimiter, TaskDispatcher, ToolCache, ToolCall};

    fn client(server: &StubServer, fetch_limit: usize) -> Arc<PubChemClient> {
        let base = format!("{}/rest/pug", server.base_url);
        Arc::new(PubChemClient::new(&base, fetch_limit, Duration::from_millis(10)).unwrap())
    }

    fn routed(client: Arc<PubChemClient>) -> TaskDispatcher {
        let cache = Arc::new(ToolCache::in_memory(CacheSettings::new(PUBCHEM_CACHE)));
        let mut dispatcher = TaskDispatcher::new();
        dispatcher
            .register_cached(Arc::new(SearchPubChemCidTool::new(client.clone())), cache.clone())
            .register_cached(Arc::new(PubChemPropertiesTool::new(client)), cache);
        dispatcher
    }

    fn search(query: &str) -> ToolCall {
        ToolCall::new(SEARCH_PUBCHEM_CID, json!({"query": query}))
    }

    #[tokio::test]
    async fn search_encodes_name_and_caps_results() {
        let server = StubServer::start(|path| {
            if path == "/rest/pug/compound/name/acetylsalicylic%20acid/cids/JSON?MaxRecords=2" {
                (200, r#"{"IdentifierList":{"CID":[2244,1,2]}}"#.to_string())
            } else {
                (400, format!(r#"{{"Fault":{{"Message":"unexpected {path}"}}}}"#))
            }
        })
        .await;
        let payload = routed(client(&server, 2))
            .dispatch(&search("acetylsalicylic acid"))
            .await
            .unwrap();
        assert_eq!(
            payload,
            r#"{"cids":[2244,1],"query":"acetylsalicylic acid","status":"found"}"#
        );
    }

    #[tokio::test]
    async fn unknown_compound_is_cached_as_not_found() {
        let server = StubServer::start(|_| {
            (404, r#"{"Fault":{"Code":"PUGREST.NotFound"}}"#.to_string())
        })
        .await;
        let dispatcher = routed(client(&server, 5));
        let first = dispatcher.dispatch(&search("xyznonexistent")).await.unwrap();
        let second = dispatcher.dispatch(&search("xyznonexistent")).await.unwrap();
        assert!(first.contains("not_found"));
        assert_eq!(first, second);
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let server = StubServer::start(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                (503, "busy".to_string())
            } else {
                (
                    200,
                    r#"{"PropertyTable":{"Properties":[{"CID":2244,"MolecularFormula":"C9H8O4"}]}}"#
                        .to_string(),
                )
            }
        })
        .await;
        let call = ToolCall::new(PUBCHEM_PROPERTIES, json!({"cid": "2244"}));
        let payload = routed(client(&server, 5)).dispatch(&call).await.unwrap();
        assert!(payload.contains("C9H8O4"), "{payload}");
        assert_eq!(server.hits(), 2);
    }

    #[tokio::test]
    async fn client_errors_fail_fast_and_are_not_cached() {
        let server = StubServer::start(|_| (400, "bad request".to_string())).await;
        let dispatcher = routed(client(&server, 5));
        for _ in 0..2 {
            let err = dispatcher.dispatch(&search("aspirin")).await.unwrap_err();
            assert!(matches!(err, PrismError::Backend { ref reason, .. } if reason.contains("400")));
        }
        assert_eq!(server.hits(), 2);
    }

    #[tokio::test]
    async fn cid_must_be_numeric() {
        let server = StubServer::start(|_| (200, "{}".to_string())).await;
        let call = ToolCall::new(PUBCHEM_PROPERTIES, json!({"cid": "aspirin"}));
        let err = routed(client(&server, 5)).dispatch(&call).await.unwrap_err();
        assert!(matches!(err, PrismError::InvalidArguments { .. }));
        assert_eq!(server.hits(), 0);
    }

    #[tokio::test]
    async fn limiter_spaces_backend_requests() {
        let server = StubServer::start(|_| (200, r#"{"IdentifierList":{"CID":[1]}}"#.to_string())).await;
        let mut dispatcher = routed(client(&server, 5));
        let limiter = Arc::new(RateLimiter::new(PUBCHEM_CACHE, 1, Duration::from_millis(150)).unwrap());
        dispatcher
            .with_limiter(SEARCH_PUBCHEM_CID, limiter)
            .unwrap();

        let start = Instant::now();
        dispatcher.dispatch(&search("a")).await.unwrap();
        dispatcher.dispatch(&search("b")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(150));

        // a cache hit does not wait for the window
        let start = Instant::now();
        dispatcher.dispatch(&search("a")).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(150));
        assert_eq!(server.hits(), 2);
    }
}
