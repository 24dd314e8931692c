//! Persistent memoization of tool calls.
//!
//! Keys are a blake3 hash over a canonical JSON encoding of the cache
//! version, tool name, arguments and tag, so the same request made by
//! different agent runs lands on the same entry. Entries are never rewritten
//! in place; an expired entry counts as a miss and is replaced by the fresh
//! result.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use super::ToolCall;
use crate::error::{PrismError, Result};

/// A stored tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Serialized JSON returned to the caller, byte for byte.
    pub payload: String,
    pub written_at: i64,
    #[serde(default)]
    pub expire_secs: Option<u64>,
}

impl CacheEntry {
    fn is_expired(&self, now: i64) -> bool {
        match self.expire_secs {
            Some(ttl) => now.saturating_sub(self.written_at) >= ttl as i64,
            None => false,
        }
    }

    /// Serialized form; its length is what every store accounts.
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Backing map for a [`ToolCache`].
///
/// Entries are written once. Replacing one means removing it first.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Store `entry` unless `key` is already present. Returns whether it was written.
    fn insert_if_absent(&mut self, key: &str, entry: CacheEntry) -> Result<bool>;

    fn remove(&mut self, key: &str) -> Result<()>;

    fn len(&self) -> usize;

    /// Total serialized entry bytes held.
    fn bytes(&self) -> u64;

    /// Human-readable location, for stats and errors.
    fn location(&self) -> String;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, (CacheEntry, u64)>,
    bytes: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.get(key).map(|(entry, _)| entry.clone()))
    }

    fn insert_if_absent(&mut self, key: &str, entry: CacheEntry) -> Result<bool> {
        if self.entries.contains_key(key) {
            return Ok(false);
        }
        let size = entry.encode()?.len() as u64;
        self.bytes += size;
        self.entries.insert(key.to_string(), (entry, size));
        Ok(true)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        if let Some((_, size)) = self.entries.remove(key) {
            self.bytes -= size;
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn bytes(&self) -> u64 {
        self.bytes
    }

    fn location(&self) -> String {
        "<memory>".to_string()
    }
}

/// One JSON file per entry under `dir/<first two hex chars>/<key>.json`.
#[derive(Debug)]
pub struct DiskStore {
    dir: PathBuf,
    count: usize,
    bytes: u64,
}

impl DiskStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut count = 0;
        let mut bytes = 0;
        for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "json")
            {
                count += 1;
                bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        debug!(dir = %dir.display(), count, bytes, "disk cache opened");
        Ok(Self {
            dir: dir.to_path_buf(),
            count,
            bytes,
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let fan = key.get(..2).unwrap_or("__");
        self.dir.join(fan).join(format!("{key}.json"))
    }
}

impl CacheStore for DiskStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.path_for(key);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt cache entry ignored");
                Ok(None)
            }
        }
    }

    fn insert_if_absent(&mut self, key: &str, entry: CacheEntry) -> Result<bool> {
        if self.get(key)?.is_some() {
            return Ok(false);
        }
        let path = self.path_for(key);
        // an unreadable file under this key is overwritten
        let stale = std::fs::metadata(&path).ok().map(|m| m.len());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = entry.encode()?;
        // write-then-rename so readers never see a partial file
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &data)?;
        std::fs::rename(&tmp, &path)?;

        match stale {
            Some(old) => self.bytes = self.bytes.saturating_sub(old) + data.len() as u64,
            None => {
                self.count += 1;
                self.bytes += data.len() as u64;
            }
        }
        Ok(true)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        let size = match std::fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        std::fs::remove_file(&path)?;
        self.count = self.count.saturating_sub(1);
        self.bytes = self.bytes.saturating_sub(size);
        Ok(())
    }

    fn len(&self) -> usize {
        self.count
    }

    fn bytes(&self) -> u64 {
        self.bytes
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Behaviour of one named cache.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub name: String,
    /// Bump to invalidate every entry written by an older backend.
    pub version: String,
    /// Optional namespace mixed into every key.
    pub tag: Option<String>,
    pub size_limit_bytes: Option<u64>,
    pub expire_secs: Option<u64>,
    /// Fail on a miss instead of calling the backend.
    pub offline_only: bool,
}

impl CacheSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1".to_string(),
            tag: None,
            size_limit_bytes: None,
            expire_secs: None,
            offline_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub name: String,
    pub directory: String,
    pub size_limit_bytes: Option<u64>,
    pub bytes: u64,
    pub count: usize,
    pub version: String,
    pub tag: Option<String>,
}

pub struct ToolCache {
    settings: CacheSettings,
    store: Mutex<Box<dyn CacheStore>>,
}

impl ToolCache {
    pub fn new(settings: CacheSettings, store: Box<dyn CacheStore>) -> Self {
        Self {
            settings,
            store: Mutex::new(store),
        }
    }

    pub fn in_memory(settings: CacheSettings) -> Self {
        Self::new(settings, Box::new(MemoryStore::new()))
    }

    /// Disk-backed cache at `root/<name>`.
    pub fn on_disk(settings: CacheSettings, root: &Path) -> Result<Self> {
        let store = DiskStore::open(&root.join(&settings.name))?;
        Ok(Self::new(settings, Box::new(store)))
    }

    /// Canonical key for a request.
    pub fn key(&self, call: &ToolCall) -> String {
        let mut payload = serde_json::Map::new();
        payload.insert("v".into(), Value::String(self.settings.version.clone()));
        payload.insert("tool".into(), Value::String(call.name.clone()));
        payload.insert("args".into(), call.arguments.clone());
        payload.insert(
            "tag".into(),
            self.settings.tag.clone().map(Value::String).unwrap_or(Value::Null),
        );
        let text = canonical_json(&Value::Object(payload));
        blake3::hash(text.as_bytes()).to_hex().to_string()
    }

    /// Return the stored payload for `call`, or run `fetch` once and store
    /// its serialized result. The second element is `true` on a hit.
    ///
    /// Misses hold the store lock while fetching, so concurrent identical
    /// requests reach the backend once.
    pub async fn get_or_fetch<F, Fut>(&self, call: &ToolCall, fetch: F) -> Result<(String, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let key = self.key(call);
        let now = chrono::Utc::now().timestamp();
        let mut store = self.store.lock().await;

        if let Some(entry) = store.get(&key)? {
            if !entry.is_expired(now) {
                trace!(tool = %call.name, key = &key[..12], "cache hit");
                return Ok((entry.payload, true));
            }
            debug!(tool = %call.name, key = &key[..12], "cache entry expired");
            store.remove(&key)?;
        }

        if self.settings.offline_only {
            return Err(PrismError::CacheMiss {
                key: key[..10].to_string(),
                dir: store.location(),
            });
        }

        let value = fetch().await?;
        let payload = serde_json::to_string(&value)?;
        let entry = CacheEntry {
            payload: payload.clone(),
            written_at: now,
            expire_secs: self.settings.expire_secs,
        };

        let projected = store.bytes() + entry.encode()?.len() as u64;
        match self.settings.size_limit_bytes {
            Some(limit) if projected > limit => {
                warn!(
                    cache = %self.settings.name,
                    limit,
                    projected,
                    "cache size limit reached, result not stored"
                );
            }
            _ => {
                store.insert_if_absent(&key, entry)?;
                trace!(tool = %call.name, key = &key[..12], "cache miss stored");
            }
        }

        Ok((payload, false))
    }

    pub async fn stats(&self) -> CacheStats {
        let store = self.store.lock().await;
        CacheStats {
            name: self.settings.name.clone(),
            directory: store.location(),
            size_limit_bytes: self.settings.size_limit_bytes,
            bytes: store.bytes(),
            count: store.len(),
            version: self.settings.version.clone(),
            tag: self.settings.tag.clone(),
        }
    }
}

/// JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}
