// Expiring, bounded key-value cache with JSON payloads.
// Entries live under `<namespace>:<key>`; an index under `<namespace>:__index`
// records insertion order, expiry and size so eviction survives a reload.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

use crate::error::PipelineError;
use crate::types::{CachePolicy, Millis, PipelineConfig};

const INDEX_SUFFIX: &str = "__index";

/// Raw string storage the cache sits on.
pub trait CacheBackend {
    fn read(&self, key: &str) -> Result<Option<String>, PipelineError>;
    fn write(&mut self, key: &str, value: &str) -> Result<(), PipelineError>;
    fn delete(&mut self, key: &str) -> Result<(), PipelineError>;
}

impl CacheBackend for Box<dyn CacheBackend> {
    fn read(&self, key: &str) -> Result<Option<String>, PipelineError> {
        (**self).read(key)
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), PipelineError> {
        (**self).write(key, value)
    }

    fn delete(&mut self, key: &str) -> Result<(), PipelineError> {
        (**self).delete(key)
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    items: std::collections::BTreeMap<String, String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl CacheBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, PipelineError> {
        Ok(self.items.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), PipelineError> {
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), PipelineError> {
        self.items.remove(key);
        Ok(())
    }
}

/// `window.localStorage`.
#[cfg(target_arch = "wasm32")]
pub struct LocalStorageBackend {
    storage: web_sys::Storage,
}

#[cfg(target_arch = "wasm32")]
impl LocalStorageBackend {
    pub fn new() -> Result<Self, PipelineError> {
        let storage = web_sys::window()
            .and_then(|window| window.local_storage().ok().flatten())
            .ok_or_else(|| PipelineError::Storage("localStorage unavailable".into()))?;
        Ok(LocalStorageBackend { storage })
    }
}

#[cfg(target_arch = "wasm32")]
fn storage_err(err: JsValue) -> PipelineError {
    // Quota errors arrive as DOMException objects, not strings.
    let message = err.as_string().or_else(|| {
        js_sys::Reflect::get(&err, &JsValue::from_str("message"))
            .ok()
            .and_then(|message| message.as_string())
    });
    PipelineError::Storage(message.unwrap_or_else(|| "localStorage error".into()))
}

#[cfg(target_arch = "wasm32")]
impl CacheBackend for LocalStorageBackend {
    fn read(&self, key: &str) -> Result<Option<String>, PipelineError> {
        self.storage.get_item(key).map_err(storage_err)
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), PipelineError> {
        self.storage.set_item(key, value).map_err(storage_err)
    }

    fn delete(&mut self, key: &str) -> Result<(), PipelineError> {
        self.storage.remove_item(key).map_err(storage_err)
    }
}

/// localStorage in the browser, memory everywhere else.
pub fn default_backend() -> Result<Box<dyn CacheBackend>, PipelineError> {
    #[cfg(target_arch = "wasm32")]
    {
        Ok(Box::new(LocalStorageBackend::new()?))
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        Ok(Box::new(MemoryBackend::new()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct IndexEntry {
    key: String,
    stored_at: Millis,
    expires_at: Millis,
    bytes: usize,
}

pub struct CacheStore<B: CacheBackend> {
    backend: B,
    namespace: String,
    policy: CachePolicy,
    /// Oldest first.
    index: Vec<IndexEntry>,
}

impl<B: CacheBackend> CacheStore<B> {
    /// Open a namespace, picking up an index a previous session left behind.
    /// An unreadable index starts the namespace over.
    pub fn open(backend: B, namespace: impl Into<String>, policy: CachePolicy) -> Result<Self, PipelineError> {
        let namespace = namespace.into();
        let index_key = format!("{namespace}:{INDEX_SUFFIX}");
        let index = match backend.read(&index_key)? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                log::warn!("cache {namespace:?}: discarding unreadable index: {err}");
                Vec::new()
            }),
            None => Vec::new(),
        };
        Ok(CacheStore {
            backend,
            namespace,
            policy,
            index,
        })
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.index.iter().map(|entry| entry.bytes).sum()
    }

    /// Keys oldest first.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.index.iter().map(|entry| entry.key.as_str())
    }

    pub fn get<T: DeserializeOwned>(&mut self, key: &str, now: Millis) -> Result<Option<T>, PipelineError> {
        match self.get_raw(key, now)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Stored JSON text. Expired or orphaned entries are dropped on the way.
    pub fn get_raw(&mut self, key: &str, now: Millis) -> Result<Option<String>, PipelineError> {
        let Some(position) = self.position(key) else {
            return Ok(None);
        };
        if self.index[position].expires_at <= now {
            log::debug!("cache {:?}: {key:?} expired", self.namespace);
            self.drop_at(position)?;
            self.persist_index()?;
            return Ok(None);
        }
        let storage_key = self.storage_key(key);
        match self.backend.read(&storage_key)? {
            Some(raw) => Ok(Some(raw)),
            None => {
                self.index.remove(position);
                self.persist_index()?;
                Ok(None)
            }
        }
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: &T, now: Millis) -> Result<(), PipelineError> {
        let raw = serde_json::to_string(value)?;
        self.set_raw(key, &raw, now)
    }

    /// Store JSON text. The entry becomes the newest; older ones are evicted to
    /// make room.
    pub fn set_raw(&mut self, key: &str, raw: &str, now: Millis) -> Result<(), PipelineError> {
        let bytes = raw.len();
        if bytes > self.policy.max_bytes {
            return Err(PipelineError::Storage(format!(
                "entry {key:?} is {bytes} bytes, over the {} byte cache limit",
                self.policy.max_bytes
            )));
        }
        // A failed write leaves the index and the old value as they were.
        let storage_key = self.storage_key(key);
        self.backend.write(&storage_key, raw)?;
        if let Some(position) = self.position(key) {
            self.index.remove(position);
        }
        self.index.push(IndexEntry {
            key: key.to_string(),
            stored_at: now,
            expires_at: now.saturating_add(self.policy.ttl_ms),
            bytes,
        });
        self.evict(now)?;
        self.persist_index()
    }

    pub fn remove(&mut self, key: &str) -> Result<bool, PipelineError> {
        let Some(position) = self.position(key) else {
            return Ok(false);
        };
        self.drop_at(position)?;
        self.persist_index()?;
        Ok(true)
    }

    /// Drop expired entries, then the oldest until both bounds hold.
    /// Returns how many entries went.
    pub fn evict(&mut self, now: Millis) -> Result<usize, PipelineError> {
        let mut evicted = 0;
        let mut position = 0;
        while position < self.index.len() {
            if self.index[position].expires_at <= now {
                self.drop_at(position)?;
                evicted += 1;
            } else {
                position += 1;
            }
        }
        while !self.index.is_empty()
            && (self.index.len() > self.policy.max_items || self.total_bytes() > self.policy.max_bytes)
        {
            self.drop_at(0)?;
            evicted += 1;
        }
        if evicted > 0 {
            log::debug!("cache {:?}: evicted {evicted} entries", self.namespace);
            self.persist_index()?;
        }
        Ok(evicted)
    }

    pub fn clear(&mut self) -> Result<(), PipelineError> {
        while !self.index.is_empty() {
            self.drop_at(0)?;
        }
        let index_key = self.index_key();
        self.backend.delete(&index_key)
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.index.iter().position(|entry| entry.key == key)
    }

    fn drop_at(&mut self, position: usize) -> Result<(), PipelineError> {
        let entry = self.index.remove(position);
        let storage_key = self.storage_key(&entry.key);
        self.backend.delete(&storage_key)
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    fn index_key(&self) -> String {
        format!("{}:{INDEX_SUFFIX}", self.namespace)
    }

    fn persist_index(&mut self) -> Result<(), PipelineError> {
        let raw = serde_json::to_string(&self.index)?;
        let key = self.index_key();
        self.backend.write(&key, &raw)
    }
}

// =============================================================================
// WASM Bindings
// =============================================================================

/// WASM-exposed cache over `localStorage`. Values cross as JSON text.
#[wasm_bindgen]
pub struct WasmCache {
    inner: CacheStore<Box<dyn CacheBackend>>,
}

#[wasm_bindgen]
impl WasmCache {
    #[wasm_bindgen(constructor)]
    pub fn new(namespace: &str, config_json: &str) -> Result<WasmCache, JsValue> {
        let config = PipelineConfig::from_json(config_json).map_err(crate::to_js)?;
        let backend = default_backend().map_err(crate::to_js)?;
        let inner = CacheStore::open(backend, namespace, config.cache).map_err(crate::to_js)?;
        Ok(WasmCache { inner })
    }

    pub fn get(&mut self, key: &str, now_ms: f64) -> Result<Option<String>, JsValue> {
        self.inner.get_raw(key, millis(now_ms)).map_err(crate::to_js)
    }

    /// Rejects text that is not valid JSON.
    pub fn set(&mut self, key: &str, json: &str, now_ms: f64) -> Result<(), JsValue> {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| crate::to_js(PipelineError::from(err)))?;
        self.inner.set_raw(key, json, millis(now_ms)).map_err(crate::to_js)
    }

    pub fn remove(&mut self, key: &str) -> Result<bool, JsValue> {
        self.inner.remove(key).map_err(crate::to_js)
    }

    pub fn evict(&mut self, now_ms: f64) -> Result<usize, JsValue> {
        self.inner.evict(millis(now_ms)).map_err(crate::to_js)
    }

    pub fn clear(&mut self) -> Result<(), JsValue> {
        self.inner.clear().map_err(crate::to_js)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

fn millis(now_ms: f64) -> Millis {
    Millis::new(now_ms.max(0.0) as u64)
}
