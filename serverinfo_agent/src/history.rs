//! Rolling history store: bounded chart series plus a few cached values
//! (traffic baselines), optionally written through to a key-value backend.

use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::kv::KeyValueStore;
use crate::types::Sample;

/// Namespace for every key written to the backing store.
pub const KEY_PREFIX: &str = "serverinfo_";

pub const CPU_HISTORY_LEN: usize = 360;
pub const RAM_HISTORY_LEN: usize = 180;
pub const CONTAINER_HISTORY_LEN: usize = 60;

pub fn cpu_series_key(id: &str) -> String {
    format!("cpuArchive_{id}")
}

pub fn ram_series_key(id: &str) -> String {
    format!("ramArchive_{id}")
}

/// Common prefix of every container series recorded under metric `id`.
pub fn container_series_prefix(id: &str) -> String {
    format!("containerArchive_{id}_")
}

pub fn container_series_key(id: &str, container: &str, field: &str) -> String {
    format!("{}{container}_{field}", container_series_prefix(id))
}

pub fn push_capped<T>(dq: &mut VecDeque<T>, v: T, cap: usize) {
    dq.push_back(v);
    while dq.len() > cap {
        dq.pop_front();
    }
}

#[derive(Default)]
struct Inner {
    series: HashMap<String, VecDeque<Sample>>,
    values: HashMap<String, Value>,
}

/// All mutation happens under one lock, so readers see a series either
/// before or after a push, never in between.
pub struct MetricStore {
    inner: Mutex<Inner>,
    backing: Option<Arc<dyn KeyValueStore>>,
}

impl MetricStore {
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            backing: None,
        }
    }

    pub fn with_backing(backing: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            backing: Some(backing),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.backing.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `sample` to `key`, evicting from the front beyond `max_len`.
    /// The first push to a key hydrates it from the backend. Returns the
    /// retained window after the push.
    pub fn push(&self, key: &str, sample: Sample, max_len: usize) -> Vec<Sample> {
        let loaded = if self.lock().series.contains_key(key) {
            None
        } else {
            self.load_series(key)
        };

        let (window, encoded) = {
            let mut inner = self.lock();
            let dq = inner
                .series
                .entry(key.to_string())
                .or_insert_with(|| loaded.unwrap_or_default());
            push_capped(dq, sample, max_len);
            let window: Vec<Sample> = dq.iter().copied().collect();
            let encoded = self.backing.as_ref().and_then(|_| serde_json::to_string(&window).ok());
            (window, encoded)
        };

        if let Some(json) = encoded {
            self.persist(key, &json);
        }
        window
    }

    pub fn get_series(&self, key: &str) -> Option<Vec<Sample>> {
        self.lock().series.get(key).map(|dq| dq.iter().copied().collect())
    }

    /// Retained window for `key`, hydrating from the backend on first access.
    pub fn series(&self, key: &str) -> Vec<Sample> {
        self.hydrate(key);
        self.get_series(key).unwrap_or_default()
    }

    /// Drop in-memory series under `prefix` whose key is not in `keep`.
    /// Persisted copies are left alone. Returns how many were dropped.
    pub fn prune_series(&self, prefix: &str, keep: &HashSet<String>) -> usize {
        let mut inner = self.lock();
        let before = inner.series.len();
        inner
            .series
            .retain(|key, _| !key.starts_with(prefix) || keep.contains(key));
        before - inner.series.len()
    }

    /// Load a series from the backend into memory unless it is already
    /// present. Returns whether the key is now held in memory.
    pub fn hydrate(&self, key: &str) -> bool {
        if self.lock().series.contains_key(key) {
            return true;
        }
        match self.load_series(key) {
            Some(dq) => {
                self.lock().series.entry(key.to_string()).or_insert(dq);
                true
            }
            None => false,
        }
    }

    pub fn set(&self, key: &str, value: Value) {
        self.lock().values.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().values.get(key).cloned()
    }

    /// `set` plus a write-through to the backend. Backend failures are
    /// logged; the in-memory value is kept either way.
    pub fn set_and_persist(&self, key: &str, value: Value) {
        let encoded = value.to_string();
        self.set(key, value);
        self.persist(key, &encoded);
    }

    /// Read-through: load `key` from the backend into the value cache.
    pub fn sync(&self, key: &str) -> Option<Value> {
        let raw = self.backend_get(key)?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(v) => {
                self.set(key, v.clone());
                Some(v)
            }
            Err(e) => {
                warn!("discarding unreadable persisted value {key}: {e}");
                None
            }
        }
    }

    /// Keys currently persisted under the namespace, without the prefix.
    pub fn persisted_keys(&self) -> Vec<String> {
        let Some(backing) = self.backing.as_ref() else {
            return Vec::new();
        };
        match backing.list(KEY_PREFIX) {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|k| k.strip_prefix(KEY_PREFIX).map(str::to_string))
                .collect(),
            Err(e) => {
                warn!("listing persisted keys failed: {e}");
                Vec::new()
            }
        }
    }

    fn load_series(&self, key: &str) -> Option<VecDeque<Sample>> {
        let raw = self.backend_get(key)?;
        match serde_json::from_str::<VecDeque<Sample>>(&raw) {
            Ok(dq) => {
                debug!("hydrated {key} with {} samples", dq.len());
                Some(dq)
            }
            Err(e) => {
                warn!("discarding unreadable persisted series {key}: {e}");
                None
            }
        }
    }

    fn backend_get(&self, key: &str) -> Option<String> {
        let backing = self.backing.as_ref()?;
        match backing.get(&format!("{KEY_PREFIX}{key}")) {
            Ok(v) => v,
            Err(e) => {
                warn!("reading {key} from store failed: {e}");
                None
            }
        }
    }

    fn persist(&self, key: &str, json: &str) {
        if let Some(backing) = self.backing.as_ref() {
            if let Err(e) = backing.set(&format!("{KEY_PREFIX}{key}"), json) {
                warn!("persisting {key} failed: {e}");
            }
        }
    }
}
