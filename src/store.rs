//! Durable keyed store
//!
//! One YAML file per key, cached in memory with dirty tracking. Every
//! mutation and save for a key is serialized through the task queue under
//! `"store/<key>"`, so no two mutations, and no mutation and save, ever
//! interleave for the same record. Bare reads are served from the cache
//! without queueing: a `get` concurrent with an in-flight `modify` may
//! observe the pre-mutation snapshot. That is deliberate — `get` is a
//! best-effort current snapshot, not a read-your-writes barrier.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::queue::{TaskHandle, TaskQueue};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record's backing file (or cached value) could not be converted
    /// to or from the requested shape.
    #[error("record {key} is corrupt: {source}")]
    CorruptRecord {
        key: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Reading or writing the record's backing file failed. The in-memory
    /// record keeps its dirty flag, so a later save can retry.
    #[error("persistence failure for record {key}: {source}")]
    Persistence {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// The key cannot form a path inside the data directory.
    #[error("invalid store key: {0:?}")]
    InvalidKey(String),
}

/// One cached record: the in-memory value and whether it has unsaved
/// changes. A record with `dirty == false` is identical to its on-disk
/// representation (or has never been persisted and never mutated).
struct Record {
    value: serde_yaml::Value,
    dirty: bool,
}

struct StoreInner {
    dir: PathBuf,
    queue: TaskQueue,
    cache: Mutex<HashMap<String, Record>>,
}

/// Durable keyed store backed by one YAML file per key.
///
/// Keys may contain `/` to form nested directories under the data
/// directory, e.g. a log-by-date key like `log/group-1/2026-08/05`.
/// Cloning is cheap and clones share the same cache.
#[derive(Clone)]
pub struct DurableStore {
    inner: Arc<StoreInner>,
}

impl DurableStore {
    /// Create a store rooted at `dir`, serializing through `queue`.
    pub fn new(dir: impl Into<PathBuf>, queue: TaskQueue) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                dir: dir.into(),
                queue,
                cache: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Root directory holding the backing files.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Best-effort current snapshot of the record for `key`.
    ///
    /// Returns the cached value if present; otherwise deserializes the
    /// key's backing file, or materializes `gen_default()` if no file
    /// exists. Either way the result is cached (not dirty), so two `get`s
    /// in a row never re-read the disk.
    pub async fn get<T, D>(&self, key: &str, gen_default: D) -> Result<T, StoreError>
    where
        T: Serialize + DeserializeOwned,
        D: FnOnce() -> T,
    {
        validate_key(key)?;

        if let Some(value) = self.cached(key) {
            return from_value(key, value);
        }

        let path = self.record_path(key);
        let candidate = match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                debug!("Loaded record {} from {:?}", key, path);
                serde_yaml::from_str(&text).map_err(|source| StoreError::CorruptRecord {
                    key: key.to_string(),
                    source,
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => to_value(key, &gen_default())?,
            Err(source) => {
                return Err(StoreError::Persistence {
                    key: key.to_string(),
                    source,
                })
            }
        };

        // Another get may have raced us here; whatever landed first wins.
        from_value(key, self.intern(key, candidate))
    }

    /// Enqueue a mutation of the record for `key`.
    ///
    /// The mutation resolves the current value through the same lazy-load
    /// path as [`get`](Self::get), applies `mutator` and marks the record
    /// dirty. It runs on the key's queue, ordered against every other
    /// `modify`/`save` for the same key. Returns immediately; await the
    /// handle to observe the outcome.
    pub fn modify<T, D, F>(
        &self,
        key: &str,
        gen_default: D,
        mutator: F,
    ) -> TaskHandle<Result<(), StoreError>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        D: FnOnce() -> T + Send + 'static,
        F: FnOnce(&mut T) + Send + 'static,
    {
        let store = self.clone();
        let key = key.to_string();
        self.inner.queue.submit(queue_key(&key), async move {
            let mut value: T = store.get(&key, gen_default).await?;
            mutator(&mut value);
            store.write_back(&key, to_value(&key, &value)?);
            Ok(())
        })
    }

    /// Enqueue a save of the record for `key`.
    ///
    /// The save is a no-op unless the record is present and dirty. The
    /// value is serialized to a fresh temporary file which is then renamed
    /// over the target, so a failed write never corrupts the previous
    /// on-disk contents. On success the dirty flag is cleared and, if
    /// `evict` was requested, the cached value is dropped. On failure the
    /// record stays dirty so a later save can retry.
    pub fn save(&self, key: &str, evict: bool) -> TaskHandle<Result<(), StoreError>> {
        let store = self.clone();
        let key = key.to_string();
        self.inner
            .queue
            .submit(queue_key(&key), async move { store.save_now(&key, evict).await })
    }

    /// Discard the cached value and dirty flag for `key` without
    /// persisting. Unsaved changes are lost; the backing file is untouched.
    pub fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Flush every cached record through its per-key queue.
    ///
    /// Attempts all keys even if some fail; the first failure is returned
    /// after the rest have been tried. Used on shutdown so pending
    /// persistence is routed through the queue.
    pub async fn save_all(&self) -> Result<(), StoreError> {
        let keys: Vec<String> = self.lock().keys().cloned().collect();
        let handles: Vec<_> = keys
            .into_iter()
            .map(|key| {
                let handle = self.save(&key, false);
                (key, handle)
            })
            .collect();

        let mut first_err = None;
        for (key, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Failed to save record {}: {}", key, e);
                    first_err.get_or_insert(e);
                }
                Err(e) => {
                    warn!("Save task for record {} aborted: {}", key, e);
                }
            }
        }

        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    async fn save_now(&self, key: &str, evict: bool) -> Result<(), StoreError> {
        validate_key(key)?;

        let snapshot = {
            let cache = self.lock();
            match cache.get(key) {
                Some(record) if record.dirty => Some(record.value.clone()),
                _ => None,
            }
        };
        let Some(value) = snapshot else {
            return Ok(());
        };

        let text = serde_yaml::to_string(&value).map_err(|source| StoreError::CorruptRecord {
            key: key.to_string(),
            source,
        })?;

        let path = self.record_path(key);
        let written = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let tmp = path.with_extension("yaml.tmp");
            tokio::fs::write(&tmp, text).await?;
            tokio::fs::rename(&tmp, &path).await
        }
        .await;

        match written {
            Ok(()) => {
                debug!("Saved record {} to {:?}", key, path);
                let mut cache = self.lock();
                if evict {
                    cache.remove(key);
                } else if let Some(record) = cache.get_mut(key) {
                    record.dirty = false;
                }
                Ok(())
            }
            // The record keeps its dirty flag; the old file is intact.
            Err(source) => Err(StoreError::Persistence {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn cached(&self, key: &str) -> Option<serde_yaml::Value> {
        self.lock().get(key).map(|record| record.value.clone())
    }

    /// Insert a freshly loaded/materialized value unless a record already
    /// exists, and return the value that ended up cached.
    fn intern(&self, key: &str, value: serde_yaml::Value) -> serde_yaml::Value {
        let mut cache = self.lock();
        let record = cache
            .entry(key.to_string())
            .or_insert(Record { value, dirty: false });
        record.value.clone()
    }

    fn write_back(&self, key: &str, value: serde_yaml::Value) {
        let mut cache = self.lock();
        cache.insert(key.to_string(), Record { value, dirty: true });
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.inner.dir.join(format!("{key}.yaml"))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Record>> {
        self.inner.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn queue_key(key: &str) -> String {
    format!("store/{key}")
}

/// Keys become file paths, so they must stay inside the data directory:
/// non-empty, relative, and free of `..` components.
fn validate_key(key: &str) -> Result<(), StoreError> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && !path.is_absolute()
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

fn from_value<T: DeserializeOwned>(key: &str, value: serde_yaml::Value) -> Result<T, StoreError> {
    serde_yaml::from_value(value).map_err(|source| StoreError::CorruptRecord {
        key: key.to_string(),
        source,
    })
}

fn to_value<T: Serialize>(key: &str, value: &T) -> Result<serde_yaml::Value, StoreError> {
    serde_yaml::to_value(value).map_err(|source| StoreError::CorruptRecord {
        key: key.to_string(),
        source,
    })
}
