//! Namespaced object key/value store abstraction.
//!
//! This is the contract the journal needs from a RADOS-omap-equivalent
//! store: objects addressed by `(pool, namespace, oid)`, each holding a flat
//! string key/value map. `MemOmapStore` implements it in memory for tests
//! and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

/// Result type alias for omap operations.
pub type OmapResult<T> = Result<T, OmapError>;

/// Error variants for omap operations.
#[derive(Debug, Clone, Error)]
pub enum OmapError {
    /// The addressed object does not exist.
    #[error("object not found: {oid}")]
    ObjectNotFound {
        /// The missing object ID.
        oid: String,
    },

    /// The object already exists and exclusive creation was requested.
    #[error("object exists: {oid}")]
    ObjectExists {
        /// The conflicting object ID.
        oid: String,
    },

    /// The addressed pool does not exist.
    #[error("pool not found: {pool}")]
    PoolNotFound {
        /// The missing pool name.
        pool: String,
    },

    /// Unclassified store failure.
    #[error("omap store error: {message}")]
    Other {
        /// Description of the failure.
        message: String,
    },
}

/// Key/value storage over namespaced objects.
///
/// Missing keys are not errors: reads omit them, deletions ignore them. A
/// missing *object* is an error for reads and exclusive creates, so callers
/// can distinguish "no reservation" from "empty reservation".
#[async_trait]
pub trait OmapStore: Send + Sync {
    /// Creates an empty object, failing with `ObjectExists` if present.
    async fn create_object(&self, pool: &str, namespace: &str, oid: &str) -> OmapResult<()>;

    /// Removes an object and all of its keys.
    async fn remove_object(&self, pool: &str, namespace: &str, oid: &str) -> OmapResult<()>;

    /// Reads the requested keys; absent keys are omitted from the result.
    async fn get_keys(
        &self,
        pool: &str,
        namespace: &str,
        oid: &str,
        keys: &[String],
    ) -> OmapResult<HashMap<String, String>>;

    /// Writes key/value pairs, creating the object if needed.
    async fn set_keys(
        &self,
        pool: &str,
        namespace: &str,
        oid: &str,
        pairs: &HashMap<String, String>,
    ) -> OmapResult<()>;

    /// Removes keys from an object; absent keys are ignored.
    async fn remove_keys(
        &self,
        pool: &str,
        namespace: &str,
        oid: &str,
        keys: &[String],
    ) -> OmapResult<()>;
}

type ObjectKey = (String, String, String);

/// In-memory [`OmapStore`] implementation.
#[derive(Default)]
pub struct MemOmapStore {
    objects: Mutex<HashMap<ObjectKey, HashMap<String, String>>>,
}

impl MemOmapStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of objects held, across all pools and namespaces.
    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    /// True if the object exists.
    pub fn object_exists(&self, pool: &str, namespace: &str, oid: &str) -> bool {
        self.objects
            .lock()
            .contains_key(&object_key(pool, namespace, oid))
    }
}

fn object_key(pool: &str, namespace: &str, oid: &str) -> ObjectKey {
    (pool.to_string(), namespace.to_string(), oid.to_string())
}

#[async_trait]
impl OmapStore for MemOmapStore {
    async fn create_object(&self, pool: &str, namespace: &str, oid: &str) -> OmapResult<()> {
        let mut objects = self.objects.lock();
        let key = object_key(pool, namespace, oid);
        if objects.contains_key(&key) {
            return Err(OmapError::ObjectExists {
                oid: oid.to_string(),
            });
        }
        objects.insert(key, HashMap::new());

        Ok(())
    }

    async fn remove_object(&self, pool: &str, namespace: &str, oid: &str) -> OmapResult<()> {
        let mut objects = self.objects.lock();
        if objects.remove(&object_key(pool, namespace, oid)).is_none() {
            return Err(OmapError::ObjectNotFound {
                oid: oid.to_string(),
            });
        }

        Ok(())
    }

    async fn get_keys(
        &self,
        pool: &str,
        namespace: &str,
        oid: &str,
        keys: &[String],
    ) -> OmapResult<HashMap<String, String>> {
        let objects = self.objects.lock();
        let object = objects
            .get(&object_key(pool, namespace, oid))
            .ok_or_else(|| OmapError::ObjectNotFound {
                oid: oid.to_string(),
            })?;

        Ok(keys
            .iter()
            .filter_map(|k| object.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn set_keys(
        &self,
        pool: &str,
        namespace: &str,
        oid: &str,
        pairs: &HashMap<String, String>,
    ) -> OmapResult<()> {
        let mut objects = self.objects.lock();
        let object = objects.entry(object_key(pool, namespace, oid)).or_default();
        for (k, v) in pairs {
            object.insert(k.clone(), v.clone());
        }

        Ok(())
    }

    async fn remove_keys(
        &self,
        pool: &str,
        namespace: &str,
        oid: &str,
        keys: &[String],
    ) -> OmapResult<()> {
        let mut objects = self.objects.lock();
        let object = objects
            .get_mut(&object_key(pool, namespace, oid))
            .ok_or_else(|| OmapError::ObjectNotFound {
                oid: oid.to_string(),
            })?;
        for k in keys {
            object.remove(k);
        }

        Ok(())
    }
}
