//! In-process [`RemoteStore`] backed by a sorted map.
//!
//! Objects are addressed by `(bucket, full key)` so target prefixes and
//! multi-bucket replication behave as they do against a real store.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::config::Target;
use crate::contract::{Listing, RemoteStore};
use crate::error::{StoreError, StoreResult};

/// A stored object with the attributes the engine relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

type ObjectMap = BTreeMap<(String, String), StoredObject>;

/// A simple in-memory object store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    objects: Arc<RwLock<ObjectMap>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, ObjectMap>> {
        self.objects
            .read()
            .map_err(|_| StoreError::other("in-memory store lock poisoned"))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, ObjectMap>> {
        self.objects
            .write()
            .map_err(|_| StoreError::other("in-memory store lock poisoned"))
    }

    /// Snapshot of one object, if present.
    pub fn object(&self, target: &Target, key: &str) -> Option<StoredObject> {
        self.read()
            .ok()?
            .get(&(target.bucket.clone(), target.full_key(key)))
            .cloned()
    }

    /// Body of one object as UTF-8 text, if present.
    pub fn text(&self, target: &Target, key: &str) -> Option<String> {
        self.object(target, key)
            .and_then(|o| String::from_utf8(o.body).ok())
    }

    /// Every key stored for `target`, relative to its prefix, in sorted order.
    pub fn keys(&self, target: &Target) -> Vec<String> {
        let Ok(objects) = self.read() else {
            return Vec::new();
        };
        objects
            .keys()
            .filter(|(bucket, _)| bucket == &target.bucket)
            .filter_map(|(_, full)| target.relative_key(full).map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn exists(&self, target: &Target, key: &str) -> StoreResult<bool> {
        Ok(self
            .read()?
            .contains_key(&(target.bucket.clone(), target.full_key(key))))
    }

    async fn metadata(&self, target: &Target, key: &str) -> StoreResult<HashMap<String, String>> {
        self.read()?
            .get(&(target.bucket.clone(), target.full_key(key)))
            .map(|o| o.metadata.clone())
            .ok_or_else(|| StoreError::not_found(target.full_key(key)))
    }

    async fn get(&self, target: &Target, key: &str) -> StoreResult<Vec<u8>> {
        self.read()?
            .get(&(target.bucket.clone(), target.full_key(key)))
            .map(|o| o.body.clone())
            .ok_or_else(|| StoreError::not_found(target.full_key(key)))
    }

    async fn put(
        &self,
        target: &Target,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> StoreResult<()> {
        self.write()?.insert(
            (target.bucket.clone(), target.full_key(key)),
            StoredObject {
                body,
                content_type: content_type.to_string(),
                metadata,
            },
        );
        Ok(())
    }

    async fn delete(&self, target: &Target, key: &str) -> StoreResult<()> {
        // Idempotent: ok even if not found
        self.write()?
            .remove(&(target.bucket.clone(), target.full_key(key)));
        Ok(())
    }

    async fn copy(
        &self,
        source: &Target,
        source_key: &str,
        destination: &Target,
        destination_key: &str,
    ) -> StoreResult<()> {
        let mut objects = self.write()?;
        let object = objects
            .get(&(source.bucket.clone(), source.full_key(source_key)))
            .cloned()
            .ok_or_else(|| StoreError::not_found(source.full_key(source_key)))?;
        objects.insert(
            (destination.bucket.clone(), destination.full_key(destination_key)),
            object,
        );
        Ok(())
    }

    async fn list(&self, target: &Target, prefix: &str, delimiter: Option<char>) -> StoreResult<Listing> {
        let full_prefix = target.full_key(prefix);
        let objects = self.read()?;
        let mut common_prefixes = BTreeSet::new();
        let mut keys = Vec::new();

        for (bucket, full_key) in objects.keys() {
            if bucket != &target.bucket || !full_key.starts_with(&full_prefix) {
                continue;
            }
            let Some(relative) = target.relative_key(full_key) else {
                continue;
            };
            let below = &full_key[full_prefix.len()..];
            match delimiter.and_then(|d| below.find(d).map(|idx| (d, idx))) {
                Some((d, idx)) => {
                    common_prefixes.insert(format!("{prefix}{}{d}", &below[..idx]));
                }
                None => keys.push(relative.to_string()),
            }
        }

        Ok(Listing {
            common_prefixes: common_prefixes.into_iter().collect(),
            keys,
        })
    }
}
