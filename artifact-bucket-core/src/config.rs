use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::checksum::DigestAlgorithm;

/// Upper bound on in-flight per-file store operations.
pub const DEFAULT_CONCURRENCY: usize = 25;

/// One replication destination: a bucket plus a key prefix.
///
/// In a target list the first element is the main target; the rest are
/// replicas populated by store-to-store copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    /// npm registry host used when rewriting `dist.tarball`
    #[serde(default)]
    pub registry: Option<String>,
    /// CDN domain fronting this target, consumed by cache invalidation
    #[serde(default)]
    pub cf_domain: Option<String>,
}

impl Target {
    pub fn new(name: impl Into<String>, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bucket: bucket.into(),
            prefix: prefix.into(),
            registry: None,
            cf_domain: None,
        }
    }

    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    /// Store key for a relative artifact key, with the target prefix applied.
    pub fn full_key(&self, key: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        let key = key.trim_start_matches('/');
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}/{key}")
        }
    }

    /// Inverse of [`Target::full_key`]; `None` for keys outside the prefix.
    pub fn relative_key<'a>(&self, full_key: &'a str) -> Option<&'a str> {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            return Some(full_key);
        }
        full_key
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
    }

    pub fn trace_loaded(&self) {
        info!(
            target = %self.name,
            bucket = %self.bucket,
            prefix = %self.prefix,
            registry = self.registry.as_deref().unwrap_or("-"),
            "Loaded target"
        );
    }
}

/// Tunables for a [`crate::sync::SyncEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_hash_workers")]
    pub hash_workers: usize,
    #[serde(default)]
    pub digest: DigestAlgorithm,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_hash_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            hash_workers: default_hash_workers(),
            digest: DigestAlgorithm::default(),
        }
    }
}

impl SyncConfig {
    pub fn trace_loaded(&self) {
        info!(
            concurrency = self.concurrency,
            hash_workers = self.hash_workers,
            digest = ?self.digest,
            "Loaded SyncConfig"
        );
        debug!(?self, "SyncConfig loaded (full debug)");
    }
}
