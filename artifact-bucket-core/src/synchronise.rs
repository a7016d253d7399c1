//! Release-level reporting shared by the Maven and npm pipelines.
//!
//! A release runs in two phases per invocation: artifact sync across every
//! target, then (only after every artifact unit finished) metadata refresh on
//! each target. [`TargetReport`] carries the per-target result contract:
//! failed artifact keys, failed metadata keys, what was synced, and the CDN
//! paths that need invalidating.
//!
//! Two invocations touching the same GA or package are not coordinated; the
//! last writer of a metadata document or side-car wins.

use std::collections::BTreeSet;

use regex::Regex;
use tracing::{debug, info};

use crate::checksum::is_digest_file;
use crate::config::Target;
use crate::sync::{BatchReport, MetadataDocument, SyncEngine};
use crate::contract::RemoteStore;

/// Result of one release on one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetReport {
    pub target: String,
    /// Artifact keys that are in place on this target.
    pub synced: Vec<String>,
    pub failed_artifacts: Vec<String>,
    pub failed_metadata: Vec<String>,
    /// Metadata documents written or removed on this target.
    pub changed_metadata: Vec<String>,
    /// Paths for the cache-invalidation collaborator.
    pub invalidation_paths: Vec<String>,
}

impl TargetReport {
    pub fn new(target: &Target) -> Self {
        Self {
            target: target.name.clone(),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed_artifacts.is_empty() && self.failed_metadata.is_empty()
    }

    /// Fill artifact fields from the artifact batch of this release.
    pub(crate) fn record_artifacts(&mut self, keys: &[String], batch: &BatchReport) {
        let failed: BTreeSet<String> = batch
            .failures
            .iter()
            .filter(|f| f.target == self.target)
            .map(|f| f.key.clone())
            .collect();
        self.synced = keys.iter().filter(|k| !failed.contains(*k)).cloned().collect();
        self.failed_artifacts = failed.into_iter().collect();
    }

    /// Fill metadata fields from the metadata batches run on this target.
    pub(crate) fn record_metadata(&mut self, target: &Target, batch: BatchReport) {
        self.failed_metadata.extend(batch.failed_keys());
        self.changed_metadata.extend(batch.completed);
        self.failed_metadata.sort();
        self.failed_metadata.dedup();
        self.changed_metadata.sort();
        self.invalidation_paths = invalidation_paths(target, &self.changed_metadata);
    }
}

/// Results of one release across all targets, in target order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynchroniseReport {
    pub targets: Vec<TargetReport>,
}

impl SynchroniseReport {
    pub fn is_success(&self) -> bool {
        self.targets.iter().all(TargetReport::is_success)
    }

    pub fn target(&self, name: &str) -> Option<&TargetReport> {
        self.targets.iter().find(|t| t.target == name)
    }
}

/// Compiled ignore patterns matched against relative keys.
#[derive(Debug, Clone, Default)]
pub struct IgnorePatterns {
    patterns: Vec<Regex>,
}

impl IgnorePatterns {
    pub fn compile<I, P>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_ignored(&self, key: &str) -> bool {
        let ignored = self.patterns.iter().any(|p| p.is_match(key));
        if ignored {
            debug!(key = %key, "Ignoring file matched by ignore pattern");
        }
        ignored
    }
}

/// CDN paths covering changed metadata documents on `target`.
///
/// Digest side files are dropped and each document is wildcarded at its stem
/// (`dir/maven-metadata.*`) so one path covers the document and its digests.
pub fn invalidation_paths(target: &Target, changed: &[String]) -> Vec<String> {
    changed
        .iter()
        .filter(|key| !is_digest_file(key))
        .map(|key| {
            let (dir, file) = key.rsplit_once('/').map_or(("", key.as_str()), |(d, f)| (d, f));
            let stem = file.split_once('.').map_or(file, |(stem, _)| stem);
            let wildcard = if dir.is_empty() {
                format!("{stem}.*")
            } else {
                format!("{dir}/{stem}.*")
            };
            format!("/{}", target.full_key(&wildcard))
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Apply a target's metadata work: uploads first, then deletions.
pub(crate) async fn apply_metadata<S>(
    engine: &SyncEngine<S>,
    target: &Target,
    to_upload: &[MetadataDocument],
    to_delete: &[String],
) -> BatchReport
where
    S: RemoteStore + ?Sized,
{
    let mut batch = BatchReport::default();
    if !to_upload.is_empty() {
        batch.merge(engine.upload_metadata(to_upload, target).await);
    }
    if !to_delete.is_empty() {
        batch.merge(engine.delete_metadata(to_delete, target).await);
    }
    info!(
        target = %target.name,
        uploaded = to_upload.len(),
        deleted = to_delete.len(),
        failed = batch.failed_keys().len(),
        "[METADATA] Metadata refresh applied"
    );
    batch
}
