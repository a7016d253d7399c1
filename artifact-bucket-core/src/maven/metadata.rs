//! # metadata: per group/artifact version-list documents
//!
//! A `maven-metadata.xml` next to each GA directory lists every version that
//! currently exists under it. The document is a projection of store state: it
//! is never patched from the diff of a release. After artifacts of a release
//! have been synced, [`recompute_aggregates`] lists each touched GA prefix on
//! the store and either rebuilds the document from scratch or, when no version
//! remains, schedules it (and its digest side files) for deletion.
//!
//! A failed scan only affects its own GA.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info};

use crate::config::Target;
use crate::contract::RemoteStore;
use crate::error::{DocumentError, FailureKind, StoreResult};
use crate::maven::version::{max_version, sort_versions};
use crate::maven::xml::{root_name, visit, Node, XmlDocument};
use crate::prodinfo::is_prodinfo;
use crate::sync::{MetadataDocument, SyncFailure};

pub const MAVEN_METADATA_FILE: &str = "maven-metadata.xml";

const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";

/// Group + artifact identity of a Maven component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupArtifact {
    pub group_id: String,
    pub artifact_id: String,
}

impl GroupArtifact {
    pub fn new(group_id: impl Into<String>, artifact_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
        }
    }

    /// Directory of this GA in a Maven layout, e.g. `org/foo/bar`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.group_id.replace('.', "/"), self.artifact_id)
    }

    pub fn metadata_key(&self) -> String {
        format!("{}/{MAVEN_METADATA_FILE}", self.path())
    }

    /// Parse `group/path/artifact/version/artifact-version[...]` into its GA
    /// and version. Side-cars and metadata documents are not artifacts.
    pub fn from_artifact_key(key: &str) -> Option<(Self, String)> {
        let parts: Vec<&str> = key.split('/').collect();
        if parts.len() < 4 || parts.iter().any(|p| p.is_empty()) {
            return None;
        }
        let n = parts.len();
        let (artifact, version, file) = (parts[n - 3], parts[n - 2], parts[n - 1]);
        if !is_artifact_file(artifact, version, file) {
            return None;
        }
        Some((Self::new(parts[..n - 3].join("."), artifact), version.to_string()))
    }
}

impl fmt::Display for GroupArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group_id, self.artifact_id)
    }
}

/// Whether `file` inside `artifact/version/` is a real artifact of that version.
fn is_artifact_file(artifact: &str, version: &str, file: &str) -> bool {
    if is_prodinfo(file) || file.starts_with(MAVEN_METADATA_FILE) {
        return false;
    }
    let base = version.strip_suffix(SNAPSHOT_SUFFIX).unwrap_or(version);
    file.starts_with(&format!("{artifact}-{version}")) || file.starts_with(&format!("{artifact}-{base}-"))
}

/// Collect the GAs touched by a set of artifact keys.
pub fn touched_group_artifacts<'a, I>(keys: I) -> BTreeSet<GroupArtifact>
where
    I: IntoIterator<Item = &'a str>,
{
    keys.into_iter()
        .filter_map(GroupArtifact::from_artifact_key)
        .map(|(ga, _)| ga)
        .collect()
}

/// Contents of one `maven-metadata.xml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionAggregate {
    pub ga: GroupArtifact,
    /// Ascending under [`crate::maven::version::compare_versions`].
    pub versions: Vec<String>,
    pub latest: String,
    pub release: String,
    /// `yyyyMMddHHmmss`, UTC
    pub last_updated: String,
}

impl VersionAggregate {
    /// Build the aggregate for a version set; `None` if the set is empty.
    pub fn new<I>(ga: GroupArtifact, versions: I, now: DateTime<Utc>) -> Option<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut versions: Vec<String> = versions.into_iter().collect();
        sort_versions(&mut versions);
        let latest = max_version(versions.iter().map(String::as_str))?.to_string();
        Some(Self {
            ga,
            versions,
            release: latest.clone(),
            latest,
            last_updated: now.format("%Y%m%d%H%M%S").to_string(),
        })
    }

    pub fn to_xml(&self) -> Result<Vec<u8>, DocumentError> {
        let key = self.ga.metadata_key();
        let mut doc = XmlDocument::new(&key)?;
        doc.open("metadata", &[])?;
        doc.text_element("groupId", &self.ga.group_id)?;
        doc.text_element("artifactId", &self.ga.artifact_id)?;
        doc.open("versioning", &[])?;
        doc.text_element("latest", &self.latest)?;
        doc.text_element("release", &self.release)?;
        doc.open("versions", &[])?;
        for version in &self.versions {
            doc.text_element("version", version)?;
        }
        doc.close("versions")?;
        doc.text_element("lastUpdated", &self.last_updated)?;
        doc.close("versioning")?;
        doc.close("metadata")?;
        Ok(doc.finish())
    }

    pub fn from_xml(key: &str, bytes: &[u8]) -> Result<Self, DocumentError> {
        if root_name(key, bytes)? != "metadata" {
            return Err(DocumentError::xml(key, "root element is not <metadata>"));
        }
        let mut group_id = None;
        let mut artifact_id = None;
        let mut latest = String::new();
        let mut release = String::new();
        let mut last_updated = String::new();
        let mut versions = Vec::new();

        visit(key, bytes, |node| {
            let Node::Text { path, text } = node else {
                return;
            };
            let path: Vec<&str> = path.iter().map(String::as_str).collect();
            match path.as_slice() {
                ["metadata", "groupId"] => group_id = Some(text.to_string()),
                ["metadata", "artifactId"] => artifact_id = Some(text.to_string()),
                ["metadata", "versioning", "latest"] => latest = text.to_string(),
                ["metadata", "versioning", "release"] => release = text.to_string(),
                ["metadata", "versioning", "lastUpdated"] => last_updated = text.to_string(),
                ["metadata", "versioning", "versions", "version"] => versions.push(text.to_string()),
                _ => {}
            }
        })?;

        Ok(Self {
            ga: GroupArtifact::new(
                group_id.ok_or_else(|| DocumentError::MissingField {
                    key: key.to_string(),
                    field: "groupId",
                })?,
                artifact_id.ok_or_else(|| DocumentError::MissingField {
                    key: key.to_string(),
                    field: "artifactId",
                })?,
            ),
            versions,
            latest,
            release,
            last_updated,
        })
    }
}

/// Versions currently present under a GA on the store.
///
/// A version counts when its directory holds at least one artifact named
/// after the GA and version.
pub async fn scan_versions<S>(store: &S, target: &Target, ga: &GroupArtifact) -> StoreResult<BTreeSet<String>>
where
    S: RemoteStore + ?Sized,
{
    let prefix = format!("{}/", ga.path());
    let listing = store.list(target, &prefix, None).await?;
    Ok(listing
        .keys
        .iter()
        .filter_map(|key| key.strip_prefix(&prefix))
        .filter_map(|rest| rest.split_once('/'))
        .filter(|(version, file)| !file.contains('/') && is_artifact_file(&ga.artifact_id, version, file))
        .map(|(version, _)| version.to_string())
        .collect())
}

/// Work produced by one aggregate recomputation on one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatePlan {
    pub to_upload: Vec<MetadataDocument>,
    pub to_delete: Vec<String>,
    pub failed: Vec<SyncFailure>,
}

enum GaResult {
    Upload(Vec<MetadataDocument>),
    Delete(Vec<String>),
    Failed(SyncFailure),
}

/// Rebuild the version-list documents of `touched` GAs from what `target`
/// holds right now, scanning at most `concurrency` GA prefixes at once.
pub async fn recompute_aggregates<S>(
    store: &S,
    touched: &BTreeSet<GroupArtifact>,
    target: &Target,
    now: DateTime<Utc>,
    concurrency: usize,
) -> AggregatePlan
where
    S: RemoteStore + ?Sized,
{
    info!(gas = touched.len(), target = %target.name, "[METADATA] Recomputing version aggregates");

    let results: Vec<GaResult> = stream::iter(touched.iter())
        .map(|ga| recompute_one(store, ga, target, now))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut plan = AggregatePlan::default();
    for result in results {
        match result {
            GaResult::Upload(documents) => plan.to_upload.extend(documents),
            GaResult::Delete(keys) => plan.to_delete.extend(keys),
            GaResult::Failed(failure) => plan.failed.push(failure),
        }
    }
    plan
}

async fn recompute_one<S>(store: &S, ga: &GroupArtifact, target: &Target, now: DateTime<Utc>) -> GaResult
where
    S: RemoteStore + ?Sized,
{
    let key = ga.metadata_key();
    let versions = match scan_versions(store, target, ga).await {
        Ok(versions) => versions,
        Err(e) => {
            error!(ga = %ga, target = %target.name, error = %e, "[METADATA] Failed to scan GA prefix");
            return GaResult::Failed(SyncFailure::new(target, key, FailureKind::AggregateScan(e.to_string())));
        }
    };

    let Some(aggregate) = VersionAggregate::new(ga.clone(), versions, now) else {
        info!(ga = %ga, target = %target.name, "[METADATA] No versions left, removing version list");
        return GaResult::Delete(MetadataDocument::family_keys(&key));
    };

    match aggregate.to_xml() {
        Ok(body) => {
            debug!(
                ga = %ga,
                target = %target.name,
                versions = aggregate.versions.len(),
                latest = %aggregate.latest,
                "[METADATA] Version list regenerated"
            );
            GaResult::Upload(MetadataDocument::new(key, body).with_digests())
        }
        Err(e) => GaResult::Failed(SyncFailure::new(target, key, e.into())),
    }
}
