//! # release: uploading and rolling back a whole Maven release
//!
//! A release is a directory laid out like a Maven repository. Upload pushes
//! its artifacts to every target (reference-counted by product), then, once
//! the whole artifact batch is done, rebuilds the `maven-metadata.xml` of each
//! touched GA from what the target actually holds and merges the release's
//! archetype catalog, if it ships one. Delete is the mirror image.
//!
//! Metadata files found in the release directory itself are never uploaded
//! as artifacts; the store's copies are always regenerated.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::config::Target;
use crate::contract::RemoteStore;
use crate::error::FailureKind;
use crate::maven::archetype::{
    merge_on_delete, merge_on_upload, parse_catalog, render_catalog, ArchetypeEntry, CatalogAction,
    ARCHETYPE_CATALOG_FILE,
};
use crate::maven::metadata::{recompute_aggregates, touched_group_artifacts, GroupArtifact, MAVEN_METADATA_FILE};
use crate::prodinfo::is_prodinfo;
use crate::sync::{relative_key, BatchReport, MetadataDocument, SyncEngine, SyncFailure};
use crate::synchronise::{apply_metadata, IgnorePatterns, SynchroniseReport, TargetReport};

/// Files of one release directory, split by role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseFiles {
    /// Artifacts to be reference-counted on the store.
    pub artifacts: Vec<PathBuf>,
    /// Relative keys of `artifacts`, same order.
    pub keys: Vec<String>,
    /// Root-level `archetype-catalog.xml`, when the release ships one.
    pub catalog: Option<PathBuf>,
}

impl ReleaseFiles {
    /// Classify `files` found under `root`.
    pub fn select(files: &[PathBuf], root: &Path, ignore: &IgnorePatterns) -> Self {
        let mut selected = Self::default();
        for path in files {
            let Some(key) = relative_key(path, root) else {
                // Reported as a local read failure by the sync engine.
                selected.artifacts.push(path.clone());
                selected.keys.push(path.display().to_string());
                continue;
            };
            if ignore.is_ignored(&key) {
                continue;
            }
            if key == ARCHETYPE_CATALOG_FILE {
                selected.catalog = Some(path.clone());
                continue;
            }
            let file = key.rsplit('/').next().unwrap_or(&key);
            if is_prodinfo(file)
                || file.starts_with(MAVEN_METADATA_FILE)
                || file.starts_with(ARCHETYPE_CATALOG_FILE)
            {
                continue;
            }
            selected.artifacts.push(path.clone());
            selected.keys.push(key);
        }
        selected
    }

    pub fn touched(&self) -> BTreeSet<GroupArtifact> {
        touched_group_artifacts(self.keys.iter().map(String::as_str))
    }

    /// Entries of the shipped catalog. An unreadable catalog is skipped.
    pub async fn load_catalog(&self) -> Option<Vec<ArchetypeEntry>> {
        let path = self.catalog.as_ref()?;
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "[CATALOG] Cannot read local archetype catalog, skipping catalog merge");
                return None;
            }
        };
        match parse_catalog(ARCHETYPE_CATALOG_FILE, &bytes) {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "[CATALOG] Local archetype catalog is corrupt, skipping catalog merge");
                None
            }
        }
    }
}

#[derive(Clone, Copy)]
enum CatalogStep<'a> {
    Merge(Option<&'a [ArchetypeEntry]>),
    Unmerge(Option<&'a [ArchetypeEntry]>),
}

/// Upload a Maven release directory to every target.
pub async fn upload_maven<S>(
    engine: &SyncEngine<S>,
    files: &[PathBuf],
    root: &Path,
    product: &str,
    targets: &[Target],
    ignore: &IgnorePatterns,
    now: DateTime<Utc>,
) -> SynchroniseReport
where
    S: RemoteStore + ?Sized,
{
    let release = ReleaseFiles::select(files, root, ignore);
    info!(
        product,
        artifacts = release.artifacts.len(),
        catalog = release.catalog.is_some(),
        "[RELEASE] Uploading Maven release"
    );

    let artifacts = engine
        .sync_upload(&release.artifacts, targets, Some(product), root)
        .await;
    let catalog = release.load_catalog().await;

    finish_release(engine, &release, &artifacts, targets, CatalogStep::Merge(catalog.as_deref()), now).await
}

/// Roll back a Maven release directory on every target.
pub async fn delete_maven<S>(
    engine: &SyncEngine<S>,
    files: &[PathBuf],
    root: &Path,
    product: &str,
    targets: &[Target],
    ignore: &IgnorePatterns,
    now: DateTime<Utc>,
) -> SynchroniseReport
where
    S: RemoteStore + ?Sized,
{
    let release = ReleaseFiles::select(files, root, ignore);
    info!(
        product,
        artifacts = release.artifacts.len(),
        catalog = release.catalog.is_some(),
        "[RELEASE] Rolling back Maven release"
    );

    let artifacts = engine
        .sync_delete(&release.artifacts, targets, Some(product), root)
        .await;
    let catalog = release.load_catalog().await;

    finish_release(engine, &release, &artifacts, targets, CatalogStep::Unmerge(catalog.as_deref()), now).await
}

/// Second phase: runs only after the artifact batch has fully completed.
async fn finish_release<S>(
    engine: &SyncEngine<S>,
    release: &ReleaseFiles,
    artifacts: &BatchReport,
    targets: &[Target],
    catalog: CatalogStep<'_>,
    now: DateTime<Utc>,
) -> SynchroniseReport
where
    S: RemoteStore + ?Sized,
{
    let touched = release.touched();
    let mut report = SynchroniseReport::default();
    for target in targets {
        let mut target_report = TargetReport::new(target);
        target_report.record_artifacts(&release.keys, artifacts);

        let batch = refresh_metadata(engine, target, &touched, catalog, now).await;
        target_report.record_metadata(target, batch);

        info!(
            target = %target.name,
            synced = target_report.synced.len(),
            failed_artifacts = target_report.failed_artifacts.len(),
            failed_metadata = target_report.failed_metadata.len(),
            "[RELEASE] Target finished"
        );
        report.targets.push(target_report);
    }
    report
}

async fn refresh_metadata<S>(
    engine: &SyncEngine<S>,
    target: &Target,
    touched: &BTreeSet<GroupArtifact>,
    catalog: CatalogStep<'_>,
    now: DateTime<Utc>,
) -> BatchReport
where
    S: RemoteStore + ?Sized,
{
    let plan = recompute_aggregates(engine.store(), touched, target, now, engine.config().concurrency).await;
    let mut to_upload = plan.to_upload;
    let mut to_delete = plan.to_delete;
    let mut failed = plan.failed;

    let action = match catalog {
        CatalogStep::Merge(Some(local)) => Some(merge_on_upload(engine.store(), Some(local), target).await),
        CatalogStep::Unmerge(Some(local)) => Some(merge_on_delete(engine.store(), local, target).await),
        CatalogStep::Merge(None) | CatalogStep::Unmerge(None) => None,
    };
    match action {
        None | Some(Ok(CatalogAction::NoOp)) => {}
        Some(Ok(CatalogAction::Upload(entries))) => match render_catalog(&entries) {
            Ok(body) => to_upload.extend(MetadataDocument::new(ARCHETYPE_CATALOG_FILE, body).with_digests()),
            Err(e) => failed.push(SyncFailure::new(target, ARCHETYPE_CATALOG_FILE, e.into())),
        },
        Some(Ok(CatalogAction::Delete)) => to_delete.extend(MetadataDocument::family_keys(ARCHETYPE_CATALOG_FILE)),
        Some(Err(e)) => {
            error!(target = %target.name, error = %e, "[CATALOG] Failed to read stored archetype catalog");
            failed.push(SyncFailure::new(target, ARCHETYPE_CATALOG_FILE, FailureKind::Store(e)));
        }
    }

    let mut batch = apply_metadata(engine, target, &to_upload, &to_delete).await;
    batch.failures.extend(failed);
    batch
}
