//! # release: publishing and rolling back one npm package version
//!
//! Layout on every target:
//! - `{name}/-/{tarball}`: the package tarball (reference-counted)
//! - `{name}/{version}/package.json`: that version's own document (reference-counted)
//! - `{name}/package.json`: the package document, regenerated after every release
//!
//! The package document is merged into whatever the target holds on upload,
//! and rebuilt from the remaining version documents on delete.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::Target;
use crate::contract::{get_optional, RemoteStore};
use crate::error::{DocumentError, FailureKind, StoreResult};
use crate::npm::document::PackageDocument;
use crate::npm::merge::{merge, rebuild};
use crate::sync::{BatchReport, MetadataDocument, SyncEngine, SyncFailure};
use crate::synchronise::{apply_metadata, SynchroniseReport, TargetReport};

pub const PACKAGE_METADATA_FILE: &str = "package.json";

const TARBALL_DIR: &str = "-";

pub fn tarball_key(name: &str, file: &str) -> String {
    format!("{name}/{TARBALL_DIR}/{file}")
}

pub fn version_document_key(name: &str, version: &str) -> String {
    format!("{name}/{version}/{PACKAGE_METADATA_FILE}")
}

pub fn package_document_key(name: &str) -> String {
    format!("{name}/{PACKAGE_METADATA_FILE}")
}

/// One npm package version ready to publish: its tarball and the
/// `package.json` shipped inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct NpmPackage {
    pub tarball: PathBuf,
    pub name: String,
    pub version: String,
    pub version_document: Value,
}

impl NpmPackage {
    pub fn new(tarball: impl Into<PathBuf>, version_document: Value) -> Result<Self, DocumentError> {
        let tarball = tarball.into();
        let key = tarball.display().to_string();
        let projected = PackageDocument::from_version(&key, &version_document)?;
        let version = projected
            .own_version()
            .map(str::to_string)
            .ok_or(DocumentError::MissingField { key, field: "version" })?;
        Ok(Self {
            tarball,
            name: projected.name,
            version,
            version_document,
        })
    }

    /// Read the version document from `package_json` on disk.
    pub async fn load(tarball: impl Into<PathBuf>, package_json: &Path) -> Result<Self, FailureKind> {
        let bytes = tokio::fs::read(package_json)
            .await
            .map_err(|e| FailureKind::LocalRead(format!("{}: {e}", package_json.display())))?;
        let document: Value = serde_json::from_slice(&bytes)
            .map_err(|e| DocumentError::json(package_json.display().to_string(), e))?;
        Ok(Self::new(tarball, document)?)
    }

    pub fn tarball_file(&self) -> String {
        self.tarball
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}-{}.tgz", self.name.rsplit('/').next().unwrap_or(&self.name), self.version))
    }

    pub fn tarball_key(&self) -> String {
        tarball_key(&self.name, &self.tarball_file())
    }

    pub fn version_document_key(&self) -> String {
        version_document_key(&self.name, &self.version)
    }

    pub fn package_document_key(&self) -> String {
        package_document_key(&self.name)
    }

    /// The version document with `dist.tarball` pointing at `registry`.
    pub fn published_document(&self, registry: Option<&str>) -> Value {
        let mut document = self.version_document.clone();
        let Some(registry) = registry else {
            return document;
        };
        let url = format!("https://{}/{}", registry.trim_end_matches('/'), self.tarball_key());
        if let Some(object) = document.as_object_mut() {
            let dist = object
                .entry("dist")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Some(dist) = dist.as_object_mut() {
                dist.insert("tarball".to_string(), Value::String(url));
            }
        }
        document
    }

    fn failed_report(&self, targets: &[Target], kind: FailureKind) -> SynchroniseReport {
        let keys = [self.tarball_key(), self.version_document_key()];
        SynchroniseReport {
            targets: targets
                .iter()
                .map(|target| TargetReport {
                    target: target.name.clone(),
                    failed_artifacts: keys.to_vec(),
                    ..TargetReport::default()
                })
                .inspect(|report| {
                    error!(target = %report.target, package = %self.name, error = %kind, "[NPM] Release aborted")
                })
                .collect(),
        }
    }
}

/// Publish one package version to every target.
pub async fn upload_npm<S>(
    engine: &SyncEngine<S>,
    package: &NpmPackage,
    product: &str,
    targets: &[Target],
) -> SynchroniseReport
where
    S: RemoteStore + ?Sized,
{
    info!(package = %package.name, version = %package.version, product, "[NPM] Uploading package version");
    let registry = targets.first().and_then(|t| t.registry.as_deref());
    let published = package.published_document(registry);

    let staging = match stage(package, &published).await {
        Ok(staging) => staging,
        Err(e) => return package.failed_report(targets, FailureKind::LocalRead(e.to_string())),
    };
    let keys = vec![package.tarball_key(), package.version_document_key()];
    let files: Vec<PathBuf> = keys.iter().map(|key| staging.path().join(key)).collect();
    let artifacts = engine
        .sync_upload(&files, targets, Some(product), staging.path())
        .await;

    let incoming = match PackageDocument::from_version(&package.version_document_key(), &published) {
        Ok(document) => document,
        Err(e) => return package.failed_report(targets, e.into()),
    };

    let mut report = SynchroniseReport::default();
    for target in targets {
        let mut target_report = TargetReport::new(target);
        target_report.record_artifacts(&keys, &artifacts);

        let batch = if target_report.failed_artifacts.contains(&package.version_document_key()) {
            warn!(
                package = %package.name,
                target = %target.name,
                "[NPM] Version document not in place, leaving package document untouched"
            );
            BatchReport::default()
        } else {
            merge_package_document(engine, target, package, incoming.clone()).await
        };
        target_report.record_metadata(target, batch);
        report.targets.push(target_report);
    }
    report
}

/// Remove `product`'s claim on one package version from every target.
pub async fn delete_npm<S>(
    engine: &SyncEngine<S>,
    package: &NpmPackage,
    product: &str,
    targets: &[Target],
) -> SynchroniseReport
where
    S: RemoteStore + ?Sized,
{
    info!(package = %package.name, version = %package.version, product, "[NPM] Rolling back package version");
    let keys = vec![package.tarball_key(), package.version_document_key()];
    let artifacts = engine.delete_keys(&keys, targets, Some(product)).await;

    let mut report = SynchroniseReport::default();
    for target in targets {
        let mut target_report = TargetReport::new(target);
        target_report.record_artifacts(&keys, &artifacts);
        let batch = rebuild_package_document(engine, target, &package.name).await;
        target_report.record_metadata(target, batch);
        report.targets.push(target_report);
    }
    report
}

async fn stage(package: &NpmPackage, published: &Value) -> std::io::Result<tempfile::TempDir> {
    let staging = tempfile::tempdir()?;
    let tarball = staging.path().join(package.tarball_key());
    let document = staging.path().join(package.version_document_key());
    for path in [&tarball, &document] {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::copy(&package.tarball, &tarball).await?;
    let body = serde_json::to_vec_pretty(published).map_err(std::io::Error::other)?;
    tokio::fs::write(&document, body).await?;
    Ok(staging)
}

async fn merge_package_document<S>(
    engine: &SyncEngine<S>,
    target: &Target,
    package: &NpmPackage,
    incoming: PackageDocument,
) -> BatchReport
where
    S: RemoteStore + ?Sized,
{
    let key = package.package_document_key();
    let original = match get_optional(engine.store(), target, &key).await {
        Ok(None) => None,
        Ok(Some(bytes)) => match PackageDocument::from_slice(&key, &bytes) {
            Ok(document) => Some(document),
            Err(e) => {
                warn!(key = %key, target = %target.name, error = %e, "[NPM] Stored package document is corrupt, overwriting it");
                None
            }
        },
        Err(e) => {
            error!(key = %key, target = %target.name, error = %e, "[NPM] Failed to read stored package document");
            return failed(target, key, e.into());
        }
    };

    let merged = merge(original, incoming);
    match merged.to_json() {
        Ok(body) => apply_metadata(engine, target, &MetadataDocument::new(key, body).with_digests(), &[]).await,
        Err(e) => failed(target, key, e.into()),
    }
}

async fn rebuild_package_document<S>(engine: &SyncEngine<S>, target: &Target, name: &str) -> BatchReport
where
    S: RemoteStore + ?Sized,
{
    let key = package_document_key(name);
    let siblings = match read_version_documents(engine.store(), target, name).await {
        Ok(siblings) => siblings,
        Err(e) => {
            error!(package = %name, target = %target.name, error = %e, "[NPM] Failed to list remaining versions");
            return failed(target, key, FailureKind::AggregateScan(e.to_string()));
        }
    };
    info!(package = %name, target = %target.name, remaining = siblings.len(), "[NPM] Rebuilding package document");

    match rebuild(siblings) {
        None => apply_metadata(engine, target, &[], &MetadataDocument::family_keys(&key)).await,
        Some(document) => match document.to_json() {
            Ok(body) => apply_metadata(engine, target, &MetadataDocument::new(key, body).with_digests(), &[]).await,
            Err(e) => failed(target, key, e.into()),
        },
    }
}

/// Every `{name}/{version}/package.json` still on `target`, projected into
/// single-version package documents. Unreadable ones are skipped.
async fn read_version_documents<S>(store: &S, target: &Target, name: &str) -> StoreResult<Vec<PackageDocument>>
where
    S: RemoteStore + ?Sized,
{
    let prefix = format!("{name}/");
    let listing = store.list(target, &prefix, Some('/')).await?;

    let mut documents = Vec::new();
    for version_dir in &listing.common_prefixes {
        let Some(version) = version_dir.strip_prefix(&prefix).map(|v| v.trim_end_matches('/')) else {
            continue;
        };
        if version == TARBALL_DIR || version.is_empty() {
            continue;
        }
        let key = version_document_key(name, version);
        let Some(bytes) = get_optional(store, target, &key).await? else {
            continue;
        };
        let parsed = serde_json::from_slice::<Value>(&bytes)
            .map_err(|e| DocumentError::json(&key, e))
            .and_then(|value| PackageDocument::from_version(&key, &value));
        match parsed {
            Ok(document) => documents.push(document),
            Err(e) => warn!(key = %key, target = %target.name, error = %e, "[NPM] Skipping unreadable version document"),
        }
    }
    Ok(documents)
}

fn failed(target: &Target, key: String, kind: FailureKind) -> BatchReport {
    BatchReport {
        completed: Vec::new(),
        failures: vec![SyncFailure::new(target, key, kind)],
    }
}
