//! # sync: reference-counted artifact upload and delete
//!
//! [`SyncEngine`] pushes a batch of local files into one or more [`Target`]s
//! and removes them again, keeping a product reference side-car next to every
//! artifact (see [`crate::prodinfo`]).
//!
//! ## Upload, per file
//! The file is read and digested once. Targets are then processed in declared
//! order: an absent key is PUT on the main target and server-side copied from
//! the main target to each replica; a present key is compared against its
//! recorded checksum. A mismatch is a [`FailureKind::ContentConflict`] and
//! leaves the object and its owners untouched. On success the product is
//! added to the owner set.
//!
//! ## Delete, per file and target
//! A missing key is already satisfied. With a product, the product is removed
//! from the owner set and the object goes only when no owner remains. Without
//! a product the object is deleted unconditionally (metadata-class removal).
//!
//! ## Concurrency
//! Every file is an independent unit. Units run concurrently on the calling
//! task, gated by a semaphore of [`SyncConfig::concurrency`] permits; file
//! hashing runs on the bounded [`HashPool`]. Each unit returns its own
//! outcome and the batch report is assembled once all of them finish. There
//! is no cancellation and no compensation for units that already succeeded.

use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, error, info, warn};

use crate::checksum::{DigestAlgorithm, HashPool};
use crate::config::{SyncConfig, Target};
use crate::contract::{content_type_for, delete_if_present, get_optional, RemoteStore, CHECKSUM_METADATA_KEY};
use crate::error::{FailureKind, StoreError, StoreResult};
use crate::prodinfo::{prodinfo_key, ProductReference};

/// One file (or document) that failed on one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub target: String,
    pub key: String,
    pub kind: FailureKind,
}

impl SyncFailure {
    pub fn new(target: &Target, key: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            target: target.name.clone(),
            key: key.into(),
            kind,
        }
    }
}

/// Outcome of one batch call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Keys that succeeded on every target.
    pub completed: Vec<String>,
    pub failures: Vec<SyncFailure>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Distinct failed keys, sorted.
    pub fn failed_keys(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|f| f.key.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn failures_for<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a SyncFailure> + 'a {
        self.failures.iter().filter(move |f| f.target == target)
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.completed.extend(other.completed);
        self.failures.extend(other.failures);
    }

    fn absorb(&mut self, outcome: FileOutcome) {
        if outcome.failures.is_empty() {
            self.completed.push(outcome.key);
        } else {
            self.failures.extend(outcome.failures);
        }
    }
}

struct FileOutcome {
    key: String,
    failures: Vec<SyncFailure>,
}

impl FileOutcome {
    fn ok(key: String) -> Self {
        Self {
            key,
            failures: Vec::new(),
        }
    }

    fn failed_on_all(key: String, targets: &[Target], kind: FailureKind) -> Self {
        let failures = targets
            .iter()
            .map(|t| SyncFailure::new(t, key.clone(), kind.clone()))
            .collect();
        Self { key, failures }
    }
}

/// A generated document to be stored as-is (no reference counting).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataDocument {
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
}

impl MetadataDocument {
    pub fn new(key: impl Into<String>, body: Vec<u8>) -> Self {
        let key = key.into();
        let content_type = content_type_for(&key).to_string();
        Self {
            key,
            body,
            content_type,
        }
    }

    /// This document followed by one digest side file per algorithm.
    pub fn with_digests(self) -> Vec<MetadataDocument> {
        let mut documents: Vec<MetadataDocument> = DigestAlgorithm::ALL
            .iter()
            .map(|alg| {
                MetadataDocument::new(
                    format!("{}.{}", self.key, alg.extension()),
                    alg.digest_hex(&self.body).into_bytes(),
                )
            })
            .collect();
        documents.insert(0, self);
        documents
    }

    /// `key` and the keys of its digest side files.
    pub fn family_keys(key: &str) -> Vec<String> {
        std::iter::once(key.to_string())
            .chain(
                DigestAlgorithm::ALL
                    .iter()
                    .map(|alg| format!("{key}.{}", alg.extension())),
            )
            .collect()
    }
}

/// Where a target's copy of a new object comes from.
enum Source<'a> {
    /// File contents, PUT on the main target.
    Body(Vec<u8>),
    /// Server-side copy from the main target.
    CopyFrom(&'a Target),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeleteOutcome {
    Absent,
    Retained(usize),
    Removed,
}

/// POSIX-style store key of `path` relative to `root`.
pub fn relative_key(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Batch upload/delete engine over a [`RemoteStore`].
pub struct SyncEngine<S: RemoteStore + ?Sized> {
    store: Arc<S>,
    config: SyncConfig,
    hashes: HashPool,
    limiter: Semaphore,
}

impl<S: RemoteStore + ?Sized> SyncEngine<S> {
    pub fn new(store: Arc<S>, config: SyncConfig) -> Self {
        let hashes = HashPool::new(config.hash_workers, config.digest);
        let limiter = Semaphore::new(config.concurrency.max(1));
        Self {
            store,
            config,
            hashes,
            limiter,
        }
    }

    pub fn store(&self) -> &S {
        self.store.as_ref()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    async fn permit(&self) -> StoreResult<SemaphorePermit<'_>> {
        self.limiter
            .acquire()
            .await
            .map_err(|_| StoreError::other("sync limiter closed"))
    }

    /// Upload `files` (absolute paths under `root`) to every target.
    ///
    /// Never fails as a whole: each file's problems are in the returned report.
    pub async fn sync_upload(
        &self,
        files: &[PathBuf],
        targets: &[Target],
        product: Option<&str>,
        root: &Path,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        if targets.is_empty() {
            warn!("[UPLOAD] No targets given, nothing to upload");
            return report;
        }
        info!(
            files = files.len(),
            targets = targets.len(),
            product = product.unwrap_or("-"),
            "[UPLOAD] Starting artifact upload batch"
        );

        let mut units = FuturesUnordered::new();
        for path in files {
            match relative_key(path, root) {
                Some(key) => units.push(self.upload_file(path.clone(), key, targets, product)),
                None => {
                    error!(path = %path.display(), root = %root.display(), "[UPLOAD] File is not under the release root");
                    report.absorb(FileOutcome::failed_on_all(
                        path.display().to_string(),
                        targets,
                        FailureKind::LocalRead(format!("not under root {}", root.display())),
                    ));
                }
            }
        }
        while let Some(outcome) = units.next().await {
            report.absorb(outcome);
        }

        info!(
            completed = report.completed.len(),
            failed = report.failed_keys().len(),
            "[UPLOAD] Artifact upload batch finished"
        );
        report
    }

    async fn upload_file(
        &self,
        path: PathBuf,
        key: String,
        targets: &[Target],
        product: Option<&str>,
    ) -> FileOutcome {
        let _permit = match self.permit().await {
            Ok(permit) => permit,
            Err(e) => return FileOutcome::failed_on_all(key, targets, e.into()),
        };

        let (bytes, checksum) = match self.hashes.read_and_digest(path.clone()).await {
            Ok(read) => read,
            Err(e) => {
                error!(path = %path.display(), error = ?e, "[UPLOAD] Failed to read local file");
                return FileOutcome::failed_on_all(key, targets, FailureKind::LocalRead(e.to_string()));
            }
        };
        let content_type = content_type_for(&key);

        let main = &targets[0];
        let mut body = Some(bytes);
        let mut failures = Vec::new();
        let mut main_failed = false;
        for (idx, target) in targets.iter().enumerate() {
            let source = match idx {
                0 => Source::Body(body.take().unwrap_or_default()),
                _ if main_failed => {
                    failures.push(SyncFailure::new(
                        target,
                        key.clone(),
                        FailureKind::MainTargetFailed(main.name.clone()),
                    ));
                    continue;
                }
                _ => Source::CopyFrom(main),
            };
            let result = self
                .upload_to_target(&key, source, &checksum, content_type, target, product)
                .await;
            if let Err(kind) = result {
                error!(key = %key, target = %target.name, error = %kind, "[UPLOAD] Upload failed");
                main_failed |= idx == 0;
                failures.push(SyncFailure::new(target, key.clone(), kind));
            }
        }

        FileOutcome { key, failures }
    }

    async fn upload_to_target(
        &self,
        key: &str,
        source: Source<'_>,
        checksum: &str,
        content_type: &str,
        target: &Target,
        product: Option<&str>,
    ) -> Result<(), FailureKind> {
        if self.store.exists(target, key).await? {
            self.verify_existing(key, checksum, target).await?;
            if let Some(product) = product {
                self.add_product(target, key, product).await?;
            }
            return Ok(());
        }

        match source {
            Source::Body(body) => {
                let metadata = HashMap::from([(CHECKSUM_METADATA_KEY.to_string(), checksum.to_string())]);
                self.store.put(target, key, body, content_type, metadata).await?;
                debug!(key = %key, target = %target.name, "[UPLOAD] Stored new object");
            }
            Source::CopyFrom(main) => {
                self.store.copy(main, key, target, key).await?;
                debug!(key = %key, target = %target.name, source = %main.name, "[UPLOAD] Copied object from main target");
            }
        }

        // A new object starts a fresh owner set.
        match product {
            Some(product) => {
                let mut reference = ProductReference::default();
                reference.add(product);
                self.write_reference(target, key, &reference).await?;
            }
            None => delete_if_present(self.store.as_ref(), target, &prodinfo_key(key)).await?,
        }
        Ok(())
    }

    async fn verify_existing(&self, key: &str, checksum: &str, target: &Target) -> Result<(), FailureKind> {
        let metadata = self.store.metadata(target, key).await?;
        match metadata.get(CHECKSUM_METADATA_KEY) {
            Some(stored) if !stored.eq_ignore_ascii_case(checksum) => {
                warn!(
                    key = %key,
                    target = %target.name,
                    stored = %stored,
                    local = %checksum,
                    "[UPLOAD] Checksum conflict, refusing to overwrite existing object"
                );
                Err(FailureKind::ContentConflict {
                    stored: stored.clone(),
                    local: checksum.to_string(),
                })
            }
            Some(_) => {
                debug!(key = %key, target = %target.name, "[UPLOAD] Object already present with same checksum");
                Ok(())
            }
            None => {
                warn!(key = %key, target = %target.name, "[UPLOAD] Existing object has no recorded checksum, treating as identical");
                Ok(())
            }
        }
    }

    async fn read_reference(&self, target: &Target, key: &str) -> StoreResult<ProductReference> {
        Ok(get_optional(self.store.as_ref(), target, &prodinfo_key(key))
            .await?
            .map(|bytes| ProductReference::from_bytes(&bytes))
            .unwrap_or_default())
    }

    async fn write_reference(&self, target: &Target, key: &str, reference: &ProductReference) -> StoreResult<()> {
        self.store
            .put(target, &prodinfo_key(key), reference.to_bytes(), "text/plain", HashMap::new())
            .await
    }

    async fn add_product(&self, target: &Target, key: &str, product: &str) -> StoreResult<()> {
        let mut reference = self.read_reference(target, key).await?;
        if !reference.add(product) {
            debug!(key = %key, target = %target.name, product, "[UPLOAD] Product already references object");
            return Ok(());
        }
        self.write_reference(target, key, &reference).await?;
        debug!(key = %key, target = %target.name, product, owners = reference.len(), "[UPLOAD] Product reference added");
        Ok(())
    }

    /// Remove `files` (absolute paths under `root`) from every target.
    pub async fn sync_delete(
        &self,
        files: &[PathBuf],
        targets: &[Target],
        product: Option<&str>,
        root: &Path,
    ) -> BatchReport {
        let mut keys = Vec::with_capacity(files.len());
        let mut report = BatchReport::default();
        for path in files {
            match relative_key(path, root) {
                Some(key) => keys.push(key),
                None => {
                    error!(path = %path.display(), root = %root.display(), "[DELETE] File is not under the release root");
                    report.absorb(FileOutcome::failed_on_all(
                        path.display().to_string(),
                        targets,
                        FailureKind::LocalRead(format!("not under root {}", root.display())),
                    ));
                }
            }
        }
        report.merge(self.delete_keys(&keys, targets, product).await);
        report
    }

    /// Remove already-relative `keys` from every target.
    pub async fn delete_keys(&self, keys: &[String], targets: &[Target], product: Option<&str>) -> BatchReport {
        info!(
            keys = keys.len(),
            targets = targets.len(),
            product = product.unwrap_or("-"),
            "[DELETE] Starting delete batch"
        );
        let mut units: FuturesUnordered<_> = keys
            .iter()
            .map(|key| self.delete_file(key.clone(), targets, product))
            .collect();

        let mut report = BatchReport::default();
        while let Some(outcome) = units.next().await {
            report.absorb(outcome);
        }
        info!(
            completed = report.completed.len(),
            failed = report.failed_keys().len(),
            "[DELETE] Delete batch finished"
        );
        report
    }

    async fn delete_file(&self, key: String, targets: &[Target], product: Option<&str>) -> FileOutcome {
        let _permit = match self.permit().await {
            Ok(permit) => permit,
            Err(e) => return FileOutcome::failed_on_all(key, targets, e.into()),
        };

        let mut failures = Vec::new();
        for target in targets {
            match self.delete_from_target(target, &key, product).await {
                Ok(DeleteOutcome::Absent) => {
                    debug!(key = %key, target = %target.name, "[DELETE] Object already absent")
                }
                Ok(DeleteOutcome::Retained(owners)) => {
                    info!(key = %key, target = %target.name, owners, "[DELETE] Object still referenced, kept")
                }
                Ok(DeleteOutcome::Removed) => {
                    debug!(key = %key, target = %target.name, "[DELETE] Object removed")
                }
                Err(kind) => {
                    error!(key = %key, target = %target.name, error = %kind, "[DELETE] Delete failed");
                    failures.push(SyncFailure::new(target, key.clone(), kind));
                }
            }
        }
        if failures.is_empty() {
            FileOutcome::ok(key)
        } else {
            FileOutcome { key, failures }
        }
    }

    async fn delete_from_target(
        &self,
        target: &Target,
        key: &str,
        product: Option<&str>,
    ) -> Result<DeleteOutcome, FailureKind> {
        if !self.store.exists(target, key).await? {
            return Ok(DeleteOutcome::Absent);
        }
        let Some(product) = product else {
            self.remove_object(target, key).await?;
            return Ok(DeleteOutcome::Removed);
        };

        let mut reference = self.read_reference(target, key).await?;
        if !reference.remove(product) {
            debug!(key = %key, target = %target.name, product, "[DELETE] Product was not an owner");
        }
        if reference.is_empty() {
            self.remove_object(target, key).await?;
            Ok(DeleteOutcome::Removed)
        } else {
            self.write_reference(target, key, &reference).await?;
            Ok(DeleteOutcome::Retained(reference.len()))
        }
    }

    /// Removes the side-car before the object, so a side-car never outlives
    /// the object it describes.
    async fn remove_object(&self, target: &Target, key: &str) -> StoreResult<()> {
        delete_if_present(self.store.as_ref(), target, &prodinfo_key(key)).await?;
        delete_if_present(self.store.as_ref(), target, key).await
    }

    /// Store generated documents on one target, overwriting whatever is there.
    ///
    /// A document whose stored checksum already matches is left alone.
    pub async fn upload_metadata(&self, documents: &[MetadataDocument], target: &Target) -> BatchReport {
        info!(documents = documents.len(), target = %target.name, "[METADATA] Uploading metadata documents");
        let mut units: FuturesUnordered<_> = documents
            .iter()
            .map(|document| self.upload_document(document, target))
            .collect();

        let mut report = BatchReport::default();
        while let Some(outcome) = units.next().await {
            report.absorb(outcome);
        }
        report
    }

    async fn upload_document(&self, document: &MetadataDocument, target: &Target) -> FileOutcome {
        let key = document.key.clone();
        let result: Result<(), FailureKind> = async {
            let _permit = self.permit().await?;
            let checksum = self.hashes.algorithm().digest_hex(&document.body);
            if self.store.exists(target, &key).await? {
                let stored = self.store.metadata(target, &key).await?;
                if stored.get(CHECKSUM_METADATA_KEY) == Some(&checksum) {
                    debug!(key = %key, target = %target.name, "[METADATA] Document unchanged, skipping");
                    return Ok(());
                }
            }
            let metadata = HashMap::from([(CHECKSUM_METADATA_KEY.to_string(), checksum)]);
            self.store
                .put(target, &key, document.body.clone(), &document.content_type, metadata)
                .await?;
            debug!(key = %key, target = %target.name, "[METADATA] Document stored");
            Ok::<(), FailureKind>(())
        }
        .await;

        match result {
            Ok(()) => FileOutcome::ok(key),
            Err(kind) => {
                error!(key = %key, target = %target.name, error = %kind, "[METADATA] Document upload failed");
                FileOutcome::failed_on_all(key, std::slice::from_ref(target), kind)
            }
        }
    }

    /// Unconditionally delete generated documents from one target.
    pub async fn delete_metadata(&self, keys: &[String], target: &Target) -> BatchReport {
        self.delete_keys(keys, std::slice::from_ref(target), None).await
    }
}
