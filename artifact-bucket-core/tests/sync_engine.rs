use std::collections::HashMap;
use std::fs::{create_dir_all, write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use artifact_bucket_core::checksum::DigestAlgorithm;
use artifact_bucket_core::config::{SyncConfig, Target};
use artifact_bucket_core::contract::{Listing, MockRemoteStore, RemoteStore, CHECKSUM_METADATA_KEY};
use artifact_bucket_core::error::{FailureKind, StoreError, StoreResult};
use artifact_bucket_core::memory_store::InMemoryStore;
use artifact_bucket_core::prodinfo::{prodinfo_key, ProductReference};
use artifact_bucket_core::sync::{MetadataDocument, SyncEngine};
use async_trait::async_trait;
use tempfile::{tempdir, TempDir};

const JAR: &str = "org/foo/bar/1.0/bar-1.0.jar";
const POM: &str = "org/foo/bar/1.0/bar-1.0.pom";

fn config() -> SyncConfig {
    SyncConfig {
        concurrency: 4,
        hash_workers: 2,
        digest: DigestAlgorithm::Sha1,
    }
}

fn main_target() -> Target {
    Target::new("main", "releases", "ga")
}

fn replica_target() -> Target {
    Target::new("replica", "releases-replica", "ga")
}

/// Writes `files` (relative key, body) under a fresh release root.
fn release(files: &[(&str, &str)]) -> (TempDir, Vec<PathBuf>) {
    let root = tempdir().unwrap();
    let paths = files
        .iter()
        .map(|(key, body)| {
            let path = root.path().join(key);
            create_dir_all(path.parent().unwrap()).unwrap();
            write(&path, body).unwrap();
            path
        })
        .collect();
    (root, paths)
}

fn owners(store: &InMemoryStore, target: &Target, key: &str) -> Vec<String> {
    store
        .text(target, &prodinfo_key(key))
        .map(|text| {
            ProductReference::parse(&text)
                .products()
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn engine(store: &Arc<InMemoryStore>) -> SyncEngine<InMemoryStore> {
    SyncEngine::new(store.clone(), config())
}

#[tokio::test]
async fn upload_stores_object_checksum_and_owner() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(&store);
    let target = main_target();
    let (root, files) = release(&[(JAR, "jar bytes"), (POM, "<project/>")]);

    let report = engine
        .sync_upload(&files, std::slice::from_ref(&target), Some("P1"), root.path())
        .await;

    assert!(report.is_success(), "failures: {:?}", report.failures);
    assert_eq!(report.completed.len(), 2);
    let jar = store.object(&target, JAR).expect("jar stored");
    assert_eq!(jar.body, b"jar bytes");
    assert_eq!(jar.content_type, "application/java-archive");
    assert_eq!(
        jar.metadata.get(CHECKSUM_METADATA_KEY),
        Some(&DigestAlgorithm::Sha1.digest_hex(b"jar bytes"))
    );
    assert_eq!(owners(&store, &target, JAR), vec!["P1"]);
    assert_eq!(owners(&store, &target, POM), vec!["P1"]);
}

#[tokio::test]
async fn repeated_upload_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(&store);
    let target = main_target();
    let (root, files) = release(&[(JAR, "jar bytes")]);
    let targets = [target.clone()];

    engine.sync_upload(&files, &targets, Some("P1"), root.path()).await;
    let before = store.keys(&target);
    let report = engine.sync_upload(&files, &targets, Some("P1"), root.path()).await;

    assert!(report.is_success());
    assert_eq!(store.keys(&target), before);
    assert_eq!(owners(&store, &target, JAR), vec!["P1"]);
}

#[tokio::test]
async fn shared_object_survives_until_last_owner_is_removed() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(&store);
    let target = main_target();
    let targets = [target.clone()];
    let (root, files) = release(&[(JAR, "jar bytes")]);

    engine.sync_upload(&files, &targets, Some("P1"), root.path()).await;
    engine.sync_upload(&files, &targets, Some("P2"), root.path()).await;
    assert_eq!(owners(&store, &target, JAR), vec!["P1", "P2"]);

    let report = engine.sync_delete(&files, &targets, Some("P1"), root.path()).await;
    assert!(report.is_success());
    assert!(store.object(&target, JAR).is_some(), "P2 still owns the jar");
    assert_eq!(owners(&store, &target, JAR), vec!["P2"]);

    engine.sync_delete(&files, &targets, Some("P2"), root.path()).await;
    assert!(store.object(&target, JAR).is_none());
    assert!(store.object(&target, &prodinfo_key(JAR)).is_none());
}

#[tokio::test]
async fn conflicting_content_is_rejected_and_owners_untouched() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(&store);
    let target = main_target();
    let targets = [target.clone()];

    let (root1, files1) = release(&[(JAR, "original")]);
    engine.sync_upload(&files1, &targets, Some("P1"), root1.path()).await;

    let (root2, files2) = release(&[(JAR, "different")]);
    let report = engine.sync_upload(&files2, &targets, Some("P2"), root2.path()).await;

    assert!(!report.is_success());
    assert_eq!(report.failed_keys(), vec![JAR.to_string()]);
    assert!(matches!(
        report.failures[0].kind,
        FailureKind::ContentConflict { .. }
    ));
    assert_eq!(store.object(&target, JAR).unwrap().body, b"original");
    assert_eq!(owners(&store, &target, JAR), vec!["P1"]);
}

#[tokio::test]
async fn replicas_are_copied_and_refcounted_independently() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(&store);
    let (main, replica) = (main_target(), replica_target());
    let targets = [main.clone(), replica.clone()];
    let (root, files) = release(&[(JAR, "jar bytes")]);

    let report = engine.sync_upload(&files, &targets, Some("P1"), root.path()).await;
    assert!(report.is_success());
    assert_eq!(store.object(&replica, JAR).unwrap().body, b"jar bytes");
    assert_eq!(owners(&store, &replica, JAR), vec!["P1"]);

    engine.sync_upload(&files, &targets, Some("P2"), root.path()).await;
    engine
        .sync_delete(&files, std::slice::from_ref(&main), Some("P2"), root.path())
        .await;

    assert_eq!(owners(&store, &main, JAR), vec!["P1"]);
    assert_eq!(owners(&store, &replica, JAR), vec!["P1", "P2"]);
}

#[tokio::test]
async fn delete_of_absent_key_is_a_no_op() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(&store);
    let report = engine
        .delete_keys(&[JAR.to_string()], &[main_target()], Some("P1"))
        .await;
    assert!(report.is_success());
    assert_eq!(report.completed, vec![JAR.to_string()]);
}

#[tokio::test]
async fn delete_without_product_removes_unconditionally() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(&store);
    let target = main_target();
    let targets = [target.clone()];
    let (root, files) = release(&[(JAR, "jar bytes")]);
    engine.sync_upload(&files, &targets, Some("P1"), root.path()).await;
    engine.sync_upload(&files, &targets, Some("P2"), root.path()).await;

    engine.delete_keys(&[JAR.to_string()], &targets, None).await;
    assert!(store.object(&target, JAR).is_none());
}

#[tokio::test]
async fn file_outside_root_is_reported_not_raised() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(&store);
    let (_root, files) = release(&[(JAR, "jar bytes")]);
    let other_root = tempdir().unwrap();

    let report = engine
        .sync_upload(&files, &[main_target()], Some("P1"), other_root.path())
        .await;
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(report.failures[0].kind, FailureKind::LocalRead(_)));
}

#[tokio::test]
async fn unchanged_metadata_document_is_not_rewritten() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(&store);
    let target = main_target();
    let document = MetadataDocument::new("org/foo/bar/maven-metadata.xml", b"<metadata/>".to_vec());

    let report = engine.upload_metadata(&[document.clone()], &target).await;
    assert!(report.is_success());
    assert_eq!(
        store.object(&target, &document.key).unwrap().content_type,
        "application/xml"
    );

    // Overwrite the stored body but keep its checksum: a second upload of the
    // same document must leave the object alone.
    let checksum = DigestAlgorithm::Sha1.digest_hex(&document.body);
    store
        .put(
            &target,
            &document.key,
            b"sentinel".to_vec(),
            "application/xml",
            HashMap::from([(CHECKSUM_METADATA_KEY.to_string(), checksum)]),
        )
        .await
        .unwrap();
    engine.upload_metadata(&[document.clone()], &target).await;
    assert_eq!(store.object(&target, &document.key).unwrap().body, b"sentinel");
}

#[tokio::test]
async fn transient_main_failure_skips_replica() {
    let mut mock = MockRemoteStore::new();
    mock.expect_exists().returning(|_, _| Ok(false));
    mock.expect_put()
        .returning(|_, _, _, _, _| Err(StoreError::transient("503 slow down")));
    mock.expect_copy().never();

    let engine = SyncEngine::new(Arc::new(mock), config());
    let (root, files) = release(&[(JAR, "jar bytes")]);
    let report = engine
        .sync_upload(&files, &[main_target(), replica_target()], Some("P1"), root.path())
        .await;

    assert_eq!(report.failures.len(), 2);
    let main = report.failures_for("main").next().unwrap();
    assert!(matches!(main.kind, FailureKind::Store(StoreError::Transient(_))));
    let replica = report.failures_for("replica").next().unwrap();
    assert_eq!(replica.kind, FailureKind::MainTargetFailed("main".to_string()));
}

#[tokio::test]
async fn existence_check_error_is_never_read_as_absent() {
    let mut mock = MockRemoteStore::new();
    mock.expect_exists()
        .returning(|_, _| Err(StoreError::forbidden("403")));
    mock.expect_put().never();
    mock.expect_delete().never();

    let engine = SyncEngine::new(Arc::new(mock), config());
    let (root, files) = release(&[(JAR, "jar bytes")]);

    let upload = engine
        .sync_upload(&files, &[main_target()], Some("P1"), root.path())
        .await;
    assert_eq!(upload.failed_keys(), vec![JAR.to_string()]);

    let delete = engine
        .sync_delete(&files, &[main_target()], Some("P1"), root.path())
        .await;
    assert_eq!(delete.failed_keys(), vec![JAR.to_string()]);
}

#[tokio::test]
async fn one_failing_file_does_not_stop_the_batch() {
    let mut mock = MockRemoteStore::new();
    mock.expect_exists().returning(|_, _| Ok(false));
    mock.expect_put()
        .returning(|_, key: &str, _, _, _| {
            if key.ends_with(".pom") {
                Err(StoreError::transient("connection reset"))
            } else {
                Ok(())
            }
        });
    mock.expect_get()
        .returning(|_, key: &str| Err(StoreError::not_found(key.to_string())));

    let engine = SyncEngine::new(Arc::new(mock), config());
    let (root, files) = release(&[(JAR, "jar bytes"), (POM, "<project/>")]);
    let report = engine
        .sync_upload(&files, &[main_target()], Some("P1"), root.path())
        .await;

    assert_eq!(report.completed, vec![JAR.to_string()]);
    assert_eq!(report.failed_keys(), vec![POM.to_string()]);
}

/// In-memory store whose first side-car delete fails with a transient error.
#[derive(Default)]
struct FlakySidecarStore {
    inner: InMemoryStore,
    failed_once: AtomicBool,
}

#[async_trait]
impl RemoteStore for FlakySidecarStore {
    async fn exists(&self, target: &Target, key: &str) -> StoreResult<bool> {
        self.inner.exists(target, key).await
    }

    async fn metadata(&self, target: &Target, key: &str) -> StoreResult<HashMap<String, String>> {
        self.inner.metadata(target, key).await
    }

    async fn get(&self, target: &Target, key: &str) -> StoreResult<Vec<u8>> {
        self.inner.get(target, key).await
    }

    async fn put(
        &self,
        target: &Target,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> StoreResult<()> {
        self.inner.put(target, key, body, content_type, metadata).await
    }

    async fn delete(&self, target: &Target, key: &str) -> StoreResult<()> {
        if key.ends_with(".prodinfo") && !self.failed_once.swap(true, Ordering::SeqCst) {
            return Err(StoreError::transient("connection reset"));
        }
        self.inner.delete(target, key).await
    }

    async fn copy(&self, source: &Target, source_key: &str, destination: &Target, destination_key: &str) -> StoreResult<()> {
        self.inner.copy(source, source_key, destination, destination_key).await
    }

    async fn list(&self, target: &Target, prefix: &str, delimiter: Option<char>) -> StoreResult<Listing> {
        self.inner.list(target, prefix, delimiter).await
    }
}

#[tokio::test]
async fn interrupted_last_owner_delete_does_not_resurrect_owner() {
    let store = Arc::new(FlakySidecarStore::default());
    let engine = SyncEngine::new(store.clone(), config());
    let target = main_target();
    let targets = [target.clone()];
    let (root, files) = release(&[(JAR, "jar bytes")]);

    engine.sync_upload(&files, &targets, Some("P1"), root.path()).await;
    let interrupted = engine.sync_delete(&files, &targets, Some("P1"), root.path()).await;
    assert_eq!(interrupted.failed_keys(), vec![JAR.to_string()]);
    assert!(store.inner.object(&target, JAR).is_some(), "object outlives a failed side-car delete");

    let retry = engine.sync_delete(&files, &targets, Some("P1"), root.path()).await;
    assert!(retry.is_success());
    assert!(store.inner.object(&target, JAR).is_none());
    assert!(store.inner.object(&target, &prodinfo_key(JAR)).is_none());

    engine.sync_upload(&files, &targets, Some("P2"), root.path()).await;
    assert_eq!(owners(&store.inner, &target, JAR), vec!["P2"]);

    engine.sync_delete(&files, &targets, Some("P2"), root.path()).await;
    assert!(store.inner.object(&target, JAR).is_none());
}

#[tokio::test]
async fn new_object_replaces_leftover_side_car() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(&store);
    let target = main_target();
    store
        .put(&target, &prodinfo_key(JAR), b"P1".to_vec(), "text/plain", HashMap::new())
        .await
        .unwrap();
    let (root, files) = release(&[(JAR, "jar bytes")]);

    let report = engine
        .sync_upload(&files, std::slice::from_ref(&target), Some("P2"), root.path())
        .await;
    assert!(report.is_success());
    assert_eq!(owners(&store, &target, JAR), vec!["P2"]);
}
