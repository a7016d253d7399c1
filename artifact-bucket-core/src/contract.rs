//! # contract: the object store seen by the synchronisation engine
//!
//! [`RemoteStore`] is a thin bucket-and-prefix object API. Every method takes
//! the [`Target`] it acts on plus a key relative to that target's prefix; the
//! implementation is responsible for applying the prefix.
//!
//! ## Not found vs. failure
//! - `exists` answers `Ok(false)` for a missing key. Any other failure is an
//!   `Err` and must never be read as "absent".
//! - `get` and `metadata` return [`crate::error::StoreError::NotFound`] for a missing key,
//!   so callers can branch on it without string matching.
//!
//! ## Implementations
//! - `S3Store` in the `artifact-bucket` crate (S3-compatible API)
//! - [`crate::memory_store::InMemoryStore`] for dry runs and tests
//! - `MockRemoteStore`, generated by `mockall`, for error injection

use std::collections::HashMap;

use async_trait::async_trait;
use mockall::automock;

use crate::config::Target;
use crate::error::StoreResult;

/// User-metadata key under which the content digest is recorded.
pub const CHECKSUM_METADATA_KEY: &str = "checksum";

/// Result of a delimited listing, with keys relative to the target prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// "Directories" directly below the listed prefix, each ending in the delimiter.
    pub common_prefixes: Vec<String>,
    /// Object keys directly below the prefix (or all keys when undelimited).
    pub keys: Vec<String>,
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Whether `key` exists. 404 is `Ok(false)`; every other error propagates.
    async fn exists(&self, target: &Target, key: &str) -> StoreResult<bool>;

    /// User metadata recorded on the object.
    async fn metadata(&self, target: &Target, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Object body.
    async fn get(&self, target: &Target, key: &str) -> StoreResult<Vec<u8>>;

    /// Create or fully overwrite an object.
    async fn put(
        &self,
        target: &Target,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> StoreResult<()>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, target: &Target, key: &str) -> StoreResult<()>;

    /// Server-side copy, preserving content type and user metadata.
    async fn copy(
        &self,
        source: &Target,
        source_key: &str,
        destination: &Target,
        destination_key: &str,
    ) -> StoreResult<()>;

    /// List keys under `prefix`. With a delimiter, keys below the next
    /// delimiter are folded into `common_prefixes`.
    async fn list(&self, target: &Target, prefix: &str, delimiter: Option<char>) -> StoreResult<Listing>;
}

/// Fetch an object, mapping a missing key to `None`.
pub async fn get_optional<S>(store: &S, target: &Target, key: &str) -> StoreResult<Option<Vec<u8>>>
where
    S: RemoteStore + ?Sized,
{
    match store.get(target, key).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Delete an object, treating a missing key as already satisfied.
pub async fn delete_if_present<S>(store: &S, target: &Target, key: &str) -> StoreResult<()>
where
    S: RemoteStore + ?Sized,
{
    match store.delete(target, key).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Content type for a stored key, derived from its extension.
pub fn content_type_for(key: &str) -> &'static str {
    let extension = key.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match extension {
        "jar" | "war" | "ear" => "application/java-archive",
        "pom" | "xml" => "application/xml",
        "json" => "application/json",
        "tgz" | "gz" => "application/gzip",
        "zip" => "application/zip",
        "asc" => "application/pgp-signature",
        "md5" | "sha1" | "sha256" | "sha512" | "prodinfo" | "txt" => "text/plain",
        "html" => "text/html",
        _ => "application/octet-stream",
    }
}
