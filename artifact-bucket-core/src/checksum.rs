//! Content digests and the bounded hashing pool.
//!
//! Hashing large artifacts is CPU-bound, so [`HashPool`] runs it on tokio's
//! blocking threads behind its own semaphore. Store I/O keeps flowing on the
//! async workers while files are being read and digested.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;

/// Hash algorithms used for checksum metadata and digest side files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Md5,
    #[default]
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    /// Every algorithm that gets a side file next to an aggregate document.
    pub const ALL: [DigestAlgorithm; 3] = [Self::Md5, Self::Sha1, Self::Sha256];

    /// File extension of the side file, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    /// Lowercase hex digest of `bytes`.
    pub fn digest_hex(&self, bytes: &[u8]) -> String {
        match self {
            Self::Md5 => hex::encode(Md5::digest(bytes)),
            Self::Sha1 => hex::encode(Sha1::digest(bytes)),
            Self::Sha256 => hex::encode(Sha256::digest(bytes)),
        }
    }
}

/// True for keys that are digest side files of another object.
pub fn is_digest_file(key: &str) -> bool {
    DigestAlgorithm::ALL
        .iter()
        .any(|alg| key.ends_with(&format!(".{}", alg.extension())))
}

/// Reads local files and digests them on a bounded set of blocking workers.
#[derive(Debug, Clone)]
pub struct HashPool {
    permits: Arc<Semaphore>,
    algorithm: DigestAlgorithm,
}

impl HashPool {
    pub fn new(workers: usize, algorithm: DigestAlgorithm) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            algorithm,
        }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Read `path` and return its bytes together with their hex digest.
    pub async fn read_and_digest(&self, path: PathBuf) -> io::Result<(Vec<u8>, String)> {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| io::Error::other("hash pool semaphore closed"))?;
        let algorithm = self.algorithm;
        tokio::task::spawn_blocking(move || {
            let bytes = std::fs::read(&path)?;
            let digest = algorithm.digest_hex(&bytes);
            Ok((bytes, digest))
        })
        .await
        .map_err(io::Error::other)?
    }
}
