//! Content-addressed storage for sealed changes.
//!
//! Blobs and commit records are stored by SHA-256. A commit record names the
//! destination path, the content blob, the message and the previous commit
//! for that destination; its own digest is the commit id.

pub mod fs;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

pub use fs::FsCasStore;

/// SHA-256 content address.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    pub fn compute(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hash);
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", &self.to_hex()[..12])
    }
}

impl FromStr for ContentDigest {
    type Err = CasError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| CasError::InvalidDigest(s.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CasError::InvalidDigest(s.to_string()))?;
        Ok(Self(arr))
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// SHA-256 hex of `data`.
pub fn digest_hex(data: &[u8]) -> String {
    ContentDigest::compute(data).to_hex()
}

#[derive(Debug, Error)]
pub enum CasError {
    #[error("object not found: {0}")]
    NotFound(ContentDigest),

    #[error("invalid digest hex: {0}")]
    InvalidDigest(String),

    #[error("corrupt commit record {digest}: {reason}")]
    CorruptRecord { digest: ContentDigest, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CasError>;

/// One sealed change in the content-addressed history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Destination path relative to the repository root, `/`-separated.
    pub path: String,
    pub content: ContentDigest,
    pub message: String,
    pub author: String,
    pub timestamp: String,
    /// Previous commit for the same path, if any.
    pub parent: Option<ContentDigest>,
}

/// Content-addressed store interface.
pub trait CasStore: Send + Sync {
    /// Store `data` and return its digest. Storing the same bytes twice is a
    /// no-op.
    fn put(&self, data: &[u8]) -> Result<ContentDigest>;

    fn get(&self, digest: &ContentDigest) -> Result<Vec<u8>>;

    fn exists(&self, digest: &ContentDigest) -> Result<bool>;

    /// Latest commit for `path`.
    fn head(&self, path: &str) -> Result<Option<ContentDigest>>;

    /// Point `path` at `commit`.
    fn set_head(&self, path: &str, commit: &ContentDigest) -> Result<()>;

    /// Store a commit record and advance the path's head to it.
    fn commit(&self, record: &CommitRecord) -> Result<ContentDigest> {
        let bytes = serde_json::to_vec(record).map_err(|e| {
            CasError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        let id = self.put(&bytes)?;
        self.set_head(&record.path, &id)?;
        Ok(id)
    }

    /// Load a commit record by id.
    fn record(&self, id: &ContentDigest) -> Result<CommitRecord> {
        let bytes = self.get(id)?;
        serde_json::from_slice(&bytes).map_err(|e| CasError::CorruptRecord {
            digest: *id,
            reason: e.to_string(),
        })
    }
}
