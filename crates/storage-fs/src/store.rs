//! On-disk layout of the object store.
//!
//! ```text
//! <root>/objects/<key>          object bytes
//! <root>/metadata/<key>.json    ObjectMetadata
//! <root>/staging/<tag>.part      upload in progress
//! ```
//!
//! Staging names come from the operation, never from a key, so no key can
//! collide with a file being written.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use picstash_transfer::ResourcePath;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, MutexGuard};

use crate::FsError;

const OBJECTS_DIR: &str = "objects";
const METADATA_DIR: &str = "metadata";
const STAGING_DIR: &str = "staging";

/// What the store records about an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub key: ResourcePath,
    pub content_type: String,
    pub size: u64,
    /// Hex-encoded SHA-256 of the object bytes.
    pub sha256: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Path arithmetic and metadata I/O for one store root.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
    commits: Arc<Mutex<()>>,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            commits: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, key: &ResourcePath) -> PathBuf {
        join_key(&self.root.join(OBJECTS_DIR), key)
    }

    pub fn metadata_path(&self, key: &ResourcePath) -> PathBuf {
        with_suffix(&join_key(&self.root.join(METADATA_DIR), key), ".json")
    }

    /// Reads the metadata recorded for `key`.
    pub async fn stat(&self, key: &ResourcePath) -> Result<ObjectMetadata, FsError> {
        let data = match tokio::fs::read(self.metadata_path(key)).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FsError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Where the operation tagged `tag` writes object bytes.
    pub fn staging_path(&self, tag: &str) -> PathBuf {
        self.staging_dir().join(format!("{tag}.part"))
    }

    /// Writes `metadata` to the staging area and returns the staged file.
    pub(crate) async fn stage_metadata(
        &self,
        metadata: &ObjectMetadata,
        tag: &str,
    ) -> Result<PathBuf, FsError> {
        let staged = self.staging_path(&format!("{tag}.json"));
        tokio::fs::create_dir_all(self.staging_dir()).await?;
        tokio::fs::write(&staged, serde_json::to_vec_pretty(metadata)?).await?;
        Ok(staged)
    }

    /// Held while an object and its metadata are renamed into place.
    pub(crate) async fn lock_commits(&self) -> MutexGuard<'_, ()> {
        self.commits.lock().await
    }
}

fn join_key(base: &Path, key: &ResourcePath) -> PathBuf {
    let mut path = base.to_path_buf();
    path.extend(key.segments());
    path
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Hidden sibling of `destination` that the download tagged `tag` writes to.
pub fn download_part_path(destination: &Path, tag: &str) -> PathBuf {
    let name = destination.file_name().unwrap_or_default();
    let mut staged = OsString::from(".");
    staged.push(name);
    staged.push(format!(".{tag}.part"));
    destination.with_file_name(staged)
}

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
