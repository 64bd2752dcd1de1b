//! [`TransferBackend`] over a local directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use picstash_transfer::{
    BackendEvent, BackendHandle, EventSender, RawError, ResourcePath, TransferBackend,
};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::store::{ObjectMetadata, ObjectStore, download_part_path};
use crate::{DEFAULT_CHUNK_SIZE, FsError};

/// Settings for [`FsBackend`].
#[derive(Debug, Clone)]
pub struct FsConfig {
    /// Store root; objects and metadata live underneath.
    pub root: PathBuf,
    /// Bytes moved per step. 0 means [`DEFAULT_CHUNK_SIZE`].
    pub chunk_size: usize,
    /// Pause after every chunk, to simulate a slow link.
    pub throttle: Option<Duration>,
}

impl FsConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            throttle: None,
        }
    }
}

/// Stores objects under a local directory.
///
/// Each operation runs as a tokio task on the runtime `new` was called from
/// and reports through the event sender it was given. Operations stage their
/// bytes under a name unique to the operation and rename them into place only
/// when complete, so concurrent writers to one key never share a file.
pub struct FsBackend {
    store: ObjectStore,
    instance: String,
    chunk_size: usize,
    throttle: Option<Duration>,
    events: EventSender,
    runtime: Handle,
    next_handle: AtomicU64,
    jobs: Arc<Mutex<HashMap<BackendHandle, JobControl>>>,
}

struct JobControl {
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
}

impl FsBackend {
    /// Creates a backend. Must be called from within a tokio runtime.
    pub fn new(config: FsConfig, events: EventSender) -> Result<Self, FsError> {
        let runtime = Handle::try_current()?;
        let chunk_size = if config.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            config.chunk_size
        };
        Ok(Self {
            store: ObjectStore::new(config.root),
            instance: Uuid::new_v4().simple().to_string(),
            chunk_size,
            throttle: config.throttle,
            events,
            runtime,
            next_handle: AtomicU64::new(1),
            jobs: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    /// Metadata recorded for `key` at upload.
    pub async fn stat(&self, key: &ResourcePath) -> Result<ObjectMetadata, FsError> {
        self.store.stat(key).await
    }

    /// Number of operations still running.
    pub fn active_jobs(&self) -> usize {
        lock(&self.jobs).len()
    }

    fn spawn<F, Fut>(&self, work: F) -> BackendHandle
    where
        F: FnOnce(Job) -> Fut,
        Fut: Future<Output = Result<u64, FsError>> + Send + 'static,
    {
        let handle = BackendHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        let (paused_tx, paused_rx) = watch::channel(false);
        lock(&self.jobs).insert(
            handle,
            JobControl {
                cancel: cancel.clone(),
                paused: paused_tx,
            },
        );

        let job = Job {
            handle,
            tag: format!("{}-{handle}", self.instance),
            events: self.events.clone(),
            cancel,
            paused: paused_rx,
            chunk_size: self.chunk_size,
            throttle: self.throttle,
        };
        let events = self.events.clone();
        let jobs = Arc::clone(&self.jobs);
        let fut = work(job);
        self.runtime.spawn(async move {
            let result = fut.await;
            lock(&jobs).remove(&handle);
            let event = match result {
                Ok(bytes) => {
                    debug!(%handle, bytes, "operation finished");
                    BackendEvent::succeeded(handle)
                }
                Err(FsError::Cancelled) => {
                    debug!(%handle, "operation cancelled");
                    BackendEvent::failed(handle, FsError::Cancelled.code(), "cancelled")
                }
                Err(e) => {
                    warn!(%handle, error = %e, "operation failed");
                    let raw = e.to_raw();
                    BackendEvent::failed(handle, raw.code, raw.message)
                }
            };
            let _ = events.send(event);
        });
        handle
    }

    fn control(&self, handle: BackendHandle, f: impl FnOnce(&JobControl)) {
        match lock(&self.jobs).get(&handle) {
            Some(job) => f(job),
            None => trace!(%handle, "no running operation"),
        }
    }
}

impl TransferBackend for FsBackend {
    fn provider(&self) -> &'static str {
        "fs"
    }

    fn begin_upload(
        &self,
        path: &ResourcePath,
        payload: Arc<[u8]>,
        content_type: &str,
    ) -> Result<BackendHandle, RawError> {
        let store = self.store.clone();
        let key = path.clone();
        let content_type = content_type.to_string();
        let handle = self.spawn(move |job| upload(job, store, key, payload, content_type));
        debug!(%handle, %path, "upload started");
        Ok(handle)
    }

    fn begin_download(
        &self,
        path: &ResourcePath,
        destination: &Path,
    ) -> Result<BackendHandle, RawError> {
        let store = self.store.clone();
        let key = path.clone();
        let destination = destination.to_path_buf();
        let handle = self.spawn(move |job| download(job, store, key, destination));
        debug!(%handle, %path, "download started");
        Ok(handle)
    }

    fn pause(&self, handle: BackendHandle) {
        self.control(handle, |job| {
            job.paused.send_replace(true);
        });
    }

    fn resume(&self, handle: BackendHandle) {
        self.control(handle, |job| {
            job.paused.send_replace(false);
        });
    }

    fn cancel(&self, handle: BackendHandle) {
        self.control(handle, |job| job.cancel.cancel());
    }
}

/// Per-operation view of the controls and event sender.
struct Job {
    handle: BackendHandle,
    /// Names this operation's staging files.
    tag: String,
    events: EventSender,
    cancel: CancellationToken,
    paused: watch::Receiver<bool>,
    chunk_size: usize,
    throttle: Option<Duration>,
}

impl Job {
    /// Blocks while paused. Fails once cancelled.
    async fn checkpoint(&mut self) -> Result<(), FsError> {
        if self.cancel.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        if *self.paused.borrow() {
            trace!(handle = %self.handle, "suspended");
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(FsError::Cancelled),
                _ = self.paused.wait_for(|paused| !*paused) => {}
            }
        }
        Ok(())
    }

    fn progress(&self, bytes: u64, total: u64) {
        let _ = self
            .events
            .send(BackendEvent::progress(self.handle, bytes, Some(total)));
    }

    async fn throttle(&self) {
        if let Some(delay) = self.throttle {
            tokio::time::sleep(delay).await;
        }
    }
}

async fn upload(
    mut job: Job,
    store: ObjectStore,
    key: ResourcePath,
    payload: Arc<[u8]>,
    content_type: String,
) -> Result<u64, FsError> {
    let dest = store.object_path(&key);
    let metadata_path = store.metadata_path(&key);
    for dir in [dest.parent(), metadata_path.parent()].into_iter().flatten() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::create_dir_all(store.staging_dir()).await?;
    let staged = store.staging_path(&job.tag);

    let sha256 = match write_upload(&mut job, &staged, &payload).await {
        Ok(sha256) => sha256,
        Err(e) => {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(e);
        }
    };
    let metadata = ObjectMetadata {
        key,
        content_type,
        size: payload.len() as u64,
        sha256,
        uploaded_at: Utc::now(),
    };
    let staged_metadata = match store.stage_metadata(&metadata, &job.tag).await {
        Ok(path) => path,
        Err(e) => {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(e);
        }
    };

    // Object and metadata of one upload land together.
    let _commit = store.lock_commits().await;
    commit(
        &job,
        &[
            (staged.as_path(), dest.as_path()),
            (staged_metadata.as_path(), metadata_path.as_path()),
        ],
    )
    .await?;
    Ok(payload.len() as u64)
}

async fn write_upload(job: &mut Job, part: &Path, payload: &[u8]) -> Result<String, FsError> {
    let total = payload.len() as u64;
    let mut file = tokio::fs::File::create(part).await?;
    let mut hasher = Sha256::new();
    let mut written = 0u64;

    for chunk in payload.chunks(job.chunk_size) {
        job.checkpoint().await?;
        file.write_all(chunk).await?;
        hasher.update(chunk);
        written += chunk.len() as u64;
        job.progress(written, total);
        job.throttle().await;
    }
    file.flush().await?;
    file.sync_all().await?;
    job.checkpoint().await?;

    Ok(hex::encode(hasher.finalize()))
}

async fn download(
    mut job: Job,
    store: ObjectStore,
    key: ResourcePath,
    destination: PathBuf,
) -> Result<u64, FsError> {
    let metadata = store.stat(&key).await?;
    let source = store.object_path(&key);
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let part = download_part_path(&destination, &job.tag);

    let result = copy_download(&mut job, &source, &part, &metadata).await;
    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e);
    }
    commit(&job, &[(part.as_path(), destination.as_path())]).await?;
    Ok(metadata.size)
}

async fn copy_download(
    job: &mut Job,
    source: &Path,
    part: &Path,
    metadata: &ObjectMetadata,
) -> Result<(), FsError> {
    let mut src = tokio::fs::File::open(source).await?;
    let mut out = tokio::fs::File::create(part).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; job.chunk_size];
    let mut copied = 0u64;

    loop {
        job.checkpoint().await?;
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).await?;
        hasher.update(&buf[..n]);
        copied += n as u64;
        job.progress(copied, metadata.size);
        job.throttle().await;
    }
    out.flush().await?;
    out.sync_all().await?;

    let actual = hex::encode(hasher.finalize());
    if actual != metadata.sha256 {
        return Err(FsError::ChecksumMismatch {
            expected: metadata.sha256.clone(),
            actual,
        });
    }
    job.checkpoint().await
}

/// Renames each staged file onto its destination unless the job has been
/// cancelled. Staged files left behind are removed.
async fn commit(job: &Job, moves: &[(&Path, &Path)]) -> Result<(), FsError> {
    if job.cancel.is_cancelled() {
        discard(moves).await;
        return Err(FsError::Cancelled);
    }
    for (staged, dest) in moves {
        if let Err(e) = tokio::fs::rename(staged, dest).await {
            discard(moves).await;
            return Err(e.into());
        }
    }
    Ok(())
}

async fn discard(moves: &[(&Path, &Path)]) {
    for (staged, _) in moves {
        let _ = tokio::fs::remove_file(staged).await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
