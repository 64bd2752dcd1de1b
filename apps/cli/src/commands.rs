//! Command implementations.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, bail};
use picstash_storage_fs::{FsBackend, ObjectMetadata};
use picstash_transfer::{
    CancelHandle, ResourcePath, RetryPolicy, TaskReport, ThroughputMeter, TransferClient,
    TransferTask, content_type_or_default, event_channel, run_with_retry,
};
use tracing::{info, warn};

use crate::config::Config;
use crate::render;

/// Backend, client and retry policy for one CLI invocation.
pub struct Session {
    client: TransferClient,
    backend: Arc<FsBackend>,
    policy: RetryPolicy,
    default_prefix: String,
}

impl Session {
    /// Must be called from within the tokio runtime.
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        let (events_tx, events_rx) = event_channel();
        let backend = Arc::new(FsBackend::new(config.fs_config(), events_tx)?);
        let client = TransferClient::with_classifier(backend.clone(), config.classifier());

        let router = client.clone();
        tokio::spawn(async move { router.route_events(events_rx).await });

        Ok(Self {
            client,
            backend,
            policy: config.retry.policy(),
            default_prefix: config.default_prefix.clone(),
        })
    }

    pub async fn upload(
        &self,
        file: &Path,
        to: Option<&str>,
        content_type: Option<&str>,
    ) -> anyhow::Result<TaskReport> {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("not a file name: {}", file.display()))?;
        let key = upload_key(&self.default_prefix, name, to)?;
        let content_type = content_type.unwrap_or_else(|| content_type_or_default(name));
        let payload = tokio::fs::read(file)
            .await
            .with_context(|| format!("failed to read {}", file.display()))?;

        info!(%key, content_type, bytes = payload.len(), "uploading");
        let task = self.client.upload(key, payload, content_type);
        self.run(task).await
    }

    pub async fn download(&self, key: &str, destination: PathBuf) -> anyhow::Result<TaskReport> {
        let key: ResourcePath = key.parse()?;
        info!(%key, destination = %destination.display(), "downloading");
        let task = self.client.download(key, destination);
        self.run(task).await
    }

    pub async fn stat(&self, key: &str) -> anyhow::Result<ObjectMetadata> {
        let key: ResourcePath = key.parse()?;
        Ok(self.backend.stat(&key).await?)
    }

    /// Runs `task` with retries, rendering progress and cancelling on Ctrl-C.
    async fn run(&self, task: TransferTask) -> anyhow::Result<TaskReport> {
        let meter = Arc::new(ThroughputMeter::new(None, None));
        let current: Arc<Mutex<Option<CancelHandle>>> = Arc::new(Mutex::new(None));

        let prepare = {
            let current = Arc::clone(&current);
            move |task: &TransferTask, attempt: u32| {
                if attempt > 1 {
                    info!(attempt, path = %task.resource_path(), "retrying transfer");
                }
                meter.reset();
                let meter = Arc::clone(&meter);
                task.on_progress(move |snapshot| {
                    meter.record(&snapshot);
                    eprint!(
                        "\r{}",
                        render::progress_line(&snapshot, meter.bytes_per_second())
                    );
                });
                if let Ok(mut slot) = current.lock() {
                    *slot = Some(task.cancel_handle());
                }
            }
        };

        let run = run_with_retry(task, &self.policy, prepare);
        tokio::pin!(run);

        let outcome = tokio::select! {
            outcome = &mut run => outcome?,
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, cancelling transfer");
                let active = current.lock().ok().and_then(|mut slot| slot.take());
                match active {
                    Some(handle) if handle.cancel() => run.await?,
                    _ => bail!("interrupted"),
                }
            }
        };
        eprintln!();

        let report = outcome.task.report();
        if let Err(e) = &outcome.result {
            warn!(attempts = outcome.attempts, error = %e, "transfer did not complete");
        }
        Ok(report)
    }
}

/// Key for an upload: `--to` if given, else `<prefix>/<file name>`.
fn upload_key(prefix: &str, file_name: &str, to: Option<&str>) -> anyhow::Result<ResourcePath> {
    let key = match to {
        Some(to) => to.parse()?,
        None => ResourcePath::new(prefix)?.child(file_name)?,
    };
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use picstash_transfer::TaskState;

    fn test_config(dir: &Path) -> Config {
        let mut config = Config {
            storage_root: dir.join("store"),
            chunk_size: 64,
            ..Config::default()
        };
        config.retry.max_attempts = 1;
        config
    }

    #[test]
    fn upload_key_defaults_to_prefix() {
        assert_eq!(
            upload_key("images", "nature.jpg", None).unwrap().as_str(),
            "images/nature.jpg"
        );
        assert_eq!(
            upload_key("images", "nature.jpg", Some("albums/2024/n.jpg"))
                .unwrap()
                .as_str(),
            "albums/2024/n.jpg"
        );
        assert!(upload_key("images", "x.jpg", Some("../escape.jpg")).is_err());
    }

    #[tokio::test]
    async fn upload_download_and_stat() {
        let tmp = tempfile::tempdir().unwrap();
        let session = Session::open(&test_config(tmp.path())).unwrap();
        let source = tmp.path().join("cat.png");
        std::fs::write(&source, vec![7u8; 500]).unwrap();

        let report = session.upload(&source, None, None).await.unwrap();
        assert_eq!(report.state, TaskState::Succeeded);
        assert_eq!(report.resource_path.as_str(), "images/cat.png");
        assert_eq!(report.bytes_transferred, 500);

        let meta = session.stat("images/cat.png").await.unwrap();
        assert_eq!(meta.content_type, "image/png");
        assert_eq!(meta.size, 500);

        let dest = tmp.path().join("out").join("cat.png");
        let report = session.download("images/cat.png", dest.clone()).await.unwrap();
        assert_eq!(report.state, TaskState::Succeeded);
        assert_eq!(std::fs::read(&dest).unwrap(), vec![7u8; 500]);
    }

    #[tokio::test]
    async fn failed_download_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let session = Session::open(&test_config(tmp.path())).unwrap();

        let report = session
            .download("images/none.png", tmp.path().join("none.png"))
            .await
            .unwrap();
        assert_eq!(report.state, TaskState::Failed);
        assert_eq!(report.error.as_deref(), Some("resource not found"));
    }

    #[tokio::test]
    async fn stat_missing_key_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let session = Session::open(&test_config(tmp.path())).unwrap();
        assert!(session.stat("images/none.png").await.is_err());
        assert!(session.stat("/absolute").await.is_err());
    }
}
