//! The sync orchestrator.
//!
//! Runs the upload and download pipelines against a store and publishes a
//! [`SyncJobStatus`] stream. Each direction runs at most once at a time;
//! the two directions may overlap with each other and with ordinary CRUD.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard, broadcast};
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::core::EngineStore;
use crate::error::{EngineResult, SyncError};

use super::conflict::ConflictResolver;
use super::download::{DownloadSummary, run_download};
use super::remote::RemoteDataSource;
use super::status::{SyncDirection, SyncJobState, SyncJobStatus};
use super::upload::{UploadRequestResult, plan_upload};

/// Outcome of one upload run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadSummary {
    /// One result per request, in send order.
    pub results: Vec<UploadRequestResult>,
}

impl UploadSummary {
    /// Returns true if every request was accepted.
    pub fn is_success(&self) -> bool {
        self.results.iter().all(UploadRequestResult::is_success)
    }

    /// Number of rejected requests.
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.is_success()).count()
    }
}

/// Outcome of a full synchronization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSummary {
    /// The download half.
    pub download: DownloadSummary,
    /// The upload half.
    pub upload: UploadSummary,
}

/// Drives upload and download for one store.
pub struct SyncOrchestrator {
    store: Arc<dyn EngineStore>,
    config: SyncConfig,
    status: broadcast::Sender<SyncJobStatus>,
    upload_lock: Mutex<()>,
    download_lock: Mutex<()>,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("backend", &self.store.backend_name())
            .field("config", &self.config)
            .finish()
    }
}

impl SyncOrchestrator {
    /// Creates an orchestrator over `store`.
    pub fn new(store: Arc<dyn EngineStore>, config: SyncConfig) -> Self {
        let (status, _) = broadcast::channel(config.status_buffer.max(1));
        Self {
            store,
            config,
            status,
            upload_lock: Mutex::new(()),
            download_lock: Mutex::new(()),
        }
    }

    /// Subscribes to status events. Events sent before subscribing are not
    /// replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncJobStatus> {
        self.status.subscribe()
    }

    /// The sync settings.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn emit(&self, direction: SyncDirection, state: SyncJobState) {
        let _ = self.status.send(SyncJobStatus::new(direction, state));
    }

    fn lock(&self, direction: SyncDirection) -> Result<MutexGuard<'_, ()>, SyncError> {
        let lock = match direction {
            SyncDirection::Upload => &self.upload_lock,
            SyncDirection::Download => &self.download_lock,
        };
        lock.try_lock().map_err(|_| SyncError::AlreadyRunning {
            direction: direction.to_string(),
        })
    }

    /// Reports a job's end and records the sync time on success.
    async fn finish<T>(
        &self,
        direction: SyncDirection,
        result: EngineResult<T>,
        succeeded: impl FnOnce(&T) -> Option<String>,
    ) -> EngineResult<T> {
        let failure = match &result {
            Ok(value) => succeeded(value),
            Err(e) => Some(e.to_string()),
        };
        match failure {
            None => {
                let timestamp = Utc::now();
                self.store.set_last_sync_timestamp(timestamp).await?;
                tracing::info!(%direction, "Sync succeeded");
                self.emit(direction, SyncJobState::Succeeded { timestamp });
            }
            Some(error) => {
                tracing::warn!(%direction, error = %error, "Sync failed");
                self.emit(direction, SyncJobState::Failed { error });
            }
        }
        result
    }

    /// Uploads all pending local changes.
    ///
    /// Requests are sent one after another. A rejected request keeps its
    /// changes pending and does not stop the requests after it. Cancelling
    /// returns [`SyncError::Cancelled`]: a request still in flight is
    /// abandoned with its changes pending, while requests already accepted
    /// stay consolidated.
    pub async fn upload(
        &self,
        remote: &dyn RemoteDataSource,
        cancel: &CancellationToken,
    ) -> EngineResult<UploadSummary> {
        let _guard = self.lock(SyncDirection::Upload)?;
        self.emit(SyncDirection::Upload, SyncJobState::Started);
        tracing::info!("Upload started");

        let result = self.run_upload(remote, cancel).await;
        self.finish(SyncDirection::Upload, result, |summary| {
            (!summary.is_success()).then(|| {
                format!(
                    "{} of {} upload request(s) failed",
                    summary.failed(),
                    summary.results.len()
                )
            })
        })
        .await
    }

    async fn run_upload(
        &self,
        remote: &dyn RemoteDataSource,
        cancel: &CancellationToken,
    ) -> EngineResult<UploadSummary> {
        let pending = self.store.pending_changes().await?;
        let requests = plan_upload(
            pending,
            self.config.upload_strategy,
            self.config.upload_ordering,
            self.config.use_if_match,
        );
        let total = requests.len();
        let mut summary = UploadSummary::default();

        for (index, request) in requests.into_iter().enumerate() {
            let tokens = request.tokens();
            let resources = request.len();
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(resources, "Upload cancelled, request changes kept pending");
                    return Err(SyncError::Cancelled.into());
                }
                response = remote.upload(request) => response,
            };
            let result = match response {
                Ok(response) => {
                    self.store.consolidate_upload(&tokens, &response.acks).await?;
                    UploadRequestResult::Success {
                        tokens,
                        acks: response.acks,
                    }
                }
                Err(error) => {
                    tracing::warn!(resources, error = %error, "Upload request failed, changes kept pending");
                    UploadRequestResult::Failure { tokens, error }
                }
            };
            summary.results.push(result);
            self.emit(
                SyncDirection::Upload,
                SyncJobState::InProgress {
                    completed: index + 1,
                    total,
                },
            );
        }

        Ok(summary)
    }

    /// Downloads remote changes, resolving conflicts with `resolver`.
    ///
    /// Each batch is merged atomically. On failure the batches merged so
    /// far stay and the download can simply be run again.
    pub async fn download(
        &self,
        remote: &dyn RemoteDataSource,
        resolver: &dyn ConflictResolver,
        cancel: &CancellationToken,
    ) -> EngineResult<DownloadSummary> {
        let _guard = self.lock(SyncDirection::Download)?;
        self.emit(SyncDirection::Download, SyncJobState::Started);
        tracing::info!("Download started");

        let result = run_download(self.store.as_ref(), remote, resolver, cancel, |batches| {
            self.emit(
                SyncDirection::Download,
                SyncJobState::InProgress {
                    completed: batches,
                    total: 0,
                },
            )
        })
        .await;
        if let Ok(summary) = &result {
            tracing::info!(
                batches = summary.batches,
                stored = summary.stored,
                conflicts = summary.conflicts,
                "Download finished"
            );
        }
        self.finish(SyncDirection::Download, result, |_| None).await
    }

    /// Downloads, then uploads.
    ///
    /// A failed download stops the run before anything is uploaded, so
    /// conflicts are always settled against the latest remote state.
    pub async fn synchronize(
        &self,
        remote: &dyn RemoteDataSource,
        resolver: &dyn ConflictResolver,
        cancel: &CancellationToken,
    ) -> EngineResult<SyncSummary> {
        let download = self.download(remote, resolver, cancel).await?;
        let upload = self.upload(remote, cancel).await?;
        Ok(SyncSummary { download, upload })
    }
}
