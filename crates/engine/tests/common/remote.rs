//! A scripted remote server for sync tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use helios_engine::changes::LocalChangeKind;
use helios_engine::error::SyncError;
use helios_engine::sync::{
    DownloadContext, DownloadStream, RemoteDataSource, UploadAck, UploadRequest, UploadResponse,
};

/// Records uploads, rejects the ones touching chosen resources, and replays
/// scripted download batches.
#[derive(Default)]
pub struct MockRemote {
    uploads: Mutex<Vec<UploadRequest>>,
    rejected_ids: Mutex<HashSet<String>>,
    batches: Mutex<Vec<Result<Vec<Value>, SyncError>>>,
    contexts: Mutex<Vec<DownloadContext>>,
    versions: AtomicUsize,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every upload request containing a change for `id`.
    pub fn reject(&self, id: &str) {
        self.rejected_ids.lock().insert(id.to_string());
    }

    /// Accepts everything from now on.
    pub fn accept_all(&self) {
        self.rejected_ids.lock().clear();
    }

    /// Adds a download batch.
    pub fn push_batch(&self, resources: Vec<Value>) {
        self.batches.lock().push(Ok(resources));
    }

    /// Adds a failing download batch.
    pub fn push_failure(&self, message: &str) {
        self.batches.lock().push(Err(SyncError::Download {
            message: message.to_string(),
        }));
    }

    /// Drops the scripted download batches.
    pub fn clear_batches(&self) {
        self.batches.lock().clear();
    }

    /// Cancels `token` once `uploads` requests have been received.
    pub fn cancel_after(&self, uploads: usize, token: CancellationToken) {
        *self.cancel_after.lock() = Some((uploads, token));
    }

    /// Every upload request received, in order.
    pub fn uploads(&self) -> Vec<UploadRequest> {
        self.uploads.lock().clone()
    }

    /// The ids carried by each upload request.
    pub fn uploaded_ids(&self) -> Vec<Vec<String>> {
        self.uploads
            .lock()
            .iter()
            .map(|r| r.changes.iter().map(|c| c.resource_id.clone()).collect())
            .collect()
    }

    /// Every download context received.
    pub fn contexts(&self) -> Vec<DownloadContext> {
        self.contexts.lock().clone()
    }
}

#[async_trait]
impl RemoteDataSource for MockRemote {
    async fn upload(&self, request: UploadRequest) -> Result<UploadResponse, SyncError> {
        let received = {
            let mut uploads = self.uploads.lock();
            uploads.push(request.clone());
            uploads.len()
        };
        if let Some((after, token)) = self.cancel_after.lock().as_ref() {
            if received >= *after {
                token.cancel();
            }
        }

        let rejected = {
            let ids = self.rejected_ids.lock();
            request.changes.iter().any(|c| ids.contains(&c.resource_id))
        };
        if rejected {
            return Err(SyncError::Upload {
                resources: request.len(),
                message: "412 Precondition Failed".to_string(),
            });
        }

        let acks = request
            .changes
            .iter()
            .filter(|c| c.kind != LocalChangeKind::Delete)
            .map(|c| UploadAck {
                resource_type: c.resource_type.clone(),
                id: c.resource_id.clone(),
                version_id: Some((self.versions.fetch_add(1, Ordering::SeqCst) + 1).to_string()),
                last_updated: Some(Utc::now()),
            })
            .collect();
        Ok(UploadResponse { acks })
    }

    async fn download(&self, context: DownloadContext) -> Result<DownloadStream, SyncError> {
        self.contexts.lock().push(context);
        let batches = self.batches.lock().clone();
        Ok(futures::stream::iter(batches).boxed())
    }
}
