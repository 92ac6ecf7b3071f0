//! Synchronization with a remote server.
//!
//! - [`RemoteDataSource`] - the transport seam, implemented by the
//!   networking layer
//! - [`ConflictResolver`] - the application's decision on conflicts
//! - [`UploadStrategy`] / [`UploadOrdering`] - how pending changes are sent
//! - [`SyncOrchestrator`] - runs upload, download and full syncs and
//!   publishes [`SyncJobStatus`] events
//!
//! # Example
//!
//! ```no_run
//! use helios_engine::FhirEngine;
//! use helios_engine::sync::{AcceptRemoteConflictResolver, RemoteDataSource};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(engine: FhirEngine, remote: &dyn RemoteDataSource) -> helios_engine::EngineResult<()> {
//! let mut events = engine.subscribe();
//! let summary = engine
//!     .synchronize(remote, &AcceptRemoteConflictResolver, &CancellationToken::new())
//!     .await?;
//! println!("uploaded with {} failure(s)", summary.upload.failed());
//! while let Ok(status) = events.try_recv() {
//!     println!("{:?}", status);
//! }
//! # Ok(())
//! # }
//! ```

mod conflict;
mod download;
mod orchestrator;
mod remote;
mod status;
mod upload;

pub use conflict::{
    AcceptLocalConflictResolver, AcceptRemoteConflictResolver, ConflictResolution,
    ConflictResolver,
};
pub use download::DownloadSummary;
pub use orchestrator::{SyncOrchestrator, SyncSummary, UploadSummary};
pub use remote::{
    DownloadContext, DownloadStream, RemoteDataSource, UploadAck, UploadRequest, UploadResponse,
};
pub use status::{SyncDirection, SyncJobState, SyncJobStatus};
pub use upload::{UploadOrdering, UploadRequestResult, UploadStrategy, plan_upload};
