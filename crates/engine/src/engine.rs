//! The engine facade.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::backends::sqlite::SqliteBackend;
use crate::changes::LocalChange;
use crate::config::EngineConfig;
use crate::core::{EngineStore, LocalChangeStore, ResourceStorage, SearchProvider, SyncStore};
use crate::error::{EngineResult, SearchError};
use crate::search::{R4Adapter, RESOURCE_BASE, ResourceAdapter, SearchParameterDefinition};
use crate::sync::{
    ConflictResolver, DownloadSummary, RemoteDataSource, SyncJobStatus, SyncOrchestrator,
    SyncSummary, UploadSummary,
};
use crate::types::{SearchQuery, SearchResult, StoredResource};

/// An offline FHIR store: CRUD, search, local change tracking and sync.
///
/// Construct one per database and pass it to whatever needs it; cloning
/// the surrounding `Arc` is the only way to share it.
///
/// # Example
///
/// ```no_run
/// use helios_engine::FhirEngine;
/// use helios_engine::types::{SearchParameter, SearchPrefix, SearchQuery, SearchValue};
/// use serde_json::json;
///
/// # async fn example() -> helios_engine::EngineResult<()> {
/// let engine = FhirEngine::open("./data/engine.db")?;
///
/// let ids = engine
///     .create(vec![json!({"resourceType": "Patient", "name": [{"family": "Smith"}]})])
///     .await?;
/// let patient = engine.get("Patient", &ids[0]).await?;
///
/// let query = SearchQuery::new("Patient")
///     .with_parameter(SearchParameter::single("family", SearchValue::new(SearchPrefix::Eq, "smi")));
/// assert_eq!(engine.search(&query).await?.len(), 1);
///
/// // Not allowed while the insert is still waiting for upload.
/// assert!(engine.purge("Patient", &ids, false).await.is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FhirEngine {
    backend: Arc<SqliteBackend>,
    sync: SyncOrchestrator,
}

impl FhirEngine {
    /// Creates an engine from configuration, indexing R4 resources.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        Self::with_adapter(config, Arc::new(R4Adapter::new()))
    }

    /// Creates an engine from configuration and a schema adapter.
    pub fn with_adapter(config: EngineConfig, adapter: Arc<dyn ResourceAdapter>) -> EngineResult<Self> {
        let backend = Arc::new(SqliteBackend::new(&config, adapter)?);
        let store: Arc<dyn EngineStore> = backend.clone();
        let sync = SyncOrchestrator::new(store, config.sync);
        tracing::info!(backend = ?backend, "Engine ready");
        Ok(Self { backend, sync })
    }

    /// An engine over a fresh in-memory database.
    pub fn in_memory() -> EngineResult<Self> {
        Self::new(EngineConfig::default())
    }

    /// An engine over a database file, created if missing.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        Self::new(EngineConfig::with_path(path.as_ref()))
    }

    /// The underlying store.
    pub fn backend(&self) -> &SqliteBackend {
        &self.backend
    }

    /// Creates resources as local inserts, all or none. Resources without
    /// an id get a generated one. Returns the ids in input order.
    pub async fn create(&self, resources: Vec<Value>) -> EngineResult<Vec<String>> {
        let created = self.backend.create(resources).await?;
        Ok(created.into_iter().map(|r| r.id().to_string()).collect())
    }

    /// Stores resources received from the server, without local changes.
    pub async fn create_remote(&self, resources: Vec<Value>) -> EngineResult<()> {
        self.backend.create_remote(resources).await?;
        Ok(())
    }

    /// Reads a resource.
    pub async fn get(&self, resource_type: &str, id: &str) -> EngineResult<StoredResource> {
        self.backend.read(resource_type, id).await
    }

    /// Updates resources as local changes, all or none.
    pub async fn update(&self, resources: Vec<Value>) -> EngineResult<()> {
        self.backend.update(resources).await?;
        Ok(())
    }

    /// Deletes a resource as a local change.
    pub async fn delete(&self, resource_type: &str, id: &str) -> EngineResult<()> {
        self.backend.delete(resource_type, id).await
    }

    /// Runs a search.
    pub async fn search(&self, query: &SearchQuery) -> EngineResult<Vec<SearchResult>> {
        self.backend.search(query).await
    }

    /// Counts the matches of a search, ignoring paging.
    pub async fn count(&self, query: &SearchQuery) -> EngineResult<u64> {
        self.backend.count(query).await
    }

    /// The unsquashed changes recorded for one resource, oldest first.
    pub async fn get_local_changes(&self, resource_type: &str, id: &str) -> EngineResult<Vec<LocalChange>> {
        self.backend.local_changes(resource_type, id).await
    }

    /// Squashed pending changes, one per resource, in first-touched order.
    pub async fn pending_changes(&self) -> EngineResult<Vec<LocalChange>> {
        self.backend.pending_changes().await
    }

    /// Number of resources with pending changes.
    pub async fn pending_count(&self) -> EngineResult<usize> {
        self.backend.pending_count().await
    }

    /// Removes resources without recording changes.
    ///
    /// Without `force`, a resource with pending changes is rejected with
    /// [`ResourceError::HasPendingChanges`](crate::error::ResourceError::HasPendingChanges);
    /// with it, those changes are dropped too.
    pub async fn purge(&self, resource_type: &str, ids: &[String], force: bool) -> EngineResult<()> {
        self.backend.purge(resource_type, ids, force).await
    }

    /// Deletes every resource, change and sync record.
    pub async fn clear(&self) -> EngineResult<()> {
        self.backend.clear().await
    }

    /// When the last upload or download completed without failure.
    pub async fn last_sync_timestamp(&self) -> EngineResult<Option<DateTime<Utc>>> {
        self.backend.last_sync_timestamp().await
    }

    /// Adds a search parameter and indexes existing resources with it.
    ///
    /// Returns the number of resources re-indexed.
    pub async fn register_search_parameter(&self, param: SearchParameterDefinition) -> EngineResult<usize> {
        let base = param.base.clone();
        let code = param.code.clone();
        let expression = param.expression.clone();
        self.backend
            .extractor()
            .register(param)
            .map_err(|e| SearchError::InvalidValue {
                name: code,
                value: expression,
                message: e.to_string(),
            })?;

        let types = if base.iter().any(|b| b == RESOURCE_BASE) {
            self.backend.stored_resource_types()?
        } else {
            base
        };
        let mut reindexed = 0;
        for resource_type in &types {
            reindexed += self.backend.reindex(resource_type)?;
        }
        Ok(reindexed)
    }

    /// Subscribes to sync status events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncJobStatus> {
        self.sync.subscribe()
    }

    /// Uploads pending changes to `remote`.
    pub async fn upload(
        &self,
        remote: &dyn RemoteDataSource,
        cancel: &CancellationToken,
    ) -> EngineResult<UploadSummary> {
        self.sync.upload(remote, cancel).await
    }

    /// Downloads from `remote`, settling conflicts with `resolver`.
    pub async fn download(
        &self,
        remote: &dyn RemoteDataSource,
        resolver: &dyn ConflictResolver,
        cancel: &CancellationToken,
    ) -> EngineResult<DownloadSummary> {
        self.sync.download(remote, resolver, cancel).await
    }

    /// Downloads, then uploads.
    pub async fn synchronize(
        &self,
        remote: &dyn RemoteDataSource,
        resolver: &dyn ConflictResolver,
        cancel: &CancellationToken,
    ) -> EngineResult<SyncSummary> {
        self.sync.synchronize(remote, resolver, cancel).await
    }
}
