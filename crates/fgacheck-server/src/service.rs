//! Check service: wires storage, registered models and the resolver chain.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use ulid::Ulid;

use fgacheck_domain::cache::{CacheMetricsSnapshot, CheckCacheConfig, CheckQueryCache};
use fgacheck_domain::model::{tuple, AuthorizationModel, TupleKey, TypeSystem};
use fgacheck_domain::resolver::{
    CheckResolverBuilder, CheckResolverChain, CombinedTupleReader, LocalCheckerConfig,
    ResolutionContext, ResolutionMetadata, ResolveCheckRequest, TupleReader,
};
use fgacheck_domain::DomainError;
use fgacheck_storage::{DataStore, StorageError, Store};

use crate::adapters::{to_stored_tuple, DataStoreTupleReader};
use crate::config::{CheckSettings, ServerConfig};

/// A single check as submitted by a caller.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub store_id: String,
    /// Model to check against; the latest model of the store when `None`.
    pub authorization_model_id: Option<String>,
    pub tuple_key: TupleKey,
    pub contextual_tuples: Vec<TupleKey>,
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl CheckRequest {
    pub fn new(store_id: impl Into<String>, tuple_key: TupleKey) -> Self {
        Self {
            store_id: store_id.into(),
            authorization_model_id: None,
            tuple_key,
            contextual_tuples: Vec::new(),
            context: serde_json::Map::new(),
        }
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.authorization_model_id = Some(model_id.into());
        self
    }

    pub fn with_contextual_tuples(mut self, tuples: Vec<TupleKey>) -> Self {
        self.contextual_tuples = tuples;
        self
    }

    pub fn with_context(mut self, context: serde_json::Map<String, serde_json::Value>) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResponse {
    pub allowed: bool,
    pub resolution_metadata: ResolutionMetadata,
    /// Sub-checks dispatched while resolving the request.
    pub dispatch_count: u32,
}

/// Errors returned by [`CheckService`].
#[derive(Debug, Error)]
pub enum CheckServiceError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("authorization model '{model_id}' not found in store '{store_id}'")]
    ModelNotFound { store_id: String, model_id: String },

    #[error("{count} contextual tuples exceed the maximum of {max}")]
    TooManyContextualTuples { count: usize, max: usize },

    #[error("check timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

pub type CheckServiceResult<T> = Result<T, CheckServiceError>;

fn invalid_request(message: impl Into<String>) -> CheckServiceError {
    CheckServiceError::InvalidRequest {
        message: message.into(),
    }
}

/// Answers checks against the tuples of a [`DataStore`].
pub struct CheckService<S: DataStore> {
    datastore: Arc<S>,
    /// Registered models per store, oldest first.
    models: DashMap<String, Vec<Arc<TypeSystem>>>,
    chain: CheckResolverChain,
    cache: Option<Arc<CheckQueryCache>>,
    settings: CheckSettings,
}

impl<S: DataStore> CheckService<S> {
    pub fn new(datastore: Arc<S>, config: &ServerConfig) -> Self {
        let cache = config.check_query_cache.enabled.then(|| {
            Arc::new(CheckQueryCache::new(
                CheckCacheConfig::default()
                    .with_max_capacity(config.check_query_cache.limit)
                    .with_ttl(config.check_query_cache.ttl()),
            ))
        });

        let mut builder = CheckResolverBuilder::new().with_local_checker_config(
            LocalCheckerConfig::default()
                .with_concurrency_limit(config.check.resolve_node_breadth_limit),
        );
        if let Some(cache) = &cache {
            builder = builder.with_shared_cache(Arc::clone(cache));
        }

        Self {
            datastore,
            models: DashMap::new(),
            chain: builder.build(),
            cache,
            settings: config.check.clone(),
        }
    }

    pub fn datastore(&self) -> &Arc<S> {
        &self.datastore
    }

    /// Hit and miss counts of the check cache, `None` when caching is disabled.
    pub fn cache_metrics(&self) -> Option<CacheMetricsSnapshot> {
        self.cache.as_ref().map(|cache| cache.metrics())
    }

    pub async fn create_store(&self, id: &str, name: &str) -> CheckServiceResult<Store> {
        Ok(self.datastore.create_store(id, name).await?)
    }

    /// Registers a model for a store and returns its id.
    ///
    /// The newest model is the one used by checks that name no model.
    pub async fn write_authorization_model(
        &self,
        store_id: &str,
        model: AuthorizationModel,
    ) -> CheckServiceResult<String> {
        self.datastore.get_store(store_id).await?;

        let model_id = Ulid::new().to_string();
        let typesystem = Arc::new(TypeSystem::new(model.with_id(model_id.clone())));
        self.models
            .entry(store_id.to_string())
            .or_default()
            .push(typesystem);

        info!(store_id, model_id = %model_id, "authorization model written");
        Ok(model_id)
    }

    /// Returns the requested model, or the latest one when `model_id` is `None`.
    pub fn authorization_model(
        &self,
        store_id: &str,
        model_id: Option<&str>,
    ) -> CheckServiceResult<Arc<TypeSystem>> {
        let not_found = || CheckServiceError::ModelNotFound {
            store_id: store_id.to_string(),
            model_id: model_id.unwrap_or("latest").to_string(),
        };

        let models = self.models.get(store_id).ok_or_else(not_found)?;
        let found = match model_id {
            Some(id) => models.iter().find(|ts| ts.model_id() == id),
            None => models.last(),
        };
        found.cloned().ok_or_else(not_found)
    }

    /// Applies deletes then writes, and drops every cached decision.
    ///
    /// Tuples are validated against the latest model when the store has one.
    pub async fn write_tuples(
        &self,
        store_id: &str,
        writes: Vec<TupleKey>,
        deletes: Vec<TupleKey>,
    ) -> CheckServiceResult<()> {
        let latest = self.authorization_model(store_id, None).ok();
        if let Some(typesystem) = &latest {
            if let Some(bad) = writes.iter().find(|t| !typesystem.is_tuple_valid(t)) {
                return Err(invalid_request(format!(
                    "tuple '{bad}' is not valid for model '{}'",
                    typesystem.model_id()
                )));
            }
        }

        let writes = writes
            .iter()
            .map(to_stored_tuple)
            .collect::<Result<Vec<_>, _>>()?;
        let deletes = deletes
            .iter()
            .map(to_stored_tuple)
            .collect::<Result<Vec<_>, _>>()?;
        let (written, deleted) = (writes.len(), deletes.len());

        self.datastore.write_tuples(store_id, writes, deletes).await?;

        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
        debug!(store_id, written, deleted, "tuples written");
        Ok(())
    }

    fn validate(&self, request: &CheckRequest) -> CheckServiceResult<()> {
        if !tuple::is_valid_tuple_key(&request.tuple_key) {
            return Err(invalid_request(format!(
                "invalid tuple key '{}'",
                request.tuple_key
            )));
        }

        let max = self.settings.max_contextual_tuples;
        if request.contextual_tuples.len() > max {
            return Err(CheckServiceError::TooManyContextualTuples {
                count: request.contextual_tuples.len(),
                max,
            });
        }
        Ok(())
    }

    /// Runs one check under the configured depth limit and deadline.
    ///
    /// On timeout the check's cancellation scope is cancelled so every
    /// in-flight branch stops.
    #[instrument(
        skip(self, request),
        fields(store_id = %request.store_id, tuple_key = %request.tuple_key)
    )]
    pub async fn check(&self, request: CheckRequest) -> CheckServiceResult<CheckResponse> {
        self.validate(&request)?;
        self.datastore.get_store(&request.store_id).await?;

        let typesystem =
            self.authorization_model(&request.store_id, request.authorization_model_id.as_deref())?;
        if let Some(bad) = request
            .contextual_tuples
            .iter()
            .find(|t| !typesystem.is_tuple_valid(t))
        {
            return Err(invalid_request(format!("invalid contextual tuple '{bad}'")));
        }

        let resolve_request = ResolveCheckRequest::new(
            request.store_id,
            typesystem.model_id(),
            request.tuple_key,
        )
        .with_contextual_tuples(request.contextual_tuples)
        .with_context(request.context)
        .with_max_depth(self.settings.resolve_node_limit);
        let dispatch_counter = Arc::clone(&resolve_request.request_metadata.dispatch_counter);

        let storage_reader: Arc<dyn TupleReader> =
            Arc::new(DataStoreTupleReader::new(Arc::clone(&self.datastore)));
        let reader: Arc<dyn TupleReader> = Arc::new(CombinedTupleReader::new(
            storage_reader,
            Arc::clone(&resolve_request.contextual_tuples),
        ));

        let token = CancellationToken::new();
        // Cancels in-flight branches if the caller drops this future.
        let _scope = token.clone().drop_guard();
        let ctx = ResolutionContext::new(typesystem, reader).with_cancellation(token.clone());

        let timeout = self.settings.request_timeout();
        let resolution = self.chain.resolve_check(&ctx, resolve_request);
        let response = match tokio::time::timeout(timeout, resolution).await {
            Ok(result) => result?,
            Err(_) => {
                token.cancel();
                warn!(timeout_ms = self.settings.request_timeout_ms, "check timed out");
                return Err(CheckServiceError::Timeout {
                    duration_ms: self.settings.request_timeout_ms,
                });
            }
        };

        let dispatch_count = dispatch_counter.load(std::sync::atomic::Ordering::Relaxed);
        debug!(
            allowed = response.allowed,
            datastore_query_count = response.datastore_query_count(),
            dispatch_count,
            "check resolved"
        );

        Ok(CheckResponse {
            allowed: response.allowed,
            resolution_metadata: response.resolution_metadata,
            dispatch_count,
        })
    }

    /// Closes the resolver chain and the check cache.
    pub fn close(&self) {
        self.chain.close();
        if let Some(cache) = &self.cache {
            cache.close();
        }
    }
}
