//! Server assembly: application state, router, and serving.
//!
//! The state is built once from explicit collaborators (no hidden
//! process-wide state); handlers receive it through axum's `State`
//! extractor.

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use podium_engine::cache::{CacheIndex, InMemoryCacheIndex};
use podium_engine::config::EngineConfig;
use podium_engine::credentials::CredentialVault;
use podium_engine::dispatcher::Dispatcher;
use podium_engine::evaluator::{Evaluator, ScriptedEvaluator};
use podium_engine::metrics::EngineMetrics;
use podium_engine::queue::{InMemoryJobQueue, JobQueue};
use podium_engine::registry::{InMemoryTaskRegistry, TaskRegistry};
use podium_engine::samples::{InMemorySampleStore, SampleStore};
use podium_engine::taxonomy::SubjectTaxonomy;
use podium_engine::worker::{WorkerContext, WorkerPool};

use crate::config::ApiConfig;
use crate::openapi::openapi_json;
use crate::routes;

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The evaluation dispatcher (C5).
    pub dispatcher: Arc<Dispatcher>,
    /// Task registry (C3).
    pub registry: Arc<dyn TaskRegistry>,
    /// Sample store (C2).
    pub samples: Arc<dyn SampleStore>,
    /// Cache index (C4).
    pub cache: Arc<dyn CacheIndex>,
    /// Job queue (C6).
    pub queue: Arc<dyn JobQueue>,
    /// Credential vault.
    pub vault: Arc<CredentialVault>,
    /// The pluggable evaluator.
    pub evaluator: Arc<dyn Evaluator>,
    /// Engine configuration.
    pub engine_config: Arc<EngineConfig>,
    /// Server configuration.
    pub api_config: ApiConfig,
    /// Worker loops this process runs.
    pub worker_count: usize,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("api_config", &self.api_config)
            .field("worker_count", &self.worker_count)
            .finish_non_exhaustive()
    }
}

/// Builds a [`Server`] with overridable collaborators.
pub struct ServerBuilder {
    api_config: ApiConfig,
    engine_config: EngineConfig,
    evaluator: Option<Arc<dyn Evaluator>>,
    taxonomy: SubjectTaxonomy,
}

impl ServerBuilder {
    /// Starts from default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_config: ApiConfig::default(),
            engine_config: EngineConfig::default(),
            evaluator: None,
            taxonomy: SubjectTaxonomy::builtin(),
        }
    }

    /// Sets the server configuration.
    #[must_use]
    pub fn api_config(mut self, config: ApiConfig) -> Self {
        self.api_config = config;
        self
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    /// Plugs in an evaluator. Defaults to a perfect-score scripted
    /// evaluator, which is only useful for development and tests.
    #[must_use]
    pub fn evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Supplies the subject taxonomy.
    #[must_use]
    pub fn taxonomy(mut self, taxonomy: SubjectTaxonomy) -> Self {
        self.taxonomy = taxonomy;
        self
    }

    /// Wires the stores, vault, dispatcher, and state together.
    #[must_use]
    pub fn build(self) -> Server {
        let engine_config = Arc::new(self.engine_config);
        let registry: Arc<dyn TaskRegistry> = Arc::new(
            InMemoryTaskRegistry::with_progress_interval(engine_config.progress_min_interval),
        );
        let samples: Arc<dyn SampleStore> = Arc::new(InMemorySampleStore::new());
        let cache: Arc<dyn CacheIndex> = Arc::new(InMemoryCacheIndex::new());
        let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new(
            "podium-jobs",
            engine_config.lease_ttl,
        ));
        let vault = Arc::new(CredentialVault::new(engine_config.credential_envelope_ttl));
        let evaluator = self
            .evaluator
            .unwrap_or_else(|| Arc::new(ScriptedEvaluator::perfect()));

        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            cache.clone(),
            queue.clone(),
            vault.clone(),
            self.taxonomy,
            engine_config.clone(),
        ));

        Server {
            state: AppState {
                dispatcher,
                registry,
                samples,
                cache,
                queue,
                vault,
                evaluator,
                worker_count: engine_config.worker_concurrency,
                engine_config,
                api_config: self.api_config,
            },
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The assembled control plane.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the shared state.
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Spawns the worker pool backing this server.
    #[must_use]
    pub fn spawn_workers(&self) -> WorkerPool {
        WorkerPool::spawn(WorkerContext {
            registry: self.state.registry.clone(),
            samples: self.state.samples.clone(),
            cache: self.state.cache.clone(),
            queue: self.state.queue.clone(),
            vault: self.state.vault.clone(),
            evaluator: self.state.evaluator.clone(),
            config: self.state.engine_config.clone(),
            metrics: EngineMetrics::new(),
        })
    }

    /// Builds the HTTP router with tracing and CORS layers.
    #[must_use]
    pub fn router(&self) -> Router {
        let cors = cors_layer(&self.state.api_config);

        Router::new()
            .merge(routes::evaluate::router())
            .merge(routes::tasks::router())
            .merge(routes::leaderboard::router())
            .merge(routes::maintenance::router())
            .merge(routes::status::router())
            .route("/openapi.json", get(|| async { Json(openapi_json()) }))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }

    /// Binds the configured address and serves until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the bind or accept loop fails.
    pub async fn serve(self) -> std::io::Result<()> {
        let addr = self.state.api_config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(addr = %addr, "podium control plane listening");
        axum::serve(listener, self.router()).await
    }
}

fn cors_layer(config: &ApiConfig) -> CorsLayer {
    if config.cors.allowed_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = config
        .cors
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}
