//! HTTP surface of the gateway
//!
//! Transport-agnostic pipeline behind a small axum API:
//!
//! - `POST /query` - answer a question
//! - `GET /stats` - cache counters and breaker status
//! - `POST /invalidate` - drop cache entries by key, source or wholesale
//! - `GET /health` - liveness
//! - `GET /ready` - readiness (all required adapters pingable)
//! - `GET /metrics` - Prometheus scrape body

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use helpdesk_rag_adapters::{
    AnthropicChat, Embedder, HttpEmbedder, LlmClient, OpenAiChat, QdrantStore, VectorStore,
};
use helpdesk_rag_cache::{CacheStats, SemanticCache, SemanticCacheConfig};
use helpdesk_rag_core::{
    AnswerMode, ErrorObject, GatewayConfig, GatewayError, LlmProvider, Query, SourceId,
};
use helpdesk_rag_engine::{EngineConfig, QueryEngine, SourceSelector};
use helpdesk_rag_resilience::{BreakerConfig, BreakerRegistry, BreakerStatus};
use helpdesk_rag_responder::{ResponderConfig, ResponseBuilder};

use crate::pipeline::Pipeline;

/// Shared state behind the HTTP handlers
pub struct AppState {
    pub pipeline: Pipeline,
    pub cache: Arc<SemanticCache>,
    pub breakers: Arc<BreakerRegistry>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn VectorStore>,
    pub llm: Arc<dyn LlmClient>,
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    /// Assemble the whole pipeline from a configuration and the three
    /// adapters. Tests inject mocks here; the launcher passes the real
    /// HTTP clients from [`build_adapters`].
    pub fn assemble(
        config: &GatewayConfig,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let cache = Arc::new(SemanticCache::new(SemanticCacheConfig::from_settings(
            &config.cache,
        )));
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig {
            failure_threshold: config.breaker.failure_threshold,
            window: config.breaker.window,
            failure_rate: config.breaker.failure_rate,
            cool_down: config.breaker.cool_down(),
            cool_down_max: config.breaker.cool_down_max(),
        }));

        let selector = SourceSelector::new(config.enabled_sources(), &config.clients);
        let engine = QueryEngine::new(
            store.clone(),
            breakers.clone(),
            selector,
            EngineConfig::from_config(config),
        );
        let responder = ResponseBuilder::new(
            llm.clone(),
            breakers.get_or_create("llm"),
            ResponderConfig {
                context_token_budget: config.pipeline.context_token_budget,
                llm_timeout: std::time::Duration::from_secs(20),
            },
        );
        let pipeline = Pipeline::new(cache.clone(), embedder.clone(), engine, responder, config);

        Self {
            pipeline,
            cache,
            breakers,
            embedder,
            store,
            llm,
            prometheus: None,
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}

/// Construct the real HTTP adapters from the configuration
pub fn build_adapters(
    config: &GatewayConfig,
) -> (Arc<dyn Embedder>, Arc<dyn VectorStore>, Arc<dyn LlmClient>) {
    let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(&config.embedding));
    let store: Arc<dyn VectorStore> = Arc::new(QdrantStore::new(&config.vector_store));
    let llm: Arc<dyn LlmClient> = match config.llm.provider {
        LlmProvider::OpenAi => Arc::new(OpenAiChat::new(&config.llm)),
        LlmProvider::Anthropic => Arc::new(AnthropicChat::new(&config.llm)),
    };
    (embedder, store, llm)
}

/// Wire request body for `POST /query`
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub text: String,
    #[serde(default)]
    pub mode: Option<AnswerMode>,
    #[serde(default)]
    pub sources: Option<Vec<String>>,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub allow_semantic: Option<bool>,
}

impl QueryRequest {
    fn into_query(self) -> Query {
        let mut query = Query::new(self.text);
        if let Some(mode) = self.mode {
            query = query.with_mode(mode);
        }
        if let Some(sources) = self.sources {
            query = query.with_sources(sources.iter().map(|s| SourceId::new(s.clone())).collect());
        }
        if let Some(tenant) = self.tenant {
            query = query.with_tenant(tenant);
        }
        if self.allow_semantic == Some(false) {
            query = query.without_semantic_reuse();
        }
        query
    }
}

/// Wire request body for `POST /invalidate`
#[derive(Debug, Default, Deserialize)]
pub struct InvalidateRequest {
    /// Exact fingerprint to drop
    pub key: Option<String>,
    /// Drop every answer citing this source
    pub source: Option<String>,
    /// Drop everything
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub removed: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub cache: CacheStats,
    pub breakers: Vec<BreakerStatus>,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub failures: Vec<String>,
}

struct ApiError(GatewayError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorObject::from(&self.0))).into_response()
    }
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<helpdesk_rag_core::Answer>, ApiError> {
    let answer = state
        .pipeline
        .handle(request.into_query())
        .await
        .map_err(ApiError)?;
    Ok(Json(answer))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        cache: state.cache.stats(),
        breakers: state.breakers.all_status(),
    })
}

async fn invalidate_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>, ApiError> {
    let removed = if request.all {
        state.cache.invalidate_where(|_| true)
    } else if let Some(key) = request.key {
        usize::from(state.cache.invalidate_key(&key))
    } else if let Some(source) = request.source {
        let source = SourceId::new(source);
        state
            .cache
            .invalidate_where(|entry| entry.value.citations.iter().any(|c| c.source == source))
    } else {
        return Err(ApiError(GatewayError::BadRequest(
            "one of key, source or all is required".into(),
        )));
    };
    Ok(Json(InvalidateResponse { removed }))
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn ready_handler(State(state): State<Arc<AppState>>) -> Response {
    let (embedding, store, llm) = tokio::join!(
        state.embedder.ping(),
        state.store.ping(),
        state.llm.ping()
    );

    let mut failures = Vec::new();
    if let Err(e) = embedding {
        failures.push(format!("embedding: {e}"));
    }
    if let Err(e) = store {
        failures.push(format!("vector_store: {e}"));
    }
    if let Err(e) = llm {
        failures.push(format!("llm: {e}"));
    }

    let ready = failures.is_empty();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ReadyResponse { ready, failures })).into_response()
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics exporter not installed").into_response(),
    }
}

/// Build the axum router over the shared state
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", post(query_handler))
        .route("/stats", get(stats_handler))
        .route("/invalidate", post(invalidate_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve until the process is stopped
pub async fn run(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    let router = build_router(state);
    info!(addr = %listener.local_addr()?, "gateway listening");
    axum::serve(listener, router).await
}
