//! HTTP API Server
//!
//! REST API for operators: health and status queries, sync queue
//! introspection, and manual sync triggering. Peer-facing storage routes
//! (content upload, sync serving) belong to the storage engine, not here.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::network::DiscoveryClient;
use crate::queue::{JobRecord, JobState, QueueName};
use crate::replication::{IdentityResolver, SyncDispatcher, SyncJob, SyncType};
use crate::state::{QueueCounts, StateStore};

/// Shared application state
pub struct AppState {
    /// This node's endpoint
    pub endpoint: String,
    /// Whether this node participates in replication
    pub replication_enabled: bool,
    /// Development mode (short cycle delay)
    pub dev_mode: bool,
    /// Modulo base the cycle slices users over
    pub modulo_base: u64,
    /// Durable node state and queues
    pub store: Arc<StateStore>,
    /// Registry identity resolver
    pub identity: Arc<IdentityResolver>,
    /// Discovery provider client
    pub discovery: Arc<dyn DiscoveryClient>,
    /// Dispatcher for manual syncs
    pub dispatcher: SyncDispatcher,
    /// Process start time
    pub started_at: Instant,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ApiConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Create the router
    fn create_router(state: Arc<AppState>, cors_enabled: bool) -> Router {
        let mut router = Router::new()
            .route("/health", get(handle_health))
            .route("/status", get(handle_status))
            .route("/queue", get(handle_queue))
            .route("/manual_sync", post(handle_manual_sync))
            .with_state(state)
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

        if cors_enabled {
            router = router.layer(CorsLayer::permissive());
        }
        router
    }

    /// Start the HTTP server; runs until the shutdown token fires
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let app = Self::create_router(Arc::clone(&self.state), self.config.cors_enabled);

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Request/Response Types ============

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub endpoint: String,
    pub replication_enabled: bool,
}

/// Status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub endpoint: String,
    pub service_provider_id: Option<u64>,
    pub discovery_provider: Option<String>,
    pub replication_enabled: bool,
    pub dev_mode: bool,
    pub modulo_base: u64,
    pub current_slice: Option<u64>,
    pub cycle_started_at: Option<DateTime<Utc>>,
    pub cycle_queue: QueueCounts,
    pub sync_queue: QueueCounts,
    pub uptime_seconds: u64,
}

/// One sync queue entry as shown to operators
#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: i64,
    pub priority: String,
    pub state: String,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncJob>,
}

impl From<JobRecord> for JobView {
    fn from(record: JobRecord) -> Self {
        let sync = record.decode::<SyncJob>().ok();
        Self {
            id: record.id,
            priority: record.priority.to_string(),
            state: record.state.as_str().to_string(),
            enqueued_at: record.enqueued_at,
            sync,
        }
    }
}

/// Sync queue snapshot, split the way workers see it
#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub pending: Vec<JobView>,
    pub active: Vec<JobView>,
}

/// Manual sync request
#[derive(Debug, Deserialize, Serialize)]
pub struct ManualSyncRequest {
    pub wallet: String,
    pub secondary_endpoint: String,
}

/// Manual sync response
#[derive(Debug, Serialize)]
pub struct ManualSyncResponse {
    pub job_id: i64,
    pub priority: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// ============ Handlers ============

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        endpoint: state.endpoint.clone(),
        replication_enabled: state.replication_enabled,
    })
}

async fn handle_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let current_slice = match state.store.cycle_slice().await {
        Ok(slice) => slice,
        Err(e) => return store_error(e),
    };
    let cycle_started_at = match state.store.cycle_started_at().await {
        Ok(at) => at,
        Err(e) => return store_error(e),
    };
    let cycle_queue = match state.store.queue_counts(QueueName::Cycle).await {
        Ok(counts) => counts,
        Err(e) => return store_error(e),
    };
    let sync_queue = match state.store.queue_counts(QueueName::Sync).await {
        Ok(counts) => counts,
        Err(e) => return store_error(e),
    };

    let identity = state.identity.cached().await;
    let discovery_provider = state.discovery.current_endpoint().await;

    Json(StatusResponse {
        endpoint: state.endpoint.clone(),
        service_provider_id: identity.map(|i| i.service_provider_id),
        discovery_provider,
        replication_enabled: state.replication_enabled,
        dev_mode: state.dev_mode,
        modulo_base: state.modulo_base,
        current_slice,
        cycle_started_at,
        cycle_queue,
        sync_queue,
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
    .into_response()
}

async fn handle_queue(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let jobs = match state.store.jobs(QueueName::Sync).await {
        Ok(jobs) => jobs,
        Err(e) => return store_error(e),
    };

    let mut pending = Vec::new();
    let mut active = Vec::new();
    for job in jobs {
        match job.state {
            JobState::Pending => pending.push(JobView::from(job)),
            JobState::Active => active.push(JobView::from(job)),
        }
    }

    Json(QueueResponse { pending, active }).into_response()
}

async fn handle_manual_sync(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ManualSyncRequest>,
) -> impl IntoResponse {
    if !state.replication_enabled {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "Replication is disabled on this node".to_string(),
                code: "REPLICATION_DISABLED".to_string(),
            }),
        )
            .into_response();
    }

    if req.wallet.is_empty() || req.secondary_endpoint.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "wallet and secondary_endpoint are required".to_string(),
                code: "INVALID_REQUEST".to_string(),
            }),
        )
            .into_response();
    }

    match state
        .dispatcher
        .dispatch_manual(&req.wallet, &req.secondary_endpoint)
        .await
    {
        Ok(job_id) => Json(ManualSyncResponse {
            job_id,
            priority: SyncType::Manual.priority().to_string(),
        })
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Failed to enqueue manual sync: {}", e),
                code: "DISPATCH_FAILED".to_string(),
            }),
        )
            .into_response(),
    }
}

fn store_error(e: Error) -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: e.to_string(),
            code: "STORE_ERROR".to_string(),
        }),
    )
        .into_response()
}
