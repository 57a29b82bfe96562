//! HTTP gateway for BlackRoad agent callers.
//!
//! Exposes the agent request pipeline, the claim-verification sub-protocol,
//! and the introspection endpoints (health, metrics, agents, providers,
//! memory, worlds proxy).
//!
//! Built on Axum; every response is a uniform JSON envelope.

pub mod access_log;
pub mod admin;
pub mod pipeline;
pub mod verify;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::{DefaultBodyLimit, FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tracing::info;

use blackroad_config::GatewayConfig;
use blackroad_memory::{ContextStore, MemoryJournal};
use blackroad_providers::{registry, ProviderRegistry};
use blackroad_telemetry::{MetricsRegistry, RateLimiter};

use access_log::AccessLog;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub registry: ProviderRegistry,
    pub metrics: MetricsRegistry,
    pub limiter: RateLimiter,
    pub journal: MemoryJournal,
    pub context: ContextStore,
    pub access_log: AccessLog,
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Client for the worlds feed proxy.
    pub http: reqwest::Client,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    /// Build state from configuration, wiring providers from the config
    /// and the `*_API_KEY` environment.
    pub fn from_config(config: GatewayConfig) -> Result<Self, blackroad_core::Error> {
        let providers = registry::build_from_config(&config);
        Self::with_registry(config, providers)
    }

    /// Build state with an explicit provider registry (tests inject mocks
    /// here).
    pub fn with_registry(
        config: GatewayConfig,
        providers: ProviderRegistry,
    ) -> Result<Self, blackroad_core::Error> {
        let journal = MemoryJournal::open(config.journal_path())?;
        let context = ContextStore::new(config.context_path());
        let access_log = AccessLog::new(&config.log_path);
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| blackroad_core::Error::Internal(e.to_string()))?;

        Ok(Self {
            config,
            registry: providers,
            metrics: MetricsRegistry::new(),
            limiter: RateLimiter::new(),
            journal,
            context,
            access_log,
            started_at: chrono::Utc::now(),
            http,
        })
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let max_body = state.config.max_body_bytes;
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(admin::metrics_handler))
        .route("/v1/agent", post(pipeline::agent_handler))
        .route("/v1/verify", post(verify::verify_handler))
        .route("/v1/agents", get(admin::agents_handler))
        .route("/v1/providers", get(admin::providers_handler))
        .route("/v1/memory", get(admin::memory_handler))
        .route("/v1/memory/recent", get(admin::memory_recent_handler))
        .route("/v1/worlds", get(admin::worlds_handler))
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(max_body))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.bind, config.port);
    let state = Arc::new(GatewayState::from_config(config)?);

    info!(
        addr = %addr,
        providers = state.registry.len(),
        "Gateway starting"
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

// ── Remote address plumbing ───────────────────────────────────────────────

/// The peer address, when the transport provided one.
///
/// Requests arriving through `into_make_service_with_connect_info` carry a
/// `ConnectInfo` extension; in-process test requests usually do not, and an
/// absent address counts as local — the listener itself binds loopback
/// unless `allow_remote` is set.
pub struct RemoteAddr(pub Option<SocketAddr>);

impl RemoteAddr {
    pub fn is_local(&self) -> bool {
        match self.0 {
            Some(addr) => addr.ip().is_loopback(),
            None => true,
        }
    }

    pub fn display(&self) -> Option<String> {
        self.0.map(|addr| addr.to_string())
    }
}

impl<S> FromRequestParts<S> for RemoteAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0),
        ))
    }
}

// ── Shared envelopes ──────────────────────────────────────────────────────

/// The generic error envelope used outside the agent pipeline.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub error: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            status: "error",
            error: error.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(error: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            status: "error",
            error: error.into(),
            request_id: Some(request_id.into()),
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    gateway: &'static str,
    version: &'static str,
    providers: Vec<String>,
    uptime: i64,
    timestamp: String,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    let now = chrono::Utc::now();
    Json(HealthResponse {
        status: "ok",
        gateway: "blackroad-gateway",
        version: env!("CARGO_PKG_VERSION"),
        providers: state.registry.list(),
        uptime: (now - state.started_at).num_seconds(),
        timestamp: now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    })
}

async fn not_found_handler() -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody::with_request_id(
            "Not found",
            uuid::Uuid::new_v4().to_string(),
        )),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig {
            memory_dir: dir.path().join("memory"),
            log_path: dir.path().join("logs/gateway.jsonl"),
            ..GatewayConfig::default()
        };
        // Leak the tempdir so the state outlives this constructor.
        std::mem::forget(dir);
        Arc::new(GatewayState::with_registry(config, ProviderRegistry::new()).unwrap())
    }

    #[tokio::test]
    async fn health_endpoint_is_open() {
        let app = build_router(test_state());

        for path in ["/health", "/healthz"] {
            let req = Request::builder().uri(path).body(Body::empty()).unwrap();
            let response = app.clone().oneshot(req).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);

            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(body["status"], "ok");
            assert_eq!(body["gateway"], "blackroad-gateway");
            assert!(body["timestamp"].as_str().is_some());
        }
    }

    #[tokio::test]
    async fn unknown_route_yields_envelope_404() {
        let app = build_router(test_state());
        let req = Request::builder()
            .uri("/v1/unknown")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "Not found");
        assert!(body["request_id"].as_str().is_some());
    }

    #[test]
    fn missing_connect_info_counts_as_local() {
        assert!(RemoteAddr(None).is_local());
        assert!(RemoteAddr(Some("127.0.0.1:9999".parse().unwrap())).is_local());
        assert!(!RemoteAddr(Some("10.1.2.3:9999".parse().unwrap())).is_local());
    }
}
