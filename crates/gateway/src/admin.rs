//! Introspection endpoints: metrics, agents, providers, memory, worlds.
//!
//! Everything here except the worlds proxy is loopback-only unless
//! `allow_remote` is set — these endpoints expose operational detail that
//! has no business leaving the machine.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use blackroad_policy::PolicyDocument;
use blackroad_telemetry::MetricsSnapshot;

use crate::{ErrorBody, RemoteAddr, SharedState};

type AdminResult<T> = Result<Json<T>, (StatusCode, Json<ErrorBody>)>;

fn ensure_local(state: &SharedState, remote: &RemoteAddr) -> Result<(), (StatusCode, Json<ErrorBody>)> {
    if state.config.allow_remote || remote.is_local() {
        Ok(())
    } else {
        Err((
            StatusCode::FORBIDDEN,
            Json(ErrorBody::new("Remote access denied")),
        ))
    }
}

fn internal(error: impl std::fmt::Display) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody::new(error.to_string())),
    )
}

// ── /metrics ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub(crate) struct MetricsResponse {
    status: &'static str,
    metrics: MetricsSnapshot,
}

pub(crate) async fn metrics_handler(
    State(state): State<SharedState>,
    remote: RemoteAddr,
) -> AdminResult<MetricsResponse> {
    ensure_local(&state, &remote)?;
    Ok(Json(MetricsResponse {
        status: "ok",
        metrics: state.metrics.snapshot(),
    }))
}

// ── /v1/agents ────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub(crate) struct AgentSummary {
    name: String,
    description: String,
    intents: Vec<String>,
    providers: Vec<String>,
    default_provider: Option<String>,
    rate_limit: u32,
    usage_last_minute: usize,
}

#[derive(Serialize)]
pub(crate) struct AgentsResponse {
    status: &'static str,
    count: usize,
    agents: Vec<AgentSummary>,
}

pub(crate) async fn agents_handler(
    State(state): State<SharedState>,
    remote: RemoteAddr,
) -> AdminResult<AgentsResponse> {
    ensure_local(&state, &remote)?;

    let doc = PolicyDocument::load(&state.config.policy_path).map_err(internal)?;

    let mut agents: Vec<AgentSummary> = doc
        .agents
        .iter()
        .map(|(name, policy)| AgentSummary {
            name: name.clone(),
            description: policy.description.clone(),
            intents: policy.allowed_intents.clone(),
            providers: policy.allowed_providers.clone(),
            default_provider: policy.default_provider.clone(),
            rate_limit: doc.effective_rate_limit(policy),
            usage_last_minute: state.limiter.usage(name),
        })
        .collect();
    agents.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Json(AgentsResponse {
        status: "ok",
        count: agents.len(),
        agents,
    }))
}

// ── /v1/providers ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub(crate) struct ProvidersResponse {
    status: &'static str,
    providers: Vec<String>,
}

pub(crate) async fn providers_handler(
    State(state): State<SharedState>,
    remote: RemoteAddr,
) -> AdminResult<ProvidersResponse> {
    ensure_local(&state, &remote)?;
    Ok(Json(ProvidersResponse {
        status: "ok",
        providers: state.registry.list(),
    }))
}

// ── /v1/memory and /v1/memory/recent ──────────────────────────────────────

#[derive(Serialize)]
pub(crate) struct MemoryOverview {
    entries: u64,
    last_hash: String,
    context_keys: usize,
    session_counts: std::collections::HashMap<String, u64>,
}

#[derive(Serialize)]
pub(crate) struct MemoryResponse {
    status: &'static str,
    memory: MemoryOverview,
}

pub(crate) async fn memory_handler(
    State(state): State<SharedState>,
    remote: RemoteAddr,
) -> AdminResult<MemoryResponse> {
    ensure_local(&state, &remote)?;

    let stats = state.journal.stats();
    Ok(Json(MemoryResponse {
        status: "ok",
        memory: MemoryOverview {
            entries: stats.entries,
            last_hash: stats.last_hash,
            context_keys: state.context.key_count(),
            session_counts: stats.session_counts,
        },
    }))
}

#[derive(Deserialize)]
pub(crate) struct RecentParams {
    limit: Option<usize>,
}

#[derive(Serialize)]
pub(crate) struct MemoryRecentResponse {
    status: &'static str,
    entries: Vec<Value>,
}

pub(crate) async fn memory_recent_handler(
    State(state): State<SharedState>,
    remote: RemoteAddr,
    Query(params): Query<RecentParams>,
) -> AdminResult<MemoryRecentResponse> {
    ensure_local(&state, &remote)?;

    let limit = params.limit.unwrap_or(20).min(500);
    let entries = state.journal.recent(limit).map_err(internal)?;
    Ok(Json(MemoryRecentResponse {
        status: "ok",
        entries,
    }))
}

// ── /v1/worlds ────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub(crate) struct WorldsResponse {
    status: &'static str,
    worlds: Value,
}

pub(crate) async fn worlds_handler(
    State(state): State<SharedState>,
) -> AdminResult<WorldsResponse> {
    let upstream = async {
        let response = state
            .http
            .get(&state.config.worlds_url)
            .send()
            .await?
            .error_for_status()?;
        response.json::<Value>().await
    }
    .await;

    match upstream {
        Ok(worlds) => Ok(Json(WorldsResponse {
            status: "ok",
            worlds,
        })),
        Err(e) => {
            warn!(url = %state.config.worlds_url, error = %e, "Worlds feed unavailable");
            Err((
                StatusCode::BAD_GATEWAY,
                Json(ErrorBody::new("Worlds feed unavailable")),
            ))
        }
    }
}
