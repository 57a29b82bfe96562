//! The agent request pipeline.
//!
//! State machine per request:
//!
//! ```text
//! parse → validate → authorize-agent → authorize-intent → byte-check
//!      → rate-check → select-provider → authorize-provider
//!      → compose-prompt → dispatch → record-rate → respond
//!      → (finally) metrics + journal + access log
//! ```
//!
//! The finally block runs whatever the outcome: metrics tick after the
//! response status is known, journal and access-log writes are detached
//! and best-effort.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use blackroad_core::{validate_request, AgentResponse, PolicyError, ResponseMetadata};
use blackroad_policy::{compose, PolicyDocument, PromptDocument};
use blackroad_providers::{invoke_with_fallback, DispatchError};

use crate::access_log::AccessRecord;
use crate::{RemoteAddr, SharedState};

pub(crate) struct PipelineSuccess {
    pub agent: String,
    pub intent: String,
    pub provider: String,
    pub output: String,
    pub fallback: bool,
}

pub(crate) struct PipelineFailure {
    pub status: StatusCode,
    pub error: String,
    pub agent: Option<String>,
    pub intent: Option<String>,
    pub limit_per_minute: Option<u32>,
}

impl PipelineFailure {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            agent: None,
            intent: None,
            limit_per_minute: None,
        }
    }

    fn for_agent(mut self, agent: &str, intent: &str) -> Self {
        self.agent = Some(agent.to_string());
        self.intent = Some(intent.to_string());
        self
    }
}

/// `POST /v1/agent`
pub(crate) async fn agent_handler(
    State(state): State<SharedState>,
    remote: RemoteAddr,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let request_id = Uuid::new_v4().to_string();

    let outcome = run(&state, &body, &request_id).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    let (response, journal_fields, log_record) = match outcome {
        Ok(success) => {
            info!(
                request_id = %request_id,
                agent = %success.agent,
                provider = %success.provider,
                fallback = success.fallback,
                latency_ms,
                "Agent call ok"
            );
            state
                .metrics
                .record(Some(&success.agent), Some(&success.provider), true);

            let journal_fields = journal_entry(
                &success.agent,
                &success.intent,
                Some(&success.provider),
                "ok",
                None,
                &request_id,
                latency_ms,
            );
            let log_record = access_record(
                &remote,
                &request_id,
                Some(&success.agent),
                Some(&success.intent),
                Some(&success.provider),
                "ok",
                StatusCode::OK,
                latency_ms,
            );

            let envelope = AgentResponse::ok(
                &success.provider,
                &success.output,
                &request_id,
                ResponseMetadata {
                    latency_ms,
                    fallback: Some(success.fallback),
                    ..Default::default()
                },
            );
            (
                (StatusCode::OK, Json(envelope)).into_response(),
                Some(journal_fields),
                log_record,
            )
        }
        Err(failure) => {
            warn!(
                request_id = %request_id,
                status = failure.status.as_u16(),
                error = %failure.error,
                "Agent call failed"
            );
            state
                .metrics
                .record(failure.agent.as_deref(), None, false);

            // Journal only calls with an established agent identity;
            // malformed bodies have nothing to attribute.
            let journal_fields = failure.agent.as_deref().map(|agent| {
                journal_entry(
                    agent,
                    failure.intent.as_deref().unwrap_or(""),
                    None,
                    "error",
                    Some(&failure.error),
                    &request_id,
                    latency_ms,
                )
            });
            let log_record = access_record(
                &remote,
                &request_id,
                failure.agent.as_deref(),
                failure.intent.as_deref(),
                None,
                "error",
                failure.status,
                latency_ms,
            );

            let mut metadata = ResponseMetadata {
                latency_ms,
                ..Default::default()
            };
            if let Some(limit) = failure.limit_per_minute {
                metadata.limit_per_minute = Some(limit);
                metadata.retry_after_seconds = Some(60);
            }

            let envelope = AgentResponse::error(&failure.error, &request_id, metadata);
            (
                (failure.status, Json(envelope)).into_response(),
                journal_fields,
                log_record,
            )
        }
    };

    // Detached, best-effort persistence; never affects the response.
    let state_for_sink = state.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(e) = state_for_sink.access_log.append(&log_record) {
            warn!(error = %e, "Access log append failed");
        }
        if let Some(fields) = journal_fields {
            if let Err(e) = state_for_sink.journal.record(fields) {
                warn!(error = %e, "Journal append failed");
            }
        }
    });

    response
}

async fn run(
    state: &SharedState,
    body: &Bytes,
    request_id: &str,
) -> Result<PipelineSuccess, PipelineFailure> {
    // parse
    let parsed: Value = serde_json::from_slice(body)
        .map_err(|_| PipelineFailure::new(StatusCode::BAD_REQUEST, "Invalid JSON"))?;

    // validate
    let request = validate_request(&parsed)
        .map_err(|msg| PipelineFailure::new(StatusCode::BAD_REQUEST, msg))?;
    let agent = request.agent.clone();
    let intent = request.intent.clone();

    // authorize agent + intent
    let policy_doc = PolicyDocument::load(&state.config.policy_path).map_err(|e| {
        PipelineFailure::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            .for_agent(&agent, &intent)
    })?;
    let agent_policy = match policy_doc.resolve(&agent, &intent) {
        Ok(policy) => policy,
        Err(e @ PolicyError::AgentNotAllowed) | Err(e @ PolicyError::IntentNotAllowed) => {
            return Err(PipelineFailure::new(StatusCode::FORBIDDEN, e.to_string())
                .for_agent(&agent, &intent));
        }
        Err(e) => {
            return Err(
                PipelineFailure::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                    .for_agent(&agent, &intent),
            );
        }
    };

    // byte-check: budget is on the input field, measured in UTF-8 bytes
    if request.input.len() as u64 > agent_policy.max_input_bytes {
        return Err(
            PipelineFailure::new(StatusCode::PAYLOAD_TOO_LARGE, "Input too large")
                .for_agent(&agent, &intent),
        );
    }

    // rate-check
    let limit = policy_doc.effective_rate_limit(agent_policy);
    if !state.limiter.check(&agent, limit) {
        let mut failure =
            PipelineFailure::new(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded")
                .for_agent(&agent, &intent);
        failure.limit_per_minute = Some(limit);
        return Err(failure);
    }

    // select-provider
    let picked = policy_doc
        .pick_provider(request.provider.as_deref(), agent_policy, &intent)
        .ok_or_else(|| {
            PipelineFailure::new(StatusCode::BAD_REQUEST, "Provider not configured")
                .for_agent(&agent, &intent)
        })?;

    // authorize-provider: check the canonical name against the allowlist
    let canonical = state.registry.canonical(&picked);
    if !agent_policy.allows_provider(&canonical) && !agent_policy.allows_provider(&picked) {
        return Err(
            PipelineFailure::new(StatusCode::FORBIDDEN, "Provider not allowed")
                .for_agent(&agent, &intent),
        );
    }

    // compose-prompt
    let prompts = PromptDocument::load(&state.config.prompt_path);
    let system = compose(prompts.as_ref(), &agent, &intent, request.context.as_ref());

    // dispatch
    let args = blackroad_core::InvokeArgs {
        input: request.input.clone(),
        system,
        context: request.context.clone().map(Value::Object),
        request_id: request_id.to_string(),
        agent: agent.clone(),
        intent: intent.clone(),
    };
    let deadline = std::time::Duration::from_secs(state.config.provider_timeout_secs);
    let outcome = invoke_with_fallback(
        &state.registry,
        &picked,
        &agent_policy.fallback_chain,
        args,
        deadline,
    )
    .await
    .map_err(|e| match e {
        DispatchError::NoProvider => {
            PipelineFailure::new(StatusCode::BAD_REQUEST, "Provider not configured")
                .for_agent(&agent, &intent)
        }
        DispatchError::Single(err) => {
            PipelineFailure::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
                .for_agent(&agent, &intent)
        }
        DispatchError::Exhausted(message) => {
            PipelineFailure::new(StatusCode::INTERNAL_SERVER_ERROR, message)
                .for_agent(&agent, &intent)
        }
    })?;

    // record-rate: only successful dispatches consume quota
    state.limiter.record(&agent);

    Ok(PipelineSuccess {
        agent,
        intent,
        provider: outcome.provider,
        output: outcome.output,
        fallback: outcome.fallback,
    })
}

#[allow(clippy::too_many_arguments)]
fn journal_entry(
    agent: &str,
    intent: &str,
    provider: Option<&str>,
    status: &str,
    error: Option<&str>,
    request_id: &str,
    latency_ms: u64,
) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("type".into(), Value::String("agent_call".into()));
    fields.insert("agent".into(), Value::String(agent.to_string()));
    fields.insert("intent".into(), Value::String(intent.to_string()));
    if let Some(provider) = provider {
        fields.insert("provider".into(), Value::String(provider.to_string()));
    }
    fields.insert("status".into(), Value::String(status.to_string()));
    if let Some(error) = error {
        fields.insert("error".into(), Value::String(error.to_string()));
    }
    fields.insert("request_id".into(), Value::String(request_id.to_string()));
    fields.insert("latency_ms".into(), Value::from(latency_ms));
    fields
}

#[allow(clippy::too_many_arguments)]
fn access_record(
    remote: &RemoteAddr,
    request_id: &str,
    agent: Option<&str>,
    intent: Option<&str>,
    provider: Option<&str>,
    status: &str,
    http_status: StatusCode,
    latency_ms: u64,
) -> AccessRecord {
    AccessRecord {
        ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        request_id: request_id.to_string(),
        remote: remote.display(),
        method: "POST".into(),
        path: "/v1/agent".into(),
        agent: agent.map(str::to_string),
        intent: intent.map(str::to_string),
        provider: provider.map(str::to_string),
        status: status.to_string(),
        http_status: http_status.as_u16(),
        latency_ms,
    }
}
