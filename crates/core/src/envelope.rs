//! Request and response envelopes for the agent endpoint.
//!
//! The inbound envelope is validated field-by-field so the caller gets a
//! specific message for the first problem found, not a generic serde error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A validated inbound agent request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub agent: String,
    pub intent: String,
    pub input: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// Validate a parsed JSON body into an [`AgentRequest`].
///
/// Returns the first violation as a message suitable for a 400 response.
/// Accepted inputs round-trip unchanged: validation never rewrites fields.
pub fn validate_request(body: &Value) -> std::result::Result<AgentRequest, String> {
    let obj = body
        .as_object()
        .ok_or_else(|| "Request body must be a JSON object".to_string())?;

    let agent = require_string(obj, "agent")?;
    let intent = require_string(obj, "intent")?;
    let input = require_string(obj, "input")?;

    let context = match obj.get("context") {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(_) => return Err("Field 'context' must be an object".into()),
    };

    let provider = match obj.get("provider") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err("Field 'provider' must be a string".into()),
    };

    Ok(AgentRequest {
        agent,
        intent,
        input,
        context,
        provider,
    })
}

fn require_string(obj: &Map<String, Value>, field: &str) -> std::result::Result<String, String> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(format!("Field '{field}' must be a string")),
        None => Err(format!("Missing field '{field}'")),
    }
}

/// The uniform outbound envelope.
///
/// On error `output` is always the empty string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    pub output: String,
    pub request_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub metadata: ResponseMetadata,
}

impl AgentResponse {
    /// A successful envelope.
    pub fn ok(
        provider: impl Into<String>,
        output: impl Into<String>,
        request_id: impl Into<String>,
        metadata: ResponseMetadata,
    ) -> Self {
        Self {
            status: "ok".into(),
            provider: Some(provider.into()),
            output: output.into(),
            request_id: request_id.into(),
            error: None,
            metadata,
        }
    }

    /// An error envelope. `output` is the empty string by construction.
    pub fn error(
        error: impl Into<String>,
        request_id: impl Into<String>,
        metadata: ResponseMetadata,
    ) -> Self {
        Self {
            status: "error".into(),
            provider: None,
            output: String::new(),
            request_id: request_id.into(),
            error: Some(error.into()),
            metadata,
        }
    }
}

/// Per-response metadata; optional fields are omitted from the JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub latency_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_per_minute: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}
