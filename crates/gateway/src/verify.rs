//! Structured claim-verification sub-protocol.
//!
//! Claims touching credentials or security incidents route to the `cipher`
//! agent under the `audit` intent; everything else goes to `prism` under
//! `analyze`. The model is instructed to answer with a single JSON verdict
//! object, extracted here with a balanced-brace scan so nested objects
//! inside the reasoning string survive.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use blackroad_policy::{compose, PolicyDocument, PromptDocument};
use blackroad_providers::{invoke_with_fallback, DispatchError};

use crate::{ErrorBody, SharedState};

/// Claim terms that route to the audit agent.
const SENSITIVE_TERMS: [&str; 8] = [
    "password",
    "secret",
    "key",
    "token",
    "vulnerability",
    "exploit",
    "breach",
    "hack",
];

const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

const RECOGNIZED_VERDICTS: [&str; 4] = ["true", "false", "unverified", "conflicting"];

#[derive(Deserialize)]
struct VerifyRequest {
    claim: String,

    #[serde(default)]
    sources: Vec<String>,

    #[serde(default)]
    confidence_threshold: Option<f64>,
}

#[derive(Serialize)]
struct VerifyResponse {
    status: &'static str,
    verdict: String,
    confidence: f64,
    reasoning: String,
    agent_used: String,
    sources_checked: usize,
    flags: Vec<String>,
    timestamp: String,
}

/// `POST /v1/verify`
pub(crate) async fn verify_handler(
    State(state): State<SharedState>,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let request_id = Uuid::new_v4().to_string();

    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid JSON", &request_id),
    };
    let request: VerifyRequest = match serde_json::from_value(parsed) {
        Ok(req) => req,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid verify request: {e}"),
                &request_id,
            )
        }
    };
    if request.claim.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Field 'claim' must be a non-empty string",
            &request_id,
        );
    }

    let (agent, intent) = route_claim(&request.claim);

    let policy_doc = match PolicyDocument::load(&state.config.policy_path) {
        Ok(doc) => doc,
        Err(e) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), &request_id)
        }
    };
    let agent_policy = match policy_doc.resolve(agent, intent) {
        Ok(policy) => policy,
        Err(e) => {
            // The verification agents are part of the deployment's policy;
            // their absence is a configuration fault, not a caller error.
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Verification agent unavailable: {e}"),
                &request_id,
            );
        }
    };

    let Some(picked) = policy_doc.pick_provider(None, agent_policy, intent) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Provider not configured",
            &request_id,
        );
    };

    let prompts = PromptDocument::load(&state.config.prompt_path);
    let system = compose(prompts.as_ref(), agent, intent, None);
    let input = verification_prompt(&request.claim, &request.sources);

    let args = blackroad_core::InvokeArgs {
        input,
        system,
        context: None,
        request_id: request_id.clone(),
        agent: agent.to_string(),
        intent: intent.to_string(),
    };
    let deadline = std::time::Duration::from_secs(state.config.provider_timeout_secs);
    let dispatched = invoke_with_fallback(
        &state.registry,
        &picked,
        &agent_policy.fallback_chain,
        args,
        deadline,
    )
    .await;

    let latency_ms = started.elapsed().as_millis() as u64;
    let outcome = match dispatched {
        Ok(outcome) => outcome,
        Err(DispatchError::NoProvider) => {
            state.metrics.record(Some(agent), None, false);
            return error_response(
                StatusCode::BAD_REQUEST,
                "Provider not configured",
                &request_id,
            );
        }
        Err(e) => {
            state.metrics.record(Some(agent), None, false);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), &request_id);
        }
    };

    let threshold = request
        .confidence_threshold
        .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD)
        .clamp(0.0, 1.0);
    let mut verdict = parse_verdict(&outcome.output);
    if verdict.confidence < threshold && !verdict.flags.iter().any(|f| f == "low_confidence") {
        verdict.flags.push("low_confidence".into());
    }

    info!(
        request_id = %request_id,
        agent = %agent,
        provider = %outcome.provider,
        verdict = %verdict.verdict,
        latency_ms,
        "Verify call ok"
    );
    state.metrics.record(Some(agent), Some(&outcome.provider), true);

    // Journal the verify result; detached and best-effort like agent calls.
    let journal_fields = verify_journal_entry(
        agent,
        intent,
        &outcome.provider,
        &verdict,
        &request.claim,
        &request_id,
    );
    let state_for_sink = state.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(e) = state_for_sink.journal.record(journal_fields) {
            warn!(error = %e, "Journal append failed");
        }
    });

    let response = VerifyResponse {
        status: "ok",
        verdict: verdict.verdict,
        confidence: verdict.confidence,
        reasoning: verdict.reasoning,
        agent_used: agent.to_string(),
        sources_checked: request.sources.len(),
        flags: verdict.flags,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    (StatusCode::OK, Json(response)).into_response()
}

fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    request_id: &str,
) -> Response {
    (
        status,
        Json(ErrorBody::with_request_id(error, request_id)),
    )
        .into_response()
}

/// Route a claim to the responsible agent/intent pair.
fn route_claim(claim: &str) -> (&'static str, &'static str) {
    let lower = claim.to_lowercase();
    if SENSITIVE_TERMS.iter().any(|term| lower.contains(term)) {
        ("cipher", "audit")
    } else {
        ("prism", "analyze")
    }
}

/// The fixed instruction prompt sent to the model.
fn verification_prompt(claim: &str, sources: &[String]) -> String {
    let mut prompt = String::with_capacity(claim.len() + 512);
    prompt.push_str(
        "Assess the following claim. Respond with ONLY a JSON object of this exact shape:\n\
         {\"verdict\":\"true\"|\"false\"|\"unverified\"|\"conflicting\",\
         \"confidence\":<number between 0 and 1>,\
         \"reasoning\":\"<short explanation>\",\
         \"flags\":[<strings>]}\n\
         No prose before or after the JSON object.\n\nClaim: ",
    );
    prompt.push_str(claim);
    if !sources.is_empty() {
        prompt.push_str("\n\nSources to consider:\n");
        for source in sources {
            prompt.push_str("- ");
            prompt.push_str(source);
            prompt.push('\n');
        }
    }
    prompt
}

struct Verdict {
    verdict: String,
    confidence: f64,
    reasoning: String,
    flags: Vec<String>,
}

#[derive(Deserialize)]
struct RawVerdict {
    #[serde(default)]
    verdict: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    flags: Option<Vec<String>>,
}

/// Parse the model output into a normalized verdict.
///
/// Failure at any step degrades to `unverified` at confidence 0.5 with the
/// raw output preserved as reasoning.
fn parse_verdict(output: &str) -> Verdict {
    let fallback = || Verdict {
        verdict: "unverified".into(),
        confidence: 0.5,
        reasoning: output.to_string(),
        flags: Vec::new(),
    };

    let Some(json) = extract_json_object(output) else {
        return fallback();
    };
    let Ok(raw) = serde_json::from_str::<RawVerdict>(json) else {
        return fallback();
    };

    let verdict = raw
        .verdict
        .map(|v| v.to_lowercase())
        .filter(|v| RECOGNIZED_VERDICTS.contains(&v.as_str()))
        .unwrap_or_else(|| "unverified".into());

    Verdict {
        verdict,
        confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
        reasoning: raw.reasoning.unwrap_or_default(),
        flags: raw.flags.unwrap_or_default(),
    }
}

/// Find the first balanced `{…}` substring.
///
/// String- and escape-aware so braces inside the reasoning text do not
/// terminate the scan early.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in text.as_bytes().iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn verify_journal_entry(
    agent: &str,
    intent: &str,
    provider: &str,
    verdict: &Verdict,
    claim: &str,
    request_id: &str,
) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("type".into(), Value::String("verify".into()));
    fields.insert("agent".into(), Value::String(agent.to_string()));
    fields.insert("intent".into(), Value::String(intent.to_string()));
    fields.insert("provider".into(), Value::String(provider.to_string()));
    fields.insert("verdict".into(), Value::String(verdict.verdict.clone()));
    fields.insert("confidence".into(), Value::from(verdict.confidence));
    let mut claim_excerpt: String = claim.chars().take(200).collect();
    if claim_excerpt.len() < claim.len() {
        claim_excerpt.push('…');
    }
    fields.insert("claim".into(), Value::String(claim_excerpt));
    fields.insert("request_id".into(), Value::String(request_id.to_string()));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_claims_route_to_cipher() {
        assert_eq!(route_claim("the admin PASSWORD leaked"), ("cipher", "audit"));
        assert_eq!(route_claim("new exploit in the wild"), ("cipher", "audit"));
        assert_eq!(route_claim("a data breach occurred"), ("cipher", "audit"));
    }

    #[test]
    fn ordinary_claims_route_to_prism() {
        assert_eq!(route_claim("the sky is green"), ("prism", "analyze"));
        assert_eq!(route_claim("water boils at 90C"), ("prism", "analyze"));
    }

    #[test]
    fn extracts_simple_object() {
        let text = "Sure! Here is the result: {\"verdict\":\"false\"} thanks";
        assert_eq!(extract_json_object(text), Some("{\"verdict\":\"false\"}"));
    }

    #[test]
    fn extraction_tolerates_nested_objects_and_braces_in_strings() {
        let text = r#"prefix {"verdict":"true","reasoning":"the {set} of facts","meta":{"n":1}} suffix"#;
        let extracted = extract_json_object(text).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(extracted).unwrap();
        assert_eq!(parsed["verdict"], "true");
        assert_eq!(parsed["meta"]["n"], 1);
    }

    #[test]
    fn extraction_tolerates_escaped_quotes() {
        let text = r#"{"reasoning":"he said \"no {brace}\"","verdict":"false"}"#;
        let extracted = extract_json_object(text).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(extracted).unwrap();
        assert_eq!(parsed["verdict"], "false");
    }

    #[test]
    fn no_object_returns_none() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("unbalanced { oops"), None);
    }

    #[test]
    fn parse_valid_verdict() {
        let v = parse_verdict(r#"{"verdict":"false","confidence":0.9,"reasoning":"sky is blue","flags":[]}"#);
        assert_eq!(v.verdict, "false");
        assert!((v.confidence - 0.9).abs() < f64::EPSILON);
        assert_eq!(v.reasoning, "sky is blue");
    }

    #[test]
    fn unparseable_output_degrades_to_unverified() {
        let v = parse_verdict("I think it might be true?");
        assert_eq!(v.verdict, "unverified");
        assert!((v.confidence - 0.5).abs() < f64::EPSILON);
        assert_eq!(v.reasoning, "I think it might be true?");
        assert!(v.flags.is_empty());
    }

    #[test]
    fn unknown_verdicts_collapse_to_unverified() {
        let v = parse_verdict(r#"{"verdict":"maybe","confidence":0.8}"#);
        assert_eq!(v.verdict, "unverified");
    }

    #[test]
    fn confidence_is_clamped() {
        let v = parse_verdict(r#"{"verdict":"true","confidence":7.5}"#);
        assert!((v.confidence - 1.0).abs() < f64::EPSILON);

        let v = parse_verdict(r#"{"verdict":"true","confidence":-2}"#);
        assert!(v.confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn prompt_includes_claim_and_sources() {
        let prompt = verification_prompt("the sky is green", &["almanac".into()]);
        assert!(prompt.contains("the sky is green"));
        assert!(prompt.contains("- almanac"));
        assert!(prompt.contains("\"verdict\""));
    }
}
