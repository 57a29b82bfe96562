//! Policy store — loads and resolves the agent/intent/provider matrix.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use blackroad_core::PolicyError;

/// Per-agent permissions and budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPolicy {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub allowed_intents: Vec<String>,

    #[serde(default)]
    pub allowed_providers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,

    /// Providers tried in order after the primary fails. Entries outside
    /// `allowed_providers` are skipped at dispatch, not rejected here.
    #[serde(default)]
    pub fallback_chain: Vec<String>,

    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: u64,

    /// 0 disables rate limiting; None falls back to the global default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_minute: Option<u32>,
}

fn default_max_input_bytes() -> u64 {
    1_048_576
}

impl AgentPolicy {
    /// Whether the intent is in this agent's allowed set.
    pub fn allows_intent(&self, intent: &str) -> bool {
        self.allowed_intents.iter().any(|i| i == intent)
    }

    /// Whether the provider name is in this agent's allowed set
    /// (case-insensitive, names are compared canonicalized by the caller).
    pub fn allows_provider(&self, provider: &str) -> bool {
        self.allowed_providers
            .iter()
            .any(|p| p.eq_ignore_ascii_case(provider))
    }
}

/// Global defaults applying when an agent omits its own setting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalPolicy {
    #[serde(default)]
    pub rate_limit_per_minute: u32,
}

/// The full policy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub global: GlobalPolicy,

    pub agents: HashMap<String, AgentPolicy>,

    /// Intent → provider routing, consulted when a request names no provider.
    #[serde(default)]
    pub intent_routes: HashMap<String, String>,

    /// Top-level fallback when no intent route matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,

    /// Opaque metadata, not used by dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_tiers: Option<serde_json::Value>,
}

fn default_version() -> u32 {
    2
}

impl PolicyDocument {
    /// Read and parse the policy file.
    ///
    /// Fails with [`PolicyError::MissingAgents`] when the document has no
    /// non-empty `agents` object — a policy that allows nobody is a
    /// deployment mistake, not an empty allowlist.
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let content = std::fs::read_to_string(path).map_err(|e| PolicyError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let doc: Self = serde_json::from_str(&content).map_err(|e| PolicyError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        if doc.agents.is_empty() {
            return Err(PolicyError::MissingAgents);
        }

        Ok(doc)
    }

    /// Resolve the policy for an agent/intent pair.
    ///
    /// Distinct errors for "agent not allowed" and "intent not allowed" so
    /// the pipeline can surface the right 403 message.
    pub fn resolve(&self, agent: &str, intent: &str) -> Result<&AgentPolicy, PolicyError> {
        let policy = self.agents.get(agent).ok_or(PolicyError::AgentNotAllowed)?;
        if !policy.allows_intent(intent) {
            return Err(PolicyError::IntentNotAllowed);
        }
        Ok(policy)
    }

    /// Pick the provider for a request.
    ///
    /// Order: explicit request → intent route → agent default → document
    /// default → none. Membership in `allowed_providers` is checked
    /// separately by the pipeline.
    pub fn pick_provider(
        &self,
        requested: Option<&str>,
        policy: &AgentPolicy,
        intent: &str,
    ) -> Option<String> {
        if let Some(name) = requested {
            if !name.trim().is_empty() {
                return Some(name.trim().to_string());
            }
        }
        if let Some(routed) = self.intent_routes.get(intent) {
            return Some(routed.clone());
        }
        if let Some(name) = &policy.default_provider {
            return Some(name.clone());
        }
        self.default_provider.clone()
    }

    /// The rate limit applying to an agent: its own, or the global default.
    pub fn effective_rate_limit(&self, policy: &AgentPolicy) -> u32 {
        policy
            .rate_limit_per_minute
            .unwrap_or(self.global.rate_limit_per_minute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_doc() -> PolicyDocument {
        serde_json::from_value(serde_json::json!({
            "version": 2,
            "global": {"rate_limit_per_minute": 30},
            "default_provider": "ollama",
            "intent_routes": {"architect": "anthropic"},
            "agents": {
                "planner": {
                    "description": "Planning agent",
                    "allowed_intents": ["analyze", "architect"],
                    "allowed_providers": ["ollama", "anthropic"],
                    "default_provider": "ollama",
                    "fallback_chain": ["anthropic"],
                    "max_input_bytes": 4096,
                    "rate_limit_per_minute": 5
                },
                "prism": {
                    "allowed_intents": ["analyze"],
                    "allowed_providers": ["ollama"]
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn resolve_known_agent_and_intent() {
        let doc = sample_doc();
        let policy = doc.resolve("planner", "analyze").unwrap();
        assert_eq!(policy.max_input_bytes, 4096);
    }

    #[test]
    fn unknown_agent_is_distinct_from_unknown_intent() {
        let doc = sample_doc();
        assert!(matches!(
            doc.resolve("ghost", "analyze"),
            Err(PolicyError::AgentNotAllowed)
        ));
        assert!(matches!(
            doc.resolve("planner", "forbidden"),
            Err(PolicyError::IntentNotAllowed)
        ));
    }

    #[test]
    fn pick_provider_prefers_explicit_request() {
        let doc = sample_doc();
        let policy = doc.resolve("planner", "analyze").unwrap();
        assert_eq!(
            doc.pick_provider(Some("anthropic"), policy, "analyze"),
            Some("anthropic".into())
        );
    }

    #[test]
    fn pick_provider_empty_request_falls_through() {
        let doc = sample_doc();
        let policy = doc.resolve("planner", "analyze").unwrap();
        // Blank request string is treated as absent.
        assert_eq!(
            doc.pick_provider(Some("  "), policy, "analyze"),
            Some("ollama".into())
        );
    }

    #[test]
    fn pick_provider_uses_intent_route_before_agent_default() {
        let doc = sample_doc();
        let policy = doc.resolve("planner", "architect").unwrap();
        assert_eq!(
            doc.pick_provider(None, policy, "architect"),
            Some("anthropic".into())
        );
    }

    #[test]
    fn pick_provider_document_default_is_last_resort() {
        let doc = sample_doc();
        let policy = doc.resolve("prism", "analyze").unwrap();
        // prism has no default_provider and "analyze" has no route.
        assert_eq!(doc.pick_provider(None, policy, "analyze"), Some("ollama".into()));
    }

    #[test]
    fn effective_rate_limit_falls_back_to_global() {
        let doc = sample_doc();
        let planner = doc.resolve("planner", "analyze").unwrap();
        let prism = doc.resolve("prism", "analyze").unwrap();
        assert_eq!(doc.effective_rate_limit(planner), 5);
        assert_eq!(doc.effective_rate_limit(prism), 30);
    }

    #[test]
    fn provider_membership_is_case_insensitive() {
        let doc = sample_doc();
        let policy = doc.resolve("planner", "analyze").unwrap();
        assert!(policy.allows_provider("Anthropic"));
        assert!(!policy.allows_provider("openai"));
    }

    #[test]
    fn load_rejects_missing_agents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"version": 2, "agents": {{}}}}"#).unwrap();
        assert!(matches!(
            PolicyDocument::load(file.path()),
            Err(PolicyError::MissingAgents)
        ));
    }

    #[test]
    fn load_rejects_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            PolicyDocument::load(file.path()),
            Err(PolicyError::Parse { .. })
        ));
    }

    #[test]
    fn load_missing_file_is_read_error() {
        assert!(matches!(
            PolicyDocument::load(Path::new("/nonexistent/policy.json")),
            Err(PolicyError::Read { .. })
        ));
    }
}
