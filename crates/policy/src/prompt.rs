//! System prompt composition from layered fragments.
//!
//! The prompt document carries a base prompt plus per-agent and per-intent
//! fragments. Composition concatenates whatever is present, separated by
//! blank lines; missing fragments are silently skipped.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The system prompt document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptDocument {
    #[serde(default)]
    pub default: String,

    #[serde(default)]
    pub agents: HashMap<String, String>,

    #[serde(default)]
    pub intents: HashMap<String, String>,
}

impl PromptDocument {
    /// Read the prompt document, returning `None` when the file is absent
    /// or unreadable. Prompts are decoration; a missing document must never
    /// fail a request.
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(doc) => Some(doc),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed prompt document");
                None
            }
        }
    }
}

/// Compose the system prompt for a request.
///
/// Order: document default, agent fragment, intent fragment, then a
/// `Context JSON:` trailer when the context object is non-empty. Fragments
/// are joined by one blank line; the result is deterministic for fixed
/// inputs.
pub fn compose(
    prompts: Option<&PromptDocument>,
    agent: &str,
    intent: &str,
    context: Option<&Map<String, Value>>,
) -> String {
    let Some(doc) = prompts else {
        return String::new();
    };

    let mut parts: Vec<String> = Vec::with_capacity(4);

    if !doc.default.is_empty() {
        parts.push(doc.default.clone());
    }
    if let Some(fragment) = doc.agents.get(agent) {
        if !fragment.is_empty() {
            parts.push(fragment.clone());
        }
    }
    if let Some(fragment) = doc.intents.get(intent) {
        if !fragment.is_empty() {
            parts.push(fragment.clone());
        }
    }
    if let Some(ctx) = context {
        if !ctx.is_empty() {
            let json = serde_json::to_string(&Value::Object(ctx.clone())).unwrap_or_default();
            parts.push(format!("Context JSON:\n{json}"));
        }
    }

    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> PromptDocument {
        PromptDocument {
            default: "You are a BlackRoad agent.".into(),
            agents: HashMap::from([("planner".to_string(), "Plan carefully.".to_string())]),
            intents: HashMap::from([("analyze".to_string(), "Analyze the input.".to_string())]),
        }
    }

    #[test]
    fn composes_all_layers_in_order() {
        let doc = sample_doc();
        let mut ctx = Map::new();
        ctx.insert("region".into(), Value::String("eu".into()));

        let prompt = compose(Some(&doc), "planner", "analyze", Some(&ctx));
        assert_eq!(
            prompt,
            "You are a BlackRoad agent.\n\nPlan carefully.\n\nAnalyze the input.\n\nContext JSON:\n{\"region\":\"eu\"}"
        );
    }

    #[test]
    fn unknown_agent_skips_that_fragment_only() {
        let doc = sample_doc();
        let with_agent = compose(Some(&doc), "planner", "analyze", None);
        let without_agent = compose(Some(&doc), "ghost", "analyze", None);
        assert_eq!(
            without_agent,
            "You are a BlackRoad agent.\n\nAnalyze the input."
        );
        assert!(with_agent.contains("Plan carefully."));
        // No extra whitespace appears where the fragment would be.
        assert!(!without_agent.contains("\n\n\n"));
    }

    #[test]
    fn empty_context_object_is_skipped() {
        let doc = sample_doc();
        let empty = Map::new();
        let prompt = compose(Some(&doc), "planner", "analyze", Some(&empty));
        assert!(!prompt.contains("Context JSON"));
    }

    #[test]
    fn none_document_yields_empty_string() {
        assert_eq!(compose(None, "planner", "analyze", None), "");
    }

    #[test]
    fn composition_is_deterministic() {
        let doc = sample_doc();
        let a = compose(Some(&doc), "planner", "analyze", None);
        let b = compose(Some(&doc), "planner", "analyze", None);
        assert_eq!(a, b);
    }

    #[test]
    fn load_missing_file_returns_none() {
        assert!(PromptDocument::load(Path::new("/nonexistent/prompts.json")).is_none());
    }
}
