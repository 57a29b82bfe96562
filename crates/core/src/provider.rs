//! Provider trait — the abstraction over LLM backends.
//!
//! A provider knows how to take one composed request (input text plus a
//! system prompt) and return generated text. The dispatcher calls `invoke()`
//! without knowing which backend is behind the name — pure polymorphism.
//!
//! Implementations: Anthropic native, OpenAI-compatible, Ollama.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// The arguments for a single provider invocation.
///
/// Cloned for every entry of a fallback chain, so it stays cheap and owned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeArgs {
    /// The caller's input text.
    pub input: String,

    /// The composed system prompt (may be empty).
    #[serde(default)]
    pub system: String,

    /// Optional request context, passed through for adapters that use it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,

    /// The gateway request id, for correlation in provider logs.
    pub request_id: String,

    /// The calling agent's name.
    pub agent: String,

    /// The intent being performed.
    pub intent: String,
}

/// The uniform provider contract.
///
/// Every upstream backend implements exactly one capability: take an
/// invocation, return generated text or fail. Failures drive the fallback
/// chain; the adapter never retries on its own.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The canonical provider name (e.g. "anthropic", "ollama").
    fn name(&self) -> &str;

    /// Send the request and return the generated text.
    async fn invoke(&self, args: InvokeArgs) -> std::result::Result<String, ProviderError>;
}
