//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, Groq, Ollama, vLLM, and any endpoint exposing
//! `/chat/completions`. Bearer authentication; the system prompt rides as
//! the first message.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use blackroad_core::{InvokeArgs, Provider, ProviderError};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    /// Local endpoints (Ollama) accept an empty key.
    requires_key: bool,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            requires_key: true,
            client,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::new(
            "openai",
            "https://api.openai.com/v1",
            api_key,
            "gpt-4o-mini",
            timeout,
        )
    }

    /// Create an Ollama provider. No key required; failures come from the
    /// endpoint being unreachable instead.
    pub fn ollama(base_url: Option<&str>, timeout: std::time::Duration) -> Self {
        let mut provider = Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama",
            "llama3.1",
            timeout,
        );
        provider.requires_key = false;
        provider
    }

    /// Override the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, args: InvokeArgs) -> Result<String, ProviderError> {
        if self.requires_key && self.api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured(format!(
                "{}_API_KEY is not set",
                self.name.to_uppercase()
            )));
        }

        let url = format!("{}/chat/completions", self.base_url);

        let mut messages = Vec::with_capacity(2);
        if !args.system.is_empty() {
            messages.push(serde_json::json!({"role": "system", "content": args.system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": args.input}));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });

        debug!(
            provider = %self.name,
            model = %self.model,
            request_id = %args.request_id,
            agent = %args.agent,
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited { retry_after_secs: 5 });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        Ok(choice.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn args() -> InvokeArgs {
        InvokeArgs {
            input: "hello".into(),
            system: String::new(),
            context: None,
            request_id: "req-1".into(),
            agent: "planner".into(),
            intent: "analyze".into(),
        }
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let provider = OpenAiCompatProvider::openai("", Duration::from_secs(1));
        let err = provider.invoke(args()).await.unwrap_err();
        match err {
            ProviderError::NotConfigured(msg) => assert!(msg.contains("OPENAI_API_KEY")),
            other => panic!("Expected NotConfigured, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn ollama_does_not_require_a_key() {
        // Points at a port nothing listens on: the failure must be Network,
        // not NotConfigured.
        let provider = OpenAiCompatProvider::ollama(
            Some("http://127.0.0.1:1/v1"),
            Duration::from_millis(200),
        );
        let err = provider.invoke(args()).await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Network(_) | ProviderError::Timeout(_)
        ));
    }

    #[test]
    fn default_base_urls() {
        let openai = OpenAiCompatProvider::openai("k", Duration::from_secs(1));
        assert!(openai.base_url.contains("api.openai.com"));
        let ollama = OpenAiCompatProvider::ollama(None, Duration::from_secs(1));
        assert!(ollama.base_url.contains("localhost:11434"));
    }
}
