//! Provider registry — name → adapter lookup.
//!
//! Lookups are case-insensitive and alias-aware (`claude` and `anthropic`
//! resolve to the same adapter), so policy documents can use whichever
//! spelling their authors prefer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use blackroad_config::GatewayConfig;
use blackroad_core::Provider;

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Central registry of provider adapters.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    aliases: HashMap<String, String>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Register a provider under its canonical lowercase name.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_ascii_lowercase();
        info!(provider = %name, "Registered provider");
        self.providers.insert(name, provider);
    }

    /// Register an alias pointing at a canonical name.
    pub fn alias(&mut self, alias: impl Into<String>, canonical: impl Into<String>) {
        self.aliases
            .insert(alias.into().to_ascii_lowercase(), canonical.into().to_ascii_lowercase());
    }

    /// Resolve a name to its canonical form (alias-aware, lowercased).
    pub fn canonical(&self, name: &str) -> String {
        let lower = name.trim().to_ascii_lowercase();
        self.aliases.get(&lower).cloned().unwrap_or(lower)
    }

    /// Get an adapter by name, case-insensitive, following aliases.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.canonical(name)).cloned()
    }

    /// List all canonical provider names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Build the registry from configuration.
///
/// Credentials come from per-provider `<NAME>_API_KEY` environment
/// variables, falling back to the config file. A missing key does not
/// remove the adapter — its `invoke` fails `NotConfigured`, which is what
/// drives the fallback chain.
pub fn build_from_config(config: &GatewayConfig) -> ProviderRegistry {
    let timeout = Duration::from_secs(config.provider_timeout_secs);
    let mut registry = ProviderRegistry::new();

    let anthropic_key = provider_key(config, "anthropic");
    let mut anthropic = AnthropicProvider::new(anthropic_key, timeout);
    if let Some(settings) = config.providers.get("anthropic") {
        if let Some(url) = &settings.api_url {
            anthropic = anthropic.with_base_url(url);
        }
        if let Some(model) = &settings.model {
            anthropic = anthropic.with_model(model);
        }
    }
    registry.register(Arc::new(anthropic));

    let openai_key = provider_key(config, "openai");
    let mut openai = OpenAiCompatProvider::openai(openai_key, timeout);
    if let Some(settings) = config.providers.get("openai") {
        if let Some(url) = &settings.api_url {
            openai = openai.with_base_url(url);
        }
        if let Some(model) = &settings.model {
            openai = openai.with_model(model);
        }
    }
    registry.register(Arc::new(openai));

    let ollama_url = config
        .providers
        .get("ollama")
        .and_then(|s| s.api_url.clone());
    let mut ollama = OpenAiCompatProvider::ollama(ollama_url.as_deref(), timeout);
    if let Some(model) = config.providers.get("ollama").and_then(|s| s.model.clone()) {
        ollama = ollama.with_model(model);
    }
    registry.register(Arc::new(ollama));

    // Any further configured provider is assumed OpenAI-compatible.
    for (name, settings) in &config.providers {
        let lower = name.to_ascii_lowercase();
        if matches!(lower.as_str(), "anthropic" | "openai" | "ollama") {
            continue;
        }
        let Some(base_url) = &settings.api_url else {
            tracing::warn!(provider = %name, "Skipping provider without api_url");
            continue;
        };
        let key = provider_key(config, &lower);
        let model = settings.model.clone().unwrap_or_default();
        registry.register(Arc::new(OpenAiCompatProvider::new(
            lower.clone(),
            base_url,
            key,
            model,
            timeout,
        )));
    }

    registry.alias("claude", "anthropic");
    registry.alias("local", "ollama");

    registry
}

/// The API key for a provider: environment first, then the config file.
fn provider_key(config: &GatewayConfig, name: &str) -> String {
    std::env::var(format!("{}_API_KEY", name.to_uppercase()))
        .ok()
        .or_else(|| {
            config
                .providers
                .get(name)
                .and_then(|s| s.api_key.clone())
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use blackroad_core::{InvokeArgs, ProviderError};

    struct NamedProvider(&'static str);

    #[async_trait]
    impl Provider for NamedProvider {
        fn name(&self) -> &str {
            self.0
        }
        async fn invoke(&self, _args: InvokeArgs) -> Result<String, ProviderError> {
            Ok("ok".into())
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(NamedProvider("anthropic")));

        assert!(registry.get("anthropic").is_some());
        assert!(registry.get("Anthropic").is_some());
        assert!(registry.get("  ANTHROPIC ").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn aliases_resolve_to_same_adapter() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(NamedProvider("anthropic")));
        registry.alias("claude", "anthropic");

        let direct = registry.get("anthropic").unwrap();
        let aliased = registry.get("claude").unwrap();
        assert_eq!(direct.name(), aliased.name());
        assert_eq!(registry.canonical("Claude"), "anthropic");
    }

    #[test]
    fn list_is_sorted_canonical_names() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(NamedProvider("ollama")));
        registry.register(Arc::new(NamedProvider("anthropic")));
        registry.alias("claude", "anthropic");

        assert_eq!(registry.list(), vec!["anthropic", "ollama"]);
    }

    #[test]
    fn build_from_default_config_registers_core_providers() {
        let config = GatewayConfig::default();
        let registry = build_from_config(&config);
        assert!(registry.get("anthropic").is_some());
        assert!(registry.get("openai").is_some());
        assert!(registry.get("ollama").is_some());
        assert!(registry.get("claude").is_some());
        assert!(registry.get("local").is_some());
    }

    #[test]
    fn extra_openai_compatible_provider_from_config() {
        let mut config = GatewayConfig::default();
        config.providers.insert(
            "groq".into(),
            blackroad_config::ProviderConfig {
                api_key: Some("gk".into()),
                api_url: Some("https://api.groq.com/openai/v1".into()),
                model: Some("llama-3.3-70b".into()),
            },
        );
        let registry = build_from_config(&config);
        assert!(registry.get("groq").is_some());
    }
}
