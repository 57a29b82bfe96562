//! Fallback dispatcher — primary provider plus an ordered retry chain.
//!
//! The dispatcher never retries a single provider; retries are purely
//! cross-provider. At most one adapter can succeed per dispatch: iteration
//! stops at the first success.

use std::time::Duration;

use tracing::{info, warn};

use blackroad_core::{InvokeArgs, ProviderError};

use crate::registry::ProviderRegistry;

/// The result of a successful dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub output: String,
    /// Canonical name of the provider that answered.
    pub provider: String,
    /// True when a fallback entry answered instead of the primary.
    pub fallback: bool,
}

/// Dispatch failure modes.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Neither the primary nor any chain entry resolved to an adapter.
    #[error("No provider available")]
    NoProvider,

    /// Exactly one provider was attempted; its error surfaces verbatim.
    #[error("{0}")]
    Single(ProviderError),

    /// Several providers were attempted and all failed; the message lists
    /// each attempt as `name: error`, joined by "; ".
    #[error("{0}")]
    Exhausted(String),
}

/// Invoke the primary provider, falling back along `chain` on failure.
///
/// Chain entries equal to the primary (already tried) and entries the
/// registry cannot resolve are skipped. Each attempt runs under `deadline`.
pub async fn invoke_with_fallback(
    registry: &ProviderRegistry,
    primary: &str,
    chain: &[String],
    args: InvokeArgs,
    deadline: Duration,
) -> Result<DispatchOutcome, DispatchError> {
    let primary_canonical = registry.canonical(primary);
    let mut attempts: Vec<(String, ProviderError)> = Vec::new();

    if let Some(provider) = registry.get(primary) {
        match attempt(provider.as_ref(), args.clone(), deadline).await {
            Ok(output) => {
                return Ok(DispatchOutcome {
                    output,
                    provider: primary_canonical,
                    fallback: false,
                });
            }
            Err(e) => {
                warn!(provider = %primary_canonical, error = %e, "Primary provider failed, trying fallback chain");
                attempts.push((primary_canonical.clone(), e));
            }
        }
    }

    for name in chain {
        let canonical = registry.canonical(name);
        if canonical == primary_canonical {
            continue;
        }
        let Some(provider) = registry.get(name) else {
            continue;
        };

        info!(provider = %canonical, "Fallback: trying provider");
        match attempt(provider.as_ref(), args.clone(), deadline).await {
            Ok(output) => {
                return Ok(DispatchOutcome {
                    output,
                    provider: canonical,
                    fallback: true,
                });
            }
            Err(e) => {
                warn!(provider = %canonical, error = %e, "Fallback: provider failed, trying next");
                attempts.push((canonical, e));
            }
        }
    }

    match attempts.len() {
        0 => Err(DispatchError::NoProvider),
        1 => {
            let (_, error) = attempts.remove(0);
            Err(DispatchError::Single(error))
        }
        _ => {
            let message = attempts
                .iter()
                .map(|(name, error)| format!("{name}: {error}"))
                .collect::<Vec<_>>()
                .join("; ");
            Err(DispatchError::Exhausted(message))
        }
    }
}

async fn attempt(
    provider: &dyn blackroad_core::Provider,
    args: InvokeArgs,
    deadline: Duration,
) -> Result<String, ProviderError> {
    match tokio::time::timeout(deadline, provider.invoke(args)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(format!(
            "Provider '{}' timed out after {}s",
            provider.name(),
            deadline.as_secs()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use blackroad_core::Provider;
    use std::sync::{Arc, Mutex};

    /// A mock provider that always fails.
    struct FailingProvider {
        name: String,
        error: ProviderError,
        call_count: Mutex<usize>,
    }

    impl FailingProvider {
        fn new(name: &str, error: ProviderError) -> Self {
            Self {
                name: name.into(),
                error,
                call_count: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl Provider for FailingProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn invoke(&self, _args: InvokeArgs) -> Result<String, ProviderError> {
            *self.call_count.lock().unwrap() += 1;
            Err(self.error.clone())
        }
    }

    /// A mock provider that always succeeds.
    struct SuccessProvider {
        name: String,
        output: String,
        call_count: Mutex<usize>,
    }

    impl SuccessProvider {
        fn new(name: &str, output: &str) -> Self {
            Self {
                name: name.into(),
                output: output.into(),
                call_count: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl Provider for SuccessProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn invoke(&self, _args: InvokeArgs) -> Result<String, ProviderError> {
            *self.call_count.lock().unwrap() += 1;
            Ok(self.output.clone())
        }
    }

    /// A mock provider that hangs forever (for deadline testing).
    struct HangingProvider;

    #[async_trait]
    impl Provider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn invoke(&self, _args: InvokeArgs) -> Result<String, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }
    }

    fn test_args() -> InvokeArgs {
        InvokeArgs {
            input: "hi".into(),
            system: String::new(),
            context: None,
            request_id: "req-1".into(),
            agent: "planner".into(),
            intent: "analyze".into(),
        }
    }

    fn deadline() -> Duration {
        Duration::from_secs(5)
    }

    #[tokio::test]
    async fn primary_success_is_not_fallback() {
        let primary = Arc::new(SuccessProvider::new("ollama", "hello"));
        let secondary = Arc::new(SuccessProvider::new("openai", "hi back"));
        let mut registry = ProviderRegistry::new();
        registry.register(primary.clone());
        registry.register(secondary.clone());

        let outcome = invoke_with_fallback(
            &registry,
            "ollama",
            &["openai".into()],
            test_args(),
            deadline(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.output, "hello");
        assert_eq!(outcome.provider, "ollama");
        assert!(!outcome.fallback);
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn falls_back_on_primary_failure() {
        let primary = Arc::new(FailingProvider::new(
            "ollama",
            ProviderError::Network("conn refused".into()),
        ));
        let secondary = Arc::new(SuccessProvider::new("openai", "hi back"));
        let mut registry = ProviderRegistry::new();
        registry.register(primary.clone());
        registry.register(secondary.clone());

        let outcome = invoke_with_fallback(
            &registry,
            "ollama",
            &["openai".into()],
            test_args(),
            deadline(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.output, "hi back");
        assert_eq!(outcome.provider, "openai");
        assert!(outcome.fallback);
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn chain_entries_equal_to_primary_are_skipped() {
        let primary = Arc::new(FailingProvider::new(
            "ollama",
            ProviderError::Network("down".into()),
        ));
        let secondary = Arc::new(SuccessProvider::new("openai", "ok"));
        let mut registry = ProviderRegistry::new();
        registry.register(primary.clone());
        registry.register(secondary.clone());

        let outcome = invoke_with_fallback(
            &registry,
            "ollama",
            &["ollama".into(), "openai".into()],
            test_args(),
            deadline(),
        )
        .await
        .unwrap();

        // The primary is tried exactly once despite appearing in the chain.
        assert_eq!(primary.calls(), 1);
        assert_eq!(outcome.provider, "openai");
    }

    #[tokio::test]
    async fn unresolvable_chain_entries_are_skipped() {
        let primary = Arc::new(FailingProvider::new(
            "ollama",
            ProviderError::Network("down".into()),
        ));
        let secondary = Arc::new(SuccessProvider::new("openai", "ok"));
        let mut registry = ProviderRegistry::new();
        registry.register(primary.clone());
        registry.register(secondary.clone());

        let outcome = invoke_with_fallback(
            &registry,
            "ollama",
            &["ghost".into(), "openai".into()],
            test_args(),
            deadline(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.provider, "openai");
        assert!(outcome.fallback);
    }

    #[tokio::test]
    async fn single_failing_primary_surfaces_its_error_verbatim() {
        let primary = Arc::new(FailingProvider::new(
            "ollama",
            ProviderError::Network("conn refused".into()),
        ));
        let mut registry = ProviderRegistry::new();
        registry.register(primary.clone());

        let err = invoke_with_fallback(&registry, "ollama", &[], test_args(), deadline())
            .await
            .unwrap_err();

        match err {
            DispatchError::Single(ProviderError::Network(msg)) => {
                assert_eq!(msg, "conn refused");
            }
            other => panic!("Expected Single(Network), got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_failing_produces_composite_message() {
        let primary = Arc::new(FailingProvider::new(
            "ollama",
            ProviderError::Network("conn refused".into()),
        ));
        let secondary = Arc::new(FailingProvider::new(
            "openai",
            ProviderError::AuthenticationFailed("bad key".into()),
        ));
        let mut registry = ProviderRegistry::new();
        registry.register(primary.clone());
        registry.register(secondary.clone());

        let err = invoke_with_fallback(
            &registry,
            "ollama",
            &["openai".into()],
            test_args(),
            deadline(),
        )
        .await
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("ollama: "));
        assert!(message.contains("openai: "));
        assert!(message.contains("; "));
        assert!(message.contains("conn refused"));
        assert!(message.contains("bad key"));
    }

    #[tokio::test]
    async fn unresolved_primary_with_empty_chain_is_no_provider() {
        let registry = ProviderRegistry::new();
        let err = invoke_with_fallback(&registry, "ghost", &[], test_args(), deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoProvider));
        assert_eq!(err.to_string(), "No provider available");
    }

    #[tokio::test]
    async fn unresolved_primary_falls_back_to_chain() {
        let secondary = Arc::new(SuccessProvider::new("openai", "rescued"));
        let mut registry = ProviderRegistry::new();
        registry.register(secondary.clone());

        let outcome = invoke_with_fallback(
            &registry,
            "ghost",
            &["openai".into()],
            test_args(),
            deadline(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.output, "rescued");
        assert!(outcome.fallback);
    }

    #[tokio::test]
    async fn deadline_triggers_fallback() {
        let secondary = Arc::new(SuccessProvider::new("openai", "ok"));
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(HangingProvider));
        registry.register(secondary.clone());

        let outcome = invoke_with_fallback(
            &registry,
            "hanging",
            &["openai".into()],
            test_args(),
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        assert_eq!(outcome.provider, "openai");
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn alias_primary_matches_canonical_chain_entry() {
        let provider = Arc::new(FailingProvider::new(
            "anthropic",
            ProviderError::Network("down".into()),
        ));
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone());
        registry.alias("claude", "anthropic");

        // "claude" as primary and "anthropic" in the chain are the same
        // adapter; it must only be attempted once.
        let err = invoke_with_fallback(
            &registry,
            "claude",
            &["anthropic".into()],
            test_args(),
            deadline(),
        )
        .await
        .unwrap_err();

        assert_eq!(provider.calls(), 1);
        assert!(matches!(err, DispatchError::Single(_)));
    }
}
