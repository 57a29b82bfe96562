//! LLM provider adapters for the BlackRoad gateway.
//!
//! All adapters implement the `blackroad_core::Provider` trait. The
//! registry resolves names (case-insensitive, with aliases) and the
//! dispatcher walks the fallback chain.

pub mod anthropic;
pub mod dispatch;
pub mod openai_compat;
pub mod registry;

pub use anthropic::AnthropicProvider;
pub use dispatch::{invoke_with_fallback, DispatchError, DispatchOutcome};
pub use openai_compat::OpenAiCompatProvider;
pub use registry::ProviderRegistry;
