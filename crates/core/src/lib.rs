//! Shared domain types for the BlackRoad gateway.
//!
//! Everything the member crates agree on lives here: the uniform provider
//! contract, the inbound/outbound request envelopes, and the error taxonomy.

pub mod envelope;
pub mod error;
pub mod provider;

pub use envelope::{validate_request, AgentRequest, AgentResponse, ResponseMetadata};
pub use error::{Error, JournalError, PolicyError, ProviderError, Result};
pub use provider::{InvokeArgs, Provider};
