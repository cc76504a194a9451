//! Provider layer - the boundary to external AI-answer services
//!
//! This module provides:
//! - ProviderAdapter trait and the uniform ProviderResponse shape
//! - ProviderCatalog for alias / display-name normalization
//! - ProviderRegistry mapping canonical providers to adapters
//! - OpenAiCompatAdapter for `/chat/completions` style endpoints
//! - EchoAdapter and ScriptedAdapter for dry runs and tests

pub mod adapter;
pub mod catalog;
pub mod mock;
pub mod openai;
pub mod registry;

pub use adapter::{EchoAdapter, ProviderAdapter, ProviderResponse};
pub use catalog::{ProviderCatalog, ResolvedProvider, normalize};
pub use mock::{RecordedCall, ScriptedAdapter};
pub use openai::{EndpointConfig, OpenAiCompatAdapter};
pub use registry::ProviderRegistry;
