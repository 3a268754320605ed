//! Provider clients for upstream LLM backends.
//!
//! Provides the `ProviderClient` enum (model listing vs. deployment listing),
//! concrete OpenAI and Azure OpenAI clients, the Azure AD token provider,
//! `ProviderClientFactory` for turning a `ConnectionConfig` into a scoped
//! client, and retry with backoff for upstream calls.

mod auth;
mod azure;
mod factory;
mod http;
mod openai;
mod provider;
mod retry;

pub use auth::{AzureTokenProvider, MANAGEMENT_SCOPE};
pub use azure::{deployment_capabilities, AzureClient, DEFAULT_AZURE_API_VERSION, MANAGEMENT_API_VERSION};
pub use factory::*;
pub use openai::OpenAiClient;
pub use provider::*;
pub use retry::*;
