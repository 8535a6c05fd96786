//! # scrapegen-llm
//!
//! Provider clients behind two narrow contracts:
//!
//! - [`TextGenerator::complete`]: prompt in, text out
//! - [`Embedder::embed`] / [`Embedder::embed_many`]: text in, vector out
//!
//! Every call the repair loop makes over the network goes through one of these
//! traits, so each can be swapped for the scripted doubles in [`mock`].

mod anthropic;
mod auth;
mod circuit_breaker;
pub mod mock;
mod openai;
mod provider;
mod retry;
mod types;

pub use anthropic::AnthropicClient;
pub use auth::resolve_api_key;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use mock::{HashEmbedder, ScriptedGenerator, ScriptedReply};
pub use openai::OpenAiEmbedder;
pub use provider::{Embedder, TextGenerator};
pub use retry::RetryPolicy;
pub use types::{Model, Usage};
