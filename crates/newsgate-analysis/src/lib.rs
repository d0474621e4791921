//! Client for the AI-analysis collaborator.
//!
//! Talks to an OpenAI-compatible chat-completions and embeddings API.
//! Calls are key-pooled and circuit-protected under
//! [`newsgate_core::Provider::Analysis`], exactly like the news providers.

pub mod client;
pub mod error;
mod prompts;

pub use client::{AiClient, AiSettings};
pub use error::AnalysisError;
