//! # arbor-agent
//!
//! The reasoning side of an Arbor agent.
//!
//! This crate provides:
//! - [`ReasoningClient`], the call-and-response seam every engine talks to
//! - [`AnthropicClient`], the HTTP implementation with retry and circuit breaking
//! - Per-model [`Pricing`] with an extended-context tier, and the [`CostEvent`]
//!   receipt produced for every call
//!
//! The client is stateless: each request carries the full message history.

mod auth;
mod circuit_breaker;
mod client;
mod pricing;
mod types;

pub use auth::get_auth_token;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::{AnthropicClient, ReasoningClient};
pub use pricing::{CostEvent, Pricing, EXTENDED_CONTEXT_THRESHOLD};
pub use types::*;
