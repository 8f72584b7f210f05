//! Model client implementations for Concierge.
//!
//! All clients implement the `concierge_core::ModelClient` trait.

pub mod anthropic;

pub use anthropic::AnthropicClient;
