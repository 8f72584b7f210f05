//! # Concierge Core
//!
//! Domain types, traits, and error definitions for the Concierge assistant
//! platform. This crate has **no framework dependencies**: it defines the
//! domain model that every other crate implements against.
//!
//! ## Seams
//!
//! Every collaborator of the tool-calling loop and the context resolver is a
//! trait here:
//! - [`ModelClient`] — the LLM completion endpoint
//! - [`ToolExecutor`] — the bridge to external services
//! - [`ToolPermissionEngine`] — allow / deny / ask decisions and approvals
//! - [`ContextStore`] — agents, skills, tool patterns and context rules
//!
//! Implementations live in their respective crates and are passed in
//! explicitly as `Arc<dyn Trait>`.

pub mod agent;
pub mod error;
pub mod event;
pub mod message;
pub mod permission;
pub mod provider;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{
    Agent, AgentContext, AgentMode, AgentSkill, AgentTool, ContextQuery, ContextRule, ContextType,
    DEFAULT_AGENT_ID, DEFAULT_MODEL, NewAgent, NewContextRule, SkillOverride, ToolPatternType,
};
pub use error::{Error, PermissionError, ProviderError, Result, StoreError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{ChatMessage, ContentBlock, MessageContent, Role};
pub use permission::{
    ApprovalOutcome, ApprovalPolicy, ApprovalRequest, ApprovalStatus, PermissionContext,
    PermissionDecision, ToolInvocation, ToolPermissionEngine,
};
pub use provider::{Completion, CompletionRequest, ModelClient, StopReason, ToolDefinition, Usage};
pub use store::ContextStore;
pub use tool::{Tool, ToolExecutor, ToolOutcome, ToolRegistry};
