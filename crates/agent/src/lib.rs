//! The agent side of Concierge: deciding who answers and driving the model.
//!
//! - [`ContextResolver`] picks the agent, skills and tool patterns for an
//!   inbound platform / chat / channel / environment
//! - [`AgentConfigLoader`] adds skill content to the prompt and caches the
//!   result for a fixed TTL
//! - [`ToolCallingLoop`] runs the **Request → Tool use → Request** cycle
//!   with permission gating, duplicate-call detection and an iteration cap
//!
//! Every collaborator (model client, executor, permission engine, store)
//! is injected as an `Arc<dyn Trait>`.

pub mod config_loader;
pub mod executor;
pub mod guard;
pub mod resolver;
pub mod skills;
pub mod tool_loop;

#[cfg(test)]
mod test_helpers;

pub use config_loader::{AgentConfigLoader, assemble_prompt};
pub use executor::execute_tool;
pub use guard::{CallGuard, OrderedNameSet, call_signature};
pub use resolver::ContextResolver;
pub use skills::{Skill, SkillError, SkillLibrary, validate_skill};
pub use tool_loop::{LoopConfig, PermissionConfig, ToolCallingLoop, ToolCallingResult};
