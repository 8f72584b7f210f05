//! Built-in tools for Concierge agents.
//!
//! Third-party service bridges (calendar, mail, tickets) are provided by
//! the host through its own [`ToolExecutor`](concierge_core::ToolExecutor);
//! the tools here need nothing but the local process.

pub mod datetime;
pub mod read_skill;

use std::sync::Arc;
use tracing::debug;

use concierge_agent::SkillLibrary;
use concierge_core::ToolRegistry;

pub use datetime::CurrentDateTimeTool;
pub use read_skill::ReadSkillTool;

/// A registry with every built-in tool.
///
/// `read_skill` is limited to `enabled_skills`, the skills resolved for the
/// current agent.
pub fn default_registry(skills: Arc<SkillLibrary>, enabled_skills: &[String]) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(CurrentDateTimeTool));
    registry.register(Box::new(
        ReadSkillTool::new(skills).with_allowed(enabled_skills.iter().cloned()),
    ));
    debug!(tools = ?registry.names(), "Built default tool registry");
    registry
}
