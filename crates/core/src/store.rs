//! Context store trait — persistence of agents, skills, tool patterns and
//! context rules.
//!
//! The resolver only reads through this trait; the write methods back the
//! administrative CRUD surface.

use async_trait::async_trait;

use crate::agent::{Agent, AgentSkill, AgentTool, ContextRule, NewAgent, NewContextRule};
use crate::error::StoreError;

#[async_trait]
pub trait ContextStore: Send + Sync {
    /// A human-readable name for this backend (e.g., "sqlite").
    fn name(&self) -> &str;

    // --- agents ---

    async fn create_agent(&self, agent: NewAgent) -> Result<Agent, StoreError>;

    /// Replace every mutable field of an existing agent; bumps `updated_at`.
    async fn update_agent(&self, agent: NewAgent) -> Result<Agent, StoreError>;

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>, StoreError>;

    async fn list_agents(&self) -> Result<Vec<Agent>, StoreError>;

    /// Delete an agent with its skills and tool patterns. Returns whether it existed.
    async fn delete_agent(&self, id: &str) -> Result<bool, StoreError>;

    // --- skills ---

    async fn get_agent_skills(&self, agent_id: &str) -> Result<Vec<AgentSkill>, StoreError>;

    /// Replace all skill rows of an agent.
    async fn set_agent_skills(
        &self,
        agent_id: &str,
        skills: Vec<(String, bool)>,
    ) -> Result<(), StoreError>;

    // --- tool patterns ---

    async fn get_agent_tools(&self, agent_id: &str) -> Result<Vec<AgentTool>, StoreError>;

    /// Replace all tool-pattern rows of an agent.
    async fn set_agent_tools(&self, agent_id: &str, tools: Vec<AgentTool>) -> Result<(), StoreError>;

    // --- context rules ---

    /// All rules, priority descending. Order among equal priorities is
    /// whatever the backend returns.
    async fn list_context_rules(&self) -> Result<Vec<ContextRule>, StoreError>;

    async fn create_context_rule(&self, rule: NewContextRule) -> Result<ContextRule, StoreError>;

    async fn delete_context_rule(&self, id: &str) -> Result<bool, StoreError>;
}
