//! In-memory store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use concierge_core::{
    Agent, AgentSkill, AgentTool, ContextRule, ContextStore, NewAgent, NewContextRule, StoreError,
};

use crate::validate_new_rule;

#[derive(Default)]
struct State {
    agents: BTreeMap<String, Agent>,
    skills: HashMap<String, Vec<AgentSkill>>,
    tools: HashMap<String, Vec<AgentTool>>,
    /// Insertion order; equal priorities come back in this order
    rules: Vec<ContextRule>,
}

/// A store that keeps everything in process memory.
#[derive(Clone, Default)]
pub struct InMemoryContextStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_agent(&self, agent: NewAgent) -> Result<Agent, StoreError> {
        let mut state = self.state.write().await;
        if state.agents.contains_key(&agent.id) {
            return Err(StoreError::AgentExists(agent.id));
        }
        let agent = agent.into_agent(Utc::now());
        state.agents.insert(agent.id.clone(), agent.clone());
        Ok(agent)
    }

    async fn update_agent(&self, agent: NewAgent) -> Result<Agent, StoreError> {
        let mut state = self.state.write().await;
        let existing = state
            .agents
            .get_mut(&agent.id)
            .ok_or_else(|| StoreError::AgentNotFound(agent.id.clone()))?;

        let created_at = existing.created_at;
        let mut updated = agent.into_agent(Utc::now());
        updated.created_at = created_at;
        *existing = updated.clone();
        Ok(updated)
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>, StoreError> {
        Ok(self.state.read().await.agents.get(id).cloned())
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        Ok(self.state.read().await.agents.values().cloned().collect())
    }

    async fn delete_agent(&self, id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        state.skills.remove(id);
        state.tools.remove(id);
        Ok(state.agents.remove(id).is_some())
    }

    async fn get_agent_skills(&self, agent_id: &str) -> Result<Vec<AgentSkill>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .skills
            .get(agent_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_agent_skills(
        &self,
        agent_id: &str,
        skills: Vec<(String, bool)>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.agents.contains_key(agent_id) {
            return Err(StoreError::AgentNotFound(agent_id.into()));
        }

        let mut rows: Vec<AgentSkill> = Vec::with_capacity(skills.len());
        for (skill_name, enabled) in skills {
            // Last write wins for a repeated name, first position is kept
            match rows.iter_mut().find(|r| r.skill_name == skill_name) {
                Some(row) => row.enabled = enabled,
                None => rows.push(AgentSkill {
                    agent_id: agent_id.into(),
                    skill_name,
                    enabled,
                }),
            }
        }
        state.skills.insert(agent_id.into(), rows);
        Ok(())
    }

    async fn get_agent_tools(&self, agent_id: &str) -> Result<Vec<AgentTool>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .tools
            .get(agent_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_agent_tools(&self, agent_id: &str, tools: Vec<AgentTool>) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.agents.contains_key(agent_id) {
            return Err(StoreError::AgentNotFound(agent_id.into()));
        }

        let mut rows: Vec<AgentTool> = Vec::with_capacity(tools.len());
        for mut tool in tools {
            tool.agent_id = agent_id.into();
            if !rows.contains(&tool) {
                rows.push(tool);
            }
        }
        state.tools.insert(agent_id.into(), rows);
        Ok(())
    }

    async fn list_context_rules(&self) -> Result<Vec<ContextRule>, StoreError> {
        let mut rules = self.state.read().await.rules.clone();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(rules)
    }

    async fn create_context_rule(&self, rule: NewContextRule) -> Result<ContextRule, StoreError> {
        validate_new_rule(&rule)?;
        let rule = rule.into_rule(Uuid::new_v4().to_string(), Utc::now());
        self.state.write().await.rules.push(rule.clone());
        Ok(rule)
    }

    async fn delete_context_rule(&self, id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let before = state.rules.len();
        state.rules.retain(|r| r.id != id);
        Ok(state.rules.len() < before)
    }
}
