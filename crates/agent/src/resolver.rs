//! Context rule resolution: which agent, skills and tool patterns serve a
//! platform / chat / channel / environment.
//!
//! Rules are walked in descending priority. The first applying rule that
//! names an agent selects it; every applying rule contributes its skill
//! overrides, in order, whether or not it named an agent.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use concierge_core::{
    Agent, AgentContext, ContextQuery, ContextStore, DEFAULT_AGENT_ID, DEFAULT_MODEL, DomainEvent,
    Error, EventBus, Result, SkillOverride, ToolPatternType,
};

/// Resolves an [`AgentContext`] from the context store on every call.
pub struct ContextResolver {
    store: Arc<dyn ContextStore>,
    default_agent_id: String,
    default_model: String,
    events: Option<Arc<EventBus>>,
}

impl ContextResolver {
    pub fn new(store: Arc<dyn ContextStore>) -> Self {
        Self {
            store,
            default_agent_id: DEFAULT_AGENT_ID.into(),
            default_model: DEFAULT_MODEL.into(),
            events: None,
        }
    }

    /// Agent used when no applying rule names one.
    pub fn with_default_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.default_agent_id = agent_id.into();
        self
    }

    /// Model used when neither the selected nor the default agent has one.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(&self) -> &Arc<dyn ContextStore> {
        &self.store
    }

    /// Resolve the context for `query`.
    ///
    /// `Ok(None)` when no usable agent exists. Store errors propagate.
    pub async fn resolve(&self, query: &ContextQuery) -> Result<Option<AgentContext>> {
        let rules = self.store.list_context_rules().await?;

        let mut selected: Option<String> = None;
        let mut overrides: Vec<SkillOverride> = Vec::new();
        for rule in rules.iter().filter(|r| r.applies(query)) {
            if selected.is_none() {
                if let Some(agent_id) = &rule.agent_id {
                    debug!(rule = %rule.id, agent = %agent_id, "Rule selected agent");
                    selected = Some(agent_id.clone());
                }
            }
            overrides.extend(rule.parsed_overrides());
        }

        let Some(agent) = self.load_agent(selected.as_deref()).await? else {
            warn!(?query, selected = ?selected, default = %self.default_agent_id, "No agent available for context");
            return Ok(None);
        };

        let (skill_rows, tool_rows) = tokio::try_join!(
            self.store.get_agent_skills(&agent.id),
            self.store.get_agent_tools(&agent.id),
        )?;

        let mut skills: Vec<String> = skill_rows
            .into_iter()
            .filter(|s| s.enabled)
            .map(|s| s.skill_name)
            .collect();
        for o in &overrides {
            o.apply(&mut skills);
        }

        let mut allowed_tools = Vec::new();
        let mut denied_tools = Vec::new();
        let mut ask_tools = Vec::new();
        for tool in tool_rows {
            match tool.pattern_type {
                ToolPatternType::Allow => allowed_tools.push(tool.pattern),
                ToolPatternType::Deny => denied_tools.push(tool.pattern),
                ToolPatternType::Ask => ask_tools.push(tool.pattern),
            }
        }

        let model = self.resolve_model(&agent).await?;

        debug!(
            agent = %agent.id,
            skills = skills.len(),
            allow = allowed_tools.len(),
            deny = denied_tools.len(),
            ask = ask_tools.len(),
            model = %model,
            "Resolved agent context"
        );
        if let Some(bus) = &self.events {
            bus.publish(DomainEvent::ContextResolved {
                agent_id: agent.id.clone(),
                skills: skills.len(),
                model: model.clone(),
                timestamp: Utc::now(),
            });
        }

        Ok(Some(AgentContext {
            system_prompt: agent.base_prompt.clone(),
            fallback_model: agent.fallback_model.clone(),
            agent,
            skills,
            allowed_tools,
            denied_tools,
            ask_tools,
            model,
        }))
    }

    /// Like [`resolve`](Self::resolve), but a missing agent is an error.
    pub async fn require(&self, query: &ContextQuery) -> Result<AgentContext> {
        self.resolve(query).await?.ok_or_else(|| {
            Error::Resolution(format!(
                "no enabled agent for {query:?} (default agent '{}')",
                self.default_agent_id
            ))
        })
    }

    /// The rule-selected agent, or the default agent when no rule picked one.
    /// A selected agent that is missing or disabled yields `None`.
    async fn load_agent(&self, selected: Option<&str>) -> Result<Option<Agent>> {
        let id = selected.unwrap_or(&self.default_agent_id);
        let agent = self.store.get_agent(id).await?;
        match &agent {
            Some(agent) if agent.enabled => {}
            Some(_) => warn!(agent = id, "Agent is disabled"),
            None => warn!(agent = id, "Agent does not exist"),
        }
        Ok(agent.filter(|agent| agent.enabled))
    }

    async fn resolve_model(&self, agent: &Agent) -> Result<String> {
        if let Some(model) = non_blank(agent.default_model.as_deref()) {
            return Ok(model.to_string());
        }
        if agent.id != self.default_agent_id {
            if let Some(default_agent) = self.store.get_agent(&self.default_agent_id).await? {
                if let Some(model) = non_blank(default_agent.default_model.as_deref()) {
                    return Ok(model.to_string());
                }
            }
        }
        Ok(self.default_model.clone())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::{AgentTool, NewAgent, NewContextRule};
    use concierge_store::InMemoryContextStore;

    async fn store_with_agents(ids: &[&str]) -> Arc<InMemoryContextStore> {
        let store = Arc::new(InMemoryContextStore::new());
        for id in ids {
            store.create_agent(NewAgent::new(*id, id.to_uppercase())).await.unwrap();
        }
        store
    }

    fn tool(agent: &str, pattern: &str, pattern_type: ToolPatternType) -> AgentTool {
        AgentTool {
            agent_id: agent.into(),
            pattern: pattern.into(),
            pattern_type,
        }
    }

    #[tokio::test]
    async fn higher_priority_platform_rule_wins() {
        let store = store_with_agents(&["X", "Y"]).await;
        store
            .create_context_rule(NewContextRule::new("default", None).agent("X").priority(0))
            .await
            .unwrap();
        store
            .create_context_rule(NewContextRule::new("platform", Some("slack")).agent("Y").priority(10))
            .await
            .unwrap();
        let resolver = ContextResolver::new(store);

        let slack = resolver.require(&ContextQuery::new().platform("slack")).await.unwrap();
        assert_eq!(slack.agent.id, "Y");
        let teams = resolver.require(&ContextQuery::new().platform("teams")).await.unwrap();
        assert_eq!(teams.agent.id, "X");
    }

    #[tokio::test]
    async fn overrides_from_all_applying_rules_accumulate() {
        let store = store_with_agents(&["X", "Y"]).await;
        store
            .set_agent_skills("Y", vec![("a".into(), true), ("b".into(), true), ("z".into(), false)])
            .await
            .unwrap();
        store
            .create_context_rule(
                NewContextRule::new("platform", Some("slack"))
                    .agent("Y")
                    .priority(10)
                    .overrides(["disable:a"]),
            )
            .await
            .unwrap();
        // Lower priority and names another agent: overrides still apply.
        store
            .create_context_rule(
                NewContextRule::new("default", None)
                    .agent("X")
                    .overrides(["enable:c", "bogus", "enable:b"]),
            )
            .await
            .unwrap();
        // Does not apply.
        store
            .create_context_rule(
                NewContextRule::new("chat", Some("other")).overrides(["enable:never"]),
            )
            .await
            .unwrap();

        let context = ContextResolver::new(store)
            .require(&ContextQuery::new().platform("slack").chat("c1"))
            .await
            .unwrap();
        assert_eq!(context.agent.id, "Y");
        assert_eq!(context.skills, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn later_overrides_win_per_skill() {
        let store = store_with_agents(&[DEFAULT_AGENT_ID]).await;
        store
            .create_context_rule(NewContextRule::new("environment", Some("prod")).priority(5).overrides(["enable:x"]))
            .await
            .unwrap();
        store
            .create_context_rule(NewContextRule::new("default", None).overrides(["disable:x"]))
            .await
            .unwrap();

        let context = ContextResolver::new(store)
            .require(&ContextQuery::new().environment("prod"))
            .await
            .unwrap();
        assert_eq!(context.agent.id, DEFAULT_AGENT_ID);
        assert!(context.skills.is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_default_agent() {
        let store = store_with_agents(&[DEFAULT_AGENT_ID]).await;
        let context = ContextResolver::new(store)
            .require(&ContextQuery::new().platform("whatsapp"))
            .await
            .unwrap();
        assert_eq!(context.agent.id, DEFAULT_AGENT_ID);
        assert_eq!(context.model, DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn missing_default_agent_resolves_to_none() {
        let store = Arc::new(InMemoryContextStore::new());
        let resolver = ContextResolver::new(store);
        assert!(resolver.resolve(&ContextQuery::new()).await.unwrap().is_none());
        assert!(matches!(
            resolver.require(&ContextQuery::new()).await,
            Err(Error::Resolution(_))
        ));
    }

    #[tokio::test]
    async fn missing_or_disabled_selected_agent_resolves_to_none() {
        let store = store_with_agents(&[DEFAULT_AGENT_ID]).await;
        let mut off = NewAgent::new("off", "Off");
        off.enabled = false;
        store.create_agent(off).await.unwrap();
        store
            .create_context_rule(NewContextRule::new("platform", Some("slack")).agent("off"))
            .await
            .unwrap();
        store
            .create_context_rule(NewContextRule::new("platform", Some("teams")).agent("ghost"))
            .await
            .unwrap();

        let resolver = ContextResolver::new(store);
        for platform in ["slack", "teams"] {
            let query = ContextQuery::new().platform(platform);
            assert!(resolver.resolve(&query).await.unwrap().is_none());
            assert!(matches!(resolver.require(&query).await, Err(Error::Resolution(_))));
        }
        // No rule picks an agent here, so the default still applies
        let context = resolver.require(&ContextQuery::new().platform("discord")).await.unwrap();
        assert_eq!(context.agent.id, DEFAULT_AGENT_ID);
    }

    #[tokio::test]
    async fn model_resolution_chain() {
        let store = Arc::new(InMemoryContextStore::new());
        store
            .create_agent(NewAgent::new(DEFAULT_AGENT_ID, "PM").with_model("claude-default"))
            .await
            .unwrap();
        store
            .create_agent(NewAgent::new("own", "Own").with_model("claude-own"))
            .await
            .unwrap();
        store.create_agent(NewAgent::new("bare", "Bare")).await.unwrap();
        store
            .create_context_rule(NewContextRule::new("chat", Some("1")).agent("own"))
            .await
            .unwrap();
        store
            .create_context_rule(NewContextRule::new("chat", Some("2")).agent("bare"))
            .await
            .unwrap();
        let resolver = ContextResolver::new(store.clone()).with_default_model("claude-configured");

        let own = resolver.require(&ContextQuery::new().chat("1")).await.unwrap();
        assert_eq!(own.model, "claude-own");
        let bare = resolver.require(&ContextQuery::new().chat("2")).await.unwrap();
        assert_eq!(bare.model, "claude-default");

        store
            .update_agent(NewAgent::new(DEFAULT_AGENT_ID, "PM"))
            .await
            .unwrap();
        let bare = resolver.require(&ContextQuery::new().chat("2")).await.unwrap();
        assert_eq!(bare.model, "claude-configured");
    }

    #[tokio::test]
    async fn tools_are_partitioned_and_prompt_copied() {
        let store = Arc::new(InMemoryContextStore::new());
        let mut agent = NewAgent::new(DEFAULT_AGENT_ID, "PM").with_prompt("You help PMs.");
        agent.fallback_model = Some("claude-haiku".into());
        store.create_agent(agent).await.unwrap();
        store
            .set_agent_tools(
                DEFAULT_AGENT_ID,
                vec![
                    tool(DEFAULT_AGENT_ID, "calendar_*", ToolPatternType::Allow),
                    tool(DEFAULT_AGENT_ID, "gmail_delete", ToolPatternType::Deny),
                    tool(DEFAULT_AGENT_ID, "gmail_send", ToolPatternType::Ask),
                    tool(DEFAULT_AGENT_ID, "jira_*", ToolPatternType::Allow),
                ],
            )
            .await
            .unwrap();

        let context = ContextResolver::new(store).require(&ContextQuery::new()).await.unwrap();
        assert_eq!(context.allowed_tools, vec!["calendar_*", "jira_*"]);
        assert_eq!(context.denied_tools, vec!["gmail_delete"]);
        assert_eq!(context.ask_tools, vec!["gmail_send"]);
        assert_eq!(context.system_prompt, "You help PMs.");
        assert_eq!(context.fallback_model.as_deref(), Some("claude-haiku"));
    }

    #[tokio::test]
    async fn resolution_publishes_event() {
        let store = store_with_agents(&[DEFAULT_AGENT_ID]).await;
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();

        ContextResolver::new(store)
            .with_events(bus)
            .require(&ContextQuery::new())
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event.as_ref(),
            DomainEvent::ContextResolved { agent_id, .. } if agent_id == DEFAULT_AGENT_ID
        ));
    }
}
