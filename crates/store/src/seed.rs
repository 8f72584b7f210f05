//! First-run data: the default agent and a `default` rule pointing at it.

use tracing::info;

use concierge_core::{
    ContextStore, ContextType, DEFAULT_AGENT_ID, DEFAULT_MODEL, NewAgent, NewContextRule,
    StoreError,
};

const DEFAULT_PROMPT: &str = "You are a project-management assistant. \
Help the team track tasks, meetings and messages across the tools you are given. \
Be concise, and say so when a tool fails instead of guessing.";

/// What [`seed_defaults`] created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub agent_created: bool,
    pub rule_created: bool,
}

/// Create the default agent and a `default` context rule when absent.
///
/// Safe to run on every start.
pub async fn seed_defaults(store: &dyn ContextStore) -> Result<SeedReport, StoreError> {
    let mut report = SeedReport::default();

    if store.get_agent(DEFAULT_AGENT_ID).await?.is_none() {
        let mut agent = NewAgent::new(DEFAULT_AGENT_ID, "PM Assistant")
            .with_model(DEFAULT_MODEL)
            .with_prompt(DEFAULT_PROMPT);
        agent.description = "Default assistant for every context without a more specific rule".into();
        store.create_agent(agent).await?;
        report.agent_created = true;
        info!(agent = DEFAULT_AGENT_ID, "Seeded default agent");
    }

    let has_default_rule = store
        .list_context_rules()
        .await?
        .iter()
        .any(|r| r.context_type == ContextType::Default);

    if !has_default_rule {
        store
            .create_context_rule(NewContextRule::new(ContextType::Default, None).agent(DEFAULT_AGENT_ID))
            .await?;
        report.rule_created = true;
        info!("Seeded default context rule");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryContextStore;

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let store = InMemoryContextStore::new();

        let first = seed_defaults(&store).await.unwrap();
        assert!(first.agent_created && first.rule_created);

        let second = seed_defaults(&store).await.unwrap();
        assert_eq!(second, SeedReport::default());

        let agent = store.get_agent(DEFAULT_AGENT_ID).await.unwrap().unwrap();
        assert_eq!(agent.default_model.as_deref(), Some(DEFAULT_MODEL));
        assert_eq!(store.list_context_rules().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn existing_agent_is_left_alone() {
        let store = InMemoryContextStore::new();
        store
            .create_agent(NewAgent::new(DEFAULT_AGENT_ID, "Custom").with_prompt("Mine."))
            .await
            .unwrap();

        let report = seed_defaults(&store).await.unwrap();
        assert!(!report.agent_created);
        assert!(report.rule_created);
        let agent = store.get_agent(DEFAULT_AGENT_ID).await.unwrap().unwrap();
        assert_eq!(agent.base_prompt, "Mine.");
    }
}
