//! SQLite context store.
//!
//! One database file with four tables:
//! - `agents`
//! - `agent_skills` / `agent_tools` — per-agent rows, ordered by `position`
//! - `context_rules` — `skill_overrides` kept as a JSON array
//!
//! Child rows are removed with their agent through `ON DELETE CASCADE`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info, warn};
use uuid::Uuid;

use concierge_core::{
    Agent, AgentMode, AgentSkill, AgentTool, ContextRule, ContextStore, ContextType, NewAgent,
    NewContextRule, StoreError, ToolPatternType,
};

use crate::validate_new_rule;

pub struct SqliteContextStore {
    pool: SqlitePool,
}

impl SqliteContextStore {
    /// Open (or create) a database.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        // Every in-memory connection would otherwise be its own database
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite context store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements = [
            (
                "agents table",
                r#"
                CREATE TABLE IF NOT EXISTS agents (
                    id              TEXT PRIMARY KEY,
                    name            TEXT NOT NULL,
                    description     TEXT NOT NULL DEFAULT '',
                    mode            TEXT NOT NULL DEFAULT 'primary',
                    default_model   TEXT,
                    fallback_model  TEXT,
                    base_prompt     TEXT NOT NULL DEFAULT '',
                    enabled         INTEGER NOT NULL DEFAULT 1,
                    created_at      TEXT NOT NULL,
                    updated_at      TEXT NOT NULL
                )
                "#,
            ),
            (
                "agent_skills table",
                r#"
                CREATE TABLE IF NOT EXISTS agent_skills (
                    agent_id    TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                    skill_name  TEXT NOT NULL,
                    enabled     INTEGER NOT NULL DEFAULT 1,
                    position    INTEGER NOT NULL,
                    PRIMARY KEY (agent_id, skill_name)
                )
                "#,
            ),
            (
                "agent_tools table",
                r#"
                CREATE TABLE IF NOT EXISTS agent_tools (
                    agent_id    TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                    pattern     TEXT NOT NULL,
                    type        TEXT NOT NULL,
                    position    INTEGER NOT NULL,
                    PRIMARY KEY (agent_id, pattern, type)
                )
                "#,
            ),
            (
                "context_rules table",
                r#"
                CREATE TABLE IF NOT EXISTS context_rules (
                    id               TEXT PRIMARY KEY,
                    context_type     TEXT NOT NULL,
                    context_id       TEXT,
                    agent_id         TEXT,
                    skill_overrides  TEXT NOT NULL DEFAULT '[]',
                    priority         INTEGER NOT NULL DEFAULT 0,
                    created_at       TEXT NOT NULL
                )
                "#,
            ),
            (
                "priority index",
                "CREATE INDEX IF NOT EXISTS idx_context_rules_priority ON context_rules(priority DESC)",
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn parse_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn column<'r, T>(row: &'r sqlx::sqlite::SqliteRow, name: &str) -> Result<T, StoreError>
    where
        T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
    {
        row.try_get(name)
            .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
    }

    fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> Result<Agent, StoreError> {
        let mode: String = Self::column(row, "mode")?;
        let created_at: String = Self::column(row, "created_at")?;
        let updated_at: String = Self::column(row, "updated_at")?;

        Ok(Agent {
            id: Self::column(row, "id")?,
            name: Self::column(row, "name")?,
            description: Self::column(row, "description")?,
            mode: AgentMode::from_str(&mode)?,
            default_model: Self::column(row, "default_model")?,
            fallback_model: Self::column(row, "fallback_model")?,
            base_prompt: Self::column(row, "base_prompt")?,
            enabled: Self::column(row, "enabled")?,
            created_at: Self::parse_time(&created_at),
            updated_at: Self::parse_time(&updated_at),
        })
    }

    fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> Result<ContextRule, StoreError> {
        let context_type: String = Self::column(row, "context_type")?;
        let overrides_json: String = Self::column(row, "skill_overrides")?;
        let created_at: String = Self::column(row, "created_at")?;

        let id: String = Self::column(row, "id")?;

        let skill_overrides: Vec<String> = serde_json::from_str(&overrides_json)
            .unwrap_or_else(|e| {
                warn!(rule = %id, "Ignoring malformed skill_overrides: {e}");
                Vec::new()
            });

        Ok(ContextRule {
            id,
            context_type: ContextType::from(context_type),
            context_id: Self::column(row, "context_id")?,
            agent_id: Self::column(row, "agent_id")?,
            skill_overrides,
            priority: Self::column::<i64>(row, "priority")? as i32,
            created_at: Self::parse_time(&created_at),
        })
    }

    async fn require_agent(&self, agent_id: &str) -> Result<(), StoreError> {
        let exists = sqlx::query("SELECT 1 FROM agents WHERE id = ?1")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("agent lookup: {e}")))?;
        match exists {
            Some(_) => Ok(()),
            None => Err(StoreError::AgentNotFound(agent_id.into())),
        }
    }
}

#[async_trait]
impl ContextStore for SqliteContextStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_agent(&self, agent: NewAgent) -> Result<Agent, StoreError> {
        let agent = agent.into_agent(Utc::now());
        let result = sqlx::query(
            r#"
            INSERT INTO agents (id, name, description, mode, default_model, fallback_model,
                                base_prompt, enabled, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&agent.id)
        .bind(&agent.name)
        .bind(&agent.description)
        .bind(agent.mode.as_str())
        .bind(&agent.default_model)
        .bind(&agent.fallback_model)
        .bind(&agent.base_prompt)
        .bind(agent.enabled)
        .bind(agent.created_at.to_rfc3339())
        .bind(agent.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT agent failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AgentExists(agent.id));
        }
        debug!(agent = %agent.id, "Created agent");
        Ok(agent)
    }

    async fn update_agent(&self, agent: NewAgent) -> Result<Agent, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE agents SET
                name = ?2, description = ?3, mode = ?4, default_model = ?5,
                fallback_model = ?6, base_prompt = ?7, enabled = ?8, updated_at = ?9
            WHERE id = ?1
            "#,
        )
        .bind(&agent.id)
        .bind(&agent.name)
        .bind(&agent.description)
        .bind(agent.mode.as_str())
        .bind(&agent.default_model)
        .bind(&agent.fallback_model)
        .bind(&agent.base_prompt)
        .bind(agent.enabled)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPDATE agent failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AgentNotFound(agent.id));
        }
        self.get_agent(&agent.id)
            .await?
            .ok_or_else(|| StoreError::AgentNotFound(agent.id.clone()))
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>, StoreError> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("get agent: {e}")))?;
        row.as_ref().map(Self::row_to_agent).transpose()
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("list agents: {e}")))?;
        rows.iter().map(Self::row_to_agent).collect()
    }

    async fn delete_agent(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM agents WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE agent failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_agent_skills(&self, agent_id: &str) -> Result<Vec<AgentSkill>, StoreError> {
        let rows = sqlx::query(
            "SELECT skill_name, enabled FROM agent_skills WHERE agent_id = ?1 ORDER BY position",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("agent skills: {e}")))?;

        rows.iter()
            .map(|row| {
                Ok(AgentSkill {
                    agent_id: agent_id.into(),
                    skill_name: Self::column(row, "skill_name")?,
                    enabled: Self::column(row, "enabled")?,
                })
            })
            .collect()
    }

    async fn set_agent_skills(
        &self,
        agent_id: &str,
        skills: Vec<(String, bool)>,
    ) -> Result<(), StoreError> {
        self.require_agent(agent_id).await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("begin: {e}")))?;

        sqlx::query("DELETE FROM agent_skills WHERE agent_id = ?1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("clear skills: {e}")))?;

        for (position, (skill_name, enabled)) in skills.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO agent_skills (agent_id, skill_name, enabled, position)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(agent_id, skill_name) DO UPDATE SET enabled = excluded.enabled
                "#,
            )
            .bind(agent_id)
            .bind(skill_name)
            .bind(*enabled)
            .bind(position as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("insert skill {skill_name}: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("commit: {e}")))?;
        debug!(agent = agent_id, count = skills.len(), "Replaced agent skills");
        Ok(())
    }

    async fn get_agent_tools(&self, agent_id: &str) -> Result<Vec<AgentTool>, StoreError> {
        let rows = sqlx::query(
            "SELECT pattern, type FROM agent_tools WHERE agent_id = ?1 ORDER BY position",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("agent tools: {e}")))?;

        rows.iter()
            .map(|row| {
                let kind: String = Self::column(row, "type")?;
                Ok(AgentTool {
                    agent_id: agent_id.into(),
                    pattern: Self::column(row, "pattern")?,
                    pattern_type: ToolPatternType::from_str(&kind)?,
                })
            })
            .collect()
    }

    async fn set_agent_tools(&self, agent_id: &str, tools: Vec<AgentTool>) -> Result<(), StoreError> {
        self.require_agent(agent_id).await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("begin: {e}")))?;

        sqlx::query("DELETE FROM agent_tools WHERE agent_id = ?1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("clear tools: {e}")))?;

        for (position, tool) in tools.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO agent_tools (agent_id, pattern, type, position)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(agent_id, pattern, type) DO NOTHING
                "#,
            )
            .bind(agent_id)
            .bind(&tool.pattern)
            .bind(tool.pattern_type.as_str())
            .bind(position as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("insert tool {}: {e}", tool.pattern)))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("commit: {e}")))?;
        debug!(agent = agent_id, count = tools.len(), "Replaced agent tool patterns");
        Ok(())
    }

    async fn list_context_rules(&self) -> Result<Vec<ContextRule>, StoreError> {
        let rows = sqlx::query("SELECT * FROM context_rules ORDER BY priority DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("list rules: {e}")))?;
        rows.iter().map(Self::row_to_rule).collect()
    }

    async fn create_context_rule(&self, rule: NewContextRule) -> Result<ContextRule, StoreError> {
        validate_new_rule(&rule)?;
        let rule = rule.into_rule(Uuid::new_v4().to_string(), Utc::now());
        let overrides = serde_json::to_string(&rule.skill_overrides)
            .map_err(|e| StoreError::Storage(format!("overrides serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO context_rules (id, context_type, context_id, agent_id,
                                       skill_overrides, priority, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&rule.id)
        .bind(rule.context_type.as_str())
        .bind(&rule.context_id)
        .bind(&rule.agent_id)
        .bind(&overrides)
        .bind(rule.priority as i64)
        .bind(rule.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT rule failed: {e}")))?;

        debug!(rule = %rule.id, context_type = %rule.context_type, "Created context rule");
        Ok(rule)
    }

    async fn delete_context_rule(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM context_rules WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE rule failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteContextStore {
        SqliteContextStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn agent_crud() {
        let store = test_store().await;
        let created = store
            .create_agent(
                NewAgent::new("support", "Support Bot")
                    .with_model("claude-3-5-haiku-20241022")
                    .with_prompt("You answer support questions."),
            )
            .await
            .unwrap();

        let fetched = store.get_agent("support").await.unwrap().unwrap();
        assert_eq!(fetched.name, "Support Bot");
        assert_eq!(fetched.default_model.as_deref(), Some("claude-3-5-haiku-20241022"));
        assert_eq!(fetched.mode, AgentMode::Primary);
        assert!(fetched.enabled);

        let mut update = NewAgent::new("support", "Support");
        update.enabled = false;
        let updated = store.update_agent(update).await.unwrap();
        assert!(!updated.enabled);
        assert_eq!(updated.created_at.timestamp(), created.created_at.timestamp());

        assert!(matches!(
            store.create_agent(NewAgent::new("support", "Dup")).await,
            Err(StoreError::AgentExists(_))
        ));
        assert_eq!(store.list_agents().await.unwrap().len(), 1);
        assert!(store.delete_agent("support").await.unwrap());
        assert!(store.get_agent("support").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn skills_and_tools_roundtrip_in_order() {
        let store = test_store().await;
        store.create_agent(NewAgent::new("pm", "PM")).await.unwrap();

        store
            .set_agent_skills(
                "pm",
                vec![("jira".into(), true), ("gmail".into(), false), ("calendar".into(), true)],
            )
            .await
            .unwrap();
        let skills = store.get_agent_skills("pm").await.unwrap();
        let names: Vec<_> = skills.iter().map(|s| s.skill_name.as_str()).collect();
        assert_eq!(names, vec!["jira", "gmail", "calendar"]);
        assert!(!skills[1].enabled);

        store
            .set_agent_tools(
                "pm",
                vec![
                    AgentTool {
                        agent_id: "pm".into(),
                        pattern: "calendar_*".into(),
                        pattern_type: ToolPatternType::Allow,
                    },
                    AgentTool {
                        agent_id: "pm".into(),
                        pattern: "gmail_send".into(),
                        pattern_type: ToolPatternType::Ask,
                    },
                ],
            )
            .await
            .unwrap();
        let tools = store.get_agent_tools("pm").await.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[1].pattern_type, ToolPatternType::Ask);
    }

    #[tokio::test]
    async fn deleting_agent_cascades() {
        let store = test_store().await;
        store.create_agent(NewAgent::new("pm", "PM")).await.unwrap();
        store.set_agent_skills("pm", vec![("jira".into(), true)]).await.unwrap();
        store.delete_agent("pm").await.unwrap();
        assert!(store.get_agent_skills("pm").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn skills_for_missing_agent_rejected() {
        let store = test_store().await;
        let err = store.set_agent_skills("ghost", vec![]).await.unwrap_err();
        assert!(matches!(err, StoreError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn rules_roundtrip_with_overrides() {
        let store = test_store().await;
        store
            .create_context_rule(NewContextRule::new("default", None).agent("x"))
            .await
            .unwrap();
        let slack = store
            .create_context_rule(
                NewContextRule::new("platform", Some("slack"))
                    .agent("y")
                    .priority(10)
                    .overrides(["disable:gmail", "enable:slack"]),
            )
            .await
            .unwrap();

        let rules = store.list_context_rules().await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, slack.id);
        assert_eq!(rules[0].context_type, ContextType::Platform);
        assert_eq!(rules[0].skill_overrides, vec!["disable:gmail", "enable:slack"]);
        assert_eq!(rules[1].context_id, None);

        assert!(store.delete_context_rule(&slack.id).await.unwrap());
        assert!(!store.delete_context_rule(&slack.id).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_stored_context_type_reads_back_as_other() {
        let store = test_store().await;
        sqlx::query(
            "INSERT INTO context_rules (id, context_type, context_id, created_at) VALUES ('r', 'team', 'ops', ?1)",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&store.pool)
        .await
        .unwrap();

        let rules = store.list_context_rules().await.unwrap();
        assert_eq!(rules[0].context_type, ContextType::Other("team".into()));
    }

    #[tokio::test]
    async fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("concierge.db").display());
        {
            let store = SqliteContextStore::new(&url).await.unwrap();
            store.create_agent(NewAgent::new("pm", "PM")).await.unwrap();
        }
        let store = SqliteContextStore::new(&url).await.unwrap();
        assert!(store.get_agent("pm").await.unwrap().is_some());
    }
}
