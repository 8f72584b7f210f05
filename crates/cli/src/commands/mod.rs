pub mod agent;
pub mod chat;
pub mod init;
pub mod resolve;
pub mod rule;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use concierge_agent::{AgentConfigLoader, ContextResolver, SkillLibrary};
use concierge_config::AppConfig;
use concierge_core::{ContextQuery, ContextStore, PermissionContext};
use concierge_store::InMemoryContextStore;

/// The context a command runs in.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct QueryArgs {
    /// Platform the message arrives on (e.g. slack, whatsapp)
    #[arg(long)]
    pub platform: Option<String>,

    /// Chat id
    #[arg(long)]
    pub chat: Option<String>,

    /// Channel id
    #[arg(long)]
    pub channel: Option<String>,

    /// Deployment environment (e.g. production)
    #[arg(long, env = "CONCIERGE_ENVIRONMENT")]
    pub environment: Option<String>,
}

impl QueryArgs {
    pub fn to_query(&self) -> ContextQuery {
        ContextQuery {
            platform: self.platform.clone(),
            chat_id: self.chat.clone(),
            channel_id: self.channel.clone(),
            environment: self.environment.clone(),
        }
    }

    pub fn to_permission_context(&self, user: Option<String>) -> PermissionContext {
        PermissionContext {
            platform: self.platform.clone(),
            chat_id: self.chat.clone(),
            channel_id: self.channel.clone(),
            user_id: user,
        }
    }
}

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Open the configured context store. Schemas are migrated on open; the
/// in-memory backend is seeded since it starts empty every time.
pub async fn open_store(
    config: &AppConfig,
) -> Result<Arc<dyn ContextStore>, Box<dyn std::error::Error>> {
    match config.database.backend.as_str() {
        "memory" => {
            let store = InMemoryContextStore::new();
            concierge_store::seed_defaults(&store).await?;
            Ok(Arc::new(store))
        }
        "postgres" => open_postgres(config).await,
        _ => {
            if config.database.url.is_none() {
                std::fs::create_dir_all(AppConfig::config_dir())?;
            }
            let store =
                concierge_store::SqliteContextStore::new(&config.database.connection_url()).await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(feature = "postgres")]
async fn open_postgres(
    config: &AppConfig,
) -> Result<Arc<dyn ContextStore>, Box<dyn std::error::Error>> {
    let store =
        concierge_store::PostgresContextStore::connect(&config.database.connection_url()).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(
    _config: &AppConfig,
) -> Result<Arc<dyn ContextStore>, Box<dyn std::error::Error>> {
    Err("database.backend = \"postgres\" requires building with `--features postgres`".into())
}

/// Resolver + skill library + cache, configured from `[agents]`.
pub fn build_loader(config: &AppConfig, store: Arc<dyn ContextStore>) -> AgentConfigLoader {
    let resolver = ContextResolver::new(store)
        .with_default_agent(config.agents.default_agent_id.clone())
        .with_default_model(config.default_model.clone());
    let skills = Arc::new(SkillLibrary::discover(&config.agents.skills_path()));
    AgentConfigLoader::new(resolver, skills)
        .with_ttl(Duration::from_secs(config.agents.cache_ttl_secs))
}
