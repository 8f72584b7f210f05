//! Agent configuration loading: resolution plus skill content, cached.
//!
//! The loader asks the [`ContextResolver`] for the agent context, looks up
//! each resolved skill in the [`SkillLibrary`], and assembles the system
//! prompt:
//!
//! ```text
//! <base_prompt>
//! {agent base prompt}
//! </base_prompt>
//!
//! <skills>
//! <skill name="gmail">
//! {SKILL.md body}
//! </skill>
//! </skills>
//! ```
//!
//! Results are cached per query for a fixed TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use concierge_core::{AgentContext, ContextQuery, Result};

use crate::resolver::ContextResolver;
use crate::skills::SkillLibrary;

/// Build the system prompt from a base prompt and the named skills.
///
/// Skills missing from the library are skipped and returned.
pub fn assemble_prompt(
    base_prompt: &str,
    skills: &[String],
    library: &SkillLibrary,
) -> (String, Vec<String>) {
    let mut prompt = String::with_capacity(1024);
    let mut missing = Vec::new();

    if !base_prompt.trim().is_empty() {
        prompt.push_str("<base_prompt>\n");
        prompt.push_str(base_prompt.trim());
        prompt.push_str("\n</base_prompt>\n");
    }

    let mut sections = Vec::new();
    for name in skills {
        match library.get(name) {
            Some(skill) if !skill.content.is_empty() => sections.push(skill),
            Some(_) => {}
            None => missing.push(name.clone()),
        }
    }

    if !sections.is_empty() {
        if !prompt.is_empty() {
            prompt.push('\n');
        }
        prompt.push_str("<skills>\n");
        for skill in sections {
            prompt.push_str(&format!("<skill name=\"{}\">\n", skill.name));
            prompt.push_str(&skill.content);
            prompt.push_str("\n</skill>\n");
        }
        prompt.push_str("</skills>\n");
    }

    (prompt, missing)
}

struct CacheEntry {
    context: AgentContext,
    loaded_at: Instant,
}

/// Resolver + skill library + TTL cache.
pub struct AgentConfigLoader {
    resolver: ContextResolver,
    skills: Arc<SkillLibrary>,
    ttl: Duration,
    cache: RwLock<HashMap<ContextQuery, CacheEntry>>,
}

impl AgentConfigLoader {
    pub fn new(resolver: ContextResolver, skills: Arc<SkillLibrary>) -> Self {
        Self {
            resolver,
            skills,
            ttl: Duration::from_secs(60),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// How long a loaded configuration is reused. Zero disables caching.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn resolver(&self) -> &ContextResolver {
        &self.resolver
    }

    pub fn skills(&self) -> &Arc<SkillLibrary> {
        &self.skills
    }

    /// The agent context for `query` with the assembled system prompt.
    ///
    /// `Ok(None)` when no agent is available; such results are not cached.
    pub async fn load(&self, query: &ContextQuery) -> Result<Option<AgentContext>> {
        if !self.ttl.is_zero() {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(query) {
                if entry.loaded_at.elapsed() < self.ttl {
                    debug!(agent = %entry.context.agent.id, "Agent config cache hit");
                    return Ok(Some(entry.context.clone()));
                }
            }
        }

        let Some(mut context) = self.resolver.resolve(query).await? else {
            return Ok(None);
        };

        let (prompt, missing) =
            assemble_prompt(&context.agent.base_prompt, &context.skills, &self.skills);
        if !missing.is_empty() {
            warn!(agent = %context.agent.id, missing = ?missing, "Skills not found in library");
        }
        context.system_prompt = prompt;

        if !self.ttl.is_zero() {
            let mut cache = self.cache.write().await;
            cache.retain(|_, entry| entry.loaded_at.elapsed() < self.ttl);
            cache.insert(
                query.clone(),
                CacheEntry {
                    context: context.clone(),
                    loaded_at: Instant::now(),
                },
            );
        }
        Ok(Some(context))
    }

    #[cfg(test)]
    async fn cached_entries(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Drop every cached configuration.
    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        debug!(entries = cache.len(), "Invalidating agent config cache");
        cache.clear();
    }
}
