//! Agent configuration domain: agents, their skills and tool patterns,
//! context rules, and the resolved [`AgentContext`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Agent used when no context rule selects one.
pub const DEFAULT_AGENT_ID: &str = "pm-assistant";

/// Model used when neither the selected agent nor the default agent names one.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// How an agent may be invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// Talks to users directly (default)
    #[default]
    Primary,
    /// Only invoked by other agents
    Subagent,
    /// Either
    All,
}

impl AgentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Subagent => "subagent",
            Self::All => "all",
        }
    }
}

impl FromStr for AgentMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "subagent" => Ok(Self::Subagent),
            "all" => Ok(Self::All),
            other => Err(StoreError::InvalidValue {
                field: "mode".into(),
                value: other.into(),
            }),
        }
    }
}

/// A persisted agent definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mode: AgentMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_model: Option<String>,
    #[serde(default)]
    pub base_prompt: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating or updating an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAgent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mode: AgentMode,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub fallback_model: Option<String>,
    #[serde(default)]
    pub base_prompt: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl NewAgent {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            mode: AgentMode::Primary,
            default_model: None,
            fallback_model: None,
            base_prompt: String::new(),
            enabled: true,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.base_prompt = prompt.into();
        self
    }

    /// Materialize into an [`Agent`] with both timestamps set to `now`.
    pub fn into_agent(self, now: DateTime<Utc>) -> Agent {
        Agent {
            id: self.id,
            name: self.name,
            description: self.description,
            mode: self.mode,
            default_model: self.default_model,
            fallback_model: self.fallback_model,
            base_prompt: self.base_prompt,
            enabled: self.enabled,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One skill row of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSkill {
    pub agent_id: String,
    pub skill_name: String,
    pub enabled: bool,
}

/// Kind of a tool authorization pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPatternType {
    Allow,
    Deny,
    Ask,
}

impl ToolPatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Ask => "ask",
        }
    }
}

impl FromStr for ToolPatternType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            "ask" => Ok(Self::Ask),
            other => Err(StoreError::InvalidValue {
                field: "type".into(),
                value: other.into(),
            }),
        }
    }
}

/// One glob-style tool authorization pattern of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTool {
    pub agent_id: String,
    pub pattern: String,
    #[serde(rename = "type")]
    pub pattern_type: ToolPatternType,
}

/// What a context rule is matched against.
///
/// Values read from storage that are not one of the known kinds are kept as
/// `Other` and never match a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContextType {
    Default,
    Platform,
    Chat,
    Channel,
    Environment,
    Other(String),
}

impl ContextType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Default => "default",
            Self::Platform => "platform",
            Self::Chat => "chat",
            Self::Channel => "channel",
            Self::Environment => "environment",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for ContextType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "default" => Self::Default,
            "platform" => Self::Platform,
            "chat" => Self::Chat,
            "channel" => Self::Channel,
            "environment" => Self::Environment,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for ContextType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<ContextType> for String {
    fn from(t: ContextType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The query a context rule is tested against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

impl ContextQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn chat(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    pub fn channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// The query field a rule of the given type compares its `context_id` with.
    fn field_for(&self, context_type: &ContextType) -> Option<&str> {
        match context_type {
            ContextType::Platform => self.platform.as_deref(),
            ContextType::Chat => self.chat_id.as_deref(),
            ContextType::Channel => self.channel_id.as_deref(),
            ContextType::Environment => self.environment.as_deref(),
            ContextType::Default | ContextType::Other(_) => None,
        }
    }
}

/// One skill modification carried by a context rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkillOverride {
    Enable(String),
    Disable(String),
}

impl SkillOverride {
    /// Parse `enable:<name>` / `disable:<name>`. Anything else is `None`.
    pub fn parse(token: &str) -> Option<Self> {
        let (op, name) = token.split_once(':')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        match op.trim() {
            "enable" => Some(Self::Enable(name.to_string())),
            "disable" => Some(Self::Disable(name.to_string())),
            _ => None,
        }
    }

    /// Apply this override to an ordered skill list.
    pub fn apply(&self, skills: &mut Vec<String>) {
        match self {
            Self::Disable(name) => skills.retain(|s| s != name),
            Self::Enable(name) => {
                if !skills.iter().any(|s| s == name) {
                    skills.push(name.clone());
                }
            }
        }
    }
}

/// A priority-ordered rule mapping a context to an agent and skill overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRule {
    pub id: String,
    pub context_type: ContextType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub skill_overrides: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

impl ContextRule {
    /// Whether this rule applies to the query.
    ///
    /// `default` rules always apply; typed rules apply iff their
    /// `context_id` equals the matching query field.
    pub fn applies(&self, query: &ContextQuery) -> bool {
        if self.context_type == ContextType::Default {
            return true;
        }
        match (self.context_id.as_deref(), query.field_for(&self.context_type)) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => false,
        }
    }

    /// The well-formed skill overrides of this rule, in order.
    pub fn parsed_overrides(&self) -> impl Iterator<Item = SkillOverride> + '_ {
        self.skill_overrides
            .iter()
            .filter_map(|token| SkillOverride::parse(token))
    }
}

/// Fields supplied when creating a context rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewContextRule {
    pub context_type: ContextType,
    #[serde(default)]
    pub context_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub skill_overrides: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

impl NewContextRule {
    pub fn new(context_type: impl Into<ContextType>, context_id: Option<&str>) -> Self {
        Self {
            context_type: context_type.into(),
            context_id: context_id.map(str::to_string),
            agent_id: None,
            skill_overrides: Vec::new(),
            priority: 0,
        }
    }

    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn overrides<I, S>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skill_overrides = overrides.into_iter().map(Into::into).collect();
        self
    }

    /// Materialize with the given id and creation time.
    pub fn into_rule(self, id: impl Into<String>, now: DateTime<Utc>) -> ContextRule {
        ContextRule {
            id: id.into(),
            context_type: self.context_type,
            context_id: self.context_id,
            agent_id: self.agent_id,
            skill_overrides: self.skill_overrides,
            priority: self.priority,
            created_at: now,
        }
    }
}

/// The resolved configuration for one inbound context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent: Agent,
    pub skills: Vec<String>,
    pub allowed_tools: Vec<String>,
    pub denied_tools: Vec<String>,
    pub ask_tools: Vec<String>,
    pub system_prompt: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_model: Option<String>,
}
