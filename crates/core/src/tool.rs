//! Tool execution seam and the tagged tool-result type.
//!
//! The tool-calling loop never talks to external services directly: it
//! hands every approved call to a [`ToolExecutor`]. Results travel back to
//! the model as the JSON wire shape `{success, data?, error?}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// The outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireToolResult", into = "WireToolResult")]
pub enum ToolOutcome {
    Success { data: Option<serde_json::Value> },
    Failure { error: String },
}

impl ToolOutcome {
    pub fn success(data: serde_json::Value) -> Self {
        Self::Success { data: Some(data) }
    }

    pub fn empty_success() -> Self {
        Self::Success { data: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Serialize to the wire shape sent inside a `tool_result` block.
    pub fn to_wire(&self) -> String {
        let wire = WireToolResult::from(self.clone());
        // A JSON object of bool/string/Value fields always serializes.
        serde_json::to_string(&wire).unwrap_or_else(|_| r#"{"success":false}"#.to_string())
    }
}

/// `{success, data?, error?}` as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolResult {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<ToolOutcome> for WireToolResult {
    fn from(outcome: ToolOutcome) -> Self {
        match outcome {
            ToolOutcome::Success { data } => Self {
                success: true,
                data,
                error: None,
            },
            ToolOutcome::Failure { error } => Self {
                success: false,
                data: None,
                error: Some(error),
            },
        }
    }
}

impl TryFrom<WireToolResult> for ToolOutcome {
    type Error = ToolError;

    fn try_from(wire: WireToolResult) -> Result<Self, Self::Error> {
        match (wire.success, wire.error) {
            (true, None) => Ok(Self::Success { data: wire.data }),
            (true, Some(error)) => Err(ToolError::InvalidResult(format!(
                "successful result carries an error: {error}"
            ))),
            (false, Some(error)) => Ok(Self::Failure { error }),
            (false, None) => Ok(Self::Failure {
                error: "Tool reported failure without an error message".into(),
            }),
        }
    }
}

/// The executor the tool-calling loop delegates approved calls to.
///
/// `context` is opaque to the loop; it is whatever the caller attached to
/// the loop invocation (sender, chat, credentials handle, ...).
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        tool_name: &str,
        input: serde_json::Value,
        context: Option<&serde_json::Value>,
    ) -> std::result::Result<ToolOutcome, ToolError>;
}

/// A single named tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "get_current_datetime").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given input.
    async fn execute(
        &self,
        input: serde_json::Value,
        context: Option<&serde_json::Value>,
    ) -> std::result::Result<ToolOutcome, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// A registry of named tools that acts as a [`ToolExecutor`].
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// All tool definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(
        &self,
        tool_name: &str,
        input: serde_json::Value,
        context: Option<&serde_json::Value>,
    ) -> std::result::Result<ToolOutcome, ToolError> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;
        tool.execute(input, context).await
    }
}
