//! Tool permission seam — allow / deny / ask decisions and approvals.
//!
//! The tool-calling loop consults a [`ToolPermissionEngine`] before every
//! tool execution. The engine is an external collaborator; the loop only
//! interprets its decisions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PermissionError;

/// A tool call as presented to the permission engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub input: serde_json::Value,
}

/// Where a tool call originates from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,

    /// The end user on whose behalf the agent acts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// The policy that made a tool call require approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    /// Stable identifier of the policy
    pub id: String,

    /// The tool pattern that matched, if the policy is pattern-based
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// How long an approval may stay pending before it expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// The permission engine's verdict for one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PermissionDecision {
    Allow,
    Deny,
    Ask {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        policy: Option<ApprovalPolicy>,
    },
}

/// State of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Approved,
    Denied,
    Pending,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Pending => "pending",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approved" => Ok(Self::Approved),
            "denied" => Ok(Self::Denied),
            "pending" => Ok(Self::Pending),
            "expired" => Ok(Self::Expired),
            other => Err(PermissionError::ApprovalFailed(format!(
                "unknown approval status '{other}'"
            ))),
        }
    }
}

/// Input to [`ToolPermissionEngine::request_approval`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub tool: ToolInvocation,
    pub policy: ApprovalPolicy,
    pub context: PermissionContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// Result of an approval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub status: ApprovalStatus,

    /// Identifier of the approval record, when the engine keeps one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
}

/// Decides whether a tool call may run, and brokers interactive approvals.
#[async_trait]
pub trait ToolPermissionEngine: Send + Sync {
    async fn evaluate_tool_call(
        &self,
        tool: &ToolInvocation,
        context: &PermissionContext,
        agent_id: Option<&str>,
    ) -> std::result::Result<PermissionDecision, PermissionError>;

    async fn request_approval(
        &self,
        request: ApprovalRequest,
    ) -> std::result::Result<ApprovalOutcome, PermissionError>;
}
