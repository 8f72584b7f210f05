//! Pattern-based [`ToolPermissionEngine`].
//!
//! Decisions come from one agent's allow / deny / ask patterns:
//! deny match → `Deny`; ask match → `Ask` with a policy naming the pattern;
//! allow match, or no allow and no ask patterns at all → `Allow`;
//! anything else → `Deny`.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use concierge_core::{
    AgentContext, ApprovalOutcome, ApprovalPolicy, ApprovalRequest, PermissionContext,
    PermissionDecision, PermissionError, ToolInvocation, ToolPermissionEngine,
};

use crate::approval::{Approver, AutoApprover};
use crate::audit::{AuditEvent, AuditLogger, AuditOutcome};
use crate::pattern::matches_tool_pattern;

pub struct PatternPermissionEngine {
    allow: Vec<String>,
    deny: Vec<String>,
    ask: Vec<String>,
    approver: Arc<dyn Approver>,
    approval_timeout_secs: Option<u64>,
    audit: Option<Arc<AuditLogger>>,
}

impl PatternPermissionEngine {
    /// Engine over explicit pattern lists. Approvals are denied until an
    /// approver is attached.
    pub fn new(allow: Vec<String>, deny: Vec<String>, ask: Vec<String>) -> Self {
        Self {
            allow,
            deny,
            ask,
            approver: Arc::new(AutoApprover::deny_all()),
            approval_timeout_secs: None,
            audit: None,
        }
    }

    /// Engine over a resolved agent's tool patterns.
    pub fn from_context(context: &AgentContext) -> Self {
        Self::new(
            context.allowed_tools.clone(),
            context.denied_tools.clone(),
            context.ask_tools.clone(),
        )
    }

    pub fn with_approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.approver = approver;
        self
    }

    /// Timeout stamped on the policies of `Ask` decisions.
    pub fn with_approval_timeout(mut self, secs: u64) -> Self {
        self.approval_timeout_secs = Some(secs);
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    fn decide(&self, tool_name: &str) -> (PermissionDecision, &'static str) {
        if matches_tool_pattern(tool_name, &self.deny) {
            return (PermissionDecision::Deny, "matched deny pattern");
        }

        if let Some(pattern) = self.ask.iter().find(|p| matches_tool_pattern(tool_name, &[p])) {
            let policy = ApprovalPolicy {
                id: format!("ask:{pattern}"),
                pattern: Some(pattern.clone()),
                timeout_secs: self.approval_timeout_secs,
            };
            return (PermissionDecision::Ask { policy: Some(policy) }, "matched ask pattern");
        }

        if self.allow.is_empty() && self.ask.is_empty() {
            return (PermissionDecision::Allow, "no allow patterns configured");
        }

        if matches_tool_pattern(tool_name, &self.allow) {
            (PermissionDecision::Allow, "matched allow pattern")
        } else {
            (PermissionDecision::Deny, "not in allow patterns")
        }
    }
}

fn describe(context: &PermissionContext) -> String {
    match (&context.platform, &context.chat_id) {
        (Some(platform), Some(chat)) => format!("{platform}:{chat}"),
        (Some(platform), None) => platform.clone(),
        (None, Some(chat)) => chat.clone(),
        (None, None) => "unknown".into(),
    }
}

#[async_trait]
impl ToolPermissionEngine for PatternPermissionEngine {
    async fn evaluate_tool_call(
        &self,
        tool: &ToolInvocation,
        context: &PermissionContext,
        agent_id: Option<&str>,
    ) -> Result<PermissionDecision, PermissionError> {
        let (decision, reason) = self.decide(&tool.name);
        debug!(tool = %tool.name, ?decision, reason, "Evaluated tool permission");

        if let Some(audit) = &self.audit {
            audit.log(
                AuditEvent::ToolPermission {
                    tool_name: tool.name.clone(),
                },
                agent_id.unwrap_or("unknown"),
                &describe(context),
                AuditOutcome::from(&decision),
                Some(reason.into()),
            );
        }

        Ok(decision)
    }

    async fn request_approval(
        &self,
        request: ApprovalRequest,
    ) -> Result<ApprovalOutcome, PermissionError> {
        let tool_name = request.tool.name.clone();
        let actor = request.agent_id.clone().unwrap_or_else(|| "unknown".into());
        let target = describe(&request.context);
        let policy_id = request.policy.id.clone();

        let outcome = self.approver.request(request).await?;

        if let Some(audit) = &self.audit {
            audit.log(
                AuditEvent::Approval {
                    tool_name,
                    status: outcome.status,
                },
                &actor,
                &target,
                AuditOutcome::from(outcome.status),
                Some(policy_id),
            );
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::ApprovalStatus;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn invocation(name: &str) -> ToolInvocation {
        ToolInvocation {
            name: name.into(),
            input: serde_json::json!({}),
        }
    }

    async fn decide(engine: &PatternPermissionEngine, name: &str) -> PermissionDecision {
        engine
            .evaluate_tool_call(&invocation(name), &PermissionContext::default(), Some("pm-assistant"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn no_patterns_allows_everything() {
        let engine = PatternPermissionEngine::new(vec![], vec![], vec![]);
        assert_eq!(decide(&engine, "anything").await, PermissionDecision::Allow);
    }

    #[tokio::test]
    async fn deny_wins_over_allow_and_ask() {
        let engine = PatternPermissionEngine::new(
            strings(&["gmail_*"]),
            strings(&["gmail_delete"]),
            strings(&["gmail_delete"]),
        );
        assert_eq!(decide(&engine, "gmail_delete").await, PermissionDecision::Deny);
        assert_eq!(decide(&engine, "gmail_read").await, PermissionDecision::Allow);
    }

    #[tokio::test]
    async fn ask_carries_pattern_policy() {
        let engine = PatternPermissionEngine::new(vec![], vec![], strings(&["github_*"]))
            .with_approval_timeout(30);
        match decide(&engine, "github_merge_pr").await {
            PermissionDecision::Ask { policy: Some(policy) } => {
                assert_eq!(policy.id, "ask:github_*");
                assert_eq!(policy.pattern.as_deref(), Some("github_*"));
                assert_eq!(policy.timeout_secs, Some(30));
            }
            other => panic!("expected ask, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unlisted_tool_denied_when_allow_list_exists() {
        let engine = PatternPermissionEngine::new(strings(&["calendar_*"]), vec![], vec![]);
        assert_eq!(decide(&engine, "slack_post").await, PermissionDecision::Deny);
    }

    #[tokio::test]
    async fn approvals_are_delegated_and_audited() {
        let audit = Arc::new(AuditLogger::new());
        let engine = PatternPermissionEngine::new(vec![], vec![], strings(&["gmail_send"]))
            .with_approver(Arc::new(AutoApprover::approve_all()))
            .with_audit(audit.clone());

        let decision = decide(&engine, "gmail_send").await;
        let PermissionDecision::Ask { policy: Some(policy) } = decision else {
            panic!("expected ask");
        };
        let outcome = engine
            .request_approval(ApprovalRequest {
                tool: invocation("gmail_send"),
                policy,
                context: PermissionContext {
                    platform: Some("slack".into()),
                    ..Default::default()
                },
                agent_id: Some("pm-assistant".into()),
            })
            .await
            .unwrap();

        assert_eq!(outcome.status, ApprovalStatus::Approved);
        let entries = audit.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].outcome, AuditOutcome::Pending);
        assert_eq!(entries[1].outcome, AuditOutcome::Allowed);
        assert_eq!(entries[1].target, "slack");
    }

    #[tokio::test]
    async fn default_approver_denies() {
        let engine = PatternPermissionEngine::new(vec![], vec![], strings(&["x"]));
        let outcome = engine
            .request_approval(ApprovalRequest {
                tool: invocation("x"),
                policy: ApprovalPolicy {
                    id: "ask:x".into(),
                    pattern: None,
                    timeout_secs: None,
                },
                context: PermissionContext::default(),
                agent_id: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome.status, ApprovalStatus::Denied);
    }
}
