//! Security module for Concierge — tool authorization, approvals, and audit logging.
//!
//! Provides:
//! - **Patterns**: Exact / trailing-`*` tool patterns and allow/deny/ask filtering
//! - **Permission engine**: [`PatternPermissionEngine`], driven by a resolved agent context
//! - **Approvals**: [`ApprovalBroker`] for interactive approvals, [`AutoApprover`] otherwise
//! - **Audit logging**: Structured record of permission decisions and approvals

pub mod approval;
pub mod audit;
pub mod pattern;
pub mod permission;

pub use approval::{ApprovalBroker, Approver, AutoApprover, PendingApproval};
pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use pattern::{
    filter_tool_definitions, filter_tools_by_patterns, is_tool_permitted, matches_tool_pattern,
};
pub use permission::PatternPermissionEngine;
