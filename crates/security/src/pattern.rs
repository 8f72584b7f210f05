//! Tool patterns — exact names or prefixes ending in `*`.
//!
//! A tool passes filtering iff
//! (no allow/ask patterns exist, or it matches one of allow ∪ ask)
//! AND (no deny patterns exist, or it matches none of them).
//! Deny is a strict veto.

use concierge_core::{AgentContext, ToolDefinition};

/// Whether `tool_name` matches any of `patterns`.
///
/// A pattern matches exactly, or as a prefix when it ends with `*`.
/// An empty pattern list matches nothing.
pub fn matches_tool_pattern<S: AsRef<str>>(tool_name: &str, patterns: &[S]) -> bool {
    patterns.iter().any(|pattern| {
        let pattern = pattern.as_ref();
        match pattern.strip_suffix('*') {
            Some(prefix) => tool_name.starts_with(prefix),
            None => tool_name == pattern,
        }
    })
}

/// Whether a single tool survives the allow/deny/ask lists.
pub fn is_tool_permitted<S: AsRef<str>>(tool_name: &str, allow: &[S], deny: &[S], ask: &[S]) -> bool {
    let admitted = (allow.is_empty() && ask.is_empty())
        || matches_tool_pattern(tool_name, allow)
        || matches_tool_pattern(tool_name, ask);
    admitted && !matches_tool_pattern(tool_name, deny)
}

/// Keep the tool names permitted by the pattern lists, preserving order.
pub fn filter_tools_by_patterns<T, S>(tools: impl IntoIterator<Item = T>, allow: &[S], deny: &[S], ask: &[S]) -> Vec<T>
where
    T: AsRef<str>,
    S: AsRef<str>,
{
    tools
        .into_iter()
        .filter(|tool| is_tool_permitted(tool.as_ref(), allow, deny, ask))
        .collect()
}

/// Narrow a tool catalogue to what a resolved agent may see.
pub fn filter_tool_definitions(
    definitions: Vec<ToolDefinition>,
    context: &AgentContext,
) -> Vec<ToolDefinition> {
    let before = definitions.len();
    let kept: Vec<ToolDefinition> = definitions
        .into_iter()
        .filter(|def| {
            is_tool_permitted(
                &def.name,
                &context.allowed_tools,
                &context.denied_tools,
                &context.ask_tools,
            )
        })
        .collect();

    tracing::debug!(
        agent = %context.agent.id,
        before,
        after = kept.len(),
        "Filtered tool definitions"
    );
    kept
}
