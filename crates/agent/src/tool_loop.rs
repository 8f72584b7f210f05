//! The tool-calling loop.
//!
//! One invocation drives a conversation until the model stops asking for
//! tools:
//!
//! 1. **Request** a completion with the system prompt, tools and messages
//! 2. If the stop reason is `tool_use`, count the iteration, then for every
//!    `tool_use` block, in order: permission gate → duplicate guard →
//!    executor
//! 3. Append the assistant turn and one user turn carrying every
//!    `tool_result`, and request again
//! 4. Otherwise the text blocks are the response
//!
//! Denials, unapproved calls, duplicate calls and executor failures are
//! reported to the model as error results; they never end the loop. The
//! iteration limit ends it with a fixed apology.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use concierge_config::ToolLoopConfig;
use concierge_core::{
    AgentContext, ApprovalRequest, ApprovalStatus, ChatMessage, Completion, CompletionRequest,
    ContentBlock, DEFAULT_MODEL, DomainEvent, EventBus, ModelClient, PermissionContext,
    PermissionDecision, Result, Role, ToolDefinition, ToolExecutor, ToolInvocation, ToolOutcome,
    ToolPermissionEngine, Usage,
};

use crate::executor::execute_tool;
use crate::guard::{
    CallCheck, CallGuard, ITERATION_LIMIT_RESPONSE, IterationCheck, OrderedNameSet,
    loop_detected_message,
};

/// Per-invocation settings of the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub max_duplicate_calls: u32,
    pub max_tokens: u32,
    pub model: String,
    /// Retried once when a request against `model` fails with a retryable error
    pub fallback_model: Option<String>,
    pub system_prompt: String,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_duplicate_calls: 3,
            max_tokens: 4096,
            model: DEFAULT_MODEL.into(),
            fallback_model: None,
            system_prompt: String::new(),
        }
    }
}

impl LoopConfig {
    /// Limits from the `[tool_loop]` section, model and prompt from a
    /// resolved agent context.
    pub fn for_agent(limits: &ToolLoopConfig, context: &AgentContext) -> Self {
        Self {
            max_iterations: limits.max_iterations,
            max_duplicate_calls: limits.max_duplicate_calls,
            max_tokens: limits.max_tokens,
            model: context.model.clone(),
            fallback_model: context
                .fallback_model
                .clone()
                .or_else(|| limits.fallback_model.clone()),
            system_prompt: context.system_prompt.clone(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_fallback_model(mut self, model: impl Into<String>) -> Self {
        self.fallback_model = Some(model.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_duplicate_calls(mut self, max: u32) -> Self {
        self.max_duplicate_calls = max;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }
}

/// The permission engine plus who is asking.
#[derive(Clone)]
pub struct PermissionConfig {
    pub engine: Arc<dyn ToolPermissionEngine>,
    pub context: PermissionContext,
    pub agent_id: Option<String>,
}

impl PermissionConfig {
    pub fn new(engine: Arc<dyn ToolPermissionEngine>, context: PermissionContext) -> Self {
        Self {
            engine,
            context,
            agent_id: None,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

/// What one loop invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallingResult {
    pub response: String,
    /// Passes through the tool-use branch, including the one that hit the limit
    pub tool_iterations: u32,
    /// Distinct tool names requested by the model, in first-use order
    pub tools_used: Vec<String>,
    pub exceeded_limits: bool,
    pub usage: Usage,
}

/// Drives a model through tool use until it produces a final answer.
pub struct ToolCallingLoop {
    client: Arc<dyn ModelClient>,
    executor: Arc<dyn ToolExecutor>,
    config: LoopConfig,
    permission: Option<PermissionConfig>,
    events: Option<Arc<EventBus>>,
}

impl ToolCallingLoop {
    pub fn new(client: Arc<dyn ModelClient>, executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            client,
            executor,
            config: LoopConfig::default(),
            permission: None,
            events: None,
        }
    }

    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Gate every tool call through a permission engine.
    pub fn with_permission(mut self, permission: PermissionConfig) -> Self {
        self.permission = Some(permission);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Run the loop over `messages`.
    ///
    /// `context` is handed to the executor untouched on every call.
    pub async fn run(
        &self,
        tools: Vec<ToolDefinition>,
        messages: Vec<ChatMessage>,
        context: Option<&serde_json::Value>,
    ) -> Result<ToolCallingResult> {
        let mut guard = CallGuard::new(self.config.max_iterations, self.config.max_duplicate_calls);
        let mut tools_used = OrderedNameSet::new();
        let mut usage = Usage::default();
        let mut request = CompletionRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system_prompt: self.config.system_prompt.clone(),
            tools,
            messages,
        };

        info!(
            model = %request.model,
            tools = request.tools.len(),
            messages = request.messages.len(),
            "Starting tool-calling loop"
        );

        loop {
            let completion = self.complete(&request).await?;
            usage.accumulate(&completion.usage);

            if !completion.stop_reason.is_tool_use() || completion.tool_uses().next().is_none() {
                let response = completion.text();
                info!(
                    iterations = guard.iterations(),
                    tokens = usage.total(),
                    "Tool-calling loop finished"
                );
                return Ok(ToolCallingResult {
                    response,
                    tool_iterations: guard.iterations(),
                    tools_used: tools_used.into_vec(),
                    exceeded_limits: false,
                    usage,
                });
            }

            match guard.begin_iteration() {
                IterationCheck::Exceeded => {
                    warn!(
                        iterations = guard.iterations(),
                        max = self.config.max_iterations,
                        "Tool iteration limit exceeded"
                    );
                    self.publish(DomainEvent::IterationLimitExceeded {
                        iterations: guard.iterations(),
                        timestamp: Utc::now(),
                    });
                    return Ok(ToolCallingResult {
                        response: ITERATION_LIMIT_RESPONSE.to_string(),
                        tool_iterations: guard.iterations(),
                        tools_used: tools_used.into_vec(),
                        exceeded_limits: true,
                        usage,
                    });
                }
                IterationCheck::Warn => warn!(
                    iterations = guard.iterations(),
                    max = self.config.max_iterations,
                    "Approaching tool iteration limit"
                ),
                IterationCheck::Continue => {}
            }

            let mut results = Vec::new();
            for (id, name, input) in completion.tool_uses() {
                tools_used.insert(name);
                let outcome = self.handle_call(&mut guard, name, input, context).await;
                results.push(ContentBlock::tool_result(
                    id,
                    outcome.to_wire(),
                    !outcome.is_success(),
                ));
            }

            request
                .messages
                .push(ChatMessage::blocks(Role::Assistant, completion.content));
            request.messages.push(ChatMessage::blocks(Role::User, results));
        }
    }

    /// Permission gate → duplicate guard → executor for one tool call.
    async fn handle_call(
        &self,
        guard: &mut CallGuard,
        name: &str,
        input: &serde_json::Value,
        context: Option<&serde_json::Value>,
    ) -> ToolOutcome {
        if let Some(blocked) = self.check_permission(name, input).await {
            info!(tool = name, reason = %blocked, "Tool call blocked");
            self.publish(DomainEvent::ToolBlocked {
                tool_name: name.to_string(),
                reason: blocked.clone(),
                timestamp: Utc::now(),
            });
            return ToolOutcome::failure(blocked);
        }

        if let CallCheck::LoopDetected { count } = guard.record_call(name, input) {
            warn!(tool = name, count, "Duplicate tool call suppressed");
            self.publish(DomainEvent::LoopDetected {
                tool_name: name.to_string(),
                count,
                timestamp: Utc::now(),
            });
            return ToolOutcome::failure(loop_detected_message(name, count));
        }

        let (outcome, duration_ms) =
            execute_tool(self.executor.as_ref(), name, input.clone(), context).await;
        self.publish(DomainEvent::ToolExecuted {
            tool_name: name.to_string(),
            success: outcome.is_success(),
            duration_ms,
            timestamp: Utc::now(),
        });
        outcome
    }

    /// `None` when the call may run, otherwise the message for the model.
    async fn check_permission(&self, name: &str, input: &serde_json::Value) -> Option<String> {
        let permission = self.permission.as_ref()?;
        let invocation = ToolInvocation {
            name: name.to_string(),
            input: input.clone(),
        };

        let decision = match permission
            .engine
            .evaluate_tool_call(&invocation, &permission.context, permission.agent_id.as_deref())
            .await
        {
            Ok(decision) => decision,
            Err(e) => return Some(format!("PERMISSION ERROR: {e}")),
        };

        match decision {
            PermissionDecision::Allow => None,
            PermissionDecision::Deny => Some(format!("PERMISSION DENIED: Tool {name} is not allowed.")),
            PermissionDecision::Ask { policy: None } => {
                Some(format!("PERMISSION ERROR: Approval policy missing for {name}."))
            }
            PermissionDecision::Ask {
                policy: Some(policy),
            } => {
                debug!(tool = name, policy = %policy.id, "Requesting approval");
                let request = ApprovalRequest {
                    tool: invocation,
                    policy,
                    context: permission.context.clone(),
                    agent_id: permission.agent_id.clone(),
                };
                match permission.engine.request_approval(request).await {
                    Ok(outcome) if outcome.status == ApprovalStatus::Approved => None,
                    Ok(outcome) => Some(format!(
                        "PERMISSION {}: User did not approve tool {name}.",
                        outcome.status.as_str().to_uppercase()
                    )),
                    Err(e) => Some(format!("PERMISSION ERROR: {e}")),
                }
            }
        }
    }

    /// One model request, retried once against the fallback model on a
    /// retryable error.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let completion = match self.client.create_completion(request.clone()).await {
            Ok(completion) => completion,
            Err(e) => match &self.config.fallback_model {
                Some(fallback) if e.is_retryable() && *fallback != request.model => {
                    warn!(
                        model = %request.model,
                        fallback = %fallback,
                        error = %e,
                        "Completion failed, retrying with fallback model"
                    );
                    let mut retry = request.clone();
                    retry.model = fallback.clone();
                    self.client.create_completion(retry).await?
                }
                _ => return Err(e.into()),
            },
        };

        debug!(
            model = %completion.model,
            stop_reason = ?completion.stop_reason,
            blocks = completion.content.len(),
            "Completion received"
        );
        self.publish(DomainEvent::CompletionReceived {
            model: completion.model.clone(),
            stop_reason: format!("{:?}", completion.stop_reason),
            tokens_used: completion.usage.total(),
            timestamp: Utc::now(),
        });
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use concierge_core::{ApprovalPolicy, Error, MessageContent, ProviderError};
    use serde_json::json;

    fn tool_loop(client: Arc<ScriptedModelClient>, executor: Arc<RecordingExecutor>) -> ToolCallingLoop {
        ToolCallingLoop::new(client, executor)
    }

    fn policy() -> ApprovalPolicy {
        ApprovalPolicy {
            id: "ask:gmail_send".into(),
            pattern: Some("gmail_send".into()),
            timeout_secs: None,
        }
    }

    fn tool_results(request: &CompletionRequest) -> Vec<(String, bool)> {
        let last = request.messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        match &last.content {
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::ToolResult { content, is_error, .. } => (content.clone(), *is_error),
                    other => panic!("expected tool_result, got {other:?}"),
                })
                .collect(),
            MessageContent::Text(_) => panic!("expected blocks"),
        }
    }

    #[tokio::test]
    async fn plain_answer_needs_no_tools() {
        let client = Arc::new(ScriptedModelClient::new(vec![text_completion("Hello!")]));
        let executor = Arc::new(RecordingExecutor::new());

        let result = tool_loop(client.clone(), executor.clone())
            .run(vec![], vec![ChatMessage::user("Hi")], None)
            .await
            .unwrap();

        assert_eq!(result.response, "Hello!");
        assert_eq!(result.tool_iterations, 0);
        assert!(result.tools_used.is_empty());
        assert!(!result.exceeded_limits);
        assert_eq!(result.usage.total(), 15);
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test]
    async fn tool_results_are_fed_back_in_order() {
        let client = Arc::new(ScriptedModelClient::new(vec![
            tool_use_completion(vec![
                ("t1", "calendar_list", json!({"day": "today"})),
                ("t2", "jira_search", json!({"q": "bugs"})),
            ]),
            text_completion("You have 2 meetings and 3 bugs."),
        ]));
        let executor = Arc::new(RecordingExecutor::new());
        let config = LoopConfig::default()
            .with_model("claude-test")
            .with_system_prompt("Be brief.")
            .with_max_tokens(512);

        let result = tool_loop(client.clone(), executor.clone())
            .with_config(config)
            .run(vec![], vec![ChatMessage::user("Status?")], None)
            .await
            .unwrap();

        assert_eq!(result.response, "You have 2 meetings and 3 bugs.");
        assert_eq!(result.tool_iterations, 1);
        assert_eq!(result.tools_used, vec!["calendar_list", "jira_search"]);
        let names: Vec<_> = executor.calls().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["calendar_list", "jira_search"]);

        let requests = client.requests();
        assert_eq!(requests[0].model, "claude-test");
        assert_eq!(requests[0].system_prompt, "Be brief.");
        assert_eq!(requests[0].max_tokens, 512);
        assert_eq!(requests[1].messages.len(), 3);
        assert_eq!(requests[1].messages[1].role, Role::Assistant);

        let results = tool_results(&requests[1]);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, is_error)| !is_error));
        let first: serde_json::Value = serde_json::from_str(&results[0].0).unwrap();
        assert_eq!(first["success"], true);
        assert_eq!(first["data"]["tool"], "calendar_list");
    }

    #[tokio::test]
    async fn final_response_joins_text_blocks() {
        let mut completion = text_completion("line one");
        completion.content.push(ContentBlock::text("line two"));
        let client = Arc::new(ScriptedModelClient::new(vec![completion]));

        let result = tool_loop(client, Arc::new(RecordingExecutor::new()))
            .run(vec![], vec![ChatMessage::user("x")], None)
            .await
            .unwrap();
        assert_eq!(result.response, "line one\nline two");
    }

    #[tokio::test]
    async fn tool_use_stop_without_blocks_is_final() {
        let mut completion = text_completion("Nothing to do.");
        completion.stop_reason = concierge_core::StopReason::ToolUse;
        let client = Arc::new(ScriptedModelClient::new(vec![completion]));

        let result = tool_loop(client, Arc::new(RecordingExecutor::new()))
            .run(vec![], vec![ChatMessage::user("x")], None)
            .await
            .unwrap();
        assert_eq!(result.response, "Nothing to do.");
        assert_eq!(result.tool_iterations, 0);
    }

    #[tokio::test]
    async fn iteration_limit_end_to_end() {
        let client = Arc::new(ScriptedModelClient::new(vec![
            tool_use_completion(vec![("t1", "calendar_list", json!({"page": 1}))]),
            tool_use_completion(vec![("t2", "calendar_list", json!({"page": 2}))]),
            tool_use_completion(vec![("t3", "calendar_list", json!({"page": 3}))]),
        ]));
        let executor = Arc::new(RecordingExecutor::new());
        let events = Arc::new(EventBus::new(64));
        let mut rx = events.subscribe();

        let result = tool_loop(client.clone(), executor.clone())
            .with_config(LoopConfig::default().with_max_iterations(2))
            .with_events(events)
            .run(vec![], vec![ChatMessage::user("Page through")], None)
            .await
            .unwrap();

        assert!(result.exceeded_limits);
        assert_eq!(result.tool_iterations, 3);
        assert_eq!(result.response, ITERATION_LIMIT_RESPONSE);
        assert_eq!(executor.call_count(), 2);
        assert_eq!(client.call_count(), 3);

        let mut saw_limit = false;
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::IterationLimitExceeded { iterations, .. } = event.as_ref() {
                assert_eq!(*iterations, 3);
                saw_limit = true;
            }
        }
        assert!(saw_limit);
    }

    #[tokio::test]
    async fn loop_terminates_within_limit_plus_one_calls() {
        for max in [0u32, 1, 5, 15] {
            let call = tool_use_completion(vec![("t", "poll", json!({"n": 1}))]);
            let client = Arc::new(ScriptedModelClient::repeating(call, max as usize + 1));
            let executor = Arc::new(RecordingExecutor::new());

            let result = tool_loop(client.clone(), executor)
                .with_config(LoopConfig::default().with_max_iterations(max).with_max_duplicate_calls(100))
                .run(vec![], vec![ChatMessage::user("x")], None)
                .await
                .unwrap();

            assert!(result.exceeded_limits);
            assert_eq!(client.call_count(), max as usize + 1);
        }
    }

    #[tokio::test]
    async fn duplicate_calls_are_not_executed() {
        let same = || tool_use_completion(vec![("t", "calendar_list", json!({"day": "today"}))]);
        let client = Arc::new(ScriptedModelClient::new(vec![
            same(),
            same(),
            same(),
            same(),
            same(),
            text_completion("Done"),
        ]));
        let executor = Arc::new(RecordingExecutor::new());

        let result = tool_loop(client.clone(), executor.clone())
            .run(vec![], vec![ChatMessage::user("x")], None)
            .await
            .unwrap();

        assert_eq!(result.response, "Done");
        assert_eq!(executor.call_count(), 3);

        let requests = client.requests();
        let fourth = tool_results(&requests[4]);
        assert!(fourth[0].1);
        assert!(fourth[0].0.contains("LOOP DETECTED"));
        assert!(fourth[0].0.contains("4 times"));
        let fifth = tool_results(&requests[5]);
        assert!(fifth[0].0.contains("5 times"));
    }

    #[tokio::test]
    async fn duplicates_within_one_completion_are_counted() {
        let client = Arc::new(ScriptedModelClient::new(vec![
            tool_use_completion(vec![
                ("a", "x", json!({"k": 1})),
                ("b", "x", json!({"k": 1})),
            ]),
            text_completion("ok"),
        ]));
        let executor = Arc::new(RecordingExecutor::new());

        tool_loop(client.clone(), executor.clone())
            .with_config(LoopConfig::default().with_max_duplicate_calls(1))
            .run(vec![], vec![ChatMessage::user("x")], None)
            .await
            .unwrap();

        assert_eq!(executor.call_count(), 1);
        let results = tool_results(&client.requests()[1]);
        assert!(!results[0].1);
        assert!(results[1].1);
    }

    #[tokio::test]
    async fn denied_tool_is_never_executed() {
        let client = Arc::new(ScriptedModelClient::new(vec![
            tool_use_completion(vec![("t1", "gmail_delete", json!({"id": "m1"}))]),
            text_completion("I can't delete mail."),
        ]));
        let executor = Arc::new(RecordingExecutor::new());
        let engine = Arc::new(
            ScriptedPermissionEngine::new(ApprovalStatus::Approved)
                .decide("gmail_delete", PermissionDecision::Deny),
        );

        let result = tool_loop(client.clone(), executor.clone())
            .with_permission(PermissionConfig::new(engine, PermissionContext::default()))
            .run(vec![], vec![ChatMessage::user("delete it")], None)
            .await
            .unwrap();

        assert_eq!(executor.call_count(), 0);
        assert_eq!(result.tools_used, vec!["gmail_delete"]);
        let results = tool_results(&client.requests()[1]);
        let wire: serde_json::Value = serde_json::from_str(&results[0].0).unwrap();
        assert_eq!(wire["success"], false);
        assert_eq!(wire["error"], "PERMISSION DENIED: Tool gmail_delete is not allowed.");
        assert!(results[0].1);
    }

    #[tokio::test]
    async fn only_approved_calls_execute() {
        for (status, executed) in [
            (ApprovalStatus::Approved, 1),
            (ApprovalStatus::Denied, 0),
            (ApprovalStatus::Pending, 0),
            (ApprovalStatus::Expired, 0),
        ] {
            let client = Arc::new(ScriptedModelClient::new(vec![
                tool_use_completion(vec![("t1", "gmail_send", json!({"to": "a@b.c"}))]),
                text_completion("done"),
            ]));
            let executor = Arc::new(RecordingExecutor::new());
            let engine = Arc::new(
                ScriptedPermissionEngine::new(status)
                    .decide("gmail_send", PermissionDecision::Ask { policy: Some(policy()) }),
            );
            let permission = PermissionConfig::new(
                engine.clone(),
                PermissionContext {
                    platform: Some("slack".into()),
                    ..Default::default()
                },
            )
            .with_agent("pm-assistant");

            tool_loop(client.clone(), executor.clone())
                .with_permission(permission)
                .run(vec![], vec![ChatMessage::user("send")], None)
                .await
                .unwrap();

            assert_eq!(executor.call_count(), executed, "status {status}");
            let requests = engine.approval_requests();
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0].policy.id, "ask:gmail_send");
            assert_eq!(requests[0].agent_id.as_deref(), Some("pm-assistant"));
            assert_eq!(requests[0].context.platform.as_deref(), Some("slack"));

            if status != ApprovalStatus::Approved {
                let results = tool_results(&client.requests()[1]);
                let expected = format!(
                    "PERMISSION {}: User did not approve tool gmail_send.",
                    status.as_str().to_uppercase()
                );
                assert!(results[0].0.contains(&expected), "{}", results[0].0);
            }
        }
    }

    #[tokio::test]
    async fn ask_without_policy_is_an_error_result() {
        let client = Arc::new(ScriptedModelClient::new(vec![
            tool_use_completion(vec![("t1", "gmail_send", json!({}))]),
            text_completion("ok"),
        ]));
        let executor = Arc::new(RecordingExecutor::new());
        let engine = Arc::new(
            ScriptedPermissionEngine::new(ApprovalStatus::Approved)
                .decide("gmail_send", PermissionDecision::Ask { policy: None }),
        );

        tool_loop(client.clone(), executor.clone())
            .with_permission(PermissionConfig::new(engine.clone(), PermissionContext::default()))
            .run(vec![], vec![ChatMessage::user("x")], None)
            .await
            .unwrap();

        assert_eq!(executor.call_count(), 0);
        assert!(engine.approval_requests().is_empty());
        let results = tool_results(&client.requests()[1]);
        assert!(results[0].0.contains("PERMISSION ERROR: Approval policy missing for gmail_send."));
    }

    #[tokio::test]
    async fn engine_failures_become_results() {
        let client = Arc::new(ScriptedModelClient::new(vec![
            tool_use_completion(vec![
                ("t1", "jira_search", json!({})),
                ("t2", "gmail_send", json!({})),
            ]),
            text_completion("ok"),
        ]));
        let executor = Arc::new(RecordingExecutor::new());
        let engine = Arc::new(
            ScriptedPermissionEngine::new(ApprovalStatus::Approved)
                .fail_evaluation("jira_search", "policy table unavailable")
                .decide("gmail_send", PermissionDecision::Ask { policy: Some(policy()) })
                .fail_approval("approval service down"),
        );

        let result = tool_loop(client.clone(), executor.clone())
            .with_permission(PermissionConfig::new(engine, PermissionContext::default()))
            .run(vec![], vec![ChatMessage::user("x")], None)
            .await
            .unwrap();

        assert_eq!(result.response, "ok");
        assert_eq!(executor.call_count(), 0);
        let results = tool_results(&client.requests()[1]);
        assert!(results[0].0.contains("PERMISSION ERROR:"));
        assert!(results[0].0.contains("policy table unavailable"));
        assert!(results[1].0.contains("approval service down"));
    }

    #[tokio::test]
    async fn denied_calls_do_not_count_as_duplicates() {
        let call = || tool_use_completion(vec![("t", "gmail_delete", json!({}))]);
        let client = Arc::new(ScriptedModelClient::new(vec![
            call(),
            call(),
            text_completion("ok"),
        ]));
        let engine = Arc::new(
            ScriptedPermissionEngine::new(ApprovalStatus::Approved)
                .decide("gmail_delete", PermissionDecision::Deny),
        );

        tool_loop(client.clone(), Arc::new(RecordingExecutor::new()))
            .with_config(LoopConfig::default().with_max_duplicate_calls(1))
            .with_permission(PermissionConfig::new(engine, PermissionContext::default()))
            .run(vec![], vec![ChatMessage::user("x")], None)
            .await
            .unwrap();

        let results = tool_results(&client.requests()[2]);
        assert!(results[0].0.contains("PERMISSION DENIED"));
    }

    #[tokio::test]
    async fn retryable_error_uses_fallback_model() {
        let client = Arc::new(ScriptedModelClient::with_results(vec![
            Err(ProviderError::ApiError {
                status_code: 529,
                message: "overloaded".into(),
            }),
            Ok(text_completion("from fallback")),
        ]));

        let result = tool_loop(client.clone(), Arc::new(RecordingExecutor::new()))
            .with_config(LoopConfig::default().with_fallback_model("claude-haiku"))
            .run(vec![], vec![ChatMessage::user("x")], None)
            .await
            .unwrap();

        assert_eq!(result.response, "from fallback");
        let requests = client.requests();
        assert_eq!(requests[0].model, DEFAULT_MODEL);
        assert_eq!(requests[1].model, "claude-haiku");
    }

    #[tokio::test]
    async fn non_retryable_error_propagates() {
        let client = Arc::new(ScriptedModelClient::with_results(vec![Err(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]));

        let err = tool_loop(client.clone(), Arc::new(RecordingExecutor::new()))
            .with_config(LoopConfig::default().with_fallback_model("claude-haiku"))
            .run(vec![], vec![ChatMessage::user("x")], None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Provider(ProviderError::AuthenticationFailed(_))));
        assert_eq!(client.call_count(), 1);
    }

    #[test]
    fn loop_config_for_agent() {
        let limits = ToolLoopConfig {
            max_iterations: 7,
            max_duplicate_calls: 2,
            max_tokens: 1024,
            fallback_model: Some("global-fallback".into()),
        };
        let agent = concierge_core::NewAgent::new("a", "A").into_agent(Utc::now());
        let context = AgentContext {
            agent,
            skills: vec![],
            allowed_tools: vec![],
            denied_tools: vec![],
            ask_tools: vec![],
            system_prompt: "prompt".into(),
            model: "claude-x".into(),
            fallback_model: None,
        };

        let config = LoopConfig::for_agent(&limits, &context);
        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.max_duplicate_calls, 2);
        assert_eq!(config.model, "claude-x");
        assert_eq!(config.fallback_model.as_deref(), Some("global-fallback"));
        assert_eq!(config.system_prompt, "prompt");
    }
}
