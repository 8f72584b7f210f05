//! Shared test doubles for the loop and resolver tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use concierge_core::{
    ApprovalOutcome, ApprovalRequest, ApprovalStatus, Completion, CompletionRequest, ContentBlock,
    ModelClient, PermissionContext, PermissionDecision, PermissionError, ProviderError,
    StopReason, ToolError, ToolExecutor, ToolInvocation, ToolOutcome, ToolPermissionEngine, Usage,
};

/// A model client that returns a sequence of scripted responses.
///
/// Panics if more calls are made than responses provided.
pub struct ScriptedModelClient {
    responses: Mutex<Vec<Result<Completion, ProviderError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModelClient {
    pub fn new(responses: Vec<Completion>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    pub fn with_results(responses: Vec<Result<Completion, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A client that asks for the same tool call forever.
    pub fn repeating(completion: Completion, times: usize) -> Self {
        Self::new(vec![completion; times])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn create_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let responses = self.responses.lock().unwrap();
        let index = requests.len();
        if index >= responses.len() {
            panic!(
                "ScriptedModelClient: no more responses (call #{}, have {})",
                index,
                responses.len()
            );
        }
        requests.push(request);
        responses[index].clone()
    }
}

pub fn usage() -> Usage {
    Usage {
        input_tokens: 10,
        output_tokens: 5,
    }
}

/// A final text completion.
pub fn text_completion(text: &str) -> Completion {
    Completion {
        stop_reason: StopReason::EndTurn,
        content: vec![ContentBlock::text(text)],
        model: "mock-model".into(),
        usage: usage(),
    }
}

/// A completion asking for the given `(id, name, input)` tool calls.
pub fn tool_use_completion(calls: Vec<(&str, &str, serde_json::Value)>) -> Completion {
    Completion {
        stop_reason: StopReason::ToolUse,
        content: calls
            .into_iter()
            .map(|(id, name, input)| ContentBlock::tool_use(id, name, input))
            .collect(),
        model: "mock-model".into(),
        usage: usage(),
    }
}

/// An executor that records every call and echoes the input back.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ToolExecutor for RecordingExecutor {
    async fn execute(
        &self,
        tool_name: &str,
        input: serde_json::Value,
        _context: Option<&serde_json::Value>,
    ) -> Result<ToolOutcome, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((tool_name.to_string(), input.clone()));
        Ok(ToolOutcome::success(serde_json::json!({ "tool": tool_name, "input": input })))
    }
}

/// A permission engine with per-tool decisions and a fixed approval status.
pub struct ScriptedPermissionEngine {
    decisions: HashMap<String, Result<PermissionDecision, String>>,
    approval: Result<ApprovalStatus, String>,
    approvals: Mutex<Vec<ApprovalRequest>>,
}

impl ScriptedPermissionEngine {
    /// Tools without a scripted decision are allowed.
    pub fn new(approval: ApprovalStatus) -> Self {
        Self {
            decisions: HashMap::new(),
            approval: Ok(approval),
            approvals: Mutex::new(Vec::new()),
        }
    }

    pub fn decide(mut self, tool: &str, decision: PermissionDecision) -> Self {
        self.decisions.insert(tool.to_string(), Ok(decision));
        self
    }

    pub fn fail_evaluation(mut self, tool: &str, reason: &str) -> Self {
        self.decisions.insert(tool.to_string(), Err(reason.to_string()));
        self
    }

    pub fn fail_approval(mut self, reason: &str) -> Self {
        self.approval = Err(reason.to_string());
        self
    }

    pub fn approval_requests(&self) -> Vec<ApprovalRequest> {
        self.approvals.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolPermissionEngine for ScriptedPermissionEngine {
    async fn evaluate_tool_call(
        &self,
        tool: &ToolInvocation,
        _context: &PermissionContext,
        _agent_id: Option<&str>,
    ) -> Result<PermissionDecision, PermissionError> {
        match self.decisions.get(&tool.name) {
            None => Ok(PermissionDecision::Allow),
            Some(Ok(decision)) => Ok(decision.clone()),
            Some(Err(reason)) => Err(PermissionError::EvaluationFailed {
                tool_name: tool.name.clone(),
                reason: reason.clone(),
            }),
        }
    }

    async fn request_approval(
        &self,
        request: ApprovalRequest,
    ) -> Result<ApprovalOutcome, PermissionError> {
        self.approvals.lock().unwrap().push(request);
        match &self.approval {
            Ok(status) => Ok(ApprovalOutcome {
                status: *status,
                approval_id: Some("apr_1".into()),
            }),
            Err(reason) => Err(PermissionError::ApprovalFailed(reason.clone())),
        }
    }
}
