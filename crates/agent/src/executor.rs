//! Tool execution adapter: runs one approved call through the injected
//! executor and always yields a [`ToolOutcome`].

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, warn};

use concierge_core::{ToolExecutor, ToolOutcome};

/// Execute a tool call, converting executor errors and panics to failures.
pub async fn execute_tool(
    executor: &dyn ToolExecutor,
    tool_name: &str,
    input: serde_json::Value,
    context: Option<&serde_json::Value>,
) -> (ToolOutcome, u64) {
    let started = Instant::now();
    let result = AssertUnwindSafe(executor.execute(tool_name, input, context))
        .catch_unwind()
        .await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let outcome = match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            warn!(tool = tool_name, error = %e, "Tool execution failed");
            ToolOutcome::failure(e.to_string())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(tool = tool_name, panic = %message, "Tool executor panicked");
            ToolOutcome::failure(format!("Tool {tool_name} crashed: {message}"))
        }
    };

    debug!(tool = tool_name, success = outcome.is_success(), duration_ms, "Tool executed");
    (outcome, duration_ms)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
