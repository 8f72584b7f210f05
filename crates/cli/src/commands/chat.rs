//! `concierge chat` — Interactive or single-message chat with the agent
//! resolved for a context.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use concierge_agent::{
    AgentConfigLoader, LoopConfig, PermissionConfig, ToolCallingLoop, ToolCallingResult,
};
use concierge_config::AppConfig;
use concierge_core::{
    ApprovalStatus, ChatMessage, ContextQuery, EventBus, ModelClient, PermissionContext,
};
use concierge_providers::AnthropicClient;
use concierge_security::{
    ApprovalBroker, Approver, AuditLogger, AutoApprover, PatternPermissionEngine, TracingSink,
    filter_tool_definitions,
};
use concierge_tools::default_registry;

use super::{QueryArgs, build_loader, load_config, open_store};

type SharedStdin = Arc<Mutex<Lines<BufReader<Stdin>>>>;

struct Session {
    config: AppConfig,
    loader: AgentConfigLoader,
    client: Arc<dyn ModelClient>,
    approver: Arc<dyn Approver>,
    audit: Arc<AuditLogger>,
    events: Arc<EventBus>,
    query: ContextQuery,
    permission_context: PermissionContext,
}

impl Session {
    /// Resolve the agent, run one user message through the tool loop and
    /// record both sides in `history`.
    async fn turn(
        &self,
        history: &mut Vec<ChatMessage>,
        text: &str,
    ) -> Result<ToolCallingResult, Box<dyn std::error::Error>> {
        let context = self
            .loader
            .load(&self.query)
            .await?
            .ok_or("No agent available for this context. Run `concierge init` first.")?;

        let registry = default_registry(self.loader.skills().clone(), &context.skills);
        let tools = filter_tool_definitions(registry.definitions(), &context);

        let engine = PatternPermissionEngine::from_context(&context)
            .with_approver(self.approver.clone())
            .with_approval_timeout(self.config.approval.timeout_secs)
            .with_audit(self.audit.clone());
        let permission = PermissionConfig::new(Arc::new(engine), self.permission_context.clone())
            .with_agent(context.agent.id.clone());

        let tool_loop = ToolCallingLoop::new(self.client.clone(), Arc::new(registry))
            .with_config(LoopConfig::for_agent(&self.config.tool_loop, &context))
            .with_permission(permission)
            .with_events(self.events.clone());

        let executor_context = serde_json::to_value(&self.permission_context)?;
        history.push(ChatMessage::user(text));
        match tool_loop.run(tools, history.clone(), Some(&executor_context)).await {
            Ok(result) => {
                history.push(ChatMessage::assistant(&result.response));
                Ok(result)
            }
            Err(e) => {
                history.pop();
                Err(e.into())
            }
        }
    }
}

pub async fn run(
    message: Option<String>,
    query: QueryArgs,
    user: Option<String>,
    auto_approve: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;

    // Check for API key early — give a clear error
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set ANTHROPIC_API_KEY (or CONCIERGE_API_KEY), or add it to:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let client: Arc<dyn ModelClient> = Arc::new(AnthropicClient::from_config(&config.anthropic)?);
    let store = open_store(&config).await?;
    let loader = build_loader(&config, store);
    let stdin: SharedStdin = Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()));

    let approver: Arc<dyn Approver> = if auto_approve {
        Arc::new(AutoApprover::approve_all())
    } else {
        let default_timeout = Duration::from_secs(config.approval.timeout_secs);
        let broker = Arc::new(ApprovalBroker::new(default_timeout));
        spawn_approval_prompt(broker.clone(), stdin.clone(), default_timeout);
        broker
    };

    let session = Session {
        query: query.to_query(),
        permission_context: query.to_permission_context(user),
        loader,
        client,
        approver,
        audit: Arc::new(AuditLogger::with_sinks(vec![Box::new(TracingSink)])),
        events: Arc::new(EventBus::default()),
        config,
    };
    let mut history = Vec::new();

    if let Some(msg) = message {
        // Single message mode
        eprint!("  Thinking...");
        let result = session.turn(&mut history, &msg).await;
        eprint!("\r              \r");
        let result = result?;
        println!("{}", result.response);
        print_summary(&result);
        return Ok(());
    }

    // Interactive mode
    let context = session.loader.load(&session.query).await?;
    println!();
    println!("  Concierge — Interactive Mode");
    println!();
    if let Some(context) = &context {
        println!("  Agent:   {} ({})", context.agent.name, context.agent.id);
        println!("  Model:   {}", context.model);
        println!("  Skills:  {}", display_list(&context.skills));
    }
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = stdin.lock().await.next_line().await?;
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        match session.turn(&mut history, line).await {
            Ok(result) => {
                println!();
                for text in result.response.lines() {
                    println!("  Assistant > {text}");
                }
                print_summary(&result);
                println!();
            }
            Err(e) => {
                eprintln!("  [Error] {e}");
                println!();
            }
        }
    }

    println!("  Goodbye!");
    Ok(())
}

/// Prompt on the terminal for every approval the broker announces.
fn spawn_approval_prompt(broker: Arc<ApprovalBroker>, stdin: SharedStdin, default_timeout: Duration) {
    let mut announcements = broker.subscribe();
    tokio::spawn(async move {
        loop {
            let pending = match announcements.recv().await {
                Ok(pending) => pending,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed approval announcements");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let request = &pending.request;
            eprintln!();
            eprintln!(
                "  ⚠️  Approval needed ({}): {} wants to run `{}`",
                request.policy.id,
                request.agent_id.as_deref().unwrap_or("agent"),
                request.tool.name
            );
            eprintln!("      input: {}", request.tool.input);
            eprint!("      Approve? [y/N] > ");

            let timeout = request
                .policy
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default_timeout);
            let answer = {
                let mut lines = stdin.lock().await;
                read_answer(&mut *lines, timeout).await
            };
            let Some(status) = answer else {
                eprintln!();
                eprintln!("      Approval timed out; the tool was not run.");
                continue;
            };

            if let Err(e) = broker.resolve(&pending.id, status).await {
                // Already expired
                warn!(approval_id = %pending.id, error = %e, "Could not resolve approval");
            }
        }
    });
}

/// Wait for a y/N answer. `None` when the timeout elapses first, leaving any
/// later line for the next reader.
async fn read_answer<R>(lines: &mut Lines<R>, timeout: Duration) -> Option<ApprovalStatus>
where
    R: AsyncBufRead + Unpin,
{
    tokio::select! {
        answer = lines.next_line() => Some(match answer {
            Ok(Some(line)) if matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes") => {
                ApprovalStatus::Approved
            }
            _ => ApprovalStatus::Denied,
        }),
        _ = tokio::time::sleep(timeout) => None,
    }
}

fn print_summary(result: &ToolCallingResult) {
    if result.tools_used.is_empty() && !result.exceeded_limits {
        return;
    }
    eprintln!(
        "  (tools: {} · rounds: {} · tokens: {}{})",
        display_list(&result.tools_used),
        result.tool_iterations,
        result.usage.total(),
        if result.exceeded_limits { " · limit reached" } else { "" }
    );
}

fn display_list(items: &[String]) -> String {
    if items.is_empty() {
        "none".into()
    } else {
        items.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn answers_map_to_statuses() {
        let mut lines = BufReader::new(&b" Yes \nnope\n"[..]).lines();
        let timeout = Duration::from_secs(5);
        assert_eq!(read_answer(&mut lines, timeout).await, Some(ApprovalStatus::Approved));
        assert_eq!(read_answer(&mut lines, timeout).await, Some(ApprovalStatus::Denied));
        // End of input denies
        assert_eq!(read_answer(&mut lines, timeout).await, Some(ApprovalStatus::Denied));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_prompt_leaves_next_line_for_chat() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut lines = BufReader::new(reader).lines();

        assert_eq!(read_answer(&mut lines, Duration::from_secs(30)).await, None);

        writer.write_all(b"what is on my calendar?\n").await.unwrap();
        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some("what is on my calendar?")
        );
    }
}
