//! Concierge CLI — the main entry point.
//!
//! Commands:
//! - `init`     — Create config, migrate the store, seed the default agent
//! - `chat`     — Talk to the agent resolved for a context
//! - `resolve`  — Show which agent, skills and tool patterns a context gets
//! - `agent`    — Manage agents, their skills and tool patterns
//! - `rule`     — Manage context rules
//! - `status`   — Show configuration and store status

use clap::{Parser, Subcommand};

mod commands;

use commands::QueryArgs;

#[derive(Parser)]
#[command(
    name = "concierge",
    about = "Concierge — context-routed assistant agents with gated tool use",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create configuration, migrate the store and seed defaults
    Init,

    /// Chat with the agent resolved for a context
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        #[command(flatten)]
        query: QueryArgs,

        /// End user the agent acts for
        #[arg(long)]
        user: Option<String>,

        /// Approve every `ask` tool without prompting
        #[arg(long)]
        auto_approve: bool,
    },

    /// Show the resolved agent context
    Resolve {
        #[command(flatten)]
        query: QueryArgs,

        /// Also print the assembled system prompt
        #[arg(long)]
        prompt: bool,
    },

    /// Manage agents
    Agent {
        #[command(subcommand)]
        command: commands::agent::AgentCommand,
    },

    /// Manage context rules
    Rule {
        #[command(subcommand)]
        command: commands::rule::RuleCommand,
    },

    /// Show system status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Init => commands::init::run().await?,
        Commands::Chat {
            message,
            query,
            user,
            auto_approve,
        } => commands::chat::run(message, query, user, auto_approve).await?,
        Commands::Resolve { query, prompt } => commands::resolve::run(query, prompt).await?,
        Commands::Agent { command } => commands::agent::run(command).await?,
        Commands::Rule { command } => commands::rule::run(command).await?,
        Commands::Status => commands::status::run().await?,
    }

    Ok(())
}
