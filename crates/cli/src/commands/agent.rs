//! `concierge agent` — Manage agents, their skills and tool patterns.

use clap::Subcommand;

use concierge_core::{AgentMode, AgentTool, NewAgent, ToolPatternType};

use super::{load_config, open_store};

#[derive(Subcommand)]
pub enum AgentCommand {
    /// List all agents
    List,

    /// Show one agent with its skills and tool patterns
    Show { id: String },

    /// Create an agent, or update it if the id exists
    Create {
        id: String,

        /// Display name (defaults to the id)
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// primary, subagent or all
        #[arg(long, default_value = "primary")]
        mode: String,

        /// Model the agent runs on
        #[arg(long)]
        model: Option<String>,

        /// Model to retry with when the primary fails
        #[arg(long)]
        fallback_model: Option<String>,

        /// Base system prompt
        #[arg(long)]
        prompt: Option<String>,

        /// Create the agent disabled
        #[arg(long)]
        disabled: bool,
    },

    /// Delete an agent with its skills and tool patterns
    Delete { id: String },

    /// Replace the skill list of an agent
    Skills {
        id: String,

        /// Enabled skill (repeatable)
        #[arg(long = "enable")]
        enable: Vec<String>,

        /// Disabled skill (repeatable)
        #[arg(long = "disable")]
        disable: Vec<String>,
    },

    /// Replace the tool patterns of an agent
    Tools {
        id: String,

        /// Allowed tool pattern, e.g. `gmail_*` (repeatable)
        #[arg(long)]
        allow: Vec<String>,

        /// Denied tool pattern (repeatable)
        #[arg(long)]
        deny: Vec<String>,

        /// Tool pattern that needs approval (repeatable)
        #[arg(long)]
        ask: Vec<String>,
    },
}

pub async fn run(command: AgentCommand) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let store = open_store(&config).await?;

    match command {
        AgentCommand::List => {
            let agents = store.list_agents().await?;
            if agents.is_empty() {
                println!("No agents. Run `concierge init` to create the default one.");
                return Ok(());
            }
            println!("🤖 Agents ({})", agents.len());
            for agent in agents {
                println!(
                    "  {} {:<20} {:<28} {}",
                    if agent.enabled { "●" } else { "○" },
                    agent.id,
                    agent.default_model.as_deref().unwrap_or("(default model)"),
                    agent.name
                );
            }
        }

        AgentCommand::Show { id } => {
            let agent = store
                .get_agent(&id)
                .await?
                .ok_or_else(|| format!("Agent not found: {id}"))?;
            let skills = store.get_agent_skills(&id).await?;
            let tools = store.get_agent_tools(&id).await?;

            println!("🤖 {} ({})", agent.name, agent.id);
            println!("  Enabled:   {}", agent.enabled);
            println!("  Mode:      {}", agent.mode.as_str());
            if !agent.description.is_empty() {
                println!("  About:     {}", agent.description);
            }
            println!(
                "  Model:     {}",
                agent.default_model.as_deref().unwrap_or("(default)")
            );
            if let Some(fallback) = &agent.fallback_model {
                println!("  Fallback:  {fallback}");
            }
            println!("  Skills:");
            for skill in &skills {
                println!(
                    "    {} {}",
                    if skill.enabled { "+" } else { "-" },
                    skill.skill_name
                );
            }
            println!("  Tools:");
            for tool in &tools {
                println!("    {:<6} {}", tool.pattern_type.as_str(), tool.pattern);
            }
            if !agent.base_prompt.is_empty() {
                println!("\n--- base prompt ---\n{}", agent.base_prompt);
            }
        }

        AgentCommand::Create {
            id,
            name,
            description,
            mode,
            model,
            fallback_model,
            prompt,
            disabled,
        } => {
            let mut agent = NewAgent::new(id.clone(), name.unwrap_or_else(|| id.clone()));
            agent.mode = mode.parse::<AgentMode>()?;
            agent.description = description.unwrap_or_default();
            agent.default_model = model;
            agent.fallback_model = fallback_model;
            agent.base_prompt = prompt.unwrap_or_default();
            agent.enabled = !disabled;

            if store.get_agent(&id).await?.is_some() {
                store.update_agent(agent).await?;
                println!("✅ Updated agent '{id}'");
            } else {
                store.create_agent(agent).await?;
                println!("✅ Created agent '{id}'");
            }
        }

        AgentCommand::Delete { id } => {
            if store.delete_agent(&id).await? {
                println!("🗑️  Deleted agent '{id}'");
            } else {
                println!("Agent not found: {id}");
            }
        }

        AgentCommand::Skills {
            id,
            enable,
            disable,
        } => {
            let rows: Vec<(String, bool)> = enable
                .into_iter()
                .map(|s| (s, true))
                .chain(disable.into_iter().map(|s| (s, false)))
                .collect();
            let count = rows.len();
            store.set_agent_skills(&id, rows).await?;
            println!("✅ Set {count} skill(s) on '{id}'");
        }

        AgentCommand::Tools {
            id,
            allow,
            deny,
            ask,
        } => {
            let tools: Vec<AgentTool> = [
                (ToolPatternType::Allow, allow),
                (ToolPatternType::Deny, deny),
                (ToolPatternType::Ask, ask),
            ]
            .into_iter()
            .flat_map(|(pattern_type, patterns)| {
                let agent_id = id.clone();
                patterns.into_iter().map(move |pattern| AgentTool {
                    agent_id: agent_id.clone(),
                    pattern,
                    pattern_type,
                })
            })
            .collect();
            let count = tools.len();
            store.set_agent_tools(&id, tools).await?;
            println!("✅ Set {count} tool pattern(s) on '{id}'");
        }
    }

    Ok(())
}
