//! `concierge rule` — Manage context rules.

use clap::Subcommand;

use concierge_core::{ContextType, NewContextRule, SkillOverride};

use super::{load_config, open_store};

#[derive(Subcommand)]
pub enum RuleCommand {
    /// List rules, highest priority first
    List,

    /// Add a rule
    Add {
        /// default, platform, chat, channel or environment
        context_type: String,

        /// Value the query field must equal (not used by `default`)
        #[arg(long = "id")]
        context_id: Option<String>,

        /// Agent selected when the rule applies
        #[arg(long)]
        agent: Option<String>,

        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i32,

        /// Skill override: `enable:<skill>` or `disable:<skill>` (repeatable)
        #[arg(long = "override")]
        overrides: Vec<String>,
    },

    /// Delete a rule by id
    Delete { id: String },
}

pub async fn run(command: RuleCommand) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let store = open_store(&config).await?;

    match command {
        RuleCommand::List => {
            let rules = store.list_context_rules().await?;
            if rules.is_empty() {
                println!("No context rules.");
                return Ok(());
            }
            println!("📐 Context rules ({})", rules.len());
            for rule in rules {
                let target = match &rule.context_id {
                    Some(id) => format!("{}={id}", rule.context_type),
                    None => rule.context_type.to_string(),
                };
                println!(
                    "  [{:>4}] {:<28} agent={:<16} overrides={}  ({})",
                    rule.priority,
                    target,
                    rule.agent_id.as_deref().unwrap_or("-"),
                    if rule.skill_overrides.is_empty() {
                        "-".to_string()
                    } else {
                        rule.skill_overrides.join(",")
                    },
                    rule.id
                );
            }
        }

        RuleCommand::Add {
            context_type,
            context_id,
            agent,
            priority,
            overrides,
        } => {
            let context_type = ContextType::from(context_type);
            if let ContextType::Other(kind) = &context_type {
                return Err(format!(
                    "Unknown context type '{kind}'. Use default, platform, chat, channel or environment."
                )
                .into());
            }

            if let Some(bad) = overrides.iter().find(|o| SkillOverride::parse(o).is_none()) {
                return Err(format!(
                    "Invalid skill override '{bad}'. Use enable:<skill> or disable:<skill>."
                )
                .into());
            }

            let mut rule = NewContextRule::new(context_type, context_id.as_deref())
                .priority(priority)
                .overrides(overrides);
            if let Some(agent) = agent {
                rule = rule.agent(agent);
            }

            let rule = store.create_context_rule(rule).await?;
            println!("✅ Created rule {}", rule.id);
        }

        RuleCommand::Delete { id } => {
            if store.delete_context_rule(&id).await? {
                println!("🗑️  Deleted rule {id}");
            } else {
                println!("Rule not found: {id}");
            }
        }
    }

    Ok(())
}
