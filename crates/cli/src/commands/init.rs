//! `concierge init` — First-time setup.

use concierge_config::AppConfig;

use super::{load_config, open_store};

const EXAMPLE_SKILL: &str = "---
name: meeting-notes
description: Turn a meeting transcript into decisions and action items
---

# Meeting notes

When the user shares meeting notes or a transcript:

1. List the decisions that were made.
2. List action items as `owner: task (due date)`.
3. Flag open questions nobody owned.
";

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("Concierge — First-Time Setup");
    println!("============================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("  Config already exists at: {}", config_path.display());
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Created config.toml at: {}", config_path.display());
    }

    let config = load_config()?;

    let skills_dir = config.agents.skills_path();
    if !skills_dir.exists() {
        let example = skills_dir.join("meeting-notes");
        std::fs::create_dir_all(&example)?;
        std::fs::write(example.join("SKILL.md"), EXAMPLE_SKILL)?;
        println!("✅ Created skills directory with an example skill: {}", skills_dir.display());
    }

    let store = open_store(&config).await?;
    println!("✅ Context store ready ({})", store.name());

    let report = concierge_store::seed_defaults(store.as_ref()).await?;
    if report.agent_created {
        println!("✅ Created default agent '{}'", concierge_core::DEFAULT_AGENT_ID);
    }
    if report.rule_created {
        println!("✅ Created default context rule");
    }

    if !config.has_api_key() {
        println!("\n📝 Next steps:");
        println!("   1. Set ANTHROPIC_API_KEY or add anthropic.api_key to {}", config_path.display());
        println!("   2. Run: concierge chat");
    }

    println!("\n🎉 Setup complete!\n");
    Ok(())
}
