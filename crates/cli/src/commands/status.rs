//! `concierge status` — Show system status.

use concierge_agent::SkillLibrary;
use concierge_config::AppConfig;

use super::{load_config, open_store};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let skills = SkillLibrary::discover(&config.agents.skills_path());

    println!("🛎️  Concierge Status");
    println!("===================");
    println!("  Config dir:     {}", AppConfig::config_dir().display());
    println!("  Model:          {}", config.default_model);
    if let Some(fallback) = &config.tool_loop.fallback_model {
        println!("  Fallback model: {fallback}");
    }
    println!("  Default agent:  {}", config.agents.default_agent_id);
    println!(
        "  Tool loop:      {} iterations, {} identical calls",
        config.tool_loop.max_iterations, config.tool_loop.max_duplicate_calls
    );
    println!("  Skills dir:     {}", config.agents.skills_path().display());
    println!("  Skills:         {}", skills.len());
    println!("  Store:          {}", config.database.backend);
    println!(
        "  API key:        {}",
        if config.has_api_key() { "configured" } else { "missing" }
    );

    match open_store(&config).await {
        Ok(store) => {
            let agents = store.list_agents().await?;
            let rules = store.list_context_rules().await?;
            let enabled = agents.iter().filter(|a| a.enabled).count();
            println!("  Agents:         {} ({} enabled)", agents.len(), enabled);
            println!("  Context rules:  {}", rules.len());
        }
        Err(e) => println!("  Store error:    {e}"),
    }

    // Check config file existence
    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file — run `concierge init` first");
    }

    Ok(())
}
