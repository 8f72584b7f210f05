//! `concierge resolve` — Show what a context resolves to.

use super::{QueryArgs, build_loader, load_config, open_store};

pub async fn run(query: QueryArgs, show_prompt: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let store = open_store(&config).await?;
    let loader = build_loader(&config, store);

    let query = query.to_query();
    let Some(context) = loader.load(&query).await? else {
        println!("⚠️  No agent resolves for this context.");
        println!("   Run `concierge init` to create the default agent.");
        return Ok(());
    };

    println!("🧭 Resolved Context");
    println!("===================");
    println!("  Agent:     {} ({})", context.agent.name, context.agent.id);
    println!("  Mode:      {}", context.agent.mode.as_str());
    println!("  Model:     {}", context.model);
    if let Some(fallback) = &context.fallback_model {
        println!("  Fallback:  {fallback}");
    }
    println!("  Skills:    {}", list(&context.skills));
    println!("  Allow:     {}", list(&context.allowed_tools));
    println!("  Deny:      {}", list(&context.denied_tools));
    println!("  Ask:       {}", list(&context.ask_tools));

    let missing: Vec<String> = context
        .skills
        .iter()
        .filter(|s| loader.skills().get(s).is_none())
        .cloned()
        .collect();
    if !missing.is_empty() {
        println!("\n  ⚠️  Enabled but not found on disk: {}", missing.join(", "));
    }

    if show_prompt {
        println!("\n--- system prompt ---\n{}", context.system_prompt);
    }

    Ok(())
}

fn list(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}
