//! `blackroad status` — show gateway status.

use blackroad_config::GatewayConfig;
use blackroad_memory::MemoryJournal;
use blackroad_providers::registry;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("🛣️  BlackRoad Status");
    println!("==================");
    println!("  Config dir:   {}", GatewayConfig::config_dir().display());
    println!("  Bind:         {}:{}", config.bind, config.port);
    println!("  Policy:       {}", config.policy_path.display());
    println!("  Prompts:      {}", config.prompt_path.display());
    println!("  Access log:   {}", config.log_path.display());
    println!("  Memory dir:   {}", config.memory_dir.display());
    println!(
        "  Remote:       {}",
        if config.allow_remote { "allowed" } else { "loopback only" }
    );

    let providers = registry::build_from_config(&config);
    println!("  Providers:    {}", providers.list().join(", "));

    let journal = MemoryJournal::open(config.journal_path())?;
    let stats = journal.stats();
    println!("  Journal:      {} entries, tail {}", stats.entries, stats.last_hash);

    // Check policy file existence
    if config.policy_path.exists() {
        println!("\n  ✅ Policy file found");
    } else {
        println!("\n  ⚠️  No policy file — the gateway will refuse every agent call");
    }

    Ok(())
}
