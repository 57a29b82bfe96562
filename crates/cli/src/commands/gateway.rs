//! `blackroad gateway` — start the HTTP server.

use blackroad_config::GatewayConfig;

pub async fn run(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = GatewayConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port {
        config.port = port;
    }

    println!("🛣️  BlackRoad Gateway");
    println!("   Listening: {}:{}", config.bind, config.port);
    println!("   Policy: {}", config.policy_path.display());
    println!(
        "   Remote access: {}",
        if config.allow_remote { "allowed" } else { "loopback only" }
    );

    blackroad_gateway::start(config).await?;

    Ok(())
}
