use std::env;

use heoscontrol::Registry;
use tracing_subscriber::EnvFilter;

// Lists the known players and groups.
//
//   cargo run --example discover [-- --rediscover]
//
// The registry cache location comes from the heosconfig configuration.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = heosconfig::get_config();
    let mut registry = Registry::from_config(&config)?;

    if env::args().any(|arg| arg == "--rediscover") {
        tracing::info!("Forcing a new discovery");
        registry.discover()?;
    }

    println!("Players:");
    for name in registry.player_names() {
        if let Some(entry) = registry.player_entry(name) {
            println!("  {} [{}] {} (pid {})", entry.name, entry.model, entry.host, entry.id);
        }
    }

    println!("Groups:");
    for name in registry.group_names() {
        if let Some(entry) = registry.group_entry(name) {
            println!(
                "  {} (gid {}) leader={} members={}",
                entry.name,
                entry.id,
                entry.leader,
                entry.members.join(", ")
            );
        }
    }

    Ok(())
}
