use std::env;

use heoscontrol::{Registry, VolumeControl};
use tracing_subscriber::EnvFilter;

// Reads or sets the volume of one player.
//
//   cargo run --example volume -- Kitchen
//   cargo run --example volume -- Kitchen 30
fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = env::args().skip(1);
    let Some(name) = args.next() else {
        eprintln!("usage: volume <player> [level]");
        std::process::exit(2);
    };

    let registry = Registry::from_config(&heosconfig::get_config())?;
    let mut player = registry.player(&name)?;

    match args.next() {
        Some(level) => {
            player.set_volume(level.parse()?)?;
            let volume = player.volume()?;
            println!("{} volume set to {}", player.name(), volume);
        }
        None => {
            let muted = if player.is_muted()? { " (muted)" } else { "" };
            let volume = player.volume()?;
            println!("{} volume is {}{}", player.name(), volume, muted);
        }
    }

    Ok(())
}
