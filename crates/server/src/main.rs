//! Stake arena server.

use arena::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!("Loaded configuration");
    info!("  Port: {}", config.server.port);
    info!(
        "  World: {} (playable radius {})",
        config.world.size, config.world.playable_radius
    );
    info!(
        "  Tick: {}Hz, broadcast: {}Hz",
        config.simulation.tick_rate_hz, config.simulation.broadcast_rate_hz
    );

    arena::run(config).await?;

    Ok(())
}
