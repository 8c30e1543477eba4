//! Emberfall Server
//!
//! Hosts one world on a fixed 15 Hz tick and serves it over WebSocket.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use emberfall::{
    game::effects::EffectRegistry,
    network::{GameServer, SimulationSession},
    ServerConfig, World, WorldConfig, PROTOCOL_VERSION, TICK_RATE, VERSION,
};

/// Optional path to a designer effect catalog.
const CATALOG_ENV: &str = "EMBERFALL_EFFECT_CATALOG";

fn load_registry() -> anyhow::Result<EffectRegistry> {
    match std::env::var_os(CATALOG_ENV) {
        Some(path) => {
            let path = PathBuf::from(path);
            EffectRegistry::from_file(&path).with_context(|| format!("loading {}", path.display()))
        }
        None => EffectRegistry::embedded().context("loading embedded effect catalog"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Emberfall Server v{}", VERSION);
    info!("Tick Rate: {} Hz, protocol v{}", TICK_RATE, PROTOCOL_VERSION);

    let world_config = WorldConfig::from_env().context("world configuration")?;
    let server_config = ServerConfig::from_env().context("server configuration")?;
    let registry = Arc::new(load_registry()?);
    info!(effects = registry.len(), catalog_hash = %registry.hash(), "effect catalog loaded");

    let world = World::new(world_config, registry).context("building world")?;
    info!(
        seed = %world.config().seed,
        players = world.players().len(),
        npcs = world.npcs().len(),
        obstacles = world.obstacles().len(),
        "world ready"
    );

    let (session, handle) = SimulationSession::new(world, &server_config);
    let (stop, stopped) = watch::channel(false);
    let simulation = tokio::spawn(session.run(stopped.clone()));

    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, closing the map");
        let _ = stop.send(true);
    });

    let server = GameServer::new(server_config, handle, stopped);
    server.run().await?;

    simulation.await.context("simulation task panicked")??;
    info!("shutdown complete");
    Ok(())
}
