//! Vehicle Combat Server - Authoritative multiplayer simulation server
//!
//! This is the main entry point for the game server. It runs:
//! - the TCP game listener (length-prefixed JSON frames)
//! - the fixed-rate simulation task
//! - HTTP endpoints for health and status

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::info;

use vehicle_combat::app::AppState;
use vehicle_combat::config::Config;
use vehicle_combat::game::world::{SimSettings, World};
use vehicle_combat::http::build_router;
use vehicle_combat::net::listener;
use vehicle_combat::sim::{ServerSim, INBOX_CAPACITY};
use vehicle_combat::util::logging::init_tracing;
use vehicle_combat::util::shutdown::shutdown_signal;
use vehicle_combat::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Vehicle Combat Server");

    let state = AppState::new(config.clone());

    // One signal fans out to every task
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stopped = |mut rx: watch::Receiver<bool>| async move {
        let _ = rx.wait_for(|stop| *stop).await;
    };

    // Simulation
    let (sim_tx, sim_rx) = mpsc::channel(INBOX_CAPACITY);
    let world = World::arena(
        SimSettings::new(config.tick_rate, config.substeps),
        config.world_seed,
    );
    let sim = ServerSim::new(world, sim_rx, state.registry.clone(), state.stats.clone());
    let sim_task = tokio::spawn(sim.run(stopped(shutdown_rx.clone())));

    // Game listener
    let game_listener = TcpListener::bind(config.game_addr).await?;
    info!("Game listener on {}", config.game_addr);
    let game_task = tokio::spawn(listener::serve(
        game_listener,
        state.registry.clone(),
        sim_tx,
        stopped(shutdown_rx.clone()),
    ));

    // Status endpoint
    let router = build_router(state);
    let status_listener = TcpListener::bind(config.status_addr).await?;
    info!("Health check: http://{}/health", config.status_addr);
    info!("Status: http://{}/status", config.status_addr);

    axum::serve(status_listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    game_task.await?;
    sim_task.await?;

    info!("Server shutdown complete");
    Ok(())
}
