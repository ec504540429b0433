//! Headless vehicle combat client
//!
//! Connects to the server, waits for admission, then drives its car with a
//! scripted input source and pushes the result every tick.

use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, warn};

use vehicle_combat::config::ClientConfig;
use vehicle_combat::game::world::SimSettings;
use vehicle_combat::input::ScriptedInput;
use vehicle_combat::net::connection::{run_connection, Envelope};
use vehicle_combat::net::framing::read_message;
use vehicle_combat::net::protocol::{decode, ServerMessage};
use vehicle_combat::net::session::Session;
use vehicle_combat::sim::ClientSim;
use vehicle_combat::util::logging::init_tracing;
use vehicle_combat::util::shutdown::shutdown_signal;

/// Server messages buffered between the read task and the simulation
const INBOX_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = ClientConfig::from_env()?;
    init_tracing(&config.log_level);

    info!(server = %config.server_addr, script = ?config.script, "Connecting");
    let mut stream = TcpStream::connect(config.server_addr)
        .await
        .with_context(|| format!("connecting to {}", config.server_addr))?;
    stream.set_nodelay(true)?;

    // The first frame is always the admission
    let admission: ServerMessage = decode(&read_message(&mut stream).await?)?;
    let Some(init) = admission.init else {
        bail!("server did not send an admission message");
    };
    let existing = admission.add_cars.unwrap_or_default();
    info!(
        session_id = init.id,
        x = init.init_pos[0],
        y = init.init_pos[1],
        cars = existing.len(),
        "Admitted"
    );

    let sim = ClientSim::new(
        SimSettings::new(config.tick_rate, config.substeps),
        init,
        existing,
        Box::new(ScriptedInput::new(config.script)),
        config.sync,
    );

    let session = Arc::new(Session::new(init.id));
    let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
    let (reader, writer) = stream.into_split();
    let connection = tokio::spawn(run_connection::<_, _, ServerMessage, Envelope<ServerMessage>>(
        reader,
        writer,
        session.clone(),
        inbox_tx,
    ));

    tokio::select! {
        ran = sim.run(session.clone(), inbox_rx, config.ticks) => {
            info!(ticks = ran, "Client finished");
        }
        _ = shutdown_signal() => {}
    }

    session.outbound().close();
    session.cancel_flag().cancel();
    match connection.await? {
        Ok(()) => info!("Disconnected"),
        Err(e) => warn!(error = %e, "Connection closed with error"),
    }
    Ok(())
}
