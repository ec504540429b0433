//! TCP acceptor and session admission

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::sim::{self, SimEvent};

use super::connection::run_connection;
use super::error::NetError;
use super::framing::write_message;
use super::protocol::{encode, ClientMessage, InitInfo, ServerMessage};
use super::session::SessionRegistry;

/// Accept connections until `shutdown` resolves
pub async fn serve<F>(
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    sim: mpsc::Sender<SimEvent>,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let registry = registry.clone();
                    let sim = sim.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer, registry, sim).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept failed");
                }
            },
            _ = &mut shutdown => {
                info!("Game listener stopping");
                break;
            }
        }
    }

    registry.clear();
}

/// Admit one connection, run it to completion, then tear it down
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<SessionRegistry>,
    sim: mpsc::Sender<SimEvent>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }

    let Some(session) = registry.register() else {
        warn!(peer = %peer, "Server full, refusing connection");
        return;
    };
    let id = session.id();

    // The simulation spawns the car, tells every other session about it and
    // answers with the world as it stands.
    let ack = match sim::join(&sim, id).await {
        Ok(ack) => ack,
        Err(e) => {
            warn!(session_id = id, error = %e, "Join failed, refusing connection");
            registry.unregister(&session);
            return;
        }
    };

    let (reader, mut writer) = stream.into_split();

    // Written before the write task starts so nothing can overtake it.
    let admission = ServerMessage::admission(
        InitInfo {
            id,
            init_pos: ack.init_pos,
        },
        ack.existing,
    );
    let admitted = match encode(&admission) {
        Ok(payload) => write_message(&mut writer, &payload).await,
        Err(e) => Err(e),
    };

    let result = match admitted {
        Ok(()) => {
            info!(session_id = id, peer = %peer, "Session admitted");
            run_connection::<_, _, ClientMessage, SimEvent>(
                reader,
                writer,
                session.clone(),
                sim.clone(),
            )
            .await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(()) | Err(NetError::ConnectionClosed) => {
            info!(session_id = id, "Session disconnected");
        }
        Err(e) => {
            warn!(session_id = id, error = %e, "Session closed on error");
        }
    }

    // Leave goes first so the id cannot be handed out again before the
    // simulation has removed the old car. The slot is only ever released
    // here, by the connection that holds it.
    let _ = sim.send(SimEvent::Leave { session: id }).await;
    registry.unregister(&session);
}
