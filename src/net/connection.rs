//! Per-connection read and write tasks
//!
//! Each connection runs one task that reads frames into the simulation inbox
//! and one task that drains the session's mailbox onto the socket. Either
//! task stopping raises the shared [`CancelFlag`], which the other checks at
//! the top of every iteration and while it waits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace, warn};

use super::error::NetError;
use super::framing::{read_message, write_message};
use super::protocol::{decode, SessionId};
use super::session::Session;

/// Cooperative cancellation shared by a connection's tasks
#[derive(Debug, Default)]
pub struct CancelFlag {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// A decoded inbound message tagged with its sender
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    pub session: SessionId,
    pub msg: T,
}

/// Run both I/O tasks for a connection until either stops.
///
/// Inbound payloads are decoded as `T` and forwarded as `E`. Payloads that
/// fail to decode are logged and dropped. Returns the fatal error that ended
/// the connection, if any. The write half is shut down before returning.
pub async fn run_connection<R, W, T, E>(
    reader: R,
    writer: W,
    session: Arc<Session>,
    inbox: mpsc::Sender<E>,
) -> Result<(), NetError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    T: DeserializeOwned + Send + 'static,
    E: From<Envelope<T>> + Send + 'static,
{
    let read_task = tokio::spawn(read_loop::<R, T, E>(reader, session.clone(), inbox));
    let write_task = tokio::spawn(write_loop(writer, session.clone()));

    let (read, write) = tokio::join!(read_task, write_task);
    let read = read.unwrap_or(Err(NetError::ConnectionClosed));
    let write = write.unwrap_or(Err(NetError::ConnectionClosed));

    debug!(
        session_id = session.id(),
        read_ok = read.is_ok(),
        write_ok = write.is_ok(),
        "Connection tasks finished"
    );
    read.and(write)
}

async fn read_loop<R, T, E>(
    mut reader: R,
    session: Arc<Session>,
    inbox: mpsc::Sender<E>,
) -> Result<(), NetError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
    E: From<Envelope<T>>,
{
    let result = read_messages::<R, T, E>(&mut reader, &session, &inbox).await;
    session.cancel_flag().cancel();
    result
}

async fn read_messages<R, T, E>(
    reader: &mut R,
    session: &Session,
    inbox: &mpsc::Sender<E>,
) -> Result<(), NetError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
    E: From<Envelope<T>>,
{
    let cancel = session.cancel_flag();
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let payload = tokio::select! {
            frame = read_message(&mut *reader) => frame?,
            _ = cancel.cancelled() => return Ok(()),
        };
        trace!(session_id = session.id(), bytes = payload.len(), "Frame received");

        let msg = match decode::<T>(&payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(session_id = session.id(), error = %e, "Dropping malformed message");
                continue;
            }
        };

        let envelope = Envelope {
            session: session.id(),
            msg,
        };
        if inbox.send(E::from(envelope)).await.is_err() {
            debug!(session_id = session.id(), "Simulation inbox closed");
            return Ok(());
        }
    }
}

async fn write_loop<W>(mut writer: W, session: Arc<Session>) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let result = write_messages(&mut writer, &session).await;
    session.cancel_flag().cancel();
    if let Err(e) = writer.shutdown().await {
        debug!(session_id = session.id(), error = %e, "Write half shutdown failed");
    }
    result
}

async fn write_messages<W>(writer: &mut W, session: &Session) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let cancel = session.cancel_flag();
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let next = tokio::select! {
            msg = session.outbound().pop() => msg,
            _ = cancel.cancelled() => return Ok(()),
        };
        let Some(msg) = next else {
            return Ok(());
        };

        // a peer that stops reading must not hold teardown up
        tokio::select! {
            written = write_message(&mut *writer, msg.payload()) => written?,
            _ = cancel.cancelled() => return Ok(()),
        }
        trace!(session_id = session.id(), bytes = msg.payload().len(), "Frame sent");
    }
}
