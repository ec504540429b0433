//! Simulation region: the fixed-rate loops that own a [`World`]
//!
//! Network tasks talk to a simulation only through its inbox. The loop drains
//! the inbox without waiting at the start of every tick and keeps just the
//! newest message per sender.
//!
//! [`World`]: crate::game::world::World

pub mod client;
pub mod server;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::net::connection::Envelope;
use crate::net::protocol::{CarState, ClientMessage, SessionId};

pub use client::ClientSim;
pub use server::ServerSim;

/// Inbox capacity of the server simulation
pub const INBOX_CAPACITY: usize = 1024;

/// Everything the server simulation can be told
#[derive(Debug)]
pub enum SimEvent {
    /// A session was registered and needs a car
    Join {
        session: SessionId,
        reply: oneshot::Sender<JoinAck>,
    },
    /// A session's connection is gone
    Leave { session: SessionId },
    /// A decoded message from a session
    Message(Envelope<ClientMessage>),
}

impl From<Envelope<ClientMessage>> for SimEvent {
    fn from(envelope: Envelope<ClientMessage>) -> Self {
        SimEvent::Message(envelope)
    }
}

/// The simulation's answer to a join
#[derive(Debug, Clone, PartialEq)]
pub struct JoinAck {
    pub init_pos: [f32; 2],
    /// The new car as spawned
    pub state: CarState,
    /// Every other car at the moment of joining
    pub existing: BTreeMap<SessionId, CarState>,
}

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("Simulation stopped")]
    SimulationStopped,
}

/// Ask the simulation to spawn a car for `session` and wait for the answer
pub async fn join(sim: &mpsc::Sender<SimEvent>, session: SessionId) -> Result<JoinAck, SimError> {
    let (reply, ack) = oneshot::channel();
    sim.send(SimEvent::Join { session, reply })
        .await
        .map_err(|_| SimError::SimulationStopped)?;
    ack.await.map_err(|_| SimError::SimulationStopped)
}

/// Latest pending message per sender
#[derive(Debug)]
pub struct Coalescer<T> {
    latest: BTreeMap<SessionId, T>,
    superseded: u64,
}

impl<T> Coalescer<T> {
    pub fn new() -> Self {
        Self {
            latest: BTreeMap::new(),
            superseded: 0,
        }
    }

    /// Keep `msg`, discarding any older one from the same sender
    pub fn push(&mut self, session: SessionId, msg: T) {
        if self.latest.insert(session, msg).is_some() {
            self.superseded += 1;
        }
    }

    /// Forget whatever a sender had pending
    pub fn forget(&mut self, session: SessionId) {
        self.latest.remove(&session);
    }

    /// Pending messages in sender order, plus how many were superseded
    pub fn drain(&mut self) -> (BTreeMap<SessionId, T>, u64) {
        let superseded = std::mem::take(&mut self.superseded);
        (std::mem::take(&mut self.latest), superseded)
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

impl<T> Default for Coalescer<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters shared between the simulation and the status endpoint
#[derive(Debug, Default)]
pub struct SimStats {
    tick: AtomicU64,
    cars: AtomicUsize,
    targets: AtomicUsize,
    projectiles: AtomicUsize,
    explosions: AtomicUsize,
    superseded: AtomicU64,
    snapshot_bytes: AtomicU64,
}

/// Point-in-time copy of [`SimStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub tick: u64,
    pub cars: usize,
    pub targets: usize,
    pub projectiles: usize,
    pub explosions: usize,
    /// Inbound messages discarded in favour of a newer one
    pub superseded: u64,
    pub snapshot_bytes: u64,
}

impl SimStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, snapshot: StatsSnapshot) {
        self.tick.store(snapshot.tick, Ordering::Relaxed);
        self.cars.store(snapshot.cars, Ordering::Relaxed);
        self.targets.store(snapshot.targets, Ordering::Relaxed);
        self.projectiles
            .store(snapshot.projectiles, Ordering::Relaxed);
        self.explosions.store(snapshot.explosions, Ordering::Relaxed);
        self.superseded.store(snapshot.superseded, Ordering::Relaxed);
        self.snapshot_bytes
            .store(snapshot.snapshot_bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tick: self.tick.load(Ordering::Relaxed),
            cars: self.cars.load(Ordering::Relaxed),
            targets: self.targets.load(Ordering::Relaxed),
            projectiles: self.projectiles.load(Ordering::Relaxed),
            explosions: self.explosions.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            snapshot_bytes: self.snapshot_bytes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{InputSnapshot, Steer};

    #[test]
    fn coalescer_keeps_newest_per_sender() {
        let mut inbox = Coalescer::new();
        inbox.push(1, "a");
        inbox.push(0, "b");
        inbox.push(1, "c");
        inbox.push(1, "d");

        let (latest, superseded) = inbox.drain();
        assert_eq!(latest.into_iter().collect::<Vec<_>>(), vec![(0, "b"), (1, "d")]);
        assert_eq!(superseded, 2);
        assert!(inbox.is_empty());
        assert_eq!(inbox.drain().1, 0);
    }

    #[test]
    fn forgotten_sender_has_nothing_pending() {
        let mut inbox = Coalescer::new();
        inbox.push(4, 1);
        inbox.forget(4);
        assert!(inbox.is_empty());
    }

    #[test]
    fn envelope_becomes_message_event() {
        let msg = ClientMessage::Input(InputSnapshot {
            steer: Steer::Left,
            ..InputSnapshot::default()
        });
        let event = SimEvent::from(Envelope { session: 2, msg });
        assert!(matches!(event, SimEvent::Message(Envelope { session: 2, .. })));
    }

    #[tokio::test]
    async fn join_fails_when_simulation_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(matches!(join(&tx, 0).await, Err(SimError::SimulationStopped)));
    }

    #[tokio::test]
    async fn join_returns_the_ack() {
        let (tx, mut rx) = mpsc::channel(1);
        let sim = tokio::spawn(async move {
            if let Some(SimEvent::Join { session, reply }) = rx.recv().await {
                let _ = reply.send(JoinAck {
                    init_pos: [session as f32, 0.0],
                    state: CarState::default(),
                    existing: BTreeMap::new(),
                });
            }
        });
        let ack = join(&tx, 5).await.unwrap();
        assert_eq!(ack.init_pos, [5.0, 0.0]);
        sim.await.unwrap();
    }

    #[test]
    fn stats_read_back_what_was_stored() {
        let stats = SimStats::new();
        let snapshot = StatsSnapshot {
            tick: 9,
            cars: 2,
            targets: 3,
            projectiles: 4,
            explosions: 1,
            superseded: 7,
            snapshot_bytes: 512,
        };
        stats.store(snapshot);
        assert_eq!(stats.snapshot(), snapshot);
    }
}
