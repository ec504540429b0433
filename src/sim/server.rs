//! Authoritative server tick loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::game::snapshot::SnapshotBuilder;
use crate::game::world::{default_weapon, World};
use crate::net::protocol::{encode, ClientMessage, ServerMessage, SessionId};
use crate::net::session::SessionRegistry;
use crate::util::time::tick_duration;

use super::{Coalescer, JoinAck, SimEvent, SimStats, StatsSnapshot, INBOX_CAPACITY};

/// Seconds between tick statistics log lines
const STATS_LOG_SECS: u64 = 10;

/// The server's simulation region
pub struct ServerSim {
    world: World,
    inbox: mpsc::Receiver<SimEvent>,
    registry: Arc<SessionRegistry>,
    stats: Arc<SimStats>,
    pending: Coalescer<ClientMessage>,
    snapshots: SnapshotBuilder,
    superseded: u64,
    /// Most inbox events handled in one tick; the rest wait for the next
    event_budget: usize,
}

impl ServerSim {
    pub fn new(
        world: World,
        inbox: mpsc::Receiver<SimEvent>,
        registry: Arc<SessionRegistry>,
        stats: Arc<SimStats>,
    ) -> Self {
        Self {
            world,
            inbox,
            registry,
            stats,
            pending: Coalescer::new(),
            snapshots: SnapshotBuilder::new(),
            superseded: 0,
            event_budget: INBOX_CAPACITY,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Run the fixed-rate loop until `shutdown` resolves or every inbox
    /// sender is gone
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let tick_rate = self.world.settings().tick_rate;
        let mut tick_interval = interval(tick_duration(tick_rate));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let log_every = u64::from(tick_rate) * STATS_LOG_SECS;

        info!(tick_rate, substeps = self.world.settings().substeps, "Simulation started");

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {}
                _ = &mut shutdown => break,
            }

            if !self.tick() {
                info!("Simulation inbox closed");
                break;
            }

            if self.world.tick() % log_every == 0 {
                let stats = self.stats.snapshot();
                let snapshots = self.snapshots.stats();
                info!(
                    tick = stats.tick,
                    sessions = self.registry.len(),
                    cars = stats.cars,
                    targets = stats.targets,
                    projectiles = stats.projectiles,
                    superseded = stats.superseded,
                    avg_snapshot_bytes = snapshots.avg_bytes(),
                    "Tick stats"
                );
            }
        }

        info!(tick = self.world.tick(), "Simulation stopped");
    }

    /// One full tick. Returns false once the inbox can never yield again.
    pub fn tick(&mut self) -> bool {
        let open = self.drain_inbox();
        self.apply_pending();
        self.world.step();
        self.publish();
        open
    }

    /// Handle queued events without waiting, at most `event_budget` of them
    /// so a flooding peer cannot hold the tick back
    fn drain_inbox(&mut self) -> bool {
        for _ in 0..self.event_budget {
            match self.inbox.try_recv() {
                Ok(SimEvent::Join { session, reply }) => {
                    let ack = self.handle_join(session);
                    if reply.send(ack).is_err() {
                        // connection gave up before admission
                        self.handle_leave(session);
                    }
                }
                Ok(SimEvent::Leave { session }) => self.handle_leave(session),
                Ok(SimEvent::Message(envelope)) => {
                    self.pending.push(envelope.session, envelope.msg);
                }
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
        debug!(budget = self.event_budget, "Inbox budget used up, deferring the rest");
        true
    }

    /// Spawn a car for a new session and announce it to everyone else
    fn handle_join(&mut self, session: SessionId) -> JoinAck {
        let init_pos = self.world.spawn_point();
        let state = self
            .world
            .add_car(session, init_pos, 0.0, Some(default_weapon(session)));

        let mut existing = self.world.car_states();
        existing.remove(&session);

        match encode(&ServerMessage::add_car(session, state)) {
            Ok(payload) => {
                self.registry.broadcast(&payload, Some(session));
            }
            Err(e) => warn!(session_id = session, error = %e, "Failed to encode add_cars"),
        }

        info!(
            session_id = session,
            x = init_pos[0],
            y = init_pos[1],
            cars = self.world.car_count(),
            "Car joined"
        );
        JoinAck {
            init_pos,
            state,
            existing,
        }
    }

    /// Remove a session's car and tell everyone else
    fn handle_leave(&mut self, session: SessionId) {
        self.pending.forget(session);
        if !self.world.remove_car(session) {
            return;
        }

        match encode(&ServerMessage::remove_cars(vec![session])) {
            Ok(payload) => {
                self.registry.broadcast(&payload, Some(session));
            }
            Err(e) => warn!(session_id = session, error = %e, "Failed to encode remove_cars"),
        }
        info!(session_id = session, cars = self.world.car_count(), "Car left");
    }

    /// Apply the newest message from each sender
    fn apply_pending(&mut self) {
        let (latest, superseded) = self.pending.drain();
        self.superseded += superseded;

        for (session, msg) in latest {
            match msg {
                ClientMessage::State(pushed) => {
                    if pushed.id.is_some_and(|id| id != session) {
                        warn!(
                            session_id = session,
                            claimed = ?pushed.id,
                            "Ignoring state for another session's car"
                        );
                        continue;
                    }
                    if !self.world.apply_car_state(session, &pushed.state) {
                        debug!(session_id = session, "State for unknown car");
                    }
                }
                ClientMessage::Input(input) => {
                    if !self.world.set_input(session, input) {
                        debug!(session_id = session, "Input for unknown car");
                    }
                }
            }
        }
    }

    /// Fan the tick's snapshot out and refresh the shared stats
    fn publish(&mut self) {
        let snapshot = self.snapshots.build(&mut self.world);

        if let Some(removals) = snapshot.removals {
            match encode(&removals) {
                Ok(payload) => {
                    self.registry.broadcast(&payload, None);
                }
                Err(e) => warn!(error = %e, "Failed to encode remove_targets"),
            }
        }

        let mut bytes = 0;
        if !snapshot.state.is_empty() && !self.registry.is_empty() {
            match encode(&snapshot.state) {
                Ok(payload) => {
                    bytes = payload.len();
                    self.registry.broadcast_state(&payload, None);
                    self.snapshots.record(self.world.car_count(), bytes);
                }
                Err(e) => warn!(error = %e, "Failed to encode snapshot"),
            }
        }

        self.stats.store(StatsSnapshot {
            tick: self.world.tick(),
            cars: self.world.car_count(),
            targets: self.world.target_count(),
            projectiles: self.world.projectile_count(),
            explosions: self.world.explosions().len(),
            superseded: self.superseded,
            snapshot_bytes: bytes as u64,
        });
    }
}
