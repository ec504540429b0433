//! Client-side simulation loop
//!
//! The client owns its car: it integrates local input every tick and pushes
//! the result to the server. Every other car follows server snapshots.
//! Targets are only mirrored as data since the server resolves all hits.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SyncMode;
use crate::game::world::{default_weapon, SimSettings, World};
use crate::input::InputSource;
use crate::net::connection::Envelope;
use crate::net::mailbox::MailboxError;
use crate::net::protocol::{
    encode, CarState, ClientMessage, ClientState, InitInfo, ServerMessage, SessionId, TargetId,
    TargetState,
};
use crate::net::session::Session;
use crate::util::time::tick_duration;

pub struct ClientSim {
    id: SessionId,
    world: World,
    targets: BTreeMap<TargetId, TargetState>,
    input: Box<dyn InputSource>,
    sync: SyncMode,
}

impl ClientSim {
    /// Build the local world from an admission message
    pub fn new(
        settings: SimSettings,
        init: InitInfo,
        existing: BTreeMap<SessionId, CarState>,
        input: Box<dyn InputSource>,
        sync: SyncMode,
    ) -> Self {
        let mut world = World::with_cover(settings, u64::from(init.id));
        world.add_car(init.id, init.init_pos, 0.0, Some(default_weapon(init.id)));

        let mut sim = Self {
            id: init.id,
            world,
            targets: BTreeMap::new(),
            input,
            sync,
        };
        sim.upsert_cars(existing);
        sim
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn targets(&self) -> &BTreeMap<TargetId, TargetState> {
        &self.targets
    }

    /// Apply one server message to the local view
    pub fn handle(&mut self, msg: ServerMessage) {
        if msg.init.is_some() {
            warn!(session_id = self.id, "Ignoring repeated admission");
        }
        if let Some(cars) = msg.add_cars {
            self.upsert_cars(cars);
        }
        if let Some(ids) = msg.remove_cars {
            for id in ids.into_iter().filter(|&id| id != self.id) {
                self.world.remove_car(id);
                debug!(car_id = id, "Remote car removed");
            }
        }
        if let Some(cars) = msg.update_cars {
            self.upsert_cars(cars);
        }
        if let Some(targets) = msg.update_targets {
            self.targets.extend(targets);
        }
        if let Some(ids) = msg.remove_targets {
            for id in ids {
                self.targets.remove(&id);
            }
        }
    }

    /// Add or move remote cars. Our own car is never overwritten.
    fn upsert_cars(&mut self, cars: BTreeMap<SessionId, CarState>) {
        for (id, state) in cars {
            if id == self.id {
                continue;
            }
            if !self.world.apply_car_state(id, &state) {
                self.world
                    .add_car(id, state.pos, state.a_pos, Some(default_weapon(id)));
                self.world.apply_car_state(id, &state);
                debug!(car_id = id, "Remote car added");
            }
        }
    }

    /// Advance one tick and return what to send to the server
    pub fn tick(&mut self) -> ClientMessage {
        let input = self.input.poll(self.world.tick());
        self.world.set_input(self.id, input);
        self.world.step();

        match self.sync {
            SyncMode::Input => ClientMessage::Input(input),
            SyncMode::State => ClientMessage::State(ClientState {
                id: Some(self.id),
                state: self.world.car_state(self.id).unwrap_or_default(),
            }),
        }
    }

    /// Run at the world's tick rate until the connection ends or `ticks`
    /// ticks have passed (0 runs forever). Returns the number of ticks run.
    pub async fn run(
        mut self,
        session: Arc<Session>,
        mut inbox: mpsc::Receiver<Envelope<ServerMessage>>,
        ticks: u64,
    ) -> u64 {
        let mut tick_interval = interval(tick_duration(self.world.settings().tick_rate));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(session_id = self.id, sync = ?self.sync, "Client simulation started");

        let mut ran = 0;
        while ticks == 0 || ran < ticks {
            tick_interval.tick().await;
            if session.cancel_flag().is_cancelled() {
                break;
            }

            loop {
                match inbox.try_recv() {
                    Ok(envelope) => self.handle(envelope.msg),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        session.cancel_flag().cancel();
                        break;
                    }
                }
            }

            let outbound = self.tick();
            ran += 1;

            let pushed = encode(&outbound).map(|payload| session.outbound().push_state(payload));
            match pushed {
                Ok(Ok(())) => {}
                Ok(Err(MailboxError::Closed)) => break,
                Ok(Err(e)) => warn!(error = %e, "Dropping outbound state"),
                Err(e) => warn!(error = %e, "Failed to encode outbound state"),
            }
        }

        info!(
            session_id = self.id,
            ticks = ran,
            cars = self.world.car_count(),
            targets = self.targets.len(),
            "Client simulation stopped"
        );
        ran
    }
}
