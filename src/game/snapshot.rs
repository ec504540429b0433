//! Snapshot building for network transmission

use crate::net::protocol::ServerMessage;

use super::world::World;

/// What one tick publishes
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Car and target poses, superseded by the next tick's snapshot
    pub state: ServerMessage,
    /// Destroyed targets; must never be dropped in favour of a newer state
    pub removals: Option<ServerMessage>,
}

/// Builds snapshots from the world and keeps running totals
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    stats: SnapshotStats,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every car and target. Takes the world's pending target
    /// removals.
    pub fn build(&mut self, world: &mut World) -> Snapshot {
        let cars = world.car_states();
        let targets = world.target_states();
        let removed = world.take_removed_targets();

        let state = ServerMessage {
            update_cars: (!cars.is_empty()).then_some(cars),
            update_targets: (!targets.is_empty()).then_some(targets),
            ..ServerMessage::default()
        };
        let removals = (!removed.is_empty()).then(|| ServerMessage {
            remove_targets: Some(removed),
            ..ServerMessage::default()
        });

        Snapshot { state, removals }
    }

    /// Count a snapshot that went out to clients
    pub fn record(&mut self, car_count: usize, bytes: usize) {
        self.stats.record(car_count, bytes);
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }
}

/// Snapshot size stats for debugging
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub total_bytes: u64,
    pub avg_cars_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, car_count: usize, bytes: usize) {
        self.total_snapshots += 1;
        self.total_bytes += bytes as u64;

        // Running average
        let n = self.total_snapshots as f32;
        self.avg_cars_per_snapshot =
            self.avg_cars_per_snapshot * ((n - 1.0) / n) + (car_count as f32 / n);
    }

    pub fn avg_bytes(&self) -> u64 {
        self.total_bytes.checked_div(self.total_snapshots).unwrap_or(0)
    }
}
