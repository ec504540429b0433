//! Game simulation modules

pub mod combat;
pub mod physics;
pub mod snapshot;
pub mod target;
pub mod vehicle;
pub mod weapon;
pub mod world;

pub use snapshot::{Snapshot, SnapshotBuilder};
pub use vehicle::{Car, VehicleSettings};
pub use weapon::{Weapon, WeaponKind};
pub use world::{EntityRef, SimSettings, World};
