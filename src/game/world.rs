//! World state: every entity, the physics engine and the fixed tick order
//!
//! A tick always runs input application, physics sub-steps, collision
//! resolution and entity cleanup, in that order.

use std::collections::{BTreeMap, HashMap};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rapier2d::prelude::*;
use tracing::{debug, info};
use uuid::Uuid;

use crate::input::InputSnapshot;
use crate::net::protocol::{CarState, SessionId, TargetId, TargetState};
use crate::util::time::{tick_delta, DEFAULT_SUBSTEPS, DEFAULT_TICK_RATE};

use super::combat::{out_of_bounds, Explosion, Projectile, ProjectileKind};
use super::physics::PhysicsWorld;
use super::target::{arena_targets, boundary_walls, cover_walls, Patrol, Target, Terrain};
use super::vehicle::{Car, VehicleSettings};
use super::weapon::{Weapon, LOCK_RADIUS};

/// Gameplay constants
#[derive(Debug, Clone)]
pub struct SimSettings {
    pub map_width: f32,
    pub map_height: f32,
    /// How far past the map a projectile may fly before removal
    pub oob_margin: f32,
    pub tick_rate: u32,
    pub substeps: u32,
    pub vehicle: VehicleSettings,
    /// Distance from the map edge where cars may spawn
    pub spawn_margin: f32,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            map_width: 1280.0,
            map_height: 720.0,
            oob_margin: 100.0,
            tick_rate: DEFAULT_TICK_RATE,
            substeps: DEFAULT_SUBSTEPS,
            vehicle: VehicleSettings::default(),
            spawn_margin: 80.0,
        }
    }
}

impl SimSettings {
    pub fn new(tick_rate: u32, substeps: u32) -> Self {
        Self {
            tick_rate,
            substeps: substeps.max(1),
            ..Self::default()
        }
    }

    /// Length of one physics sub-step in seconds
    pub fn substep_dt(&self) -> f32 {
        tick_delta(self.tick_rate) / self.substeps.max(1) as f32
    }
}

/// What a collider belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    Car(SessionId),
    Target(TargetId),
    Terrain,
    Projectile(Uuid),
}

/// Weapon mounted on a newly joined car, rotating through the variants
pub fn default_weapon(session: SessionId) -> Weapon {
    match session % 3 {
        0 => Weapon::machine_gun(),
        1 => Weapon::rocket_launcher(),
        _ => Weapon::laser_cannon(),
    }
}

pub struct World {
    pub(super) settings: SimSettings,
    pub(super) physics: PhysicsWorld,
    /// Collider to owning entity
    pub(super) entities: HashMap<ColliderHandle, EntityRef>,
    pub(super) cars: BTreeMap<SessionId, Car>,
    pub(super) inputs: BTreeMap<SessionId, InputSnapshot>,
    pub(super) targets: BTreeMap<TargetId, Target>,
    pub(super) terrain: Vec<Terrain>,
    pub(super) projectiles: HashMap<Uuid, Projectile>,
    pub(super) explosions: Vec<Explosion>,
    removed_targets: Vec<TargetId>,
    next_target_id: TargetId,
    tick: u64,
    rng: ChaCha8Rng,
}

impl World {
    /// An empty map enclosed by boundary walls
    pub fn new(settings: SimSettings, seed: u64) -> Self {
        let mut world = Self {
            physics: PhysicsWorld::new(),
            entities: HashMap::new(),
            cars: BTreeMap::new(),
            inputs: BTreeMap::new(),
            targets: BTreeMap::new(),
            terrain: Vec::new(),
            projectiles: HashMap::new(),
            explosions: Vec::new(),
            removed_targets: Vec::new(),
            next_target_id: 0,
            tick: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            settings,
        };
        for wall in boundary_walls(world.settings.map_width, world.settings.map_height) {
            let terrain = Terrain::spawn(&mut world.physics, &wall);
            world.add_terrain(terrain);
        }
        world
    }

    /// Boundary and cover walls without any targets
    pub fn with_cover(settings: SimSettings, seed: u64) -> Self {
        let mut world = Self::new(settings, seed);
        for wall in cover_walls(world.settings.map_width, world.settings.map_height) {
            let terrain = Terrain::spawn(&mut world.physics, &wall);
            world.add_terrain(terrain);
        }
        world
    }

    /// Walls, cover and the initial targets
    pub fn arena(settings: SimSettings, seed: u64) -> Self {
        let mut world = Self::with_cover(settings, seed);
        let (w, h) = (world.settings.map_width, world.settings.map_height);
        for (pos, patrol) in arena_targets(w, h) {
            world.add_target(pos, patrol);
        }
        info!(
            walls = world.terrain.len(),
            targets = world.targets.len(),
            "Arena created"
        );
        world
    }

    fn add_terrain(&mut self, terrain: Terrain) {
        self.entities.insert(terrain.collider, EntityRef::Terrain);
        self.terrain.push(terrain);
    }

    pub fn settings(&self) -> &SimSettings {
        &self.settings
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn physics(&self) -> &PhysicsWorld {
        &self.physics
    }

    /// Pick a spawn point inside the map, away from the edges
    pub fn spawn_point(&mut self) -> [f32; 2] {
        let m = self.settings.spawn_margin;
        let x = self.rng.gen_range(m..(self.settings.map_width - m));
        let y = self.rng.gen_range(m..(self.settings.map_height - m));
        [x, y]
    }

    /// Spawn a car for a session, replacing any car it already had
    pub fn add_car(
        &mut self,
        session: SessionId,
        pos: [f32; 2],
        heading: f32,
        weapon: Option<Weapon>,
    ) -> CarState {
        self.remove_car(session);

        let mut car = Car::spawn(
            &mut self.physics,
            session,
            pos,
            heading,
            self.settings.vehicle,
        );
        car.set_weapon(weapon);
        let state = car.state(&self.physics).unwrap_or(CarState {
            pos,
            a_pos: heading,
            ..CarState::default()
        });

        self.entities.insert(car.collider, EntityRef::Car(session));
        self.cars.insert(session, car);
        debug!(session_id = session, x = pos[0], y = pos[1], "Car spawned");
        state
    }

    /// Remove a session's car along with its beam and pending input
    pub fn remove_car(&mut self, session: SessionId) -> bool {
        self.inputs.remove(&session);
        let Some(mut car) = self.cars.remove(&session) else {
            return false;
        };
        if let Some(beam) = car.weapon_mut().and_then(|w| w.release()) {
            self.destroy_projectile(beam);
        }
        self.entities.remove(&car.collider);
        car.despawn(&mut self.physics);
        debug!(session_id = session, "Car removed");
        true
    }

    pub fn car(&self, session: SessionId) -> Option<&Car> {
        self.cars.get(&session)
    }

    pub fn car_count(&self) -> usize {
        self.cars.len()
    }

    pub fn car_state(&self, session: SessionId) -> Option<CarState> {
        self.cars.get(&session)?.state(&self.physics)
    }

    pub fn car_states(&self) -> BTreeMap<SessionId, CarState> {
        self.cars
            .iter()
            .filter_map(|(&id, car)| car.state(&self.physics).map(|s| (id, s)))
            .collect()
    }

    /// Overwrite a car's pose with an authoritative snapshot. The car stops
    /// following any earlier input.
    pub fn apply_car_state(&mut self, session: SessionId, state: &CarState) -> bool {
        let Some(car) = self.cars.get_mut(&session) else {
            return false;
        };
        self.inputs.remove(&session);
        car.apply_state(&mut self.physics, state);
        true
    }

    /// Input the car follows from the next tick on, until replaced
    pub fn set_input(&mut self, session: SessionId, input: InputSnapshot) -> bool {
        if !self.cars.contains_key(&session) {
            return false;
        }
        self.inputs.insert(session, input);
        true
    }

    pub fn add_target(&mut self, pos: Vector<Real>, patrol: Option<Patrol>) -> TargetId {
        let id = self.next_target_id;
        self.next_target_id += 1;
        let target = Target::spawn(&mut self.physics, id, pos, patrol);
        self.entities.insert(target.collider, EntityRef::Target(id));
        self.targets.insert(id, target);
        id
    }

    pub fn target(&self, id: TargetId) -> Option<&Target> {
        self.targets.get(&id)
    }

    pub fn target_mut(&mut self, id: TargetId) -> Option<&mut Target> {
        self.targets.get_mut(&id)
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn target_states(&self) -> BTreeMap<TargetId, TargetState> {
        self.targets
            .iter()
            .filter_map(|(&id, t)| t.state(&self.physics).map(|s| (id, s)))
            .collect()
    }

    /// Targets destroyed since the last call
    pub fn take_removed_targets(&mut self) -> Vec<TargetId> {
        std::mem::take(&mut self.removed_targets)
    }

    pub fn projectile(&self, id: Uuid) -> Option<&Projectile> {
        self.projectiles.get(&id)
    }

    pub fn projectiles(&self) -> impl Iterator<Item = &Projectile> {
        self.projectiles.values()
    }

    pub fn projectile_count(&self) -> usize {
        self.projectiles.len()
    }

    pub fn explosions(&self) -> &[Explosion] {
        &self.explosions
    }

    /// Advance the world by one tick
    pub fn step(&mut self) {
        self.apply_controls();
        self.steer_rockets();
        for target in self.targets.values_mut() {
            target.update(&mut self.physics);
        }

        let dt = self.settings.substep_dt();
        let mut impacts = Vec::new();
        for _ in 0..self.settings.substeps.max(1) {
            let events = self.physics.step(dt);
            self.record_impacts(events, &mut impacts);
        }

        self.resolve_collisions(impacts);
        self.update_beams();
        self.cleanup();
        self.tick += 1;
    }

    /// Drive every car and operate its weapon
    fn apply_controls(&mut self) {
        let sessions: Vec<SessionId> = self.cars.keys().copied().collect();
        let mut shots = Vec::new();
        let mut released = Vec::new();

        for session in sessions {
            let input = self.inputs.get(&session).copied();
            let under_cursor = input
                .and_then(|i| i.cursor)
                .and_then(|c| self.target_near(vector![c[0], c[1]], LOCK_RADIUS));

            let Some(car) = self.cars.get_mut(&session) else {
                continue;
            };
            match &input {
                Some(input) => car.drive(&mut self.physics, input),
                None => car.hold(&mut self.physics),
            }
            let car_pos = car.position(&self.physics);

            let Some(weapon) = car.weapon_mut() else {
                continue;
            };
            weapon.tick();
            let Some(input) = input else {
                continue;
            };
            weapon.aim = input.aim;
            if let Some(lock) = weapon.lock_on_mut() {
                lock.update(under_cursor);
            }

            match car_pos {
                Some(pos) if input.fire && weapon.ammo > 0.0 => {
                    if let Some(shot) = weapon.shoot(pos) {
                        shots.push((session, shot));
                    }
                }
                _ => {
                    if let Some(beam) = weapon.release() {
                        released.push(beam);
                    }
                }
            }
        }

        for beam in released {
            self.destroy_projectile(beam);
        }
        for (owner, shot) in shots {
            self.spawn_projectile(owner, shot);
        }
    }

    /// Nearest target within `radius` of a point
    pub fn target_near(&self, point: Vector<Real>, radius: f32) -> Option<TargetId> {
        self.targets
            .iter()
            .filter_map(|(&id, t)| {
                let d = (t.position(&self.physics)? - point).norm();
                (d <= radius).then_some((id, d))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    /// Drop escaped projectiles, dead targets and expired explosions
    fn cleanup(&mut self) {
        let (w, h, margin) = (
            self.settings.map_width,
            self.settings.map_height,
            self.settings.oob_margin,
        );
        let escaped: Vec<Uuid> = self
            .projectiles
            .values()
            .filter(|p| !matches!(p.kind, ProjectileKind::Laser(_)))
            .filter(|p| {
                self.projectile_position(p)
                    .map_or(true, |pos| out_of_bounds(pos, w, h, margin))
            })
            .map(|p| p.id)
            .collect();
        for id in escaped {
            self.destroy_projectile(id);
        }

        let dead: Vec<TargetId> = self
            .targets
            .values()
            .filter(|t| t.is_dead())
            .map(|t| t.id)
            .collect();
        for id in dead {
            self.remove_target(id);
        }

        self.explosions.retain_mut(|e| {
            e.ttl = e.ttl.saturating_sub(1);
            e.ttl > 0
        });
    }

    /// Remove a target from every table that can refer to it
    pub fn remove_target(&mut self, id: TargetId) -> bool {
        let Some(target) = self.targets.remove(&id) else {
            return false;
        };
        self.entities.remove(&target.collider);
        self.physics.remove(target.body);

        for car in self.cars.values_mut() {
            if let Some(lock) = car.weapon_mut().and_then(|w| w.lock_on_mut()) {
                lock.forget(id);
            }
        }
        for projectile in self.projectiles.values_mut() {
            match &mut projectile.kind {
                ProjectileKind::Rocket(rocket) if rocket.target == Some(id) => rocket.target = None,
                ProjectileKind::Laser(laser) if laser.target == Some(id) => laser.target = None,
                _ => {}
            }
        }

        self.removed_targets.push(id);
        info!(target_id = id, "Target destroyed");
        true
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::weapon::WeaponKind;
    use crate::input::{Steer, Throttle};
    use crate::util::approx_eq;
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_6, PI};

    fn world() -> World {
        World::new(SimSettings::default(), 1)
    }

    fn fire(aim: f32) -> InputSnapshot {
        InputSnapshot {
            aim,
            fire: true,
            ..InputSnapshot::default()
        }
    }

    #[test]
    fn arena_has_walls_and_three_targets() {
        let world = World::arena(SimSettings::default(), 7);
        assert_eq!(world.target_count(), 3);
        assert!(world.terrain.len() >= 4);
        assert_eq!(
            world.targets.values().filter(|t| t.patrol.is_some()).count(),
            1
        );
    }

    #[test]
    fn spawn_points_stay_inside_the_margin() {
        let mut world = world();
        for _ in 0..100 {
            let [x, y] = world.spawn_point();
            assert!(x >= 80.0 && x < 1200.0);
            assert!(y >= 80.0 && y < 640.0);
        }
    }

    #[test]
    fn steering_left_for_fifty_ticks() {
        let mut world = world();
        world.add_car(0, [640.0, 360.0], 0.0, None);
        world.set_input(
            0,
            InputSnapshot {
                steer: Steer::Left,
                ..InputSnapshot::default()
            },
        );
        for _ in 0..50 {
            world.step();
            let angle = world.car(0).unwrap().steering_angle();
            assert!(angle.abs() <= FRAC_PI_6 + 1e-6);
        }
        let angle = world.car(0).unwrap().steering_angle();
        assert!(approx_eq(angle, -(50.0 * 0.03f32).min(FRAC_PI_6), 1e-5));
    }

    #[test]
    fn bullet_beyond_the_map_is_removed_next_tick() {
        let mut world = world();
        world.add_car(0, [640.0, 360.0], 0.0, Some(Weapon::machine_gun()));
        world.set_input(0, fire(0.0));
        world.step();
        world.set_input(0, InputSnapshot::default());

        let id = world
            .projectiles()
            .find(|p| matches!(p.kind, ProjectileKind::Bullet))
            .map(|p| p.id)
            .unwrap();
        let beyond = world.settings.map_width + 150.0;
        let body = world.projectile(id).and_then(|p| p.body).unwrap();
        world
            .physics
            .body_mut(body)
            .unwrap()
            .set_translation(vector![beyond, 360.0], true);

        world.step();
        assert!(world.projectile(id).is_none());
    }

    #[test]
    fn bullet_damages_target_and_is_destroyed() {
        let mut world = world();
        world.add_car(0, [200.0, 360.0], 0.0, Some(Weapon::machine_gun()));
        let target = world.add_target(vector![400.0, 360.0], None);
        world.set_input(0, fire(0.0));
        world.step();
        world.set_input(0, InputSnapshot::default());

        for _ in 0..30 {
            world.step();
        }
        assert_eq!(world.target(target).unwrap().hp, crate::game::target::TARGET_HP - 20.0);
        assert_eq!(world.projectile_count(), 0);
    }

    #[test]
    fn bullets_pass_through_cars() {
        let mut world = world();
        world.add_car(0, [200.0, 360.0], 0.0, Some(Weapon::machine_gun()));
        world.add_car(1, [320.0, 360.0], FRAC_PI_2, None);
        world.set_input(0, fire(0.0));
        world.step();
        world.set_input(0, InputSnapshot::default());

        for _ in 0..10 {
            world.step();
        }
        // still in flight past the second car
        let bullet = world.projectiles().next().unwrap();
        let pos = world.projectile_position(bullet).unwrap();
        assert!(pos.x > 320.0);
    }

    #[test]
    fn rocket_blast_damages_everything_inside_radius_once() {
        let mut world = world();
        world.add_car(0, [200.0, 360.0], 0.0, Some(Weapon::rocket_launcher()));
        let struck = world.add_target(vector![500.0, 360.0], None);
        let near = world.add_target(vector![500.0, 360.0 + 70.0], None);
        let far = world.add_target(vector![500.0, 360.0 - 200.0], None);

        world.set_input(0, fire(0.0));
        world.step();
        world.set_input(0, InputSnapshot::default());
        for _ in 0..60 {
            world.step();
        }

        let hp = |id| world.target(id).map(|t| t.hp);
        let full = crate::game::target::TARGET_HP;
        // 300 damage on 500 hp survives
        assert_eq!(hp(struck), Some(full - 300.0));
        assert_eq!(hp(near), Some(full - 300.0));
        assert_eq!(hp(far), Some(full));
        assert!(!world.explosions().is_empty());
    }

    #[test]
    fn blast_is_centred_at_the_point_of_contact() {
        use crate::game::combat::ROCKET_RADIUS;
        use crate::game::target::TARGET_HALF_SIZE;

        let mut world = world();
        world.add_car(0, [200.0, 360.0], 0.0, Some(Weapon::rocket_launcher()));
        world.add_target(vector![500.0, 360.0], None);

        world.set_input(0, fire(0.0));
        world.step();
        world.set_input(0, InputSnapshot::default());
        for _ in 0..90 {
            if !world.explosions().is_empty() {
                break;
            }
            world.step();
        }

        // within one sub-step of the near face, not a whole tick past it
        let face = 500.0 - TARGET_HALF_SIZE - ROCKET_RADIUS;
        let substep_travel = 450.0 * world.settings().substep_dt();
        let blast = world.explosions()[0].pos;
        assert!(blast.x >= face - 0.5, "blast at {}", blast.x);
        assert!(blast.x <= face + substep_travel + 0.5, "blast at {}", blast.x);
    }

    #[test]
    fn dead_targets_are_removed_and_forgotten() {
        let mut world = world();
        world.add_car(0, [200.0, 360.0], 0.0, Some(Weapon::rocket_launcher()));
        let id = world.add_target(vector![500.0, 360.0], None);

        world.set_input(
            0,
            InputSnapshot {
                cursor: Some([500.0, 360.0]),
                ..InputSnapshot::default()
            },
        );
        for _ in 0..25 {
            world.step();
        }
        let locked = world
            .car(0)
            .and_then(|c| c.weapon())
            .and_then(|w| w.lock_on())
            .and_then(|l| l.locked);
        assert_eq!(locked, Some(id));

        world.target_mut(id).unwrap().damage(10_000.0);
        world.step();

        assert!(world.target(id).is_none());
        assert_eq!(world.take_removed_targets(), vec![id]);
        assert!(world.take_removed_targets().is_empty());
        let lock = world.car(0).and_then(|c| c.weapon()).and_then(|w| w.lock_on());
        assert_eq!(lock.and_then(|l| l.locked), None);
    }

    #[test]
    fn locked_rocket_curves_onto_its_target() {
        let mut world = world();
        world.add_car(0, [200.0, 600.0], 0.0, Some(Weapon::rocket_launcher()));
        let id = world.add_target(vector![600.0, 300.0], None);

        let mut input = InputSnapshot {
            cursor: Some([600.0, 300.0]),
            ..InputSnapshot::default()
        };
        world.set_input(0, input);
        for _ in 0..25 {
            world.step();
        }

        // fire straight ahead, away from the bearing to the target
        input.fire = true;
        world.set_input(0, input);
        world.step();
        input.fire = false;
        world.set_input(0, input);
        for _ in 0..120 {
            world.step();
        }

        let hp = world.target(id).map(|t| t.hp);
        assert_eq!(hp, Some(crate::game::target::TARGET_HP - 300.0));
    }

    #[test]
    fn laser_beam_stops_at_nearest_target_and_dwells() {
        let mut world = world();
        world.add_car(0, [200.0, 360.0], 0.0, Some(Weapon::laser_cannon()));
        let near = world.add_target(vector![400.0, 360.0], None);
        let far = world.add_target(vector![600.0, 360.0], None);

        world.set_input(0, fire(0.0));
        for _ in 0..13 {
            world.step();
        }

        let beams: Vec<_> = world
            .projectiles()
            .filter_map(|p| match p.kind {
                ProjectileKind::Laser(laser) => Some(laser),
                _ => None,
            })
            .collect();
        assert_eq!(beams.len(), 1);
        assert_eq!(beams[0].target, Some(near));
        assert!(beams[0].end.x < 400.0);

        let full = crate::game::target::TARGET_HP;
        let dealt = full - world.target(near).unwrap().hp;
        // one hit per dwell, not per tick
        assert!(dealt > 0.0 && dealt <= 3.0 * 5.0, "dealt {dealt}");
        assert_eq!(world.target(far).unwrap().hp, full);

        // releasing fire destroys the beam at once
        world.set_input(0, InputSnapshot::default());
        world.step();
        assert_eq!(world.projectile_count(), 0);
        let weapon = world.car(0).and_then(|c| c.weapon()).unwrap();
        assert!(matches!(&weapon.kind, WeaponKind::LaserCannon(beam) if beam.active.is_none()));
    }

    #[test]
    fn laser_reaches_map_edge_when_clear() {
        let mut world = world();
        world.add_car(0, [200.0, 360.0], 0.0, Some(Weapon::laser_cannon()));
        world.set_input(0, fire(PI));
        world.step();

        let beam = world
            .projectiles()
            .find_map(|p| match p.kind {
                ProjectileKind::Laser(laser) => Some(laser),
                _ => None,
            })
            .unwrap();
        assert!(approx_eq(beam.end.x, 0.0, 1e-2));
        assert_eq!(beam.target, None);
    }

    #[test]
    fn removing_a_car_clears_its_beam() {
        let mut world = world();
        world.add_car(0, [200.0, 360.0], 0.0, Some(Weapon::laser_cannon()));
        world.set_input(0, fire(0.0));
        world.step();
        assert_eq!(world.projectile_count(), 1);

        assert!(world.remove_car(0));
        assert!(!world.remove_car(0));
        assert_eq!(world.projectile_count(), 0);
    }

    #[test]
    fn pose_snapshot_overrides_input() {
        let mut world = world();
        world.add_car(2, [300.0, 300.0], 0.0, None);
        world.set_input(
            2,
            InputSnapshot {
                throttle: Throttle::Forward,
                ..InputSnapshot::default()
            },
        );
        let snapshot = CarState {
            pos: [500.0, 400.0],
            a_pos: 0.5,
            ..CarState::default()
        };
        assert!(world.apply_car_state(2, &snapshot));
        assert!(!world.inputs.contains_key(&2));
        assert_eq!(world.car_state(2).unwrap().pos, [500.0, 400.0]);
        assert!(!world.apply_car_state(9, &snapshot));
    }
}
