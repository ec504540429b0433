//! Rigid-body physics wrapper
//!
//! Owns every rapier set plus a fixed `ground` body that wheel constraints
//! anchor to. The world is top-down, so there is no gravity.

use parking_lot::Mutex;
use rapier2d::prelude::*;

pub const GROUP_CAR: Group = Group::from_bits_truncate(0b0001);
pub const GROUP_TARGET: Group = Group::from_bits_truncate(0b0010);
pub const GROUP_TERRAIN: Group = Group::from_bits_truncate(0b0100);
pub const GROUP_PROJECTILE: Group = Group::from_bits_truncate(0b1000);

/// Collision groups for car bodies. Cars never collide with projectiles.
pub fn car_groups() -> InteractionGroups {
    InteractionGroups::new(GROUP_CAR, GROUP_CAR | GROUP_TARGET | GROUP_TERRAIN)
}

pub fn target_groups() -> InteractionGroups {
    InteractionGroups::new(
        GROUP_TARGET,
        GROUP_CAR | GROUP_TARGET | GROUP_TERRAIN | GROUP_PROJECTILE,
    )
}

pub fn terrain_groups() -> InteractionGroups {
    InteractionGroups::new(GROUP_TERRAIN, GROUP_CAR | GROUP_TARGET | GROUP_PROJECTILE)
}

pub fn projectile_groups() -> InteractionGroups {
    InteractionGroups::new(GROUP_PROJECTILE, GROUP_TARGET | GROUP_TERRAIN)
}

/// Gathers collision events raised during a step
#[derive(Default)]
struct EventCollector {
    collisions: Mutex<Vec<CollisionEvent>>,
}

impl EventHandler for EventCollector {
    fn handle_collision_event(
        &self,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        event: CollisionEvent,
        _contact_pair: Option<&ContactPair>,
    ) {
        if event.started() {
            self.collisions.lock().push(event);
        }
    }

    fn handle_contact_force_event(
        &self,
        _dt: Real,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: Real,
    ) {
    }
}

pub struct PhysicsWorld {
    pub gravity: Vector<Real>,
    pub pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    pub joints: ImpulseJointSet,
    pub multibody_joints: MultibodyJointSet,
    pub ccd: CCDSolver,
    pub query_pipeline: QueryPipeline,
    /// Static anchor for wheel constraints
    pub ground: RigidBodyHandle,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsWorld {
    pub fn new() -> Self {
        let mut bodies = RigidBodySet::new();
        let ground = bodies.insert(RigidBodyBuilder::fixed().build());

        Self {
            gravity: vector![0.0, 0.0],
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies,
            colliders: ColliderSet::new(),
            joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            ground,
        }
    }

    /// Insert a body with one collider attached
    pub fn insert(&mut self, body: RigidBody, collider: Collider) -> (RigidBodyHandle, ColliderHandle) {
        let body = self.bodies.insert(body);
        let collider = self
            .colliders
            .insert_with_parent(collider, body, &mut self.bodies);
        (body, collider)
    }

    /// Remove a body together with its colliders and joints
    pub fn remove(&mut self, handle: RigidBodyHandle) {
        self.bodies.remove(
            handle,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            true,
        );
    }

    /// Advance by `dt` and return the collisions that started during it
    pub fn step(&mut self, dt: Real) -> Vec<CollisionEvent> {
        let hooks = ();
        let events = EventCollector::default();

        self.pipeline.step(
            &self.gravity,
            &IntegrationParameters {
                dt,
                ..IntegrationParameters::default()
            },
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            Some(&mut self.query_pipeline),
            &hooks,
            &events,
        );

        events.collisions.into_inner()
    }

    /// Refresh the query pipeline after bodies were added, moved or removed
    pub fn update_queries(&mut self) {
        self.query_pipeline.update(&self.colliders);
    }

    /// Nearest collider hit along a ray, with its time of impact
    pub fn cast_ray(
        &self,
        origin: Point<Real>,
        dir: Vector<Real>,
        max_toi: Real,
        groups: InteractionGroups,
    ) -> Option<(ColliderHandle, Real)> {
        let ray = Ray::new(origin, dir);
        self.query_pipeline.cast_ray(
            &self.bodies,
            &self.colliders,
            &ray,
            max_toi,
            true,
            QueryFilter::default().groups(groups),
        )
    }

    pub fn body(&self, handle: RigidBodyHandle) -> Option<&RigidBody> {
        self.bodies.get(handle)
    }

    pub fn body_mut(&mut self, handle: RigidBodyHandle) -> Option<&mut RigidBody> {
        self.bodies.get_mut(handle)
    }
}
