//! Targets (stationary or patrolling) and static terrain

use rapier2d::prelude::*;

use crate::net::protocol::{TargetId, TargetState};

use super::physics::{target_groups, terrain_groups, PhysicsWorld};

pub const TARGET_HALF_SIZE: f32 = 20.0;
pub const TARGET_MASS: f32 = 500.0;
pub const TARGET_HP: f32 = 500.0;
pub const PATROL_SPEED: f32 = 60.0;
/// Distance at which a patrolling target turns around
const WAYPOINT_TOLERANCE: f32 = 5.0;

/// Two endpoints a moving target shuttles between
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Patrol {
    pub from: Vector<Real>,
    pub to: Vector<Real>,
    pub speed: f32,
    /// Whether the target is currently heading for `to`
    outbound: bool,
}

impl Patrol {
    pub fn new(from: Vector<Real>, to: Vector<Real>) -> Self {
        Self {
            from,
            to,
            speed: PATROL_SPEED,
            outbound: true,
        }
    }

    /// Velocity toward the current waypoint, flipping waypoints on arrival
    pub fn velocity(&mut self, pos: Vector<Real>) -> Vector<Real> {
        let waypoint = if self.outbound { self.to } else { self.from };
        let offset = waypoint - pos;
        if offset.norm() <= WAYPOINT_TOLERANCE {
            self.outbound = !self.outbound;
            return vector![0.0, 0.0];
        }
        offset.normalize() * self.speed
    }
}

#[derive(Debug)]
pub struct Target {
    pub id: TargetId,
    pub body: RigidBodyHandle,
    pub collider: ColliderHandle,
    pub hp: f32,
    pub patrol: Option<Patrol>,
}

impl Target {
    pub fn spawn(
        physics: &mut PhysicsWorld,
        id: TargetId,
        pos: Vector<Real>,
        patrol: Option<Patrol>,
    ) -> Self {
        let side = 2.0 * TARGET_HALF_SIZE;
        let body = RigidBodyBuilder::dynamic()
            .translation(pos)
            .linear_damping(4.0)
            .angular_damping(4.0)
            .build();
        let collider = ColliderBuilder::cuboid(TARGET_HALF_SIZE, TARGET_HALF_SIZE)
            .density(TARGET_MASS / (side * side))
            .collision_groups(target_groups())
            .build();
        let (body, collider) = physics.insert(body, collider);

        Self {
            id,
            body,
            collider,
            hp: TARGET_HP,
            patrol,
        }
    }

    pub fn damage(&mut self, amount: f32) {
        self.hp -= amount;
    }

    pub fn is_dead(&self) -> bool {
        self.hp <= 0.0
    }

    /// Steer a patrolling target toward its waypoint
    pub fn update(&mut self, physics: &mut PhysicsWorld) {
        let Some(patrol) = self.patrol.as_mut() else {
            return;
        };
        if let Some(body) = physics.body_mut(self.body) {
            let vel = patrol.velocity(*body.translation());
            body.set_linvel(vel, true);
        }
    }

    pub fn position(&self, physics: &PhysicsWorld) -> Option<Vector<Real>> {
        physics.body(self.body).map(|b| *b.translation())
    }

    pub fn state(&self, physics: &PhysicsWorld) -> Option<TargetState> {
        let pos = self.position(physics)?;
        Some(TargetState {
            pos: [pos.x, pos.y],
            hp: self.hp,
        })
    }
}

/// A fixed obstacle
#[derive(Debug, Clone, Copy)]
pub struct Terrain {
    pub body: RigidBodyHandle,
    pub collider: ColliderHandle,
}

/// Placement of one wall
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallLayout {
    pub center: Vector<Real>,
    pub half_extents: Vector<Real>,
    pub angle: f32,
}

impl Terrain {
    pub fn spawn(physics: &mut PhysicsWorld, wall: &WallLayout) -> Self {
        let body = RigidBodyBuilder::fixed()
            .translation(wall.center)
            .rotation(wall.angle)
            .build();
        let collider = ColliderBuilder::cuboid(wall.half_extents.x, wall.half_extents.y)
            .collision_groups(terrain_groups())
            .build();
        let (body, collider) = physics.insert(body, collider);
        Self { body, collider }
    }
}

/// Boundary walls just outside the map edges
pub fn boundary_walls(width: f32, height: f32) -> Vec<WallLayout> {
    const THICKNESS: f32 = 10.0;
    let wall = |cx: f32, cy: f32, hx: f32, hy: f32| WallLayout {
        center: vector![cx, cy],
        half_extents: vector![hx, hy],
        angle: 0.0,
    };
    vec![
        wall(width / 2.0, -THICKNESS, width / 2.0, THICKNESS),
        wall(width / 2.0, height + THICKNESS, width / 2.0, THICKNESS),
        wall(-THICKNESS, height / 2.0, THICKNESS, height / 2.0),
        wall(width + THICKNESS, height / 2.0, THICKNESS, height / 2.0),
    ]
}

/// Cover walls placed inside the arena, relative to the map size
pub fn cover_walls(width: f32, height: f32) -> Vec<WallLayout> {
    vec![
        WallLayout {
            center: vector![width * 0.5, height * 0.5],
            half_extents: vector![80.0, 12.0],
            angle: 0.0,
        },
        WallLayout {
            center: vector![width * 0.25, height * 0.3],
            half_extents: vector![12.0, 60.0],
            angle: 0.0,
        },
        WallLayout {
            center: vector![width * 0.75, height * 0.7],
            half_extents: vector![12.0, 60.0],
            angle: 0.0,
        },
    ]
}

/// Initial targets: two stationary, one patrolling
pub fn arena_targets(width: f32, height: f32) -> Vec<(Vector<Real>, Option<Patrol>)> {
    vec![
        (vector![width * 0.8, height * 0.2], None),
        (vector![width * 0.2, height * 0.8], None),
        (
            vector![width * 0.4, height * 0.15],
            Some(Patrol::new(
                vector![width * 0.4, height * 0.15],
                vector![width * 0.6, height * 0.15],
            )),
        ),
    ]
}
