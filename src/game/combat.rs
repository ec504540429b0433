//! Combat system - projectiles, rocket guidance, laser beams and collision
//! resolution

use std::collections::HashSet;

use rapier2d::prelude::*;
use tracing::debug;
use uuid::Uuid;

use crate::net::protocol::{SessionId, TargetId};
use crate::util::angle;

use super::physics::{projectile_groups, GROUP_PROJECTILE, GROUP_TARGET};
use super::weapon::{Shot, ShotKind};
use super::world::{EntityRef, World};

pub const BULLET_RADIUS: f32 = 3.0;
pub const ROCKET_RADIUS: f32 = 5.0;
/// Ticks an explosion stays visible
pub const EXPLOSION_TTL: u32 = 30;

/// Homing state of a rocket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rocket {
    pub target: Option<TargetId>,
    /// Maximum heading change per tick
    pub gain: f32,
    pub explosion_radius: f32,
    pub explosion_impulse: f32,
}

/// A beam recomputed every tick from its cannon to the first obstruction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Laser {
    pub origin: Vector<Real>,
    pub end: Vector<Real>,
    /// Target the beam currently touches
    pub target: Option<TargetId>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProjectileKind {
    Bullet,
    Rocket(Rocket),
    Laser(Laser),
}

#[derive(Debug, Clone)]
pub struct Projectile {
    pub id: Uuid,
    pub owner: SessionId,
    pub damage: f32,
    pub kind: ProjectileKind,
    /// Bullets and rockets fly as sensor bodies; beams have none
    pub body: Option<RigidBodyHandle>,
    pub collider: Option<ColliderHandle>,
    pub heading: f32,
    pub speed: f32,
}

/// Short-lived explosion visual
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Explosion {
    pub pos: Vector<Real>,
    pub radius: f32,
    pub ttl: u32,
}

/// A collision raised during one sub-step, with the projectile's position
/// at that moment
pub(super) struct Impact {
    event: CollisionEvent,
    at: Option<Vector<Real>>,
}

/// Rotate `heading` toward `bearing` by at most `gain`, never past it
pub fn steer_toward(heading: f32, bearing: f32, gain: f32) -> f32 {
    let delta = angle::shortest_delta(heading, bearing);
    angle::normalize(heading + delta.signum() * gain.min(delta.abs()))
}

/// Every target strictly inside the blast, with the impulse it receives.
/// A target exactly at the centre gets no impulse.
pub fn blast_impulses<I>(
    center: Vector<Real>,
    radius: f32,
    magnitude: f32,
    targets: I,
) -> Vec<(TargetId, Vector<Real>)>
where
    I: IntoIterator<Item = (TargetId, Vector<Real>)>,
{
    targets
        .into_iter()
        .filter_map(|(id, pos)| {
            let away = pos - center;
            let dist = away.norm();
            if dist >= radius {
                return None;
            }
            let impulse = if dist > f32::EPSILON {
                away / dist * magnitude
            } else {
                vector![0.0, 0.0]
            };
            Some((id, impulse))
        })
        .collect()
}

/// Whether a position lies beyond the map by more than `margin` on any side
pub fn out_of_bounds(pos: Vector<Real>, width: f32, height: f32, margin: f32) -> bool {
    pos.x < -margin || pos.x > width + margin || pos.y < -margin || pos.y > height + margin
}

/// Distance along a unit direction from `origin` to the map edge.
/// Zero when the origin is already outside.
pub fn boundary_distance(origin: Vector<Real>, dir: Vector<Real>, width: f32, height: f32) -> f32 {
    if origin.x < 0.0 || origin.x > width || origin.y < 0.0 || origin.y > height {
        return 0.0;
    }
    let axis = |o: f32, d: f32, max: f32| {
        if d > 0.0 {
            (max - o) / d
        } else if d < 0.0 {
            -o / d
        } else {
            f32::INFINITY
        }
    };
    axis(origin.x, dir.x, width).min(axis(origin.y, dir.y, height))
}

impl World {
    /// Create the entity for a shot. Beams are attached to their cannon.
    pub fn spawn_projectile(&mut self, owner: SessionId, shot: Shot) -> Uuid {
        let id = Uuid::new_v4();
        let dir = vector![shot.heading.cos(), shot.heading.sin()];

        let (kind, radius) = match shot.kind {
            ShotKind::Bullet => (ProjectileKind::Bullet, Some(BULLET_RADIUS)),
            ShotKind::Rocket {
                target,
                gain,
                explosion_radius,
                explosion_impulse,
            } => (
                ProjectileKind::Rocket(Rocket {
                    target,
                    gain,
                    explosion_radius,
                    explosion_impulse,
                }),
                Some(ROCKET_RADIUS),
            ),
            ShotKind::Laser => (
                ProjectileKind::Laser(Laser {
                    origin: shot.origin,
                    end: shot.origin,
                    target: None,
                }),
                None,
            ),
        };

        let (body, collider) = match radius {
            Some(radius) => {
                let body = RigidBodyBuilder::dynamic()
                    .translation(shot.origin)
                    .rotation(shot.heading)
                    .linvel(dir * shot.speed)
                    .build();
                let collider = ColliderBuilder::ball(radius)
                    .sensor(true)
                    .active_events(ActiveEvents::COLLISION_EVENTS)
                    .collision_groups(projectile_groups())
                    .build();
                let (body, collider) = self.physics.insert(body, collider);
                self.entities.insert(collider, EntityRef::Projectile(id));
                (Some(body), Some(collider))
            }
            None => {
                if let Some(weapon) = self.cars.get_mut(&owner).and_then(|c| c.weapon_mut()) {
                    weapon.attach_beam(id);
                }
                (None, None)
            }
        };

        self.projectiles.insert(
            id,
            Projectile {
                id,
                owner,
                damage: shot.damage,
                kind,
                body,
                collider,
                heading: shot.heading,
                speed: shot.speed,
            },
        );
        id
    }

    /// Remove a projectile and its body. Unknown ids are ignored.
    pub fn destroy_projectile(&mut self, id: Uuid) {
        let Some(projectile) = self.projectiles.remove(&id) else {
            return;
        };
        if let Some(collider) = projectile.collider {
            self.entities.remove(&collider);
        }
        if let Some(body) = projectile.body {
            self.physics.remove(body);
        }
        if matches!(projectile.kind, ProjectileKind::Laser(_)) {
            if let Some(weapon) = self
                .cars
                .get_mut(&projectile.owner)
                .and_then(|c| c.weapon_mut())
            {
                if weapon.beam().and_then(|b| b.active) == Some(id) {
                    weapon.release();
                }
            }
        }
    }

    pub fn projectile_position(&self, projectile: &Projectile) -> Option<Vector<Real>> {
        match projectile.kind {
            ProjectileKind::Laser(laser) => Some(laser.origin),
            _ => projectile
                .body
                .and_then(|b| self.physics.body(b))
                .map(|b| *b.translation()),
        }
    }

    /// Turn every homing rocket toward its target
    pub(super) fn steer_rockets(&mut self) {
        for projectile in self.projectiles.values_mut() {
            let ProjectileKind::Rocket(rocket) = &mut projectile.kind else {
                continue;
            };
            let Some(target_id) = rocket.target else {
                continue;
            };
            let Some(target_pos) = self
                .targets
                .get(&target_id)
                .and_then(|t| t.position(&self.physics))
            else {
                // target gone: fly straight
                rocket.target = None;
                continue;
            };
            let Some(body) = projectile.body.and_then(|b| self.physics.bodies.get_mut(b)) else {
                continue;
            };

            let to_target = target_pos - *body.translation();
            let bearing = angle::of_vector(to_target.x, to_target.y);
            projectile.heading = steer_toward(projectile.heading, bearing, rocket.gain);

            let dir = vector![projectile.heading.cos(), projectile.heading.sin()];
            body.set_linvel(dir * projectile.speed, true);
            body.set_rotation(Rotation::new(projectile.heading), true);
        }
    }

    /// Apply the outcome of every projectile collision raised this tick
    /// Tag one sub-step's collision events with where the projectile was
    pub(super) fn record_impacts(&self, events: Vec<CollisionEvent>, impacts: &mut Vec<Impact>) {
        for event in events {
            let at = [event.collider1(), event.collider2()]
                .iter()
                .find_map(|c| match self.entities.get(c) {
                    Some(EntityRef::Projectile(id)) => self.projectiles.get(id),
                    _ => None,
                })
                .and_then(|p| self.projectile_position(p));
            impacts.push(Impact { event, at });
        }
    }

    pub(super) fn resolve_collisions(&mut self, impacts: Vec<Impact>) {
        let mut spent: HashSet<Uuid> = HashSet::new();

        for Impact { event, at } in impacts {
            let a = self.entities.get(&event.collider1()).copied();
            let b = self.entities.get(&event.collider2()).copied();
            let (projectile_id, other) = match (a, b) {
                (Some(EntityRef::Projectile(p)), Some(other))
                | (Some(other), Some(EntityRef::Projectile(p))) => (p, other),
                _ => continue,
            };
            if spent.contains(&projectile_id) {
                continue;
            }
            let Some(projectile) = self.projectiles.get(&projectile_id) else {
                continue;
            };

            match (projectile.kind, other) {
                (ProjectileKind::Bullet, EntityRef::Target(target_id)) => {
                    if let Some(target) = self.targets.get_mut(&target_id) {
                        target.damage(projectile.damage);
                        debug!(target_id, hp = target.hp, "Bullet hit");
                    }
                    spent.insert(projectile_id);
                }
                (ProjectileKind::Bullet, EntityRef::Terrain) => {
                    spent.insert(projectile_id);
                }
                (ProjectileKind::Rocket(rocket), EntityRef::Target(_) | EntityRef::Terrain) => {
                    // blast centred where the rocket made contact
                    if let Some(center) = at.or_else(|| self.projectile_position(projectile)) {
                        let damage = projectile.damage;
                        self.explode(center, damage, &rocket);
                    }
                    spent.insert(projectile_id);
                }
                _ => {}
            }
        }

        for id in spent {
            self.destroy_projectile(id);
        }
    }

    /// Damage and push every target inside the blast, and leave a visual
    fn explode(&mut self, center: Vector<Real>, damage: f32, rocket: &Rocket) {
        let positions: Vec<(TargetId, Vector<Real>)> = self
            .targets
            .iter()
            .filter_map(|(&id, t)| t.position(&self.physics).map(|p| (id, p)))
            .collect();
        let hits = blast_impulses(
            center,
            rocket.explosion_radius,
            rocket.explosion_impulse,
            positions,
        );

        for (target_id, impulse) in hits {
            let Some(target) = self.targets.get_mut(&target_id) else {
                continue;
            };
            target.damage(damage);
            if let Some(body) = self.physics.body_mut(target.body) {
                body.apply_impulse(impulse, true);
            }
        }

        self.explosions.push(Explosion {
            pos: center,
            radius: rocket.explosion_radius,
            ttl: EXPLOSION_TTL,
        });
        debug!(x = center.x, y = center.y, "Rocket exploded");
    }

    /// Recompute every beam from its cannon to the nearest obstruction and
    /// apply dwell damage
    pub(super) fn update_beams(&mut self) {
        let beams: Vec<(Uuid, SessionId)> = self
            .projectiles
            .values()
            .filter(|p| matches!(p.kind, ProjectileKind::Laser(_)))
            .map(|p| (p.id, p.owner))
            .collect();
        if beams.is_empty() {
            return;
        }
        self.physics.update_queries();

        let (width, height) = (self.settings.map_width, self.settings.map_height);
        for (beam_id, owner) in beams {
            let Some(car_pos) = self.cars.get(&owner).and_then(|c| c.position(&self.physics))
            else {
                self.destroy_projectile(beam_id);
                continue;
            };
            let Some(weapon) = self.cars.get(&owner).and_then(|c| c.weapon()) else {
                self.destroy_projectile(beam_id);
                continue;
            };

            let aim = weapon.aim;
            let origin = weapon.muzzle(car_pos);
            let dir = vector![aim.cos(), aim.sin()];
            let wall = boundary_distance(origin, dir, width, height);

            let hit = self
                .physics
                .cast_ray(
                    Point::from(origin),
                    dir,
                    wall,
                    InteractionGroups::new(GROUP_PROJECTILE, GROUP_TARGET),
                )
                .and_then(|(collider, toi)| match self.entities.get(&collider) {
                    Some(EntityRef::Target(id)) => Some((*id, toi)),
                    _ => None,
                });

            let (end, touching) = match hit {
                Some((target_id, toi)) => (origin + dir * toi, Some(target_id)),
                None => (origin + dir * wall, None),
            };

            let mut damage = None;
            if let Some(weapon) = self.cars.get_mut(&owner).and_then(|c| c.weapon_mut()) {
                if let Some(beam) = weapon.beam_mut() {
                    beam.contact = Some([end.x, end.y]);
                }
                if touching.is_some() && weapon.dwell_elapsed() {
                    damage = Some(weapon.damage);
                }
            }
            if let (Some(target_id), Some(amount)) = (touching, damage) {
                if let Some(target) = self.targets.get_mut(&target_id) {
                    target.damage(amount);
                }
            }
            if let Some(projectile) = self.projectiles.get_mut(&beam_id) {
                projectile.kind = ProjectileKind::Laser(Laser {
                    origin,
                    end,
                    target: touching,
                });
                projectile.heading = aim;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::approx_eq;
    use std::f32::consts::{FRAC_PI_2, PI};

    #[test]
    fn steering_never_overshoots_the_bearing() {
        assert!(approx_eq(steer_toward(0.0, 0.03, 0.06), 0.03, 1e-6));
        assert!(approx_eq(steer_toward(0.0, FRAC_PI_2, 0.06), 0.06, 1e-6));
        // turns the short way across zero
        let h = steer_toward(0.1, 2.0 * PI - 0.1, 0.06);
        assert!(approx_eq(h, 0.04, 1e-5));
    }

    #[test]
    fn rocket_heading_converges_on_a_fixed_bearing() {
        let bearing = 2.5;
        let gain = 0.06;
        let mut heading = 0.0;
        let mut last_error = angle::wrapped_difference(heading, bearing);
        let bound = (PI / gain).ceil() as usize + 1;

        for _ in 0..bound {
            heading = steer_toward(heading, bearing, gain);
            let error = angle::wrapped_difference(heading, bearing);
            assert!(error <= last_error + 1e-6);
            assert!(last_error - error <= gain + 1e-6);
            last_error = error;
        }
        assert!(last_error < 1e-5);
    }

    #[test]
    fn blast_covers_strictly_inside_only() {
        let center = vector![0.0, 0.0];
        let hits = blast_impulses(
            center,
            100.0,
            10.0,
            vec![
                (1, vector![99.0, 0.0]),
                (2, vector![101.0, 0.0]),
                (3, vector![0.0, -50.0]),
                (4, vector![100.0, 0.0]),
            ],
        );
        let ids: Vec<_> = hits.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(approx_eq(hits[0].1.x, 10.0, 1e-5));
        assert!(approx_eq(hits[1].1.y, -10.0, 1e-5));
    }

    #[test]
    fn blast_at_target_centre_gives_no_impulse() {
        let hits = blast_impulses(vector![5.0, 5.0], 10.0, 10.0, vec![(0, vector![5.0, 5.0])]);
        assert_eq!(hits, vec![(0, vector![0.0, 0.0])]);
    }

    #[test]
    fn bounds_include_the_margin_on_every_side() {
        let oob = |x: f32, y: f32| out_of_bounds(vector![x, y], 1280.0, 720.0, 100.0);
        assert!(!oob(1280.0 + 100.0, 10.0));
        assert!(oob(1280.0 + 150.0, 10.0));
        assert!(!oob(-100.0, 10.0));
        assert!(oob(-101.0, 10.0));
        assert!(!oob(10.0, 720.0 + 100.0));
        assert!(oob(10.0, 720.0 + 101.0));
        assert!(!oob(10.0, -100.0));
        assert!(oob(10.0, -101.0));
    }

    #[test]
    fn boundary_distance_picks_nearest_edge() {
        let d = boundary_distance(vector![100.0, 100.0], vector![1.0, 0.0], 1280.0, 720.0);
        assert!(approx_eq(d, 1180.0, 1e-3));
        let d = boundary_distance(vector![100.0, 100.0], vector![0.0, -1.0], 1280.0, 720.0);
        assert!(approx_eq(d, 100.0, 1e-3));
        let diag = vector![1.0f32, 1.0].normalize();
        let d = boundary_distance(vector![0.0, 0.0], diag, 100.0, 50.0);
        assert!(approx_eq(d, 50.0 * 2f32.sqrt(), 1e-3));
    }
}
