//! Car dynamics: two-contact ("bicycle") steering model
//!
//! A car is one rigid body with a front and a back contact point on its
//! longitudinal axis. Every tick the drive force is applied at the back
//! contact, the steering angle relaxes toward the requested side, and both
//! contact constraints are rebuilt at the current pose. Each constraint only
//! lets its contact point slide along the direction its wheel points.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_6};

use rapier2d::prelude::*;

use crate::input::{InputSnapshot, Steer, Throttle};
use crate::net::protocol::{CarState, SessionId};
use crate::util::angle;

use super::physics::{car_groups, PhysicsWorld};
use super::weapon::Weapon;

/// Car handling constants
#[derive(Debug, Clone, Copy)]
pub struct VehicleSettings {
    pub mass: f32,
    /// Half length along the forward axis
    pub half_length: f32,
    pub half_width: f32,
    /// Distance of each contact point from the body centre
    pub contact_offset: f32,
    /// Full throttle force
    pub drive_force: f32,
    /// Fraction of full force used when the input opposes travel
    pub brake_ratio: f32,
    pub max_steering: f32,
    /// Steering change per tick
    pub steering_increment: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub max_hp: f32,
}

impl Default for VehicleSettings {
    fn default() -> Self {
        Self {
            mass: 1000.0,
            half_length: 35.0,
            half_width: 18.0,
            contact_offset: 30.0,
            drive_force: 300_000.0,
            brake_ratio: 0.2,
            max_steering: FRAC_PI_6,
            steering_increment: 0.03,
            linear_damping: 0.5,
            angular_damping: 2.0,
            max_hp: 250.0,
        }
    }
}

/// Which way the car is travelling relative to where it points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Travel {
    Forward,
    Backward,
}

/// Compare heading with velocity direction, both normalized to [0, 2π).
///
/// Exactly a right angle counts as `Forward`. A stationary car has velocity
/// angle 0 and is compared anyway, so near a dead stop the result can flip
/// between ticks.
pub fn travel_direction(heading: f32, velocity: Vector<Real>) -> Travel {
    let moving = angle::of_vector(velocity.x, velocity.y);
    if angle::wrapped_difference(heading, moving) <= FRAC_PI_2 {
        Travel::Forward
    } else {
        Travel::Backward
    }
}

/// Signed longitudinal force for an input given the direction of travel.
/// Input against the direction of travel brakes at reduced force.
pub fn drive_force(throttle: Throttle, travel: Travel, settings: &VehicleSettings) -> f32 {
    let full = settings.drive_force;
    let brake = full * settings.brake_ratio;
    match (throttle, travel) {
        (Throttle::Neutral, _) => 0.0,
        (Throttle::Forward, Travel::Forward) => full,
        (Throttle::Back, Travel::Forward) => -brake,
        (Throttle::Back, Travel::Backward) => -full,
        (Throttle::Forward, Travel::Backward) => brake,
    }
}

/// Move `current` toward the steering target by at most one increment,
/// then clamp to the steering range
pub fn relax_steering(current: f32, steer: Steer, settings: &VehicleSettings) -> f32 {
    let max = settings.max_steering;
    let target = match steer {
        Steer::Left => -max,
        Steer::Right => max,
        Steer::Straight => 0.0,
    };

    let step = settings.steering_increment;
    let next = if current < target {
        (current + step).min(target)
    } else {
        (current - step).max(target)
    };
    next.clamp(-max, max)
}

/// A player's car
#[derive(Debug)]
pub struct Car {
    pub session: SessionId,
    pub body: RigidBodyHandle,
    pub collider: ColliderHandle,
    pub hp: f32,
    settings: VehicleSettings,
    steering_angle: f32,
    weapon: Option<Weapon>,
    wheels: Option<[ImpulseJointHandle; 2]>,
}

impl Car {
    /// Create the body and its contact constraints
    pub fn spawn(
        physics: &mut PhysicsWorld,
        session: SessionId,
        pos: [f32; 2],
        heading: f32,
        settings: VehicleSettings,
    ) -> Self {
        let area = 4.0 * settings.half_length * settings.half_width;
        let body = RigidBodyBuilder::dynamic()
            .translation(vector![pos[0], pos[1]])
            .rotation(heading)
            .linear_damping(settings.linear_damping)
            .angular_damping(settings.angular_damping)
            .build();
        let collider = ColliderBuilder::cuboid(settings.half_length, settings.half_width)
            .density(settings.mass / area)
            .friction(0.0)
            .restitution(0.1)
            .collision_groups(car_groups())
            .build();
        let (body, collider) = physics.insert(body, collider);

        let mut car = Self {
            session,
            body,
            collider,
            hp: settings.max_hp,
            settings,
            steering_angle: 0.0,
            weapon: None,
            wheels: None,
        };
        car.rebuild_constraints(physics);
        car
    }

    pub fn steering_angle(&self) -> f32 {
        self.steering_angle
    }

    pub fn settings(&self) -> &VehicleSettings {
        &self.settings
    }

    pub fn weapon(&self) -> Option<&Weapon> {
        self.weapon.as_ref()
    }

    pub fn weapon_mut(&mut self) -> Option<&mut Weapon> {
        self.weapon.as_mut()
    }

    /// Mount a weapon, returning the one it replaces
    pub fn set_weapon(&mut self, weapon: Option<Weapon>) -> Option<Weapon> {
        std::mem::replace(&mut self.weapon, weapon)
    }

    /// One tick of driving: force at the back contact, steering relaxation,
    /// then fresh contact constraints
    pub fn drive(&mut self, physics: &mut PhysicsWorld, input: &InputSnapshot) {
        self.steering_angle = relax_steering(self.steering_angle, input.steer, &self.settings);

        let offset = self.settings.contact_offset;
        if let Some(body) = physics.body_mut(self.body) {
            let heading = body.rotation().angle();
            let travel = travel_direction(heading, *body.linvel());
            let magnitude = drive_force(input.throttle, travel, &self.settings);

            let forward = vector![heading.cos(), heading.sin()];
            let back_contact = body.position() * point![-offset, 0.0];

            body.reset_forces(true);
            if magnitude != 0.0 {
                body.add_force_at_point(forward * magnitude, back_contact, true);
            }
        }

        self.rebuild_constraints(physics);
    }

    /// Keep the current steering and re-anchor the constraints without
    /// applying any drive force
    pub fn hold(&mut self, physics: &mut PhysicsWorld) {
        if let Some(body) = physics.body_mut(self.body) {
            body.reset_forces(true);
        }
        self.rebuild_constraints(physics);
    }

    /// Replace both contact constraints with ones anchored at the current pose
    pub fn rebuild_constraints(&mut self, physics: &mut PhysicsWorld) {
        if let Some(old) = self.wheels.take() {
            for handle in old {
                physics.joints.remove(handle, true);
            }
        }

        let Some(body) = physics.body(self.body) else {
            return;
        };
        let pose = *body.position();
        let heading = pose.rotation.angle();
        let offset = self.settings.contact_offset;

        let back = wheel_joint(&pose, vector![-offset, 0.0], heading, heading);
        let front = wheel_joint(
            &pose,
            vector![offset, 0.0],
            heading + self.steering_angle,
            heading,
        );

        let ground = physics.ground;
        let back = physics.joints.insert(ground, self.body, back, true);
        let front = physics.joints.insert(ground, self.body, front, true);
        self.wheels = Some([back, front]);
    }

    /// Current pose as sent on the wire
    pub fn state(&self, physics: &PhysicsWorld) -> Option<CarState> {
        let body = physics.body(self.body)?;
        let pos = body.translation();
        let vel = body.linvel();
        Some(CarState {
            pos: [pos.x, pos.y],
            a_pos: body.rotation().angle(),
            vel: [vel.x, vel.y],
            steering_angle: self.steering_angle,
            wep_angle: self.weapon.as_ref().map(|w| w.aim).unwrap_or(0.0),
        })
    }

    /// Overwrite the pose with an authoritative snapshot
    pub fn apply_state(&mut self, physics: &mut PhysicsWorld, state: &CarState) {
        let max = self.settings.max_steering;
        self.steering_angle = state.steering_angle.clamp(-max, max);
        if let Some(weapon) = self.weapon.as_mut() {
            weapon.aim = state.wep_angle;
        }

        if let Some(body) = physics.body_mut(self.body) {
            body.set_position(
                Isometry::new(vector![state.pos[0], state.pos[1]], state.a_pos),
                true,
            );
            body.set_linvel(vector![state.vel[0], state.vel[1]], true);
            body.set_angvel(0.0, true);
        }
        self.rebuild_constraints(physics);
    }

    pub fn position(&self, physics: &PhysicsWorld) -> Option<Vector<Real>> {
        physics.body(self.body).map(|b| *b.translation())
    }

    /// Remove the body, its collider and constraints
    pub fn despawn(mut self, physics: &mut PhysicsWorld) {
        self.wheels = None;
        physics.remove(self.body);
    }
}

/// Constraint that keeps a contact point on the line through its current
/// position along `wheel_angle`
fn wheel_joint(
    pose: &Isometry<Real>,
    local_contact: Vector<Real>,
    wheel_angle: f32,
    heading: f32,
) -> GenericJoint {
    let anchor = pose * Point::from(local_contact);
    GenericJointBuilder::new(JointAxesMask::LIN_Y)
        .local_frame1(Isometry::new(anchor.coords, wheel_angle))
        .local_frame2(Isometry::new(local_contact, wheel_angle - heading))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::approx_eq;
    use std::f32::consts::PI;

    #[test]
    fn steering_left_for_fifty_ticks_hits_the_limit() {
        let settings = VehicleSettings::default();
        let mut angle = 0.0;
        for _ in 0..50 {
            angle = relax_steering(angle, Steer::Left, &settings);
        }
        let expected = -(50.0 * 0.03f32).min(FRAC_PI_6);
        assert!(approx_eq(angle, expected, 1e-5), "got {angle}");
    }

    #[test]
    fn steering_is_gradual() {
        let settings = VehicleSettings::default();
        let angle = relax_steering(0.0, Steer::Right, &settings);
        assert!(approx_eq(angle, 0.03, 1e-6));

        // returns to centre without overshooting
        let angle = relax_steering(0.01, Steer::Straight, &settings);
        assert_eq!(angle, 0.0);
    }

    #[test]
    fn steering_stays_clamped_for_any_sequence() {
        let settings = VehicleSettings::default();
        let sides = [Steer::Left, Steer::Right, Steer::Straight];
        let mut angle = 0.0;
        let mut seed: u32 = 12345;
        for _ in 0..5_000 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let steer = sides[(seed >> 16) as usize % 3];
            angle = relax_steering(angle, steer, &settings);
            assert!(angle.abs() <= settings.max_steering + 1e-6);
        }

        // out-of-range starting values are pulled back in
        let angle = relax_steering(2.0, Steer::Right, &settings);
        assert!(angle <= settings.max_steering);
    }

    #[test]
    fn travel_direction_wraps_around_zero() {
        // heading just below 2π, moving at a small positive angle
        let heading = 2.0 * PI - 0.1;
        let vel = vector![0.1f32.cos(), 0.1f32.sin()];
        assert_eq!(travel_direction(heading, vel), Travel::Forward);

        assert_eq!(
            travel_direction(0.0, vector![-10.0, 0.0]),
            Travel::Backward
        );
        // a dead stop compares against angle 0
        assert_eq!(travel_direction(PI / 4.0, vector![0.0, 0.0]), Travel::Forward);
        assert_eq!(travel_direction(PI, vector![0.0, 0.0]), Travel::Backward);
        assert_eq!(travel_direction(FRAC_PI_2, vector![1.0, 0.0]), Travel::Forward);
    }

    #[test]
    fn braking_uses_reduced_force() {
        let s = VehicleSettings::default();
        assert_eq!(drive_force(Throttle::Forward, Travel::Forward, &s), s.drive_force);
        assert_eq!(drive_force(Throttle::Back, Travel::Forward, &s), -s.drive_force / 5.0);
        assert_eq!(drive_force(Throttle::Back, Travel::Backward, &s), -s.drive_force);
        assert_eq!(drive_force(Throttle::Forward, Travel::Backward, &s), s.drive_force / 5.0);
        assert_eq!(drive_force(Throttle::Neutral, Travel::Backward, &s), 0.0);
    }

    #[test]
    fn full_throttle_moves_the_car_forward() {
        let mut physics = PhysicsWorld::new();
        let mut car = Car::spawn(&mut physics, 0, [100.0, 100.0], 0.0, VehicleSettings::default());
        let input = InputSnapshot {
            throttle: Throttle::Forward,
            ..InputSnapshot::default()
        };
        for _ in 0..30 {
            car.drive(&mut physics, &input);
            for _ in 0..4 {
                physics.step(1.0 / 240.0);
            }
        }
        let state = car.state(&physics).unwrap();
        assert!(state.pos[0] > 100.0, "car did not move: {:?}", state.pos);
        assert!(state.vel[0] > 0.0);
        // the rear constraint keeps it from sliding sideways
        assert!((state.pos[1] - 100.0).abs() < 1.0);
    }

    #[test]
    fn constraints_are_replaced_not_accumulated() {
        let mut physics = PhysicsWorld::new();
        let mut car = Car::spawn(&mut physics, 0, [0.0, 0.0], 0.0, VehicleSettings::default());
        for _ in 0..10 {
            car.hold(&mut physics);
        }
        assert_eq!(physics.joints.len(), 2);
    }

    #[test]
    fn apply_state_overrides_pose_and_clamps_steering() {
        let mut physics = PhysicsWorld::new();
        let mut car = Car::spawn(&mut physics, 3, [0.0, 0.0], 0.0, VehicleSettings::default());
        car.set_weapon(Some(Weapon::machine_gun()));
        let snapshot = CarState {
            pos: [50.0, 60.0],
            a_pos: 1.0,
            vel: [5.0, 0.0],
            steering_angle: 3.0,
            wep_angle: 2.0,
        };
        car.apply_state(&mut physics, &snapshot);

        let state = car.state(&physics).unwrap();
        assert_eq!(state.pos, [50.0, 60.0]);
        assert!(approx_eq(state.a_pos, 1.0, 1e-5));
        assert!(approx_eq(state.steering_angle, FRAC_PI_6, 1e-6));
        assert_eq!(state.wep_angle, 2.0);
    }
}
