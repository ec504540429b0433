//! Mounted weapons: cooldown, ammunition, aim and rocket lock-on

use rapier2d::prelude::*;
use uuid::Uuid;

use crate::net::protocol::TargetId;

/// Ticks-based attack cooldown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cooldown {
    pub remaining: u32,
    pub total: u32,
}

impl Cooldown {
    pub fn new(total: u32) -> Self {
        Self {
            remaining: 0,
            total,
        }
    }

    pub fn ready(&self) -> bool {
        self.remaining == 0
    }

    pub fn tick(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }

    pub fn reset(&mut self) {
        self.remaining = self.total;
    }
}

/// Rocket launcher target acquisition
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LockOn {
    /// Target currently under the cursor
    pub candidate: Option<TargetId>,
    /// Target attached to the next rocket
    pub locked: Option<TargetId>,
    /// 0 to 100; the candidate locks at 100
    pub progress: u8,
}

/// Cursor distance from a target that still counts as aiming at it
pub const LOCK_RADIUS: f32 = 40.0;
/// Lock progress gained per qualifying tick
pub const LOCK_STEP: u8 = 5;

impl LockOn {
    /// Advance or reset lock-on given the target nearest the cursor, if it
    /// lies within [`LOCK_RADIUS`]
    pub fn update(&mut self, under_cursor: Option<TargetId>) {
        match under_cursor {
            None => *self = LockOn::default(),
            Some(id) if self.candidate != Some(id) => {
                *self = LockOn {
                    candidate: Some(id),
                    locked: None,
                    progress: 0,
                };
            }
            Some(id) => {
                self.progress = self.progress.saturating_add(LOCK_STEP).min(100);
                if self.progress >= 100 {
                    self.locked = Some(id);
                }
            }
        }
    }

    /// Drop every reference to a removed target
    pub fn forget(&mut self, id: TargetId) {
        if self.candidate == Some(id) || self.locked == Some(id) {
            *self = LockOn::default();
        }
    }
}

/// Laser cannon beam bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Beam {
    /// Beam entity, present only while firing
    pub active: Option<Uuid>,
    /// Where the beam currently ends
    pub contact: Option<[f32; 2]>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WeaponKind {
    MachineGun,
    RocketLauncher(LockOn),
    LaserCannon(Beam),
}

/// Projectile flight and explosion constants
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ballistics {
    pub bullet_speed: f32,
    pub rocket_speed: f32,
    /// Maximum rocket turn per tick, radians
    pub tracking_gain: f32,
    pub explosion_radius: f32,
    pub explosion_impulse: f32,
    /// Laser ammunition used per tick of firing
    pub laser_drain: f32,
}

impl Default for Ballistics {
    fn default() -> Self {
        Self {
            bullet_speed: 900.0,
            rocket_speed: 450.0,
            tracking_gain: 0.06,
            explosion_radius: 120.0,
            explosion_impulse: 40_000.0,
            laser_drain: 0.25,
        }
    }
}

/// What a successful shot produces
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShotKind {
    Bullet,
    Rocket {
        target: Option<TargetId>,
        gain: f32,
        explosion_radius: f32,
        explosion_impulse: f32,
    },
    Laser,
}

/// A projectile to be spawned by the world
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shot {
    pub kind: ShotKind,
    pub origin: Vector<Real>,
    pub heading: f32,
    pub speed: f32,
    pub damage: f32,
}

/// A weapon mounted on a car
#[derive(Debug, Clone, PartialEq)]
pub struct Weapon {
    pub kind: WeaponKind,
    pub damage: f32,
    pub cooldown: Cooldown,
    pub ammo: f32,
    /// World-space aim angle
    pub aim: f32,
    /// Muzzle position relative to the car, before rotation by `aim`
    pub muzzle_offset: Vector<Real>,
    pub ballistics: Ballistics,
}

impl Weapon {
    pub fn machine_gun() -> Self {
        Self {
            kind: WeaponKind::MachineGun,
            damage: 20.0,
            cooldown: Cooldown::new(10),
            ammo: 500.0,
            aim: 0.0,
            muzzle_offset: vector![15.0, -4.0],
            ballistics: Ballistics::default(),
        }
    }

    pub fn rocket_launcher() -> Self {
        Self {
            kind: WeaponKind::RocketLauncher(LockOn::default()),
            damage: 300.0,
            cooldown: Cooldown::new(60),
            ammo: 500.0,
            aim: 0.0,
            muzzle_offset: vector![18.0, 0.0],
            ballistics: Ballistics::default(),
        }
    }

    /// The cooldown here is the dwell between damage applications
    pub fn laser_cannon() -> Self {
        Self {
            kind: WeaponKind::LaserCannon(Beam::default()),
            damage: 5.0,
            cooldown: Cooldown::new(6),
            ammo: 500.0,
            aim: 0.0,
            muzzle_offset: vector![25.0, 0.0],
            ballistics: Ballistics::default(),
        }
    }

    pub fn with_ammo(mut self, ammo: f32) -> Self {
        self.ammo = ammo;
        self
    }

    /// Muzzle position in world space for a car at `car_pos`
    pub fn muzzle(&self, car_pos: Vector<Real>) -> Vector<Real> {
        let rotation = Rotation::new(self.aim);
        car_pos + rotation * self.muzzle_offset
    }

    /// Advance the cooldown by one tick
    pub fn tick(&mut self) {
        self.cooldown.tick();
    }

    /// Fire if possible.
    ///
    /// Machine guns and launchers need an elapsed cooldown and a whole round.
    /// The laser drains ammunition every tick it is held and only yields a
    /// shot when a new beam has to be created.
    pub fn shoot(&mut self, car_pos: Vector<Real>) -> Option<Shot> {
        let origin = self.muzzle(car_pos);
        let heading = self.aim;
        let b = self.ballistics;

        if let WeaponKind::LaserCannon(beam) = &mut self.kind {
            if self.ammo <= 0.0 {
                return None;
            }
            self.ammo = (self.ammo - b.laser_drain).max(0.0);
            if beam.active.is_some() {
                return None;
            }
            return Some(Shot {
                kind: ShotKind::Laser,
                origin,
                heading,
                speed: 0.0,
                damage: self.damage,
            });
        }

        if !self.cooldown.ready() || self.ammo < 1.0 {
            return None;
        }
        self.ammo -= 1.0;
        self.cooldown.reset();

        let (kind, speed) = match &self.kind {
            WeaponKind::RocketLauncher(lock) => (
                ShotKind::Rocket {
                    target: lock.locked,
                    gain: b.tracking_gain,
                    explosion_radius: b.explosion_radius,
                    explosion_impulse: b.explosion_impulse,
                },
                b.rocket_speed,
            ),
            _ => (ShotKind::Bullet, b.bullet_speed),
        };
        Some(Shot {
            kind,
            origin,
            heading,
            speed,
            damage: self.damage,
        })
    }

    /// Stop firing. Returns the beam entity to destroy, if there was one.
    pub fn release(&mut self) -> Option<Uuid> {
        match &mut self.kind {
            WeaponKind::LaserCannon(beam) => {
                beam.contact = None;
                beam.active.take()
            }
            _ => None,
        }
    }

    /// Record the beam entity created for this cannon
    pub fn attach_beam(&mut self, id: Uuid) {
        if let WeaponKind::LaserCannon(beam) = &mut self.kind {
            beam.active = Some(id);
        }
    }

    /// Whether the laser may apply damage this tick; restarts the dwell
    pub fn dwell_elapsed(&mut self) -> bool {
        if self.cooldown.ready() {
            self.cooldown.reset();
            true
        } else {
            false
        }
    }

    pub fn lock_on(&self) -> Option<&LockOn> {
        match &self.kind {
            WeaponKind::RocketLauncher(lock) => Some(lock),
            _ => None,
        }
    }

    pub fn lock_on_mut(&mut self) -> Option<&mut LockOn> {
        match &mut self.kind {
            WeaponKind::RocketLauncher(lock) => Some(lock),
            _ => None,
        }
    }

    pub fn beam(&self) -> Option<&Beam> {
        match &self.kind {
            WeaponKind::LaserCannon(beam) => Some(beam),
            _ => None,
        }
    }

    pub fn beam_mut(&mut self) -> Option<&mut Beam> {
        match &mut self.kind {
            WeaponKind::LaserCannon(beam) => Some(beam),
            _ => None,
        }
    }
}
