//! Input collaborator interface
//!
//! The simulation consumes one [`InputSnapshot`] per tick and never feeds
//! anything back to the source. Keyboard/mouse polling lives outside this
//! crate; the headless client drives cars with a [`ScriptedInput`].

use std::f32::consts::TAU;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Longitudinal input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Throttle {
    Forward,
    Back,
    #[default]
    #[serde(rename = "none")]
    Neutral,
}

/// Steering input. Left steers toward negative angles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Steer {
    Left,
    Right,
    #[default]
    #[serde(rename = "none")]
    Straight,
}

/// Per-tick input snapshot. Every field is optional on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputSnapshot {
    pub throttle: Throttle,
    pub steer: Steer,
    /// Weapon aim angle in world space, radians
    pub aim: f32,
    /// Fire held this tick
    pub fire: bool,
    /// Aim cursor in world space, used for rocket lock-on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<[f32; 2]>,
}

/// A source of per-tick input
pub trait InputSource: Send {
    fn poll(&mut self, tick: u64) -> InputSnapshot;
}

/// Built-in input scripts for headless clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// No input at all
    Idle,
    /// Drive in a circle, firing in bursts
    Circle,
    /// Drive forward weaving left and right, fire held
    Strafe,
    /// Stand still and sweep the weapon around, fire held
    Turret,
}

impl FromStr for Script {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "idle" => Ok(Script::Idle),
            "circle" => Ok(Script::Circle),
            "strafe" => Ok(Script::Strafe),
            "turret" => Ok(Script::Turret),
            _ => Err(()),
        }
    }
}

/// Ticks spent on each side while strafing
const STRAFE_PERIOD: u64 = 90;
/// Turret sweep speed, radians per tick
const TURRET_SWEEP: f32 = 0.02;

/// Deterministic input driven by a [`Script`]
#[derive(Debug, Clone)]
pub struct ScriptedInput {
    script: Script,
}

impl ScriptedInput {
    pub fn new(script: Script) -> Self {
        Self { script }
    }
}

impl InputSource for ScriptedInput {
    fn poll(&mut self, tick: u64) -> InputSnapshot {
        match self.script {
            Script::Idle => InputSnapshot::default(),
            Script::Circle => InputSnapshot {
                throttle: Throttle::Forward,
                steer: Steer::Left,
                aim: (tick as f32 * 0.01) % TAU,
                fire: tick % 120 < 30,
                cursor: None,
            },
            Script::Strafe => InputSnapshot {
                throttle: Throttle::Forward,
                steer: if (tick / STRAFE_PERIOD) % 2 == 0 {
                    Steer::Left
                } else {
                    Steer::Right
                },
                aim: 0.0,
                fire: true,
                cursor: None,
            },
            Script::Turret => InputSnapshot {
                aim: (tick as f32 * TURRET_SWEEP) % TAU,
                fire: true,
                ..InputSnapshot::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_messages_fill_defaults() {
        let input: InputSnapshot = serde_json::from_str(r#"{"steer":"left"}"#).unwrap();
        assert_eq!(input.steer, Steer::Left);
        assert_eq!(input.throttle, Throttle::Neutral);
        assert!(!input.fire);

        let input: InputSnapshot =
            serde_json::from_str(r#"{"throttle":"none","cursor":[3.0,4.0]}"#).unwrap();
        assert_eq!(input.cursor, Some([3.0, 4.0]));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<InputSnapshot>(r#"{"pos":[1.0,2.0]}"#).is_err());
        assert!(serde_json::from_str::<InputSnapshot>(r#"{"steer":"up"}"#).is_err());
    }

    #[test]
    fn strafe_alternates_sides() {
        let mut source = ScriptedInput::new(Script::Strafe);
        assert_eq!(source.poll(0).steer, Steer::Left);
        assert_eq!(source.poll(STRAFE_PERIOD).steer, Steer::Right);
        assert_eq!(source.poll(2 * STRAFE_PERIOD).steer, Steer::Left);
    }

    #[test]
    fn idle_does_nothing() {
        let mut source = ScriptedInput::new(Script::Idle);
        assert_eq!(source.poll(42), InputSnapshot::default());
    }
}
