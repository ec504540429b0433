//! Angle helpers shared by steering, rocket guidance and direction checks

use std::f32::consts::{PI, TAU};

/// Normalize an angle into [0, 2π)
pub fn normalize(angle: f32) -> f32 {
    let a = angle.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if a >= TAU {
        0.0
    } else {
        a
    }
}

/// Signed shortest rotation from `from` to `to`, in (-π, π]
pub fn shortest_delta(from: f32, to: f32) -> f32 {
    let d = normalize(to) - normalize(from);
    if d > PI {
        d - TAU
    } else if d <= -PI {
        d + TAU
    } else {
        d
    }
}

/// Unsigned wrapped difference between two angles, in [0, π]
pub fn wrapped_difference(a: f32, b: f32) -> f32 {
    let d = (normalize(a) - normalize(b)).abs();
    d.min(TAU - d)
}

/// Direction angle of a 2D vector; (0, 0) maps to 0
pub fn of_vector(x: f32, y: f32) -> f32 {
    normalize(y.atan2(x))
}
