//! Periodic angle utilities.
//!
//! Rotational joint limits are cyclic quantities: a limit pair may be
//! authored as `[170°, 190°]`, `[-270°, -90°]`, or any other aliased form,
//! and a measured angle can sit anywhere on the circle. These helpers
//! normalize limits once at construction time and clamp measured angles
//! against them during the solve.

use std::f32::consts::{PI, TAU};

/// Remove whole turns from `angle`, truncating toward zero.
///
/// The result lies in `(-2π, 2π)`; the sign of the input is preserved.
pub fn remove_full_turns(angle: f32) -> f32 {
    angle - TAU * (angle / TAU).trunc()
}

/// Normalize a `(min, max)` angle-limit pair into `[-π, π]`, swapping the
/// two when they arrive out of order.
///
/// Out-of-range authored limits are never rejected; they are aliased into
/// range here, once, at constraint construction.
pub fn normalize_angle_limits(min: f32, max: f32) -> (f32, f32) {
    let mut max = remove_full_turns(max);
    if max > PI {
        max -= TAU;
    }
    let mut min = remove_full_turns(min);
    if min > PI {
        min -= TAU;
    }
    if min > max {
        (max, min)
    } else {
        (min, max)
    }
}

/// Clamp `angle` to the cyclic range `[min, max]`.
///
/// `min` and `max` must already be aliased into `[-π, π]` (see
/// [`normalize_angle_limits`]). The invalid arc between `max` and `min+2π`
/// is split by its bisector: angles in the half nearer `max` clamp to
/// `max`, angles in the half nearer `min` clamp to `min`.
///
/// ```text
///                max
///                  \
///                   \
///                    (o)--------> 0
///                 .-'  \
///              .-'      \
///     bisector           min
/// ```
pub fn clamp_angle(angle: f32, min: f32, max: f32) -> f32 {
    if angle >= min && angle <= max {
        return angle;
    }
    let bisector = max + 0.5 * (TAU - (max - min));
    let aliased = remove_full_turns(angle);
    if (aliased > max && aliased < bisector) || aliased < bisector - TAU {
        max
    } else if aliased < min || aliased > bisector {
        min
    } else {
        aliased
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
