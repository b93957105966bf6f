//! Quaternion helpers built on [`nalgebra::UnitQuaternion`].
//!
//! Conventions used throughout the workspace: rotations act on vectors as
//! `q * v`, and composition `parent * local` applies `local` first. All
//! public helpers renormalize their results so downstream transform chains
//! stay on the unit hypersphere.

use nalgebra::{Quaternion, Unit, UnitQuaternion, Vector3};
use std::f32::consts::PI;

/// Norm below which a vector is treated as degenerate.
const MIN_AXIS_NORM_SQUARED: f32 = 1.0e-12;

/// A unit axis perpendicular to `v`.
///
/// Tries the x-axis cross first, falling back to the y-axis when `v` is
/// parallel to x. The candidate ordering is fixed so degenerate geometry
/// resolves the same way on every run.
pub fn any_perpendicular(v: &Vector3<f32>) -> Unit<Vector3<f32>> {
    let p = Vector3::x().cross(v);
    if p.norm_squared() > MIN_AXIS_NORM_SQUARED {
        Unit::new_normalize(p)
    } else {
        Unit::new_normalize(v.cross(&Vector3::y()))
    }
}

/// The unit quaternion rotating direction `from` onto direction `to`.
///
/// Inputs need not be normalized. Degenerate inputs produce the identity;
/// the antipodal case rotates by pi about an arbitrary perpendicular axis
/// chosen by [`any_perpendicular`].
pub fn shortest_arc(from: &Vector3<f32>, to: &Vector3<f32>) -> UnitQuaternion<f32> {
    if from.norm_squared() < MIN_AXIS_NORM_SQUARED || to.norm_squared() < MIN_AXIS_NORM_SQUARED {
        return UnitQuaternion::identity();
    }
    match UnitQuaternion::rotation_between(from, to) {
        Some(q) => q,
        None => UnitQuaternion::from_axis_angle(&any_perpendicular(from), PI),
    }
}

/// Normalized linear interpolation from `from` toward `to` by fraction `t`.
///
/// The target is sign-flipped onto the hemisphere of `from` before
/// interpolating, so the blend always takes the short way around.
pub fn nlerp(
    t: f32,
    from: &UnitQuaternion<f32>,
    to: &UnitQuaternion<f32>,
) -> UnitQuaternion<f32> {
    let a = from.quaternion();
    let mut b = *to.quaternion();
    if a.coords.dot(&b.coords) < 0.0 {
        b = -b;
    }
    UnitQuaternion::new_normalize(a.lerp(&b, t))
}

/// Whether two rotations agree within `tolerance`, component-wise.
///
/// Quaternions double-cover rotation space, so `q` and `-q` are the same
/// rotation; both sign pairings are checked.
pub fn almost_equal(a: &UnitQuaternion<f32>, b: &UnitQuaternion<f32>, tolerance: f32) -> bool {
    let a = &a.quaternion().coords;
    let b = &b.quaternion().coords;
    (a - b).amax() <= tolerance || (a + b).amax() <= tolerance
}

/// Component-wise quaternion accumulator with hemisphere correction.
///
/// Summands whose scalar part is negative are negated before adding, which
/// keeps all contributions on one hypersphere and makes the normalized
/// average deterministic for a given push order.
#[derive(Debug, Clone)]
pub struct QuatAccumulator {
    sum: Quaternion<f32>,
    count: usize,
}

impl QuatAccumulator {
    pub fn new() -> Self {
        Self {
            sum: Quaternion::new(0.0, 0.0, 0.0, 0.0),
            count: 0,
        }
    }

    /// Add one rotation to the running sum.
    pub fn push(&mut self, q: &UnitQuaternion<f32>) {
        let q = *q.quaternion();
        if q.w < 0.0 {
            self.sum -= q;
        } else {
            self.sum += q;
        }
        self.count += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The normalized average, or `None` when nothing was pushed or the
    /// contributions cancelled out.
    pub fn average(&self) -> Option<UnitQuaternion<f32>> {
        if self.count == 0 || self.sum.norm_squared() < MIN_AXIS_NORM_SQUARED {
            return None;
        }
        Some(UnitQuaternion::new_normalize(self.sum))
    }
}

impl Default for QuatAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
