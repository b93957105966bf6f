//! Hinge-style constraints: elbow, knee, and the double-limited hinge.

use nalgebra::{UnitQuaternion, Vector3};
use std::f32::consts::FRAC_PI_2;
use std::hash::Hasher;

use armature_core::{clamp_angle, normalize_angle_limits, remove_full_turns, shortest_arc};

use super::{TwistBehavior, hash_f32, hash_vec3, renorm};

/// Orthonormalize `pivot` against `forward`: the component of `pivot`
/// perpendicular to `forward`, normalized.
fn orthonormal_pivot(forward: &Vector3<f32>, pivot: &Vector3<f32>) -> Vector3<f32> {
    forward.cross(&pivot.cross(forward)).normalize()
}

// ---------------------------------------------------------------------------
// ElbowConstraint
// ---------------------------------------------------------------------------

/// A limited hinge about `pivot` with limited twist about `forward`.
///
/// ```text
/// View from the side,             View with forward axis out of page:
/// with pivot axis out of page:
///                                      up  max_twist
///        / max_bend                     | /
///       /                               |/
///  ---(o)--------+  forward        ----(o)----> left
///       \                              /|
///        \ min_bend                   / |
///                              min_twist
/// ```
#[derive(Debug, Clone)]
pub struct ElbowConstraint {
    forward: Vector3<f32>,
    pivot: Vector3<f32>,
    pivot_x_forward: Vector3<f32>,
    min_bend: f32,
    max_bend: f32,
    min_twist: f32,
    max_twist: f32,
}

impl ElbowConstraint {
    pub fn new(
        forward_axis: Vector3<f32>,
        pivot_axis: Vector3<f32>,
        min_bend: f32,
        max_bend: f32,
        min_twist: f32,
        max_twist: f32,
    ) -> Self {
        let forward = forward_axis.normalize();
        let pivot = orthonormal_pivot(&forward, &pivot_axis);
        let pivot_x_forward = pivot.cross(&forward);
        let (min_bend, max_bend) = normalize_angle_limits(min_bend, max_bend);
        let (min_twist, max_twist) = normalize_angle_limits(min_twist, max_twist);
        Self {
            forward,
            pivot,
            pivot_x_forward,
            min_bend,
            max_bend,
            min_twist,
            max_twist,
        }
    }

    pub fn forward_axis(&self) -> &Vector3<f32> {
        &self.forward
    }

    pub fn pivot_axis(&self) -> &Vector3<f32> {
        &self.pivot
    }

    pub fn twist_behavior(&self) -> TwistBehavior {
        TwistBehavior::Limited(self.min_twist, self.max_twist)
    }

    pub fn twist_limits(&self) -> (f32, f32) {
        (self.min_twist, self.max_twist)
    }

    pub fn compute_adjusted_local_rot(
        &self,
        local_rot: &UnitQuaternion<f32>,
    ) -> UnitQuaternion<f32> {
        // Swing the rotated forward back into the hinge plane.
        let forward = local_rot * self.forward;
        let projected_forward = forward - forward.dot(&self.pivot) * self.pivot;
        let mut adjusted = renorm(shortest_arc(&forward, &projected_forward) * local_rot);
        let mut new_forward = adjusted * self.forward;

        // Twist about forward, measured by how far the pivot strays.
        let twisted_pivot = adjusted * self.pivot;
        let cos_part = twisted_pivot.dot(&self.pivot);
        let sin_part = (adjusted * self.pivot_x_forward).dot(&self.pivot);
        let twist = sin_part.atan2(cos_part);

        let new_twist = clamp_angle(twist, self.min_twist, self.max_twist);
        if new_twist != twist {
            let swung_left_axis = self.pivot.cross(&new_forward);
            let new_twisted_pivot =
                new_twist.cos() * self.pivot - new_twist.sin() * swung_left_axis;
            adjusted = renorm(shortest_arc(&twisted_pivot, &new_twisted_pivot) * adjusted);
            new_forward = adjusted * self.forward;
        }

        // Bend in the hinge plane.
        let bend = new_forward
            .dot(&self.pivot_x_forward)
            .atan2(new_forward.dot(&self.forward));
        let new_bend = clamp_angle(bend, self.min_bend, self.max_bend);
        if new_bend != bend {
            let target_forward =
                new_bend.cos() * self.forward + new_bend.sin() * self.pivot_x_forward;
            adjusted = renorm(shortest_arc(&new_forward, &target_forward) * adjusted);
        }
        adjusted
    }

    pub(super) fn hash_params<H: Hasher>(&self, state: &mut H) {
        hash_vec3(state, &self.pivot);
        hash_f32(state, self.min_bend);
        hash_f32(state, self.max_bend);
        hash_f32(state, self.min_twist);
        hash_f32(state, self.max_twist);
    }
}

// ---------------------------------------------------------------------------
// KneeConstraint
// ---------------------------------------------------------------------------

/// A limited hinge about `pivot` with no twist at all.
///
/// ```text
/// View from the side, with pivot axis out of page:
///
///        / max_bend
///       /
///  ---(o)--------+
///       \
///        \ min_bend
/// ```
#[derive(Debug, Clone)]
pub struct KneeConstraint {
    forward: Vector3<f32>,
    pivot: Vector3<f32>,
    pivot_x_forward: Vector3<f32>,
    min_bend: f32,
    max_bend: f32,
}

impl KneeConstraint {
    pub fn new(
        forward_axis: Vector3<f32>,
        pivot_axis: Vector3<f32>,
        min_bend: f32,
        max_bend: f32,
    ) -> Self {
        let forward = forward_axis.normalize();
        let pivot = orthonormal_pivot(&forward, &pivot_axis);
        let pivot_x_forward = pivot.cross(&forward);
        let (min_bend, max_bend) = normalize_angle_limits(min_bend, max_bend);
        Self {
            forward,
            pivot,
            pivot_x_forward,
            min_bend,
            max_bend,
        }
    }

    pub fn forward_axis(&self) -> &Vector3<f32> {
        &self.forward
    }

    pub fn pivot_axis(&self) -> &Vector3<f32> {
        &self.pivot
    }

    pub fn compute_adjusted_local_rot(
        &self,
        local_rot: &UnitQuaternion<f32>,
    ) -> UnitQuaternion<f32> {
        // Pin the pivot axis: whatever rotation remains is pure bend.
        let joint_pivot = local_rot * self.pivot;
        let mut adjusted = renorm(shortest_arc(&joint_pivot, &self.pivot) * local_rot);

        let forward = adjusted * self.forward;
        let bend = forward
            .dot(&self.pivot_x_forward)
            .atan2(forward.dot(&self.forward));
        let new_bend = clamp_angle(bend, self.min_bend, self.max_bend);
        if new_bend != bend {
            let target_forward =
                new_bend.cos() * self.forward + new_bend.sin() * self.pivot_x_forward;
            adjusted = renorm(shortest_arc(&forward, &target_forward) * adjusted);
        }
        adjusted
    }

    pub(super) fn hash_params<H: Hasher>(&self, state: &mut H) {
        hash_vec3(state, &self.pivot);
        hash_f32(state, self.min_bend);
        hash_f32(state, self.max_bend);
    }
}

// ---------------------------------------------------------------------------
// DoubleLimitedHinge
// ---------------------------------------------------------------------------

/// Independent yaw and pitch limits with zero twist, for wrists and first
/// finger bones.
///
/// ```text
/// View from above                     View from right
/// with up out of page                 (right-hand rule)
///
///   left_axis                            up_axis
///      |                                   |
///      | / max_yaw                         | / min_pitch
///      |/                                  |/
///  ---(o)--------> forward_axis        ---(x)--------> forward_axis
///    up \                              left \
///        \ min_yaw                           \ max_pitch
/// ```
#[derive(Debug, Clone)]
pub struct DoubleLimitedHinge {
    forward: Vector3<f32>,
    up: Vector3<f32>,
    left: Vector3<f32>,
    min_yaw: f32,
    max_yaw: f32,
    min_pitch: f32,
    max_pitch: f32,
}

impl DoubleLimitedHinge {
    pub fn new(
        forward_axis: Vector3<f32>,
        up_axis: Vector3<f32>,
        min_yaw: f32,
        max_yaw: f32,
        min_pitch: f32,
        max_pitch: f32,
    ) -> Self {
        let forward = forward_axis.normalize();
        let up = forward.cross(&up_axis.cross(&forward)).normalize();
        let left = up.cross(&forward);
        let (min_yaw, max_yaw) = normalize_angle_limits(min_yaw, max_yaw);

        // Pitch is structurally confined to [-pi/2, pi/2].
        let mut min_pitch = remove_full_turns(min_pitch).clamp(-FRAC_PI_2, FRAC_PI_2);
        let mut max_pitch = remove_full_turns(max_pitch).clamp(-FRAC_PI_2, FRAC_PI_2);
        if min_pitch > max_pitch {
            std::mem::swap(&mut min_pitch, &mut max_pitch);
        }

        Self {
            forward,
            up,
            left,
            min_yaw,
            max_yaw,
            min_pitch,
            max_pitch,
        }
    }

    pub fn forward_axis(&self) -> &Vector3<f32> {
        &self.forward
    }

    pub fn compute_adjusted_local_rot(
        &self,
        local_rot: &UnitQuaternion<f32>,
    ) -> UnitQuaternion<f32> {
        // Remove twist: the rotated left axis must stay in the horizontal
        // plane.
        let joint_left = local_rot * self.left;
        let flattened_left = joint_left - joint_left.dot(&self.up) * self.up;
        let mut adjusted = renorm(shortest_arc(&joint_left, &flattened_left) * local_rot);

        let forward = adjusted * self.forward;

        // Yaw in the horizontal plane.
        let mut up_component = forward.dot(&self.up);
        let mut horizontal_axis = forward - up_component * self.up;
        let yaw = horizontal_axis
            .dot(&self.left)
            .atan2(horizontal_axis.dot(&self.forward));
        let new_yaw = clamp_angle(yaw, self.min_yaw, self.max_yaw);
        if new_yaw != yaw {
            horizontal_axis = new_yaw.cos() * self.forward + new_yaw.sin() * self.left;
        } else {
            horizontal_axis.normalize_mut();
        }

        // Pitch against the horizontal. The minus sign follows the
        // right-hand rule about the left axis: positive pitch drops the
        // forward direction.
        let mut horizontal_component = (1.0 - up_component * up_component).max(0.0).sqrt();
        let pitch = (-up_component).atan2(horizontal_component);
        let new_pitch = clamp_angle(pitch, self.min_pitch, self.max_pitch);
        if new_pitch != pitch {
            up_component = -new_pitch.sin();
            horizontal_component = (1.0 - up_component * up_component).max(0.0).sqrt();
        }

        let new_forward =
            (horizontal_component * horizontal_axis + up_component * self.up).normalize();
        if (forward - new_forward).norm() > 1.0e-3 {
            adjusted = renorm(shortest_arc(&forward, &new_forward) * adjusted);
        }
        adjusted
    }

    pub(super) fn hash_params<H: Hasher>(&self, state: &mut H) {
        hash_vec3(state, &self.up);
        hash_f32(state, self.min_yaw);
        hash_f32(state, self.max_yaw);
        hash_f32(state, self.min_pitch);
        hash_f32(state, self.max_pitch);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
