//! Cone-shaped constraints: uniform, twist-limited, and ellipsoidal.

use nalgebra::{Unit, UnitQuaternion, Vector3};
use std::hash::Hasher;

use armature_core::{any_perpendicular, clamp_angle, normalize_angle_limits, shortest_arc};

use super::{MIN_PERP_LENGTH, TwistBehavior, hash_f32, hash_vec3, renorm};

/// Project `forward` (a rotated forward image) onto the surface of the cone
/// `cos_cone/sin_cone` around `axis`, returning the corrected direction.
fn project_onto_cone(
    forward: &Vector3<f32>,
    axis: &Vector3<f32>,
    forward_component: f32,
    cos_cone: f32,
    sin_cone: f32,
) -> Vector3<f32> {
    let perp = forward - axis * forward_component;
    let perp = perp
        .try_normalize(MIN_PERP_LENGTH)
        .unwrap_or_else(|| *any_perpendicular(axis));
    axis * cos_cone + perp * sin_cone
}

// ---------------------------------------------------------------------------
// SimpleCone
// ---------------------------------------------------------------------------

/// Constrains the forward axis to a uniform cone; twist about forward is
/// unrestricted.
///
/// ```text
///        / max_angle
///       /
///   ---@--------> forward
///       \
///        \ max_angle
/// ```
#[derive(Debug, Clone)]
pub struct SimpleCone {
    forward: Vector3<f32>,
    max_angle: f32,
    cos_cone_angle: f32,
    sin_cone_angle: f32,
}

impl SimpleCone {
    pub fn new(forward_axis: Vector3<f32>, max_angle: f32) -> Self {
        let max_angle = max_angle.abs();
        Self {
            forward: forward_axis.normalize(),
            max_angle,
            cos_cone_angle: max_angle.cos(),
            sin_cone_angle: max_angle.sin(),
        }
    }

    pub fn forward_axis(&self) -> &Vector3<f32> {
        &self.forward
    }

    pub fn max_angle(&self) -> f32 {
        self.max_angle
    }

    pub fn compute_adjusted_local_rot(
        &self,
        local_rot: &UnitQuaternion<f32>,
    ) -> UnitQuaternion<f32> {
        let forward = local_rot * self.forward;
        let forward_component = forward.dot(&self.forward);
        if forward_component >= self.cos_cone_angle {
            return *local_rot;
        }
        let new_forward = project_onto_cone(
            &forward,
            &self.forward,
            forward_component,
            self.cos_cone_angle,
            self.sin_cone_angle,
        );
        renorm(shortest_arc(&forward, &new_forward) * local_rot)
    }

    pub(super) fn hash_params<H: Hasher>(&self, state: &mut H) {
        hash_f32(state, self.max_angle);
    }
}

// ---------------------------------------------------------------------------
// TwistLimitedCone
// ---------------------------------------------------------------------------

/// A uniform bend cone with bounded twist about the forward axis.
///
/// ```text
/// View from side:                 View with forward out of page:
///                                         max_twist
///        / cone_angle                  | /
///       /                              |/
///   ---@--------> forward_axis    ----(o)----> perp_axis
///       \                             /|
///        \ cone_angle                / |
///                                min_twist
/// ```
#[derive(Debug, Clone)]
pub struct TwistLimitedCone {
    forward: Vector3<f32>,
    cone_angle: f32,
    cos_cone_angle: f32,
    sin_cone_angle: f32,
    min_twist: f32,
    max_twist: f32,
}

impl TwistLimitedCone {
    pub fn new(forward_axis: Vector3<f32>, cone_angle: f32, min_twist: f32, max_twist: f32) -> Self {
        let (min_twist, max_twist) = normalize_angle_limits(min_twist, max_twist);
        Self {
            forward: forward_axis.normalize(),
            cone_angle,
            cos_cone_angle: cone_angle.cos(),
            sin_cone_angle: cone_angle.sin(),
            min_twist,
            max_twist,
        }
    }

    pub fn forward_axis(&self) -> &Vector3<f32> {
        &self.forward
    }

    pub fn twist_behavior(&self) -> TwistBehavior {
        TwistBehavior::Limited(self.min_twist, self.max_twist)
    }

    pub fn compute_adjusted_local_rot(
        &self,
        local_rot: &UnitQuaternion<f32>,
    ) -> UnitQuaternion<f32> {
        let mut forward = local_rot * self.forward;
        let mut adjusted = *local_rot;
        let mut forward_component = forward.dot(&self.forward);
        if forward_component < self.cos_cone_angle {
            // Swing the forward image back onto the cone surface.
            let new_forward = project_onto_cone(
                &forward,
                &self.forward,
                forward_component,
                self.cos_cone_angle,
                self.sin_cone_angle,
            );
            adjusted = renorm(shortest_arc(&forward, &new_forward) * adjusted);
            forward = new_forward;
            forward_component = forward.dot(&self.forward);
        }

        // Build a frame perpendicular to the bent forward: perp_x is the
        // bend axis, bent_perp_y completes it in the bent plane.
        let mut perp_x = self.forward.cross(&forward);
        if perp_x.norm() < MIN_PERP_LENGTH {
            perp_x = Vector3::x().cross(&forward);
            if perp_x.norm() < MIN_PERP_LENGTH {
                perp_x = forward.cross(&Vector3::y());
            }
        }
        perp_x.normalize_mut();
        let perp_y = forward.cross(&perp_x);

        let bend_angle = forward_component.clamp(-1.0, 1.0).acos();
        let bend_rot = UnitQuaternion::from_axis_angle(&Unit::new_normalize(perp_x), bend_angle);
        let bent_perp_y = bend_rot * perp_y;

        // The bend axis maps through the full rotation as pure twist;
        // its components in the bent frame measure the twist angle.
        let rotated_perp_x = adjusted * perp_x;
        let twist = rotated_perp_x
            .dot(&bent_perp_y)
            .atan2(rotated_perp_x.dot(&perp_x));

        let new_twist = clamp_angle(twist, self.min_twist, self.max_twist);
        if new_twist != twist {
            let new_rotated_perp_x = new_twist.cos() * perp_x + new_twist.sin() * bent_perp_y;
            adjusted = renorm(shortest_arc(&rotated_perp_x, &new_rotated_perp_x) * adjusted);
        }
        adjusted
    }

    pub(super) fn hash_params<H: Hasher>(&self, state: &mut H) {
        hash_f32(state, self.cone_angle);
        hash_f32(state, self.min_twist);
        hash_f32(state, self.max_twist);
    }
}

// ---------------------------------------------------------------------------
// AcuteEllipsoidalCone
// ---------------------------------------------------------------------------

/// A cone with asymmetric radii in the up, left, down, and right
/// directions; twist about forward is unrestricted.
///
/// The boundary is described by the forward offset of a "cross" of radii.
/// Each quadrant of the cross in the left-up plane is bound by an
/// elliptical curve between its two radii:
///
/// ```text
///     up  left            |
///      | /                | /
///      |/                 |/
///   ---@------------------+
///           forward      /|
///                         |
/// ```
#[derive(Debug, Clone)]
pub struct AcuteEllipsoidalCone {
    forward: Vector3<f32>,
    up: Vector3<f32>,
    left: Vector3<f32>,

    radius_forward: f32,
    radius_up: f32,
    radius_down: f32,
    radius_left: f32,
    radius_right: f32,

    // Per-quadrant caches for projecting onto each partial ellipse: the
    // left-axis scale into the frame where the quadrant boundary is a
    // circle, plus the cosine and cotangent of that circular cone's angle.
    quadrant_scales: [f32; 4],
    quadrant_cos_angles: [f32; 4],
    quadrant_cot_angles: [f32; 4],
}

impl AcuteEllipsoidalCone {
    pub fn new(
        forward_axis: Vector3<f32>,
        up_axis: Vector3<f32>,
        forward: f32,
        up: f32,
        left: f32,
        down: f32,
        right: f32,
    ) -> Self {
        let up_axis = up_axis.normalize();
        let forward_dir = up_axis.cross(&forward_axis).cross(&up_axis).normalize();
        let left_axis = up_axis.cross(&forward_dir);

        // Normalize the radii against the forward offset so the adjacent leg
        // of every quadrant triangle has length one.
        let up_n = (up / forward).abs();
        let left_n = (left / forward).abs();
        let down_n = (down / forward).abs();
        let right_n = (right / forward).abs();

        // Quadrant indices with forward pointing into the page:
        //             up
        //              |
        //          1   |   0
        //              |
        //  left ------(x)------ right
        //              |
        //          2   |   3
        //              |
        //            down
        let quadrant_scales = [
            up_n / right_n,
            up_n / left_n,
            down_n / left_n,
            down_n / right_n,
        ];
        let cos_up = 1.0 / (up_n * up_n + 1.0).sqrt();
        let cot_up = 1.0 / up_n;
        let cos_down = 1.0 / (down_n * down_n + 1.0).sqrt();
        let cot_down = 1.0 / down_n;

        Self {
            forward: forward_dir,
            up: up_axis,
            left: left_axis,
            radius_forward: forward,
            radius_up: up,
            radius_down: down,
            radius_left: left,
            radius_right: right,
            quadrant_scales,
            quadrant_cos_angles: [cos_up, cos_up, cos_down, cos_down],
            quadrant_cot_angles: [cot_up, cot_up, cot_down, cot_down],
        }
    }

    pub fn forward_axis(&self) -> &Vector3<f32> {
        &self.forward
    }

    pub fn compute_adjusted_local_rot(
        &self,
        local_rot: &UnitQuaternion<f32>,
    ) -> UnitQuaternion<f32> {
        let forward = local_rot * self.forward;

        let up_component = forward.dot(&self.up);
        let left_component = forward.dot(&self.left);
        let q = if up_component < 0.0 {
            if left_component < 0.0 { 2 } else { 3 }
        } else if left_component < 0.0 {
            1
        } else {
            0
        };

        // Scale the left axis into the frame where this quadrant's
        // elliptical boundary becomes circular.
        let scaled_left_component = left_component * self.quadrant_scales[q];
        let mut forward_component = forward.dot(&self.forward);
        let scaled_forward = forward_component * self.forward
            + up_component * self.up
            + scaled_left_component * self.left;

        // scaled_forward is not unit length, so the forward component must
        // be re-based on its norm before the cone test.
        if forward_component / scaled_forward.norm() >= self.quadrant_cos_angles[q] {
            return *local_rot;
        }

        // Out of bounds: rebuild the boundary direction. The transverse
        // components stay, and the forward component is recomputed in the
        // scaled frame as adjacent = opposite * cot(angle).
        let orthogonal_component = (scaled_left_component * scaled_left_component
            + up_component * up_component)
            .sqrt();
        forward_component = orthogonal_component * self.quadrant_cot_angles[q];
        let new_forward = forward_component * self.forward
            + up_component * self.up
            + left_component * self.left;

        renorm(shortest_arc(&forward, &new_forward) * local_rot)
    }

    pub(super) fn hash_params<H: Hasher>(&self, state: &mut H) {
        hash_vec3(state, &self.up);
        hash_f32(state, self.radius_forward);
        hash_f32(state, self.radius_up);
        hash_f32(state, self.radius_down);
        hash_f32(state, self.radius_left);
        hash_f32(state, self.radius_right);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_8, PI};

    #[test]
    fn simple_cone_accepts_inside_rotation() {
        let cone = SimpleCone::new(Vector3::z(), PI / 4.0);
        let q = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.3);
        let projected = cone.compute_adjusted_local_rot(&q);
        assert!(armature_core::almost_equal(&projected, &q, 1e-6));
    }

    #[test]
    fn simple_cone_projects_onto_surface() {
        // Rotating forward (z) onto x exceeds a 30-degree cone; the
        // projection must land on the surface in the x-z half-plane.
        let cone = SimpleCone::new(Vector3::z(), PI / 6.0);
        let q = UnitQuaternion::rotation_between(&Vector3::z(), &Vector3::x()).unwrap();
        let projected = cone.compute_adjusted_local_rot(&q);
        let new_forward = projected * Vector3::z();
        assert_relative_eq!(new_forward.z, (PI / 6.0).cos(), epsilon = 1e-5);
        assert!(new_forward.x > 0.0);
        assert_relative_eq!(new_forward.y, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn twist_limited_cone_clamps_pure_twist() {
        // A pure half-pi twist about forward clamps to the max twist limit.
        let cone = TwistLimitedCone::new(Vector3::z(), FRAC_PI_2, -FRAC_PI_8, FRAC_PI_8);
        let q = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
        let projected = cone.compute_adjusted_local_rot(&q);
        // Forward is untouched by pure twist.
        let forward = projected * Vector3::z();
        assert_relative_eq!(forward.z, 1.0, epsilon = 1e-5);
        // Residual rotation is a twist of exactly max_twist about z.
        assert_relative_eq!(projected.angle(), FRAC_PI_8, epsilon = 1e-4);
        let axis = projected.axis().unwrap();
        assert_relative_eq!(axis.z.abs(), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn twist_limited_cone_keeps_in_range_twist() {
        let cone = TwistLimitedCone::new(Vector3::z(), FRAC_PI_2, -FRAC_PI_8, FRAC_PI_8);
        let q = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.1);
        let projected = cone.compute_adjusted_local_rot(&q);
        assert!(armature_core::almost_equal(&projected, &q, 1e-4));
    }

    #[test]
    fn twist_limited_cone_swings_and_clamps_together() {
        let cone = TwistLimitedCone::new(Vector3::z(), PI / 6.0, -FRAC_PI_8, FRAC_PI_8);
        // Swing far outside the cone with an excessive twist on top.
        let swing = UnitQuaternion::rotation_between(&Vector3::z(), &Vector3::x()).unwrap();
        let twist = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 1.0);
        let projected = cone.compute_adjusted_local_rot(&(swing * twist));
        let forward = projected * Vector3::z();
        assert_relative_eq!(forward.dot(&Vector3::z()), (PI / 6.0).cos(), epsilon = 1e-4);
        // Re-projection is stable.
        let again = cone.compute_adjusted_local_rot(&projected);
        assert!(armature_core::almost_equal(&projected, &again, 1e-3));
    }

    #[test]
    fn ellipsoidal_cone_accepts_forward() {
        let cone =
            AcuteEllipsoidalCone::new(Vector3::x(), Vector3::z(), 1.0, 0.5, 0.3, 0.4, 0.6);
        let identity = UnitQuaternion::identity();
        let projected = cone.compute_adjusted_local_rot(&identity);
        assert!(armature_core::almost_equal(&projected, &identity, 1e-6));
    }

    #[test]
    fn ellipsoidal_cone_projects_asymmetrically() {
        // Radii: up 0.5, down 0.4 at forward offset 1.0. A rotation pitching
        // forward straight up is clamped harder than the up radius allows;
        // the projected direction keeps a positive up component bounded by
        // atan(0.5).
        let cone =
            AcuteEllipsoidalCone::new(Vector3::x(), Vector3::z(), 1.0, 0.5, 0.3, 0.4, 0.6);
        let q = UnitQuaternion::rotation_between(&Vector3::x(), &Vector3::z()).unwrap();
        let projected = cone.compute_adjusted_local_rot(&q);
        let forward = (projected * Vector3::x()).normalize();
        let max_up = 0.5f32.atan();
        let pitch = forward.dot(&Vector3::z()).asin();
        assert!(pitch > 0.0);
        assert!(pitch <= max_up + 1e-4);
    }

    #[test]
    fn ellipsoidal_cone_quadrants_differ() {
        let cone =
            AcuteEllipsoidalCone::new(Vector3::x(), Vector3::z(), 1.0, 0.5, 0.3, 0.2, 0.6);
        let pitch_up = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -0.6);
        let pitch_down = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.6);
        let up_proj = cone.compute_adjusted_local_rot(&pitch_up) * Vector3::x();
        let down_proj = cone.compute_adjusted_local_rot(&pitch_down) * Vector3::x();
        // The down radius (0.2) is tighter than the up radius (0.5).
        assert!(up_proj.z.abs() > down_proj.z.abs());
    }
}
