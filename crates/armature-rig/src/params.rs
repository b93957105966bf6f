//! Serializable constraint parameter records.
//!
//! All angles are authored in degrees; conversion to radians happens when
//! the record is built into a [`Constraint`]. Out-of-order limit pairs are
//! never rejected; constraint construction normalizes them.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_3};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use armature_ik::{
    AcuteEllipsoidalCone, Constraint, DoubleLimitedHinge, ElbowConstraint, KneeConstraint,
    SimpleCone, TwistLimitedCone,
};

fn vec3(v: [f32; 3]) -> Vector3<f32> {
    Vector3::new(v[0], v[1], v[2])
}

/// One constraint definition as authored in a rig's constraint map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConstraintParams {
    /// Uniform bend cone, free twist.
    #[serde(rename = "SIMPLE_CONE", alias = "simple_cone")]
    SimpleCone {
        forward_axis: [f32; 3],
        /// Cone half-angle in degrees.
        max_angle: f32,
    },

    /// Uniform bend cone with twist limits.
    #[serde(rename = "TWIST_LIMITED_CONE", alias = "twist_limited_cone")]
    TwistLimitedCone {
        forward_axis: [f32; 3],
        cone_angle: f32,
        min_twist: f32,
        max_twist: f32,
    },

    /// Accepted for compatibility with older rigs: a shoulder behaves as a
    /// twist-limited cone with fixed limits (60 degree cone, ±90 degree
    /// twist). Parameters beyond the forward axis are not configurable.
    #[serde(rename = "SHOULDER", alias = "shoulder")]
    Shoulder { forward_axis: [f32; 3] },

    /// Limited hinge with limited twist.
    #[serde(rename = "ELBOW", alias = "elbow")]
    Elbow {
        forward_axis: [f32; 3],
        pivot_axis: [f32; 3],
        min_bend: f32,
        max_bend: f32,
        min_twist: f32,
        max_twist: f32,
    },

    /// Limited hinge, zero twist.
    #[serde(rename = "KNEE", alias = "knee")]
    Knee {
        forward_axis: [f32; 3],
        pivot_axis: [f32; 3],
        min_bend: f32,
        max_bend: f32,
    },

    /// Asymmetric cone with per-quadrant extents.
    #[serde(rename = "ACUTE_ELLIPSOIDAL_CONE", alias = "acute_ellipsoidal_cone")]
    AcuteEllipsoidalCone {
        forward_axis: [f32; 3],
        up_axis: [f32; 3],
        forward: f32,
        up: f32,
        left: f32,
        down: f32,
        right: f32,
    },

    /// Independent yaw/pitch limits, zero twist.
    #[serde(rename = "DOUBLE_LIMITED_HINGE", alias = "double_limited_hinge")]
    DoubleLimitedHinge {
        forward_axis: [f32; 3],
        up_axis: [f32; 3],
        min_yaw: f32,
        max_yaw: f32,
        min_pitch: f32,
        max_pitch: f32,
    },
}

impl ConstraintParams {
    /// Build the runtime constraint, converting degrees to radians.
    pub fn build(&self) -> Constraint {
        match *self {
            Self::SimpleCone {
                forward_axis,
                max_angle,
            } => Constraint::SimpleCone(SimpleCone::new(
                vec3(forward_axis),
                max_angle.to_radians(),
            )),
            Self::TwistLimitedCone {
                forward_axis,
                cone_angle,
                min_twist,
                max_twist,
            } => Constraint::TwistLimitedCone(TwistLimitedCone::new(
                vec3(forward_axis),
                cone_angle.to_radians(),
                min_twist.to_radians(),
                max_twist.to_radians(),
            )),
            Self::Shoulder { forward_axis } => Constraint::TwistLimitedCone(
                TwistLimitedCone::new(vec3(forward_axis), FRAC_PI_3, -FRAC_PI_2, FRAC_PI_2),
            ),
            Self::Elbow {
                forward_axis,
                pivot_axis,
                min_bend,
                max_bend,
                min_twist,
                max_twist,
            } => Constraint::Elbow(ElbowConstraint::new(
                vec3(forward_axis),
                vec3(pivot_axis),
                min_bend.to_radians(),
                max_bend.to_radians(),
                min_twist.to_radians(),
                max_twist.to_radians(),
            )),
            Self::Knee {
                forward_axis,
                pivot_axis,
                min_bend,
                max_bend,
            } => Constraint::Knee(KneeConstraint::new(
                vec3(forward_axis),
                vec3(pivot_axis),
                min_bend.to_radians(),
                max_bend.to_radians(),
            )),
            Self::AcuteEllipsoidalCone {
                forward_axis,
                up_axis,
                forward,
                up,
                left,
                down,
                right,
            } => Constraint::AcuteEllipsoidalCone(AcuteEllipsoidalCone::new(
                vec3(forward_axis),
                vec3(up_axis),
                forward,
                up,
                left,
                down,
                right,
            )),
            Self::DoubleLimitedHinge {
                forward_axis,
                up_axis,
                min_yaw,
                max_yaw,
                min_pitch,
                max_pitch,
            } => Constraint::DoubleLimitedHinge(DoubleLimitedHinge::new(
                vec3(forward_axis),
                vec3(up_axis),
                min_yaw.to_radians(),
                max_yaw.to_radians(),
                min_pitch.to_radians(),
                max_pitch.to_radians(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;
    use std::f32::consts::PI;

    #[test]
    fn simple_cone_record_converts_degrees() {
        let params: ConstraintParams = toml::from_str(
            r#"
            type = "SIMPLE_CONE"
            forward_axis = [0.0, 0.0, 1.0]
            max_angle = 30.0
            "#,
        )
        .unwrap();
        let constraint = params.build();
        let Constraint::SimpleCone(cone) = &constraint else {
            panic!("wrong variant");
        };
        assert_relative_eq!(cone.max_angle(), PI / 6.0, epsilon = 1e-6);
    }

    #[test]
    fn shoulder_maps_to_twist_limited_cone() {
        let params: ConstraintParams = toml::from_str(
            r#"
            type = "SHOULDER"
            forward_axis = [1.0, 0.0, 0.0]
            "#,
        )
        .unwrap();
        let constraint = params.build();
        assert!(matches!(constraint, Constraint::TwistLimitedCone(_)));
        assert_eq!(constraint.type_name(), "TWIST_LIMITED_CONE");
    }

    #[test]
    fn reversed_limits_are_normalized_not_rejected() {
        let params: ConstraintParams = toml::from_str(
            r#"
            type = "KNEE"
            forward_axis = [1.0, 0.0, 0.0]
            pivot_axis = [0.0, 0.0, 1.0]
            min_bend = 170.0
            max_bend = 0.0
            "#,
        )
        .unwrap();
        let constraint = params.build();
        // A rotation bending by 90 degrees is inside the (swapped) limits.
        let q = UnitQuaternion::from_axis_angle(&nalgebra::Vector3::z_axis(), PI / 2.0);
        let projected = constraint.compute_adjusted_local_rot(&q);
        assert!(quat_almost_equal(&projected, &q));
    }

    fn quat_almost_equal(
        a: &UnitQuaternion<f32>,
        b: &UnitQuaternion<f32>,
    ) -> bool {
        let a = a.quaternion().coords;
        let b = b.quaternion().coords;
        (a - b).amax() < 1e-4 || (a + b).amax() < 1e-4
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let result: Result<ConstraintParams, _> = toml::from_str(
            r#"
            type = "BALL_AND_SOCKET"
            forward_axis = [1.0, 0.0, 0.0]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn records_round_trip_through_toml() {
        let params = ConstraintParams::DoubleLimitedHinge {
            forward_axis: [1.0, 0.0, 0.0],
            up_axis: [0.0, 0.0, 1.0],
            min_yaw: -40.0,
            max_yaw: 40.0,
            min_pitch: -30.0,
            max_pitch: 15.0,
        };
        let text = toml::to_string(&params).unwrap();
        let back: ConstraintParams = toml::from_str(&text).unwrap();
        assert_eq!(params, back);
    }
}
