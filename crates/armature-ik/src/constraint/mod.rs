//! Rotational constraints on a joint's parent-relative orientation.
//!
//! A constraint sits at the tip of a joint and limits its local rotation.
//! Every variant is immutable after construction and hashable over its
//! parameters, so identical configurations can share one interned instance
//! across many joints.
//!
//! Two enforcement surfaces exist:
//!
//! - [`Constraint::compute_adjusted_local_rot`] is a pure projection of an
//!   arbitrary local rotation onto the feasible set, preferring the
//!   shortest correction and preserving the forward image where admissible.
//! - The elbow and knee variants additionally apply bidirectional
//!   back-pressure during enforcement, twisting the joint and
//!   counter-rotating its parent in the world frame (see
//!   [`crate::skeleton::Skeleton::enforce_constraint`]).

mod cone;
mod hinge;

pub use cone::{AcuteEllipsoidalCone, SimpleCone, TwistLimitedCone};
pub use hinge::{DoubleLimitedHinge, ElbowConstraint, KneeConstraint};

use std::f32::consts::PI;
use std::hash::{Hash, Hasher};

use nalgebra::{Unit, UnitQuaternion, Vector3};

use armature_core::shortest_arc;

/// Angular slop below which two rotations are treated as the same pose.
pub const VERY_SMALL_ANGLE: f32 = 0.001 * PI;

/// Norm below which a derived perpendicular axis falls back to a fixed one.
pub(crate) const MIN_PERP_LENGTH: f32 = 1.0e-4;

/// Renormalize a composed rotation back onto the unit hypersphere.
pub(crate) fn renorm(q: UnitQuaternion<f32>) -> UnitQuaternion<f32> {
    UnitQuaternion::new_normalize(*q.quaternion())
}

pub(crate) fn hash_f32<H: Hasher>(state: &mut H, value: f32) {
    state.write_u32(value.to_bits());
}

pub(crate) fn hash_vec3<H: Hasher>(state: &mut H, value: &Vector3<f32>) {
    hash_f32(state, value.x);
    hash_f32(state, value.y);
    hash_f32(state, value.z);
}

/// How a constraint treats rotation about its forward axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TwistBehavior {
    /// Twist is unrestricted.
    Free,
    /// Twist is clamped to `[min, max]` radians.
    Limited(f32, f32),
    /// Twist is removed entirely.
    Zero,
}

/// One of the concrete rotational constraints.
#[derive(Debug, Clone)]
pub enum Constraint {
    SimpleCone(SimpleCone),
    TwistLimitedCone(TwistLimitedCone),
    Elbow(ElbowConstraint),
    Knee(KneeConstraint),
    AcuteEllipsoidalCone(AcuteEllipsoidalCone),
    DoubleLimitedHinge(DoubleLimitedHinge),
}

impl Constraint {
    /// The constraint's reference direction in the joint's local frame.
    pub fn forward_axis(&self) -> &Vector3<f32> {
        match self {
            Self::SimpleCone(c) => c.forward_axis(),
            Self::TwistLimitedCone(c) => c.forward_axis(),
            Self::Elbow(c) => c.forward_axis(),
            Self::Knee(c) => c.forward_axis(),
            Self::AcuteEllipsoidalCone(c) => c.forward_axis(),
            Self::DoubleLimitedHinge(c) => c.forward_axis(),
        }
    }

    /// Twist handling about the forward axis.
    pub fn twist_behavior(&self) -> TwistBehavior {
        match self {
            Self::SimpleCone(_) | Self::AcuteEllipsoidalCone(_) => TwistBehavior::Free,
            Self::TwistLimitedCone(c) => c.twist_behavior(),
            Self::Elbow(c) => c.twist_behavior(),
            Self::Knee(_) | Self::DoubleLimitedHinge(_) => TwistBehavior::Zero,
        }
    }

    /// Whether any twist about the forward axis is admissible.
    pub fn allows_twist(&self) -> bool {
        !matches!(self.twist_behavior(), TwistBehavior::Zero)
    }

    /// Project an arbitrary local rotation onto this constraint's feasible
    /// set.
    pub fn compute_adjusted_local_rot(
        &self,
        local_rot: &UnitQuaternion<f32>,
    ) -> UnitQuaternion<f32> {
        match self {
            Self::SimpleCone(c) => c.compute_adjusted_local_rot(local_rot),
            Self::TwistLimitedCone(c) => c.compute_adjusted_local_rot(local_rot),
            Self::Elbow(c) => c.compute_adjusted_local_rot(local_rot),
            Self::Knee(c) => c.compute_adjusted_local_rot(local_rot),
            Self::AcuteEllipsoidalCone(c) => c.compute_adjusted_local_rot(local_rot),
            Self::DoubleLimitedHinge(c) => c.compute_adjusted_local_rot(local_rot),
        }
    }

    /// The feasible rotation closest to `local_rot` that carries the least
    /// admissible twist about the forward axis.
    ///
    /// The projected forward direction is identical to that of
    /// [`Self::compute_adjusted_local_rot`]; only the twist component is
    /// reduced.
    pub fn minimize_twist(&self, local_rot: &UnitQuaternion<f32>) -> UnitQuaternion<f32> {
        let adjusted = self.compute_adjusted_local_rot(local_rot);
        match self.twist_behavior() {
            // The projection of a zero-twist constraint already carries no
            // twist; it is the minimal representative.
            TwistBehavior::Zero => adjusted,
            TwistBehavior::Free => self.swing_of(&adjusted),
            TwistBehavior::Limited(min, max) => {
                let residual = if min > 0.0 {
                    min
                } else if max < 0.0 {
                    max
                } else {
                    0.0
                };
                let swing = self.swing_of(&adjusted);
                if residual == 0.0 {
                    swing
                } else {
                    let forward = Unit::new_normalize(*self.forward_axis());
                    renorm(swing * UnitQuaternion::from_axis_angle(&forward, residual))
                }
            }
        }
    }

    /// The pure swing taking the rest forward onto `rot`'s forward image.
    fn swing_of(&self, rot: &UnitQuaternion<f32>) -> UnitQuaternion<f32> {
        let forward = self.forward_axis();
        shortest_arc(forward, &(rot * forward))
    }

    /// Hash over the constraint type and all of its parameters.
    ///
    /// Two constraints with identical parameters hash identically, which is
    /// what lets the factory share one instance across joints.
    pub fn parameter_hash(&self) -> u64 {
        let mut state = std::collections::hash_map::DefaultHasher::new();
        std::mem::discriminant(self).hash(&mut state);
        hash_vec3(&mut state, self.forward_axis());
        match self {
            Self::SimpleCone(c) => c.hash_params(&mut state),
            Self::TwistLimitedCone(c) => c.hash_params(&mut state),
            Self::Elbow(c) => c.hash_params(&mut state),
            Self::Knee(c) => c.hash_params(&mut state),
            Self::AcuteEllipsoidalCone(c) => c.hash_params(&mut state),
            Self::DoubleLimitedHinge(c) => c.hash_params(&mut state),
        }
        state.finish()
    }

    /// The factory-facing name of this constraint type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SimpleCone(_) => "SIMPLE_CONE",
            Self::TwistLimitedCone(_) => "TWIST_LIMITED_CONE",
            Self::Elbow(_) => "ELBOW",
            Self::Knee(_) => "KNEE",
            Self::AcuteEllipsoidalCone(_) => "ACUTE_ELLIPSOIDAL_CONE",
            Self::DoubleLimitedHinge(_) => "DOUBLE_LIMITED_HINGE",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
