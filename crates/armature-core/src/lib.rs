//! armature-core: angle and quaternion primitives shared across the
//! armature IK workspace.
//!
//! The solver crates work exclusively in `f32` with nalgebra types
//! ([`nalgebra::Vector3`], [`nalgebra::UnitQuaternion`]). This crate collects
//! the small, heavily-exercised helpers those crates share: periodic angle
//! clamping with cyclic limits, shortest-arc rotations with degenerate-input
//! fallbacks, and the hemisphere-corrected quaternion averaging the solver
//! relies on for deterministic multi-target blending.

pub mod angles;
pub mod quat;

pub use angles::{clamp_angle, normalize_angle_limits, remove_full_turns};
pub use quat::{QuatAccumulator, almost_equal, any_perpendicular, nlerp, shortest_arc};
