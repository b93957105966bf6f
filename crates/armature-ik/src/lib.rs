//! Constrained FABRIK inverse kinematics for articulated skeletons.
//!
//! Given a tree of joints with fixed rest geometry and optional
//! orientation constraints, plus a set of per-joint configurations (local
//! overrides and/or world-space effector targets), the solver computes
//! parent-relative orientations for every affected joint such that targets
//! are met within tolerance and all constraints hold.
//!
//! # Architecture
//!
//! ```text
//! JointInfo ──► Skeleton ──► chains ──► Solver ──► local transforms
//! ```
//!
//! The [`Skeleton`] is a flat arena of [`Joint`]s built once at rig load.
//! Each solve applies the submitted [`JointConfig`]s, decomposes the
//! active joints into chains, and iterates FABRIK passes (or the
//! experimental CCD variant) until the maximum end-effector error drops
//! under the acceptable threshold or the iteration budget runs out.
//!
//! Constraints are immutable and hash-deduplicated, so many joints can
//! share one instance; see [`Constraint`] for the variants.

mod chain;
pub mod config;
pub mod constraint;
pub mod joint;
pub mod skeleton;
pub mod solver;

pub use config::{ConfigFlags, DEFAULT_CHAIN_LIMIT, IkFlags, JointConfig};
pub use constraint::{
    AcuteEllipsoidalCone, Constraint, DoubleLimitedHinge, ElbowConstraint, KneeConstraint,
    SimpleCone, TwistBehavior, TwistLimitedCone,
};
pub use joint::{Joint, JointId, JointInfo, StaticJointInfo};
pub use skeleton::Skeleton;
pub use solver::{DEFAULT_ACCEPTABLE_ERROR, IkAlgorithm, Solver};
