//! Constraint configuration for armature skeletons.
//!
//! Rigs ship a flat mapping from joint name to constraint parameters
//! (angles in degrees at the serialization boundary). This crate parses
//! that mapping from TOML, converts it into [`armature_ik::Constraint`]
//! values, and interns the results by parameter hash so joints with
//! identical configurations share a single instance.

pub mod error;
pub mod factory;
pub mod params;

pub use error::RigError;
pub use factory::ConstraintFactory;
pub use params::ConstraintParams;
