//! The interning constraint factory.
//!
//! Constraints are stateless configurations, so the factory hands out
//! shared instances: records with identical parameters resolve to one
//! `Arc<Constraint>` no matter how many joints reference them.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use armature_ik::Constraint;

use crate::error::RigError;
use crate::params::ConstraintParams;

/// Builds and caches constraints, plus the joint-name mapping loaded from
/// a rig's constraint file.
#[derive(Default)]
pub struct ConstraintFactory {
    /// Interned constraints keyed by parameter hash.
    constraints: HashMap<u64, Arc<Constraint>>,
    /// joint name -> shared constraint.
    joint_mapping: HashMap<String, Arc<Constraint>>,
}

impl ConstraintFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a constraint mapping from a TOML file: one table per joint
    /// name, each a [`ConstraintParams`] record.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, RigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| RigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse a constraint mapping from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, RigError> {
        let mappings: HashMap<String, ConstraintParams> = toml::from_str(text)?;
        let mut factory = Self::new();
        for (joint_name, params) in mappings {
            factory.insert_mapping(joint_name, &params);
        }
        Ok(factory)
    }

    /// Associate `joint_name` with the (interned) constraint described by
    /// `params`.
    pub fn insert_mapping(&mut self, joint_name: String, params: &ConstraintParams) {
        let constraint = self.get_constraint(params);
        self.joint_mapping.insert(joint_name, constraint);
    }

    /// The interned constraint for `params`, building it on first use.
    pub fn get_constraint(&mut self, params: &ConstraintParams) -> Arc<Constraint> {
        let built = params.build();
        let hash = built.parameter_hash();
        if let Some(existing) = self.constraints.get(&hash) {
            return Arc::clone(existing);
        }
        debug!(
            type_name = built.type_name(),
            hash, "interning new constraint"
        );
        let constraint = Arc::new(built);
        self.constraints.insert(hash, Arc::clone(&constraint));
        constraint
    }

    /// The shared constraint mapped to a joint name, if any.
    pub fn constraint_for_joint(&self, joint_name: &str) -> Option<Arc<Constraint>> {
        self.joint_mapping.get(joint_name).cloned()
    }

    /// Number of distinct constraint instances interned so far.
    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Number of joint names with a mapped constraint.
    pub fn num_mappings(&self) -> usize {
        self.joint_mapping.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const CONSTRAINT_MAP: &str = r#"
        [mElbowLeft]
        type = "ELBOW"
        forward_axis = [1.0, 0.0, 0.0]
        pivot_axis = [0.0, 0.0, 1.0]
        min_bend = 0.0
        max_bend = 150.0
        min_twist = -45.0
        max_twist = 45.0

        [mElbowRight]
        type = "ELBOW"
        forward_axis = [1.0, 0.0, 0.0]
        pivot_axis = [0.0, 0.0, 1.0]
        min_bend = 0.0
        max_bend = 150.0
        min_twist = -45.0
        max_twist = 45.0

        [mKneeLeft]
        type = "KNEE"
        forward_axis = [0.0, 0.0, -1.0]
        pivot_axis = [1.0, 0.0, 0.0]
        min_bend = 0.0
        max_bend = 160.0

        [mShoulderLeft]
        type = "SHOULDER"
        forward_axis = [1.0, 0.0, 0.0]
    "#;

    #[test]
    fn identical_records_share_one_instance() {
        let factory = ConstraintFactory::from_toml_str(CONSTRAINT_MAP).unwrap();
        let left = factory.constraint_for_joint("mElbowLeft").unwrap();
        let right = factory.constraint_for_joint("mElbowRight").unwrap();
        assert!(Arc::ptr_eq(&left, &right));
        // Four mappings, three distinct constraints.
        assert_eq!(factory.num_mappings(), 4);
        assert_eq!(factory.num_constraints(), 3);
    }

    #[test]
    fn unmapped_joint_yields_none() {
        let factory = ConstraintFactory::from_toml_str(CONSTRAINT_MAP).unwrap();
        assert!(factory.constraint_for_joint("mWristLeft").is_none());
    }

    #[test]
    fn shoulder_name_is_accepted() {
        let factory = ConstraintFactory::from_toml_str(CONSTRAINT_MAP).unwrap();
        let shoulder = factory.constraint_for_joint("mShoulderLeft").unwrap();
        assert_eq!(shoulder.type_name(), "TWIST_LIMITED_CONE");
    }

    #[test]
    fn malformed_map_is_a_parse_error() {
        let result = ConstraintFactory::from_toml_str("[mJoint]\ntype = \"ELBOW\"\n");
        assert!(matches!(result, Err(RigError::Parse(_))));
    }

    #[test]
    fn get_constraint_interns_across_calls() {
        let mut factory = ConstraintFactory::new();
        let params = ConstraintParams::SimpleCone {
            forward_axis: [0.0, 0.0, 1.0],
            max_angle: 25.0,
        };
        let a = factory.get_constraint(&params);
        let b = factory.get_constraint(&params);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.num_constraints(), 1);
    }
}
