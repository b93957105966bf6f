//! Per-joint override records submitted to the solver each frame.
//!
//! A [`JointConfig`] carries presence bits plus payloads: author-supplied
//! local-frame overrides, world-frame effector targets on the joint's end,
//! and behavioral markers. Configs live for exactly one solve cycle; the
//! solver owns their storage and joints cache a copy while chains are live.

use bitflags::bitflags;
use nalgebra::{UnitQuaternion, Vector3};

bitflags! {
    /// Presence bits for [`JointConfig`] payload fields.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConfigFlags: u8 {
        /// Author-supplied position in the parent's local frame.
        const LOCAL_POS = 1 << 0;
        /// Author-supplied orientation in the parent's local frame.
        const LOCAL_ROT = 1 << 1;
        /// Author-supplied local scale tweak.
        const LOCAL_SCALE = 1 << 2;
        /// Skip constraint enforcement on this joint.
        const DISABLE_CONSTRAINT = 1 << 3;
        /// World-frame effector position target on the joint's end.
        const TARGET_POS = 1 << 4;
        /// World-frame effector orientation target.
        const TARGET_ROT = 1 << 5;
        /// Joint is excluded from chain building. Experimental.
        const DELEGATED = 1 << 6;
    }
}

impl ConfigFlags {
    /// Either position field is present.
    pub const MASK_POS: Self = Self::TARGET_POS.union(Self::LOCAL_POS);
    /// Either rotation field is present.
    pub const MASK_ROT: Self = Self::TARGET_ROT.union(Self::LOCAL_ROT);
    /// Fields harvested back into the local transform after a solve.
    pub const MASK_LOCAL: Self = Self::LOCAL_POS
        .union(Self::LOCAL_ROT)
        .union(Self::DISABLE_CONSTRAINT);
}

bitflags! {
    /// Solver-internal per-joint state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IkFlags: u8 {
        /// The solve adjusted this joint's local rotation; harvest it.
        const ADJUSTED_LOCAL_ROT = 1 << 1;
        /// Joint participates in the current solve.
        const ACTIVE = 1 << 5;
        /// Local rotation must not be modified during iteration.
        const LOCAL_ROT_LOCKED = 1 << 7;
    }
}

/// Chain length cap meaning "no limit" for practical skeletons.
pub const DEFAULT_CHAIN_LIMIT: u8 = 255;

/// One joint's overrides and targets for a single solve cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct JointConfig {
    local_pos: Vector3<f32>,
    local_rot: UnitQuaternion<f32>,
    local_scale: Vector3<f32>,
    target_pos: Vector3<f32>,
    target_rot: UnitQuaternion<f32>,
    flags: ConfigFlags,
    chain_limit: u8,
}

impl Default for JointConfig {
    fn default() -> Self {
        Self {
            local_pos: Vector3::zeros(),
            local_rot: UnitQuaternion::identity(),
            local_scale: Vector3::new(1.0, 1.0, 1.0),
            target_pos: Vector3::zeros(),
            target_rot: UnitQuaternion::identity(),
            flags: ConfigFlags::empty(),
            chain_limit: DEFAULT_CHAIN_LIMIT,
        }
    }
}

impl JointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(&self) -> ConfigFlags {
        self.flags
    }

    // local info is in the parent's frame

    pub fn has_local_pos(&self) -> bool {
        self.flags.contains(ConfigFlags::LOCAL_POS)
    }

    pub fn has_local_rot(&self) -> bool {
        self.flags.contains(ConfigFlags::LOCAL_ROT)
    }

    pub fn has_local_scale(&self) -> bool {
        self.flags.contains(ConfigFlags::LOCAL_SCALE)
    }

    pub fn constraint_is_disabled(&self) -> bool {
        self.flags.contains(ConfigFlags::DISABLE_CONSTRAINT)
    }

    pub fn set_local_pos(&mut self, pos: Vector3<f32>) {
        self.local_pos = pos;
        self.flags |= ConfigFlags::LOCAL_POS;
    }

    pub fn set_local_rot(&mut self, rot: UnitQuaternion<f32>) {
        self.local_rot = UnitQuaternion::new_normalize(*rot.quaternion());
        self.flags |= ConfigFlags::LOCAL_ROT;
    }

    pub fn set_local_scale(&mut self, scale: Vector3<f32>) {
        self.local_scale = scale;
        self.flags |= ConfigFlags::LOCAL_SCALE;
    }

    pub fn disable_constraint(&mut self) {
        self.flags |= ConfigFlags::DISABLE_CONSTRAINT;
    }

    pub fn local_pos(&self) -> &Vector3<f32> {
        &self.local_pos
    }

    pub fn local_rot(&self) -> &UnitQuaternion<f32> {
        &self.local_rot
    }

    pub fn local_scale(&self) -> &Vector3<f32> {
        &self.local_scale
    }

    // target info is in the skeleton root frame

    pub fn has_target_pos(&self) -> bool {
        self.flags.contains(ConfigFlags::TARGET_POS)
    }

    pub fn has_target_rot(&self) -> bool {
        self.flags.contains(ConfigFlags::TARGET_ROT)
    }

    pub fn set_target_pos(&mut self, pos: Vector3<f32>) {
        self.target_pos = pos;
        self.flags |= ConfigFlags::TARGET_POS;
    }

    pub fn set_target_rot(&mut self, rot: UnitQuaternion<f32>) {
        self.target_rot = UnitQuaternion::new_normalize(*rot.quaternion());
        self.flags |= ConfigFlags::TARGET_ROT;
    }

    pub fn target_pos(&self) -> &Vector3<f32> {
        &self.target_pos
    }

    pub fn target_rot(&self) -> &UnitQuaternion<f32> {
        &self.target_rot
    }

    /// Exclude this joint from chain building. Experimental.
    pub fn delegate(&mut self) {
        self.flags |= ConfigFlags::DELEGATED;
    }

    pub fn is_delegated(&self) -> bool {
        self.flags.contains(ConfigFlags::DELEGATED)
    }

    /// Cap the inward walk of chains seeded from this joint.
    ///
    /// Only consulted when the config carries a target; otherwise the
    /// default of [`DEFAULT_CHAIN_LIMIT`] applies.
    pub fn set_chain_limit(&mut self, limit: u8) {
        self.chain_limit = limit;
    }

    pub fn chain_limit(&self) -> u8 {
        self.chain_limit
    }

    /// Merge `other` into `self`.
    ///
    /// When the flag sets are identical the whole record is replaced;
    /// otherwise each field present in `other` is applied and the presence
    /// bits are OR-ed together.
    pub fn update_from(&mut self, other: &JointConfig) {
        if self.flags == other.flags {
            *self = other.clone();
            return;
        }
        if other.has_local_pos() {
            self.set_local_pos(other.local_pos);
        }
        if other.has_local_rot() {
            self.set_local_rot(other.local_rot);
        }
        if other.has_target_pos() {
            self.set_target_pos(other.target_pos);
        }
        if other.has_target_rot() {
            self.set_target_rot(other.target_rot);
        }
        if other.has_local_scale() {
            self.set_local_scale(other.local_scale);
        }
        if other.constraint_is_disabled() {
            self.disable_constraint();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_raise_presence_bits() {
        let mut config = JointConfig::new();
        assert!(config.flags().is_empty());

        config.set_target_pos(Vector3::new(1.0, 2.0, 3.0));
        assert!(config.has_target_pos());
        assert!(!config.has_target_rot());

        config.set_local_rot(UnitQuaternion::from_axis_angle(
            &Vector3::z_axis(),
            0.5,
        ));
        assert!(config.has_local_rot());
        assert_eq!(
            config.flags(),
            ConfigFlags::TARGET_POS | ConfigFlags::LOCAL_ROT
        );
    }

    #[test]
    fn update_from_replaces_on_identical_flags() {
        let mut a = JointConfig::new();
        a.set_target_pos(Vector3::new(1.0, 0.0, 0.0));
        let mut b = JointConfig::new();
        b.set_target_pos(Vector3::new(5.0, 0.0, 0.0));

        a.update_from(&b);
        assert_eq!(a.target_pos(), b.target_pos());
    }

    #[test]
    fn update_from_merges_disjoint_fields() {
        let mut a = JointConfig::new();
        a.set_target_pos(Vector3::new(1.0, 0.0, 0.0));
        let mut b = JointConfig::new();
        b.set_local_scale(Vector3::new(2.0, 2.0, 2.0));
        b.disable_constraint();

        a.update_from(&b);
        assert!(a.has_target_pos());
        assert!(a.has_local_scale());
        assert!(a.constraint_is_disabled());
        assert_eq!(a.target_pos(), &Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(a.local_scale(), &Vector3::new(2.0, 2.0, 2.0));
    }

    #[test]
    fn chain_limit_defaults_wide_open() {
        let config = JointConfig::new();
        assert_eq!(config.chain_limit(), DEFAULT_CHAIN_LIMIT);
    }
}
