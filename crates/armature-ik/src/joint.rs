//! One constrained bone in the skeleton hierarchy.
//!
//! A [`Joint`] typically has a parent, a fixed `local_pos` in its parent's
//! local frame, and a fixed `bone` vector to its end position in its own
//! local frame. The fundamental transform formulas, maintained at every
//! quiescent boundary between solver passes:
//!
//! ```text
//!     pos = parent.pos + parent.rot * local_pos
//!     rot = parent.rot * local_rot
//!     world_end_pos = pos + rot * bone
//! ```
//!
//! For the root joint `pos = local_pos` and `rot = local_rot`.

use std::sync::Arc;

use nalgebra::{UnitQuaternion, Vector3};

use crate::config::{ConfigFlags, IkFlags, JointConfig};
use crate::constraint::Constraint;

/// Stable signed joint identifier, assigned by the rig.
pub type JointId = i16;

/// Scale components below this are treated as non-invertible and their
/// reciprocals zeroed instead of propagating NaN.
pub const MIN_INVERTIBLE_SCALE: f32 = 1.0e-15;

/// Rest geometry provider for one joint.
///
/// The rig asset owns the default, non-animated geometry; the solver pulls
/// it at joint creation and again on [`reset`](crate::solver::Solver::reset_joint_geometry).
pub trait JointInfo: Send + Sync {
    /// Rest tip position in the parent's local frame.
    fn rest_position(&self) -> Vector3<f32>;
    /// Rest end offset ("bone" vector) in the joint's local frame.
    fn rest_end(&self) -> Vector3<f32>;
    /// Rest scale applied to both position and end offset.
    fn rest_scale(&self) -> Vector3<f32>;
    /// The joint's stable id.
    fn joint_num(&self) -> JointId;
}

/// A plain-data [`JointInfo`], convenient for rigs built in code.
#[derive(Debug, Clone)]
pub struct StaticJointInfo {
    pub position: Vector3<f32>,
    pub end: Vector3<f32>,
    pub scale: Vector3<f32>,
    pub joint_num: JointId,
}

impl StaticJointInfo {
    /// Unscaled info with the given rest position and bone.
    pub fn new(joint_num: JointId, position: Vector3<f32>, end: Vector3<f32>) -> Self {
        Self {
            position,
            end,
            scale: Vector3::new(1.0, 1.0, 1.0),
            joint_num,
        }
    }
}

impl JointInfo for StaticJointInfo {
    fn rest_position(&self) -> Vector3<f32> {
        self.position
    }

    fn rest_end(&self) -> Vector3<f32> {
        self.end
    }

    fn rest_scale(&self) -> Vector3<f32> {
        self.scale
    }

    fn joint_num(&self) -> JointId {
        self.joint_num
    }
}

/// One node of the skeleton.
///
/// Joints live in the [`Skeleton`](crate::skeleton::Skeleton) arena;
/// `parent` and `children` are arena indices, with every parent stored
/// before its children. Operations that touch a joint together with its
/// parent or children live on the skeleton.
#[derive(Clone)]
pub struct Joint {
    pub(crate) id: JointId,
    pub(crate) parent: Option<usize>,
    pub(crate) children: Vec<usize>,

    /// Current tip position in the parent's local frame.
    pub(crate) local_pos: Vector3<f32>,
    /// Current orientation relative to the parent's local frame.
    pub(crate) local_rot: UnitQuaternion<f32>,
    /// Caller tweak on top of whatever scale the info carries.
    pub(crate) local_scale: Vector3<f32>,
    /// Invariant end position in the local frame.
    pub(crate) bone: Vector3<f32>,

    /// Tip position in the skeleton root frame.
    pub(crate) pos: Vector3<f32>,
    /// Orientation in the skeleton root frame.
    pub(crate) rot: UnitQuaternion<f32>,

    pub(crate) local_pos_length: f32,

    pub(crate) info: Arc<dyn JointInfo>,
    pub(crate) constraint: Option<Arc<Constraint>>,

    /// Copy of the active config, valid for the current solve cycle.
    pub(crate) config: Option<JointConfig>,
    pub(crate) config_flags: ConfigFlags,
    pub(crate) ik_flags: IkFlags,
}

impl Joint {
    pub(crate) fn new(info: Arc<dyn JointInfo>) -> Self {
        let mut joint = Self {
            id: info.joint_num(),
            parent: None,
            children: Vec::new(),
            local_pos: Vector3::zeros(),
            local_rot: UnitQuaternion::identity(),
            local_scale: Vector3::new(1.0, 1.0, 1.0),
            bone: Vector3::zeros(),
            pos: Vector3::zeros(),
            rot: UnitQuaternion::identity(),
            local_pos_length: 0.0,
            info,
            constraint: None,
            config: None,
            config_flags: ConfigFlags::empty(),
            ik_flags: IkFlags::empty(),
        };
        joint.reset_from_info();
        joint
    }

    /// Re-pull rest geometry from the info provider.
    ///
    /// The info scale is folded directly into `local_pos` and `bone`;
    /// `local_scale` stays the caller's own tweak and resets to one.
    pub(crate) fn reset_from_info(&mut self) {
        let scale = self.info.rest_scale();
        self.local_pos = self.info.rest_position().component_mul(&scale);
        self.bone = self.info.rest_end().component_mul(&scale);
        self.local_pos_length = self.local_pos.norm();
        self.local_scale = Vector3::new(1.0, 1.0, 1.0);
    }

    pub fn id(&self) -> JointId {
        self.id
    }

    /// Arena index of the parent joint, `None` for the root.
    pub fn parent_index(&self) -> Option<usize> {
        self.parent
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

    pub fn bone(&self) -> &Vector3<f32> {
        &self.bone
    }

    pub fn bone_length(&self) -> f32 {
        self.bone.norm()
    }

    pub fn local_pos_length(&self) -> f32 {
        self.local_pos_length
    }

    /// Tip position in the skeleton root frame.
    pub fn world_tip_pos(&self) -> &Vector3<f32> {
        &self.pos
    }

    /// Orientation in the skeleton root frame.
    pub fn world_rot(&self) -> &UnitQuaternion<f32> {
        &self.rot
    }

    /// End position in the skeleton root frame.
    pub fn world_end_pos(&self) -> Vector3<f32> {
        self.pos + self.rot * self.bone
    }

    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    pub fn constraint(&self) -> Option<&Arc<Constraint>> {
        self.constraint.as_ref()
    }

    pub fn config_flags(&self) -> ConfigFlags {
        self.config_flags
    }

    /// Flags for the caller-side harvest of this joint's local transform.
    pub fn harvest_flags(&self) -> ConfigFlags {
        let mut flags = self.config_flags;
        if self.ik_flags.contains(IkFlags::ADJUSTED_LOCAL_ROT) {
            flags |= ConfigFlags::LOCAL_ROT;
        }
        flags & ConfigFlags::MASK_LOCAL
    }

    pub fn has_pos_target(&self) -> bool {
        self.config_flags.contains(ConfigFlags::TARGET_POS)
    }

    pub fn has_rot_target(&self) -> bool {
        self.config_flags.contains(ConfigFlags::TARGET_ROT)
    }

    pub fn has_disabled_constraint(&self) -> bool {
        self.config_flags.contains(ConfigFlags::DISABLE_CONSTRAINT)
    }

    pub fn is_active(&self) -> bool {
        self.ik_flags.contains(IkFlags::ACTIVE)
    }

    pub(crate) fn activate(&mut self) {
        self.ik_flags |= IkFlags::ACTIVE;
    }

    /// Whether the local rotation is pinned for the duration of the solve.
    pub fn local_rot_locked(&self) -> bool {
        self.ik_flags.contains(IkFlags::LOCAL_ROT_LOCKED)
    }

    /// Mark the joint as one the solve is expected to adjust, so the caller
    /// knows to harvest its local rotation afterwards.
    pub(crate) fn flag_for_harvest(&mut self) {
        self.ik_flags |= IkFlags::ADJUSTED_LOCAL_ROT;
    }

    /// Remember the active config and cache its flags. Applied later, when
    /// chains are rebuilt.
    pub(crate) fn set_config(&mut self, config: &JointConfig) {
        self.config_flags = config.flags();
        self.config = Some(config.clone());
    }

    /// Clear per-solve state. The root keeps its permanent rotation lock.
    pub(crate) fn reset_flags(&mut self) {
        self.config = None;
        self.config_flags = ConfigFlags::empty();
        self.ik_flags = if self.parent.is_some() {
            IkFlags::empty()
        } else {
            IkFlags::LOCAL_ROT_LOCKED
        };
    }

    /// Pin the local rotation for this solve. The root variant writes the
    /// world rotation too, since its local frame is the world frame.
    pub(crate) fn lock_local_rot(&mut self, local_rot: UnitQuaternion<f32>) {
        self.local_rot = local_rot;
        self.ik_flags |= IkFlags::LOCAL_ROT_LOCKED;
        self.activate();
        if self.parent.is_none() {
            self.rot = local_rot;
        }
    }

    pub(crate) fn set_local_rot(&mut self, local_rot: UnitQuaternion<f32>) {
        if !self.local_rot_locked() {
            self.local_rot = local_rot;
        }
    }

    /// Overwrite the current local position. Expected only before solver
    /// iterations begin; the caller's value is scaled by `local_scale`.
    pub(crate) fn set_local_pos(&mut self, pos: &Vector3<f32>) {
        self.local_pos = pos.component_mul(&self.local_scale);
        self.local_pos_length = self.local_pos.norm();
        if self.parent.is_none() {
            self.pos = self.local_pos;
        }
    }

    /// Apply a caller scale tweak onto the current geometry.
    ///
    /// The previous tweak is divided back out first; non-invertible
    /// components zero the reciprocal instead of producing NaN.
    pub(crate) fn set_local_scale(&mut self, scale: &Vector3<f32>) {
        let mut re_scale = Vector3::zeros();
        for i in 0..3 {
            re_scale[i] = if self.local_scale[i] > MIN_INVERTIBLE_SCALE {
                scale[i] / self.local_scale[i]
            } else {
                0.0
            };
        }
        self.local_scale = *scale;
        self.bone.component_mul_assign(&re_scale);
        self.local_pos.component_mul_assign(&re_scale);
        self.local_pos_length = self.local_pos.norm();
    }

    /// `local_pos` with the info provider's scale divided back out.
    ///
    /// The info scale was folded into `local_pos` at reset so iteration
    /// never recomputes it; harvesting callers want the pre-scaled frame.
    pub fn pre_scaled_local_pos(&self) -> Vector3<f32> {
        let scale = self.info.rest_scale();
        let mut inv_scale = Vector3::zeros();
        for i in 0..3 {
            inv_scale[i] = if scale[i] > MIN_INVERTIBLE_SCALE {
                1.0 / scale[i]
            } else {
                0.0
            };
        }
        self.local_pos.component_mul(&inv_scale)
    }

    /// The configured world-frame target position, if any.
    pub fn target_pos(&self) -> Option<Vector3<f32>> {
        if self.has_pos_target() {
            self.config.as_ref().map(|c| *c.target_pos())
        } else {
            None
        }
    }

    /// The configured world-frame target rotation, if any.
    pub fn target_rot(&self) -> Option<UnitQuaternion<f32>> {
        if self.has_rot_target() {
            self.config.as_ref().map(|c| *c.target_rot())
        } else {
            None
        }
    }

    /// Move an existing position target. Used by the sequential-effector
    /// fixup; a no-op when the joint has no position target.
    pub(crate) fn set_target_pos(&mut self, pos: Vector3<f32>) {
        if self.has_pos_target() {
            if let Some(config) = self.config.as_mut() {
                config.set_target_pos(pos);
            }
        }
    }
}

impl std::fmt::Debug for Joint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Joint")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("local_pos", &self.local_pos)
            .field("local_rot", &self.local_rot)
            .field("pos", &self.pos)
            .field("rot", &self.rot)
            .field("config_flags", &self.config_flags)
            .field("ik_flags", &self.ik_flags)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_joint() -> Joint {
        Joint::new(Arc::new(StaticJointInfo {
            position: Vector3::new(0.0, 1.0, 0.0),
            end: Vector3::new(0.0, 2.0, 0.0),
            scale: Vector3::new(2.0, 2.0, 2.0),
            joint_num: 3,
        }))
    }

    #[test]
    fn new_joint_folds_info_scale_into_geometry() {
        let joint = test_joint();
        assert_eq!(joint.id(), 3);
        assert_relative_eq!(joint.local_pos().y, 2.0);
        assert_relative_eq!(joint.bone().y, 4.0);
        assert_relative_eq!(joint.local_pos_length(), 2.0);
        // The caller tweak starts at one regardless of info scale.
        assert_relative_eq!(joint.local_scale().x, 1.0);
    }

    #[test]
    fn set_local_scale_rescales_geometry_once() {
        let mut joint = test_joint();
        joint.set_local_scale(&Vector3::new(3.0, 3.0, 3.0));
        assert_relative_eq!(joint.local_pos().y, 6.0);
        assert_relative_eq!(joint.bone().y, 12.0);

        // Re-applying the same tweak must not compound.
        joint.set_local_scale(&Vector3::new(3.0, 3.0, 3.0));
        assert_relative_eq!(joint.local_pos().y, 6.0);
        assert_relative_eq!(joint.bone().y, 12.0);
    }

    #[test]
    fn pre_scaled_local_pos_divides_out_info_scale() {
        let joint = test_joint();
        let pre = joint.pre_scaled_local_pos();
        assert_relative_eq!(pre.y, 1.0);
    }

    #[test]
    fn pre_scaled_local_pos_zeroes_degenerate_scale() {
        let joint = Joint::new(Arc::new(StaticJointInfo {
            position: Vector3::new(1.0, 1.0, 1.0),
            end: Vector3::new(1.0, 0.0, 0.0),
            scale: Vector3::new(1.0, 0.0, 1.0),
            joint_num: 0,
        }));
        let pre = joint.pre_scaled_local_pos();
        assert_relative_eq!(pre.x, 1.0);
        assert_relative_eq!(pre.y, 0.0);
    }

    #[test]
    fn lock_local_rot_activates_and_pins() {
        let mut joint = test_joint();
        let q = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.7);
        joint.lock_local_rot(q);
        assert!(joint.local_rot_locked());
        assert!(joint.is_active());
        // Parentless joints mirror the lock into the world frame.
        assert!(armature_core::almost_equal(joint.world_rot(), &q, 1e-6));

        // Further local writes are ignored while locked.
        joint.set_local_rot(UnitQuaternion::identity());
        assert!(armature_core::almost_equal(joint.local_rot(), &q, 1e-6));
    }

    #[test]
    fn reset_flags_preserves_root_lock() {
        let mut joint = test_joint();
        joint.lock_local_rot(UnitQuaternion::identity());
        joint.reset_flags();
        // No parent: the permanent root lock survives flag resets.
        assert!(joint.local_rot_locked());
        assert!(!joint.is_active());

        joint.parent = Some(0);
        joint.reset_flags();
        assert!(!joint.local_rot_locked());
    }

    #[test]
    fn harvest_flags_mask_local_fields() {
        let mut joint = test_joint();
        let mut config = JointConfig::new();
        config.set_local_pos(Vector3::zeros());
        config.set_target_pos(Vector3::zeros());
        joint.set_config(&config);
        joint.flag_for_harvest();
        let flags = joint.harvest_flags();
        assert!(flags.contains(ConfigFlags::LOCAL_POS));
        assert!(flags.contains(ConfigFlags::LOCAL_ROT));
        assert!(!flags.contains(ConfigFlags::TARGET_POS));
    }
}
