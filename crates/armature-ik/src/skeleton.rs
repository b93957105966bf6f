//! Flat joint arena plus the kinematic verbs the solver composes into
//! passes.
//!
//! Joints are stored in a `Vec` in creation order; parents are always added
//! before their children, so a parent's arena index is strictly less than
//! any of its children's. That ordering is what lets constraint enforcement
//! split-borrow a joint together with its parent when applying
//! bidirectional back-pressure.
//!
//! Every verb here restores the fundamental transform formulas (see
//! [`crate::joint`]) for the joints it touches before returning.

use std::collections::BTreeMap;
use std::sync::Arc;

use nalgebra::{Unit, UnitQuaternion, Vector3};

use armature_core::{QuatAccumulator, almost_equal, clamp_angle, nlerp, shortest_arc};

use crate::config::{ConfigFlags, IkFlags};
use crate::constraint::{Constraint, VERY_SMALL_ANGLE, renorm};
use crate::joint::{Joint, JointId, JointInfo};

/// Component tolerance below which two rotations are considered unchanged.
pub(crate) const ROT_EQUAL_TOLERANCE: f32 = 1.0e-5;

/// Blend fraction pulling a rotation-targeted joint's world rotation back
/// toward its target, applying chain back-pressure against the explicit
/// orientation.
pub(crate) const WORLD_ROT_TARGET_BACKPRESSURE_COEF: f32 = 0.5;

/// Bend-pivot norm below which an elbow/knee is treated as straight.
const MIN_PIVOT_LENGTH: f32 = 1.0e-6;

/// Dead-band: knee twist below this is left alone.
const MIN_KNEE_TWIST: f32 = 0.1;

const MIN_DIR_NORM: f32 = 1.0e-6;

/// How a hinge's back-pressure treats measured twist.
enum HingeTwist {
    /// Clamp into the elbow's twist limits.
    Clamp(f32, f32),
    /// Remove entirely, outside a small dead-band.
    Remove,
}

/// The joint arena.
pub struct Skeleton {
    joints: Vec<Joint>,
    index_by_id: BTreeMap<JointId, usize>,
}

impl Skeleton {
    pub fn new() -> Self {
        Self {
            joints: Vec::new(),
            index_by_id: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    /// Arena index for a joint id.
    pub fn index_of(&self, id: JointId) -> Option<usize> {
        self.index_by_id.get(&id).copied()
    }

    pub fn contains(&self, id: JointId) -> bool {
        self.index_by_id.contains_key(&id)
    }

    pub fn joint(&self, index: usize) -> &Joint {
        &self.joints[index]
    }

    pub(crate) fn joint_mut(&mut self, index: usize) -> &mut Joint {
        &mut self.joints[index]
    }

    pub fn get(&self, id: JointId) -> Option<&Joint> {
        self.index_of(id).map(|i| &self.joints[i])
    }

    /// Iterate joints in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Joint> {
        self.index_by_id.values().map(|&i| &self.joints[i])
    }

    /// Append a joint under `parent`, which must already be in the arena.
    pub(crate) fn add(
        &mut self,
        id: JointId,
        info: Arc<dyn JointInfo>,
        parent: Option<usize>,
        constraint: Option<Arc<Constraint>>,
    ) -> usize {
        let index = self.joints.len();
        let mut joint = Joint::new(info);
        joint.id = id;
        joint.parent = parent;
        joint.constraint = constraint;
        if parent.is_none() {
            // The root's local orientation is never relaxed or
            // constraint-adjusted; flag it up front so downstream logic can
            // assume any unlocked joint has a parent.
            joint.ik_flags = IkFlags::LOCAL_ROT_LOCKED;
        }
        self.index_by_id.insert(id, index);
        self.joints.push(joint);
        if let Some(p) = parent {
            self.joints[p].children.push(index);
        }
        self.reset_joint(index);
        index
    }

    /// Split-borrow a parent/child pair. Parents precede children in the
    /// arena, so `parent < child` always holds.
    fn pair_mut(&mut self, parent: usize, child: usize) -> (&mut Joint, &mut Joint) {
        debug_assert!(parent < child);
        let (head, tail) = self.joints.split_at_mut(child);
        (&mut head[parent], &mut tail[0])
    }

    fn parent_transform(&self, index: usize) -> Option<(Vector3<f32>, UnitQuaternion<f32>)> {
        self.joints[index].parent.map(|p| {
            let parent = &self.joints[p];
            (parent.pos, parent.rot)
        })
    }

    fn active_children(&self, index: usize) -> Vec<usize> {
        self.joints[index]
            .children
            .iter()
            .copied()
            .filter(|&c| self.joints[c].is_active())
            .collect()
    }

    /// The only active child, or `None` when there are zero or several.
    pub(crate) fn single_active_child(&self, index: usize) -> Option<usize> {
        let mut found = None;
        for &child in &self.joints[index].children {
            if self.joints[child].is_active() {
                if found.is_some() {
                    return None;
                }
                found = Some(child);
            }
        }
        found
    }

    // -----------------------------------------------------------------------
    // Rest pose and relaxation
    // -----------------------------------------------------------------------

    /// Restore rest geometry and identity rotation, re-deriving the world
    /// transform from the parent.
    pub(crate) fn reset_joint(&mut self, index: usize) {
        let parent = self.parent_transform(index);
        let joint = &mut self.joints[index];
        joint.reset_from_info();
        joint.local_rot = UnitQuaternion::identity();
        match parent {
            Some((parent_pos, parent_rot)) => {
                joint.pos = parent_pos + parent_rot * joint.local_pos;
                joint.rot = parent_rot;
            }
            None => {
                joint.pos = joint.local_pos;
                joint.rot = joint.local_rot;
            }
        }
    }

    pub(crate) fn reset_recursively(&mut self, index: usize) {
        self.reset_joint(index);
        let children = self.joints[index].children.clone();
        for child in children {
            self.reset_recursively(child);
        }
    }

    fn relax_rot(&mut self, index: usize, blend_factor: f32) {
        let parent = self.parent_transform(index);
        let joint = &mut self.joints[index];
        if !joint.local_rot_locked() {
            joint.local_rot = nlerp(blend_factor, &joint.local_rot, &UnitQuaternion::identity());
        }
        // World transforms always recompute: the parent may have relaxed.
        match parent {
            Some((parent_pos, parent_rot)) => {
                joint.rot = renorm(parent_rot * joint.local_rot);
                joint.pos = parent_pos + parent_rot * joint.local_pos;
            }
            None => {
                joint.rot = joint.local_rot;
                joint.pos = joint.local_pos;
            }
        }
    }

    /// Blend the subtree's local rotations toward rest by `blend_factor`,
    /// providing return pressure against numeric drift inside constraint
    /// feasible regions.
    pub(crate) fn relax_rotations_recursively(&mut self, index: usize, blend_factor: f32) {
        let blend_factor = blend_factor.clamp(0.0, 1.0);
        self.relax_rot(index, blend_factor);
        let children = self.active_children(index);
        for child in children {
            self.relax_rotations_recursively(child, blend_factor);
        }
    }

    /// Longest tip-to-leaf-end path length through this subtree.
    pub(crate) fn longest_chain_length(&self, index: usize, upstream: f32) -> f32 {
        let joint = &self.joints[index];
        let length = upstream + joint.local_pos_length;
        if joint.children.is_empty() {
            return length + joint.bone.norm();
        }
        let mut longest = length;
        for &child in &joint.children {
            longest = longest.max(self.longest_chain_length(child, length));
        }
        longest
    }

    // -----------------------------------------------------------------------
    // World transform maintenance
    // -----------------------------------------------------------------------

    pub(crate) fn update_pos_and_rot_from_parent(&mut self, index: usize) {
        if let Some((parent_pos, parent_rot)) = self.parent_transform(index) {
            let joint = &mut self.joints[index];
            joint.pos = parent_pos + parent_rot * joint.local_pos;
            joint.rot = renorm(parent_rot * joint.local_rot);
        }
    }

    /// Recompute world transforms for this joint and its active
    /// descendants. Useful after external edits to local transforms.
    pub fn update_world_transforms_recursively(&mut self, index: usize) {
        self.update_pos_and_rot_from_parent(index);
        let children = self.active_children(index);
        for child in children {
            self.update_world_transforms_recursively(child);
        }
    }

    /// Drift of the stored tip position from its parent-derived value.
    pub(crate) fn world_tip_offset(&self, index: usize) -> Vector3<f32> {
        let joint = &self.joints[index];
        match self.parent_transform(index) {
            Some((parent_pos, parent_rot)) => {
                joint.pos - (parent_pos + parent_rot * joint.local_pos)
            }
            None => joint.pos,
        }
    }

    pub(crate) fn shift_pos(&mut self, index: usize, shift: &Vector3<f32>) {
        self.joints[index].pos += shift;
    }

    // -----------------------------------------------------------------------
    // Local rotation maintenance
    // -----------------------------------------------------------------------

    /// Re-derive `local_rot` from the current world rotations.
    ///
    /// Returns true when a constraint fired (or the joint is locked and the
    /// computed value disagrees), which tells the caller the world rotation
    /// it derived from is no longer authoritative.
    pub(crate) fn update_local_rot(&mut self, index: usize, enforce_constraints: bool) -> bool {
        let Some((_, parent_rot)) = self.parent_transform(index) else {
            return false;
        };
        let joint = &mut self.joints[index];
        let new_local_rot = renorm(parent_rot.inverse() * joint.rot);
        if almost_equal(&new_local_rot, &joint.local_rot, ROT_EQUAL_TOLERANCE) {
            return false;
        }
        if joint.local_rot_locked() {
            return true;
        }
        joint.local_rot = new_local_rot;
        if enforce_constraints {
            self.enforce_constraint(index)
        } else {
            false
        }
    }

    /// Push `local_rot` forward into the world rotation.
    ///
    /// A rotation-targeted joint is blended halfway back toward its target
    /// first, and its `local_rot` recomputed from the blend.
    pub(crate) fn apply_local_rot(&mut self, index: usize) {
        match self.parent_transform(index) {
            Some((_, parent_rot)) => {
                let joint = &mut self.joints[index];
                let new_rot = renorm(parent_rot * joint.local_rot);
                if let Some(target_rot) = joint.target_rot() {
                    joint.rot = nlerp(WORLD_ROT_TARGET_BACKPRESSURE_COEF, &target_rot, &new_rot);
                    joint.local_rot = renorm(parent_rot.inverse() * joint.rot);
                } else {
                    joint.rot = new_rot;
                }
            }
            None => {
                let joint = &mut self.joints[index];
                joint.rot = joint.local_rot;
            }
        }
    }

    /// Re-derive each active child's `local_rot` from current world
    /// rotations.
    pub(crate) fn update_child_local_rots(&mut self, index: usize, enforce_constraints: bool) {
        let children = self.active_children(index);
        for child in children {
            self.update_local_rot(child, enforce_constraints);
        }
    }

    // -----------------------------------------------------------------------
    // Constraint enforcement
    // -----------------------------------------------------------------------

    /// Enforce this joint's constraint, if any. Returns true when anything
    /// changed.
    pub(crate) fn enforce_constraint(&mut self, index: usize) -> bool {
        let joint = &self.joints[index];
        if joint.local_rot_locked() || joint.has_disabled_constraint() {
            return false;
        }
        let Some(constraint) = joint.constraint.clone() else {
            return false;
        };
        match (&*constraint, joint.parent) {
            (Constraint::Elbow(elbow), Some(_)) => {
                let (min_twist, max_twist) = elbow.twist_limits();
                self.enforce_hinge_back_pressure(
                    index,
                    *elbow.pivot_axis(),
                    HingeTwist::Clamp(min_twist, max_twist),
                )
            }
            (Constraint::Knee(knee), Some(_)) => {
                self.enforce_hinge_back_pressure(index, *knee.pivot_axis(), HingeTwist::Remove)
            }
            _ => self.enforce_projection(index, &constraint),
        }
    }

    /// Default enforcement: project the local rotation and store it when it
    /// moved. The world rotation is left to the caller.
    fn enforce_projection(&mut self, index: usize, constraint: &Constraint) -> bool {
        let joint = &mut self.joints[index];
        let adjusted = constraint.compute_adjusted_local_rot(&joint.local_rot);
        if almost_equal(&adjusted, &joint.local_rot, VERY_SMALL_ANGLE) {
            return false;
        }
        joint.set_local_rot(adjusted);
        true
    }

    /// Elbow/knee enforcement with bidirectional back-pressure.
    ///
    /// Works in the world frame on the base/mid/end triangle: the actual
    /// bend pivot is derived from the two limb segments, the joint is
    /// twisted to align its pivot to it, and the parent is counter-rotated
    /// so its projected pivot matches as well. Local rotations are
    /// recomputed from the mutated world rotations afterwards.
    fn enforce_hinge_back_pressure(
        &mut self,
        index: usize,
        pivot: Vector3<f32>,
        twist: HingeTwist,
    ) -> bool {
        let parent_index = self.joints[index]
            .parent
            .expect("hinge back-pressure requires a parent");
        let grandparent_rot = self.joints[parent_index]
            .parent
            .map(|g| self.joints[g].rot);
        let (parent, child) = self.pair_mut(parent_index, index);

        // Vertices of the base/mid/end triangle (shoulder/elbow/wrist).
        let base = parent.pos;
        let mid = child.pos;
        let end = child.pos + child.rot * child.bone;

        let mut child_rot = child.rot;
        let lower_pivot = child_rot * pivot;
        let upper_pivot = parent.rot * pivot;

        let Some(lower) = (end - mid).try_normalize(MIN_DIR_NORM) else {
            return false;
        };
        let Some(upper) = (mid - base).try_normalize(MIN_DIR_NORM) else {
            return false;
        };

        // The pivot implied by the actual bend. Nearly-straight limbs leave
        // it undefined; fall back to the parent's notion.
        let bend_pivot = upper.cross(&lower);
        let bend_pivot = if bend_pivot.norm() < MIN_PIVOT_LENGTH {
            upper_pivot
        } else {
            bend_pivot.normalize()
        };

        // Twist of the lower segment relative to the bend pivot.
        let adjustment = shortest_arc(&bend_pivot, &lower_pivot);
        let mut angle = adjustment.angle();
        if let Some(axis) = adjustment.axis() {
            if axis.dot(&lower) < 0.0 {
                angle = -angle;
            }
        }

        let mut something_changed = false;
        let twist_delta = match twist {
            HingeTwist::Clamp(min_twist, max_twist) => {
                let new_twist = clamp_angle(angle, min_twist, max_twist);
                (new_twist != angle).then_some(new_twist - angle)
            }
            HingeTwist::Remove => (angle.abs() > MIN_KNEE_TWIST).then_some(-angle),
        };
        if let Some(delta) = twist_delta {
            let correction =
                UnitQuaternion::from_axis_angle(&Unit::new_normalize(lower), delta);
            child_rot = renorm(correction * child_rot);
            child.rot = child_rot;
            something_changed = true;
        }

        // Counter-rotate the parent so its projected pivot agrees with the
        // bend pivot. A rotation-locked parent stays put; its local frame
        // could not absorb the change.
        let mut parent_rot = parent.rot;
        let adjustment = shortest_arc(&upper_pivot, &bend_pivot);
        if !parent.local_rot_locked()
            && !almost_equal(&adjustment, &UnitQuaternion::identity(), VERY_SMALL_ANGLE)
        {
            parent_rot = renorm(adjustment * parent_rot);
            parent.rot = parent_rot;
            parent.local_rot = match grandparent_rot {
                Some(grandparent_rot) => renorm(grandparent_rot.inverse() * parent_rot),
                None => parent_rot,
            };
            something_changed = true;
        }

        if something_changed {
            child.set_local_rot(renorm(parent_rot.inverse() * child_rot));
        }
        something_changed
    }

    // -----------------------------------------------------------------------
    // Target collection
    // -----------------------------------------------------------------------

    /// Paired local/world target samples for this joint.
    ///
    /// Either the single bone/effector pair when the joint carries a
    /// position target, or one `(child.local_pos, child.pos)` pair per
    /// active child.
    pub(crate) fn collect_target_positions(
        &self,
        index: usize,
    ) -> (Vec<Vector3<f32>>, Vec<Vector3<f32>>) {
        let joint = &self.joints[index];
        let mut local_targets = Vec::new();
        let mut world_targets = Vec::new();
        if let Some(target_pos) = joint.target_pos() {
            local_targets.push(joint.bone);
            world_targets.push(target_pos);
        } else {
            for &child in &joint.children {
                let child = &self.joints[child];
                if child.is_active() {
                    local_targets.push(child.local_pos);
                    world_targets.push(child.pos);
                }
            }
        }
        (local_targets, world_targets)
    }

    // -----------------------------------------------------------------------
    // FABRIK micro-passes
    // -----------------------------------------------------------------------

    /// Inward update of a chain's outer end (effector or sub-base).
    pub(crate) fn update_end_inward(&mut self, index: usize, enforce_constraints: bool) {
        if let Some(target_rot) = self.joints[index].target_rot() {
            let joint = &mut self.joints[index];
            joint.rot = target_rot;
            if let Some(target_pos) = joint.target_pos() {
                // Place the tip so the end lands exactly on the target.
                joint.pos = target_pos - joint.rot * joint.bone;
            }
        } else {
            let (local_targets, world_targets) = self.collect_target_positions(index);
            let num_targets = local_targets.len();
            if num_targets == 1 {
                let joint = &mut self.joints[index];
                if let Some(bone_dir) =
                    (world_targets[0] - joint.pos).try_normalize(MIN_DIR_NORM)
                {
                    joint.pos = world_targets[0] - bone_dir * local_targets[0].norm();
                    let old_bone = joint.rot * local_targets[0];
                    joint.rot = renorm(shortest_arc(&old_bone, &bone_dir) * joint.rot);
                }
            } else if num_targets > 1 {
                let parent_is_active = self.joints[index]
                    .parent
                    .is_some_and(|p| self.joints[p].is_active());
                let joint = &mut self.joints[index];
                let mut new_pos = Vector3::zeros();
                let mut adjustments = QuatAccumulator::new();
                for i in 0..num_targets {
                    let new_bone = (world_targets[i] - joint.pos)
                        .try_normalize(MIN_DIR_NORM)
                        .unwrap_or_else(|| joint.rot * local_targets[i])
                        * local_targets[i].norm();
                    new_pos += world_targets[i] - new_bone;
                    let old_bone = joint.rot * local_targets[i];
                    adjustments.push(&shortest_arc(&old_bone, &new_bone));
                }
                // A sub-base whose parent is outside the active set anchors
                // the chains below it; only a movable parent lets its tip
                // drift toward the centroid.
                if parent_is_active {
                    joint.pos = new_pos / num_targets as f32;
                }
                if let Some(avg) = adjustments.average() {
                    joint.rot = renorm(avg * joint.rot);
                }
            }
        }
        // local_rot is settled later, once the parent's position is known.

        // Now that this rotation is known, settle the children's local
        // rotations; a fired child constraint swings this joint in return.
        let children = self.active_children(index);
        let mut something_changed = false;
        for &child in &children {
            something_changed |= self.update_local_rot(child, enforce_constraints);
        }
        if something_changed {
            let mut rots = QuatAccumulator::new();
            for &child in &children {
                let child = &self.joints[child];
                rots.push(&renorm(child.rot * child.local_rot.inverse()));
            }
            if let Some(avg) = rots.average() {
                self.joints[index].rot = avg;
            }
        }
    }

    /// Inward update of an interior chain joint; `child`'s position is
    /// already settled.
    pub(crate) fn update_inward(&mut self, index: usize, child: usize, enforce_constraints: bool) {
        let (child_pos, child_local_pos, child_local_pos_length) = {
            let c = &self.joints[child];
            (c.pos, c.local_pos, c.local_pos_length)
        };
        {
            let joint = &mut self.joints[index];
            if let Some(bone_dir) = (child_pos - joint.pos).try_normalize(MIN_DIR_NORM) {
                joint.pos = child_pos - bone_dir * child_local_pos_length;
                let old_bone = joint.rot * child_local_pos;
                joint.rot = renorm(shortest_arc(&old_bone, &bone_dir) * joint.rot);
            }
        }

        // Settle the child's local rotation; when its constraint fires, the
        // child swings this joint back.
        if self.update_local_rot(child, enforce_constraints) {
            let (child_rot, child_local_rot) = {
                let c = &self.joints[child];
                (c.rot, c.local_rot)
            };
            let joint = &mut self.joints[index];
            joint.rot = renorm(child_rot * child_local_rot.inverse());
            joint.pos = child_pos - joint.rot * child_local_pos;
        }
        // This joint's local_rot is settled later, on the outward pass.
    }

    /// Re-anchor an active branch root after the inward phase: swing its
    /// world rotation toward the inward-computed positions of its active
    /// children, then settle those children's local rotations.
    ///
    /// The position never moves, and an explicitly configured rotation
    /// (local override or world target) is left alone.
    pub(crate) fn update_branch_root(&mut self, index: usize, enforce_constraints: bool) {
        let joint = &self.joints[index];
        let configured = joint.has_rot_target()
            || joint.config_flags().contains(ConfigFlags::LOCAL_ROT);
        if !configured {
            let children = self.active_children(index);
            let mut adjustments = QuatAccumulator::new();
            let joint = &self.joints[index];
            for &child in &children {
                let child = &self.joints[child];
                let old_bone = joint.rot * child.local_pos;
                let new_bone = child.pos - joint.pos;
                adjustments.push(&shortest_arc(&old_bone, &new_bone));
            }
            if let Some(avg) = adjustments.average() {
                let parent_rot = self.parent_transform(index).map(|(_, rot)| rot);
                let joint = &mut self.joints[index];
                joint.rot = renorm(avg * joint.rot);
                // Keep rot == parent.rot * local_rot without disturbing the
                // root's permanent lock semantics elsewhere.
                joint.local_rot = match parent_rot {
                    Some(parent_rot) => renorm(parent_rot.inverse() * joint.rot),
                    None => joint.rot,
                };
            }
        }
        self.update_child_local_rots(index, enforce_constraints);
    }

    /// Outward update of a chain's outer end.
    pub(crate) fn update_end_outward(&mut self, index: usize, enforce_constraints: bool) {
        let (parent_pos, parent_rot) = self
            .parent_transform(index)
            .expect("chain outer end has a parent");
        {
            let joint = &mut self.joints[index];
            joint.pos = parent_pos + parent_rot * joint.local_pos;
            if joint.local_rot_locked() {
                joint.rot = renorm(parent_rot * joint.local_rot);
                return;
            }
        }

        if let Some(target_rot) = self.joints[index].target_rot() {
            let joint = &mut self.joints[index];
            joint.rot = target_rot;
            if let Some(target_pos) = joint.target_pos() {
                joint.pos = target_pos - joint.rot * joint.bone;
            }
        } else {
            let (local_targets, world_targets) = self.collect_target_positions(index);
            let joint = &mut self.joints[index];
            match local_targets.len() {
                0 => {}
                1 => {
                    let new_bone = world_targets[0] - joint.pos;
                    let old_bone = joint.rot * local_targets[0];
                    joint.rot = renorm(shortest_arc(&old_bone, &new_bone) * joint.rot);
                }
                n => {
                    let mut adjustments = QuatAccumulator::new();
                    for i in 0..n {
                        let new_bone = world_targets[i] - joint.pos;
                        let old_bone = joint.rot * local_targets[i];
                        adjustments.push(&shortest_arc(&old_bone, &new_bone));
                    }
                    if let Some(avg) = adjustments.average() {
                        joint.rot = renorm(avg * joint.rot);
                    }
                }
            }
        }

        if self.update_local_rot(index, enforce_constraints) {
            self.apply_local_rot(index);
        }
    }

    /// Outward update of an interior chain joint: re-anchor on the parent,
    /// then keep the bone pointed at the old end position.
    pub(crate) fn update_outward(&mut self, index: usize, enforce_constraints: bool) {
        let (parent_pos, parent_rot) = self
            .parent_transform(index)
            .expect("interior chain joint has a parent");
        {
            let joint = &mut self.joints[index];
            let old_end_pos = joint.pos + joint.rot * joint.bone;
            joint.pos = parent_pos + parent_rot * joint.local_pos;
            let new_bone = old_end_pos - joint.pos;
            let old_bone = joint.rot * joint.bone;
            joint.rot = renorm(shortest_arc(&old_bone, &new_bone) * joint.rot);
        }
        if self.update_local_rot(index, enforce_constraints) {
            self.apply_local_rot(index);
        }
    }

    // -----------------------------------------------------------------------
    // CCD primitives
    // -----------------------------------------------------------------------

    /// Rewrite world-frame `targets` into the parent's local frame of this
    /// joint, for handing to the next joint inward.
    pub(crate) fn transform_targets_to_parent_local(
        &self,
        index: usize,
        targets: &mut [Vector3<f32>],
    ) {
        let Some((parent_pos, parent_rot)) = self.parent_transform(index) else {
            return;
        };
        let world_to_parent = parent_rot.inverse();
        let joint = &self.joints[index];
        for target in targets.iter_mut() {
            let world_target = (joint.pos + joint.rot * *target) - parent_pos;
            *target = world_to_parent * world_target;
        }
    }

    /// Swing this joint's world rotation a fraction of the way toward its
    /// targets, then settle its local rotation and constraint.
    ///
    /// Returns false when the joint was already aligned, which lets the
    /// caller stop walking the chain.
    pub(crate) fn swing_toward_targets(
        &mut self,
        index: usize,
        local_targets: &[Vector3<f32>],
        world_targets: &[Vector3<f32>],
        swing_factor: f32,
    ) -> bool {
        if self.joints[index].local_rot_locked() {
            // Nothing to do, but the targets are presumed unreached.
            return true;
        }

        let mut something_changed = false;
        if let Some(target_rot) = self.joints[index].target_rot() {
            self.joints[index].rot = target_rot;
            something_changed = true;
        } else {
            let joint = &mut self.joints[index];
            let adjustment = if local_targets.len() == 1 {
                let old_bone = joint.rot * local_targets[0];
                let new_bone = world_targets[0] - joint.pos;
                shortest_arc(&old_bone, &new_bone)
            } else {
                let mut adjustments = QuatAccumulator::new();
                for i in 0..local_targets.len() {
                    let old_bone = joint.rot * local_targets[i];
                    let new_bone = world_targets[i] - joint.pos;
                    adjustments.push(&shortest_arc(&old_bone, &new_bone));
                }
                adjustments.average().unwrap_or_else(UnitQuaternion::identity)
            };

            if !almost_equal(&adjustment, &UnitQuaternion::identity(), VERY_SMALL_ANGLE) {
                // Take only a fraction of the full correction so the swing
                // distributes along the chain.
                let adjustment = nlerp(swing_factor, &UnitQuaternion::identity(), &adjustment);
                joint.rot = renorm(adjustment * joint.rot);
                something_changed = true;
            }
        }

        if something_changed {
            if let Some((_, parent_rot)) = self.parent_transform(index) {
                let joint = &mut self.joints[index];
                joint.local_rot = renorm(parent_rot.inverse() * joint.rot);
            }
            self.enforce_constraint(index);
            // Even if the constraint moved local_rot, world transforms are
            // recomputed wholesale after the CCD pass.
        }
        something_changed
    }
}

impl Default for Skeleton {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
