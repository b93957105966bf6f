//! The IK solver: owns the skeleton, applies per-frame configs, and runs
//! the iterative passes.
//!
//! The solver uses Forward And Backward Reaching Inverse Kinematics
//! (FABRIK, <http://andreasaristidou.com/FABRIK.html>) by default, with
//! constraint enforcement folded into both pass directions. A Cyclic
//! Coordinate Descent pass is retained as an experimental alternative; it
//! converges well but is more prone to instability under constraint
//! enforcement.
//!
//! A typical frame:
//!
//! ```no_run
//! # use armature_ik::{Solver, JointConfig};
//! # use std::collections::BTreeMap;
//! # let mut solver = Solver::new();
//! # let configs: BTreeMap<i16, JointConfig> = BTreeMap::new();
//! if solver.update_joint_configs(&configs) {
//!     let max_error = solver.solve();
//!     let _ = max_error;
//! }
//! // read back local transforms for every active joint
//! for id in solver.active_joint_ids() {
//!     let _ = solver.joint_local_transform(id);
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use nalgebra::{UnitQuaternion, Vector3};
use tracing::{debug, warn};

use armature_core::almost_equal;

use crate::chain::{ChainOptions, rebuild_chains};
use crate::config::{ConfigFlags, JointConfig};
use crate::constraint::Constraint;
use crate::joint::{Joint, JointId, JointInfo};
use crate::skeleton::{ROT_EQUAL_TOLERANCE, Skeleton};

/// Default acceptable end-effector error: half a millimeter.
pub const DEFAULT_ACCEPTABLE_ERROR: f32 = 5.0e-4;

const MAX_SOLVER_ITERATIONS: u32 = 16;
const MIN_SOLVER_ITERATIONS: u32 = 4;

/// Fraction of the way each active subtree relaxes toward rest before a
/// solve, as return pressure against drift inside constraint feasible
/// regions.
const INITIAL_RELAXATION_FACTOR: f32 = 0.25;

/// Fraction of the full correction each CCD step takes, so rotation
/// distributes along the chain.
const DEFAULT_CCD_SWING_FACTOR: f32 = 0.25;

/// Which iterative pass [`Solver::solve`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IkAlgorithm {
    /// Forward And Backward Reaching IK. The default.
    #[default]
    Fabrik,
    /// Cyclic Coordinate Descent. Experimental.
    Ccd,
}

/// Maintains a skeleton of connected joints and computes the
/// parent-relative orientations that carry end-effectors to their targets.
pub struct Solver {
    skeleton: Skeleton,
    configs: BTreeMap<JointId, JointConfig>,
    chains: BTreeMap<JointId, Vec<usize>>,
    active_roots: BTreeSet<usize>,
    active_joints: Vec<usize>,
    /// Reserved for the drop-elbow heuristic; collected but not consulted
    /// during the solve.
    wrist_joints: Vec<usize>,
    sub_base_ids: BTreeSet<JointId>,
    sub_root_ids: BTreeSet<JointId>,
    root_id: JointId,
    algorithm: IkAlgorithm,
    acceptable_error: f32,
    last_error: f32,
}

impl Solver {
    pub fn new() -> Self {
        Self {
            skeleton: Skeleton::new(),
            configs: BTreeMap::new(),
            chains: BTreeMap::new(),
            active_roots: BTreeSet::new(),
            active_joints: Vec::new(),
            wrist_joints: Vec::new(),
            sub_base_ids: BTreeSet::new(),
            sub_root_ids: BTreeSet::new(),
            root_id: -1,
            algorithm: IkAlgorithm::Fabrik,
            acceptable_error: DEFAULT_ACCEPTABLE_ERROR,
            last_error: 0.0,
        }
    }

    // -----------------------------------------------------------------------
    // Skeleton construction
    // -----------------------------------------------------------------------

    /// Add a joint. Parents must be added before their children; a
    /// `parent_id` below the root id makes the joint the skeleton root.
    ///
    /// Invalid additions (negative id, duplicate id, unknown parent) warn
    /// and are skipped.
    pub fn add_joint(
        &mut self,
        joint_id: JointId,
        parent_id: JointId,
        info: Arc<dyn JointInfo>,
        constraint: Option<Arc<Constraint>>,
    ) {
        if joint_id < 0 {
            warn!(joint_id, "refusing to add joint: invalid id");
            return;
        }
        if self.skeleton.contains(joint_id) {
            warn!(joint_id, "refusing to add joint: id already exists");
            return;
        }
        let parent = self.skeleton.index_of(parent_id);
        if parent.is_none() && parent_id >= self.root_id {
            warn!(joint_id, parent_id, "refusing to add joint: unknown parent");
            return;
        }
        self.skeleton.add(joint_id, info, parent, constraint);
    }

    pub fn set_root_id(&mut self, root_id: JointId) {
        self.root_id = root_id;
    }

    pub fn root_id(&self) -> JointId {
        self.root_id
    }

    /// Declare joints the chain builder must treat as sub-bases even when
    /// topology alone would not (e.g. the chest, or wrists above finger
    /// chains).
    pub fn set_sub_base_ids(&mut self, ids: BTreeSet<JointId>) {
        self.sub_base_ids = ids;
    }

    /// Declare joints where chain walks stop as if at the root, excluding
    /// everything inward of them (e.g. the spine) from the solve.
    pub fn set_sub_root_ids(&mut self, ids: BTreeSet<JointId>) {
        self.sub_root_ids = ids;
    }

    /// Register a wrist joint for the drop-elbow heuristic. Currently a
    /// recorded no-op hook.
    pub fn add_wrist_id(&mut self, wrist_id: JointId) {
        match self.skeleton.index_of(wrist_id) {
            Some(index) => self.wrist_joints.push(index),
            None => debug!(wrist_id, "ignoring unknown wrist id"),
        }
    }

    /// The wrists registered so far, in registration order.
    pub fn wrist_joint_ids(&self) -> Vec<JointId> {
        self.wrist_joints
            .iter()
            .map(|&i| self.skeleton.joint(i).id())
            .collect()
    }

    pub fn set_acceptable_error(&mut self, acceptable_error: f32) {
        self.acceptable_error = acceptable_error;
    }

    pub fn acceptable_error(&self) -> f32 {
        self.acceptable_error
    }

    pub fn set_algorithm(&mut self, algorithm: IkAlgorithm) {
        self.algorithm = algorithm;
    }

    pub fn algorithm(&self) -> IkAlgorithm {
        self.algorithm
    }

    // -----------------------------------------------------------------------
    // Config intake
    // -----------------------------------------------------------------------

    /// Replace the cached configs when `configs` differs, returning whether
    /// anything changed.
    ///
    /// Structurally identical maps whose positions agree within the
    /// acceptable error and whose rotations are almost equal are treated as
    /// unchanged, so a caller resubmitting a static pose skips the solve.
    pub fn update_joint_configs(&mut self, configs: &BTreeMap<JointId, JointConfig>) -> bool {
        let something_changed = self.configs_differ(configs);
        if something_changed {
            self.configs = configs.clone();
        }
        something_changed
    }

    fn configs_differ(&self, configs: &BTreeMap<JointId, JointConfig>) -> bool {
        if configs.len() != self.configs.len() {
            return true;
        }
        for (id, old) in &self.configs {
            let Some(new) = configs.get(id) else {
                return true;
            };
            let flags = old.flags();
            if flags != new.flags() {
                return true;
            }
            if flags.contains(ConfigFlags::TARGET_POS)
                && (old.target_pos() - new.target_pos()).norm() > self.acceptable_error
            {
                return true;
            }
            if flags.contains(ConfigFlags::TARGET_ROT)
                && !almost_equal(old.target_rot(), new.target_rot(), ROT_EQUAL_TOLERANCE)
            {
                return true;
            }
            if flags.contains(ConfigFlags::LOCAL_POS)
                && (old.local_pos() - new.local_pos()).norm() > self.acceptable_error
            {
                return true;
            }
            if flags.contains(ConfigFlags::LOCAL_ROT)
                && !almost_equal(old.local_rot(), new.local_rot(), ROT_EQUAL_TOLERANCE)
            {
                return true;
            }
        }
        false
    }

    // -----------------------------------------------------------------------
    // Solving
    // -----------------------------------------------------------------------

    /// Run the iterative solve against the cached configs and return the
    /// maximum end-effector error.
    pub fn solve(&mut self) -> f32 {
        self.rebuild_all_chains();

        for root in self.active_roots.clone() {
            self.skeleton
                .relax_rotations_recursively(root, INITIAL_RELAXATION_FACTOR);
        }

        let mut max_error = f32::MAX;
        let mut iteration = 0;
        while iteration < MIN_SOLVER_ITERATIONS
            || (iteration < MAX_SOLVER_ITERATIONS && max_error > self.acceptable_error)
        {
            max_error = self.solve_once();
            iteration += 1;
        }
        self.last_error = max_error;
        self.last_error
    }

    /// Submit configs and solve, skipping the solve entirely when nothing
    /// changed since the previous call.
    pub fn solve_for_configs(&mut self, configs: &BTreeMap<JointId, JointConfig>) -> f32 {
        if !self.update_joint_configs(configs) {
            return self.last_error;
        }
        self.solve()
    }

    pub fn last_error(&self) -> f32 {
        self.last_error
    }

    fn solve_once(&mut self) -> f32 {
        match self.algorithm {
            IkAlgorithm::Fabrik => self.execute_fabrik_pass(true),
            IkAlgorithm::Ccd => self.execute_ccd_pass(),
        }
        self.measure_max_error()
    }

    fn rebuild_all_chains(&mut self) {
        let options = ChainOptions {
            root_id: self.root_id,
            sub_base_ids: &self.sub_base_ids,
            sub_root_ids: &self.sub_root_ids,
        };
        let set = rebuild_chains(&mut self.skeleton, &mut self.configs, &options);
        self.chains = set.chains;
        self.active_roots = set.active_roots;
        self.active_joints = set.active_joints;
    }

    fn execute_fabrik_pass(&mut self, enforce_constraints: bool) {
        // Chains are keyed by outer-end id low-to-high; the inward phase
        // walks them in reverse so every sub-base sees its outer chains
        // settled before its own.
        let chains: Vec<Vec<usize>> = self.chains.values().rev().cloned().collect();
        for chain in &chains {
            self.execute_fabrik_inward(chain, enforce_constraints);
        }

        // The inward phase leaves each chain's inner end unsettled. Active
        // roots re-anchor here: their position holds, their rotation swings
        // toward the dragged children, and the children's local rotations
        // (not the root's own) get their constraints applied.
        for root in self.active_roots.clone() {
            self.skeleton.update_branch_root(root, enforce_constraints);
        }

        // Outward phase in forward order, so inner chains settle before the
        // chains hanging off them.
        let chains: Vec<Vec<usize>> = self.chains.values().cloned().collect();
        for chain in &chains {
            self.execute_fabrik_outward(chain, enforce_constraints);
        }
        // Both local- and world-frame transforms are consistent here.
    }

    fn execute_fabrik_inward(&mut self, chain: &[usize], enforce_constraints: bool) {
        // The outer end either has a target or is a sub-base with active
        // children.
        self.skeleton.update_end_inward(chain[0], enforce_constraints);

        // Interior joints follow, pulling each toward its already-settled
        // child. The inner end is left alone: it is the outer end of
        // another chain, or an active root handled after the inward phase.
        let last_index = chain.len() - 1;
        for i in 1..last_index {
            self.skeleton
                .update_inward(chain[i], chain[i - 1], enforce_constraints);
        }
    }

    fn execute_fabrik_outward(&mut self, chain: &[usize], enforce_constraints: bool) {
        // The inner end does not move in this phase; interior joints
        // re-anchor outward from it.
        let last_index = chain.len() - 1;
        for i in (1..last_index).rev() {
            self.skeleton.update_outward(chain[i], enforce_constraints);
        }
        self.skeleton
            .update_end_outward(chain[0], enforce_constraints);
    }

    /// Cyclic Coordinate Descent: an inward-only alternative pass.
    fn execute_ccd_pass(&mut self) {
        let chains: Vec<Vec<usize>> = self.chains.values().rev().cloned().collect();
        for chain in &chains {
            self.execute_ccd_inward(chain);
        }

        // The inward sweeps leave each chain detached from its base; shift
        // every chain rigidly back onto it.
        let chains: Vec<Vec<usize>> = self.chains.values().cloned().collect();
        for chain in &chains {
            self.shift_chain_to_base(chain);
        }
    }

    fn execute_ccd_inward(&mut self, chain: &[usize]) {
        let outer_end = chain[0];
        let (mut local_targets, world_targets) =
            self.skeleton.collect_target_positions(outer_end);
        if local_targets.is_empty() {
            return;
        }

        if !self.skeleton.swing_toward_targets(
            outer_end,
            &local_targets,
            &world_targets,
            DEFAULT_CCD_SWING_FACTOR,
        ) {
            // Already aligned.
            return;
        }

        // Swing interior joints inward until one reports no movement. The
        // inner end belongs to another chain or an active root.
        let last_index = chain.len() - 1;
        let mut last_swung_index = 0;
        for i in 1..last_index {
            self.skeleton
                .transform_targets_to_parent_local(chain[i - 1], &mut local_targets);
            if !self.skeleton.swing_toward_targets(
                chain[i],
                &local_targets,
                &world_targets,
                DEFAULT_CCD_SWING_FACTOR,
            ) {
                break;
            }
            last_swung_index = i;
        }

        // Refresh world transforms of everything below the last swung
        // joint.
        for i in (0..last_swung_index).rev() {
            self.skeleton.update_pos_and_rot_from_parent(chain[i]);
        }

        self.skeleton.update_child_local_rots(outer_end, false);
    }

    /// Translate a chain rigidly so its second-to-inner joint lands on its
    /// parent-derived position.
    fn shift_chain_to_base(&mut self, chain: &[usize]) {
        if chain.len() < 2 {
            return;
        }
        let inner_end_child = chain[chain.len() - 2];
        let offset = self.skeleton.world_tip_offset(inner_end_child);
        if offset.norm_squared() > self.acceptable_error * self.acceptable_error {
            for &index in &chain[..chain.len() - 1] {
                self.skeleton.shift_pos(index, &-offset);
            }
        }
    }

    /// Largest distance between a position-targeted joint's world end
    /// position and its target. The root and delegated joints are skipped.
    fn measure_max_error(&self) -> f32 {
        let mut max_error = 0.0f32;
        for (&id, config) in &self.configs {
            if id == self.root_id {
                continue;
            }
            if !config.has_target_pos() || config.is_delegated() {
                continue;
            }
            let Some(joint) = self.skeleton.get(id) else {
                continue;
            };
            let error = (joint.world_end_pos() - config.target_pos()).norm();
            max_error = max_error.max(error);
        }
        max_error
    }

    // -----------------------------------------------------------------------
    // Readbacks and maintenance
    // -----------------------------------------------------------------------

    pub fn joint(&self, joint_id: JointId) -> Option<&Joint> {
        self.skeleton.get(joint_id)
    }

    pub fn joint_local_pos(&self, joint_id: JointId) -> Option<Vector3<f32>> {
        self.skeleton.get(joint_id).map(|j| *j.local_pos())
    }

    pub fn joint_local_rot(&self, joint_id: JointId) -> Option<UnitQuaternion<f32>> {
        self.skeleton.get(joint_id).map(|j| *j.local_rot())
    }

    pub fn joint_local_transform(
        &self,
        joint_id: JointId,
    ) -> Option<(Vector3<f32>, UnitQuaternion<f32>)> {
        self.skeleton
            .get(joint_id)
            .map(|j| (*j.local_pos(), *j.local_rot()))
    }

    pub fn joint_world_rot(&self, joint_id: JointId) -> Option<UnitQuaternion<f32>> {
        self.skeleton.get(joint_id).map(|j| *j.world_rot())
    }

    pub fn joint_world_tip_pos(&self, joint_id: JointId) -> Option<Vector3<f32>> {
        self.skeleton.get(joint_id).map(|j| *j.world_tip_pos())
    }

    pub fn joint_world_end_pos(&self, joint_id: JointId) -> Option<Vector3<f32>> {
        self.skeleton.get(joint_id).map(|j| j.world_end_pos())
    }

    /// Ids of every joint the last rebuild flagged as active, ascending.
    pub fn active_joint_ids(&self) -> Vec<JointId> {
        self.active_joints
            .iter()
            .map(|&i| self.skeleton.joint(i).id())
            .collect()
    }

    /// Shared access to the skeleton, for invariant checks and tooling.
    pub fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    /// Put the skeleton back into its rest pose (e.g. T-pose).
    pub fn reset_skeleton(&mut self) {
        if !self.skeleton.is_empty() {
            self.skeleton.reset_recursively(0);
        }
    }

    /// Re-pull one joint's rest geometry from its info provider and swap
    /// its constraint. Call after external edits to the rig.
    pub fn reset_joint_geometry(&mut self, joint_id: JointId, constraint: Option<Arc<Constraint>>) {
        let Some(index) = self.skeleton.index_of(joint_id) else {
            warn!(joint_id, "cannot reset geometry of unknown joint");
            return;
        };
        let joint = self.skeleton.joint_mut(index);
        joint.reset_from_info();
        joint.constraint = constraint;
        // Callers relying on compute_reach should re-query it after all
        // geometry resets are in.
    }

    /// Offset from the tip of `from_id` to the end of `to_id` accumulated
    /// along the ancestor walk, negated when `from_id > to_id`. Zero when
    /// the two joints have no ancestor relationship.
    pub fn compute_reach(&self, to_id: JointId, from_id: JointId) -> Vector3<f32> {
        let (ancestor, descendent, swapped) = if from_id > to_id {
            (to_id, from_id, true)
        } else {
            (from_id, to_id, false)
        };

        let mut reach = Vector3::zeros();
        if let Some(index) = self.skeleton.index_of(descendent) {
            let mut chain_reach = *self.skeleton.joint(index).bone();
            let mut cursor = Some(index);
            while let Some(i) = cursor {
                chain_reach += self.skeleton.joint(i).local_pos();
                cursor = self.skeleton.joint(i).parent;
                if let Some(p) = cursor {
                    if self.skeleton.joint(p).id() == ancestor {
                        reach = chain_reach;
                        break;
                    }
                }
            }
        }
        if swapped { -reach } else { reach }
    }

    /// Longest tip-to-leaf-end path through the whole skeleton.
    pub fn longest_chain_length(&self) -> f32 {
        if self.skeleton.is_empty() {
            0.0
        } else {
            self.skeleton.longest_chain_length(0, 0.0)
        }
    }
}

impl Default for Solver {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joint::StaticJointInfo;
    use approx::assert_relative_eq;

    fn info(id: JointId, pos: Vector3<f32>, end: Vector3<f32>) -> Arc<dyn JointInfo> {
        Arc::new(StaticJointInfo::new(id, pos, end))
    }

    fn straight_chain(n: usize) -> Solver {
        let mut solver = Solver::new();
        solver.set_root_id(0);
        solver.add_joint(0, -1, info(0, Vector3::zeros(), Vector3::x()), None);
        for i in 1..n {
            solver.add_joint(
                i as JointId,
                (i - 1) as JointId,
                info(i as JointId, Vector3::x(), Vector3::x()),
                None,
            );
        }
        solver
    }

    #[test]
    fn add_joint_rejects_bad_input() {
        let mut solver = Solver::new();
        solver.set_root_id(0);
        solver.add_joint(-2, -1, info(0, Vector3::zeros(), Vector3::x()), None);
        assert!(solver.joint(-2).is_none());

        solver.add_joint(0, -1, info(0, Vector3::zeros(), Vector3::x()), None);
        assert!(solver.joint(0).is_some());

        // Duplicate id is skipped.
        solver.add_joint(0, -1, info(0, Vector3::x(), Vector3::x()), None);
        assert_relative_eq!(solver.joint_local_pos(0).unwrap().x, 0.0);

        // Unknown (non-root-range) parent is skipped.
        solver.add_joint(5, 3, info(5, Vector3::x(), Vector3::x()), None);
        assert!(solver.joint(5).is_none());
    }

    #[test]
    fn config_diff_detects_changes_and_tolerates_noise() {
        let mut solver = straight_chain(3);
        let mut configs = BTreeMap::new();
        let mut config = JointConfig::new();
        config.set_target_pos(Vector3::new(2.0, 1.0, 0.0));
        configs.insert(2, config);

        assert!(solver.update_joint_configs(&configs));
        // Identical maps: no change.
        assert!(!solver.update_joint_configs(&configs));

        // Sub-tolerance jitter: still no change.
        let mut jittered = configs.clone();
        jittered
            .get_mut(&2)
            .unwrap()
            .set_target_pos(Vector3::new(2.0 + 1.0e-5, 1.0, 0.0));
        assert!(!solver.update_joint_configs(&jittered));

        // A real move is a change.
        let mut moved = configs.clone();
        moved
            .get_mut(&2)
            .unwrap()
            .set_target_pos(Vector3::new(2.5, 1.0, 0.0));
        assert!(solver.update_joint_configs(&moved));

        // Different flags are always a change.
        let mut reflagged = moved.clone();
        reflagged.get_mut(&2).unwrap().disable_constraint();
        assert!(solver.update_joint_configs(&reflagged));

        // Different key sets are always a change.
        let mut extra = reflagged.clone();
        extra.insert(1, JointConfig::new());
        assert!(solver.update_joint_configs(&extra));
    }

    #[test]
    fn solve_reaches_target_on_straight_chain() {
        let mut solver = straight_chain(4);
        let mut configs = BTreeMap::new();
        let mut config = JointConfig::new();
        config.set_target_pos(Vector3::new(2.0, 2.0, 0.0));
        configs.insert(3, config);

        let error = solver.solve_for_configs(&configs);
        assert!(
            error <= solver.acceptable_error(),
            "did not converge: {error}"
        );
        let end = solver.joint_world_end_pos(3).unwrap();
        assert_relative_eq!(end.x, 2.0, epsilon = 2.0e-3);
        assert_relative_eq!(end.y, 2.0, epsilon = 2.0e-3);
    }

    #[test]
    fn solve_for_configs_short_circuits() {
        let mut solver = straight_chain(3);
        let mut configs = BTreeMap::new();
        let mut config = JointConfig::new();
        config.set_target_pos(Vector3::new(1.5, 1.0, 0.0));
        configs.insert(2, config);

        let first = solver.solve_for_configs(&configs);
        let again = solver.solve_for_configs(&configs);
        assert_eq!(first, again);
    }

    #[test]
    fn unreachable_target_extends_chain_fully() {
        let mut solver = straight_chain(3);
        let mut configs = BTreeMap::new();
        let mut config = JointConfig::new();
        config.set_target_pos(Vector3::new(10.0, 0.0, 0.0));
        configs.insert(2, config);

        let error = solver.solve_for_configs(&configs);
        // Reach is 3 along +x; the best end position is (3, 0, 0).
        let end = solver.joint_world_end_pos(2).unwrap();
        assert_relative_eq!(end.x, 3.0, epsilon = 1.0e-2);
        assert_relative_eq!(error, 7.0, epsilon = 1.0e-2);
    }

    #[test]
    fn local_rot_override_is_harvested_verbatim() {
        let mut solver = straight_chain(3);
        let q = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.4);
        let mut configs = BTreeMap::new();
        let mut config = JointConfig::new();
        config.set_local_rot(q);
        configs.insert(1, config);

        solver.solve_for_configs(&configs);
        let local = solver.joint_local_rot(1).unwrap();
        assert!(almost_equal(&local, &q, 1e-5));
        assert_eq!(solver.active_joint_ids(), vec![1]);
    }

    #[test]
    fn compute_reach_accumulates_and_signs() {
        let solver = straight_chain(3);
        let reach = solver.compute_reach(2, 0);
        // Joint 2's bone plus local offsets of joints 2 and 1.
        assert_relative_eq!(reach.x, 3.0, epsilon = 1e-5);
        let back = solver.compute_reach(0, 2);
        assert_relative_eq!(back.x, -3.0, epsilon = 1e-5);
        // Unrelated ids yield zero.
        let none = solver.compute_reach(2, 7);
        assert_relative_eq!(none.x, 0.0);
    }

    #[test]
    fn reset_skeleton_restores_rest_pose_after_solve() {
        let mut solver = straight_chain(3);
        let mut configs = BTreeMap::new();
        let mut config = JointConfig::new();
        config.set_target_pos(Vector3::new(1.0, 1.5, 0.0));
        configs.insert(2, config);
        solver.solve_for_configs(&configs);

        solver.reset_skeleton();
        let end = solver.joint_world_end_pos(2).unwrap();
        assert_relative_eq!(end.x, 3.0, epsilon = 1e-5);
        assert_relative_eq!(end.y, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn longest_chain_length_spans_skeleton() {
        let solver = straight_chain(4);
        assert_relative_eq!(solver.longest_chain_length(), 4.0, epsilon = 1e-5);
    }

    #[test]
    fn wrist_registration_is_recorded_but_inert() {
        let mut solver = straight_chain(3);
        solver.add_wrist_id(2);
        solver.add_wrist_id(9); // unknown: ignored
        assert_eq!(solver.wrist_joint_ids(), vec![2]);
    }

    #[test]
    fn ccd_algorithm_reduces_error() {
        let mut solver = straight_chain(4);
        solver.set_algorithm(IkAlgorithm::Ccd);
        let mut configs = BTreeMap::new();
        let mut config = JointConfig::new();
        config.set_target_pos(Vector3::new(2.0, 2.0, 0.0));
        configs.insert(3, config);

        let error = solver.solve_for_configs(&configs);
        // CCD converges more slowly than FABRIK; just require substantial
        // progress from the rest-pose error (which is ~2.8).
        assert!(error < 1.0, "CCD made no progress: {error}");
    }
}
