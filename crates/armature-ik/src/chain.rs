//! Chain building: decompose the active joint set into solvable segments.
//!
//! A chain is an ordered list of arena indices from an outer end (effector
//! or sub-base) inward toward a stop joint, inclusive at both ends. Chains
//! are keyed by their outer-end joint id, which gives every pass a
//! deterministic traversal order.
//!
//! Consider a skeleton where bracketed ids carry effector targets:
//!
//! ```text
//!                     8             [11]
//!                    /              /
//!                   7---14--[15]   10
//!                  /              /
//!                 6---12---13    9
//!                /              /
//!      0----1---2----3----4---[5]--16---17--[18]
//!                \
//!                 19
//!                  \
//!                  [20]
//! ```
//!
//! The initial chains are `5:[5,4,3,2]`, `11:[11,10,9,5]`, `15:[15,14,7]`,
//! `18:[18,17,16,5]`, `20:[20,19,2]`, plus sub-base chains `2:[2,1,0]`,
//! `7:[7,6]`, `6:[6,2]`. Joints 6 and 7 are "false" sub-bases (one active
//! child, no target), so their chains are condensed into
//! `15:[15,14,7,6,2]`, leaving `2:[2,1,0]` as the only sub-base chain.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::config::{ConfigFlags, DEFAULT_CHAIN_LIMIT, JointConfig};
use crate::joint::JointId;
use crate::skeleton::Skeleton;

/// Caller-tunable stop rules for the chain walk.
pub(crate) struct ChainOptions<'a> {
    pub root_id: JointId,
    /// Declared sub-bases. When non-empty, skeleton topology is ignored and
    /// only whitelisted joints halt a chain.
    pub sub_base_ids: &'a BTreeSet<JointId>,
    /// Declared sub-roots: chain walks stop here as if at the root.
    pub sub_root_ids: &'a BTreeSet<JointId>,
}

impl ChainOptions<'_> {
    fn is_sub_base(&self, id: JointId) -> bool {
        self.sub_base_ids.contains(&id)
    }

    fn is_sub_root(&self, id: JointId) -> bool {
        self.sub_root_ids.contains(&id)
    }
}

/// The product of a rebuild: chains plus the active-root and active-joint
/// snapshots.
#[derive(Default)]
pub(crate) struct ChainSet {
    /// Chains keyed by outer-end joint id.
    pub chains: BTreeMap<JointId, Vec<usize>>,
    /// Inner ends whose parent is absent or inactive.
    pub active_roots: BTreeSet<usize>,
    /// Every joint the solve will touch, in ascending id order.
    pub active_joints: Vec<usize>,
}

/// Apply `configs` to the skeleton and rebuild the chain set.
///
/// The sequential-effector fixup rewrites parent target positions both in
/// the joint's cached config and in `configs`, which the error measurement
/// reads afterwards.
pub(crate) fn rebuild_chains(
    skeleton: &mut Skeleton,
    configs: &mut BTreeMap<JointId, JointConfig>,
    options: &ChainOptions<'_>,
) -> ChainSet {
    let mut set = ChainSet::default();

    for index in 0..skeleton.len() {
        skeleton.joint_mut(index).reset_flags();
    }

    let mut sub_bases: BTreeSet<JointId> = BTreeSet::new();
    let ids: Vec<JointId> = configs.keys().copied().collect();
    for id in ids {
        let Some(index) = skeleton.index_of(id) else {
            warn!(joint_id = id, "config references unknown joint");
            continue;
        };
        let config = configs[&id].clone();
        skeleton.joint_mut(index).set_config(&config);

        if id == options.root_id {
            apply_root_config(skeleton, index, &config, &mut set);
            continue;
        }

        if config.has_local_rot() {
            skeleton
                .joint_mut(index)
                .lock_local_rot(*config.local_rot());
        }

        if config.is_delegated() {
            // Delegated joints contribute no chain of their own.
            continue;
        }

        if config.has_target_pos() {
            let mut chain = Vec::new();
            build_chain(
                skeleton,
                index,
                &mut chain,
                &mut sub_bases,
                config.chain_limit(),
                options,
            );
            set.chains.insert(id, chain);
            adjust_sequential_effectors(skeleton, configs, index, &config);
        } else if config.has_target_rot() {
            let mut chain = Vec::new();
            build_chain(
                skeleton,
                index,
                &mut chain,
                &mut sub_bases,
                config.chain_limit(),
                options,
            );
            set.chains.insert(id, chain);
        }

        if config.has_local_pos() {
            let joint = skeleton.joint_mut(index);
            joint.set_local_pos(config.local_pos());
            joint.activate();
        }
        if config.has_local_scale() {
            let joint = skeleton.joint_mut(index);
            joint.set_local_scale(config.local_scale());
            joint.activate();
        }
    }

    // Each sub-base seeds a chain of its own; walking those chains can
    // uncover further sub-bases closer to the root.
    while !sub_bases.is_empty() {
        let mut new_sub_bases = BTreeSet::new();
        for id in sub_bases {
            let index = skeleton
                .index_of(id)
                .expect("sub-base discovered during walk");
            let mut chain = Vec::new();
            build_chain(
                skeleton,
                index,
                &mut chain,
                &mut new_sub_bases,
                DEFAULT_CHAIN_LIMIT,
                options,
            );
            set.chains.insert(id, chain);
        }
        sub_bases = new_sub_bases;
    }

    condense_false_sub_bases(skeleton, &mut set.chains, options);

    // Active roots: chain inner ends whose parent is absent or inactive.
    for chain in set.chains.values() {
        let inner_end = *chain.last().expect("chains are non-empty");
        let parent_active = skeleton
            .joint(inner_end)
            .parent
            .map(|p| skeleton.joint(p).is_active())
            .unwrap_or(false);
        if !parent_active {
            set.active_roots.insert(inner_end);
        }
    }

    // Snapshot the active joints (ascending id) and mark them for harvest.
    let mut active_joints = Vec::new();
    let ids: Vec<JointId> = skeleton.iter().map(|j| j.id()).collect();
    for id in ids {
        let index = skeleton.index_of(id).expect("iterated id exists");
        if skeleton.joint(index).is_active() {
            skeleton.joint_mut(index).flag_for_harvest();
            active_joints.push(index);
        }
    }
    set.active_joints = active_joints;

    set
}

/// The root's local frame is the world frame, so its config seeds world
/// transforms directly.
fn apply_root_config(
    skeleton: &mut Skeleton,
    index: usize,
    config: &JointConfig,
    set: &mut ChainSet,
) {
    let flags = config.flags();
    if flags.intersects(ConfigFlags::MASK_ROT) {
        let rot = if flags.contains(ConfigFlags::LOCAL_ROT) {
            *config.local_rot()
        } else {
            *config.target_rot()
        };
        skeleton.joint_mut(index).lock_local_rot(rot);
        set.active_roots.insert(index);
    }
    if flags.intersects(ConfigFlags::MASK_POS) {
        let pos = if flags.contains(ConfigFlags::LOCAL_POS) {
            *config.local_pos()
        } else {
            *config.target_pos()
        };
        let joint = skeleton.joint_mut(index);
        joint.set_local_pos(&pos);
        joint.activate();
    }
    if flags.contains(ConfigFlags::LOCAL_SCALE) {
        skeleton
            .joint_mut(index)
            .set_local_scale(config.local_scale());
    }
}

/// Walk inward from `start`, activating joints and appending them to
/// `chain`, until a stop joint is reached. Newly discovered sub-bases are
/// queued for their own chains.
fn build_chain(
    skeleton: &mut Skeleton,
    start: usize,
    chain: &mut Vec<usize>,
    sub_bases: &mut BTreeSet<JointId>,
    chain_limit: u8,
    options: &ChainOptions<'_>,
) {
    chain.push(start);
    skeleton.joint_mut(start).activate();

    let mut cursor = skeleton.joint(start).parent;
    while let Some(index) = cursor {
        if chain.len() >= chain_limit as usize {
            break;
        }
        // The stop joint itself belongs to the chain, so push before the
        // stop checks.
        chain.push(index);
        skeleton.joint_mut(index).activate();

        let joint_id = skeleton.joint(index).id();
        if options.is_sub_root(joint_id) || joint_id == options.root_id {
            break;
        }
        if skeleton.joint(index).has_pos_target() {
            // Truncate at a targeted ancestor; its own chain covers the
            // rest of the way in.
            break;
        }
        let implicit_sub_base =
            options.sub_base_ids.is_empty() && skeleton.joint(index).num_children() > 1;
        if implicit_sub_base || options.is_sub_base(joint_id) {
            sub_bases.insert(joint_id);
            break;
        }
        cursor = skeleton.joint(index).parent;
    }
}

/// Sequential-effector fixup: when a position-targeted joint has a
/// position-targeted parent, the caller may have supplied an unsolvable
/// pair. The child wins: the parent's target is moved to exactly
/// bone-length from the child's target along the original direction.
///
/// Only correct when the parent has a single effector child; configs are
/// visited in ascending id order, so the parent's entry already exists.
fn adjust_sequential_effectors(
    skeleton: &mut Skeleton,
    configs: &mut BTreeMap<JointId, JointConfig>,
    index: usize,
    config: &JointConfig,
) {
    let Some(parent_index) = skeleton.joint(index).parent else {
        return;
    };
    if !skeleton.joint(parent_index).has_pos_target() {
        return;
    }
    let child_target_pos = *config.target_pos();
    let Some(parent_target_pos) = skeleton.joint(parent_index).target_pos() else {
        return;
    };
    let Some(direction) = (parent_target_pos - child_target_pos).try_normalize(1.0e-6) else {
        return;
    };
    let adjusted = child_target_pos + direction * skeleton.joint(index).local_pos_length();

    let parent_id = skeleton.joint(parent_index).id();
    skeleton.joint_mut(parent_index).set_target_pos(adjusted);
    if let Some(parent_config) = configs.get_mut(&parent_id) {
        parent_config.set_target_pos(adjusted);
    }
}

/// A chain outer end that is untargeted, not whitelisted as a sub-base, and
/// has exactly one active child is a "false" sub-base: splice its chain
/// onto the chain that ends there and drop the duplicate.
fn condense_false_sub_bases(
    skeleton: &Skeleton,
    chains: &mut BTreeMap<JointId, Vec<usize>>,
    options: &ChainOptions<'_>,
) {
    let mut joins: Vec<JointId> = Vec::new();
    for (&id, chain) in chains.iter() {
        let outer_end = chain[0];
        if !skeleton.joint(outer_end).has_pos_target()
            && !options.is_sub_base(id)
            && skeleton.single_active_child(outer_end).is_some()
        {
            joins.push(id);
        }
    }

    for id in joins {
        let Some(donor) = chains.get(&id).cloned() else {
            continue;
        };
        let recipient_key = chains.iter().find_map(|(&key, chain)| {
            let inner_end = *chain.last().expect("chains are non-empty");
            (key != id && skeleton.joint(inner_end).id() == id).then_some(key)
        });
        if let Some(key) = recipient_key {
            let recipient = chains.get_mut(&key).expect("recipient key just found");
            recipient.extend_from_slice(&donor[1..]);
            chains.remove(&id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joint::StaticJointInfo;
    use nalgebra::Vector3;
    use std::sync::Arc;

    fn add(skeleton: &mut Skeleton, id: JointId, parent: Option<usize>) -> usize {
        skeleton.add(
            id,
            Arc::new(StaticJointInfo::new(id, Vector3::x(), Vector3::x())),
            parent,
            None,
        )
    }

    fn ids(skeleton: &Skeleton, chain: &[usize]) -> Vec<JointId> {
        chain.iter().map(|&i| skeleton.joint(i).id()).collect()
    }

    fn default_options(root_id: JointId) -> (BTreeSet<JointId>, BTreeSet<JointId>, JointId) {
        (BTreeSet::new(), BTreeSet::new(), root_id)
    }

    #[test]
    fn single_target_builds_one_chain_to_root() {
        let mut skeleton = Skeleton::new();
        let root = add(&mut skeleton, 0, None);
        let a = add(&mut skeleton, 1, Some(root));
        let b = add(&mut skeleton, 2, Some(a));

        let mut configs = BTreeMap::new();
        let mut config = JointConfig::new();
        config.set_target_pos(Vector3::new(2.0, 1.0, 0.0));
        configs.insert(2, config);

        let (sub_bases, sub_roots, root_id) = default_options(0);
        let options = ChainOptions {
            root_id,
            sub_base_ids: &sub_bases,
            sub_root_ids: &sub_roots,
        };
        let set = rebuild_chains(&mut skeleton, &mut configs, &options);

        assert_eq!(set.chains.len(), 1);
        assert_eq!(ids(&skeleton, &set.chains[&2]), vec![2, 1, 0]);
        assert_eq!(set.active_roots.len(), 1);
        assert!(set.active_roots.contains(&root));
        assert_eq!(set.active_joints, vec![root, a, b]);
    }

    #[test]
    fn sub_base_split_produces_three_chains() {
        // root -> A -> B, B has children C and D, both targeted.
        let mut skeleton = Skeleton::new();
        let root = add(&mut skeleton, 0, None);
        let a = add(&mut skeleton, 1, Some(root));
        let b = add(&mut skeleton, 2, Some(a));
        let _c = add(&mut skeleton, 3, Some(b));
        let _d = add(&mut skeleton, 4, Some(b));

        let mut configs = BTreeMap::new();
        for id in [3, 4] {
            let mut config = JointConfig::new();
            config.set_target_pos(Vector3::new(2.0, 1.0, 0.0));
            configs.insert(id, config);
        }

        let (sub_bases, sub_roots, root_id) = default_options(0);
        let options = ChainOptions {
            root_id,
            sub_base_ids: &sub_bases,
            sub_root_ids: &sub_roots,
        };
        let set = rebuild_chains(&mut skeleton, &mut configs, &options);

        assert_eq!(set.chains.len(), 3);
        assert_eq!(ids(&skeleton, &set.chains[&3]), vec![3, 2]);
        assert_eq!(ids(&skeleton, &set.chains[&4]), vec![4, 2]);
        assert_eq!(ids(&skeleton, &set.chains[&2]), vec![2, 1, 0]);
        assert_eq!(set.active_roots.len(), 1);
        assert!(set.active_roots.contains(&root));
    }

    #[test]
    fn false_sub_base_chains_are_condensed() {
        // root -> A -> B(two children, one active) -> C -> [D targeted]
        //              \-> E (inactive)
        let mut skeleton = Skeleton::new();
        let root = add(&mut skeleton, 0, None);
        let a = add(&mut skeleton, 1, Some(root));
        let b = add(&mut skeleton, 2, Some(a));
        let c = add(&mut skeleton, 3, Some(b));
        let d = add(&mut skeleton, 4, Some(c));
        let _e = add(&mut skeleton, 5, Some(b));

        let mut configs = BTreeMap::new();
        let mut config = JointConfig::new();
        config.set_target_pos(Vector3::new(4.0, 0.0, 0.0));
        configs.insert(4, config);

        let (sub_bases, sub_roots, root_id) = default_options(0);
        let options = ChainOptions {
            root_id,
            sub_base_ids: &sub_bases,
            sub_root_ids: &sub_roots,
        };
        let set = rebuild_chains(&mut skeleton, &mut configs, &options);

        // B has two children but only one active, so the sub-base chain
        // seeded at B is spliced onto the effector chain.
        assert_eq!(set.chains.len(), 1);
        assert_eq!(ids(&skeleton, &set.chains[&4]), vec![4, 3, 2, 1, 0]);
        let _ = (a, b, d);
    }

    #[test]
    fn sub_root_stops_chain_walk() {
        let mut skeleton = Skeleton::new();
        let root = add(&mut skeleton, 0, None);
        let a = add(&mut skeleton, 1, Some(root));
        let b = add(&mut skeleton, 2, Some(a));
        let _c = add(&mut skeleton, 3, Some(b));

        let mut configs = BTreeMap::new();
        let mut config = JointConfig::new();
        config.set_target_pos(Vector3::new(3.0, 0.5, 0.0));
        configs.insert(3, config);

        let sub_bases = BTreeSet::new();
        let sub_roots: BTreeSet<JointId> = [1].into_iter().collect();
        let options = ChainOptions {
            root_id: 0,
            sub_base_ids: &sub_bases,
            sub_root_ids: &sub_roots,
        };
        let set = rebuild_chains(&mut skeleton, &mut configs, &options);

        assert_eq!(ids(&skeleton, &set.chains[&3]), vec![3, 2, 1]);
        // The sub-root's parent (the real root) is inactive, so the chain's
        // inner end is an active root.
        assert!(set.active_roots.contains(&a));
        assert!(!skeleton.joint(root).is_active());
    }

    #[test]
    fn chain_limit_truncates_inward_walk() {
        let mut skeleton = Skeleton::new();
        let root = add(&mut skeleton, 0, None);
        let a = add(&mut skeleton, 1, Some(root));
        let b = add(&mut skeleton, 2, Some(a));
        let _c = add(&mut skeleton, 3, Some(b));

        let mut configs = BTreeMap::new();
        let mut config = JointConfig::new();
        config.set_target_pos(Vector3::new(3.0, 0.5, 0.0));
        config.set_chain_limit(2);
        configs.insert(3, config);

        let (sub_bases, sub_roots, root_id) = default_options(0);
        let options = ChainOptions {
            root_id,
            sub_base_ids: &sub_bases,
            sub_root_ids: &sub_roots,
        };
        let set = rebuild_chains(&mut skeleton, &mut configs, &options);
        assert_eq!(ids(&skeleton, &set.chains[&3]), vec![3, 2]);
    }

    #[test]
    fn sequential_effectors_snap_parent_target_to_bone_length() {
        let mut skeleton = Skeleton::new();
        let root = add(&mut skeleton, 0, None);
        let a = add(&mut skeleton, 1, Some(root));
        let b = add(&mut skeleton, 2, Some(a));
        let _ = (root, b);

        let mut configs = BTreeMap::new();
        let mut parent_config = JointConfig::new();
        parent_config.set_target_pos(Vector3::new(5.0, 0.0, 0.0));
        configs.insert(1, parent_config);
        let mut child_config = JointConfig::new();
        child_config.set_target_pos(Vector3::new(2.0, 0.0, 0.0));
        configs.insert(2, child_config);

        let (sub_bases, sub_roots, root_id) = default_options(0);
        let options = ChainOptions {
            root_id,
            sub_base_ids: &sub_bases,
            sub_root_ids: &sub_roots,
        };
        rebuild_chains(&mut skeleton, &mut configs, &options);

        // Joint 2 sits one unit from its parent; the parent target moved to
        // exactly that distance from the child target, toward the original.
        let adjusted = configs[&1].target_pos();
        assert_eq!(adjusted, &Vector3::new(3.0, 0.0, 0.0));
        assert_eq!(
            skeleton.get(1).unwrap().target_pos().unwrap(),
            Vector3::new(3.0, 0.0, 0.0)
        );
    }

    #[test]
    fn delegated_configs_build_no_chain() {
        let mut skeleton = Skeleton::new();
        let root = add(&mut skeleton, 0, None);
        let a = add(&mut skeleton, 1, Some(root));
        let _ = a;

        let mut configs = BTreeMap::new();
        let mut config = JointConfig::new();
        config.set_target_pos(Vector3::new(1.0, 1.0, 0.0));
        config.delegate();
        configs.insert(1, config);

        let (sub_bases, sub_roots, root_id) = default_options(0);
        let options = ChainOptions {
            root_id,
            sub_base_ids: &sub_bases,
            sub_root_ids: &sub_roots,
        };
        let set = rebuild_chains(&mut skeleton, &mut configs, &options);
        assert!(set.chains.is_empty());
    }

    #[test]
    fn local_rot_config_locks_joint() {
        let mut skeleton = Skeleton::new();
        let root = add(&mut skeleton, 0, None);
        let a = add(&mut skeleton, 1, Some(root));

        let mut configs = BTreeMap::new();
        let mut config = JointConfig::new();
        config.set_local_rot(nalgebra::UnitQuaternion::from_axis_angle(
            &Vector3::z_axis(),
            0.4,
        ));
        configs.insert(1, config);

        let (sub_bases, sub_roots, root_id) = default_options(0);
        let options = ChainOptions {
            root_id,
            sub_base_ids: &sub_bases,
            sub_root_ids: &sub_roots,
        };
        let set = rebuild_chains(&mut skeleton, &mut configs, &options);

        assert!(skeleton.joint(a).local_rot_locked());
        assert!(skeleton.joint(a).is_active());
        assert!(set.chains.is_empty());
        let _ = root;
    }
}
