//! Strategies that walk the tree itself instead of the cached sequence,
//! distributing the sample quota by refreshed subtree record counts.
//! Callers must refresh counts after mutations (`BPlusTree::
//! update_subtree_counts`, done automatically by batch inserts) before
//! using these.

use crate::sample_target;
use probedb_common::Record;
use probedb_store::{BPlusTree, Node, NodeId};

/// Proportional tree sampling with rounding to nearest: each subtree
/// receives a share of its parent's quota proportional to its record count,
/// and leaves emit their share at an even stride. Preferred when the tree
/// is unbalanced.
pub fn index_proportional_sample(tree: &BPlusTree, percent: f64) -> Vec<Record> {
    proportional_sample(tree, percent, false)
}

/// Proportional tree sampling identical to [`index_proportional_sample`]
/// but rounding every subtree share via floor.
pub fn balanced_tree_sample(tree: &BPlusTree, percent: f64) -> Vec<Record> {
    proportional_sample(tree, percent, true)
}

fn proportional_sample(tree: &BPlusTree, percent: f64, floor_rounding: bool) -> Vec<Record> {
    let total = tree.total_records() as usize;
    let target = sample_target(total, percent);
    if target == 0 {
        return Vec::new();
    }
    if target == total {
        return tree.collect_leaf_records();
    }

    let mut samples = Vec::with_capacity(target);
    walk(tree, tree.root_id(), target, floor_rounding, target, &mut samples);
    samples.truncate(target);
    samples
}

fn walk(
    tree: &BPlusTree,
    id: NodeId,
    quota: usize,
    floor_rounding: bool,
    target: usize,
    out: &mut Vec<Record>,
) {
    if quota == 0 || out.len() >= target {
        return;
    }
    match tree.node(id) {
        Node::Leaf(leaf) => {
            let take = quota.min(leaf.records.len());
            if take == 0 {
                return;
            }
            // Even stride inside the leaf.
            let step = leaf.records.len() as f64 / take as f64;
            for i in 0..take {
                if out.len() >= target {
                    return;
                }
                let idx = ((i as f64 * step) as usize).min(leaf.records.len() - 1);
                out.push(leaf.records[idx]);
            }
        }
        Node::Internal(internal) => {
            let parent_count = internal.subtree_record_count.max(1) as f64;
            for child in &internal.children {
                if out.len() >= target {
                    return;
                }
                let child_count = tree.node(*child).subtree_record_count() as f64;
                let share = quota as f64 * child_count / parent_count;
                let child_quota = if floor_rounding {
                    share as usize
                } else {
                    share.round() as usize
                };
                walk(tree, *child, child_quota, floor_rounding, target, out);
            }
        }
    }
}

/// Takes every `skip_factor`-th leaf whole, walking the leaf chain. Fast
/// when the sampling rate is close to one leaf in `skip_factor`.
pub fn node_skip_sample(tree: &BPlusTree, percent: f64, skip_factor: usize) -> Vec<Record> {
    let total = tree.total_records() as usize;
    let target = sample_target(total, percent);
    if target == 0 {
        return Vec::new();
    }
    if target == total {
        return tree.collect_leaf_records();
    }

    let skip = skip_factor.max(1);
    let mut samples = Vec::with_capacity(target);
    for (i, leaf) in tree.leaves().enumerate() {
        if samples.len() >= target {
            break;
        }
        if (i + 1) % skip != 0 {
            continue;
        }
        for record in &leaf.records {
            if samples.len() >= target {
                break;
            }
            samples.push(*record);
        }
    }
    samples
}
