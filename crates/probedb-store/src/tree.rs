//! Arena-based B+ tree keyed by record id.

use crate::node::{InternalNode, LeafNode, Node, NodeId, ORDER};
use crate::snapshot::Snapshot;
use probedb_common::{ProbeError, Record, Result};
use std::path::Path;

/// An order-255 B+ tree holding the full dataset in memory.
///
/// All nodes live in a flat arena (`Vec<Node>`); the tree tracks the root
/// id, record total, and height. Leaves form a singly linked chain in
/// ascending id order, so a full scan never touches internal nodes.
///
/// The tree itself is unsynchronized; callers that share it across threads
/// wrap it in a readers-writer lock (see `RecordStore` and the scheduler).
pub struct BPlusTree {
    /// Node arena; ids index into this vector.
    nodes: Vec<Node>,
    /// Root node id.
    root: NodeId,
    /// Total records across all leaves.
    total_records: u64,
    /// Tree height (1 = root is a leaf).
    height: u32,
}

impl BPlusTree {
    /// Creates an empty tree whose root is an empty leaf.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::Leaf(LeafNode::new())],
            root: NodeId(0),
            total_records: 0,
            height: 1,
        }
    }

    /// Returns the root node id.
    #[inline]
    pub fn root_id(&self) -> NodeId {
        self.root
    }

    /// Returns the tree height (1 = root is a leaf).
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the total number of records.
    #[inline]
    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    /// Returns the number of allocated nodes.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the tree holds no records.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total_records == 0
    }

    /// Borrows a node by id.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    fn leaf_mut(&mut self, id: NodeId) -> Result<&mut LeafNode> {
        match self.node_mut(id) {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(ProbeError::TreeCorrupted(format!(
                "expected leaf at {}",
                id
            ))),
        }
    }

    fn internal_mut(&mut self, id: NodeId) -> Result<&mut InternalNode> {
        match self.node_mut(id) {
            Node::Internal(internal) => Ok(internal),
            Node::Leaf(_) => Err(ProbeError::TreeCorrupted(format!(
                "expected internal node at {}",
                id
            ))),
        }
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Inserts a record by id, splitting full nodes on the way back up.
    pub fn insert(&mut self, record: Record) -> Result<()> {
        // Descend to the target leaf, recording the path for split ascent.
        let mut path = Vec::with_capacity(self.height as usize);
        let mut current = self.root;
        loop {
            path.push(current);
            match self.node(current) {
                Node::Leaf(_) => break,
                Node::Internal(internal) => {
                    let idx = internal.keys.partition_point(|k| record.id >= *k);
                    current = internal.children[idx];
                }
            }
        }

        let leaf = self.leaf_mut(current)?;
        let pos = leaf.keys.partition_point(|k| *k < record.id);
        leaf.keys.insert(pos, record.id);
        leaf.records.insert(pos, record);
        leaf.subtree_record_count += 1;
        self.total_records += 1;

        if self.node(current).key_count() >= ORDER {
            self.split_leaf_and_ascend(&path)?;
        }
        Ok(())
    }

    /// Inserts a batch of records, sorted by id first for sequential
    /// leaf fills. Observably equivalent to repeated `insert`.
    pub fn insert_batch(&mut self, mut records: Vec<Record>) -> Result<()> {
        records.sort_by_key(|r| r.id);
        for record in records {
            self.insert(record)?;
        }
        Ok(())
    }

    /// Splits the full leaf at the end of `path` and propagates separator
    /// insertions (and further splits) toward the root.
    fn split_leaf_and_ascend(&mut self, path: &[NodeId]) -> Result<()> {
        let leaf_id = *path
            .last()
            .ok_or_else(|| ProbeError::TreeCorrupted("empty descent path".to_string()))?;

        let (mut separator, right_leaf) = {
            let leaf = self.leaf_mut(leaf_id)?;
            let mid = ORDER / 2;
            let right_keys = leaf.keys.split_off(mid);
            let right_records = leaf.records.split_off(mid);
            if right_keys.is_empty() || leaf.keys.is_empty() {
                return Err(ProbeError::TreeCorrupted(
                    "leaf split produced empty node".to_string(),
                ));
            }
            let separator = right_keys[0];
            let count = right_keys.len() as u64;
            leaf.subtree_record_count = leaf.keys.len() as u64;
            let right = LeafNode {
                keys: right_keys,
                records: right_records,
                next_leaf: leaf.next_leaf,
                subtree_record_count: count,
            };
            (separator, right)
        };

        let right_id = self.alloc(Node::Leaf(right_leaf));
        self.leaf_mut(leaf_id)?.next_leaf = Some(right_id);

        // Bubble the separator up; each full parent splits in turn.
        let mut child_id = leaf_id;
        let mut new_child = right_id;
        let mut depth = path.len() as isize - 2;
        loop {
            if depth < 0 {
                // The split reached the root: grow the tree by one level.
                let new_root = InternalNode {
                    keys: vec![separator],
                    children: vec![self.root, new_child],
                    subtree_record_count: 0,
                };
                self.root = self.alloc(Node::Internal(new_root));
                self.height += 1;
                return Ok(());
            }

            let parent_id = path[depth as usize];
            let parent_keys = {
                let parent = self.internal_mut(parent_id)?;
                let pos = parent
                    .children
                    .iter()
                    .position(|c| *c == child_id)
                    .ok_or_else(|| {
                        ProbeError::TreeCorrupted("split child missing from parent".to_string())
                    })?;
                parent.keys.insert(pos, separator);
                parent.children.insert(pos + 1, new_child);
                parent.keys.len()
            };

            if parent_keys < ORDER {
                return Ok(());
            }

            let (promoted, right_internal) = {
                let parent = self.internal_mut(parent_id)?;
                let mid = ORDER / 2;
                let promoted = parent.keys[mid];
                let right_keys = parent.keys.split_off(mid + 1);
                parent.keys.truncate(mid);
                let right_children = parent.children.split_off(mid + 1);
                (
                    promoted,
                    InternalNode {
                        keys: right_keys,
                        children: right_children,
                        subtree_record_count: 0,
                    },
                )
            };

            separator = promoted;
            new_child = self.alloc(Node::Internal(right_internal));
            child_id = parent_id;
            depth -= 1;
        }
    }

    // =========================================================================
    // Scans and exact aggregates
    // =========================================================================

    /// Returns the id of the leftmost leaf.
    fn leftmost_leaf(&self) -> NodeId {
        let mut current = self.root;
        loop {
            match self.node(current) {
                Node::Leaf(_) => return current,
                Node::Internal(internal) => current = internal.children[0],
            }
        }
    }

    /// Iterates over the leaf chain from the leftmost leaf.
    pub fn leaves(&self) -> LeafIter<'_> {
        LeafIter {
            tree: self,
            next: Some(self.leftmost_leaf()),
        }
    }

    /// Materializes every record in ascending id order by walking the leaf
    /// chain. O(N).
    pub fn collect_leaf_records(&self) -> Vec<Record> {
        let mut records = Vec::with_capacity(self.total_records as usize);
        for leaf in self.leaves() {
            records.extend_from_slice(&leaf.records);
        }
        records
    }

    /// Returns the number of leaves in the chain.
    pub fn leaf_count(&self) -> usize {
        self.leaves().count()
    }

    /// Exact sum of `amount` over every record.
    pub fn sum_amount(&self) -> f64 {
        self.leaves()
            .flat_map(|leaf| leaf.records.iter())
            .map(|r| r.amount)
            .sum()
    }

    /// Exact mean of `amount`, or 0.0 for an empty tree.
    pub fn avg_amount(&self) -> f64 {
        if self.total_records == 0 {
            return 0.0;
        }
        self.sum_amount() / self.total_records as f64
    }

    /// Exact record count.
    #[inline]
    pub fn count_records(&self) -> u64 {
        self.total_records
    }

    /// Exact sum of `amount` over records with `amount` in `[lo, hi]`.
    pub fn sum_amount_where(&self, lo: f64, hi: f64) -> f64 {
        self.leaves()
            .flat_map(|leaf| leaf.records.iter())
            .filter(|r| r.amount >= lo && r.amount <= hi)
            .map(|r| r.amount)
            .sum()
    }

    /// Returns records with ids in `[start_id, end_id]`, in id order.
    pub fn search_range(&self, start_id: i64, end_id: i64) -> Vec<Record> {
        let mut results = Vec::new();
        if start_id > end_id {
            return results;
        }

        // Descend to the leaf that would contain start_id.
        let mut current = self.root;
        loop {
            match self.node(current) {
                Node::Leaf(_) => break,
                Node::Internal(internal) => {
                    let idx = internal.keys.partition_point(|k| start_id >= *k);
                    current = internal.children[idx];
                }
            }
        }

        let mut next = Some(current);
        while let Some(id) = next {
            let leaf = match self.node(id) {
                Node::Leaf(leaf) => leaf,
                Node::Internal(_) => return results,
            };
            for (key, record) in leaf.keys.iter().zip(leaf.records.iter()) {
                if *key < start_id {
                    continue;
                }
                if *key > end_id {
                    return results;
                }
                results.push(*record);
            }
            next = leaf.next_leaf;
        }
        results
    }

    // =========================================================================
    // Subtree counts
    // =========================================================================

    /// Recomputes `subtree_record_count` for every node. After this call,
    /// the root's count equals `total_records()`. Must run before any
    /// sampler that distributes work by subtree share.
    pub fn update_subtree_counts(&mut self) {
        self.refresh_counts(self.root);
    }

    fn refresh_counts(&mut self, id: NodeId) -> u64 {
        let children = match self.node(id) {
            Node::Leaf(leaf) => {
                let count = leaf.keys.len() as u64;
                if let Node::Leaf(leaf) = self.node_mut(id) {
                    leaf.subtree_record_count = count;
                }
                return count;
            }
            Node::Internal(internal) => internal.children.clone(),
        };

        let mut total = 0;
        for child in children {
            total += self.refresh_counts(child);
        }
        if let Node::Internal(internal) = self.node_mut(id) {
            internal.subtree_record_count = total;
        }
        total
    }

    // =========================================================================
    // Snapshot I/O
    // =========================================================================

    /// Writes the tree to a snapshot file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let snapshot = Snapshot {
            total_records: self.total_records,
            tree_height: self.height as u64,
            records: self.collect_leaf_records(),
        };
        snapshot.write_to_file(path)
    }

    /// Rebuilds a tree from a snapshot file via batch insertion.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let snapshot = Snapshot::read_from_file(path)?;
        let mut tree = Self::new();
        tree.insert_batch(snapshot.records)?;
        tree.update_subtree_counts();
        Ok(tree)
    }
}

impl Default for BPlusTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the leaf chain in ascending id order.
pub struct LeafIter<'a> {
    tree: &'a BPlusTree,
    next: Option<NodeId>,
}

impl<'a> Iterator for LeafIter<'a> {
    type Item = &'a LeafNode;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        match self.tree.node(id) {
            Node::Leaf(leaf) => {
                self.next = leaf.next_leaf;
                Some(leaf)
            }
            Node::Internal(_) => None,
        }
    }
}
