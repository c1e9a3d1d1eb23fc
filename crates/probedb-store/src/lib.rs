//! Record store for ProbeDB.
//!
//! This crate provides:
//! - An arena-based B+ tree with linked leaves and per-subtree record counts
//! - Exact aggregates over the full record sequence
//! - Snapshot save/load in a fixed little-endian layout
//! - A store wrapper that owns the tree plus a cached in-order
//!   materialization of the leaf chain for cache-friendly sampling

mod node;
mod snapshot;
mod store;
mod tree;

pub use node::{InternalNode, LeafNode, Node, NodeId, ORDER};
pub use snapshot::Snapshot;
pub use store::RecordStore;
pub use tree::{BPlusTree, LeafIter};
