//! Store wrapper owning the tree and the cached leaf sequence.

use crate::tree::BPlusTree;
use parking_lot::Mutex;
use probedb_common::{Record, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Owns one [`BPlusTree`] plus a lazily materialized, cache-friendly copy
/// of the full record sequence.
///
/// Samplers read the cached sequence instead of chasing leaf links; any
/// mutation invalidates it, and the next sampling call repopulates it from
/// the leaf chain. The cache is handed out as an `Arc` so concurrent
/// readers under a shared lock never copy it.
///
/// Subtree counts follow the same discipline: mutations mark them dirty and
/// [`RecordStore::ensure_subtree_counts`] refreshes them before any sampler
/// that distributes work by subtree share.
pub struct RecordStore {
    tree: BPlusTree,
    db_path: Option<PathBuf>,
    cache: Mutex<Option<Arc<Vec<Record>>>>,
    counts_dirty: bool,
}

impl RecordStore {
    /// Creates an empty store with no backing file.
    pub fn in_memory() -> Self {
        Self {
            tree: BPlusTree::new(),
            db_path: None,
            cache: Mutex::new(None),
            counts_dirty: false,
        }
    }

    /// Creates an empty store that flushes to `path` on close.
    pub fn create<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            db_path: Some(path.into()),
            ..Self::in_memory()
        }
    }

    /// Opens a store by rebuilding the tree from a snapshot file.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let tree = BPlusTree::load_from_file(&path)?;
        Ok(Self {
            tree,
            db_path: Some(path),
            cache: Mutex::new(None),
            counts_dirty: false,
        })
    }

    /// Flushes the tree to the backing file, if one was set.
    pub fn close(&self) -> Result<()> {
        if let Some(path) = &self.db_path {
            self.tree.save_to_file(path)?;
        }
        Ok(())
    }

    /// Returns the backing file path, if any.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Borrows the underlying tree.
    #[inline]
    pub fn tree(&self) -> &BPlusTree {
        &self.tree
    }

    /// Total records in the store.
    #[inline]
    pub fn total_records(&self) -> u64 {
        self.tree.total_records()
    }

    /// Height of the underlying tree.
    #[inline]
    pub fn tree_height(&self) -> u32 {
        self.tree.height()
    }

    /// Inserts a single record.
    pub fn insert(&mut self, record: Record) -> Result<()> {
        self.tree.insert(record)?;
        self.invalidate();
        Ok(())
    }

    /// Inserts a batch of records and refreshes subtree counts once at the
    /// end, which is what bulk loads want.
    pub fn insert_batch(&mut self, records: Vec<Record>) -> Result<()> {
        let n = records.len();
        self.tree.insert_batch(records)?;
        self.invalidate();
        self.tree.update_subtree_counts();
        self.counts_dirty = false;
        debug!(inserted = n, total = self.tree.total_records(), "batch inserted");
        Ok(())
    }

    /// Returns true if subtree counts are stale.
    #[inline]
    pub fn counts_dirty(&self) -> bool {
        self.counts_dirty
    }

    /// Refreshes subtree counts if any mutation happened since the last
    /// refresh.
    pub fn ensure_subtree_counts(&mut self) {
        if self.counts_dirty {
            self.tree.update_subtree_counts();
            self.counts_dirty = false;
        }
    }

    /// Returns the cached record sequence, materializing it on first use.
    pub fn cached_records(&self) -> Arc<Vec<Record>> {
        let mut guard = self.cache.lock();
        if let Some(cached) = guard.as_ref() {
            return Arc::clone(cached);
        }
        let materialized = Arc::new(self.tree.collect_leaf_records());
        debug!(records = materialized.len(), "record cache materialized");
        *guard = Some(Arc::clone(&materialized));
        materialized
    }

    fn invalidate(&mut self) {
        *self.cache.get_mut() = None;
        self.counts_dirty = true;
    }
}
