use std::{path::Path, sync::Arc};

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::info;

use crate::{
    codec,
    error::Result,
    topk::{Neighbor, NeighborIndex},
    DocId, SimTable, TableStats,
};

impl SimTable {
    /// Point-in-time copy with tombstoned records dropped.
    ///
    /// The schema is shared until either side revises it. Neighbor lists and
    /// water lines are copied; reverse references are rebuilt from the lists.
    pub fn snapshot(&self) -> SimTable {
        let store = self.store().compacted(self.config().load_factor);
        let neighbors = NeighborIndex::from_lists(
            self.config().max_neighbors,
            self.neighbors().lists().clone(),
            self.neighbors().water_lines().clone(),
        );
        info!(
            live = store.live_len(),
            dropped = self.store().tombstoned_len(),
            "built compacted snapshot"
        );
        SimTable::from_parts(*self.config(), Arc::clone(self.shared_schema()), store, neighbors)
    }

    /// Publish `other` as the live generation, replacing schema, records and
    /// neighbor state in one step.
    pub fn reload(&mut self, other: SimTable) {
        info!(
            live = other.len(),
            previous = self.len(),
            "reloaded table"
        );
        *self = other;
    }
}

/// A table behind a single table-level lock.
///
/// Reads share the lock; `add`, `append`, `delete`, `revise` and `reload`
/// take it exclusively. Snapshots are built under the read lock, so they
/// observe a consistent cut.
#[derive(Debug, Clone, Default)]
pub struct SharedTable {
    inner: Arc<RwLock<SimTable>>,
}

impl SharedTable {
    pub fn new(table: SimTable) -> Self {
        Self { inner: Arc::new(RwLock::new(table)) }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, SimTable> {
        self.inner.read()
    }

    pub fn revise(&self, names: &[&str]) {
        self.inner.write().revise(names.iter().copied());
    }

    pub fn add(&self, id: DocId, distribution: &[f32]) -> Result<()> {
        self.inner.write().add(id, distribution)
    }

    pub fn append(&self, id: DocId, pairs: &[(&str, f32)]) -> Result<()> {
        self.inner.write().append(id, pairs.iter().copied())
    }

    pub fn delete(&self, id: DocId) {
        self.inner.write().delete(id)
    }

    pub fn get(&self, id: DocId) -> Option<Vec<f32>> {
        self.inner.read().get(id)
    }

    pub fn similarity(&self, a: DocId, b: DocId) -> Result<f32> {
        self.inner.read().similarity(a, b)
    }

    pub fn retrieve(&self, id: DocId) -> Vec<Neighbor> {
        self.inner.read().retrieve(id)
    }

    pub fn recommend(&self, id: DocId) -> Vec<DocId> {
        self.inner.read().recommend(id)
    }

    pub fn nearby(&self, distribution: &[f32], n: usize) -> Result<Vec<Neighbor>> {
        self.inner.read().nearby(distribution, n)
    }

    pub fn stats(&self) -> TableStats {
        self.inner.read().stats()
    }

    pub fn snapshot(&self) -> SimTable {
        self.inner.read().snapshot()
    }

    pub fn reload(&self, table: SimTable) {
        self.inner.write().reload(table)
    }

    /// Snapshot under the read lock, then encode and write without holding it.
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        codec::save(path, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TableConfig;

    fn table() -> SimTable {
        let mut table = SimTable::new(TableConfig::with_max_neighbors(3));
        table.add(1, &[0.6, 0.2, 0.1]).unwrap();
        table.add(2, &[0.1, 0.7, 0.1]).unwrap();
        table.add(3, &[0.3, 0.3, 0.3]).unwrap();
        table.add(4, &[0.0, 0.1, 0.8]).unwrap();
        table
    }

    #[test]
    fn snapshot_drops_tombstones_and_keeps_answers() {
        let mut live = table();
        live.delete(2);
        let snap = live.snapshot();

        assert_eq!(snap.stats().tombstoned_records, 0);
        assert_eq!(live.stats().tombstoned_records, 1);
        for id in [1, 3, 4] {
            assert_eq!(snap.get(id), live.get(id));
            assert_eq!(snap.retrieve(id), live.retrieve(id));
        }
        assert!(snap.get(2).is_none());
    }

    #[test]
    fn snapshot_is_independent_of_later_writes() {
        let mut live = table();
        let snap = live.snapshot();
        live.delete(1);
        live.revise(["a", "b", "c"]);
        assert!(snap.get(1).is_some());
        assert!(snap.recommend(3).contains(&1));
        assert_eq!(snap.schema_map().width(), 0);
    }

    #[test]
    fn reload_of_snapshot_reproduces_state() {
        let mut live = table();
        live.delete(3);
        let before: Vec<_> = [1, 2, 4].iter().map(|&id| (live.get(id), live.retrieve(id))).collect();

        let snap = live.snapshot();
        live.reload(snap);
        let after: Vec<_> = [1, 2, 4].iter().map(|&id| (live.get(id), live.retrieve(id))).collect();
        assert_eq!(before, after);
        assert_eq!(live.stats().tombstoned_records, 0);

        // the reloaded table keeps working
        live.add(5, &[0.6, 0.2, 0.1]).unwrap();
        assert_eq!(live.recommend(5)[0], 1);
    }

    #[test]
    fn snapshot_tolerates_unvalidated_load_factor() {
        let mut live = SimTable::new(TableConfig { load_factor: 0.0, max_neighbors: 3 });
        live.add(1, &[0.5]).unwrap();
        live.add(2, &[0.25]).unwrap();
        let snap = live.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.retrieve(1), live.retrieve(1));
    }

    #[test]
    fn shared_table_serves_concurrent_readers() {
        let shared = SharedTable::new(table());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || shared.retrieve(1).len())
            })
            .collect();
        shared.add(5, &[0.2, 0.2, 0.2]).unwrap();
        for h in handles {
            assert!(h.join().unwrap() <= 3);
        }
        assert_eq!(shared.stats().live_documents, 5);
    }
}
