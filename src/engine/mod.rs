use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    config::TableConfig,
    error::{Result, SimError},
    schema::Schema,
    topk::{Neighbor, NeighborIndex, TopK},
    vector::{self, FlatVectorStore},
    DocId,
};

/// An incremental similarity table.
///
/// Every [`add`](SimTable::add) scores the new distribution against each live
/// document and offers the result to both documents' neighbor lists, so
/// neighbor queries are plain lookups. Mutation takes `&mut self`; wrap the
/// table in a [`SharedTable`](crate::SharedTable) to share it across threads.
#[derive(Debug, Clone)]
pub struct SimTable {
    config: TableConfig,
    schema: Arc<Schema>,
    store: FlatVectorStore,
    neighbors: NeighborIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStats {
    pub live_documents: usize,
    pub tombstoned_records: usize,
    pub flat_len: usize,
    pub dimensions: usize,
    pub neighbor_lists: usize,
    pub max_neighbors: usize,
}

impl Default for SimTable {
    fn default() -> Self {
        Self::new(TableConfig::default())
    }
}

impl SimTable {
    pub fn new(config: TableConfig) -> Self {
        Self {
            config,
            schema: Arc::new(Schema::new()),
            store: FlatVectorStore::new(),
            neighbors: NeighborIndex::new(config.max_neighbors),
        }
    }

    pub(crate) fn from_parts(config: TableConfig, schema: Arc<Schema>, store: FlatVectorStore, neighbors: NeighborIndex) -> Self {
        Self { config, schema, store, neighbors }
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// The full dimension map, inactive names included.
    pub fn schema_map(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn shared_schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn store(&self) -> &FlatVectorStore {
        &self.store
    }

    pub fn neighbors(&self) -> &NeighborIndex {
        &self.neighbors
    }

    /// Replace the active dimension names; unseen names get the next positions.
    pub fn revise<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::make_mut(&mut self.schema).revise(names);
        debug!(dimensions = self.schema.width(), active = self.schema.current().len(), "schema revised");
    }

    /// The active (most recently revised) dimension names.
    pub fn schema(&self) -> &[String] {
        self.schema.current()
    }

    /// Insert or overwrite `id` and rescore it against every live document.
    ///
    /// The distribution is either full width, or ordered by the active name
    /// list and remapped. Nothing is written when it is rejected.
    pub fn add(&mut self, id: DocId, distribution: &[f32]) -> Result<()> {
        let values = match self.prepare(distribution) {
            Ok(values) => values,
            Err(err) => {
                warn!(doc = id, %err, "rejected distribution");
                return Err(err);
            }
        };
        self.insert(id, values);
        Ok(())
    }

    /// Add a distribution given as `(dimension name, value)` pairs.
    /// Names outside the schema are dropped.
    pub fn append<I, S>(&mut self, id: DocId, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, f32)>,
        S: AsRef<str>,
    {
        let pairs: Vec<(S, f32)> = pairs.into_iter().collect();
        let values = self.schema.vector_from_pairs(pairs.iter().map(|(name, v)| (name.as_ref(), *v)));
        if let Err(err) = vector::validate(&values) {
            warn!(doc = id, %err, "rejected distribution");
            return Err(err);
        }
        self.insert(id, values);
        Ok(())
    }

    /// Delete `id`, cascading through every neighbor list that holds it.
    /// Unknown ids are a no-op.
    pub fn delete(&mut self, id: DocId) {
        let tombstoned = self.store.tombstone(id);
        let holders = self.neighbors.remove(id);
        if tombstoned || holders > 0 {
            debug!(doc = id, holders, "deleted document");
        }
    }

    pub fn get(&self, id: DocId) -> Option<Vec<f32>> {
        self.store.get(id).map(|r| r.values().to_vec())
    }

    /// Cached score of `b` in `a`'s neighbor list.
    pub fn similarity(&self, a: DocId, b: DocId) -> Result<f32> {
        let list = self.neighbors.list(a).ok_or(SimError::NotFound { id: a })?;
        list.get(b).ok_or(SimError::NeighborNotFound { id: a, neighbor: b })
    }

    /// Ranked neighbors of `id`; empty when unknown.
    pub fn retrieve(&self, id: DocId) -> Vec<Neighbor> {
        self.neighbors.list(id).map(|l| l.as_slice().to_vec()).unwrap_or_default()
    }

    /// Ranked neighbor ids of `id`; empty when unknown.
    pub fn recommend(&self, id: DocId) -> Vec<DocId> {
        self.neighbors.list(id).map(TopK::ids).unwrap_or_default()
    }

    /// Score an ad-hoc distribution against every live document without storing it.
    pub fn nearby(&self, distribution: &[f32], n: usize) -> Result<Vec<Neighbor>> {
        let values = self.prepare(distribution)?;
        if n == 0 {
            return Ok(Vec::new());
        }
        let length = vector::squared_norm(&values);
        let mut best = TopK::new();
        for other in self.store.live() {
            let score = vector::score(vector::dot(&values, other.values()), length, other.norm());
            best.upsert(other.id, score);
            if best.len() > n {
                best.pop_last();
            }
        }
        Ok(best.as_slice().to_vec())
    }

    pub fn len(&self) -> usize {
        self.store.live_len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.live_len() == 0
    }

    pub fn stats(&self) -> TableStats {
        TableStats {
            live_documents: self.store.live_len(),
            tombstoned_records: self.store.tombstoned_len(),
            flat_len: self.store.flat_len(),
            dimensions: self.schema.width(),
            neighbor_lists: self.neighbors.lists().len(),
            max_neighbors: self.config.max_neighbors,
        }
    }

    /// Check width against the schema, remap if needed, and validate components.
    fn prepare(&self, distribution: &[f32]) -> Result<Vec<f32>> {
        vector::validate(distribution)?;
        let width = self.schema.width();
        if width == 0 || distribution.len() == width {
            Ok(distribution.to_vec())
        } else if distribution.len() == self.schema.current().len() {
            Ok(self.schema.remap(distribution))
        } else {
            Err(SimError::SchemaMismatch { expected: width, found: distribution.len() })
        }
    }

    fn insert(&mut self, id: DocId, values: Vec<f32>) {
        let overwrite = self.store.contains(id);
        let slot = self.store.upsert(id, values);
        if overwrite {
            // old scores of `id` no longer bound its new neighbors
            self.neighbors.clear(id);
        }
        let records = self.store.records();
        let new = &records[slot];

        let mut compared = 0usize;
        let mut vacated = Vec::new();
        for other in records {
            if !other.is_live() || other.id == id {
                continue;
            }
            let score = vector::score(vector::dot(new.values(), other.values()), new.norm(), other.norm());
            self.neighbors.record(id, other.id, score);
            if self.neighbors.record(other.id, id, score) {
                vacated.push(other.id);
            }
            compared += 1;
        }
        for holder in &vacated {
            self.rescan(*holder);
        }
        debug!(doc = id, compared, rescanned = vacated.len(), "added document");
    }

    /// Rebuild the neighbor list of `id` from every live document.
    fn rescan(&mut self, id: DocId) {
        let Some(me) = self.store.get(id) else { return };
        self.neighbors.clear(id);
        for other in self.store.live() {
            if other.id == id {
                continue;
            }
            let score = vector::score(vector::dot(me.values(), other.values()), me.norm(), other.norm());
            self.neighbors.record(id, other.id, score);
        }
    }
}
