use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::DocId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: DocId,
    pub score: f32,
}

/// Neighbors of one document, sorted by descending score, unique by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopK {
    entries: Vec<Neighbor>,
}

impl TopK {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or rescore `id`. Equal scores keep insertion order.
    pub fn upsert(&mut self, id: DocId, score: f32) {
        self.remove(id);
        let at = self.entries.partition_point(|n| n.score >= score);
        self.entries.insert(at, Neighbor { id, score });
    }

    pub fn remove(&mut self, id: DocId) -> Option<f32> {
        let at = self.entries.iter().position(|n| n.id == id)?;
        Some(self.entries.remove(at).score)
    }

    /// Drop and return the lowest-scoring entry.
    pub fn pop_last(&mut self) -> Option<Neighbor> {
        self.entries.pop()
    }

    pub fn get(&self, id: DocId) -> Option<f32> {
        self.entries.iter().find(|n| n.id == id).map(|n| n.score)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn as_slice(&self) -> &[Neighbor] {
        &self.entries
    }

    pub fn ids(&self) -> Vec<DocId> {
        self.entries.iter().map(|n| n.id).collect()
    }
}

/// Per-document neighbor lists plus the water lines that gate them and the
/// reverse references that make deletion cascade.
///
/// Invariants:
/// - a list never holds its owner and never exceeds `capacity` entries;
/// - `holder ∈ reverse[target]` exactly when `target` is in `lists[holder]`;
/// - a water line, once present, only rises until its document is removed
///   or its list is cleared for a rescan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborIndex {
    capacity: usize,
    lists: HashMap<DocId, TopK>,
    water_lines: HashMap<DocId, f32>,
    reverse: HashMap<DocId, HashSet<DocId>>,
}

impl NeighborIndex {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, ..Self::default() }
    }

    /// Rebuild from neighbor lists; reverse references are derived from them.
    pub fn from_lists(capacity: usize, lists: HashMap<DocId, TopK>, water_lines: HashMap<DocId, f32>) -> Self {
        let mut index = Self { capacity, lists, water_lines, reverse: HashMap::new() };
        for (&holder, list) in &index.lists {
            for n in list.as_slice() {
                index.reverse.entry(n.id).or_default().insert(holder);
            }
        }
        index
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Offer `tgt` as a neighbor of `src` with `score`.
    ///
    /// Returns true when the offer was rejected but `src` still listed `tgt`
    /// under an older score. That entry is dropped, leaving a free slot the
    /// water line would no longer fill; the caller must rescan `src`.
    pub fn record(&mut self, src: DocId, tgt: DocId, score: f32) -> bool {
        if src == tgt {
            return false;
        }

        let admitted = self.water_lines.get(&src).map_or(true, |&line| score >= line);
        if !admitted {
            // whatever score src holds for tgt predates this one
            let stale = self.lists.get_mut(&src).map_or(false, |list| list.remove(tgt).is_some());
            if stale {
                unlink(&mut self.reverse, tgt, src);
            }
            return stale;
        }

        let line = self.water_lines.entry(src).or_insert(0.0);
        let list = self.lists.entry(src).or_default();
        list.upsert(tgt, score);
        self.reverse.entry(tgt).or_default().insert(src);

        if list.len() > self.capacity {
            if let Some(evicted) = list.pop_last() {
                if evicted.score > *line {
                    *line = evicted.score;
                }
                unlink(&mut self.reverse, evicted.id, src);
            }
        }
        false
    }

    /// Empty the list of `id` and drop its water line, keeping the lists that
    /// hold `id` untouched.
    pub fn clear(&mut self, id: DocId) {
        if let Some(list) = self.lists.remove(&id) {
            for n in list.as_slice() {
                unlink(&mut self.reverse, n.id, id);
            }
        }
        self.water_lines.remove(&id);
    }

    /// Drop everything owned by `id` and strip it from every list that holds it.
    /// Returns how many lists referenced `id`.
    pub fn remove(&mut self, id: DocId) -> usize {
        self.clear(id);

        let holders = self.reverse.remove(&id).unwrap_or_default();
        for holder in &holders {
            if let Some(list) = self.lists.get_mut(holder) {
                list.remove(id);
            }
        }
        holders.len()
    }

    pub fn list(&self, id: DocId) -> Option<&TopK> {
        self.lists.get(&id)
    }

    pub fn lists(&self) -> &HashMap<DocId, TopK> {
        &self.lists
    }

    pub fn water_line(&self, id: DocId) -> Option<f32> {
        self.water_lines.get(&id).copied()
    }

    pub fn water_lines(&self) -> &HashMap<DocId, f32> {
        &self.water_lines
    }

    /// Documents whose lists currently hold `id`.
    pub fn holders(&self, id: DocId) -> Option<&HashSet<DocId>> {
        self.reverse.get(&id)
    }
}

fn unlink(reverse: &mut HashMap<DocId, HashSet<DocId>>, target: DocId, holder: DocId) {
    if let Some(set) = reverse.get_mut(&target) {
        set.remove(&holder);
        if set.is_empty() {
            reverse.remove(&target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(list: &TopK) -> Vec<(DocId, f32)> {
        list.as_slice().iter().map(|n| (n.id, n.score)).collect()
    }

    #[test]
    fn topk_upsert_keeps_descending_unique_entries() {
        let mut list = TopK::new();
        list.upsert(1, 0.3);
        list.upsert(2, 0.9);
        list.upsert(3, 0.5);
        list.upsert(1, 0.95);
        assert_eq!(scores(&list), vec![(1, 0.95), (2, 0.9), (3, 0.5)]);
        assert_eq!(list.pop_last(), Some(Neighbor { id: 3, score: 0.5 }));
        assert_eq!(list.remove(2), Some(0.9));
        assert_eq!(list.get(1), Some(0.95));
        assert_eq!(list.get(2), None);
    }

    #[test]
    fn self_pairs_are_ignored() {
        let mut index = NeighborIndex::new(3);
        index.record(4, 4, 1.0);
        assert!(index.list(4).is_none());
        assert!(index.water_line(4).is_none());
    }

    #[test]
    fn first_admission_sets_water_line_to_zero() {
        let mut index = NeighborIndex::new(3);
        index.record(1, 2, 0.4);
        assert_eq!(index.water_line(1), Some(0.0));
        assert!(index.holders(2).unwrap().contains(&1));
    }

    #[test]
    fn overflow_evicts_lowest_and_raises_water_line() {
        let mut index = NeighborIndex::new(2);
        index.record(1, 2, 0.5);
        index.record(1, 3, 0.7);
        index.record(1, 4, 0.6);
        assert_eq!(scores(index.list(1).unwrap()), vec![(3, 0.7), (4, 0.6)]);
        assert_eq!(index.water_line(1), Some(0.5));
        assert!(index.holders(2).is_none());

        // below the water line: rejected without touching the list
        index.record(1, 5, 0.4);
        assert_eq!(index.list(1).unwrap().len(), 2);
        assert!(index.holders(5).is_none());

        index.record(1, 6, 0.65);
        assert_eq!(scores(index.list(1).unwrap()), vec![(3, 0.7), (6, 0.65)]);
        assert_eq!(index.water_line(1), Some(0.6));
    }

    #[test]
    fn rejected_rescore_drops_stale_entry() {
        let mut index = NeighborIndex::new(1);
        index.record(1, 2, 0.3);
        index.record(1, 3, 0.8);
        assert_eq!(index.water_line(1), Some(0.3));
        assert!(index.record(1, 3, 0.1));
        assert!(index.list(1).unwrap().is_empty());
        assert!(index.holders(3).is_none());

        // a rejected newcomer was never listed
        assert!(!index.record(1, 4, 0.1));
    }

    #[test]
    fn clear_resets_list_and_water_line_only() {
        let mut index = NeighborIndex::new(1);
        index.record(1, 2, 0.3);
        index.record(1, 3, 0.8);
        index.record(2, 1, 0.3);
        index.clear(1);
        assert!(index.list(1).is_none());
        assert!(index.water_line(1).is_none());
        assert!(index.holders(3).is_none());
        assert_eq!(index.list(2).unwrap().ids(), vec![1]);

        index.record(1, 2, 0.3);
        assert_eq!(index.list(1).unwrap().ids(), vec![2]);
    }

    #[test]
    fn remove_cascades_through_holders() {
        let mut index = NeighborIndex::new(4);
        for &(a, b, s) in &[(1, 2, 0.5), (2, 1, 0.5), (3, 2, 0.7), (2, 3, 0.7), (1, 3, 0.2), (3, 1, 0.2)] {
            index.record(a, b, s);
        }
        assert_eq!(index.remove(2), 2);
        assert!(index.list(2).is_none());
        assert!(index.water_line(2).is_none());
        assert_eq!(index.list(1).unwrap().ids(), vec![3]);
        assert_eq!(index.list(3).unwrap().ids(), vec![1]);
        assert!(index.holders(2).is_none());
        assert_eq!(index.holders(3).unwrap().len(), 1);
        assert_eq!(index.remove(2), 0);
    }

    #[test]
    fn from_lists_rebuilds_reverse_references() {
        let mut live = NeighborIndex::new(3);
        live.record(1, 2, 0.5);
        live.record(2, 1, 0.5);
        live.record(3, 1, 0.9);
        let rebuilt = NeighborIndex::from_lists(3, live.lists().clone(), live.water_lines().clone());
        assert_eq!(rebuilt, live);
    }
}
