use std::collections::HashMap;

use crate::{error::{Result, SimError}, DocId};

/// One document's stored distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: DocId,
    values: Vec<f32>,
    norm: f32,
    live: bool,
}

impl Record {
    fn new(id: DocId, values: Vec<f32>) -> Self {
        let norm = squared_norm(&values);
        Self { id, values, norm, live: true }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Cached squared L2 norm of `values`.
    pub fn norm(&self) -> f32 {
        self.norm
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Floats this record occupies in the flat encoding: values, marker, norm.
    fn flat_len(&self) -> usize {
        self.values.len() + 2
    }
}

/// Append-only record arena with a `DocId -> slot` index over live records.
///
/// Deleting a document only flips its record's live flag; slots are reclaimed
/// by [`FlatVectorStore::compacted`]. The store can be rendered to and rebuilt
/// from the flat float encoding used on disk: each record is its values, a
/// marker equal to `id + 1`, then its squared norm, all negated once
/// tombstoned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatVectorStore {
    records: Vec<Record>,
    index: HashMap<DocId, usize>,
}

impl FlatVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(records: usize) -> Self {
        Self { records: Vec::with_capacity(records), index: HashMap::with_capacity(records) }
    }

    /// Overwrite the live record of `id` in place, or append a new one.
    /// Returns the record's slot.
    pub fn upsert(&mut self, id: DocId, values: Vec<f32>) -> usize {
        match self.index.get(&id) {
            Some(&slot) => {
                self.records[slot] = Record::new(id, values);
                slot
            }
            None => {
                let slot = self.records.len();
                self.records.push(Record::new(id, values));
                self.index.insert(id, slot);
                slot
            }
        }
    }

    /// Mark the record of `id` deleted. Returns false when `id` has no live record.
    pub fn tombstone(&mut self, id: DocId) -> bool {
        match self.index.remove(&id) {
            Some(slot) => {
                self.records[slot].live = false;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: DocId) -> Option<&Record> {
        self.index.get(&id).map(|&slot| &self.records[slot])
    }

    pub fn contains(&self, id: DocId) -> bool {
        self.index.contains_key(&id)
    }

    /// Every record in insertion order, tombstones included.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn live(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|r| r.live)
    }

    pub fn live_len(&self) -> usize {
        self.index.len()
    }

    pub fn tombstoned_len(&self) -> usize {
        self.records.len() - self.index.len()
    }

    /// Length of the flat encoding in floats.
    pub fn flat_len(&self) -> usize {
        self.records.iter().map(Record::flat_len).sum()
    }

    /// Copy of the live records with tombstones dropped and slots renumbered.
    /// Capacity is preallocated as `live / load_factor`, falling back to
    /// exactly `live` when the factor is outside `(0, 1]` or the hint cannot
    /// be allocated.
    pub fn compacted(&self, load_factor: f64) -> Self {
        let live = self.live_len();
        let mut out = Self::with_capacity(live);
        if load_factor > 0.0 && load_factor <= 1.0 {
            let hint = (live as f64 / load_factor).ceil() as usize;
            let _ = out.records.try_reserve(hint);
        }
        for record in self.live() {
            out.index.insert(record.id, out.records.len());
            out.records.push(record.clone());
        }
        out
    }

    /// Render the flat encoding and the `(id, offset)` index of live records.
    pub fn to_flat(&self) -> (Vec<f64>, Vec<(DocId, usize)>) {
        let mut flat = Vec::with_capacity(self.flat_len());
        let mut offsets = Vec::with_capacity(self.live_len());
        for record in &self.records {
            let sign = if record.live { 1.0 } else { -1.0 };
            if record.live {
                offsets.push((record.id, flat.len()));
            }
            flat.extend(record.values.iter().map(|&v| sign * f64::from(v)));
            flat.push(sign * (f64::from(record.id) + 1.0));
            flat.push(sign * f64::from(record.norm));
        }
        (flat, offsets)
    }

    /// Rebuild a store from its flat encoding, checking it against the offset index.
    pub fn from_flat(flat: &[f64], offsets: &[(DocId, usize)]) -> Result<Self> {
        let mut store = Self::new();
        let mut starts: HashMap<DocId, usize> = HashMap::new();
        let mut cursor = 0;

        while cursor < flat.len() {
            let start = cursor;
            let mut values = Vec::new();
            let mut negative = 0usize;
            let marker = loop {
                let v = *flat
                    .get(cursor)
                    .ok_or_else(|| SimError::corrupt(format!("record at {start} has no marker")))?;
                cursor += 1;
                if v.is_nan() {
                    return Err(SimError::corrupt(format!("NaN at offset {}", cursor - 1)));
                }
                if v.abs() >= 1.0 {
                    break v;
                }
                if v.is_sign_negative() {
                    negative += 1;
                }
                values.push(v.abs() as f32);
            };
            let norm = *flat
                .get(cursor)
                .ok_or_else(|| SimError::corrupt(format!("record at {start} has no norm")))?;
            cursor += 1;

            let live = marker > 0.0;
            let expected_negative = if live { 0 } else { values.len() };
            if negative != expected_negative || live == norm.is_sign_negative() {
                return Err(SimError::corrupt(format!("record at {start} mixes live and tombstoned values")));
            }
            let raw_id = marker.abs() - 1.0;
            if raw_id.fract() != 0.0 || raw_id > f64::from(DocId::MAX) {
                return Err(SimError::corrupt(format!("marker {marker} at {} is not a document id", cursor - 2)));
            }
            let id = raw_id as DocId;

            let record = Record::new(id, values);
            if live {
                if record.norm != norm as f32 {
                    return Err(SimError::corrupt(format!("norm of document {id} does not match its values")));
                }
                if starts.insert(id, start).is_some() {
                    return Err(SimError::corrupt(format!("document {id} has two live records")));
                }
                store.index.insert(id, store.records.len());
                store.records.push(record);
            } else {
                store.records.push(Record { live: false, ..record });
            }
        }

        if offsets.len() != starts.len() {
            return Err(SimError::corrupt(format!(
                "index lists {} documents but buffer holds {} live records",
                offsets.len(),
                starts.len()
            )));
        }
        for &(id, offset) in offsets {
            if starts.get(&id) != Some(&offset) {
                return Err(SimError::corrupt(format!("index offset {offset} for document {id} is not its record start")));
            }
        }
        Ok(store)
    }
}

/// Reject components that would collide with the marker or tombstone encoding.
pub fn validate(values: &[f32]) -> Result<()> {
    match values.iter().position(|v| !(v.is_finite() && (0.0..1.0).contains(v) && v.is_sign_positive())) {
        Some(position) => Err(SimError::InvalidComponent { position, value: values[position] }),
        None => Ok(()),
    }
}

pub fn squared_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum()
}

/// Dot product over the common prefix. Positions are stable across schema
/// revisions, so a shorter vector behaves as if zero-padded.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Ranking score `dot² / (|a|² · |b|²)`, in `[0, 1]` for non-negative inputs.
/// Zero when either side has zero norm.
pub fn score(dot: f32, norm_a: f32, norm_b: f32) -> f32 {
    let denom = norm_a * norm_b;
    if denom == 0.0 {
        return 0.0;
    }
    (dot * dot / denom).min(1.0)
}
