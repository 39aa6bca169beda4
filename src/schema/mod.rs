use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Maps dimension names to stable positions.
///
/// Positions are handed out in first-seen order and never reused, so a vector
/// written under an older, narrower schema stays aligned with the prefix of
/// every newer one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    positions: HashMap<String, usize>,
    current: Vec<String>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the active name list, assigning positions to unseen names.
    pub fn revise<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.current = names.into_iter().map(Into::into).collect();
        for name in &self.current {
            if !self.positions.contains_key(name) {
                let pos = self.positions.len();
                self.positions.insert(name.clone(), pos);
            }
        }
    }

    /// The active (most recently revised) name list.
    pub fn current(&self) -> &[String] {
        &self.current
    }

    /// Total number of dimensions ever seen.
    pub fn width(&self) -> usize {
        self.positions.len()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    /// `(name, position)` pairs ordered by position.
    pub fn positions(&self) -> Vec<(&str, usize)> {
        let mut out: Vec<(&str, usize)> =
            self.positions.iter().map(|(name, &pos)| (name.as_str(), pos)).collect();
        out.sort_by_key(|&(_, pos)| pos);
        out
    }

    /// True when a vector ordered by the active list must be remapped to full width.
    pub fn needs_remap(&self) -> bool {
        self.current.len() != self.positions.len()
    }

    /// Place values ordered by the active name list at their stable positions.
    /// Dimensions absent from the input are zero.
    pub fn remap(&self, input: &[f32]) -> Vec<f32> {
        let mut out = vec![0f32; self.width()];
        for (name, &value) in self.current.iter().zip(input) {
            if let Some(&pos) = self.positions.get(name) {
                out[pos] = value;
            }
        }
        out
    }

    /// Build a full-width vector from `(name, value)` pairs; unknown names are dropped.
    pub fn vector_from_pairs<'a, I>(&self, pairs: I) -> Vec<f32>
    where
        I: IntoIterator<Item = (&'a str, f32)>,
    {
        let mut out = vec![0f32; self.width()];
        for (name, value) in pairs {
            if let Some(&pos) = self.positions.get(name) {
                out[pos] = value;
            }
        }
        out
    }

    /// Rebuild from persisted parts.
    pub(crate) fn from_parts(current: Vec<String>, positions: HashMap<String, usize>) -> Self {
        Self { positions, current }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revise_assigns_positions_in_first_seen_order() {
        let mut schema = Schema::new();
        schema.revise(["a", "b"]);
        schema.revise(["c", "a"]);
        assert_eq!(schema.position("a"), Some(0));
        assert_eq!(schema.position("b"), Some(1));
        assert_eq!(schema.position("c"), Some(2));
        assert_eq!(schema.width(), 3);
        assert_eq!(schema.current(), ["c".to_string(), "a".to_string()]);
    }

    #[test]
    fn remap_places_values_by_name() {
        let mut schema = Schema::new();
        schema.revise(["a", "b", "c"]);
        schema.revise(["c", "a"]);
        assert!(schema.needs_remap());
        assert_eq!(schema.remap(&[0.3, 0.7]), vec![0.7, 0.0, 0.3]);
    }

    #[test]
    fn pairs_ignore_unknown_names() {
        let mut schema = Schema::new();
        schema.revise(["x", "y"]);
        let v = schema.vector_from_pairs([("y", 0.5), ("zzz", 0.9)]);
        assert_eq!(v, vec![0.0, 0.5]);
    }
}
