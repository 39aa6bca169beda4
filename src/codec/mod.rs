//! Binary table format.
//!
//! ```text
//! magic "SIMT" | version u16
//! active names      : u32 n, n × string
//! dimension map     : u32 n, n × (string, u32 position)
//! flat buffer       : u32 n, n × f64
//! offset index      : u32 n, n × (u32 id, u32 offset)
//! neighbor lists    : u32 n, n × (u32 id, u32 m, m × (u32 id, f32 score))
//! ```
//!
//! Integers and floats are little-endian; strings are a `u32` byte length
//! followed by UTF-8. Maps are written in ascending key order so equal tables
//! encode to equal bytes.

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
    sync::Arc,
};

use tracing::{info, warn};

use crate::{
    config::TableConfig,
    error::{Result, SimError},
    schema::Schema,
    topk::{NeighborIndex, TopK},
    vector::FlatVectorStore,
    DocId, SimTable,
};

pub const MAGIC: [u8; 4] = *b"SIMT";
pub const VERSION: u16 = 1;

/// Serialize the full table state, tombstoned records included.
///
/// Fails with `CorruptState` when a count, offset or name length does not
/// fit the format's `u32` fields.
pub fn encode(table: &SimTable) -> Result<Vec<u8>> {
    let schema = table.schema_map();
    let (flat, offsets) = table.store().to_flat();

    let mut buf = Vec::with_capacity(16 + flat.len() * 8);
    buf.extend_from_slice(&MAGIC);
    write_u16(&mut buf, VERSION);

    write_len(&mut buf, schema.current().len())?;
    for name in schema.current() {
        write_str(&mut buf, name)?;
    }

    let positions = schema.positions();
    write_len(&mut buf, positions.len())?;
    for (name, pos) in positions {
        write_str(&mut buf, name)?;
        write_len(&mut buf, pos)?;
    }

    write_len(&mut buf, flat.len())?;
    for v in &flat {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    let mut offsets = offsets;
    offsets.sort_unstable();
    write_len(&mut buf, offsets.len())?;
    for (id, offset) in offsets {
        write_u32(&mut buf, id);
        write_len(&mut buf, offset)?;
    }

    let lists = table.neighbors().lists();
    let mut ids: Vec<DocId> = lists.keys().copied().collect();
    ids.sort_unstable();
    write_len(&mut buf, ids.len())?;
    for id in ids {
        let list = lists[&id].as_slice();
        write_u32(&mut buf, id);
        write_len(&mut buf, list.len())?;
        for n in list {
            write_u32(&mut buf, n.id);
            buf.extend_from_slice(&n.score.to_le_bytes());
        }
    }
    Ok(buf)
}

/// Rebuild a table from [`encode`] output. Water lines start absent.
pub fn decode(data: &[u8], config: TableConfig) -> Result<SimTable> {
    config.validate()?;
    let mut r = Reader { data, pos: 0 };

    let magic = r.take(4)?;
    if magic != &MAGIC[..] {
        return Err(SimError::corrupt(format!("bad magic {magic:?}")));
    }
    let version = r.u16()?;
    if version != VERSION {
        return Err(SimError::corrupt(format!("unsupported version {version}, expected {VERSION}")));
    }

    let n = r.len(4)?;
    let mut current = Vec::with_capacity(n);
    for _ in 0..n {
        current.push(r.string()?);
    }

    let n = r.len(8)?;
    let mut positions = HashMap::with_capacity(n);
    let mut taken = HashSet::with_capacity(n);
    for _ in 0..n {
        let name = r.string()?;
        let pos = r.u32()? as usize;
        if pos >= n || !taken.insert(pos) {
            return Err(SimError::corrupt(format!("dimension {name:?} has invalid position {pos}")));
        }
        if positions.insert(name.clone(), pos).is_some() {
            return Err(SimError::corrupt(format!("dimension {name:?} listed twice")));
        }
    }
    if let Some(name) = current.iter().find(|name| !positions.contains_key(*name)) {
        return Err(SimError::corrupt(format!("active dimension {name:?} has no position")));
    }
    let schema = Schema::from_parts(current, positions);

    let n = r.len(8)?;
    let mut flat = Vec::with_capacity(n);
    for _ in 0..n {
        flat.push(r.f64()?);
    }

    let n = r.len(8)?;
    let mut offsets = Vec::with_capacity(n);
    for _ in 0..n {
        offsets.push((r.u32()?, r.u32()? as usize));
    }
    let store = FlatVectorStore::from_flat(&flat, &offsets)?;

    let n = r.len(8)?;
    let mut lists = HashMap::with_capacity(n);
    for _ in 0..n {
        let id = r.u32()?;
        if !store.contains(id) {
            return Err(SimError::corrupt(format!("neighbor list for unknown document {id}")));
        }
        let m = r.len(8)?;
        let mut list = TopK::new();
        for _ in 0..m {
            let neighbor = r.u32()?;
            let score = r.f32()?;
            if neighbor == id || !store.contains(neighbor) {
                return Err(SimError::corrupt(format!("document {id} lists invalid neighbor {neighbor}")));
            }
            if !(0.0..=1.0).contains(&score) {
                return Err(SimError::corrupt(format!("score {score} for {id} -> {neighbor} out of range")));
            }
            if list.get(neighbor).is_some() {
                return Err(SimError::corrupt(format!("document {id} lists {neighbor} twice")));
            }
            list.upsert(neighbor, score);
        }
        if list.len() > config.max_neighbors {
            warn!(doc = id, stored = list.len(), max = config.max_neighbors, "truncating neighbor list");
            while list.len() > config.max_neighbors {
                list.pop_last();
            }
        }
        if lists.insert(id, list).is_some() {
            return Err(SimError::corrupt(format!("neighbor list for {id} appears twice")));
        }
    }

    if r.pos != data.len() {
        return Err(SimError::corrupt(format!("{} trailing bytes", data.len() - r.pos)));
    }

    let neighbors = NeighborIndex::from_lists(config.max_neighbors, lists, HashMap::new());
    Ok(SimTable::from_parts(config, Arc::new(schema), store, neighbors))
}

/// Write the encoded table through a temporary sibling file and rename it into place.
pub fn save(path: &Path, table: &SimTable) -> Result<()> {
    let bytes = encode(table)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)?;
    info!(path = %path.display(), bytes = bytes.len(), documents = table.len(), "saved table");
    Ok(())
}

pub fn load(path: &Path, config: TableConfig) -> Result<SimTable> {
    let bytes = fs::read(path)?;
    let table = decode(&bytes, config)?;
    info!(path = %path.display(), documents = table.len(), "loaded table");
    Ok(table)
}

fn write_u16(buf: &mut Vec<u8>, val: u16) {
    buf.extend_from_slice(&val.to_le_bytes());
}

fn write_u32(buf: &mut Vec<u8>, val: u32) {
    buf.extend_from_slice(&val.to_le_bytes());
}

/// Lengths and offsets are stored as `u32`.
fn write_len(buf: &mut Vec<u8>, val: usize) -> Result<()> {
    let val = u32::try_from(val).map_err(|_| SimError::corrupt(format!("length {val} exceeds the u32 format limit")))?;
    write_u32(buf, val);
    Ok(())
}

fn write_str(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    write_len(buf, s.len())?;
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.data.len());
        let end = end.ok_or_else(|| SimError::corrupt(format!("truncated at offset {}", self.pos)))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    /// A section count whose items take at least `min_item` bytes each.
    fn len(&mut self, min_item: usize) -> Result<usize> {
        let n = self.u32()? as usize;
        let remaining = self.data.len() - self.pos;
        if n.saturating_mul(min_item) > remaining {
            return Err(SimError::corrupt(format!("section of {n} items exceeds remaining {remaining} bytes")));
        }
        Ok(n)
    }

    fn string(&mut self) -> Result<String> {
        let n = self.len(1)?;
        let bytes = self.take(n)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| SimError::corrupt(format!("invalid UTF-8 name: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SimTable {
        let mut table = SimTable::new(TableConfig::with_max_neighbors(3));
        table.revise(["sports", "tech", "art"]);
        table.add(10, &[0.7, 0.2, 0.1]).unwrap();
        table.add(20, &[0.1, 0.8, 0.1]).unwrap();
        table.add(30, &[0.2, 0.2, 0.6]).unwrap();
        table.add(40, &[0.6, 0.3, 0.1]).unwrap();
        table.delete(20);
        table
    }

    #[test]
    fn round_trip_preserves_state() {
        let table = sample();
        let bytes = encode(&table).unwrap();
        let back = decode(&bytes, *table.config()).unwrap();

        assert_eq!(back.schema_map(), table.schema_map());
        assert_eq!(back.store(), table.store());
        for id in [10, 20, 30, 40] {
            assert_eq!(back.get(id), table.get(id));
            assert_eq!(back.retrieve(id), table.retrieve(id));
        }
        assert_eq!(encode(&back).unwrap(), bytes);
    }

    #[test]
    fn header_layout_is_fixed() {
        let bytes = encode(&SimTable::default()).unwrap();
        let mut expected = b"SIMT".to_vec();
        expected.extend_from_slice(&1u16.to_le_bytes());
        expected.extend_from_slice(&[0; 20]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn rejects_bad_magic_version_and_truncation() {
        let bytes = encode(&sample()).unwrap();
        let cfg = TableConfig::default();

        let mut bad = bytes.clone();
        bad[0] = b'X';
        assert!(matches!(decode(&bad, cfg), Err(SimError::CorruptState { .. })));

        let mut bad = bytes.clone();
        bad[4] = 9;
        assert!(decode(&bad, cfg).is_err());

        for cut in [5, 10, bytes.len() / 2, bytes.len() - 1] {
            assert!(decode(&bytes[..cut], cfg).is_err(), "cut at {cut}");
        }

        let mut long = bytes.clone();
        long.push(0);
        assert!(decode(&long, cfg).is_err());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn lengths_beyond_u32_are_refused() {
        let mut buf = Vec::new();
        assert!(write_len(&mut buf, u32::MAX as usize).is_ok());
        let err = write_len(&mut buf, u32::MAX as usize + 1).unwrap_err();
        assert!(matches!(err, SimError::CorruptState { .. }));
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn rejects_marker_outside_encoding_range() {
        let mut table = SimTable::default();
        table.add(0, &[0.5]).unwrap();
        let mut bytes = encode(&table).unwrap();
        // flat section: names(4) + dims(4) + count(4) after the 6-byte header
        let marker_at = 6 + 4 + 4 + 4 + 8;
        bytes[marker_at..marker_at + 8].copy_from_slice(&1.5f64.to_le_bytes());
        assert!(matches!(decode(&bytes, TableConfig::default()), Err(SimError::CorruptState { .. })));
    }

    #[test]
    fn truncates_lists_longer_than_capacity() {
        let table = sample();
        let back = decode(&encode(&table).unwrap(), TableConfig::with_max_neighbors(1)).unwrap();
        assert_eq!(back.retrieve(10).len(), 1);
        assert_eq!(back.retrieve(10)[0], table.retrieve(10)[0]);
    }

    #[test]
    fn save_and_load_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.simt");
        let table = sample();
        save(&path, &table).unwrap();
        let back = load(&path, *table.config()).unwrap();
        assert_eq!(back.retrieve(40), table.retrieve(40));
        assert!(!path.with_extension("tmp").exists());
    }
}
