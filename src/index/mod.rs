//! # Index Subsystem
//!
//! Secondary indices map a field value to the set of record ids holding it.
//! The on-disk value is always a `(offset, size)` range in the scalar join
//! area; in memory an entry may additionally carry an append buffer of ids
//! accumulated since the last write.
//!
//! Two backends exist, selected per indexed property:
//!
//! - [`FlatIndex`]: one file per index, the whole map loaded on first
//!   access and rewritten atomically on save. Right for small key spaces.
//! - [`SegmentedIndex`]: a directory of bucket files sharded by key hash,
//!   loaded lazily and flushed dirty-buckets-only. Scales to key spaces
//!   far larger than memory.
//!
//! ## Write Discipline
//!
//! `append` only touches the in-memory entry and marks it dirty. At close,
//! `write` drains every dirty entry into a freshly allocated join range
//! (the prior range becomes garbage, as everywhere in the append-only
//! design) and `save` persists the maps. Clean entries are never rewritten.

mod flat;
mod segmented;

pub use flat::FlatIndex;
pub use segmented::SegmentedIndex;

use std::path::{Path, PathBuf};

use eyre::Result;
use hashbrown::HashMap;

use crate::collection::CollectionProxy;
use crate::config::{INDEX_FILE_EXTENSION, SEGMENT_COUNT};
use crate::record::{IndexKey, RecordRef};
use crate::schema::IndexKind;
use crate::storage::JoinArea;

/// In-memory index entry: the persisted range plus ids appended since.
#[derive(Debug, Clone, Default)]
pub(crate) struct Entry {
    pub base: Option<(u64, u64)>,
    pub appended: Vec<u64>,
    pub dirty: bool,
}

impl Entry {
    fn from_range(range: (u64, u64)) -> Self {
        Self {
            base: Some(range),
            appended: Vec::new(),
            dirty: false,
        }
    }

    /// All ids in insertion order: stored range first, then appends.
    fn ids(&self, join: &JoinArea) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        if let Some((offset, size)) = self.base {
            ids.reserve(size as usize + self.appended.len());
            for i in 0..size {
                ids.push(join.get(offset, i)?);
            }
        }
        ids.extend_from_slice(&self.appended);
        Ok(ids)
    }
}

/// On-disk form of an index map.
pub(crate) type StoredMap = HashMap<IndexKey, (u64, u64)>;

pub(crate) fn to_stored(map: &HashMap<IndexKey, Entry>) -> StoredMap {
    map.iter()
        .filter_map(|(k, e)| e.base.map(|range| (k.clone(), range)))
        .collect()
}

pub(crate) fn from_stored(stored: StoredMap) -> HashMap<IndexKey, Entry> {
    stored
        .into_iter()
        .map(|(k, range)| (k, Entry::from_range(range)))
        .collect()
}

/// Drains dirty entries of a map into fresh join ranges.
pub(crate) fn write_entries(map: &mut HashMap<IndexKey, Entry>, join: &mut JoinArea) -> Result<usize> {
    let mut rewritten = 0;
    for entry in map.values_mut() {
        if !entry.dirty {
            continue;
        }

        let ids = entry.ids(join)?;
        let size = ids.len() as u64;
        let offset = join.allocate(size)?;
        for (i, id) in ids.iter().enumerate() {
            join.set(offset, i as u64, *id)?;
        }

        entry.base = Some((offset, size));
        entry.appended.clear();
        entry.dirty = false;
        rewritten += 1;
    }
    Ok(rewritten)
}

pub(crate) fn proxy_for(entry: Option<&Entry>, target: &str) -> CollectionProxy {
    match entry {
        None => CollectionProxy::empty(Some(target.to_string())),
        Some(entry) => {
            let (offset, size) = entry.base.unwrap_or((0, 0));
            let mut proxy =
                CollectionProxy::from_range(offset, size, Some(target.to_string()), None);
            for id in &entry.appended {
                proxy.push(Some(RecordRef::new(target, *id)));
            }
            proxy
        }
    }
}

/// Bucket number of a key in a segmented index. Stable across runs: a
/// discriminant byte plus the key's raw bytes, hashed with xxh3.
pub(crate) fn bucket_of(key: &IndexKey) -> u64 {
    use xxhash_rust::xxh3::xxh3_64;

    let mut buf = smallvec::SmallVec::<[u8; 24]>::new();
    match key {
        IndexKey::Int(v) => {
            buf.push(0);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        IndexKey::Float(bits) => {
            buf.push(1);
            buf.extend_from_slice(&bits.to_le_bytes());
        }
        IndexKey::Bool(v) => {
            buf.push(2);
            buf.push(*v as u8);
        }
        IndexKey::Str(s) => {
            buf.push(3);
            buf.extend_from_slice(s.as_bytes());
        }
    }
    xxh3_64(&buf) % SEGMENT_COUNT
}

/// One secondary index over a single property.
#[derive(Debug)]
pub enum PropertyIndex {
    Flat(FlatIndex),
    Segmented(SegmentedIndex),
}

impl PropertyIndex {
    pub fn new(kind: IndexKind, db_path: &Path, struct_name: &str, field: &str) -> Self {
        match kind {
            IndexKind::Flat => PropertyIndex::Flat(FlatIndex::new(flat_path(
                db_path,
                struct_name,
                field,
            ))),
            IndexKind::Segmented => PropertyIndex::Segmented(SegmentedIndex::new(
                segmented_dir(db_path, struct_name, field),
            )),
        }
    }

    pub fn kind(&self) -> IndexKind {
        match self {
            PropertyIndex::Flat(_) => IndexKind::Flat,
            PropertyIndex::Segmented(_) => IndexKind::Segmented,
        }
    }

    /// Records `rod_id` under `key`; visible to lookups immediately,
    /// persisted at the next write/save.
    pub fn append(&mut self, key: IndexKey, rod_id: u64) -> Result<()> {
        match self {
            PropertyIndex::Flat(index) => index.append(key, rod_id),
            PropertyIndex::Segmented(index) => index.append(key, rod_id),
        }
    }

    /// Lookup: a proxy over the stored range plus unflushed appends.
    /// Absent keys yield an empty proxy.
    pub fn proxy(&mut self, key: &IndexKey, target: &str) -> Result<CollectionProxy> {
        match self {
            PropertyIndex::Flat(index) => index.proxy(key, target),
            PropertyIndex::Segmented(index) => index.proxy(key, target),
        }
    }

    /// Drains dirty entries into fresh join ranges.
    pub fn write(&mut self, join: &mut JoinArea) -> Result<()> {
        match self {
            PropertyIndex::Flat(index) => index.write(join),
            PropertyIndex::Segmented(index) => index.write(join),
        }
    }

    /// Persists the map(s) to disk.
    pub fn save(&mut self) -> Result<()> {
        match self {
            PropertyIndex::Flat(index) => index.save(),
            PropertyIndex::Segmented(index) => index.save(),
        }
    }

    /// Discards all entries, in memory and on disk. Used by index rebuild.
    pub fn clear(&mut self) -> Result<()> {
        match self {
            PropertyIndex::Flat(index) => index.clear(),
            PropertyIndex::Segmented(index) => index.clear(),
        }
    }
}

pub fn flat_path(db_path: &Path, struct_name: &str, field: &str) -> PathBuf {
    db_path.join(format!(
        "{}_{}.{}",
        struct_name, field, INDEX_FILE_EXTENSION
    ))
}

pub fn segmented_dir(db_path: &Path, struct_name: &str, field: &str) -> PathBuf {
    db_path.join(format!("{}_{}", struct_name, field))
}

/// Removes an index's on-disk presence, whichever backend it used.
pub fn remove_index_files(db_path: &Path, struct_name: &str, field: &str) -> Result<()> {
    let flat = flat_path(db_path, struct_name, field);
    if flat.exists() {
        tracing::debug!(path = %flat.display(), "removing index file");
        std::fs::remove_file(&flat)?;
    }

    let dir = segmented_dir(db_path, struct_name, field);
    if dir.is_dir() {
        tracing::debug!(path = %dir.display(), "removing index directory");
        std::fs::remove_dir_all(&dir)?;
    }

    Ok(())
}
