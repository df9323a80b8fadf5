//! # Segmented Index
//!
//! A directory of bucket files, keys sharded by a stable 64-bit hash.
//! Buckets load on first touch and stay cached; `save` flushes only the
//! buckets whose contents changed. An index can therefore be far larger
//! than what a session ever pulls into memory.

use std::fs;
use std::path::PathBuf;

use eyre::{Result, WrapErr};
use hashbrown::HashMap;

use crate::collection::CollectionProxy;
use crate::config::SEGMENT_FILE_EXTENSION;
use crate::index::{bucket_of, from_stored, proxy_for, to_stored, write_entries, Entry, StoredMap};
use crate::record::IndexKey;
use crate::storage::JoinArea;

#[derive(Debug)]
struct Bucket {
    map: HashMap<IndexKey, Entry>,
    modified: bool,
}

#[derive(Debug)]
pub struct SegmentedIndex {
    dir: PathBuf,
    buckets: HashMap<u64, Bucket>,
}

impl SegmentedIndex {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            buckets: HashMap::new(),
        }
    }

    fn bucket_path(&self, no: u64) -> PathBuf {
        self.dir.join(format!("{:03}.{}", no, SEGMENT_FILE_EXTENSION))
    }

    fn bucket_mut(&mut self, no: u64) -> Result<&mut Bucket> {
        if !self.buckets.contains_key(&no) {
            let path = self.bucket_path(no);
            let map = if path.exists() {
                let bytes = fs::read(&path).wrap_err_with(|| {
                    format!("failed to read index bucket '{}'", path.display())
                })?;
                if bytes.is_empty() {
                    HashMap::new()
                } else {
                    let stored: StoredMap = bincode::deserialize(&bytes).wrap_err_with(|| {
                        format!("failed to decode index bucket '{}'", path.display())
                    })?;
                    from_stored(stored)
                }
            } else {
                HashMap::new()
            };
            self.buckets.insert(
                no,
                Bucket {
                    map,
                    modified: false,
                },
            );
        }

        Ok(self.buckets.get_mut(&no).expect("bucket loaded above"))
    }

    pub fn append(&mut self, key: IndexKey, rod_id: u64) -> Result<()> {
        let no = bucket_of(&key);
        let entry = self.bucket_mut(no)?.map.entry(key).or_default();
        entry.appended.push(rod_id);
        entry.dirty = true;
        Ok(())
    }

    pub fn proxy(&mut self, key: &IndexKey, target: &str) -> Result<CollectionProxy> {
        let no = bucket_of(key);
        let bucket = self.bucket_mut(no)?;
        Ok(proxy_for(bucket.map.get(key), target))
    }

    pub fn write(&mut self, join: &mut JoinArea) -> Result<()> {
        for bucket in self.buckets.values_mut() {
            if write_entries(&mut bucket.map, join)? > 0 {
                bucket.modified = true;
            }
        }
        Ok(())
    }

    pub fn save(&mut self) -> Result<()> {
        let dirty: Vec<u64> = self
            .buckets
            .iter()
            .filter(|(_, b)| b.modified)
            .map(|(no, _)| *no)
            .collect();

        if dirty.is_empty() {
            return Ok(());
        }

        fs::create_dir_all(&self.dir).wrap_err_with(|| {
            format!("failed to create index directory '{}'", self.dir.display())
        })?;

        for no in dirty {
            let path = self.bucket_path(no);
            let bucket = self.buckets.get_mut(&no).expect("dirty bucket is loaded");

            let bytes = bincode::serialize(&to_stored(&bucket.map))
                .wrap_err_with(|| format!("failed to encode index bucket '{}'", path.display()))?;

            let tmp = path.with_extension("seg.tmp");
            fs::write(&tmp, &bytes).wrap_err_with(|| {
                format!("failed to write index bucket temp file '{}'", tmp.display())
            })?;
            fs::rename(&tmp, &path).wrap_err_with(|| {
                format!("failed to move index bucket into place '{}'", path.display())
            })?;

            bucket.modified = false;
        }

        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        if self.dir.is_dir() {
            fs::remove_dir_all(&self.dir).wrap_err_with(|| {
                format!("failed to remove index directory '{}'", self.dir.display())
            })?;
        }
        self.buckets.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SEGMENT_COUNT;
    use tempfile::tempdir;

    fn join(dir: &std::path::Path) -> JoinArea {
        JoinArea::create(dir.join("_join_element.dat")).unwrap()
    }

    #[test]
    fn bucket_numbers_are_stable_and_bounded() {
        let key = IndexKey::Str("female".into());
        let a = bucket_of(&key);
        let b = bucket_of(&IndexKey::Str("female".into()));

        assert_eq!(a, b);
        assert!(a < SEGMENT_COUNT);
    }

    #[test]
    fn write_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let index_dir = dir.path().join("fred_name");
        let mut area = join(dir.path());

        {
            let mut index = SegmentedIndex::new(index_dir.clone());
            for i in 0..100u64 {
                index.append(IndexKey::Str(format!("name{}", i)), i + 1).unwrap();
            }
            index.write(&mut area).unwrap();
            index.save().unwrap();
        }

        assert!(index_dir.is_dir());

        let mut index = SegmentedIndex::new(index_dir);
        let proxy = index
            .proxy(&IndexKey::Str("name42".into()), "Fred")
            .unwrap();
        assert_eq!(proxy.len(), 1);
        assert_eq!(area.get(proxy.offset(), 0).unwrap(), 43);
    }

    #[test]
    fn save_touches_only_dirty_buckets() {
        let dir = tempdir().unwrap();
        let index_dir = dir.path().join("fred_name");
        let mut area = join(dir.path());

        let mut index = SegmentedIndex::new(index_dir.clone());
        index.append(IndexKey::Str("alpha".into()), 1).unwrap();
        index.write(&mut area).unwrap();
        index.save().unwrap();

        let bucket_files = || {
            std::fs::read_dir(&index_dir)
                .map(|d| d.count())
                .unwrap_or(0)
        };
        let after_first = bucket_files();
        assert_eq!(after_first, 1);

        // a clean reopen-and-save writes nothing
        let mut index = SegmentedIndex::new(index_dir.clone());
        let _ = index.proxy(&IndexKey::Str("alpha".into()), "Fred").unwrap();
        index.save().unwrap();
        assert_eq!(bucket_files(), after_first);
    }

    #[test]
    fn absent_key_yields_empty_proxy() {
        let dir = tempdir().unwrap();
        let mut index = SegmentedIndex::new(dir.path().join("fred_name"));

        let proxy = index
            .proxy(&IndexKey::Str("missing".into()), "Fred")
            .unwrap();
        assert!(proxy.is_empty());
    }
}
