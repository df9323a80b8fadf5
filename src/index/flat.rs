//! # Flat Index
//!
//! One serialized map per index file. The whole map loads on first access
//! (a missing or empty file is an empty map) and `save` rewrites the file
//! atomically through a temp-file rename, so readers never observe a
//! partial map.

use std::fs;
use std::path::PathBuf;

use eyre::{Result, WrapErr};
use hashbrown::HashMap;

use crate::collection::CollectionProxy;
use crate::index::{from_stored, proxy_for, to_stored, write_entries, Entry, StoredMap};
use crate::record::IndexKey;
use crate::storage::JoinArea;

#[derive(Debug)]
pub struct FlatIndex {
    path: PathBuf,
    map: Option<HashMap<IndexKey, Entry>>,
    modified: bool,
}

impl FlatIndex {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            map: None,
            modified: false,
        }
    }

    fn map_mut(&mut self) -> Result<&mut HashMap<IndexKey, Entry>> {
        if self.map.is_none() {
            let map = if self.path.exists() {
                let bytes = fs::read(&self.path).wrap_err_with(|| {
                    format!("failed to read index file '{}'", self.path.display())
                })?;
                if bytes.is_empty() {
                    HashMap::new()
                } else {
                    let stored: StoredMap = bincode::deserialize(&bytes).wrap_err_with(|| {
                        format!("failed to decode index file '{}'", self.path.display())
                    })?;
                    from_stored(stored)
                }
            } else {
                HashMap::new()
            };
            self.map = Some(map);
        }

        Ok(self.map.as_mut().expect("map loaded above"))
    }

    pub fn append(&mut self, key: IndexKey, rod_id: u64) -> Result<()> {
        let entry = self.map_mut()?.entry(key).or_default();
        entry.appended.push(rod_id);
        entry.dirty = true;
        Ok(())
    }

    pub fn proxy(&mut self, key: &IndexKey, target: &str) -> Result<CollectionProxy> {
        let map = self.map_mut()?;
        Ok(proxy_for(map.get(key), target))
    }

    pub fn write(&mut self, join: &mut JoinArea) -> Result<()> {
        if self.map.is_none() {
            return Ok(());
        }
        let map = self.map_mut()?;
        if write_entries(map, join)? > 0 {
            self.modified = true;
        }
        Ok(())
    }

    pub fn save(&mut self) -> Result<()> {
        if !self.modified {
            return Ok(());
        }
        let map = self.map.as_ref().expect("modified implies loaded");

        let bytes = bincode::serialize(&to_stored(map))
            .wrap_err_with(|| format!("failed to encode index '{}'", self.path.display()))?;

        let tmp = self.path.with_extension("idx.tmp");
        fs::write(&tmp, &bytes)
            .wrap_err_with(|| format!("failed to write index temp file '{}'", tmp.display()))?;
        fs::rename(&tmp, &self.path).wrap_err_with(|| {
            format!("failed to move index into place '{}'", self.path.display())
        })?;

        self.modified = false;
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).wrap_err_with(|| {
                format!("failed to remove index file '{}'", self.path.display())
            })?;
        }
        self.map = Some(HashMap::new());
        self.modified = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn join(dir: &std::path::Path) -> JoinArea {
        JoinArea::create(dir.join("_join_element.dat")).unwrap()
    }

    #[test]
    fn missing_file_is_empty_map() {
        let dir = tempdir().unwrap();
        let mut index = FlatIndex::new(dir.path().join("fred_sex.idx"));

        let proxy = index.proxy(&IndexKey::Str("male".into()), "Fred").unwrap();
        assert!(proxy.is_empty());
    }

    #[test]
    fn appends_are_visible_before_write() {
        let dir = tempdir().unwrap();
        let mut index = FlatIndex::new(dir.path().join("fred_sex.idx"));

        index.append(IndexKey::Str("female".into()), 2).unwrap();
        index.append(IndexKey::Str("female".into()), 3).unwrap();

        let proxy = index
            .proxy(&IndexKey::Str("female".into()), "Fred")
            .unwrap();
        assert_eq!(proxy.len(), 2);
    }

    #[test]
    fn write_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fred_sex.idx");
        let mut area = join(dir.path());

        {
            let mut index = FlatIndex::new(path.clone());
            index.append(IndexKey::Str("female".into()), 2).unwrap();
            index.append(IndexKey::Str("female".into()), 3).unwrap();
            index.append(IndexKey::Str("male".into()), 1).unwrap();
            index.write(&mut area).unwrap();
            index.save().unwrap();
        }

        let mut index = FlatIndex::new(path);
        let females = index
            .proxy(&IndexKey::Str("female".into()), "Fred")
            .unwrap();
        assert_eq!(females.len(), 2);
        assert_eq!(area.get(females.offset(), 0).unwrap(), 2);
        assert_eq!(area.get(females.offset(), 1).unwrap(), 3);
    }

    #[test]
    fn clean_entries_keep_their_range_across_write() {
        let dir = tempdir().unwrap();
        let mut area = join(dir.path());
        let mut index = FlatIndex::new(dir.path().join("fred_sex.idx"));

        index.append(IndexKey::Int(1), 1).unwrap();
        index.write(&mut area).unwrap();
        let first = index.proxy(&IndexKey::Int(1), "Fred").unwrap().offset();

        // nothing appended in between; a second write must not reallocate
        index.write(&mut area).unwrap();
        let second = index.proxy(&IndexKey::Int(1), "Fred").unwrap().offset();
        assert_eq!(first, second);
    }

    #[test]
    fn dirty_entries_reallocate_and_extend() {
        let dir = tempdir().unwrap();
        let mut area = join(dir.path());
        let mut index = FlatIndex::new(dir.path().join("fred_sex.idx"));

        index.append(IndexKey::Int(1), 1).unwrap();
        index.write(&mut area).unwrap();
        let first = index.proxy(&IndexKey::Int(1), "Fred").unwrap().offset();

        index.append(IndexKey::Int(1), 9).unwrap();
        index.write(&mut area).unwrap();

        let proxy = index.proxy(&IndexKey::Int(1), "Fred").unwrap();
        assert_ne!(proxy.offset(), first);
        assert_eq!(proxy.original_size(), 2);
        assert_eq!(area.get(proxy.offset(), 0).unwrap(), 1);
        assert_eq!(area.get(proxy.offset(), 1).unwrap(), 9);
    }
}
