//! # Record Store
//!
//! One paged file per type, holding fixed-width record structs. A page
//! holds `PAGE_SIZE / struct_size` records; the remainder at the end of
//! each page stays zero and records never straddle pages. Slot arithmetic
//! is purely positional:
//!
//! ```text
//! slot       = rod_id - 1
//! page       = slot / records_per_page
//! byte       = page * PAGE_SIZE + (slot % records_per_page) * struct_size
//! ```
//!
//! Ids are dense and 1-based. `reserve` assigns an id ahead of its bytes
//! being written, which is what forward references during store rely on;
//! the slot reads as zero until `write_at` fills it.

use std::path::Path;

use eyre::Result;

use crate::config::PAGE_SIZE;
use crate::error::StoreError;
use crate::schema::RecordLayout;
use crate::storage::PagedFile;

#[derive(Debug)]
pub struct RecordStore {
    type_name: String,
    file: PagedFile,
    struct_size: usize,
    records_per_page: usize,
    count: u64,
}

impl RecordStore {
    pub fn create<P: AsRef<Path>>(path: P, type_name: &str, layout: &RecordLayout) -> Result<Self> {
        Ok(Self {
            type_name: type_name.to_string(),
            file: PagedFile::create(path)?,
            struct_size: layout.struct_size(),
            records_per_page: layout.records_per_page(),
            count: 0,
        })
    }

    /// Opens an existing store. `count` comes from metadata; the file must
    /// have capacity for it (records appended past the recorded count by a
    /// crashed session are ignored as slack).
    pub fn open<P: AsRef<Path>>(
        path: P,
        type_name: &str,
        layout: &RecordLayout,
        readonly: bool,
        count: u64,
    ) -> Result<Self> {
        let file = PagedFile::open(path, readonly)?;

        let capacity = file.page_count() * layout.records_per_page() as u64;
        if count > capacity {
            return Err(StoreError::CorruptLayout(format!(
                "type '{}' records {} exceed capacity {} of '{}'",
                type_name,
                count,
                capacity,
                file.path().display()
            ))
            .into());
        }

        Ok(Self {
            type_name: type_name.to_string(),
            file,
            struct_size: layout.struct_size(),
            records_per_page: layout.records_per_page(),
            count,
        })
    }

    /// Appends a record and returns its 1-based id.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let rod_id = self.reserve()?;
        self.write_at(rod_id, bytes)?;
        Ok(rod_id)
    }

    /// Assigns the next id and allocates its page, leaving the slot zeroed.
    pub fn reserve(&mut self) -> Result<u64> {
        let rod_id = self.count + 1;
        self.ensure_page_for(rod_id)?;
        self.count = rod_id;
        Ok(rod_id)
    }

    /// Writes the struct bytes of an already-assigned id.
    pub fn write_at(&mut self, rod_id: u64, bytes: &[u8]) -> Result<()> {
        self.check_id(rod_id)?;
        eyre::ensure!(
            bytes.len() == self.struct_size,
            "struct size mismatch for type '{}': {} != {}",
            self.type_name,
            bytes.len(),
            self.struct_size
        );

        let offset = self.slot_offset(rod_id);
        self.file
            .bytes_mut(offset, self.struct_size)?
            .copy_from_slice(bytes);
        Ok(())
    }

    pub fn read(&self, rod_id: u64) -> Result<&[u8]> {
        self.check_id(rod_id)?;
        self.file.bytes(self.slot_offset(rod_id), self.struct_size)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn struct_size(&self) -> usize {
        self.struct_size
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }

    fn check_id(&self, rod_id: u64) -> Result<()> {
        if rod_id == 0 || rod_id > self.count {
            return Err(StoreError::OutOfRange {
                type_name: self.type_name.clone(),
                rod_id,
                count: self.count,
            }
            .into());
        }
        Ok(())
    }

    fn slot_offset(&self, rod_id: u64) -> u64 {
        let slot = rod_id - 1;
        let page = slot / self.records_per_page as u64;
        let in_page = slot % self.records_per_page as u64;
        page * PAGE_SIZE as u64 + in_page * self.struct_size as u64
    }

    fn ensure_page_for(&mut self, rod_id: u64) -> Result<()> {
        let slot = rod_id - 1;
        let page = slot / self.records_per_page as u64;
        if page >= self.file.page_count() {
            self.file.allocate_pages(page + 1 - self.file.page_count())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldKind, TypeDef};
    use tempfile::tempdir;

    fn three_word_layout() -> RecordLayout {
        let def = TypeDef::new("Fred")
            .with_field("a", FieldKind::Integer)
            .with_field("b", FieldKind::Integer)
            .with_field("c", FieldKind::Integer);
        RecordLayout::new(&def).unwrap()
    }

    #[test]
    fn append_assigns_dense_one_based_ids() {
        let dir = tempdir().unwrap();
        let layout = three_word_layout();
        let mut store =
            RecordStore::create(dir.path().join("fred.dat"), "Fred", &layout).unwrap();

        assert_eq!(store.append(&[1u8; 24]).unwrap(), 1);
        assert_eq!(store.append(&[2u8; 24]).unwrap(), 2);
        assert_eq!(store.append(&[3u8; 24]).unwrap(), 3);
        assert_eq!(store.count(), 3);
    }

    #[test]
    fn read_returns_written_bytes() {
        let dir = tempdir().unwrap();
        let layout = three_word_layout();
        let mut store =
            RecordStore::create(dir.path().join("fred.dat"), "Fred", &layout).unwrap();

        let mut bytes = [0u8; 24];
        bytes[..8].copy_from_slice(&42u64.to_le_bytes());
        let id = store.append(&bytes).unwrap();

        assert_eq!(store.read(id).unwrap(), &bytes);
    }

    #[test]
    fn zero_and_past_count_ids_are_out_of_range() {
        let dir = tempdir().unwrap();
        let layout = three_word_layout();
        let mut store =
            RecordStore::create(dir.path().join("fred.dat"), "Fred", &layout).unwrap();
        store.append(&[0u8; 24]).unwrap();

        for bad in [0u64, 2] {
            let err = store.read(bad).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<StoreError>(),
                Some(StoreError::OutOfRange { .. })
            ));
        }
    }

    #[test]
    fn reserved_slot_reads_zero_until_written() {
        let dir = tempdir().unwrap();
        let layout = three_word_layout();
        let mut store =
            RecordStore::create(dir.path().join("fred.dat"), "Fred", &layout).unwrap();

        let id = store.reserve().unwrap();
        assert!(store.read(id).unwrap().iter().all(|&b| b == 0));

        store.write_at(id, &[9u8; 24]).unwrap();
        assert_eq!(store.read(id).unwrap(), &[9u8; 24]);
    }

    #[test]
    fn records_fill_pages_without_straddling() {
        let dir = tempdir().unwrap();
        let layout = three_word_layout();
        let per_page = layout.records_per_page() as u64;
        let mut store =
            RecordStore::create(dir.path().join("fred.dat"), "Fred", &layout).unwrap();

        for i in 0..per_page + 1 {
            let mut bytes = [0u8; 24];
            bytes[..8].copy_from_slice(&i.to_le_bytes());
            store.append(&bytes).unwrap();
        }

        assert_eq!(store.file.page_count(), 2);
        let last = store.read(per_page + 1).unwrap();
        assert_eq!(&last[..8], &per_page.to_le_bytes());
    }

    #[test]
    fn reopen_honors_metadata_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fred.dat");
        let layout = three_word_layout();

        {
            let mut store = RecordStore::create(&path, "Fred", &layout).unwrap();
            store.append(&[1u8; 24]).unwrap();
            store.append(&[2u8; 24]).unwrap();
            store.sync().unwrap();
        }

        // metadata said only one record was committed; the second is slack
        let store = RecordStore::open(&path, "Fred", &layout, true, 1).unwrap();
        assert_eq!(store.count(), 1);
        assert!(store.read(2).is_err());
    }

    #[test]
    fn open_rejects_count_beyond_capacity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fred.dat");
        let layout = three_word_layout();

        {
            let mut store = RecordStore::create(&path, "Fred", &layout).unwrap();
            store.append(&[1u8; 24]).unwrap();
            store.sync().unwrap();
        }

        let err = RecordStore::open(&path, "Fred", &layout, true, 100_000).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::CorruptLayout(_))
        ));
    }
}
