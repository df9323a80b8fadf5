//! # String Heap
//!
//! Append-only UTF-8 byte heap addressed by `(offset, len)`. String fields
//! in record structs store these two coordinates instead of inline bytes.
//! There is no deduplication: interning the same string twice stores it
//! twice. The tail position is persisted in the metadata sidecar at close.

use std::path::Path;

use eyre::Result;

use crate::config::PAGE_SIZE;
use crate::error::StoreError;
use crate::storage::PagedFile;

#[derive(Debug)]
pub struct StringHeap {
    file: PagedFile,
    used: u64,
}

impl StringHeap {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            file: PagedFile::create(path)?,
            used: 0,
        })
    }

    /// Opens an existing heap. `used` is the byte tail recorded in metadata;
    /// bytes past it are slack from an unfinalized session.
    pub fn open<P: AsRef<Path>>(path: P, readonly: bool, used: u64) -> Result<Self> {
        let file = PagedFile::open(path, readonly)?;

        if used > file.size() {
            return Err(StoreError::CorruptLayout(format!(
                "string heap tail {} exceeds file size {}",
                used,
                file.size()
            ))
            .into());
        }

        Ok(Self { file, used })
    }

    /// Appends the UTF-8 bytes of `s` and returns their coordinates.
    /// The empty string is represented as `(0, 0)` without touching the heap.
    pub fn intern(&mut self, s: &str) -> Result<(u64, u64)> {
        let bytes = s.as_bytes();
        if bytes.is_empty() {
            return Ok((0, 0));
        }

        let offset = self.used;
        let end = offset + bytes.len() as u64;

        let needed_pages = end.div_ceil(PAGE_SIZE as u64);
        if needed_pages > self.file.page_count() {
            self.file
                .allocate_pages(needed_pages - self.file.page_count())?;
        }

        self.file
            .bytes_mut(offset, bytes.len())?
            .copy_from_slice(bytes);
        self.used = end;

        Ok((offset, bytes.len() as u64))
    }

    /// Reads the string at `(offset, len)`. The range must lie inside the
    /// used portion of the heap and must be valid UTF-8.
    pub fn read(&self, offset: u64, len: u64) -> Result<&str> {
        if len == 0 {
            return Ok("");
        }

        if offset + len > self.used {
            return Err(StoreError::CorruptLayout(format!(
                "string range {}..{} outside heap tail {}",
                offset,
                offset + len,
                self.used
            ))
            .into());
        }

        let bytes = self.file.bytes(offset, len as usize)?;
        std::str::from_utf8(bytes).map_err(|e| {
            StoreError::CorruptLayout(format!(
                "string at {}..{} is not valid UTF-8: {}",
                offset,
                offset + len,
                e
            ))
            .into()
        })
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn intern_and_read_round_trip() {
        let dir = tempdir().unwrap();
        let mut heap = StringHeap::create(dir.path().join("_string_element.dat")).unwrap();

        let (off_a, len_a) = heap.intern("hello").unwrap();
        let (off_b, len_b) = heap.intern("świat").unwrap();

        assert_eq!(heap.read(off_a, len_a).unwrap(), "hello");
        assert_eq!(heap.read(off_b, len_b).unwrap(), "świat");
    }

    #[test]
    fn no_deduplication() {
        let dir = tempdir().unwrap();
        let mut heap = StringHeap::create(dir.path().join("_string_element.dat")).unwrap();

        let a = heap.intern("same").unwrap();
        let b = heap.intern("same").unwrap();

        assert_ne!(a.0, b.0);
        assert_eq!(heap.used(), 8);
    }

    #[test]
    fn empty_string_is_zero_coordinates() {
        let dir = tempdir().unwrap();
        let mut heap = StringHeap::create(dir.path().join("_string_element.dat")).unwrap();

        assert_eq!(heap.intern("").unwrap(), (0, 0));
        assert_eq!(heap.used(), 0);
        assert_eq!(heap.read(0, 0).unwrap(), "");
    }

    #[test]
    fn reopen_reads_persisted_strings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("_string_element.dat");

        let coords = {
            let mut heap = StringHeap::create(&path).unwrap();
            let coords = heap.intern("durable").unwrap();
            heap.sync().unwrap();
            (coords, heap.used())
        };

        let heap = StringHeap::open(&path, true, coords.1).unwrap();
        assert_eq!(heap.read(coords.0 .0, coords.0 .1).unwrap(), "durable");
    }

    #[test]
    fn read_past_tail_is_corrupt() {
        let dir = tempdir().unwrap();
        let mut heap = StringHeap::create(dir.path().join("_string_element.dat")).unwrap();
        heap.intern("abc").unwrap();

        let err = heap.read(0, 100).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::CorruptLayout(_))
        ));
    }

    #[test]
    fn invalid_utf8_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("_string_element.dat");

        {
            let mut heap = StringHeap::create(&path).unwrap();
            heap.intern("abcd").unwrap();
            // overwrite with invalid UTF-8 behind the heap's back
            heap.file.bytes_mut(0, 2).unwrap().copy_from_slice(&[0xff, 0xfe]);
        }

        let heap = StringHeap::open(&path, false, 4).unwrap();
        let err = heap.read(0, 4).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::CorruptLayout(_))
        ));
    }

    #[test]
    fn strings_span_page_boundaries() {
        let dir = tempdir().unwrap();
        let mut heap = StringHeap::create(dir.path().join("_string_element.dat")).unwrap();

        let filler = "x".repeat(PAGE_SIZE - 3);
        heap.intern(&filler).unwrap();
        let (off, len) = heap.intern("straddle").unwrap();

        assert_eq!(heap.read(off, len).unwrap(), "straddle");
    }
}
