//! # Join Areas
//!
//! Plural associations and index entries do not store target ids inline.
//! Instead they hold a `(count, offset)` pair pointing into one of two
//! shared, append-only element arrays:
//!
//! - the scalar join area (`_join_element.dat`): one id per element
//! - the polymorphic join area (`_polymorphic_join_element.dat`): an
//!   `(id, class_tag)` pair per element
//!
//! Element id 0 denotes a null entry. Ranges are allocated at the tail and
//! never reclaimed; reassigning a plural association allocates a fresh range
//! and leaves the prior one as garbage, which the append-only design
//! accepts.
//!
//! Elements are zerocopy little-endian structs, so reads parse directly out
//! of the mapping without copying.

use std::path::Path;

use eyre::Result;
use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{JOIN_ELEMENT_SIZE, PAGE_SIZE, POLY_JOIN_ELEMENT_SIZE};
use crate::error::StoreError;
use crate::storage::PagedFile;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct JoinElement {
    id: U64,
}

const _: () = assert!(std::mem::size_of::<JoinElement>() == JOIN_ELEMENT_SIZE);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PolymorphicJoinElement {
    id: U64,
    class_tag: U64,
}

const _: () = assert!(std::mem::size_of::<PolymorphicJoinElement>() == POLY_JOIN_ELEMENT_SIZE);

/// Scalar join area: packed array of target ids.
#[derive(Debug)]
pub struct JoinArea {
    file: PagedFile,
    used: u64,
}

impl JoinArea {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            file: PagedFile::create(path)?,
            used: 0,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P, readonly: bool, used: u64) -> Result<Self> {
        let file = PagedFile::open(path, readonly)?;
        check_tail(&file, used, JOIN_ELEMENT_SIZE)?;
        Ok(Self { file, used })
    }

    /// Reserves `count` contiguous elements at the tail and returns the
    /// index of the first. The new elements read as zero (null).
    pub fn allocate(&mut self, count: u64) -> Result<u64> {
        allocate_elements(&mut self.file, &mut self.used, count, JOIN_ELEMENT_SIZE)
    }

    pub fn get(&self, offset: u64, i: u64) -> Result<u64> {
        let bytes = self.element_bytes(offset, i)?;
        let element = JoinElement::ref_from_bytes(bytes)
            .map_err(|e| eyre::eyre!("failed to parse join element: {:?}", e))?;
        Ok(element.id.get())
    }

    pub fn set(&mut self, offset: u64, i: u64, id: u64) -> Result<()> {
        check_index(offset, i, self.used)?;
        let element = JoinElement { id: U64::new(id) };
        let at = (offset + i) * JOIN_ELEMENT_SIZE as u64;
        self.file
            .bytes_mut(at, JOIN_ELEMENT_SIZE)?
            .copy_from_slice(element.as_bytes());
        Ok(())
    }

    fn element_bytes(&self, offset: u64, i: u64) -> Result<&[u8]> {
        check_index(offset, i, self.used)?;
        let at = (offset + i) * JOIN_ELEMENT_SIZE as u64;
        self.file.bytes(at, JOIN_ELEMENT_SIZE)
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }
}

/// Polymorphic join area: packed array of `(id, class_tag)` pairs.
#[derive(Debug)]
pub struct PolymorphicJoinArea {
    file: PagedFile,
    used: u64,
}

impl PolymorphicJoinArea {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            file: PagedFile::create(path)?,
            used: 0,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P, readonly: bool, used: u64) -> Result<Self> {
        let file = PagedFile::open(path, readonly)?;
        check_tail(&file, used, POLY_JOIN_ELEMENT_SIZE)?;
        Ok(Self { file, used })
    }

    pub fn allocate(&mut self, count: u64) -> Result<u64> {
        allocate_elements(&mut self.file, &mut self.used, count, POLY_JOIN_ELEMENT_SIZE)
    }

    pub fn get(&self, offset: u64, i: u64) -> Result<(u64, u64)> {
        check_index(offset, i, self.used)?;
        let at = (offset + i) * POLY_JOIN_ELEMENT_SIZE as u64;
        let bytes = self.file.bytes(at, POLY_JOIN_ELEMENT_SIZE)?;
        let element = PolymorphicJoinElement::ref_from_bytes(bytes)
            .map_err(|e| eyre::eyre!("failed to parse polymorphic join element: {:?}", e))?;
        Ok((element.id.get(), element.class_tag.get()))
    }

    pub fn set(&mut self, offset: u64, i: u64, id: u64, class_tag: u64) -> Result<()> {
        check_index(offset, i, self.used)?;
        let element = PolymorphicJoinElement {
            id: U64::new(id),
            class_tag: U64::new(class_tag),
        };
        let at = (offset + i) * POLY_JOIN_ELEMENT_SIZE as u64;
        self.file
            .bytes_mut(at, POLY_JOIN_ELEMENT_SIZE)?
            .copy_from_slice(element.as_bytes());
        Ok(())
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }
}

fn check_tail(file: &PagedFile, used: u64, element_size: usize) -> Result<()> {
    if used * element_size as u64 > file.size() {
        return Err(StoreError::CorruptLayout(format!(
            "join tail {} exceeds capacity of '{}'",
            used,
            file.path().display()
        ))
        .into());
    }
    Ok(())
}

fn check_index(offset: u64, i: u64, used: u64) -> Result<()> {
    if offset + i >= used {
        return Err(StoreError::CorruptLayout(format!(
            "join element {} outside allocated tail {}",
            offset + i,
            used
        ))
        .into());
    }
    Ok(())
}

fn allocate_elements(
    file: &mut PagedFile,
    used: &mut u64,
    count: u64,
    element_size: usize,
) -> Result<u64> {
    let offset = *used;
    let end_bytes = (offset + count) * element_size as u64;

    let needed_pages = end_bytes.div_ceil(PAGE_SIZE as u64);
    if needed_pages > file.page_count() {
        file.allocate_pages(needed_pages - file.page_count())?;
    }

    *used = offset + count;
    Ok(offset)
}
