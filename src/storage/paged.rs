//! # Paged Memory-Mapped Files
//!
//! `PagedFile` is the page allocator underneath every on-disk area: record
//! stores, the string heap and the join areas. A paged file is a plain file
//! whose size is always a whole number of [`PAGE_SIZE`] pages, mapped into
//! the process address space as one contiguous region.
//!
//! ## Growth
//!
//! `allocate_pages(n)` extends the file by `n` pages and remaps. The kernel
//! zero-fills the new tail, so freshly allocated slots read as zero. Callers
//! never see a stale mapping: growth takes `&mut self`, so the borrow
//! checker guarantees no byte reference is held across a remap.
//!
//! ## Readonly Mappings
//!
//! A readonly open maps the file with a shared read-only mapping. Every
//! mutating accessor fails with [`StoreError::Readonly`] instead of
//! faulting, which is the contract the database controller surfaces to
//! callers on a readonly open.
//!
//! ## Alignment
//!
//! Opening a file whose size is not a page multiple fails with
//! [`StoreError::CorruptLayout`]. A zero-length file is legal and maps to
//! nothing; every area starts out empty.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use memmap2::{Mmap, MmapMut};

use crate::config::PAGE_SIZE;
use crate::error::StoreError;

#[derive(Debug)]
enum Mapping {
    Unmapped,
    Readonly(Mmap),
    Writable(MmapMut),
}

#[derive(Debug)]
pub struct PagedFile {
    path: PathBuf,
    file: File,
    mapping: Mapping,
    page_count: u64,
    readonly: bool,
}

impl PagedFile {
    /// Creates a new empty paged file, truncating any existing content.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create paged file '{}'", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            mapping: Mapping::Unmapped,
            page_count: 0,
            readonly: false,
        })
    }

    /// Opens an existing paged file and maps it.
    pub fn open<P: AsRef<Path>>(path: P, readonly: bool) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(!readonly)
            .open(path)
            .wrap_err_with(|| format!("failed to open paged file '{}'", path.display()))?;

        let file_size = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();

        if file_size % PAGE_SIZE as u64 != 0 {
            return Err(StoreError::CorruptLayout(format!(
                "file '{}' size {} is not a multiple of page size {}",
                path.display(),
                file_size,
                PAGE_SIZE
            ))
            .into());
        }

        let page_count = file_size / PAGE_SIZE as u64;

        let mut paged = Self {
            path: path.to_path_buf(),
            file,
            mapping: Mapping::Unmapped,
            page_count,
            readonly,
        };
        paged.remap()?;

        Ok(paged)
    }

    fn remap(&mut self) -> Result<()> {
        if self.page_count == 0 {
            self.mapping = Mapping::Unmapped;
            return Ok(());
        }

        // SAFETY: mapping a file is unsafe because external processes could
        // mutate it underneath us. This is safe here because:
        // 1. The database owns its directory; files are not shared
        // 2. The mapping's lifetime is tied to self, preventing use-after-unmap
        // 3. All access goes through bounds-checked accessors
        self.mapping = if self.readonly {
            let map = unsafe {
                Mmap::map(&self.file)
                    .wrap_err_with(|| format!("failed to memory-map '{}'", self.path.display()))?
            };
            Mapping::Readonly(map)
        } else {
            let map = unsafe {
                MmapMut::map_mut(&self.file)
                    .wrap_err_with(|| format!("failed to memory-map '{}'", self.path.display()))?
            };
            Mapping::Writable(map)
        };

        Ok(())
    }

    /// Extends the file by `n` pages and returns the index of the first new
    /// page. The new tail reads as zero.
    pub fn allocate_pages(&mut self, n: u64) -> Result<u64> {
        if self.readonly {
            return Err(StoreError::Readonly.into());
        }

        if n == 0 {
            return Ok(self.page_count);
        }

        if let Mapping::Writable(map) = &self.mapping {
            map.flush_async()
                .wrap_err("failed to flush mapping before growth")?;
        }

        let first = self.page_count;
        let new_size = (first + n) * PAGE_SIZE as u64;

        self.file
            .set_len(new_size)
            .wrap_err_with(|| format!("failed to extend file to {} bytes", new_size))?;

        self.page_count = first + n;
        self.remap()?;

        Ok(first)
    }

    fn mapped(&self) -> Result<&[u8]> {
        match &self.mapping {
            Mapping::Unmapped => Ok(&[]),
            Mapping::Readonly(map) => Ok(&map[..]),
            Mapping::Writable(map) => Ok(&map[..]),
        }
    }

    fn mapped_mut(&mut self) -> Result<&mut [u8]> {
        match &mut self.mapping {
            Mapping::Unmapped => Ok(&mut []),
            Mapping::Readonly(_) => Err(StoreError::Readonly.into()),
            Mapping::Writable(map) => Ok(&mut map[..]),
        }
    }

    pub fn page(&self, page_no: u64) -> Result<&[u8]> {
        ensure!(
            page_no < self.page_count,
            "page {} out of bounds (page_count={}) in '{}'",
            page_no,
            self.page_count,
            self.path.display()
        );

        let offset = page_no as usize * PAGE_SIZE;
        Ok(&self.mapped()?[offset..offset + PAGE_SIZE])
    }

    pub fn page_mut(&mut self, page_no: u64) -> Result<&mut [u8]> {
        ensure!(
            page_no < self.page_count,
            "page {} out of bounds (page_count={}) in '{}'",
            page_no,
            self.page_count,
            self.path.display()
        );

        let offset = page_no as usize * PAGE_SIZE;
        Ok(&mut self.mapped_mut()?[offset..offset + PAGE_SIZE])
    }

    /// Contiguous byte range. Ranges may span page boundaries since the
    /// mapping is a single region.
    pub fn bytes(&self, offset: u64, len: usize) -> Result<&[u8]> {
        let end = offset + len as u64;
        ensure!(
            end <= self.size(),
            "byte range {}..{} out of bounds (size={}) in '{}'",
            offset,
            end,
            self.size(),
            self.path.display()
        );

        Ok(&self.mapped()?[offset as usize..end as usize])
    }

    pub fn bytes_mut(&mut self, offset: u64, len: usize) -> Result<&mut [u8]> {
        let end = offset + len as u64;
        ensure!(
            end <= self.size(),
            "byte range {}..{} out of bounds (size={}) in '{}'",
            offset,
            end,
            self.size(),
            self.path.display()
        );

        Ok(&mut self.mapped_mut()?[offset as usize..end as usize])
    }

    pub fn sync(&self) -> Result<()> {
        if let Mapping::Writable(map) = &self.mapping {
            map.flush()
                .wrap_err_with(|| format!("failed to sync '{}'", self.path.display()))?;
        }
        Ok(())
    }

    pub fn page_count(&self) -> u64 {
        self.page_count
    }

    pub fn size(&self) -> u64 {
        self.page_count * PAGE_SIZE as u64
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Hints the kernel that a page range is about to be read sequentially.
    pub fn prefetch_pages(&self, start_page: u64, count: u64) {
        if start_page >= self.page_count {
            return;
        }

        let end_page = (start_page + count).min(self.page_count);
        let start_offset = start_page as usize * PAGE_SIZE;
        let len = (end_page - start_page) as usize * PAGE_SIZE;

        let base = match &self.mapping {
            Mapping::Unmapped => return,
            Mapping::Readonly(map) => map.as_ptr(),
            Mapping::Writable(map) => map.as_ptr(),
        };

        #[cfg(unix)]
        // SAFETY: madvise with MADV_WILLNEED is a kernel hint. The range is
        // bounds-checked above: start_page < page_count and end_page is
        // clamped, so start_offset + len never exceeds the mapping.
        unsafe {
            libc::madvise(
                base.add(start_offset) as *mut libc::c_void,
                len,
                libc::MADV_WILLNEED,
            );
        }

        #[cfg(not(unix))]
        {
            let _ = (base, start_offset, len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_starts_empty() {
        let dir = tempdir().unwrap();
        let paged = PagedFile::create(dir.path().join("a.dat")).unwrap();

        assert_eq!(paged.page_count(), 0);
        assert_eq!(paged.size(), 0);
    }

    #[test]
    fn allocate_pages_returns_first_new_page() {
        let dir = tempdir().unwrap();
        let mut paged = PagedFile::create(dir.path().join("a.dat")).unwrap();

        assert_eq!(paged.allocate_pages(2).unwrap(), 0);
        assert_eq!(paged.allocate_pages(3).unwrap(), 2);
        assert_eq!(paged.page_count(), 5);
        assert_eq!(paged.size(), 5 * PAGE_SIZE as u64);
    }

    #[test]
    fn new_pages_read_as_zero() {
        let dir = tempdir().unwrap();
        let mut paged = PagedFile::create(dir.path().join("a.dat")).unwrap();

        paged.allocate_pages(1).unwrap();
        assert!(paged.page(0).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn data_survives_growth() {
        let dir = tempdir().unwrap();
        let mut paged = PagedFile::create(dir.path().join("a.dat")).unwrap();

        paged.allocate_pages(1).unwrap();
        paged.bytes_mut(0, 4).unwrap().copy_from_slice(b"abcd");
        paged.allocate_pages(8).unwrap();

        assert_eq!(paged.bytes(0, 4).unwrap(), b"abcd");
    }

    #[test]
    fn reopen_preserves_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.dat");

        {
            let mut paged = PagedFile::create(&path).unwrap();
            paged.allocate_pages(2).unwrap();
            paged.bytes_mut(100, 3).unwrap().copy_from_slice(b"xyz");
            paged.sync().unwrap();
        }

        let paged = PagedFile::open(&path, false).unwrap();
        assert_eq!(paged.page_count(), 2);
        assert_eq!(paged.bytes(100, 3).unwrap(), b"xyz");
    }

    #[test]
    fn open_rejects_misaligned_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.dat");
        std::fs::write(&path, vec![0u8; PAGE_SIZE + 1]).unwrap();

        let err = PagedFile::open(&path, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::CorruptLayout(_))
        ));
    }

    #[test]
    fn readonly_rejects_mutation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.dat");

        {
            let mut paged = PagedFile::create(&path).unwrap();
            paged.allocate_pages(1).unwrap();
            paged.sync().unwrap();
        }

        let mut paged = PagedFile::open(&path, true).unwrap();
        assert!(paged.bytes(0, 8).is_ok());

        let err = paged.bytes_mut(0, 8).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::Readonly)
        ));

        let err = paged.allocate_pages(1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::Readonly)
        ));
    }

    #[test]
    fn byte_range_spans_pages() {
        let dir = tempdir().unwrap();
        let mut paged = PagedFile::create(dir.path().join("a.dat")).unwrap();

        paged.allocate_pages(2).unwrap();
        let offset = PAGE_SIZE as u64 - 2;
        paged.bytes_mut(offset, 4).unwrap().copy_from_slice(b"span");

        assert_eq!(paged.bytes(offset, 4).unwrap(), b"span");
    }
}
