//! # Storage Module
//!
//! Foundational storage layer: paged memory-mapped files plus the two shared
//! append-only areas built on top of them, the string heap and the join
//! areas.
//!
//! ## Paged Files
//!
//! Every on-disk area is a [`PagedFile`]: a plain file whose size is always a
//! multiple of [`PAGE_SIZE`](crate::config::PAGE_SIZE), mapped into the
//! process address space in one contiguous region. Growth happens in whole
//! pages; the mapping is re-established after each growth.
//!
//! ## Safety Model
//!
//! Memory-mapped regions become invalid when the file is grown and remapped.
//! Instead of runtime guards, the borrow checker enforces safety:
//!
//! ```text
//! PagedFile::bytes(&self, ..) -> &[u8]          // immutable borrow
//! PagedFile::bytes_mut(&mut self, ..) -> &mut [u8]
//! PagedFile::allocate_pages(&mut self, ..)      // exclusive borrow
//! ```
//!
//! Since growth requires `&mut self`, no byte reference can outlive a remap.
//!
//! ## Areas
//!
//! - [`StringHeap`]: append-only UTF-8 byte heap addressed by (offset, len)
//! - [`JoinArea`]: packed array of target ids backing plural associations
//!   and index ranges
//! - [`PolymorphicJoinArea`]: packed (id, class tag) pairs for polymorphic
//!   plural associations

mod heap;
mod join;
mod paged;

pub use heap::StringHeap;
pub use join::{JoinArea, JoinElement, PolymorphicJoinArea, PolymorphicJoinElement};
pub use paged::PagedFile;
