//! # Configuration Constants
//!
//! This module centralizes the geometry and naming constants shared across
//! the storage layer, so that interdependent values live next to each other.
//!
//! ## Geometry
//!
//! ```text
//! PAGE_SIZE (16384 bytes)
//!       │
//!       ├─> records_per_page = PAGE_SIZE / struct_size (per type)
//!       │     struct sizes are word multiples, records never straddle pages
//!       │
//!       ├─> JOIN_ELEMENT_SIZE (8)         must divide PAGE_SIZE
//!       │
//!       └─> POLY_JOIN_ELEMENT_SIZE (16)   must divide PAGE_SIZE
//! ```
//!
//! ## Critical Invariants
//!
//! Enforced by compile-time assertions below:
//!
//! 1. `PAGE_SIZE` is a multiple of `WORD_SIZE`
//! 2. Join element sizes divide `PAGE_SIZE` (elements never straddle pages)

/// Size of each database page in bytes (16KB).
/// This is the unit of file growth and of record-slot arithmetic.
pub const PAGE_SIZE: usize = 16384;

/// Width of one struct word in bytes. Every scalar field, string coordinate,
/// association id and class tag occupies whole words, little-endian.
pub const WORD_SIZE: usize = 8;

/// Size of one scalar join element (a single target id).
pub const JOIN_ELEMENT_SIZE: usize = 8;

/// Size of one polymorphic join element (target id + class tag).
pub const POLY_JOIN_ELEMENT_SIZE: usize = 16;

/// Number of bucket files a segmented index shards its keys into.
pub const SEGMENT_COUNT: u64 = 256;

const _: () = assert!(PAGE_SIZE % WORD_SIZE == 0, "PAGE_SIZE must be word-aligned");

const _: () = assert!(
    PAGE_SIZE % JOIN_ELEMENT_SIZE == 0,
    "join elements must not straddle pages"
);

const _: () = assert!(
    PAGE_SIZE % POLY_JOIN_ELEMENT_SIZE == 0,
    "polymorphic join elements must not straddle pages"
);

// ============================================================================
// FILE NAMING
// ============================================================================

/// Name of the YAML metadata sidecar inside the database directory.
pub const METADATA_FILE_NAME: &str = "database.yml";

/// Name of the string heap file.
pub const STRING_HEAP_FILE_NAME: &str = "_string_element.dat";

/// Name of the scalar join area file.
pub const JOIN_FILE_NAME: &str = "_join_element.dat";

/// Name of the polymorphic join area file.
pub const POLY_JOIN_FILE_NAME: &str = "_polymorphic_join_element.dat";

/// Extension of per-type record store files (`<struct_name>.dat`).
pub const DATA_FILE_EXTENSION: &str = "dat";

/// Extension of flat index files (`<struct_name>_<field>.idx`).
pub const INDEX_FILE_EXTENSION: &str = "idx";

/// Extension of segmented index bucket files.
pub const SEGMENT_FILE_EXTENSION: &str = "seg";

/// Suffix appended to data files holding new-schema records during migration.
pub const NEW_DATA_SUFFIX: &str = "new";

/// Suffix data files are renamed to after a successful migration swap.
pub const LEGACY_DATA_SUFFIX: &str = "legacy";

/// Namespace legacy types are generated under during migration.
pub const LEGACY_NAMESPACE: &str = "legacy";
