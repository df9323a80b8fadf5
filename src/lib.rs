//! # rodb - Embedded Object Database
//!
//! rodb is an embedded, single-writer object database for schema-defined
//! record types. Each type is laid out as a fixed-width struct; instances are
//! appended into a page-based, memory-mapped data file. Associations between
//! records are materialized as packed arrays of identifiers in an auxiliary
//! join area, and secondary indices map field values to sets of record
//! identifiers.
//!
//! ## Quick Start
//!
//! ```ignore
//! use rodb::{Database, FieldKind, IndexKind, RecordBuilder, TypeDef, Value};
//!
//! let mut db = Database::new();
//! db.register(
//!     TypeDef::new("Fred")
//!         .with_field("age", FieldKind::Integer)
//!         .with_indexed_field("sex", FieldKind::String, IndexKind::Flat),
//! )?;
//!
//! db.create("./mydb")?;
//! db.store("Fred", RecordBuilder::new().set("age", 2).set("sex", "male"))?;
//! db.close()?;
//!
//! db.open("./mydb")?;
//! let females = db.find_by("Fred", "sex", &Value::from("female"))?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------+
//! |       Public API (Database)         |
//! +-------------------------------------+
//! |  Schema Registry  |  Metadata (yml) |
//! +-------------------+-----------------+
//! |  Record Store  |  Indices (flat/seg)|
//! +-------------------------------------+
//! |  String Heap   |  Join Areas        |
//! +-------------------------------------+
//! |  Paged Memory-Mapped File I/O       |
//! +-------------------------------------+
//! ```
//!
//! ## File Layout
//!
//! Each database is a directory:
//!
//! ```text
//! database_dir/
//! ├── database.yml                    # Version, schemas, counts
//! ├── fred.dat                        # Record store, one per type
//! ├── _string_element.dat             # Append-only UTF-8 heap
//! ├── _join_element.dat               # Packed association ids
//! ├── _polymorphic_join_element.dat   # Packed (id, class tag) pairs
//! ├── fred_sex.idx                    # Flat index file
//! └── fred_name/                      # Segmented index bucket directory
//! ```
//!
//! ## Model
//!
//! - Records carry dense 1-based ids, unique per type, assigned at store.
//! - The store is append-only; there are no deletes and no in-place updates
//!   of persisted records.
//! - One writer per database. Readonly opens allow concurrent readers.
//! - Metadata is finalized only at close; a crash leaves slack records past
//!   the recorded counts, which are ignored on reopen.
//!
//! ## Module Overview
//!
//! - [`storage`]: paged memory-mapped files, string heap, join areas
//! - [`schema`]: type definitions, registry, fixed-width record layouts
//! - [`record`]: record store, values, builders and decoded records
//! - [`index`]: flat and segmented secondary indices
//! - [`metadata`]: the `database.yml` sidecar and compatibility rules
//! - [`database`]: lifecycle, store/fetch, queries, migration

pub mod collection;
pub mod config;
pub mod database;
pub mod error;
pub mod index;
pub mod metadata;
pub mod record;
pub mod schema;
pub mod storage;

pub use collection::CollectionProxy;
pub use database::{CloseOptions, Database, OpenOptions};
pub use error::StoreError;
pub use metadata::{Metadata, VERSION};
pub use record::{Record, RecordBuilder, RecordRef, Value};
pub use schema::{FieldKind, IndexKind, TypeDef};
