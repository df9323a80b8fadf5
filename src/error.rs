//! # Error Signals
//!
//! Typed error conditions surfaced to callers. Most internal failures travel
//! as plain `eyre` reports with context; the conditions below have stable
//! identity so embedders can match on them with `downcast_ref::<StoreError>()`
//! after any `rodb` call.
//!
//! ```ignore
//! match db.open("./mydb") {
//!     Err(e) if matches!(e.downcast_ref(), Some(StoreError::IncompatibleVersion { .. })) => {
//!         // run a migration
//!     }
//!     other => other?,
//! }
//! ```

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("database is already open")]
    AlreadyOpen,

    #[error("database is not open")]
    NotOpen,

    #[error("database is open in readonly mode")]
    Readonly,

    #[error("incompatible database version: file has {file}, runtime is {runtime}")]
    IncompatibleVersion { file: String, runtime: String },

    #[error("incompatible schema for type '{type_name}': {detail}")]
    IncompatibleSchema { type_name: String, detail: String },

    #[error("corrupt layout: {0}")]
    CorruptLayout(String),

    #[error("{count} referenced object(s) were never stored")]
    DanglingReferences { count: usize },

    #[error("rod id {rod_id} out of range for type '{type_name}' (count {count})")]
    OutOfRange {
        type_name: String,
        rod_id: u64,
        count: u64,
    },

    #[error("unknown index kind '{0}'")]
    InvalidIndexKind(String),
}
