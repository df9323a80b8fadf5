//! # Record Module
//!
//! Everything that touches individual records:
//!
//! - [`Value`] / [`IndexKey`]: scalar field values and their index keys
//! - [`RecordStore`]: the per-type paged file of fixed-width structs
//! - [`RecordBuilder`] / [`RecordRef`]: the write side, a named bag of
//!   values and association targets handed to `Database::store`
//! - [`Record`]: the read side, a decoded record with typed getters and
//!   collection proxies for plural associations
//!
//! Encoding and decoding between builders/records and struct bytes lives in
//! the database controller, which owns the string heap and join areas the
//! coordinates point into.

mod builder;
mod store;
mod value;
mod view;

pub use builder::{RecordBuilder, RecordRef};
pub use store::RecordStore;
pub use value::{IndexKey, Value};
pub use view::Record;
