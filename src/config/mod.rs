//! Configuration constants for file layout and on-disk geometry.

mod constants;

pub use constants::*;
