//! Mathematical utilities

pub mod bits;

pub use bits::{pop_count_bits, pop_count_slice};
