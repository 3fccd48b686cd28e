//! Core types shared across the crate.

mod id;

pub use id::FiberId;
