//! Shared error taxonomy and small utilities used across all parley crates.

pub mod error;
pub mod periodic;
pub mod phone;
pub mod time;

pub use {
    error::{Entity, Error, Result, TransportErrorKind, codes},
    time::{HOUR_MS, now_ms},
};
