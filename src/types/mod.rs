//! Shared types for multirootca

pub mod error;

pub use error::{CaError, Result};
