//! Shared utility helpers.

pub mod error;
pub(crate) mod fs;
pub(crate) mod math;

pub use error::{LocateError, LocateResult};
