//! Error types shared across the crate.
//!
//! [`StructuredError`] is the canonical normalized error, [`RawError`] is
//! anything a handler can fail with before classification, and [`codes`]
//! holds the machine-readable taxonomy.

pub mod codes;
pub mod raw;
pub mod structured;

pub use raw::{RawError, RuntimeKind};
pub use structured::{
    ErrorDetail, ErrorKind, ErrorView, StructuredError, StructuredErrorBuilder, DEFAULT_STATUS,
};
