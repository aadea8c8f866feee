//! faultline - error normalization and reporting for request handlers.
//!
//! Failures raised inside a wrapped handler are classified into a
//! [`StructuredError`], persisted, sent as an alert and reported back to the
//! caller as an [`ErrorView`].

pub mod classify;
pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod notification;
pub mod persist;
pub mod request;

pub use classify::{normalize_error, NormalizeContext, StackFilter};
pub use error::{ErrorDetail, ErrorKind, ErrorView, RawError, RuntimeKind, StructuredError};
pub use handler::{ErrorHandler, ErrorHandlerBuilder};
pub use request::{RequestInfo, RequestSnapshot};
