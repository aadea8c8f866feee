//! Machine-readable error codes.

/// Parse failure in a request payload or other input.
pub const SYNTAX_ERR: &str = "SYNTAX_ERR";
/// Type, reference or range failure, or a panic, inside the handler.
pub const RUNTIME_ERR: &str = "RUNTIME_ERR";
/// Failure reported by the database client.
pub const HANA_DB_ERR: &str = "HANA_DB_ERR";
/// Failure of an outbound HTTP call that returned a response.
pub const CPI_HTTP_ERR: &str = "CPI_HTTP_ERR";
/// Anything the classifier does not recognize.
pub const UNKNOWN_ERR: &str = "UNKNOWN_ERR";
pub const VALIDATION_ERR: &str = "VALIDATION_ERR";
pub const AUTHORIZATION_ERR: &str = "AUTHORIZATION_ERR";
pub const BUSINESS_ERR: &str = "BUSINESS_ERR";
/// Default code for structured errors without a more specific one.
pub const GENERIC_ERROR: &str = "GENERIC_ERROR";
