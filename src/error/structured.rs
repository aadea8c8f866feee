//! The canonical error record shared by classification, persistence and
//! notification.
//!
//! A [`StructuredError`] is created once, either by application code through
//! one of the named constructors or by the classifier, and is only read after
//! that. The [`ErrorView`] projection is the only part that ever leaves the
//! process boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::codes;

/// Default status for errors that carry none.
pub const DEFAULT_STATUS: u16 = 500;

/// The flavour of a structured error, which decides its default status and code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Any error without a more specific flavour.
    #[default]
    Generic,
    /// Invalid input supplied by the caller.
    Validation,
    /// The caller is not allowed to perform the action.
    Authorization,
    /// A business rule rejected an otherwise valid request.
    BusinessLogic,
}

impl ErrorKind {
    /// Status code used when the caller does not override it.
    pub fn default_status(self) -> u16 {
        match self {
            ErrorKind::Generic => DEFAULT_STATUS,
            ErrorKind::Validation => 400,
            ErrorKind::Authorization => 401,
            ErrorKind::BusinessLogic => 422,
        }
    }

    /// Machine-readable code used when the caller does not override it.
    pub fn default_code(self) -> &'static str {
        match self {
            ErrorKind::Generic => codes::GENERIC_ERROR,
            ErrorKind::Validation => codes::VALIDATION_ERR,
            ErrorKind::Authorization => codes::AUTHORIZATION_ERR,
            ErrorKind::BusinessLogic => codes::BUSINESS_ERR,
        }
    }

    /// Message used when the caller does not supply one.
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorKind::Generic => "An error occurred",
            ErrorKind::Validation => "Validation failed",
            ErrorKind::Authorization => "You are not authorized to perform this action",
            ErrorKind::BusinessLogic => "Business rule violated",
        }
    }
}

/// One field-level or rule-level violation inside a structured error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Human-readable description of this violation.
    pub message: String,
    /// The field or entity this violation refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Machine-readable code for this violation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorDetail {
    /// Creates a detail with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            target: None,
            code: None,
        }
    }

    /// Sets the target of this detail.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Sets the code of this detail.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// A normalized error with status, code and diagnostic context.
///
/// Fields are public for reading. Construction goes through
/// [`StructuredError::new`] or one of the kind-specific builders so that
/// `status`, `code` and `internal` are always populated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    /// Flavour of the error.
    #[serde(default)]
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// HTTP-style status code.
    pub status: u16,
    /// Machine-readable classification tag.
    pub code: String,
    /// The offending field or entity, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Sub-errors in the order they were reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ErrorDetail>>,
    /// Logical subsystem the error originated in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Diagnostic payload. Always a JSON object, never exposed externally.
    #[serde(default = "empty_object", deserialize_with = "deserialize_internal")]
    pub internal: Value,
    /// Filtered stack trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Same shape rules as [`StructuredErrorBuilder::internal`]: null becomes
/// `{}` and other non-objects go under `value`.
fn deserialize_internal<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => Value::Object(map),
        Value::Null => empty_object(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            Value::Object(map)
        }
    })
}

impl StructuredError {
    /// Creates a generic error (500, `GENERIC_ERROR`) with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::builder(ErrorKind::Generic).message(message).build()
    }

    /// Starts a builder for the given kind, pre-filled with its defaults.
    pub fn builder(kind: ErrorKind) -> StructuredErrorBuilder {
        StructuredErrorBuilder::new(kind)
    }

    /// Starts a validation error (400, `VALIDATION_ERR`).
    pub fn validation() -> StructuredErrorBuilder {
        Self::builder(ErrorKind::Validation)
    }

    /// Starts an authorization error (401, `AUTHORIZATION_ERR`).
    pub fn authorization() -> StructuredErrorBuilder {
        Self::builder(ErrorKind::Authorization)
    }

    /// Starts a business logic error (422, `BUSINESS_ERR`).
    pub fn business_logic() -> StructuredErrorBuilder {
        Self::builder(ErrorKind::BusinessLogic)
    }

    /// Returns the view of this error that may be shown to callers.
    pub fn to_view(&self) -> ErrorView {
        ErrorView {
            message: self.message.clone(),
            status: self.status,
            code: self.code.clone(),
            target: self.target.clone(),
            details: self.details.clone(),
        }
    }

    /// Returns true if this error was caused by the caller (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StructuredError {}

/// Builder for [`StructuredError`].
///
/// Every field not set explicitly falls back to the defaults of the kind the
/// builder was created with.
#[derive(Clone, Debug)]
pub struct StructuredErrorBuilder {
    kind: ErrorKind,
    message: Option<String>,
    status: Option<u16>,
    code: Option<String>,
    target: Option<String>,
    details: Option<Vec<ErrorDetail>>,
    module: Option<String>,
    internal: Map<String, Value>,
    stack: Option<String>,
}

impl StructuredErrorBuilder {
    fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            status: None,
            code: None,
            target: None,
            details: None,
            module: None,
            internal: Map::new(),
            stack: None,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Appends one detail, keeping earlier ones in order.
    pub fn detail(mut self, detail: ErrorDetail) -> Self {
        self.details.get_or_insert_with(Vec::new).push(detail);
        self
    }

    /// Replaces all details.
    pub fn details(mut self, details: Vec<ErrorDetail>) -> Self {
        self.details = Some(details);
        self
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn module_opt(mut self, module: Option<String>) -> Self {
        self.module = module;
        self
    }

    /// Merges diagnostic data into `internal`.
    ///
    /// Objects are merged key by key. Any other value is stored under `value`.
    pub fn internal(mut self, internal: Value) -> Self {
        match internal {
            Value::Object(map) => self.internal.extend(map),
            Value::Null => {}
            other => {
                self.internal.insert("value".to_string(), other);
            }
        }
        self
    }

    /// Sets a single key in `internal`.
    pub fn internal_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.internal.insert(key.into(), value);
        self
    }

    pub fn stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn stack_opt(mut self, stack: Option<String>) -> Self {
        self.stack = stack;
        self
    }

    pub fn build(self) -> StructuredError {
        let kind = self.kind;
        StructuredError {
            kind,
            message: self
                .message
                .unwrap_or_else(|| kind.default_message().to_string()),
            status: self.status.unwrap_or_else(|| kind.default_status()),
            code: self
                .code
                .filter(|code| !code.is_empty())
                .unwrap_or_else(|| kind.default_code().to_string()),
            target: self.target,
            details: self.details,
            module: self.module,
            internal: Value::Object(self.internal),
            stack: self.stack,
        }
    }
}

impl From<StructuredErrorBuilder> for StructuredError {
    fn from(builder: StructuredErrorBuilder) -> Self {
        builder.build()
    }
}

/// The external view of a structured error.
///
/// This is what a failing handler reports back to its caller. It never
/// carries `internal` or `stack`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorView {
    pub message: String,
    pub status: u16,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ErrorDetail>>,
}

impl ErrorView {
    /// HTTP status for this view, 500 if `status` is not a valid code.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl std::fmt::Display for ErrorView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorView {}

impl IntoResponse for ErrorView {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}
