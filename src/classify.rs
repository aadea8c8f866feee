//! Classification of raw failures into [`StructuredError`]s.
//!
//! [`normalize_error`] is a pure function. The checks run in a fixed order
//! and the first one that matches decides the result:
//!
//! 1. already structured → returned unchanged
//! 2. syntax error → `SYNTAX_ERR`
//! 3. runtime error → `RUNTIME_ERR`
//! 4. database error → `HANA_DB_ERR`
//! 5. remote HTTP error → `CPI_HTTP_ERR` with the remote status
//! 6. anything else → `UNKNOWN_ERR`
//!
//! The database and remote HTTP checks are not mutually exclusive. A value
//! that looks like both is a database error.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::error::{codes, ErrorKind, RawError, StructuredError, DEFAULT_STATUS};
use crate::request::RequestSnapshot;

/// Error code families reported by the database client.
const DB_CODE_PATTERN: &str = r"^(SQL|HDB)";

/// Substring identifying database failures that carry no recognizable code.
const DB_MESSAGE_MARKER: &str = "HANA";

pub const SYNTAX_MESSAGE: &str = "Invalid syntax in request or payload";
pub const RUNTIME_MESSAGE: &str = "Unexpected server error";
pub const DATABASE_MESSAGE: &str = "Database operation failed";
pub const HTTP_MESSAGE: &str = "Remote service call failed";
pub const UNKNOWN_MESSAGE: &str = "Unknown failure";

/// Key of the request payload in `internal` for remote HTTP errors, whose
/// `data` is the response body.
pub const REQUEST_DATA_KEY: &str = "request_data";

/// Frame marker of this crate in Rust backtraces.
pub const CRATE_FRAME_MARKER: &str = "faultline::";

fn db_code_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(DB_CODE_PATTERN).expect("Invalid database code pattern"))
}

/// Removes stack frames belonging to the error machinery itself.
///
/// Any line containing one of the deny markers is dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFilter {
    deny: Vec<String>,
}

impl Default for StackFilter {
    fn default() -> Self {
        Self {
            deny: vec![CRATE_FRAME_MARKER.to_string()],
        }
    }
}

impl StackFilter {
    /// A filter that keeps every frame.
    pub fn none() -> Self {
        Self { deny: Vec::new() }
    }

    /// A filter with the given deny markers.
    pub fn with_markers<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            deny: markers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn markers(&self) -> &[String] {
        &self.deny
    }

    pub fn apply(&self, stack: &str) -> String {
        if self.deny.is_empty() {
            return stack.to_string();
        }
        stack
            .lines()
            .filter(|line| !self.deny.iter().any(|marker| line.contains(marker.as_str())))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Optional context threaded into every classified error.
#[derive(Clone, Copy, Debug, Default)]
pub struct NormalizeContext<'a> {
    /// Subsystem label stored in `module`.
    pub module: Option<&'a str>,
    /// Request whose fields are merged into `internal`.
    pub request: Option<&'a RequestSnapshot>,
    /// Stack filter, the default filter when unset.
    pub stack_filter: Option<&'a StackFilter>,
}

impl<'a> NormalizeContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, module: &'a str) -> Self {
        self.module = Some(module);
        self
    }

    pub fn with_request(mut self, request: &'a RequestSnapshot) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_stack_filter(mut self, filter: &'a StackFilter) -> Self {
        self.stack_filter = Some(filter);
        self
    }
}

/// Maps a raw failure onto exactly one [`StructuredError`].
pub fn normalize_error(raw: impl Into<RawError>, ctx: &NormalizeContext<'_>) -> StructuredError {
    match raw.into() {
        RawError::Structured(error) => error,
        raw => classify_raw(&raw, ctx),
    }
}

fn classify_raw(raw: &RawError, ctx: &NormalizeContext<'_>) -> StructuredError {
    let value = match raw {
        RawError::Structured(error) => return error.clone(),
        RawError::Syntax { .. } => {
            return classified(raw, codes::SYNTAX_ERR, SYNTAX_MESSAGE, ctx);
        }
        RawError::Runtime { .. } => {
            return classified(raw, codes::RUNTIME_ERR, RUNTIME_MESSAGE, ctx);
        }
        RawError::Value(value) => value,
    };

    if is_database_error(value) {
        return classified(raw, codes::HANA_DB_ERR, DATABASE_MESSAGE, ctx);
    }

    if let Some(response) = http_response(value) {
        return http_error(value, response, raw, ctx);
    }

    let message = message_of(value).unwrap_or(UNKNOWN_MESSAGE);
    classified(raw, codes::UNKNOWN_ERR, message, ctx)
}

/// True for values whose `code` belongs to a database code family, or whose
/// message mentions the database.
pub fn is_database_error(value: &Value) -> bool {
    let code_matches = value
        .get("code")
        .and_then(Value::as_str)
        .is_some_and(|code| db_code_regex().is_match(code));
    let message_matches = value
        .get("message")
        .and_then(Value::as_str)
        .is_some_and(|message| message.contains(DB_MESSAGE_MARKER));
    code_matches || message_matches
}

/// The nested response of a remote HTTP failure, if the value has one with a
/// numeric status.
pub fn http_response(value: &Value) -> Option<&Value> {
    value
        .get("response")
        .filter(|response| response.get("status").is_some_and(Value::is_u64))
}

fn message_of(value: &Value) -> Option<&str> {
    match value {
        Value::String(message) if !message.is_empty() => Some(message),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .filter(|message| !message.is_empty()),
        _ => None,
    }
}

fn http_error(
    value: &Value,
    response: &Value,
    raw: &RawError,
    ctx: &NormalizeContext<'_>,
) -> StructuredError {
    let status = response
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|status| u16::try_from(status).ok())
        .filter(|status| (100..=599).contains(status))
        .unwrap_or(DEFAULT_STATUS);

    let condensed = json!({
        "status": response.get("status").cloned().unwrap_or(Value::Null),
        "data": response.get("data").cloned().unwrap_or(Value::Null),
        "headers": response.get("headers").cloned().unwrap_or(Value::Null),
    });

    let mut builder = base(raw, codes::CPI_HTTP_ERR, message_of(value).unwrap_or(HTTP_MESSAGE), ctx)
        .status(status)
        .internal(condensed);

    // `data` now holds the response body.
    if let Some(data) = ctx.request.and_then(|request| request.data.clone()) {
        builder = builder.internal_entry(REQUEST_DATA_KEY, data);
    }
    builder.build()
}

fn classified(
    raw: &RawError,
    code: &str,
    message: &str,
    ctx: &NormalizeContext<'_>,
) -> StructuredError {
    base(raw, code, message, ctx)
        .internal_entry("error", raw_payload(raw))
        .build()
}

/// The raw value for `internal.error`, without its stack. The filtered
/// stack is kept on the error itself.
fn raw_payload(raw: &RawError) -> Value {
    match raw.to_json() {
        Value::Object(mut map) => {
            map.remove("stack");
            Value::Object(map)
        }
        other => other,
    }
}

fn base(
    raw: &RawError,
    code: &str,
    message: &str,
    ctx: &NormalizeContext<'_>,
) -> crate::error::StructuredErrorBuilder {
    let default_filter = StackFilter::default();
    let filter = ctx.stack_filter.unwrap_or(&default_filter);

    let mut builder = StructuredError::builder(ErrorKind::Generic)
        .status(DEFAULT_STATUS)
        .code(code)
        .message(message)
        .module_opt(ctx.module.map(str::to_string))
        .stack_opt(raw.stack().map(|stack| filter.apply(stack)));

    if let Some(request) = ctx.request {
        builder = builder.internal(Value::Object(request.context_entries()));
    }
    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorDetail, RuntimeKind};

    fn normalize(raw: impl Into<RawError>) -> StructuredError {
        normalize_error(raw, &NormalizeContext::new())
    }

    #[test]
    fn test_structured_error_is_returned_unchanged() {
        let original = StructuredError::validation()
            .message("Email is required")
            .target("email")
            .build();

        let request = RequestSnapshot::new().with_user("alice");
        let ctx = NormalizeContext::new()
            .with_module("accounts")
            .with_request(&request);
        let normalized = normalize_error(original.clone(), &ctx);

        assert_eq!(normalized, original);
        assert!(normalized.module.is_none());
    }

    #[test]
    fn test_syntax_error() {
        let error = normalize(RawError::syntax("Unexpected token } in JSON"));

        assert_eq!(error.status, 500);
        assert_eq!(error.code, "SYNTAX_ERR");
        assert_eq!(error.message, SYNTAX_MESSAGE);
        assert_eq!(error.internal["error"]["message"], "Unexpected token } in JSON");
    }

    #[test]
    fn test_type_error() {
        let error = normalize(RawError::runtime(RuntimeKind::Type, "x is not a function"));

        assert_eq!(error.status, 500);
        assert_eq!(error.code, "RUNTIME_ERR");
        assert_eq!(error.message, "Unexpected server error");
        assert_eq!(error.internal["error"]["name"], "TypeError");
        assert_eq!(error.internal["error"]["message"], "x is not a function");
    }

    #[test]
    fn test_reference_and_range_errors_are_runtime() {
        for kind in [RuntimeKind::Reference, RuntimeKind::Range, RuntimeKind::Panic] {
            assert_eq!(normalize(RawError::runtime(kind, "x")).code, "RUNTIME_ERR");
        }
    }

    #[test]
    fn test_database_error_by_code_family() {
        for code in ["SQL_ERROR", "HDB_CONNECTION"] {
            let error = normalize(RawError::database(code, "statement failed"));
            assert_eq!(error.status, 500);
            assert_eq!(error.code, "HANA_DB_ERR");
            assert_eq!(error.message, DATABASE_MESSAGE);
            assert_eq!(error.internal["error"]["code"], code);
        }
    }

    #[test]
    fn test_database_error_by_message_marker() {
        let error = normalize(json!({"message": "HANA connection pool exhausted"}));
        assert_eq!(error.code, "HANA_DB_ERR");
    }

    #[test]
    fn test_non_database_code_is_not_database_error() {
        let error = normalize(json!({"code": "ECONNRESET", "message": "socket hang up"}));
        assert_eq!(error.code, "UNKNOWN_ERR");
        assert_eq!(error.message, "socket hang up");
    }

    #[test]
    fn test_http_error_uses_nested_status() {
        let error = normalize(json!({
            "response": {
                "status": 503,
                "data": {"error": "maintenance"},
                "headers": {"retry-after": "120"}
            }
        }));

        assert_eq!(error.status, 503);
        assert_eq!(error.code, "CPI_HTTP_ERR");
        assert_eq!(error.message, HTTP_MESSAGE);
        assert_eq!(error.internal["status"], 503);
        assert_eq!(error.internal["data"]["error"], "maintenance");
        assert_eq!(error.internal["headers"]["retry-after"], "120");
        assert!(error.internal.get("error").is_none());
    }

    #[test]
    fn test_http_error_keeps_own_message() {
        let error = normalize(RawError::http(404, Value::Null, json!({})));
        assert_eq!(error.status, 404);
        assert_eq!(error.message, "Request failed with status code 404");
    }

    #[test]
    fn test_http_error_with_invalid_status_falls_back() {
        let error = normalize(json!({"response": {"status": 42}}));
        assert_eq!(error.code, "CPI_HTTP_ERR");
        assert_eq!(error.status, 500);
    }

    #[test]
    fn test_response_without_numeric_status_is_unknown() {
        let error = normalize(json!({"response": {"status": "bad"}}));
        assert_eq!(error.code, "UNKNOWN_ERR");
    }

    #[test]
    fn test_database_check_runs_before_http_check() {
        let error = normalize(json!({
            "code": "SQL_TIMEOUT",
            "message": "query timed out",
            "response": {"status": 504}
        }));

        assert_eq!(error.code, "HANA_DB_ERR");
        assert_eq!(error.status, 500);
    }

    #[test]
    fn test_unknown_object_without_message() {
        let error = normalize(json!({"foo": "bar"}));

        assert_eq!(error.status, 500);
        assert_eq!(error.code, "UNKNOWN_ERR");
        assert_eq!(error.message, "Unknown failure");
        assert_eq!(error.internal["error"], json!({"foo": "bar"}));
    }

    #[test]
    fn test_string_and_null_values() {
        assert_eq!(normalize("disk full").message, "disk full");
        assert_eq!(normalize(Value::Null).message, UNKNOWN_MESSAGE);
        assert_eq!(normalize(json!(42)).code, "UNKNOWN_ERR");
    }

    #[test]
    fn test_every_branch_populates_status_and_code() {
        let raws: Vec<RawError> = vec![
            RawError::syntax("s"),
            RawError::runtime(RuntimeKind::Type, "t"),
            RawError::database("SQL1", "d"),
            RawError::http(502, Value::Null, Value::Null),
            json!({}).into(),
            json!([]).into(),
            "".into(),
        ];
        for raw in raws {
            let error = normalize(raw);
            assert!(error.status > 0);
            assert!(!error.code.is_empty());
            assert!(error.internal.is_object());
        }
    }

    #[test]
    fn test_module_and_request_are_threaded() {
        let request = RequestSnapshot::new()
            .with_data(json!({"title": "Dune"}))
            .with_user("alice")
            .with_event("CREATE")
            .with_method("POST")
            .with_url("/books")
            .with_header("authorization", "secret");
        let ctx = NormalizeContext::new()
            .with_module("catalog")
            .with_request(&request);

        let error = normalize_error(RawError::runtime(RuntimeKind::Type, "boom"), &ctx);

        assert_eq!(error.module.as_deref(), Some("catalog"));
        assert_eq!(error.internal["data"]["title"], "Dune");
        assert_eq!(error.internal["user"], "alice");
        assert_eq!(error.internal["event"], "CREATE");
        assert_eq!(error.internal["method"], "POST");
        assert_eq!(error.internal["url"], "/books");
        assert!(error.internal.get("headers").is_none());
        assert_eq!(error.internal["error"]["message"], "boom");
    }

    #[test]
    fn test_stack_is_filtered() {
        let stack = "at app::orders::create\nat faultline::handler::wrap\nat tokio::runtime";
        let raw = RawError::runtime(RuntimeKind::Panic, "oops").with_stack(stack);

        let error = normalize(raw.clone());
        assert_eq!(
            error.stack.as_deref(),
            Some("at app::orders::create\nat tokio::runtime")
        );

        let keep_all = StackFilter::none();
        let error = normalize_error(raw, &NormalizeContext::new().with_stack_filter(&keep_all));
        assert_eq!(error.stack.as_deref(), Some(stack));
    }

    #[test]
    fn test_http_error_keeps_request_payload() {
        let request = RequestSnapshot::new()
            .with_data(json!({"order": 7}))
            .with_user("alice");
        let ctx = NormalizeContext::new().with_request(&request);

        let error = normalize_error(RawError::http(503, json!({"err": "down"}), json!({})), &ctx);

        assert_eq!(error.code, "CPI_HTTP_ERR");
        assert_eq!(error.internal["status"], 503);
        assert_eq!(error.internal["data"]["err"], "down");
        assert_eq!(error.internal["headers"], json!({}));
        assert_eq!(error.internal[REQUEST_DATA_KEY]["order"], 7);
        assert_eq!(error.internal["user"], "alice");
    }

    #[test]
    fn test_raw_value_stack_is_not_kept_unfiltered() {
        let stack = "at app::orders::create\nat faultline::handler::wrap";
        let raw = RawError::from(json!({"message": "boom", "stack": stack}));

        let error = normalize(raw);

        assert_eq!(error.code, "UNKNOWN_ERR");
        assert_eq!(error.stack.as_deref(), Some("at app::orders::create"));
        assert_eq!(error.internal["error"]["message"], "boom");
        assert!(error.internal["error"].get("stack").is_none());
        assert!(!error.internal.to_string().contains("faultline::handler"));
    }

    #[test]
    fn test_custom_stack_filter_markers() {
        let filter = StackFilter::with_markers(["tokio::"]);
        assert_eq!(filter.markers(), ["tokio::".to_string()]);
        assert_eq!(filter.apply("a\ntokio::spawn\nb"), "a\nb");
    }

    #[test]
    fn test_details_survive_idempotent_path() {
        let original = StructuredError::validation()
            .detail(ErrorDetail::new("one"))
            .detail(ErrorDetail::new("two"))
            .build();
        let error = normalize(original);
        let details = error.details.unwrap();
        assert_eq!(details[0].message, "one");
        assert_eq!(details[1].message, "two");
    }
}
