//! Raw, not yet classified failures.
//!
//! Handlers fail with many different error types. Everything they can fail
//! with is first turned into a [`RawError`], which the classifier then maps
//! onto a [`StructuredError`].

use serde_json::{json, Map, Value};

use super::StructuredError;

/// The flavour of a runtime failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeKind {
    /// A value had the wrong type or shape.
    Type,
    /// Something referenced did not exist.
    Reference,
    /// A value was outside its allowed range.
    Range,
    /// The handler panicked.
    Panic,
}

impl RuntimeKind {
    pub fn name(self) -> &'static str {
        match self {
            RuntimeKind::Type => "TypeError",
            RuntimeKind::Reference => "ReferenceError",
            RuntimeKind::Range => "RangeError",
            RuntimeKind::Panic => "Panic",
        }
    }
}

/// A failure as it was raised, before classification.
#[derive(Clone, Debug, PartialEq)]
pub enum RawError {
    /// Already normalized. Classification returns it unchanged.
    Structured(StructuredError),
    /// Input could not be parsed.
    Syntax {
        message: String,
        stack: Option<String>,
    },
    /// A programming error surfaced at runtime.
    Runtime {
        kind: RuntimeKind,
        message: String,
        stack: Option<String>,
    },
    /// Any other failure, described by its JSON shape.
    ///
    /// Database errors carry a `code` and `message`, remote HTTP errors carry
    /// a nested `response` with a `status`.
    Value(Value),
}

impl RawError {
    pub fn syntax(message: impl Into<String>) -> Self {
        RawError::Syntax {
            message: message.into(),
            stack: None,
        }
    }

    pub fn runtime(kind: RuntimeKind, message: impl Into<String>) -> Self {
        RawError::Runtime {
            kind,
            message: message.into(),
            stack: None,
        }
    }

    /// A failed outbound HTTP call that produced a response.
    pub fn http(status: u16, data: Value, headers: Value) -> Self {
        RawError::Value(json!({
            "message": format!("Request failed with status code {}", status),
            "response": {
                "status": status,
                "data": data,
                "headers": headers,
            }
        }))
    }

    /// A failure reported by the database client.
    pub fn database(code: impl Into<String>, message: impl Into<String>) -> Self {
        RawError::Value(json!({
            "code": code.into(),
            "message": message.into(),
        }))
    }

    /// Wraps any error, keeping its chain of sources as text.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut sources = Vec::new();
        let mut current = error.source();
        while let Some(source) = current {
            sources.push(Value::String(source.to_string()));
            current = source.source();
        }

        let mut map = Map::new();
        map.insert("message".to_string(), Value::String(error.to_string()));
        if !sources.is_empty() {
            map.insert("source".to_string(), Value::Array(sources));
        }
        RawError::Value(Value::Object(map))
    }

    /// Attaches a stack trace. Values get it under their `stack` field.
    pub fn with_stack(self, stack: impl Into<String>) -> Self {
        let stack = stack.into();
        match self {
            RawError::Syntax { message, .. } => RawError::Syntax {
                message,
                stack: Some(stack),
            },
            RawError::Runtime { kind, message, .. } => RawError::Runtime {
                kind,
                message,
                stack: Some(stack),
            },
            RawError::Value(Value::Object(mut map)) => {
                map.insert("stack".to_string(), Value::String(stack));
                RawError::Value(Value::Object(map))
            }
            other => other,
        }
    }

    /// The stack trace carried by this failure, if any.
    pub fn stack(&self) -> Option<&str> {
        match self {
            RawError::Structured(error) => error.stack.as_deref(),
            RawError::Syntax { stack, .. } | RawError::Runtime { stack, .. } => stack.as_deref(),
            RawError::Value(value) => value.get("stack").and_then(Value::as_str),
        }
    }

    /// JSON rendition of the original failure, kept for diagnostics.
    pub fn to_json(&self) -> Value {
        match self {
            RawError::Structured(error) => serde_json::to_value(error).unwrap_or(Value::Null),
            RawError::Syntax { message, .. } => json!({
                "name": "SyntaxError",
                "message": message,
            }),
            RawError::Runtime { kind, message, .. } => json!({
                "name": kind.name(),
                "message": message,
            }),
            RawError::Value(value) => value.clone(),
        }
    }
}

impl From<StructuredError> for RawError {
    fn from(error: StructuredError) -> Self {
        RawError::Structured(error)
    }
}

impl From<Value> for RawError {
    fn from(value: Value) -> Self {
        RawError::Value(value)
    }
}

impl From<&str> for RawError {
    fn from(message: &str) -> Self {
        RawError::Value(Value::String(message.to_string()))
    }
}

impl From<String> for RawError {
    fn from(message: String) -> Self {
        RawError::Value(Value::String(message))
    }
}

impl From<serde_json::Error> for RawError {
    fn from(error: serde_json::Error) -> Self {
        use serde_json::error::Category;

        match error.classify() {
            Category::Syntax | Category::Eof => RawError::syntax(error.to_string()),
            Category::Data => RawError::runtime(RuntimeKind::Type, error.to_string()),
            Category::Io => RawError::from_error(&error),
        }
    }
}

impl From<toml::de::Error> for RawError {
    fn from(error: toml::de::Error) -> Self {
        RawError::syntax(error.to_string())
    }
}

impl From<std::io::Error> for RawError {
    fn from(error: std::io::Error) -> Self {
        RawError::from_error(&error)
    }
}

impl From<reqwest::Error> for RawError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => {
                let mut raw = RawError::http(status.as_u16(), Value::Null, json!({}));
                if let RawError::Value(Value::Object(ref mut map)) = raw {
                    map.insert("message".to_string(), Value::String(error.to_string()));
                }
                raw
            }
            None => RawError::from_error(&error),
        }
    }
}
