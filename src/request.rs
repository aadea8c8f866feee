//! Request snapshots used as diagnostic context.
//!
//! The error layer never looks at a live request. Callers hand it a
//! [`RequestSnapshot`] instead, either built by hand or taken from a request
//! type implementing [`RequestInfo`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Header carrying the authenticated user, when the request type has no
/// richer notion of one.
pub const USER_HEADER: &str = "x-user";

/// Header naming the logical event or action a request performs.
pub const EVENT_HEADER: &str = "x-event";

/// A minimal captured view of an inbound request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    /// Request payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Identity of the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Logical event or action name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl RequestSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// The diagnostic fields merged into an error's `internal` payload.
    ///
    /// Only fields that are present are included. Headers are left out since
    /// they tend to carry credentials.
    pub fn context_entries(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(data) = &self.data {
            map.insert("data".to_string(), data.clone());
        }
        let strings = [
            ("user", &self.user),
            ("event", &self.event),
            ("url", &self.url),
            ("method", &self.method),
        ];
        for (key, value) in strings {
            if let Some(value) = value {
                map.insert(key.to_string(), Value::String(value.clone()));
            }
        }
        map
    }
}

/// Request types that can describe themselves as a [`RequestSnapshot`].
pub trait RequestInfo {
    fn snapshot(&self) -> RequestSnapshot;
}

impl RequestInfo for RequestSnapshot {
    fn snapshot(&self) -> RequestSnapshot {
        self.clone()
    }
}

impl<B> RequestInfo for http::Request<B> {
    fn snapshot(&self) -> RequestSnapshot {
        let headers: BTreeMap<String, String> = self
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        RequestSnapshot {
            data: None,
            user: headers.get(USER_HEADER).cloned(),
            event: headers.get(EVENT_HEADER).cloned(),
            method: Some(self.method().as_str().to_string()),
            url: Some(self.uri().to_string()),
            headers,
        }
    }
}
