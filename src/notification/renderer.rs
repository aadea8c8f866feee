//! HTML renderer for error report emails.
//!
//! Produces a self-contained HTML fragment with inline styles only, so the
//! report renders the same in mail clients that strip stylesheets.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::StructuredError;
use crate::request::RequestSnapshot;

const FONT: &str = "font-family:Arial,Helvetica,sans-serif;font-size:13px;color:#222;";
const TABLE: &str = "border-collapse:collapse;width:100%;margin:8px 0 16px 0;";
const KEY_CELL: &str =
    "border:1px solid #ddd;padding:6px 8px;background:#f5f5f5;font-weight:bold;width:160px;";
const VALUE_CELL: &str = "border:1px solid #ddd;padding:6px 8px;";
const HEADING: &str = "margin:16px 0 4px 0;font-size:15px;color:#b00020;";
const PRE: &str = "background:#f8f8f8;border:1px solid #ddd;padding:8px;\
white-space:pre-wrap;word-break:break-word;font-family:Consolas,monospace;font-size:12px;";
const BANNER: &str = "background:#b00020;color:#fff;padding:10px 12px;font-size:16px;font-weight:bold;";

/// Everything a report body is built from.
#[derive(Clone, Copy, Debug)]
pub struct ReportContext<'a> {
    pub environment: &'a str,
    pub error: &'a StructuredError,
    pub request: Option<&'a RequestSnapshot>,
    pub timestamp: DateTime<Utc>,
}

impl<'a> ReportContext<'a> {
    pub fn new(environment: &'a str, error: &'a StructuredError) -> Self {
        Self {
            environment,
            error,
            request: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_request(mut self, request: Option<&'a RequestSnapshot>) -> Self {
        self.request = request;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// A request field, taken from the snapshot or else from the error's
    /// internal payload.
    fn request_field(&self, key: &str) -> Option<String> {
        let from_snapshot = self.request.and_then(|request| match key {
            "url" => request.url.clone(),
            "method" => request.method.clone(),
            "event" => request.event.clone(),
            "user" => request.user.clone(),
            _ => None,
        });
        from_snapshot.or_else(|| match self.error.internal.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        })
    }
}

/// Renders the built-in HTML report.
pub fn render_html_report(ctx: &ReportContext<'_>) -> String {
    HtmlReportRenderer::new().render(ctx)
}

/// Builder-style renderer for the HTML report.
#[derive(Debug, Clone)]
pub struct HtmlReportRenderer {
    title: String,
    include_stack: bool,
}

impl Default for HtmlReportRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmlReportRenderer {
    pub fn new() -> Self {
        Self {
            title: "Exception Report".to_string(),
            include_stack: true,
        }
    }

    /// Sets the banner title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Sets whether the stack trace section is rendered.
    pub fn with_stack(mut self, include: bool) -> Self {
        self.include_stack = include;
        self
    }

    pub fn render(&self, ctx: &ReportContext<'_>) -> String {
        let error = ctx.error;
        let mut output = String::new();

        output.push_str(&format!("<div style=\"{}\">\n", FONT));
        output.push_str(&format!(
            "<div style=\"{}\">{}</div>\n",
            BANNER,
            escape_html(&self.title)
        ));

        output.push_str(&key_value_table(&[
            (
                "Timestamp",
                Some(ctx.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
            ),
            ("Environment", Some(ctx.environment.to_string())),
        ]));

        output.push_str(&heading("Error"));
        output.push_str(&key_value_table(&[
            ("Message", Some(error.message.clone())),
            ("Status", Some(error.status.to_string())),
            ("Code", Some(error.code.clone())),
            ("Target", error.target.clone()),
            ("Module", error.module.clone()),
        ]));

        output.push_str(&heading("Request"));
        output.push_str(&key_value_table(&[
            ("URL", ctx.request_field("url")),
            ("Method", ctx.request_field("method")),
            ("Event", ctx.request_field("event")),
            ("User", ctx.request_field("user")),
        ]));

        output.push_str(&heading("Details"));
        output.push_str(&pre_block(&pretty_json(
            &serde_json::to_value(&error.details).unwrap_or(Value::Null),
        )));

        output.push_str(&heading("Internal Metadata"));
        output.push_str(&pre_block(&pretty_json(&error.internal)));

        if self.include_stack {
            output.push_str(&heading("Stack Trace"));
            output.push_str(&pre_block(
                error.stack.as_deref().unwrap_or("No stack trace available"),
            ));
        }

        output.push_str("</div>\n");
        output
    }
}

fn heading(text: &str) -> String {
    format!("<h3 style=\"{}\">{}</h3>\n", HEADING, escape_html(text))
}

fn key_value_table(rows: &[(&str, Option<String>)]) -> String {
    let mut table = format!("<table style=\"{}\">\n", TABLE);
    for (key, value) in rows {
        let value = value.as_deref().unwrap_or("-");
        table.push_str(&format!(
            "<tr><td style=\"{}\">{}</td><td style=\"{}\">{}</td></tr>\n",
            KEY_CELL,
            escape_html(key),
            VALUE_CELL,
            escape_html(value)
        ));
    }
    table.push_str("</table>\n");
    table
}

fn pre_block(text: &str) -> String {
    format!("<pre style=\"{}\">{}</pre>\n", PRE, escape_html(text))
}

fn pretty_json(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Escapes text for safe inclusion in HTML element content and attributes.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
