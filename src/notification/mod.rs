//! Alert notifications for structured errors.
//!
//! A [`Notifier`] renders a report for an error and hands it to an
//! [`AlertTransport`]. Without recipients it does nothing. It makes one
//! dispatch attempt, with no retry, deduplication or rate limiting. Those
//! belong to the transport.

mod renderer;
mod transport;

pub use renderer::{escape_html, render_html_report, HtmlReportRenderer, ReportContext};
pub use transport::{RecordingTransport, WebhookTransport};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::StructuredError;
use crate::request::RequestSnapshot;

/// Environment label used when none is configured.
pub const DEFAULT_ENVIRONMENT: &str = "unknown";

/// Errors raised by alert transports.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The receiving endpoint answered with a non-success status.
    #[error("Alert rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type for transport operations.
pub type NotifyResult<T> = Result<T, NotifyError>;

/// A rendered alert ready for dispatch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub subject: String,
    pub body_html: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
}

/// Subject line for an alert raised in `environment`.
pub fn alert_subject(environment: &str) -> String {
    format!("Exception occurred in {}", environment)
}

/// Delivers alerts, e.g. by mail or through a webhook.
#[async_trait]
pub trait AlertTransport: Send + Sync {
    /// Short name used in log output.
    fn name(&self) -> &str;

    async fn send_alert(&self, alert: &Alert) -> NotifyResult<()>;
}

/// Builds the HTML body of an alert.
pub type BodyBuilder = Arc<dyn Fn(&ReportContext<'_>) -> String + Send + Sync>;

/// What happened to a notification request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// No recipients, or no transport to send with.
    Skipped,
    /// The transport accepted the alert.
    Sent,
    /// The transport failed. The failure was logged.
    Failed,
}

/// Renders and dispatches error alerts.
#[derive(Clone, Default)]
pub struct Notifier {
    to: Vec<String>,
    cc: Vec<String>,
    body_builder: Option<BodyBuilder>,
    transport: Option<Arc<dyn AlertTransport>>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("to", &self.to)
            .field("cc", &self.cc)
            .field("custom_body", &self.body_builder.is_some())
            .field("transport", &self.transport.as_ref().map(|t| t.name()))
            .finish()
    }
}

impl Notifier {
    /// Creates a notifier for the given primary recipients.
    pub fn new<I, S>(to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            to: to.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_cc<I, S>(mut self, cc: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cc = cc.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the built-in HTML report with a custom body.
    pub fn with_body_builder<F>(mut self, builder: F) -> Self
    where
        F: Fn(&ReportContext<'_>) -> String + Send + Sync + 'static,
    {
        self.body_builder = Some(Arc::new(builder));
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn AlertTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn recipients(&self) -> &[String] {
        &self.to
    }

    pub fn cc(&self) -> &[String] {
        &self.cc
    }

    /// Builds the alert for `error` without sending it.
    pub fn build_alert(&self, ctx: &ReportContext<'_>) -> Alert {
        let body_html = match &self.body_builder {
            Some(builder) => (**builder)(ctx),
            None => render_html_report(ctx),
        };
        Alert {
            subject: alert_subject(ctx.environment),
            body_html,
            to: self.to.clone(),
            cc: self.cc.clone(),
        }
    }

    /// Sends one alert for `error`. Transport failures are logged, not returned.
    pub async fn notify(
        &self,
        environment: &str,
        error: &StructuredError,
        request: Option<&RequestSnapshot>,
    ) -> NotifyOutcome {
        if self.to.is_empty() {
            return NotifyOutcome::Skipped;
        }
        let Some(transport) = &self.transport else {
            tracing::warn!(
                recipients = self.to.len(),
                "Alert recipients configured without a transport, skipping notification"
            );
            return NotifyOutcome::Skipped;
        };

        let ctx = ReportContext::new(environment, error).with_request(request);
        let alert = self.build_alert(&ctx);

        match transport.send_alert(&alert).await {
            Ok(()) => {
                tracing::debug!(
                    transport = transport.name(),
                    subject = %alert.subject,
                    "Sent error alert"
                );
                NotifyOutcome::Sent
            }
            Err(e) => {
                tracing::warn!(
                    transport = transport.name(),
                    code = %error.code,
                    error = %e,
                    "Failed to send error alert"
                );
                NotifyOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenTransport;

    #[async_trait]
    impl AlertTransport for BrokenTransport {
        fn name(&self) -> &str {
            "broken"
        }

        async fn send_alert(&self, _alert: &Alert) -> NotifyResult<()> {
            Err(NotifyError::Transport("mail relay down".to_string()))
        }
    }

    fn error() -> StructuredError {
        StructuredError::new("Something broke")
    }

    #[test]
    fn test_alert_subject() {
        assert_eq!(alert_subject("production"), "Exception occurred in production");
    }

    #[tokio::test]
    async fn test_no_recipients_is_a_no_op() {
        let transport = Arc::new(RecordingTransport::new());
        let notifier = Notifier::new(Vec::<String>::new()).with_transport(transport.clone());

        let outcome = notifier.notify("dev", &error(), None).await;

        assert_eq!(outcome, NotifyOutcome::Skipped);
        assert!(transport.alerts().await.is_empty());
    }

    #[tokio::test]
    async fn test_recipients_without_transport_skip() {
        let notifier = Notifier::new(["ops@example.com"]);
        assert_eq!(
            notifier.notify("dev", &error(), None).await,
            NotifyOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn test_sends_one_alert_with_default_body() {
        let transport = Arc::new(RecordingTransport::new());
        let notifier = Notifier::new(["ops@example.com"])
            .with_cc(["lead@example.com"])
            .with_transport(transport.clone());

        let outcome = notifier.notify("staging", &error(), None).await;

        assert_eq!(outcome, NotifyOutcome::Sent);
        let alerts = transport.alerts().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].subject, "Exception occurred in staging");
        assert_eq!(alerts[0].to, vec!["ops@example.com".to_string()]);
        assert_eq!(alerts[0].cc, vec!["lead@example.com".to_string()]);
        assert!(alerts[0].body_html.contains("Something broke"));
    }

    #[tokio::test]
    async fn test_custom_body_builder() {
        let transport = Arc::new(RecordingTransport::new());
        let notifier = Notifier::new(["ops@example.com"])
            .with_body_builder(|ctx| format!("<p>{} / {}</p>", ctx.environment, ctx.error.code))
            .with_transport(transport.clone());

        notifier.notify("qa", &error(), None).await;

        let alerts = transport.alerts().await;
        assert_eq!(alerts[0].body_html, "<p>qa / GENERIC_ERROR</p>");
    }

    #[tokio::test]
    async fn test_transport_failure_is_swallowed() {
        let notifier = Notifier::new(["ops@example.com"]).with_transport(Arc::new(BrokenTransport));
        assert_eq!(
            notifier.notify("dev", &error(), None).await,
            NotifyOutcome::Failed
        );
    }

    #[test]
    fn test_alert_serializes_camel_case() {
        let alert = Alert {
            subject: "s".to_string(),
            body_html: "<p/>".to_string(),
            to: vec!["a@example.com".to_string()],
            cc: vec![],
        };
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["bodyHtml"], "<p/>");
    }

    #[test]
    fn test_debug_hides_builder() {
        let notifier = Notifier::new(["ops@example.com"]).with_body_builder(|_| String::new());
        let debug = format!("{:?}", notifier);
        assert!(debug.contains("custom_body: true"));
    }
}
