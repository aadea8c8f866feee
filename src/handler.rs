//! Request handler wrapping.
//!
//! [`ErrorHandler`] runs a request handler and, if it fails or panics,
//! classifies the failure, persists it, sends an alert and reports the
//! external [`ErrorView`] back as the handler's error. The original failure
//! never reaches the caller.
//!
//! The steps run one after another on the request's own task. Persistence
//! and notification failures are logged and swallowed, panics included.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;

use crate::classify::{normalize_error, NormalizeContext, StackFilter};
use crate::config::ReporterConfig;
use crate::error::{ErrorView, RawError, RuntimeKind, StructuredError};
use crate::notification::{Notifier, NotifyError, WebhookTransport, DEFAULT_ENVIRONMENT};
use crate::persist::{ErrorPersister, ErrorStore, JsonlStore, StoreError};
use crate::request::{RequestInfo, RequestSnapshot};

/// Errors that can occur while assembling an [`ErrorHandler`].
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to open error store: {0}")]
    Store(#[from] StoreError),

    #[error("failed to create alert transport: {0}")]
    Notify(#[from] NotifyError),
}

#[derive(Debug)]
struct HandlerState {
    module: Option<String>,
    environment: String,
    persistence: Option<(ErrorPersister, String)>,
    notifier: Option<Notifier>,
    stack_filter: StackFilter,
}

/// Wraps request handlers with classify, persist, notify and report steps.
///
/// Cloning is cheap. All clones share the same read-only configuration.
#[derive(Debug, Clone)]
pub struct ErrorHandler {
    state: Arc<HandlerState>,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ErrorHandler {
    pub fn builder() -> ErrorHandlerBuilder {
        ErrorHandlerBuilder::default()
    }

    /// Assembles a handler from configuration.
    ///
    /// A persistence table without a directory is ignored here. Use
    /// [`ErrorHandlerBuilder::from_config`] to add a custom store for it.
    pub fn from_config(config: &ReporterConfig) -> Result<Self, SetupError> {
        Ok(ErrorHandlerBuilder::from_config(config)?.build())
    }

    pub fn module(&self) -> Option<&str> {
        self.state.module.as_deref()
    }

    pub fn environment(&self) -> &str {
        &self.state.environment
    }

    /// Table errors are persisted to, if persistence is enabled.
    pub fn table(&self) -> Option<&str> {
        self.state
            .persistence
            .as_ref()
            .map(|(_, table)| table.as_str())
    }

    /// Classifies a failure with this handler's module and stack filter.
    pub fn normalize(
        &self,
        raw: impl Into<RawError>,
        request: Option<&RequestSnapshot>,
    ) -> StructuredError {
        let ctx = NormalizeContext {
            module: self.state.module.as_deref(),
            request,
            stack_filter: Some(&self.state.stack_filter),
        };
        normalize_error(raw, &ctx)
    }

    /// Runs the full failure path for an error caught elsewhere.
    ///
    /// Classifies, persists, notifies and returns the external view.
    pub async fn report(
        &self,
        raw: impl Into<RawError>,
        request: Option<&RequestSnapshot>,
    ) -> ErrorView {
        let error = self.normalize(raw, request);

        tracing::error!(
            code = %error.code,
            status = error.status,
            module = error.module.as_deref().unwrap_or("-"),
            "Request failed: {}",
            error.message
        );

        if let Some((persister, table)) = &self.state.persistence {
            let persisted = AssertUnwindSafe(persister.persist(&error, table))
                .catch_unwind()
                .await;
            if let Err(panic) = persisted {
                tracing::warn!(
                    table = %table,
                    code = %error.code,
                    panic = %panic_message(panic.as_ref()),
                    "Error store panicked, skipping persistence"
                );
            }
        }

        if let Some(notifier) = &self.state.notifier {
            let notified = AssertUnwindSafe(notifier.notify(&self.state.environment, &error, request))
                .catch_unwind()
                .await;
            if let Err(panic) = notified {
                tracing::warn!(
                    code = %error.code,
                    panic = %panic_message(panic.as_ref()),
                    "Notifier panicked, skipping notification"
                );
            }
        }

        error.to_view()
    }

    /// Awaits one handler invocation and reports its failure, if any.
    ///
    /// Panics inside `future` are caught and reported as runtime errors.
    pub async fn handle<Fut, T, E>(&self, request: RequestSnapshot, future: Fut) -> Result<T, ErrorView>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Into<RawError>,
    {
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(self.report(error, Some(&request)).await),
            Err(panic) => Err(self.report(panic_to_raw(panic), Some(&request)).await),
        }
    }

    /// Wraps a single-argument async handler.
    ///
    /// The returned handler takes the same request type. It yields the
    /// handler's value on success and the reported [`ErrorView`] on failure.
    pub fn wrap<R, F, Fut, T, E>(
        &self,
        handler: F,
    ) -> impl Fn(R) -> BoxFuture<'static, Result<T, ErrorView>> + Clone + Send + Sync + 'static
    where
        R: RequestInfo + Send + 'static,
        F: Fn(R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<RawError> + Send + 'static,
    {
        let this = self.clone();
        let handler = Arc::new(handler);
        move |request: R| {
            let this = this.clone();
            let handler = Arc::clone(&handler);
            async move {
                let snapshot = request.snapshot();
                this.handle(snapshot, async move { handler(request).await })
                    .await
            }
            .boxed()
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

fn panic_to_raw(panic: Box<dyn Any + Send>) -> RawError {
    RawError::runtime(RuntimeKind::Panic, panic_message(panic.as_ref()))
}

/// Builder for [`ErrorHandler`].
#[derive(Default)]
pub struct ErrorHandlerBuilder {
    module: Option<String>,
    environment: Option<String>,
    store: Option<Arc<dyn ErrorStore>>,
    table: Option<String>,
    notifier: Option<Notifier>,
    stack_filter: Option<StackFilter>,
}

impl std::fmt::Debug for ErrorHandlerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandlerBuilder")
            .field("module", &self.module)
            .field("environment", &self.environment)
            .field("store", &self.store.as_ref().map(|store| store.name()))
            .field("table", &self.table)
            .field("notifier", &self.notifier)
            .field("stack_filter", &self.stack_filter)
            .finish()
    }
}

impl ErrorHandlerBuilder {
    /// Starts a builder pre-filled from configuration.
    ///
    /// Opens a [`JsonlStore`] when a persistence directory is configured and a
    /// [`WebhookTransport`] when a webhook URL is configured.
    pub fn from_config(config: &ReporterConfig) -> Result<Self, SetupError> {
        let mut builder = Self {
            module: config.module.clone(),
            environment: config.environment.clone(),
            table: config.persistence_table().map(str::to_string),
            stack_filter: Some(StackFilter::with_markers(config.stack.deny.clone())),
            ..Default::default()
        };

        if let Some(dir) = &config.persistence.directory {
            builder.store = Some(Arc::new(JsonlStore::new(dir)?));
        }

        let notification = &config.notification;
        if !notification.to.is_empty() {
            let mut notifier =
                Notifier::new(notification.to.clone()).with_cc(notification.cc.clone());
            if let Some(url) = &notification.webhook_url {
                notifier = notifier.with_transport(Arc::new(WebhookTransport::new(url)?));
            }
            builder.notifier = Some(notifier);
        }

        Ok(builder)
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Persists every reported error to `table` in `store`.
    pub fn persist_to(mut self, store: Arc<dyn ErrorStore>, table: impl Into<String>) -> Self {
        self.store = Some(store);
        self.table = Some(table.into());
        self
    }

    /// Sets the store, keeping any configured table.
    pub fn store(mut self, store: Arc<dyn ErrorStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn stack_filter(mut self, filter: StackFilter) -> Self {
        self.stack_filter = Some(filter);
        self
    }

    pub fn build(self) -> ErrorHandler {
        let persistence = match (self.store, self.table) {
            (Some(store), Some(table)) => Some((ErrorPersister::new(store), table)),
            (None, Some(table)) => {
                tracing::warn!(table = %table, "Persistence table configured without a store");
                None
            }
            _ => None,
        };

        ErrorHandler {
            state: Arc::new(HandlerState {
                module: self.module,
                environment: self
                    .environment
                    .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
                persistence,
                notifier: self.notifier,
                stack_filter: self.stack_filter.unwrap_or_default(),
            }),
        }
    }
}
