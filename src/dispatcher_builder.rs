//! Dispatcher builder.
//!
//! Provides a fluent builder API for configuring a [`Dispatcher`]: the
//! transport or custom raw operation factories, the base topic and the
//! default request timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::{
    // ---
    BrokerFactory,
    CallFactory,
    Dispatcher,
    Error,
    ObservableFactory,
    Result,
    TransportPtr,
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for [`Dispatcher`] instances.
///
/// Handles run on broker-backed raw operations over the configured
/// transport unless custom factories are supplied.
///
/// # Examples
///
/// ## Over a transport
/// ```no_run
/// use mom_dispatch::{DispatcherBuilder, TransportBuilder};
/// use std::time::Duration;
///
/// # async fn example() -> mom_dispatch::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("mqtt://localhost:1883")
///     .node_id("client")
///     .build()
///     .await?;
///
/// let dispatcher = DispatcherBuilder::new()
///     .transport(transport)
///     .base_topic("plant/line-4")
///     .request_timeout(Duration::from_secs(5))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct DispatcherBuilder {
    // ---
    transport: Option<TransportPtr>,
    runtime: Option<Handle>,

    // Custom raw operation factories (optional, default: broker-backed)
    call_factory: Option<Arc<dyn CallFactory>>,
    observable_factory: Option<Arc<dyn ObservableFactory>>,

    base_topic: Option<String>,

    // Request timeout (optional, default: 30s)
    request_timeout: Option<Duration>,
}

impl DispatcherBuilder {
    /// Create a new dispatcher builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run broker-backed handles on `transport`.
    pub fn transport(mut self, transport: TransportPtr) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Spawn transport I/O on `runtime`.
    ///
    /// Default: the runtime `build()` is called from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Prefix relative endpoint topics with `topic`.
    pub fn base_topic(mut self, topic: impl Into<String>) -> Self {
        self.base_topic = Some(topic.into());
        self
    }

    /// Set the reply timeout of endpoints that do not set their own.
    ///
    /// Default: 30s.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Create request operations with `factory` instead of the transport.
    pub fn call_factory(mut self, factory: Arc<dyn CallFactory>) -> Self {
        self.call_factory = Some(factory);
        self
    }

    /// Create subscription operations with `factory` instead of the
    /// transport.
    pub fn observable_factory(mut self, factory: Arc<dyn ObservableFactory>) -> Self {
        self.observable_factory = Some(factory);
        self
    }

    /// Build the dispatcher (consumes self).
    ///
    /// # Errors
    ///
    /// - [`Error::MissingConfig`] if a factory is missing and no transport was
    ///   given, or if no runtime is available for the transport
    /// - [`Error::InvalidConfig`] for an empty base topic or a zero timeout
    pub fn build(self) -> Result<Dispatcher> {
        // ---
        if self.base_topic.as_deref().is_some_and(str::is_empty) {
            return Err(Error::InvalidConfig("base_topic must not be empty".into()));
        }

        let request_timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        if request_timeout.is_zero() {
            return Err(Error::InvalidConfig("request_timeout must be non-zero".into()));
        }

        let broker = match (&self.call_factory, &self.observable_factory) {
            (Some(_), Some(_)) => None,
            _ => {
                let transport = self
                    .transport
                    .ok_or_else(|| Error::MissingConfig("transport".into()))?;
                let broker = match self.runtime {
                    Some(runtime) => BrokerFactory::new(transport, runtime),
                    None => BrokerFactory::current(transport)?,
                };
                Some(Arc::new(broker))
            }
        };

        let call_factory: Arc<dyn CallFactory> = match (self.call_factory, &broker) {
            (Some(factory), _) => factory,
            (None, Some(broker)) => broker.clone(),
            (None, None) => return Err(Error::MissingConfig("call_factory".into())),
        };

        let observable_factory: Arc<dyn ObservableFactory> = match (self.observable_factory, &broker) {
            (Some(factory), _) => factory,
            (None, Some(broker)) => broker.clone(),
            (None, None) => return Err(Error::MissingConfig("observable_factory".into())),
        };

        crate::log_debug!(
            "dispatcher built: base_topic={:?}, request_timeout={request_timeout:?}",
            self.base_topic
        );

        Ok(Dispatcher::new(
            self.base_topic,
            request_timeout,
            call_factory,
            observable_factory,
        ))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_missing_transport() {
        // ---
        let err = DispatcherBuilder::new().build().err();
        assert_eq!(err, Some(Error::MissingConfig("transport".into())));
    }

    #[tokio::test]
    async fn test_defaults() {
        // ---
        let transport = crate::TransportBuilder::new()
            .uri("memory://")
            .node_id("builder-test")
            .build()
            .await
            .unwrap();

        let dispatcher = DispatcherBuilder::new().transport(transport).build().unwrap();

        assert_eq!(dispatcher.request_timeout(), DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(dispatcher.base_topic(), None);
    }

    #[tokio::test]
    async fn test_rejects_empty_base_topic() {
        // ---
        let transport = crate::TransportBuilder::new()
            .uri("memory://")
            .node_id("builder-test")
            .build()
            .await
            .unwrap();

        let err = DispatcherBuilder::new()
            .transport(transport)
            .base_topic("")
            .build()
            .err();
        assert!(matches!(err, Some(Error::InvalidConfig(_))));
    }
}
