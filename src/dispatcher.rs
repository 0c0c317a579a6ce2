//! Dispatcher: the entry point that hands out dispatch handles.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::{
    // ---
    Args,
    Call,
    CallFactory,
    Converter,
    DescriptorFactory,
    Endpoint,
    EndpointFactory,
    JsonConverter,
    Observable,
    ObservableFactory,
};

/// Creates [`Call`] and [`Observable`] handles for endpoints.
///
/// Every handle is bound to the dispatcher's base topic, default request
/// timeout and raw operation factories. Cloning is cheap; clones share
/// configuration.
///
/// Built with [`DispatcherBuilder`](crate::DispatcherBuilder).
///
/// # Example
///
/// ```no_run
/// use mom_dispatch::{Args, Callback, Call, DispatcherBuilder, Endpoint, Error, Response, TransportBuilder};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct User {
///     id: String,
/// }
///
/// struct PrintUser;
///
/// impl Callback<User> for PrintUser {
///     fn on_response(&self, _call: &Call<User>, response: Response<User>) {
///         println!("user {}", response.body().id);
///     }
///
///     fn on_failure(&self, _call: &Call<User>, error: Error) {
///         eprintln!("lookup failed: {error}");
///     }
/// }
///
/// # async fn example() -> mom_dispatch::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("mqtt://localhost:1883")
///     .node_id("app")
///     .build()
///     .await?;
///
/// let dispatcher = DispatcherBuilder::new()
///     .transport(transport)
///     .base_topic("app")
///     .build()?;
///
/// let lookup = Endpoint::topic("user/{id}").reply_topic("user/{id}/reply");
/// let call = dispatcher.call::<User>(&lookup, Args::new().path("id", 123));
/// call.enqueue(PrintUser)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    base_topic: Option<String>,
    request_timeout: Duration,
    call_factory: Arc<dyn CallFactory>,
    observable_factory: Arc<dyn ObservableFactory>,
}

impl Dispatcher {
    /// Create a dispatcher (internal use by DispatcherBuilder).
    pub(crate) fn new(
        base_topic: Option<String>,
        request_timeout: Duration,
        call_factory: Arc<dyn CallFactory>,
        observable_factory: Arc<dyn ObservableFactory>,
    ) -> Self {
        // ---
        Self {
            inner: Arc::new(Inner {
                base_topic,
                request_timeout,
                call_factory,
                observable_factory,
            }),
        }
    }

    /// A request/response handle whose reply is decoded as JSON.
    pub fn call<T>(&self, endpoint: &Endpoint, args: Args) -> Call<T>
    where
        T: DeserializeOwned + 'static,
    {
        self.call_with(endpoint, args, JsonConverter::<T>::new())
    }

    /// A request/response handle whose reply is decoded by `converter`.
    pub fn call_with<T, C>(&self, endpoint: &Endpoint, args: Args, converter: C) -> Call<T>
    where
        T: 'static,
        C: Converter<T> + 'static,
    {
        // ---
        Call::new(
            self.descriptors(endpoint),
            args,
            self.inner.call_factory.clone(),
            Arc::new(converter),
        )
    }

    /// A subscription handle whose events are decoded as JSON.
    pub fn observable<T>(&self, endpoint: &Endpoint, args: Args) -> Observable<T>
    where
        T: DeserializeOwned + 'static,
    {
        self.observable_with(endpoint, args, JsonConverter::<T>::new())
    }

    /// A subscription handle whose events are decoded by `converter`.
    pub fn observable_with<T, C>(&self, endpoint: &Endpoint, args: Args, converter: C) -> Observable<T>
    where
        T: 'static,
        C: Converter<T> + 'static,
    {
        // ---
        Observable::new(
            self.descriptors(endpoint),
            args,
            self.inner.observable_factory.clone(),
            Arc::new(converter),
        )
    }

    pub fn base_topic(&self) -> Option<&str> {
        self.inner.base_topic.as_deref()
    }

    /// Reply timeout of endpoints that do not set their own.
    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    fn descriptors(&self, endpoint: &Endpoint) -> Arc<dyn DescriptorFactory> {
        // ---
        Arc::new(EndpointFactory::new(
            endpoint.clone(),
            self.inner.base_topic.clone(),
            self.inner.request_timeout,
        ))
    }
}
