// src/template.rs

//! Declarative endpoints.
//!
//! An [`Endpoint`] describes where a request goes and what it carries, with
//! `{name}` placeholders filled from the call-site [`Args`]. Bound to a base
//! topic and a default timeout it becomes an [`EndpointFactory`], the
//! [`DescriptorFactory`] the dispatch handles build their descriptors with.
//!
//! ```
//! # use mom_dispatch::{Args, DescriptorFactory, Endpoint, EndpointFactory};
//! # use std::time::Duration;
//! let endpoint = Endpoint::topic("user/{id}")
//!     .payload(r#"{"id":"{id}"}"#)
//!     .reply_topic("user/{id}/reply");
//!
//! let factory = EndpointFactory::new(endpoint, Some("app".into()), Duration::from_secs(5));
//! let request = factory.build_request(&Args::new().path("id", 123)).unwrap();
//!
//! assert_eq!(request.topic.as_str(), "app/user/123");
//! assert_eq!(&request.payload[..], br#"{"id":"123"}"#);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

use crate::{
    // ---
    Address,
    DescriptorFactory,
    Error,
    Qos,
    Relation,
    RequestDescriptor,
    Result,
    SubscriptionDescriptor,
};

/// Call-site arguments of one invocation.
///
/// Serialization faults of [`json`](Self::json) and [`field`](Self::field)
/// are kept and surface as [`Error::Construction`] when the descriptor is
/// built.
#[derive(Clone, Debug, Default)]
pub struct Args {
    path: BTreeMap<String, String>,
    body: Option<std::result::Result<Bytes, String>>,
    fields: Vec<(String, std::result::Result<serde_json::Value, String>)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value substituted for `{name}` in the endpoint's templates.
    pub fn path(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.path.insert(name.into(), value.to_string());
        self
    }

    /// Explicit payload; overrides the endpoint's payload template and form
    /// fields.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(Ok(body.into()));
        self
    }

    /// Explicit payload encoded as JSON.
    pub fn json<S: Serialize + ?Sized>(mut self, value: &S) -> Self {
        // ---
        let encoded = serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|err| err.to_string());
        self.body = Some(encoded);
        self
    }

    /// Form field, used by form-encoded endpoints.
    pub fn field<S: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &S) -> Self {
        // ---
        let encoded = serde_json::to_value(value).map_err(|err| err.to_string());
        self.fields.push((name.into(), encoded));
        self
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        self.path.get(name).map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum ReplyRoute {
    Topic(String),
    Keyword(String),
}

/// Declarative description of one endpoint.
#[derive(Clone, Debug, Default)]
pub struct Endpoint {
    topic: Option<String>,
    absolute: bool,
    payload: Option<String>,
    qos: u8,
    retained: bool,
    keyword: Option<String>,
    timeout: Option<Duration>,
    reply: Option<ReplyRoute>,
    subscribe_topics: Vec<String>,
    subscribe_keywords: Vec<String>,
    form_encoded: bool,
}

impl Endpoint {
    /// An endpoint publishing to `topic`.
    pub fn topic(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            ..Self::default()
        }
    }

    /// An endpoint without a request topic, e.g. subscription-only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Do not prefix topics with the dispatcher's base topic.
    pub fn absolute(mut self) -> Self {
        self.absolute = true;
        self
    }

    /// Payload template.
    pub fn payload(mut self, template: impl Into<String>) -> Self {
        self.payload = Some(template.into());
        self
    }

    /// QoS level; values above 2 fall back to 0.
    /// MQTT QoS level of the request and subscriptions, clamped to `0..=2`.
    pub fn qos(mut self, level: u8) -> Self {
        self.qos = level;
        self
    }

    pub fn retained(mut self, retained: bool) -> Self {
        self.retained = retained;
        self
    }

    /// Keyword tagged on outgoing requests.
    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    /// Reply timeout; defaults to the dispatcher's request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Expect replies on a topic (template).
    pub fn reply_topic(mut self, template: impl Into<String>) -> Self {
        self.reply = Some(ReplyRoute::Topic(template.into()));
        self
    }

    /// Expect replies tagged with `keyword`.
    pub fn reply_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.reply = Some(ReplyRoute::Keyword(keyword.into()));
        self
    }

    /// Add a topic (template) to the subscription relations.
    pub fn subscribe_topic(mut self, template: impl Into<String>) -> Self {
        self.subscribe_topics.push(template.into());
        self
    }

    /// Add a keyword to the subscription relations.
    pub fn subscribe_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.subscribe_keywords.push(keyword.into());
        self
    }

    /// Encode [`Args::field`] values as a JSON object payload.
    pub fn form_encoded(mut self) -> Self {
        self.form_encoded = true;
        self
    }
}

/// An [`Endpoint`] bound to a base topic and a default timeout.
#[derive(Clone, Debug)]
pub struct EndpointFactory {
    endpoint: Endpoint,
    base_topic: Option<String>,
    default_timeout: Duration,
}

impl EndpointFactory {
    pub fn new(endpoint: Endpoint, base_topic: Option<String>, default_timeout: Duration) -> Self {
        // ---
        Self {
            endpoint,
            base_topic,
            default_timeout,
        }
    }

    /// Fill `template` and resolve it against the base topic.
    fn resolve_topic(&self, template: &str, args: &Args) -> Result<Address> {
        // ---
        let topic = fill(template, args)?;

        let joined = match self.base_topic.as_deref() {
            _ if self.endpoint.absolute => topic,
            None => topic,
            Some(base) if topic.is_empty() => base.to_string(),
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                topic.trim_start_matches('/')
            ),
        };

        if joined.is_empty() {
            return Err(Error::Unexpected("empty topic".into()));
        }
        Ok(Address::from(joined))
    }

    fn encode_payload(&self, args: &Args) -> Result<Bytes> {
        // ---
        if let Some(body) = &args.body {
            return body.clone().map_err(Error::Construction);
        }

        if self.endpoint.form_encoded && !args.fields.is_empty() {
            let mut form = serde_json::Map::new();
            for (name, value) in &args.fields {
                let value = value.clone().map_err(Error::Construction)?;
                form.insert(name.clone(), value);
            }
            let encoded = serde_json::to_vec(&serde_json::Value::Object(form))
                .map_err(|err| Error::Construction(err.to_string()))?;
            return Ok(Bytes::from(encoded));
        }

        match &self.endpoint.payload {
            Some(template) => Ok(Bytes::from(fill(template, args)?)),
            None => Ok(Bytes::new()),
        }
    }
}

impl DescriptorFactory for EndpointFactory {
    fn build_request(&self, args: &Args) -> Result<RequestDescriptor> {
        // ---
        let topic = match (&self.endpoint.topic, &self.base_topic) {
            (None, None) => {
                return Err(Error::Unexpected(
                    "endpoint has no topic and no base topic is configured".into(),
                ))
            }
            (Some(template), _) => self.resolve_topic(template, args)?,
            (None, Some(_)) => self.resolve_topic("", args)?,
        };

        let reply = match &self.endpoint.reply {
            Some(ReplyRoute::Topic(template)) => {
                Some(Relation::Topic(self.resolve_topic(template, args)?))
            }
            Some(ReplyRoute::Keyword(keyword)) => {
                Some(Relation::Keyword(Arc::from(fill(keyword, args)?)))
            }
            None => None,
        };

        let keyword = match &self.endpoint.keyword {
            Some(keyword) => Some(Arc::from(fill(keyword, args)?)),
            None => None,
        };

        Ok(RequestDescriptor {
            topic,
            payload: self.encode_payload(args)?,
            qos: Qos::from_level(self.endpoint.qos),
            retained: self.endpoint.retained,
            keyword,
            reply,
            timeout: self.endpoint.timeout.unwrap_or(self.default_timeout),
        })
    }

    fn build_subscription(&self, args: &Args) -> Result<SubscriptionDescriptor> {
        // ---
        let mut relations = Vec::new();

        for template in &self.endpoint.subscribe_topics {
            relations.push(Relation::Topic(self.resolve_topic(template, args)?));
        }
        for keyword in &self.endpoint.subscribe_keywords {
            relations.push(Relation::Keyword(Arc::from(fill(keyword, args)?)));
        }

        if relations.is_empty() {
            return Err(Error::Unexpected(
                "endpoint has no subscribe topic or keyword".into(),
            ));
        }

        let mut subscription = SubscriptionDescriptor::new(relations);
        subscription.qos = Qos::from_level(self.endpoint.qos);
        Ok(subscription)
    }
}

/// Substitute `{name}` placeholders in `template`.
///
/// Braces that do not enclose an identifier (such as JSON object syntax) are
/// copied through.
fn fill(template: &str, args: &Args) -> Result<String> {
    // ---
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let name = after.find('}').map(|close| &after[..close]);
        match name {
            Some(name) if is_placeholder(name) => {
                let value = args.lookup(name).ok_or_else(|| {
                    Error::Unexpected(format!("unresolved placeholder {{{name}}} in {template:?}"))
                })?;
                out.push_str(value);
                rest = &after[name.len() + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    Ok(out)
}

fn is_placeholder(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
