use std::fmt;

use crate::{Address, RawResponse};

/// A successfully converted response.
///
/// Carries the typed body together with the raw response it was decoded
/// from, so callers can still see the topic and keyword it arrived on.
#[derive(Clone)]
pub struct Response<T> {
    // ---
    raw: RawResponse,
    body: T,
}

impl<T> Response<T> {
    /// Wrap a converted `body` with the raw response it came from.
    pub fn success(body: T, raw: RawResponse) -> Self {
        Self { raw, body }
    }

    /// The raw response as delivered by the transport.
    pub fn raw(&self) -> &RawResponse {
        &self.raw
    }

    /// Topic the response arrived on.
    pub fn topic(&self) -> &Address {
        &self.raw.body.topic
    }

    /// Keyword the response was routed by, if any.
    pub fn keyword(&self) -> Option<&str> {
        self.raw.keyword.as_deref()
    }

    /// The converted body.
    pub fn body(&self) -> &T {
        &self.body
    }

    /// Consume the response, keeping only the converted body.
    pub fn into_body(self) -> T {
        self.body
    }
}

impl<T: fmt::Debug> fmt::Debug for Response<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("topic", self.topic())
            .field("keyword", &self.keyword())
            .field("body", &self.body)
            .finish()
    }
}
