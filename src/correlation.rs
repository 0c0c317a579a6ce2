use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// Identifier tying reply envelopes to the request of one broker call.
///
/// Carried in [`Envelope::correlation_id`](crate::Envelope); responders copy
/// it onto their reply. Opaque to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Generate a new unique correlation ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if a reply carrying `reply_id` belongs to this request.
    ///
    /// Replies without a correlation id are accepted; responders that do not
    /// echo the id still complete the call.
    pub fn accepts(&self, reply_id: Option<&str>) -> bool {
        // ---
        match reply_id {
            Some(id) => id == &*self.0,
            None => true,
        }
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<CorrelationId> for Arc<str> {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
