//! Transport builder for creating transport instances.
//!
//! Provides a fluent builder API for constructing transports with clear separation
//! between required and optional configuration.

use crate::{Error, Result, TransportConfig, TransportPtr};

/// Builder for creating transport instances.
///
/// # Examples
///
/// ## In-process transport
/// ```
/// use mom_dispatch::TransportBuilder;
///
/// # async fn example() -> mom_dispatch::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("memory://")
///     .node_id("sensor-client")
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
///
/// ## MQTT broker (feature `transport_rumqttc`)
/// ```no_run
/// use mom_dispatch::TransportBuilder;
///
/// # async fn example() -> mom_dispatch::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("mqtt://localhost:1883")
///     .node_id("edge-agent")
///     .keep_alive_secs(30)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct TransportBuilder {
    uri: Option<String>,
    node_id: Option<String>,
    transport_type: Option<String>,
    keep_alive_secs: Option<u16>,
}

impl TransportBuilder {
    /// Create a new transport builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the transport URI (required).
    ///
    /// Examples:
    /// - `"memory://"`
    /// - `"mqtt://localhost:1883"`
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the node ID (required). Used as the MQTT client id.
    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    /// Set explicit transport type.
    ///
    /// Valid values: `"memory"`, `"rumqttc"`. If not specified, the URI scheme
    /// selects the transport.
    pub fn transport_type(mut self, flag: impl Into<String>) -> Self {
        self.transport_type = Some(flag.into());
        self
    }

    /// Set broker keep-alive interval in seconds.
    ///
    /// If not specified, uses transport default.
    pub fn keep_alive_secs(mut self, secs: u16) -> Self {
        self.keep_alive_secs = Some(secs);
        self
    }

    /// Build the transport (consumes self).
    ///
    /// # Errors
    ///
    /// - [`Error::MissingConfig`] if `uri` or `node_id` is missing
    /// - [`Error::InvalidConfig`] for an unknown transport type or URI scheme,
    ///   or a transport whose feature is not enabled
    /// - Any error of the selected transport factory
    pub async fn build(self) -> Result<TransportPtr> {
        // ---
        let uri = self.uri.ok_or_else(|| Error::MissingConfig("uri".into()))?;
        let node_id = self
            .node_id
            .ok_or_else(|| Error::MissingConfig("node_id".into()))?;

        let kind = match self.transport_type.as_deref() {
            Some(kind) => kind.to_string(),
            None => scheme_transport(&uri)?.to_string(),
        };

        let config = TransportConfig {
            uri,
            node_id,
            transport_type: self.transport_type,
            keep_alive_secs: self.keep_alive_secs,
        };

        match kind.as_str() {
            "memory" => crate::create_memory_transport(config).await,
            "rumqttc" => create_rumqttc(config).await,
            other => Err(Error::InvalidConfig(format!(
                "unrecognized transport_type: {other}, valid values: memory, rumqttc"
            ))),
        }
    }
}

/// Map a URI scheme to the transport serving it.
fn scheme_transport(uri: &str) -> Result<&'static str> {
    // ---
    match uri.split_once("://").map(|(scheme, _)| scheme) {
        Some("memory") => Ok("memory"),
        Some("mqtt") | Some("tcp") => Ok("rumqttc"),
        _ => Err(Error::InvalidConfig(format!("unsupported transport URI: {uri}"))),
    }
}

#[cfg(feature = "transport_rumqttc")]
async fn create_rumqttc(config: TransportConfig) -> Result<TransportPtr> {
    crate::create_rumqttc_transport(config).await
}

#[cfg(not(feature = "transport_rumqttc"))]
async fn create_rumqttc(_config: TransportConfig) -> Result<TransportPtr> {
    Err(Error::InvalidConfig(
        "rumqttc transport requires the `transport_rumqttc` feature".into(),
    ))
}
