//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Transport` trait. It is intended primarily for testing, local execution,
//! and as a reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! - Once `subscribe()` returns successfully, messages published *after* that
//!   point and matching the subscription are deliverable.
//! - A topic subscription matches an envelope whose address is exactly equal;
//!   a keyword subscription matches an envelope carrying exactly that keyword.
//! - Message delivery is deterministic within a single process and each inbox
//!   sees envelopes in publish order.
//! - `unsubscribe()` releases one handle; `close()` releases the handles of
//!   one transport. Other inboxes on the hub are untouched.
//!
//! This transport does not emulate the failure modes, persistence or
//! wildcard matching of any specific broker. QoS is accepted and ignored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{mpsc, RwLock};

use crate::{
    // ---
    log_debug,
    log_trace,
    Envelope,
    Qos,
    Result,
    Subscription,
    SubscriptionHandle,
    SubscriptionId,
    Transport,
    TransportConfig,
    TransportPtr,
};

const INBOX_CAPACITY: usize = 64;

/// One registered inbox and the transport that owns it.
struct Inbox {
    id: SubscriptionId,
    owner: u64,
    tx: mpsc::Sender<Envelope>,
}

/// Shared message bus for the in-memory transport.
///
/// Simulates a message broker within a single process. All memory transports
/// that share a `MemoryHub` publish and receive each other's messages,
/// exactly as nodes connected to a real broker would.
///
/// Integration tests that run in parallel construct their own hub and pass
/// it to [`create_memory_transport_with_hub`]:
///
/// ```
/// # use mom_dispatch::{MemoryHub, TransportConfig};
/// # async fn example() -> mom_dispatch::Result<()> {
/// let hub = MemoryHub::new();
/// let config = TransportConfig {
///     uri: "memory://".into(),
///     node_id: "node-a".into(),
///     transport_type: None,
///     keep_alive_secs: None,
/// };
///
/// let transport = mom_dispatch::create_memory_transport_with_hub(config, hub.clone()).await?;
/// # Ok(())
/// # }
/// ```
pub struct MemoryHub {
    // ---
    subscriptions: RwLock<HashMap<Subscription, Vec<Inbox>>>,
    next_id: AtomicU64,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn publish(&self, transport_id: &str, env: Envelope) -> Result<()> {
        // ---
        let targets: Vec<mpsc::Sender<Envelope>> = {
            let subs = self.subscriptions.read().await;
            subs.iter()
                .filter(|(sub, _)| sub.matches(&env))
                .flat_map(|(_, inboxes)| inboxes.iter().map(|inbox| inbox.tx.clone()))
                .collect()
        };

        log_trace!(
            "{transport_id}: publish to {} ({} inboxes)",
            env.address,
            targets.len()
        );

        for sender in targets {
            // A closed channel means the SubscriptionHandle was dropped.
            if sender.send(env.clone()).await.is_err() {
                log_trace!("{transport_id}: inbox closed for {}", env.address);
            }
        }

        Ok(())
    }

    async fn subscribe(&self, transport_id: &str, owner: u64, sub: Subscription) -> Result<SubscriptionHandle> {
        // ---
        let id = SubscriptionId(self.next_id());
        log_debug!("{transport_id}: subscribe to {sub:?} ({id})");

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);

        let mut subs = self.subscriptions.write().await;

        // prune inboxes whose handle was dropped
        for inboxes in subs.values_mut() {
            inboxes.retain(|inbox| !inbox.tx.is_closed());
        }
        subs.retain(|_, inboxes| !inboxes.is_empty());

        subs.entry(sub.clone()).or_default().push(Inbox { id, owner, tx });

        Ok(SubscriptionHandle {
            id,
            subscription: sub,
            inbox: rx,
        })
    }

    async fn unsubscribe(&self, transport_id: &str, sub: &Subscription, id: SubscriptionId) -> Result<()> {
        // ---
        log_debug!("{transport_id}: unsubscribe {id} from {sub:?}");

        let mut subs = self.subscriptions.write().await;
        if let Some(inboxes) = subs.get_mut(sub) {
            inboxes.retain(|inbox| inbox.id != id);
            if inboxes.is_empty() {
                subs.remove(sub);
            }
        }
        Ok(())
    }

    async fn close(&self, transport_id: &str, owner: u64) -> Result<()> {
        // ---
        log_debug!("{transport_id}: closing transport...");

        let mut subs = self.subscriptions.write().await;
        for inboxes in subs.values_mut() {
            inboxes.retain(|inbox| inbox.owner != owner);
        }
        subs.retain(|_, inboxes| !inboxes.is_empty());
        Ok(())
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        // ---
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport over a shared [`MemoryHub`].
struct MemoryTransport {
    // ---
    transport_id: String,
    /// Hub-unique key marking the inboxes this transport registered.
    owner: u64,
    hub: Arc<MemoryHub>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn transport_id(&self) -> &str {
        &self.transport_id
    }

    async fn publish(&self, env: Envelope) -> Result<()> {
        self.hub.publish(&self.transport_id, env).await
    }

    async fn subscribe(&self, sub: Subscription, _qos: Qos) -> Result<SubscriptionHandle> {
        self.hub.subscribe(&self.transport_id, self.owner, sub).await
    }

    async fn unsubscribe(&self, sub: Subscription, id: SubscriptionId) -> Result<()> {
        self.hub.unsubscribe(&self.transport_id, &sub, id).await
    }

    /// Drops every inbox this transport registered on the hub.
    async fn close(&self) -> Result<()> {
        self.hub.close(&self.transport_id, self.owner).await
    }
}

/// Create a new in-memory transport using the process-global hub.
///
/// All transports created with this function share a single message bus.
/// For isolated parallel testing, use [`create_memory_transport_with_hub`].
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    create_memory_transport_with_hub(config, global_hub()).await
}

/// Create a new in-memory transport using the provided hub.
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport_with_hub(
    config: TransportConfig,
    hub: Arc<MemoryHub>,
) -> Result<TransportPtr> {
    // ---
    log_debug!("{}: create memory transport", config.node_id);

    let transport = MemoryTransport {
        transport_id: config.node_id,
        owner: hub.next_id(),
        hub,
    };

    Ok(Arc::new(transport))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::Address;
    use bytes::Bytes;

    fn config(node_id: &str) -> TransportConfig {
        TransportConfig {
            uri: "memory://".into(),
            node_id: node_id.into(),
            transport_type: None,
            keep_alive_secs: None,
        }
    }

    #[tokio::test]
    async fn test_keyword_subscription_ignores_topic() {
        // ---
        let transport = create_memory_transport_with_hub(config("a"), MemoryHub::new())
            .await
            .unwrap();
        let mut handle = transport
            .subscribe(Subscription::keyword("alarm"), Qos::default())
            .await
            .unwrap();

        let env = Envelope::new(Address::from("sensor/kitchen"), Bytes::from_static(b"smoke"))
            .with_keyword("alarm");
        transport.publish(env).await.unwrap();
        transport
            .publish(Envelope::new(Address::from("sensor/kitchen"), Bytes::new()))
            .await
            .unwrap();

        let received = handle.inbox.recv().await.unwrap();
        assert_eq!(received.payload, Bytes::from_static(b"smoke"));
        assert!(handle.inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_only_that_inbox() {
        // ---
        let transport = create_memory_transport_with_hub(config("a"), MemoryHub::new())
            .await
            .unwrap();
        let mut released = transport.subscribe(Subscription::topic("t"), Qos::default()).await.unwrap();
        let mut kept = transport.subscribe(Subscription::topic("t"), Qos::default()).await.unwrap();
        assert_ne!(released.id, kept.id);

        transport
            .unsubscribe(released.subscription.clone(), released.id)
            .await
            .unwrap();
        transport
            .publish(Envelope::new(Address::from("t"), Bytes::from_static(b"still here")))
            .await
            .unwrap();

        assert!(released.inbox.recv().await.is_none());
        let received = kept.inbox.recv().await.unwrap();
        assert_eq!(received.payload, Bytes::from_static(b"still here"));
    }

    #[tokio::test]
    async fn test_close_keeps_other_transports() {
        // ---
        let hub = MemoryHub::new();
        let a = create_memory_transport_with_hub(config("a"), hub.clone()).await.unwrap();
        let b = create_memory_transport_with_hub(config("b"), hub.clone()).await.unwrap();
        let mut on_a = a.subscribe(Subscription::topic("t"), Qos::default()).await.unwrap();
        let mut on_b = b.subscribe(Subscription::topic("t"), Qos::default()).await.unwrap();

        a.close().await.unwrap();
        b.publish(Envelope::new(Address::from("t"), Bytes::from_static(b"x")))
            .await
            .unwrap();

        assert!(on_a.inbox.recv().await.is_none());
        assert_eq!(on_b.inbox.recv().await.unwrap().payload, Bytes::from_static(b"x"));
    }
}
