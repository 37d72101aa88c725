//! Transport abstraction for the live event connection.
//!
//! The transport delivers inbound events in order and accepts outbound events
//! without blocking on connectivity: a reconnect-aware implementation buffers
//! emissions while offline and flushes them once the connection is back,
//! reporting the outage with [`InboundEvent::Disconnected`] and
//! [`InboundEvent::Reconnected`].

use std::time::Duration;

use async_trait::async_trait;

use huddle_core::UserId;

use crate::error::Result;
use crate::events::{InboundEvent, OutboundEvent};

/// Transport trait for emitting and receiving live events.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Emit an event to the server.
    ///
    /// Succeeds while disconnected if the implementation buffers; fails only
    /// when the event can never be delivered.
    async fn emit(&self, event: OutboundEvent) -> Result<()>;

    /// Receive the next inbound event.
    ///
    /// Blocks until an event is available or the transport is closed.
    async fn recv(&self) -> Result<InboundEvent>;

    /// Receive with timeout.
    ///
    /// Returns None if timeout expires before an event arrives.
    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<InboundEvent>>;

    /// The user this connection is authenticated as.
    fn local_user(&self) -> UserId;

    /// Check if the connection is currently up.
    fn is_connected(&self) -> bool;
}

/// A simple in-memory transport for testing.
///
/// A [`MemoryRelay`](memory::MemoryRelay) plays the server: tests push inbound
/// events to a client, inspect what it emitted, and toggle its connectivity.
/// Everything crossing the relay goes through the frame codec.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex, RwLock};

    use crate::codec;
    use crate::error::TransportError;

    /// Per-client state held by the relay.
    struct ClientLink {
        inbound: mpsc::Sender<String>,
        online: Arc<AtomicBool>,
        /// Frames the server has received from this client.
        delivered: Vec<String>,
        /// Frames emitted while offline, flushed on reconnect.
        queued: Vec<String>,
    }

    /// Shared state for the in-memory relay.
    pub struct MemoryRelay {
        clients: RwLock<HashMap<UserId, ClientLink>>,
    }

    impl MemoryRelay {
        /// Create a new relay.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Connect a client.
        pub async fn connect(self: &Arc<Self>, user: impl Into<UserId>) -> MemoryTransport {
            let user = user.into();
            let (tx, rx) = mpsc::channel(1000);
            let online = Arc::new(AtomicBool::new(true));

            self.clients.write().await.insert(
                user.clone(),
                ClientLink {
                    inbound: tx,
                    online: Arc::clone(&online),
                    delivered: Vec::new(),
                    queued: Vec::new(),
                },
            );

            MemoryTransport {
                user,
                relay: Arc::clone(self),
                online,
                receiver: Mutex::new(rx),
            }
        }

        /// Deliver a server event to a client.
        ///
        /// Returns false if the client is offline and the event was lost.
        pub async fn push(&self, user: &UserId, event: InboundEvent) -> Result<bool> {
            let frame = codec::encode(&event)?;
            let clients = self.clients.read().await;
            let link = clients
                .get(user)
                .ok_or_else(|| TransportError::UnknownClient(user.to_string()))?;
            if !link.online.load(Ordering::SeqCst) {
                tracing::debug!(%user, "dropping event for offline client");
                return Ok(false);
            }
            link.inbound
                .send(frame)
                .await
                .map_err(|_| TransportError::Closed)?;
            Ok(true)
        }

        /// Events the server has received from a client, in order.
        pub async fn outbound(&self, user: &UserId) -> Vec<OutboundEvent> {
            let clients = self.clients.read().await;
            clients
                .get(user)
                .map(|link| decode_all(&link.delivered))
                .unwrap_or_default()
        }

        /// Drain the events the server has received from a client.
        pub async fn take_outbound(&self, user: &UserId) -> Vec<OutboundEvent> {
            let mut clients = self.clients.write().await;
            clients
                .get_mut(user)
                .map(|link| decode_all(&std::mem::take(&mut link.delivered)))
                .unwrap_or_default()
        }

        /// Number of frames waiting for a client to come back online.
        pub async fn queued(&self, user: &UserId) -> usize {
            let clients = self.clients.read().await;
            clients.get(user).map_or(0, |link| link.queued.len())
        }

        /// Drop or restore a client's connection.
        ///
        /// Going offline delivers `Disconnected` to the client. Coming back
        /// flushes buffered emissions to the server, then delivers `Reconnected`.
        pub async fn set_online(&self, user: &UserId, online: bool) -> Result<()> {
            let (sender, notice) = {
                let mut clients = self.clients.write().await;
                let link = clients
                    .get_mut(user)
                    .ok_or_else(|| TransportError::UnknownClient(user.to_string()))?;
                let was_online = link.online.swap(online, Ordering::SeqCst);
                if was_online == online {
                    return Ok(());
                }
                let notice = if online {
                    let queued = std::mem::take(&mut link.queued);
                    link.delivered.extend(queued);
                    InboundEvent::Reconnected
                } else {
                    InboundEvent::Disconnected
                };
                (link.inbound.clone(), notice)
            };
            tracing::debug!(%user, online, "relay connectivity changed");
            sender
                .send(codec::encode(&notice)?)
                .await
                .map_err(|_| TransportError::Closed)
        }
    }

    impl Default for MemoryRelay {
        fn default() -> Self {
            Self {
                clients: RwLock::new(HashMap::new()),
            }
        }
    }

    fn decode_all(frames: &[String]) -> Vec<OutboundEvent> {
        frames
            .iter()
            .filter_map(|frame| codec::decode(frame).ok())
            .collect()
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        user: UserId,
        relay: Arc<MemoryRelay>,
        online: Arc<AtomicBool>,
        receiver: Mutex<mpsc::Receiver<String>>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn emit(&self, event: OutboundEvent) -> Result<()> {
            let frame = codec::encode(&event)?;
            let mut clients = self.relay.clients.write().await;
            let link = clients.get_mut(&self.user).ok_or(TransportError::Closed)?;
            if link.online.load(Ordering::SeqCst) {
                link.delivered.push(frame);
            } else {
                link.queued.push(frame);
            }
            Ok(())
        }

        async fn recv(&self) -> Result<InboundEvent> {
            let mut rx = self.receiver.lock().await;
            match rx.recv().await {
                Some(frame) => codec::decode(&frame),
                None => Err(TransportError::Closed),
            }
        }

        async fn recv_timeout(&self, timeout: Duration) -> Result<Option<InboundEvent>> {
            let mut rx = self.receiver.lock().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(frame)) => codec::decode(&frame).map(Some),
                Ok(None) => Err(TransportError::Closed),
                Err(_) => Ok(None), // Timeout
            }
        }

        fn local_user(&self) -> UserId {
            self.user.clone()
        }

        fn is_connected(&self) -> bool {
            self.online.load(Ordering::SeqCst)
        }
    }
}
