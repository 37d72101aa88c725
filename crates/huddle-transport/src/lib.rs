//! # Huddle Transport
//!
//! Live event channel between a client and the chat server.
//!
//! ## Overview
//!
//! The engine subscribes to conversation rooms, emits sends and typing
//! signals, and receives echoes, acknowledgments, read receipts, typing
//! signals and delta-sync answers. Every event crosses the wire as one JSON
//! frame (see [`codec`]) and is checked against [`limits`] on both sides.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use huddle_transport::{MemoryRelay, OutboundEvent, Transport};
//! use huddle_core::{ConversationId, UserId};
//!
//! async fn example() {
//!     let relay = MemoryRelay::new();
//!     let transport = relay.connect("alice").await;
//!
//!     transport
//!         .emit(OutboundEvent::JoinRoom {
//!             conversation_id: ConversationId::from("conv-1"),
//!         })
//!         .await
//!         .unwrap();
//!
//!     let sent = relay.outbound(&UserId::from("alice")).await;
//!     assert_eq!(sent.len(), 1);
//! }
//! ```
//!
//! ## Event Flow
//!
//! ```text
//! Client                              Server
//!   |-------- join-room -------------->|
//!   |-------- send-message ----------->|
//!   |<------- message-ack -------------|
//!   |<------- new-message (echo) ------|
//!   |             ... outage ...       |
//!   |<------- reconnected -------------|
//!   |-------- join-room -------------->|
//!   |-------- delta-sync-request ----->|
//!   |<------- delta-sync-response -----|
//! ```

pub mod codec;
pub mod error;
pub mod events;
pub mod transport;

pub use codec::{decode, encode, Frame};
pub use error::{Result, TransportError};
pub use events::{limits, InboundEvent, OutboundEvent};
pub use transport::{memory::MemoryRelay, memory::MemoryTransport, Transport};
