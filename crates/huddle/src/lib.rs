//! # Huddle
//!
//! Real-time conversation sync engine for a team-collaboration client.
//!
//! ## Overview
//!
//! The engine keeps an ordered, deduplicated message history per
//! conversation consistent across optimistic local sends, server
//! acknowledgments, typing signals and connection outages, and prevents
//! duplicate direct conversations under concurrent requests.
//!
//! ## Components
//!
//! - [`MessageSyncEngine`] - Message cache, history paging and the optimistic send pipeline
//! - [`TypingCoordinator`] - Local typing broadcast and remote typing collection
//! - [`ConversationDirectory`] - Conversation list, unread counters, get-or-create direct
//! - [`ReconnectionSynchronizer`] - Delta sync after a reconnect
//! - [`ChatClient`] - Facade wiring the above to a [`ChatApi`](huddle_api::ChatApi)
//!   and a [`Transport`](huddle_transport::Transport)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use huddle::{ChatClient, EngineConfig};
//! use huddle_api::MemoryApi;
//! use huddle_core::{OutgoingMessage, UserId};
//! use huddle_transport::MemoryRelay;
//!
//! async fn example() {
//!     let relay = MemoryRelay::new();
//!     let transport = Arc::new(relay.connect("alice").await);
//!     let api = Arc::new(MemoryApi::new("alice"));
//!
//!     let client = ChatClient::new(api, transport, EngineConfig::default());
//!     client.spawn();
//!
//!     let conversation = client.get_or_create_direct(&UserId::from("bob")).await.unwrap();
//!     client.open_conversation(&conversation.id).await;
//!     let cid = client
//!         .send(&conversation.id, OutgoingMessage::text("hello"))
//!         .unwrap();
//!     println!("sent attempt {}", cid);
//! }
//! ```
//!
//! ## Concurrency
//!
//! Each component owns its state behind one mutex that is never held across
//! an await, so every handler runs to completion before the next touches the
//! same state. Actions that talk to the transport only enqueue; a single
//! task emits in order.

pub mod active;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod messages;
pub mod outbox;
pub mod reconnect;
pub mod timer;
pub mod typing;

pub use active::ActiveConversation;
pub use client::ChatClient;
pub use config::EngineConfig;
pub use directory::ConversationDirectory;
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventBus};
pub use messages::{FetchOutcome, MergedBatch, MessageSyncEngine};
pub use outbox::Outbox;
pub use reconnect::{DeltaOutcome, ReconnectionSynchronizer};
pub use timer::Timer;
pub use typing::TypingCoordinator;

// Re-export lower crates for convenience
pub use huddle_api;
pub use huddle_core;
pub use huddle_transport;
