//! # Huddle Testkit
//!
//! Testing utilities for the Huddle engine.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: [`TestHarness`] wires a [`ChatClient`](huddle::ChatClient)
//!   to an in-memory server and relay, plus message and conversation builders
//! - **Generators**: Proptest strategies for messages, histories and sends
//!
//! The end-to-end scenarios live in this crate's `tests/` directory.
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use huddle_testkit::TestHarness;
//! use huddle_core::OutgoingMessage;
//!
//! async fn example() {
//!     let harness = TestHarness::new("alice").await;
//!     let conversation = harness.seed_direct("c1", "bob");
//!     harness.client.open_conversation(&conversation).await;
//!     harness.client.send(&conversation, OutgoingMessage::text("hi")).unwrap();
//!     let sent = harness.sent().await;
//!     assert_eq!(sent.len(), 2); // join-room, send-message
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use huddle_testkit::generators::history;
//!
//! proptest! {
//!     #[test]
//!     fn history_is_sorted_after_merge(batch in history("c1", 20)) {
//!         let merged = huddle_core::merge(&[], &batch);
//!         prop_assert!(huddle_core::is_ordered(&merged));
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{init_tracing, server_message, timestamps, TestHarness};
