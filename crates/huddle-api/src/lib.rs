//! # Huddle API
//!
//! Request/response abstraction for the Huddle engine. Provides the
//! [`ChatApi`] trait and an in-memory server implementation.
//!
//! ## Key Types
//!
//! - [`ChatApi`] - The async trait for conversation and history requests
//! - [`MemoryApi`] - In-memory server for tests
//! - [`PageQuery`] / [`MessagePage`] - Backwards history pagination
//! - [`ApiError`] - Cloneable request failure
//!
//! ## Usage
//!
//! ```rust,no_run
//! use huddle_api::{ChatApi, MemoryApi, PageQuery};
//! use huddle_core::UserId;
//!
//! async fn example() {
//!     let api = MemoryApi::new("alice");
//!     let conversation = api.create_direct(&UserId::from("bob")).await.unwrap();
//!     let page = api
//!         .get_messages(&conversation.id, &PageQuery::latest(50))
//!         .await
//!         .unwrap();
//!     assert!(page.messages.is_empty());
//! }
//! ```

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{ApiError, Result};
pub use memory::{ops, MemoryApi};
pub use traits::{ChatApi, MessagePage, NewGroup, PageCursor, PageQuery, DEFAULT_PAGE_SIZE};
