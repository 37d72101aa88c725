//! Engine configuration.

use std::time::Duration;

use huddle_api::DEFAULT_PAGE_SIZE;

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a send may stay `sending` before it is marked `error`.
    pub send_timeout: Duration,
    /// Idle time after the last keystroke before local typing auto-stops.
    pub typing_timeout: Duration,
    /// How long a remote typing signal is honored without a refresh.
    pub remote_typing_expiry: Duration,
    /// Messages requested per history page.
    pub page_size: usize,
    /// Capacity of the observer event channel.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(15),
            typing_timeout: Duration::from_secs(3),
            remote_typing_expiry: Duration::from_secs(8),
            page_size: DEFAULT_PAGE_SIZE,
            event_buffer: 256,
        }
    }
}

impl EngineConfig {
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_typing_timeout(mut self, timeout: Duration) -> Self {
        self.typing_timeout = timeout;
        self
    }

    pub fn with_remote_typing_expiry(mut self, expiry: Duration) -> Self {
        self.remote_typing_expiry = expiry;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }
}
