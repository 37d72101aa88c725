//! JSON frame codec.
//!
//! Every frame is checked against the wire limits in both directions, so an
//! oversized event is rejected before it is sent and dropped when received.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, TransportError};
use crate::events::{limits, InboundEvent, OutboundEvent};

/// An event that can travel as a frame.
pub trait Frame: Serialize + DeserializeOwned {
    /// Check the event against wire limits.
    fn validate_limits(&self) -> std::result::Result<(), &'static str>;
}

impl Frame for OutboundEvent {
    fn validate_limits(&self) -> std::result::Result<(), &'static str> {
        OutboundEvent::validate_limits(self)
    }
}

impl Frame for InboundEvent {
    fn validate_limits(&self) -> std::result::Result<(), &'static str> {
        InboundEvent::validate_limits(self)
    }
}

/// Encode an event into a text frame.
pub fn encode<F: Frame>(event: &F) -> Result<String> {
    event
        .validate_limits()
        .map_err(TransportError::LimitExceeded)?;
    let frame = serde_json::to_string(event)?;
    check_size(&frame)?;
    Ok(frame)
}

/// Decode a text frame into an event.
pub fn decode<F: Frame>(frame: &str) -> Result<F> {
    check_size(frame)?;
    let event: F = serde_json::from_str(frame)?;
    event
        .validate_limits()
        .map_err(TransportError::LimitExceeded)?;
    Ok(event)
}

fn check_size(frame: &str) -> Result<()> {
    if frame.len() > limits::MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge {
            len: frame.len(),
            max: limits::MAX_FRAME_BYTES,
        });
    }
    Ok(())
}
