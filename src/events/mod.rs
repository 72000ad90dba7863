//! Event handling - subscriptions and dispatch.
//!
//! The EC pushes unsolicited event notifications at any time. For every
//! validated event the transport:
//!
//! 1. schedules an ACK on a single ordered queue (the EC sees ACKs promptly
//!    even when handlers are slow), and
//! 2. invokes the subscribed handler, either inline on the receive path
//!    (for [`EventDelay::Immediate`] subscribers such as the keyboard) or
//!    on a spawned task after the subscriber's delay hint.
//!
//! Handlers and delay hints are registered per event request-id. An event
//! without a subscriber is still ACKed, once.
//!
//! # Example
//!
//! ```ignore
//! controller.set_event_handler(KEYBOARD_RQID, |event| {
//!     process_key(event.payload.as_ref());
//!     Ok(())
//! })?;
//! ```

mod dispatch;
mod registry;

pub(crate) use dispatch::{ack_loop, Events, ACK_QUEUE_LEN};
pub(crate) use registry::EventRegistry;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

/// An event notification received from the EC.
#[derive(Debug, Clone)]
pub struct Event {
    /// Event request id (lies within the event id space).
    pub rqid: u16,
    /// Target category of the originating subsystem.
    pub target_category: u8,
    /// Instance id within the target category.
    pub instance_id: u8,
    /// Command id describing the event.
    pub command_id: u8,
    /// Event payload.
    pub payload: Bytes,
}

/// Scheduling hint returned by a subscriber's delay function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDelay {
    /// Invoke the handler inline on the receive path. For high-priority
    /// events (e.g. keyboard input) that must not wait behind the event
    /// queue.
    Immediate,
    /// Invoke the handler on the event queue after the given delay
    /// (`Duration::ZERO` for plain queued execution).
    Delay(Duration),
}

/// Result type returned by event handlers. Errors are logged by the
/// dispatcher and never surfaced to the EC.
pub type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A subscribed event handler.
pub type EventHandlerFn = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// A subscriber's delay function, consulted per event before the handler
/// is scheduled.
pub type EventDelayFn = Arc<dyn Fn(&Event) -> EventDelay + Send + Sync>;
