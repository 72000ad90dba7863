//! Subscription registry, one slot per event request-id.

use std::sync::Mutex;

use super::{Event, EventDelay, EventDelayFn, EventHandlerFn};
use crate::error::{Error, Result};
use crate::protocol::wire::rqid;

struct EventEntry {
    handler: EventHandlerFn,
    delay: Option<EventDelayFn>,
}

/// Registry mapping event request-ids to handlers.
///
/// The lock is only ever held across slot reads and writes; handlers and
/// delay functions are snapshotted under the lock and invoked outside it.
pub(crate) struct EventRegistry {
    slots: Mutex<[Option<EventEntry>; rqid::NUM_EVENT_IDS]>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(std::array::from_fn(|_| None)),
        }
    }

    fn slot_index(event_rqid: u16) -> Result<usize> {
        if !rqid::is_event(event_rqid) {
            return Err(Error::InvalidEventId(event_rqid));
        }
        // 0 is not a valid event rqid, so slot 0 belongs to rqid 1.
        Ok(event_rqid as usize - 1)
    }

    /// Register a handler (and optional delay function) for an event id,
    /// replacing any previous subscription.
    pub fn set(
        &self,
        event_rqid: u16,
        handler: EventHandlerFn,
        delay: Option<EventDelayFn>,
    ) -> Result<()> {
        let index = Self::slot_index(event_rqid)?;
        let mut slots = self.slots.lock().expect("event registry lock poisoned");
        slots[index] = Some(EventEntry { handler, delay });
        Ok(())
    }

    /// Remove the subscription for an event id.
    pub fn remove(&self, event_rqid: u16) -> Result<()> {
        let index = Self::slot_index(event_rqid)?;
        let mut slots = self.slots.lock().expect("event registry lock poisoned");
        slots[index] = None;
        Ok(())
    }

    /// Drop all subscriptions.
    pub fn clear(&self) {
        let mut slots = self.slots.lock().expect("event registry lock poisoned");
        for slot in slots.iter_mut() {
            *slot = None;
        }
    }

    /// Snapshot the handler registered for an event id.
    pub fn handler(&self, event_rqid: u16) -> Option<EventHandlerFn> {
        let index = Self::slot_index(event_rqid).ok()?;
        let slots = self.slots.lock().expect("event registry lock poisoned");
        slots[index].as_ref().map(|entry| entry.handler.clone())
    }

    /// Resolve the scheduling delay for an event. Subscribers without a
    /// delay function (and unknown events) get plain queued execution.
    pub fn delay_for(&self, event: &Event) -> EventDelay {
        let delay_fn = {
            let index = match Self::slot_index(event.rqid) {
                Ok(index) => index,
                Err(_) => return EventDelay::Delay(std::time::Duration::ZERO),
            };
            let slots = self.slots.lock().expect("event registry lock poisoned");
            slots[index].as_ref().and_then(|entry| entry.delay.clone())
        };

        match delay_fn {
            Some(delay_fn) => delay_fn(event),
            None => EventDelay::Delay(std::time::Duration::ZERO),
        }
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}
