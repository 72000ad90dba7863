//! Event dispatch pipeline.
//!
//! Every validated event produces one work item shared between two paths:
//! the ACK queue (a single ordered task that answers the EC) and the
//! handler invocation. The item owns a copy of the payload and the
//! control sequence; the last path to finish drops it.
//!
//! ACK work is enqueued before the handler is scheduled, so the EC sees
//! acknowledgements promptly even when handlers are slow. Only dispatch
//! order is guaranteed, not wall-clock completion order.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::timeout;
use tracing::{error, warn};

use super::{Event, EventDelay, EventRegistry};
use crate::controller::State;
use crate::protocol::receiver::EventMsg;
use crate::protocol::wire::build_ack_message;
use crate::request::WRITE_TIMEOUT;
use crate::writer::WriterHandle;

/// Capacity of the ACK queue.
pub(crate) const ACK_QUEUE_LEN: usize = 32;

/// Work item shared between ACK emission and handler invocation.
pub(crate) struct EventItem {
    event: Event,
    /// Control sequence to echo in the ACK.
    seq: u8,
}

/// Work submitted to the ACK task.
pub(crate) enum AckWork {
    /// Acknowledge the event carried by the item.
    Ack(Arc<EventItem>),
    /// Queue barrier: answered once everything before it has been emitted.
    Flush(oneshot::Sender<()>),
}

/// Counter of handler invocations currently in flight, spawned or inline.
struct InFlight {
    count: AtomicUsize,
    notify: Notify,
}

impl InFlight {
    fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    fn guard(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard(self.clone())
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before re-checking the counter, so a guard
            // dropped in between cannot slip its wakeup past us.
            notified.as_mut().enable();
            if self.count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.notify.notify_waiters();
        }
    }
}

/// Event dispatcher: subscription registry plus the two work paths.
#[derive(Clone)]
pub(crate) struct Events {
    ack_tx: mpsc::Sender<AckWork>,
    registry: Arc<EventRegistry>,
    in_flight: Arc<InFlight>,
}

impl Events {
    pub fn new(ack_tx: mpsc::Sender<AckWork>) -> Self {
        Self {
            ack_tx,
            registry: Arc::new(EventRegistry::new()),
            in_flight: Arc::new(InFlight::new()),
        }
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    /// Dispatch one event from the receive path: schedule the ACK, then
    /// invoke the handler inline or hand it to the event queue.
    pub async fn dispatch(&self, msg: EventMsg) {
        let item = Arc::new(EventItem {
            event: msg.event,
            seq: msg.seq,
        });

        if self.ack_tx.send(AckWork::Ack(item.clone())).await.is_err() {
            // Tearing down; the event dies unacknowledged like any frame
            // received after close.
            warn!("event: ack queue gone, dropping event {:#06x}", item.event.rqid);
            return;
        }

        match self.registry.delay_for(&item.event) {
            EventDelay::Immediate => {
                let _guard = self.in_flight.guard();
                self.run_handler(&item);
            }
            EventDelay::Delay(delay) => {
                let guard = self.in_flight.guard();
                let this = self.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    this.run_handler(&item);
                });
            }
        }
    }

    fn run_handler(&self, item: &EventItem) {
        match self.registry.handler(item.event.rqid) {
            Some(handler) => {
                if let Err(e) = handler(&item.event) {
                    error!("event: error handling event: {}", e);
                }
            }
            None => {
                warn!("event: unhandled event (rqid: {:#06x})", item.event.rqid);
            }
        }
    }

    /// Wait until no handler invocation is in flight. Used after removing
    /// a subscription so the caller knows its handler is quiescent.
    pub async fn flush_handlers(&self) {
        self.in_flight.wait_idle().await;
    }

    /// Flush both work paths: drain the ACK queue up to a barrier, then
    /// wait out the handlers.
    pub async fn flush(&self) {
        let (done, done_rx) = oneshot::channel();
        if self.ack_tx.send(AckWork::Flush(done)).await.is_ok() {
            let _ = done_rx.await;
        }
        self.in_flight.wait_idle().await;
    }
}

/// The single ACK task: answers events in dispatch order.
///
/// The controller state is re-checked per item so events that raced a
/// suspend or teardown are not acknowledged on a dead link; failures are
/// logged and never surfaced.
pub(crate) async fn ack_loop(
    mut rx: mpsc::Receiver<AckWork>,
    state: Arc<AtomicU8>,
    writer: WriterHandle,
) {
    while let Some(work) = rx.recv().await {
        match work {
            AckWork::Ack(item) => {
                if state.load(Ordering::SeqCst) != State::Initialized as u8 {
                    continue;
                }
                let ack = Bytes::copy_from_slice(&build_ack_message(item.seq));
                match timeout(WRITE_TIMEOUT, writer.flush(ack)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("event: failed to send ack: {}", e),
                    Err(_) => error!("event: timed out sending ack"),
                }
            }
            AckWork::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
