//! Controller facade - lifecycle, request API, and event subscriptions.
//!
//! The [`Controller`] owns the link and the transport tasks:
//! 1. a writer task serializing all wire output,
//! 2. an ACK task answering event notifications in order,
//! 3. a read loop feeding the receiver reassembler.
//!
//! [`Controller::open`] wires everything up and wakes the EC;
//! [`Controller::shutdown`] suspends it again and tears the tasks down.
//! Handles are cheap to clone and share one controller instance, so client
//! drivers receive their own handle instead of reaching for a global.
//!
//! # Example
//!
//! ```ignore
//! use sshub::{Controller, Request, ResponseBuffer};
//!
//! let controller = Controller::open(uart).await?;
//!
//! let mut data = [0u8; 1];
//! let mut response = ResponseBuffer::new(&mut data);
//! controller
//!     .request_with_response(
//!         &Request {
//!             target_category: 0x02,
//!             target_id: 0x00,
//!             instance_id: 0x00,
//!             command_id: 0x10,
//!             snc: true,
//!             payload: &[],
//!         },
//!         &mut response,
//!     )
//!     .await?;
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::events::{
    ack_loop, Event, EventDelay, Events, HandlerResult, ACK_QUEUE_LEN,
};
use crate::protocol::receiver::{Receiver, RECV_QUEUE_LEN};
use crate::protocol::wire::rqid;
use crate::request::{request_unlocked, Request, RequestCore, ResponseBuffer};
use crate::transport::Link;
use crate::writer::{spawn_writer_task, WriterHandle};

/// EC power-state commands (target category 0x01).
const CID_EC_SUSPEND: u8 = 0x15;
const CID_EC_RESUME: u8 = 0x16;
/// Event source management commands (target category 0x01).
const CID_ENABLE_EVENT_SOURCE: u8 = 0x0B;
const CID_DISABLE_EVENT_SOURCE: u8 = 0x0C;

/// Size of the read-loop chunk buffer.
const READ_CHUNK_LEN: usize = 256;

/// Controller lifecycle state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not initialized (or already shut down); all requests fail.
    Uninitialized = 0,
    /// Fully operational.
    Initialized = 1,
    /// EC suspended; requests fail until [`Controller::resume`].
    Suspended = 2,
}

impl State {
    fn from_u8(value: u8) -> State {
        match value {
            1 => State::Initialized,
            2 => State::Suspended,
            _ => State::Uninitialized,
        }
    }
}

/// State shared between the controller handles and the transport tasks.
pub(crate) struct Shared {
    /// Lifecycle state. SeqCst accesses pair the state transitions with
    /// resource publication and retirement, so the event paths always
    /// observe a consistent picture.
    pub(crate) state: Arc<AtomicU8>,
    /// Receiver reassembler; short critical sections only.
    pub(crate) receiver: StdMutex<Receiver>,
    pub(crate) writer: WriterHandle,
    pub(crate) events: Events,
}

/// Handle to an open SSH transport.
#[derive(Clone)]
pub struct Controller {
    shared: Arc<Shared>,
    /// Request engine state; the mutex is held for an entire request.
    core: Arc<Mutex<RequestCore>>,
    tasks: Arc<StdMutex<Vec<JoinHandle<()>>>>,
}

/// Lifetime linkage for a dependent client driver.
///
/// Holding the link keeps the controller instance alive; dropping it (or
/// calling [`Controller::consumer_remove`]) releases the linkage.
pub struct ConsumerLink {
    controller: Controller,
}

impl ConsumerLink {
    /// The linked controller.
    pub fn controller(&self) -> &Controller {
        &self.controller
    }
}

impl Controller {
    /// Open the transport on a configured link and wake the EC.
    ///
    /// Spawns the writer, ACK, and read-loop tasks, then issues the
    /// EC-resume request. If the EC does not answer, everything is torn
    /// down again and the error surfaces.
    pub async fn open<L: Link>(link: L) -> Result<Controller> {
        debug!("probing");

        let (read_half, write_half) = tokio::io::split(link);

        let (writer, writer_task) = spawn_writer_task(write_half);

        let state = Arc::new(AtomicU8::new(State::Uninitialized as u8));
        let (ack_tx, ack_rx) = mpsc::channel(ACK_QUEUE_LEN);
        let ack_task = tokio::spawn(ack_loop(ack_rx, state.clone(), writer.clone()));

        let (fifo_tx, fifo_rx) = mpsc::channel(RECV_QUEUE_LEN);
        let shared = Arc::new(Shared {
            state: state.clone(),
            receiver: StdMutex::new(Receiver::new(fifo_tx)),
            writer,
            events: Events::new(ack_tx),
        });

        let read_task = tokio::spawn(read_loop(read_half, shared.clone()));

        let controller = Controller {
            shared,
            core: Arc::new(Mutex::new(RequestCore::new(fifo_rx))),
            tasks: Arc::new(StdMutex::new(vec![writer_task, ack_task, read_task])),
        };

        // Everything is set up; publish the state before the first
        // exchange so the event paths see it.
        state.store(State::Initialized as u8, Ordering::SeqCst);

        let resume = {
            let mut core = controller.core.lock().await;
            controller.ec_command(&mut core, CID_EC_RESUME, "resume").await
        };
        if let Err(e) = resume {
            controller
                .shared
                .state
                .store(State::Uninitialized as u8, Ordering::SeqCst);
            controller.abort_tasks();
            return Err(e);
        }

        Ok(controller)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        State::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Issue a request that expects no response payload.
    pub async fn request(&self, rqst: &Request<'_>) -> Result<()> {
        self.do_request(rqst, None).await
    }

    /// Issue a request and copy its response payload into `response`.
    pub async fn request_with_response(
        &self,
        rqst: &Request<'_>,
        response: &mut ResponseBuffer<'_>,
    ) -> Result<()> {
        self.do_request(rqst, Some(response)).await
    }

    async fn do_request(
        &self,
        rqst: &Request<'_>,
        response: Option<&mut ResponseBuffer<'_>>,
    ) -> Result<()> {
        self.check_initialized()?;

        #[cfg(feature = "base-status-quirk")]
        if rqst.target_category == 0x11
            && rqst.instance_id == 0x00
            && rqst.command_id == 0x0D
            && rqst.snc
        {
            // Report the base as attached without asking the EC; on gen-5
            // platforms this request otherwise feeds a lid-notify loop.
            return match response {
                Some(buf) => buf.fill(&[0x01]),
                None => Err(Error::MissingResponseBuffer),
            };
        }

        let mut core = self.core.lock().await;
        // A suspend or shutdown may have won the lock in between; the
        // state is authoritative only while the lock is held.
        self.check_initialized()?;
        request_unlocked(&self.shared, &mut core, rqst, response).await
    }

    /// Enable an EC event source, routing its notifications to `rqid`.
    ///
    /// The `unknown` byte is forwarded verbatim; its semantics are
    /// EC-defined.
    pub async fn enable_event_source(&self, tc: u8, unknown: u8, rqid: u16) -> Result<()> {
        self.event_source_command(CID_ENABLE_EVENT_SOURCE, tc, unknown, rqid, "enabling")
            .await
    }

    /// Disable an EC event source.
    pub async fn disable_event_source(&self, tc: u8, unknown: u8, rqid: u16) -> Result<()> {
        self.event_source_command(CID_DISABLE_EVENT_SOURCE, tc, unknown, rqid, "disabling")
            .await
    }

    async fn event_source_command(
        &self,
        cid: u8,
        tc: u8,
        unknown: u8,
        event_rqid: u16,
        what: &str,
    ) -> Result<()> {
        // Only ids within the event spectrum can carry notifications.
        if !rqid::is_event(event_rqid) {
            return Err(Error::InvalidEventId(event_rqid));
        }
        self.check_initialized()?;

        let payload = [tc, unknown, (event_rqid & 0xFF) as u8, (event_rqid >> 8) as u8];
        let rqst = Request {
            target_category: 0x01,
            target_id: 0x00,
            instance_id: 0x00,
            command_id: cid,
            snc: true,
            payload: &payload,
        };

        let mut data = [0u8; 1];
        {
            let mut result = ResponseBuffer::new(&mut data);
            let mut core = self.core.lock().await;
            // Same re-check as in `do_request`: the state is authoritative
            // only while the lock is held.
            self.check_initialized()?;
            request_unlocked(&self.shared, &mut core, &rqst, Some(&mut result)).await?;
        }

        if data[0] != 0x00 {
            warn!("unexpected result while {} event source: {:#04x}", what, data[0]);
        }
        Ok(())
    }

    /// Register a handler for an event request-id.
    pub fn set_event_handler<F>(&self, event_rqid: u16, handler: F) -> Result<()>
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.check_open()?;
        self.shared
            .events
            .registry()
            .set(event_rqid, Arc::new(handler), None)
    }

    /// Register a handler together with a delay function that decides per
    /// event whether to run inline ([`EventDelay::Immediate`]) or queued.
    pub fn set_delayed_event_handler<F, D>(
        &self,
        event_rqid: u16,
        handler: F,
        delay: D,
    ) -> Result<()>
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
        D: Fn(&Event) -> EventDelay + Send + Sync + 'static,
    {
        self.check_open()?;
        self.shared
            .events
            .registry()
            .set(event_rqid, Arc::new(handler), Some(Arc::new(delay)))
    }

    /// Remove the handler for an event request-id.
    ///
    /// Returns only after no invocation of the handler is in flight any
    /// more.
    pub async fn remove_event_handler(&self, event_rqid: u16) -> Result<()> {
        self.check_open()?;
        self.shared.events.registry().remove(event_rqid)?;
        self.shared.events.flush_handlers().await;
        Ok(())
    }

    /// Add a consumer linkage for a dependent client driver.
    pub fn consumer_add(&self) -> Result<ConsumerLink> {
        self.check_open()?;
        Ok(ConsumerLink {
            controller: self.clone(),
        })
    }

    /// Release a consumer linkage.
    pub fn consumer_remove(link: ConsumerLink) {
        drop(link);
    }

    /// Suspend the EC and stop accepting requests.
    pub async fn suspend(&self) -> Result<()> {
        debug!("suspending");
        let mut core = self.core.lock().await;
        self.check_open()?;

        let status = self.ec_command(&mut core, CID_EC_SUSPEND, "suspend").await;
        if let Err(e) = &status {
            error!("failed to suspend EC: {}", e);
        }

        self.shared
            .state
            .store(State::Suspended as u8, Ordering::SeqCst);
        status
    }

    /// Resume the EC and accept requests again.
    pub async fn resume(&self) -> Result<()> {
        debug!("resuming");
        let mut core = self.core.lock().await;
        self.check_open()?;

        // Mark operational first; the resume exchange below already needs
        // the event paths live.
        self.shared
            .state
            .store(State::Initialized as u8, Ordering::SeqCst);

        let status = self.ec_command(&mut core, CID_EC_RESUME, "resume").await;
        if let Err(e) = &status {
            error!("failed to resume EC: {}", e);
        }
        status
    }

    /// Suspend the EC and tear the transport down. Best effort and
    /// idempotent; all failures are logged.
    pub async fn shutdown(&self) {
        // The guard serializes against in-flight requests; it is not held
        // across the queue drains below.
        {
            let mut core = self.core.lock().await;
            if self.state() == State::Uninitialized {
                return;
            }

            // Suspend the EC so it stops pushing events.
            if let Err(e) = self.ec_command(&mut core, CID_EC_SUSPEND, "suspend").await {
                error!("failed to suspend EC: {}", e);
            }

            // Requests still waiting on the lock re-check the state once
            // they acquire it and fail fast from here on.
            self.shared
                .state
                .store(State::Uninitialized as u8, Ordering::SeqCst);
        }

        // Events received up to now still get their handlers; ack work
        // observes the state change and stays off the link.
        self.shared.events.flush().await;
        self.shared.events.registry().clear();

        // Work dispatched while the registry was being cleared drains with
        // no handler reference left in flight.
        self.shared.events.flush().await;

        self.shared
            .receiver
            .lock()
            .expect("receiver lock poisoned")
            .discard();
        self.abort_tasks();
    }

    /// Issue one of the internal EC power commands and check its status
    /// byte.
    async fn ec_command(&self, core: &mut RequestCore, cid: u8, what: &str) -> Result<()> {
        let rqst = Request {
            target_category: 0x01,
            target_id: 0x00,
            instance_id: 0x00,
            command_id: cid,
            snc: true,
            payload: &[],
        };

        let mut data = [0u8; 1];
        {
            let mut result = ResponseBuffer::new(&mut data);
            request_unlocked(&self.shared, core, &rqst, Some(&mut result)).await?;
        }

        if data[0] != 0x00 {
            warn!("unexpected result while trying to {} EC: {:#04x}", what, data[0]);
        }
        Ok(())
    }

    fn check_initialized(&self) -> Result<()> {
        match self.state() {
            State::Initialized => Ok(()),
            State::Uninitialized => {
                warn!("rqst: embedded controller is uninitialized");
                Err(Error::Uninitialized)
            }
            State::Suspended => {
                warn!("rqst: embedded controller is suspended");
                Err(Error::Suspended)
            }
        }
    }

    /// Like [`check_initialized`](Self::check_initialized), but suspended
    /// controllers still pass (subscriptions and consumer links survive
    /// suspend).
    fn check_open(&self) -> Result<()> {
        match self.state() {
            State::Uninitialized => Err(Error::Uninitialized),
            _ => Ok(()),
        }
    }

    fn abort_tasks(&self) {
        let mut tasks = self.tasks.lock().expect("task list lock poisoned");
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

/// Read loop: pull chunks off the link, reassemble, dispatch events.
async fn read_loop<R: AsyncRead + Unpin>(mut reader: R, shared: Arc<Shared>) {
    let mut chunk = vec![0u8; READ_CHUNK_LEN];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break, // link closed
            Ok(n) => n,
            Err(e) => {
                error!("recv: read loop error: {}", e);
                break;
            }
        };

        // Keep the critical section short: reassemble under the lock,
        // dispatch the extracted events outside it.
        let events = {
            let mut receiver = shared.receiver.lock().expect("receiver lock poisoned");
            receiver.receive(&chunk[..n])
        };

        for msg in events {
            shared.events.dispatch(msg).await;
        }
    }
}
