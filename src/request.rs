//! Request engine - the sequenced, retried request/response exchange.
//!
//! A request is encoded once into a reusable scratch buffer and flushed up
//! to [`NUM_RETRY`] times; the peer deduplicates retransmissions by their
//! control sequence, so retries must be byte-identical. Every try waits for
//! the receiver to deliver an ACK (proceed) or RETRY (send again); after the
//! ACK both counters advance and, for requests that expect one, the
//! response payload is copied into the caller's buffer and acknowledged.
//!
//! The whole exchange runs under the controller mutex, which is what makes
//! "at most one outstanding request" hold and lets the counters, the
//! scratch buffer and the receiver expectation form one atomic update.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::error;

use crate::controller::Shared;
use crate::error::{Error, Result};
use crate::protocol::receiver::FifoPacket;
use crate::protocol::wire::{self, frame_type, rqid, MAX_MESSAGE, MAX_PAYLOAD};
use crate::writer::WriterHandle;

/// Timeout for flushing one message to the link.
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);
/// Timeout for one wait on the receiver.
pub const READ_TIMEOUT: Duration = Duration::from_millis(1000);
/// Number of send attempts before a request is given up.
pub const NUM_RETRY: usize = 3;

/// A logical request to the embedded controller.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    /// Target category of the addressed EC subsystem.
    pub target_category: u8,
    /// Target id. Carried for addressing parity with newer EC generations;
    /// the gen-5 command frame has no slot for it, responses are matched by
    /// request id alone.
    pub target_id: u8,
    /// Instance id within the target category.
    pub instance_id: u8,
    /// Command id.
    pub command_id: u8,
    /// Send-needs-response: expect a response frame in addition to the ACK.
    pub snc: bool,
    /// Request payload, at most [`MAX_PAYLOAD`] bytes.
    pub payload: &'a [u8],
}

/// Caller-owned buffer receiving a response payload.
///
/// Wraps a caller-provided region; after a successful exchange
/// [`as_slice`](Self::as_slice) yields the filled part.
#[derive(Debug)]
pub struct ResponseBuffer<'a> {
    data: &'a mut [u8],
    len: usize,
}

impl<'a> ResponseBuffer<'a> {
    /// Wrap a data region. Its length is the buffer capacity.
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data, len: 0 }
    }

    /// Buffer capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Filled length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been filled in.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The filled part of the buffer.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Copy a response payload in and set the filled length.
    pub(crate) fn fill(&mut self, src: &[u8]) -> Result<()> {
        if self.capacity() < src.len() {
            return Err(Error::ResponseTooSmall {
                cap: self.capacity(),
                len: src.len(),
            });
        }
        self.data[..src.len()].copy_from_slice(src);
        self.len = src.len();
        Ok(())
    }
}

/// Counters and receive queue of the request engine. Lives behind the
/// controller mutex.
pub(crate) struct RequestCore {
    /// Control sequence of the next request.
    seq: u8,
    /// Request counter; shifted into the wire id space on encode.
    rqid: u16,
    /// Reusable encode buffer.
    scratch: Vec<u8>,
    /// Validated frames delivered by the receiver.
    fifo: mpsc::Receiver<FifoPacket>,
}

impl RequestCore {
    pub fn new(fifo: mpsc::Receiver<FifoPacket>) -> Self {
        Self {
            seq: 0,
            rqid: 0,
            scratch: Vec::with_capacity(MAX_MESSAGE),
            fifo,
        }
    }

    /// Drop packets left over from a previous exchange.
    fn drain(&mut self) {
        while self.fifo.try_recv().is_ok() {}
    }
}

/// Execute one request. The caller holds the controller mutex.
pub(crate) async fn request_unlocked(
    shared: &Shared,
    core: &mut RequestCore,
    rqst: &Request<'_>,
    response: Option<&mut ResponseBuffer<'_>>,
) -> Result<()> {
    if rqst.payload.len() > MAX_PAYLOAD {
        error!("rqst: request payload too large");
        return Err(Error::PayloadTooLarge {
            len: rqst.payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    if rqst.snc && response.is_none() {
        return Err(Error::MissingResponseBuffer);
    }

    // Encode the message once; retries resend these exact bytes.
    let wire_rqid = rqid::to_wire(core.rqid);
    core.scratch.clear();
    wire::write_command_message(&mut core.scratch, core.seq, wire_rqid, rqst);
    let message = Bytes::copy_from_slice(&core.scratch);

    shared
        .receiver
        .lock()
        .expect("receiver lock poisoned")
        .restart(rqst.snc, core.seq, wire_rqid);
    core.drain();

    let result = run_exchange(shared, core, rqst, response, message).await;

    // Back to idle no matter how the exchange went; late frames for this
    // request are discarded by the expectation checks.
    shared
        .receiver
        .lock()
        .expect("receiver lock poisoned")
        .discard();
    core.drain();

    result
}

async fn run_exchange(
    shared: &Shared,
    core: &mut RequestCore,
    rqst: &Request<'_>,
    response: Option<&mut ResponseBuffer<'_>>,
    message: Bytes,
) -> Result<()> {
    // Send the command, try to get an ACK for it.
    let mut acked = false;
    let mut answered = false;

    for _try in 0..NUM_RETRY {
        flush_link(&shared.writer, message.clone()).await?;

        match timeout(READ_TIMEOUT, core.fifo.recv()).await {
            Ok(Some(packet)) => {
                answered = true;
                if packet.kind == frame_type::ACK {
                    acked = true;
                    break;
                }
                // RETRY (or an unexpected type): send again.
            }
            Ok(None) => return Err(Error::Closed),
            Err(_) => {} // timed out, next try
        }
    }

    if !acked {
        error!("rqst: communication failed {} times, giving up", NUM_RETRY);
        return Err(if answered {
            Error::RetriesExhausted
        } else {
            Error::Timeout
        });
    }

    core.seq = core.seq.wrapping_add(1);
    core.rqid = core.rqid.wrapping_add(1);

    // Get the command response, if one was asked for.
    if let Some(buf) = response {
        if rqst.snc {
            let packet = match timeout(READ_TIMEOUT, core.fifo.recv()).await {
                Ok(Some(packet)) => packet,
                Ok(None) => return Err(Error::Closed),
                Err(_) => {
                    error!("rqst: communication timed out");
                    return Err(Error::Timeout);
                }
            };

            buf.fill(&packet.payload)?;

            // Acknowledge the response, echoing its control sequence.
            let ack = Bytes::copy_from_slice(&wire::build_ack_message(packet.seq));
            flush_link(&shared.writer, ack).await?;
        }
    }

    Ok(())
}

/// Flush one message through the writer, bounded by [`WRITE_TIMEOUT`].
async fn flush_link(writer: &WriterHandle, bytes: Bytes) -> Result<()> {
    match timeout(WRITE_TIMEOUT, writer.flush(bytes)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout),
    }
}
