//! Dedicated writer task for the outbound half of the link.
//!
//! All wire output (requests, response ACKs, event ACKs) funnels through a
//! single task fed by an mpsc channel, so messages are written whole and in
//! submission order without a lock around the link. Each message carries a
//! completion channel: the sender learns when its bytes have been flushed
//! to the link, which is what the request engine's write timeout is
//! measured against.
//!
//! ```text
//! request engine ─┐
//! ack queue      ─┴─► mpsc::Sender<OutboundMessage> ─► writer task ─► link
//! ```

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::trace;

use crate::error::{Error, Result};

/// Capacity of the writer channel. Writers are few (the request engine and
/// the ACK task) and always await completion, so this never fills in
/// practice.
const WRITER_QUEUE_LEN: usize = 32;

/// A message queued for transmission.
struct OutboundMessage {
    bytes: Bytes,
    done: oneshot::Sender<std::io::Result<()>>,
}

/// Handle for submitting messages to the writer task.
///
/// Cheaply cloneable; clones share the same ordered queue.
#[derive(Clone)]
pub(crate) struct WriterHandle {
    tx: mpsc::Sender<OutboundMessage>,
}

impl WriterHandle {
    /// Write a whole message to the link and wait until it has been
    /// flushed.
    ///
    /// Callers bound this with their own timeout; the handle itself never
    /// gives up.
    pub async fn flush(&self, bytes: Bytes) -> Result<()> {
        let (done, done_rx) = oneshot::channel();
        self.tx
            .send(OutboundMessage { bytes, done })
            .await
            .map_err(|_| Error::Closed)?;

        match done_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::LinkWrite(e)),
            Err(_) => Err(Error::Closed),
        }
    }
}

/// Spawn the writer task for the link's write half.
pub(crate) fn spawn_writer_task<W>(writer: W) -> (WriterHandle, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(WRITER_QUEUE_LEN);
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

/// Main writer loop - writes queued messages one after another.
async fn writer_loop<W>(mut rx: mpsc::Receiver<OutboundMessage>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        trace!(len = msg.bytes.len(), "send: writing message");
        let result = write_message(&mut writer, &msg.bytes).await;
        // The receiver half may be gone if the caller timed out; the write
        // itself still happened in order.
        let _ = msg.done.send(result);
    }
}

async fn write_message<W>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}
