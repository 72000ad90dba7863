//! Receiver reassembler.
//!
//! Converts the best-effort inbound byte stream (arbitrary chunking) into
//! validated logical messages. Bytes accumulate in a fixed evaluation
//! buffer; [`Receiver::receive`] repeatedly evaluates the buffered prefix,
//! which either needs more bytes, consumes a complete message, or discards
//! corrupted input. Consumed bytes are compacted away so the buffer always
//! holds an unprocessed prefix of the stream.
//!
//! Validated ACK/RETRY frames and matching responses are forwarded to the
//! request engine through a bounded packet queue; the queue doubles as the
//! completion signal the engine waits on. Event messages (classified by
//! their request id) are returned to the caller for dispatch outside the
//! receiver lock.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::events::Event;
use crate::protocol::wire::{
    self, frame_type, rqid, CmdFrame, CtrlFrame, LEN_CMD_FRAME, LEN_CRC, LEN_CTRL, LEN_SYN,
    MAX_MESSAGE, MSG_LEN_CMD_BASE, MSG_LEN_CTRL, OFFS_CMD, OFFS_CMD_PAYLOAD, OFFS_CTRL,
    OFFS_CTRL_CRC, OFFS_TERM,
};

/// Capacity of the packet queue toward the request engine.
///
/// Bounded so a misbehaving peer cannot exhaust memory; frames that do not
/// fit are dropped with a warning and the engine recovers via retry or
/// timeout.
pub(crate) const RECV_QUEUE_LEN: usize = 16;

/// A validated frame handed to the request engine.
#[derive(Debug, Clone)]
pub(crate) struct FifoPacket {
    /// Frame type (ACK, RETRY, or CMD for responses).
    pub kind: u8,
    /// Control sequence of the frame.
    pub seq: u8,
    /// Response payload; empty for control frames.
    pub payload: Bytes,
}

/// An event message extracted from the stream, dispatched by the caller.
#[derive(Debug)]
pub(crate) struct EventMsg {
    /// Control sequence to echo in the event ACK.
    pub seq: u8,
    pub event: Event,
}

/// Per-request receiver substate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiverState {
    /// No outstanding request; only events are accepted.
    Discard,
    /// Waiting for the ACK/RETRY answering our request.
    AwaitingControl,
    /// ACK seen; waiting for the response command message.
    AwaitingCommand,
}

/// What the outstanding request expects from the stream.
#[derive(Debug, Clone, Copy, Default)]
struct Expectation {
    /// Whether a payload response follows the ACK.
    pld: bool,
    /// Control sequence of the outstanding request.
    seq: u8,
    /// Wire request id of the outstanding request.
    rqid: u16,
}

pub(crate) struct Receiver {
    state: ReceiverState,
    expect: Expectation,
    buf: Box<[u8]>,
    len: usize,
    tx: mpsc::Sender<FifoPacket>,
}

impl Receiver {
    pub fn new(tx: mpsc::Sender<FifoPacket>) -> Self {
        Self {
            state: ReceiverState::Discard,
            expect: Expectation::default(),
            buf: vec![0u8; MAX_MESSAGE].into_boxed_slice(),
            len: 0,
            tx,
        }
    }

    /// Arm the receiver for an outbound request.
    ///
    /// Drops any leftover bytes from previous exchanges; the stream
    /// resynchronizes on the next SYN.
    pub fn restart(&mut self, expects_response: bool, seq: u8, rqid: u16) {
        self.state = ReceiverState::AwaitingControl;
        self.expect = Expectation {
            pld: expects_response,
            seq,
            rqid,
        };
        self.len = 0;
    }

    /// Return to the idle state; only events are accepted.
    pub fn discard(&mut self) {
        self.state = ReceiverState::Discard;
        self.len = 0;
    }

    /// Feed an inbound chunk and extract everything it completes.
    ///
    /// Extracted events are returned for dispatch by the caller; control
    /// frames and responses go to the request engine queue.
    pub fn receive(&mut self, mut data: &[u8]) -> Vec<EventMsg> {
        let mut events = Vec::new();

        while !data.is_empty() {
            let fit = (self.buf.len() - self.len).min(data.len());
            self.buf[self.len..self.len + fit].copy_from_slice(&data[..fit]);
            self.len += fit;
            data = &data[fit..];

            let consumed = self.evaluate(&mut events);
            if fit == 0 && consumed == 0 {
                // A full buffer always holds an evaluable or discardable
                // prefix, so this is unreachable; guard against looping
                // anyway.
                warn!("recv: evaluation buffer stuck, dropping {} bytes", data.len());
                break;
            }
        }

        events
    }

    /// Evaluate the buffered prefix until more bytes are needed, then
    /// compact. Returns the total number of consumed bytes.
    fn evaluate(&mut self, events: &mut Vec<EventMsg>) -> usize {
        let mut offs = 0;
        while offs < self.len {
            let n = self.eval_once(offs, events);
            if n == 0 {
                break; // need more bytes
            }
            offs += n;
        }

        if offs > 0 {
            self.buf.copy_within(offs..self.len, 0);
            self.len -= offs;
        }
        offs
    }

    /// Evaluate one message at `offs`. Returns 0 if more bytes are needed,
    /// otherwise the number of bytes to consume (handled or discarded).
    fn eval_once(&mut self, offs: usize, events: &mut Vec<EventMsg>) -> usize {
        let size = self.len - offs;

        // We need at least a control frame to decide what to do.
        if size < LEN_SYN + LEN_CTRL {
            return 0;
        }

        let window = &self.buf[offs..self.len];
        if !wire::is_valid_syn(window) {
            warn!("recv: invalid start of message");
            return size; // discard everything
        }

        let ctrl = match CtrlFrame::parse(&window[OFFS_CTRL..]) {
            Some(ctrl) => ctrl,
            None => return 0,
        };

        match ctrl.ty {
            frame_type::ACK | frame_type::RETRY => self.eval_ctrl_msg(offs, ctrl, size),
            frame_type::CMD => self.eval_cmd_msg(offs, ctrl, size, events),
            ty => {
                warn!("recv: unknown frame type {ty:#04x}");
                size // discard everything
            }
        }
    }

    /// Evaluate an ACK/RETRY message.
    fn eval_ctrl_msg(&mut self, offs: usize, ctrl: CtrlFrame, size: usize) -> usize {
        if size < MSG_LEN_CTRL {
            return 0;
        }

        let window = &self.buf[offs..self.len];

        if !wire::is_valid_term(&window[OFFS_TERM..]) {
            warn!("recv: invalid end of message");
            return size; // discard everything
        }

        if !wire::is_valid_crc(&window[OFFS_CTRL..OFFS_CTRL_CRC], &window[OFFS_CTRL_CRC..]) {
            warn!("recv: invalid checksum (ctrl)");
            return MSG_LEN_CTRL; // only discard this message
        }

        // Check if we expect the message at all, and whether it answers
        // our outstanding request.
        if self.state != ReceiverState::AwaitingControl {
            debug!("recv: discarding message: ctrl not expected");
            return MSG_LEN_CTRL;
        }
        if ctrl.ty == frame_type::ACK && ctrl.seq != self.expect.seq {
            debug!("recv: discarding message: ack does not match");
            return MSG_LEN_CTRL;
        }

        let packet = FifoPacket {
            kind: ctrl.ty,
            seq: ctrl.seq,
            payload: Bytes::new(),
        };
        if self.tx.try_send(packet).is_err() {
            warn!("recv: dropping frame: no space in receive queue (type {:#04x})", ctrl.ty);
            return MSG_LEN_CTRL;
        }

        if ctrl.ty == frame_type::ACK {
            self.state = if self.expect.pld {
                ReceiverState::AwaitingCommand
            } else {
                ReceiverState::Discard
            };
        }

        MSG_LEN_CTRL
    }

    /// Evaluate a command message (response or event).
    fn eval_cmd_msg(
        &mut self,
        offs: usize,
        ctrl: CtrlFrame,
        size: usize,
        events: &mut Vec<EventMsg>,
    ) -> usize {
        if size < LEN_SYN + LEN_CTRL + LEN_CRC {
            return 0;
        }

        {
            let window = &self.buf[offs..self.len];
            // The message length comes from the control frame, so nothing
            // downstream can be trusted before its CRC holds.
            if !wire::is_valid_crc(&window[OFFS_CTRL..OFFS_CTRL_CRC], &window[OFFS_CTRL_CRC..]) {
                warn!("recv: invalid checksum (cmd-ctrl)");
                return size; // length untrusted, discard everything
            }
        }

        if (ctrl.len as usize) < LEN_CMD_FRAME {
            warn!("recv: command message shorter than a command frame");
            return size; // discard everything
        }

        let msg_len = MSG_LEN_CMD_BASE + ctrl.len as usize;
        if size < msg_len {
            return 0;
        }

        let window = &self.buf[offs..offs + msg_len];
        let cmd_end = OFFS_CMD + ctrl.len as usize;

        if window[OFFS_CMD] != frame_type::CMD {
            warn!(
                "recv: expected command frame type but got {:#04x}",
                window[OFFS_CMD]
            );
            return size; // discard everything
        }

        if !wire::is_valid_crc(&window[OFFS_CMD..cmd_end], &window[cmd_end..]) {
            // The length itself was validated above, so only this message
            // needs to go.
            warn!("recv: invalid checksum (cmd-pld)");
            return msg_len;
        }

        let cmd = match CmdFrame::parse(&window[OFFS_CMD..cmd_end]) {
            Some(cmd) => cmd,
            None => return 0,
        };
        let payload = Bytes::copy_from_slice(&window[OFFS_CMD_PAYLOAD..cmd_end]);

        // Unsolicited event notification? Those are accepted in any state.
        if rqid::is_event(cmd.request_id) {
            events.push(EventMsg {
                seq: ctrl.seq,
                event: Event {
                    rqid: cmd.request_id,
                    target_category: cmd.target_category,
                    instance_id: cmd.instance_id,
                    command_id: cmd.command_id,
                    payload,
                },
            });
            return msg_len;
        }

        if self.state != ReceiverState::AwaitingCommand {
            debug!("recv: discarding message: command not expected");
            return msg_len;
        }
        if self.expect.rqid != cmd.request_id {
            debug!("recv: discarding message: command not a match");
            return msg_len;
        }

        let packet = FifoPacket {
            kind: frame_type::CMD,
            seq: ctrl.seq,
            payload,
        };
        if self.tx.try_send(packet).is_err() {
            warn!("recv: dropping frame: no space in receive queue (type {:#04x})", frame_type::CMD);
            return msg_len;
        }

        self.state = ReceiverState::Discard;
        msg_len
    }
}
