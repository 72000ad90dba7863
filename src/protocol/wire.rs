//! Wire format encoding and decoding.
//!
//! Implements the SSH message framing:
//! ```text
//! Request:  SYN ctrl crc(ctrl) cmd payload crc(cmd+payload)
//! Ack:      SYN ctrl crc(ctrl) TERM
//! Retry:    SYN ctrl crc(ctrl) TERM
//! Response: SYN ctrl crc(ctrl) cmd payload crc(cmd+payload)
//! ```
//! with SYN = `AA 55`, TERM = `FF FF`, and CRC-16/CCITT-FALSE stored little
//! endian immediately after the covered region.
//!
//! Control frame (4 bytes): `type len pad=00 seq`. The `len` field counts
//! command frame plus payload, excluding both CRCs.
//!
//! Command frame (8 bytes): `type=80 tc f1 f2 iid rqid_lo rqid_hi cid`,
//! followed by the payload. All multi-byte integers are little endian.

use crc::{Crc, CRC_16_IBM_3740};

use crate::request::Request;

/// Message start marker.
pub const SYN: [u8; 2] = [0xAA, 0x55];

/// Short-message end marker (ACK/RETRY messages only).
pub const TERM: [u8; 2] = [0xFF, 0xFF];

/// Byte length of the SYN marker.
pub const LEN_SYN: usize = 2;
/// Byte length of the TERM marker.
pub const LEN_TERM: usize = 2;
/// Byte length of one CRC trailer.
pub const LEN_CRC: usize = 2;
/// Byte length of a control frame (command header, ACK, or RETRY).
pub const LEN_CTRL: usize = 4;
/// Byte length of a command frame, without payload.
pub const LEN_CMD_FRAME: usize = 8;

/// Offset of the control frame within a message.
pub const OFFS_CTRL: usize = LEN_SYN;
/// Offset of the control-frame CRC.
pub const OFFS_CTRL_CRC: usize = OFFS_CTRL + LEN_CTRL;
/// Offset of the TERM marker in an ACK/RETRY message.
pub const OFFS_TERM: usize = OFFS_CTRL_CRC + LEN_CRC;
/// Offset of the command frame in a command message (same slot as TERM).
pub const OFFS_CMD: usize = OFFS_TERM;
/// Offset of the payload in a command message.
pub const OFFS_CMD_PAYLOAD: usize = OFFS_CMD + LEN_CMD_FRAME;

/// Total length of an ACK/RETRY message.
pub const MSG_LEN_CTRL: usize = LEN_SYN + LEN_CTRL + LEN_CRC + LEN_TERM;
/// Length of a command message without command frame and payload.
pub const MSG_LEN_CMD_BASE: usize = LEN_SYN + LEN_CTRL + LEN_CRC + LEN_CRC;

/// Maximum request/response payload. The control-frame `len` field is a
/// `u8` counting command frame plus payload.
pub const MAX_PAYLOAD: usize = u8::MAX as usize - LEN_CMD_FRAME;

/// Maximum size of any message on the wire.
pub const MAX_MESSAGE: usize =
    LEN_SYN + LEN_CTRL + LEN_CRC + LEN_CMD_FRAME + MAX_PAYLOAD + LEN_CRC;

/// Frame type constants for the protocol.
pub mod frame_type {
    /// Command message (request, response, or event).
    pub const CMD: u8 = 0x80;
    /// Acknowledgement of the last command message.
    pub const ACK: u8 = 0x40;
    /// Retransmission request from the peer.
    pub const RETRY: u8 = 0x04;
}

/// Command-frame flag bytes. Requests carry `(0x01, 0x00)`, responses the
/// mirrored `(0x00, 0x01)`.
pub const FLAG1_REQUEST: u8 = 0x01;
pub const FLAG2_REQUEST: u8 = 0x00;
pub const FLAG1_RESPONSE: u8 = 0x00;
pub const FLAG2_RESPONSE: u8 = 0x01;

/// Request-id space helpers.
///
/// The low [`EVENT_BITS`](rqid::EVENT_BITS) bits of the 16-bit id space are
/// reserved for unsolicited event ids; everything the host assigns to its
/// own requests is the request counter shifted above that range. Id 0 is
/// not valid, id 1 is reserved for the Surface Laptop keyboard events.
pub mod rqid {
    /// Number of low bits reserved for event ids.
    pub const EVENT_BITS: u16 = 5;
    /// Mask covering the event id range.
    pub const EVENT_MASK: u16 = (1 << EVENT_BITS) - 1;
    /// Number of distinct event ids (1..=EVENT_MASK).
    pub const NUM_EVENT_IDS: usize = EVENT_MASK as usize;
    /// Event id reserved for the Surface Laptop keyboard.
    pub const RESERVED_KEYBOARD: u16 = 1;

    /// Wire request id for a host request counter value.
    #[inline]
    pub fn to_wire(counter: u16) -> u16 {
        counter << EVENT_BITS
    }

    /// Check whether an id lies within the event id space.
    #[inline]
    pub fn is_event(rqid: u16) -> bool {
        rqid != 0 && (rqid | EVENT_MASK) == EVENT_MASK
    }
}

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// CRC-16/CCITT-FALSE over `data` (poly 0x1021, init 0xFFFF, no reflection,
/// no final XOR).
#[inline]
pub fn crc(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Check for the SYN marker at the start of `buf`.
#[inline]
pub fn is_valid_syn(buf: &[u8]) -> bool {
    buf.len() >= LEN_SYN && buf[..LEN_SYN] == SYN
}

/// Check for the TERM marker at the start of `buf`.
#[inline]
pub fn is_valid_term(buf: &[u8]) -> bool {
    buf.len() >= LEN_TERM && buf[..LEN_TERM] == TERM
}

/// Check the little-endian CRC trailer at the start of `trailer` against
/// the covered region.
#[inline]
pub fn is_valid_crc(covered: &[u8], trailer: &[u8]) -> bool {
    let expected = crc(covered).to_le_bytes();
    trailer.len() >= LEN_CRC && trailer[..LEN_CRC] == expected
}

/// Decoded control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtrlFrame {
    /// Frame type (see [`frame_type`]).
    pub ty: u8,
    /// Command frame plus payload length, excluding CRCs.
    pub len: u8,
    /// Control sequence.
    pub seq: u8,
}

impl CtrlFrame {
    /// Decode a control frame from the start of `buf`.
    ///
    /// Returns `None` if the buffer is too short.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < LEN_CTRL {
            return None;
        }
        Some(Self {
            ty: buf[0],
            len: buf[1],
            seq: buf[3],
        })
    }

    /// Encode the control frame (4 bytes, pad byte zero).
    pub fn encode(&self) -> [u8; LEN_CTRL] {
        [self.ty, self.len, 0x00, self.seq]
    }
}

/// Decoded command frame (without payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdFrame {
    /// Target category of the addressed EC subsystem.
    pub target_category: u8,
    /// Instance id within the target category.
    pub instance_id: u8,
    /// Request id, little endian on the wire.
    pub request_id: u16,
    /// Command id.
    pub command_id: u8,
}

impl CmdFrame {
    /// Decode a command frame from the start of `buf`.
    ///
    /// The frame type byte is not interpreted here; the receiver validates
    /// it before calling. Returns `None` if the buffer is too short.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < LEN_CMD_FRAME {
            return None;
        }
        Some(Self {
            target_category: buf[1],
            instance_id: buf[4],
            request_id: u16::from_le_bytes([buf[5], buf[6]]),
            command_id: buf[7],
        })
    }
}

/// Append a complete request message to `buf` and return the written
/// length.
///
/// The message is fully deterministic in its inputs: encoding the same
/// request with the same `seq` and `rqid` again produces identical bytes,
/// which is what retransmissions rely on.
pub fn write_command_message(buf: &mut Vec<u8>, seq: u8, rqid: u16, rqst: &Request<'_>) -> usize {
    let start = buf.len();

    buf.extend_from_slice(&SYN);

    let ctrl = CtrlFrame {
        ty: frame_type::CMD,
        len: (LEN_CMD_FRAME + rqst.payload.len()) as u8,
        seq,
    };
    let ctrl_bytes = ctrl.encode();
    buf.extend_from_slice(&ctrl_bytes);
    buf.extend_from_slice(&crc(&ctrl_bytes).to_le_bytes());

    let cmd_start = buf.len();
    buf.push(frame_type::CMD);
    buf.push(rqst.target_category);
    buf.push(FLAG1_REQUEST);
    buf.push(FLAG2_REQUEST);
    buf.push(rqst.instance_id);
    buf.extend_from_slice(&rqid.to_le_bytes());
    buf.push(rqst.command_id);
    buf.extend_from_slice(rqst.payload);
    let cmd_crc = crc(&buf[cmd_start..]);
    buf.extend_from_slice(&cmd_crc.to_le_bytes());

    buf.len() - start
}

/// Build a complete request message as a new vector.
pub fn build_command_message(seq: u8, rqid: u16, rqst: &Request<'_>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MSG_LEN_CMD_BASE + LEN_CMD_FRAME + rqst.payload.len());
    write_command_message(&mut buf, seq, rqid, rqst);
    buf
}

/// Build a complete ACK message for the given control sequence.
pub fn build_ack_message(seq: u8) -> [u8; MSG_LEN_CTRL] {
    let mut buf = [0u8; MSG_LEN_CTRL];
    buf[..LEN_SYN].copy_from_slice(&SYN);

    let ctrl = CtrlFrame {
        ty: frame_type::ACK,
        len: 0x00,
        seq,
    };
    buf[OFFS_CTRL..OFFS_CTRL_CRC].copy_from_slice(&ctrl.encode());

    let ctrl_crc = crc(&buf[OFFS_CTRL..OFFS_CTRL_CRC]);
    buf[OFFS_CTRL_CRC..OFFS_TERM].copy_from_slice(&ctrl_crc.to_le_bytes());

    buf[OFFS_TERM..].copy_from_slice(&TERM);
    buf
}
