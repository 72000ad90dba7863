//! Protocol module - wire format and stream reassembly.
//!
//! This module implements the binary SSH framing:
//! - SYN/TERM delimited, CRC-protected control and command frames
//! - the receiver reassembler turning an arbitrarily chunked byte stream
//!   into validated messages
//! - the request-id space split between host requests and EC events

pub mod wire;

pub(crate) mod receiver;

pub use wire::{CmdFrame, CtrlFrame, MAX_MESSAGE, MAX_PAYLOAD};
