//! # sshub
//!
//! Host-side transport driver for the Surface Serial Hub (SSH), the framed,
//! sequenced, retried request/response protocol spoken over a UART to the
//! embedded controller (EC) that aggregates keyboard, battery, thermal, and
//! lid subsystems on Surface devices.
//!
//! Client drivers issue logical requests; the transport serializes them
//! into framed bytes, guarantees delivery with retry and acknowledgement,
//! reassembles and validates responses, and dispatches asynchronous event
//! notifications to registered handlers. Payloads are opaque here: what a
//! command means is between the client driver and the EC firmware.
//!
//! ## Architecture
//!
//! - **Outbound**: client -> [`Controller`] -> request engine -> frame
//!   codec -> link.
//! - **Inbound**: link -> receiver reassembler -> waiting request OR event
//!   dispatch -> handler.
//!
//! The link itself (UART discovery, baud rate, flow control, parity) is
//! configured externally and handed to [`Controller::open`] as any async
//! byte duplex; see [`transport`].
//!
//! ## Example
//!
//! ```ignore
//! use sshub::{Controller, Request};
//!
//! #[tokio::main]
//! async fn main() -> sshub::Result<()> {
//!     let uart = configure_uart()?; // external
//!     let controller = Controller::open(uart).await?;
//!
//!     controller.set_event_handler(KEYBOARD_RQID, |event| {
//!         println!("key data: {:?}", event.payload);
//!         Ok(())
//!     })?;
//!     controller.enable_event_source(0x08, 0x01, KEYBOARD_RQID).await?;
//!
//!     controller.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod controller;
pub mod error;
pub mod events;
pub mod protocol;
pub mod transport;

mod request;
mod writer;

pub use controller::{ConsumerLink, Controller, State};
pub use error::{Error, Result};
pub use events::{Event, EventDelay, HandlerResult};
pub use protocol::wire::MAX_PAYLOAD;
pub use request::{Request, ResponseBuffer, NUM_RETRY, READ_TIMEOUT, WRITE_TIMEOUT};
