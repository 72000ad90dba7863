//! Link adapter - the seam onto the externally configured byte-duplex link.
//!
//! The transport core is link-agnostic: UART discovery and configuration
//! (baud rate, RTS/CTS flow control, parity) happen outside this crate, and
//! the configured device is handed in as any duplex byte stream. In-memory
//! duplex pairs ([`tokio::io::duplex`]) satisfy the same bound, which is how
//! the test suite drives the transport without hardware.
//!
//! # Example
//!
//! ```ignore
//! use sshub::Controller;
//!
//! let uart = open_and_configure_uart()?; // external link configurator
//! let controller = Controller::open(uart).await?;
//! ```

use tokio::io::{AsyncRead, AsyncWrite};

/// A configured byte-duplex link to the embedded controller.
///
/// Blanket-implemented for every async duplex stream, so callers never
/// implement this by hand.
pub trait Link: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Link for T {}
