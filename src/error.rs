//! Error types for sshub.

use thiserror::Error;

/// Main error type for all transport operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The controller has not been initialized (or has been shut down).
    #[error("embedded controller is uninitialized")]
    Uninitialized,

    /// The controller is suspended; requests are rejected until resume.
    #[error("embedded controller is suspended")]
    Suspended,

    /// Request payload exceeds the wire format limit.
    #[error("request payload too large ({len} > {max})")]
    PayloadTooLarge { len: usize, max: usize },

    /// Request id does not lie within the event id space.
    #[error("request id {0:#06x} is not a valid event id")]
    InvalidEventId(u16),

    /// The request expects a response but no response buffer was provided.
    #[error("response expected but no response buffer provided")]
    MissingResponseBuffer,

    /// The response payload does not fit into the caller's buffer.
    #[error("response buffer too small ({cap} < {len})")]
    ResponseTooSmall { cap: usize, len: usize },

    /// Writing to the underlying link failed.
    #[error("link write failed: {0}")]
    LinkWrite(#[source] std::io::Error),

    /// The peer did not answer within the configured timeout(s).
    #[error("communication timed out")]
    Timeout,

    /// The peer kept answering with non-ACK frames for every try.
    #[error("communication failed, retries exhausted")]
    RetriesExhausted,

    /// The transport tasks are gone (link closed or controller torn down).
    #[error("transport closed")]
    Closed,
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
