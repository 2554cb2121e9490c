//! Error types for the skycam library.

use std::fmt;

/// Errors that can occur in the skycam library.
///
/// Only setup and lifecycle failures are reported through this type.
/// Per-unit failures (a frame with a bad checksum, an oversized video
/// frame, a viewer whose socket died) are counted and logged by the task
/// that owns them and never propagate to the caller.
///
/// - **Transport**: [`Io`](Self::Io), [`Serial`](Self::Serial).
/// - **Protocol**: [`Parse`](Self::Parse) for malformed RTSP/HTTP requests.
/// - **Lifecycle**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning).
/// - **Capture**: [`FrameSourceExhausted`](Self::FrameSourceExhausted).
#[derive(Debug, thiserror::Error)]
pub enum SkycamError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial device could not be opened or configured.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Failed to parse a request message.
    #[error("parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The component has not been started yet.
    #[error("not started")]
    NotStarted,

    /// `start` was called while already running.
    #[error("already running")]
    AlreadyRunning,

    /// The frame source has no more frames to deliver.
    #[error("frame source exhausted")]
    FrameSourceExhausted,

    /// A configuration value was rejected at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Specific kind of request parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
        }
    }
}

/// Convenience alias for `Result<T, SkycamError>`.
pub type Result<T> = std::result::Result<T, SkycamError>;
