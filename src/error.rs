//! Error types for relay, emulation and calibration.
//!
//! All fallible operations in the crate return [`RelayError`]. The variants follow the
//! layer that can act on them:
//!
//! - **Format**: a packet or data-frame body that does not match its declared sizes. The
//!   reader drops it and keeps going; the upstream can simply be asked again.
//! - **Protocol**: an unknown command or a command that does not fit the session state.
//!   Surfaced to the consumer as an `Error` reply; the session stays open.
//! - **Transport / Timeout / ConnectionClosed**: socket trouble. Timeouts and would-block
//!   conditions are retried by the read loops; a reset only ends the affected session.
//! - **Calibration**: missing or degenerate calibration input. Aborts the calibration
//!   command only, correction falls back to pass-through.
//! - **File / Parse / UnsupportedFormat / Config**: motion files, XML, JSON and settings.
//!
//! End of data is not an error; parsers report it through
//! [`NextFrame::NoMoreData`](crate::parsers::NextFrame::NoMoreData).
//!
//! ```rust
//! use emarelay::RelayError;
//!
//! let error = RelayError::format_error("data frame", "component size 12 below header size 20");
//! assert!(error.is_retryable());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T, E = RelayError> = std::result::Result<T, E>;

/// Main error type for relay operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RelayError {
    #[error("Malformed packet in {context}: {details}")]
    Format { context: String, details: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Transport error: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Calibration failed: {reason}")]
    Calibration { reason: String },

    #[error("Motion file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Unsupported motion file type: {extension:?}")]
    UnsupportedFormat { extension: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl RelayError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::Format { .. } => true,
            RelayError::Timeout { .. } => true,
            RelayError::Transport { source: Some(io), .. } => matches!(
                io.kind(),
                ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
            ),
            RelayError::Transport { source: None, .. } => false,
            RelayError::Protocol { .. } => false,
            RelayError::ConnectionClosed => false,
            RelayError::Calibration { .. } => false,
            RelayError::File { .. } => false,
            RelayError::Parse { .. } => false,
            RelayError::UnsupportedFormat { .. } => false,
            RelayError::Config { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            RelayError::Format { .. } => vec![
                "Request the frame again",
                "Check that both ends speak the same packet layout",
            ],
            RelayError::Protocol { .. } => vec![
                "Check the command spelling",
                "Start streaming before asking for streamed frames",
            ],
            RelayError::Transport { .. } | RelayError::ConnectionClosed => vec![
                "Check that the upstream server is running",
                "Verify host and port settings",
                "Reconnect the stream reader",
            ],
            RelayError::Timeout { .. } => vec![
                "Increase the request timeout",
                "Verify the upstream is still streaming",
            ],
            RelayError::Calibration { .. } => vec![
                "Check the sensor roles file",
                "Record a longer, steadier calibration window",
                "Make sure the reference and biteplate sensors are attached",
            ],
            RelayError::File { .. } => vec![
                "Check the file exists and is readable",
                "Check file permissions",
            ],
            RelayError::Parse { .. } => vec![
                "Verify the motion file format and version",
                "Check the file is not truncated",
            ],
            RelayError::UnsupportedFormat { .. } => {
                vec!["Use a .tsv, .bvh, .pos or .json motion file"]
            }
            RelayError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Compare against the documented defaults",
            ],
        }
    }

    /// Helper constructor for malformed packet errors.
    pub fn format_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        RelayError::Format { context: context.into(), details: details.into() }
    }

    /// Helper constructor for motion file, XML and JSON parse errors.
    pub fn parse_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        RelayError::Parse { context: context.into(), details: details.into() }
    }

    /// Helper constructor for protocol errors.
    pub fn protocol(message: impl Into<String>) -> Self {
        RelayError::Protocol { message: message.into() }
    }

    /// Helper constructor for calibration errors.
    pub fn calibration(reason: impl Into<String>) -> Self {
        RelayError::Calibration { reason: reason.into() }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RelayError::File { path: path.into(), source }
    }

    /// Helper constructor for configuration errors.
    pub fn config(message: impl Into<String>) -> Self {
        RelayError::Config { message: message.into() }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {
                RelayError::ConnectionClosed
            }
            _ => RelayError::Transport { reason: err.to_string(), source: Some(err) },
        }
    }
}
