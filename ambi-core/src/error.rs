//! Domain-specific error types for the LED streaming core.
//!
//! All fallible operations return `Result<T, AmbiError>`. Variants are
//! grouped by how the connection layer reacts to them: configuration
//! errors are fatal, transport errors feed the reconnect policy, frame
//! errors make the pipeline skip one frame.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the LED streaming core.
#[derive(Debug, Error)]
pub enum AmbiError {
    // ── Configuration Errors ─────────────────────────────────────
    /// A network sink was configured without a host.
    #[error("no host configured for {0} connection")]
    MissingHost(&'static str),

    /// A network sink was configured without a usable port.
    #[error("no port configured for {0} connection")]
    MissingPort(&'static str),

    /// The LED topology has no LEDs on either axis.
    #[error("invalid LED layout: {count_x} x {count_y}")]
    InvalidTopology { count_x: u32, count_y: u32 },

    /// A configuration value could not be interpreted.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Transport Errors ─────────────────────────────────────────
    /// The TCP/UDP/serial layer reported an error.
    #[error("connection error: {0}")]
    Connection(std::io::Error),

    /// The remote end closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// An operation was attempted on a client that is not connected.
    #[error("not connected")]
    NotConnected,

    /// The OS refused access to the device or port.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// No serial adapter could be found.
    #[error("no serial devices found; connect the Adalight controller")]
    NoSerialDevice,

    /// The serial driver reported an error.
    #[error("serial port error: {0}")]
    Serial(String),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Frame Errors ─────────────────────────────────────────────
    /// The capture buffer does not cover the advertised geometry.
    #[error("frame buffer too short: expected {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    /// The capture buffer geometry is unusable.
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),

    // ── State Errors ─────────────────────────────────────────────
    /// A connection state change was requested from the wrong state.
    #[error("invalid state transition: {0}")]
    InvalidTransition(&'static str),

    // ── Channel Errors ───────────────────────────────────────────
    /// The connection worker is gone.
    #[error("channel closed")]
    ChannelClosed,

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl AmbiError {
    /// Configuration errors are reported once and never retried.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::MissingHost(_)
                | Self::MissingPort(_)
                | Self::InvalidTopology { .. }
                | Self::InvalidConfig(_)
        )
    }

    /// Transient errors cost one frame and are not escalated.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::FrameTooShort { .. } | Self::InvalidFrame(_))
    }

    /// Transport errors are subject to the reconnect policy.
    pub fn is_transport(&self) -> bool {
        !self.is_config() && !self.is_transient()
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<std::io::Error> for AmbiError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => AmbiError::PermissionDenied(e.to_string()),
            std::io::ErrorKind::UnexpectedEof => AmbiError::ConnectionClosed,
            _ => AmbiError::Connection(e),
        }
    }
}

impl From<serialport::Error> for AmbiError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                AmbiError::PermissionDenied(e.description)
            }
            serialport::ErrorKind::NoDevice => AmbiError::NoSerialDevice,
            _ => AmbiError::Serial(e.description),
        }
    }
}

impl From<String> for AmbiError {
    fn from(s: String) -> Self {
        AmbiError::Other(s)
    }
}

impl From<&str> for AmbiError {
    fn from(s: &str) -> Self {
        AmbiError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for AmbiError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        AmbiError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = AmbiError::MissingHost("wled");
        assert!(e.to_string().contains("wled"));

        let e = AmbiError::FrameTooShort {
            expected: 1000,
            actual: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));
    }

    #[test]
    fn classification() {
        assert!(AmbiError::InvalidTopology { count_x: 0, count_y: 0 }.is_config());
        assert!(AmbiError::InvalidFrame("zero width").is_transient());
        assert!(AmbiError::ConnectionClosed.is_transport());
        assert!(!AmbiError::MissingPort("hyperion").is_transport());
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: AmbiError = io_err.into();
        assert!(matches!(e, AmbiError::Connection(_)));

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no access");
        let e: AmbiError = denied.into();
        assert!(matches!(e, AmbiError::PermissionDenied(_)));
    }

    #[test]
    fn from_string() {
        let e: AmbiError = "something broke".into();
        assert!(matches!(e, AmbiError::Other(_)));
    }
}
