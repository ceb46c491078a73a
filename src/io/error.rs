// src/io/error.rs
//
// Error types for link transports and the frame codec.

use thiserror::Error;

/// Failure reported by a link transport.
///
/// The variants keep "closed by us", "device went away" and "anything else"
/// apart so the capture loop can classify how a session ended without
/// inspecting error text.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport could not be opened.
    #[error("failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    /// The transport was closed locally (`close()` was called).
    #[error("{0}: port closed")]
    Closed(String),

    /// The device disappeared or the stream reached its end.
    #[error("{0}: device disconnected")]
    Disconnected(String),

    /// Any other I/O failure.
    #[error("{port}: I/O error: {source}")]
    Io {
        port: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    pub fn open(port: &str, reason: impl ToString) -> Self {
        TransportError::Open {
            port: port.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn closed(port: &str) -> Self {
        TransportError::Closed(port.to_string())
    }

    pub fn disconnected(port: &str) -> Self {
        TransportError::Disconnected(port.to_string())
    }

    pub fn io(port: &str, source: std::io::Error) -> Self {
        TransportError::Io {
            port: port.to_string(),
            source,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed(_))
    }
}

/// Frame codec contract violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("payload too long: {0} bytes (max 255)")]
    PayloadTooLong(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_port() {
        let err = TransportError::open("/dev/ttyUSB0", "No such file or directory");
        assert_eq!(
            err.to_string(),
            "failed to open /dev/ttyUSB0: No such file or directory"
        );
        assert_eq!(
            TransportError::disconnected("COM3").to_string(),
            "COM3: device disconnected"
        );
    }

    #[test]
    fn test_is_closed() {
        assert!(TransportError::closed("a").is_closed());
        assert!(!TransportError::disconnected("a").is_closed());
        let io = TransportError::io("a", std::io::Error::other("boom"));
        assert!(!io.is_closed());
    }
}
