//! Bridge error taxonomy
//!
//! Every failure is tagged with an [`ErrorKind`] where it is detected, so the
//! retry layers decide on the tag alone and never inspect message text.

use std::fmt;

/// Where in the stack a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Stream failed to open, or ended before it could be used.
    ConnectionFailed,
    /// Backend accepted the stream but has not wired up its command channel.
    TransportNotReady,
    /// Response frame carried a JSON-RPC `error` object.
    Protocol,
    /// Per-request or per-attempt deadline elapsed.
    Timeout,
    /// Anything else.
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectionFailed => "connection_failed",
            ErrorKind::TransportNotReady => "transport_not_ready",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by every bridge operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct BridgeError {
    kind: ErrorKind,
    message: String,
}

impl BridgeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionFailed, message)
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportNotReady, message)
    }

    /// JSON-RPC error object from a response frame.
    pub fn protocol(code: i64, message: &str) -> Self {
        Self::new(ErrorKind::Protocol, format!("rpc error {}: {}", code, message))
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether a whole-session retry may help.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ConnectionFailed | ErrorKind::TransportNotReady
        )
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        assert!(BridgeError::connection("stream ended").is_transient());
        assert!(BridgeError::not_ready("no transport found").is_transient());
        assert!(!BridgeError::protocol(-32000, "bad key").is_transient());
        assert!(!BridgeError::timeout("session timeout").is_transient());
        assert!(!BridgeError::other("boom").is_transient());
    }

    #[test]
    fn test_protocol_message_carries_code_and_text() {
        let err = BridgeError::protocol(-32000, "bad key");
        assert_eq!(err.kind(), ErrorKind::Protocol);
        let text = err.to_string();
        assert!(text.contains("-32000"));
        assert!(text.contains("bad key"));
    }

    #[test]
    fn test_kind_is_not_inferred_from_text() {
        // A timeout whose text happens to mention the transport stays a timeout
        let err = BridgeError::timeout("no transport found while waiting");
        assert!(!err.is_transient());
    }
}
