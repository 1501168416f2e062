//! Error types
//!
//! The crate-level [`Error`] groups the failure classes the pipeline
//! distinguishes: configuration problems (fatal for one component at startup),
//! capture and broker connection failures (transient, retried by their loops),
//! and collaborator failures (isolated to the event that triggered them).
//! Overload is not an error; it shows up as skipped frames in the stats.

use std::fmt;
use std::time::Duration;

use crate::frame::StreamId;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Invalid or missing configuration
    Config(ConfigError),
    /// Camera capture failure
    Capture(CaptureError),
    /// Message broker failure
    Broker(BrokerError),
    /// External collaborator (classifier, analyzer, notifier) failure
    Collaborator(CollaboratorError),
    /// I/O error
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "configuration error: {}", e),
            Error::Capture(e) => write!(f, "capture error: {}", e),
            Error::Broker(e) => write!(f, "broker error: {}", e),
            Error::Collaborator(e) => write!(f, "collaborator error: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => Some(e),
            Error::Capture(e) => Some(e),
            Error::Broker(e) => Some(e),
            Error::Collaborator(e) => Some(e),
            Error::Io(e) => Some(e),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<CaptureError> for Error {
    fn from(e: CaptureError) -> Self {
        Error::Capture(e)
    }
}

impl From<BrokerError> for Error {
    fn from(e: BrokerError) -> Self {
        Error::Broker(e)
    }
}

impl From<CollaboratorError> for Error {
    fn from(e: CollaboratorError) -> Self {
        Error::Collaborator(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// No source URL configured and synthetic fallback disabled
    MissingSource(StreamId),
    /// Sensitivity outside 1..=10
    InvalidSensitivity(u8),
    /// Frame dimensions or rate of zero
    InvalidGeometry {
        width: u32,
        height: u32,
        fps: u32,
    },
    /// Broker host is empty
    MissingBrokerHost,
    /// QoS level outside 0..=2
    InvalidQos(u8),
    /// Soft tolerance larger than hard tolerance
    InvalidTolerance { soft: Duration, hard: Duration },
    /// Any other invalid value
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingSource(stream) => {
                write!(f, "no source configured for stream {}", stream)
            }
            ConfigError::InvalidSensitivity(value) => {
                write!(f, "sensitivity must be between 1 and 10, got {}", value)
            }
            ConfigError::InvalidGeometry { width, height, fps } => {
                write!(f, "invalid frame geometry {}x{} @ {} fps", width, height, fps)
            }
            ConfigError::MissingBrokerHost => write!(f, "broker host is not set"),
            ConfigError::InvalidQos(qos) => write!(f, "QoS must be 0, 1 or 2, got {}", qos),
            ConfigError::InvalidTolerance { soft, hard } => write!(
                f,
                "soft tolerance {}ms exceeds hard tolerance {}ms",
                soft.as_millis(),
                hard.as_millis()
            ),
            ConfigError::Invalid(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Capture errors
#[derive(Debug)]
pub enum CaptureError {
    /// The source could not be opened
    Open(String),
    /// The source ended or is gone; reconnect immediately
    Unavailable(String),
    /// A single read failed
    Read(String),
    /// A read did not complete in time
    Timeout(Duration),
    /// Underlying I/O error
    Io(std::io::Error),
}

impl CaptureError {
    /// Whether this failure should trigger an immediate reconnect rather than
    /// counting towards the consecutive-failure threshold
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CaptureError::Open(_) | CaptureError::Unavailable(_))
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Open(msg) => write!(f, "failed to open source: {}", msg),
            CaptureError::Unavailable(msg) => write!(f, "source unavailable: {}", msg),
            CaptureError::Read(msg) => write!(f, "frame read failed: {}", msg),
            CaptureError::Timeout(d) => write!(f, "frame read timed out after {}ms", d.as_millis()),
            CaptureError::Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<std::io::Error> for CaptureError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            CaptureError::Unavailable("stream ended".into())
        } else {
            CaptureError::Io(e)
        }
    }
}

/// Broker errors
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerError {
    /// Operation requires a live connection
    NotConnected,
    /// Connection attempt failed
    Connect(String),
    /// Connection attempt did not complete in time
    ConnectTimeout(Duration),
    /// Publish was rejected by the client
    Publish(String),
    /// Payload could not be encoded
    Encode(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::NotConnected => write!(f, "not connected to broker"),
            BrokerError::Connect(msg) => write!(f, "connect failed: {}", msg),
            BrokerError::ConnectTimeout(d) => {
                write!(f, "connect timed out after {}ms", d.as_millis())
            }
            BrokerError::Publish(msg) => write!(f, "publish failed: {}", msg),
            BrokerError::Encode(msg) => write!(f, "payload encoding failed: {}", msg),
        }
    }
}

impl std::error::Error for BrokerError {}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        BrokerError::Encode(e.to_string())
    }
}

/// Errors reported by external collaborators
#[derive(Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    /// The collaborator call failed
    Failed(String),
    /// The collaborator returned something unusable
    InvalidResponse(String),
    /// The collaborator did not answer in time
    Timeout(Duration),
    /// The collaborator is not available right now
    Unavailable,
    /// The call was refused by a rate limiter
    RateLimited(Duration),
}

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollaboratorError::Failed(msg) => write!(f, "{}", msg),
            CollaboratorError::InvalidResponse(msg) => write!(f, "invalid response: {}", msg),
            CollaboratorError::Timeout(d) => write!(f, "timed out after {}ms", d.as_millis()),
            CollaboratorError::Unavailable => write!(f, "unavailable"),
            CollaboratorError::RateLimited(wait) => {
                write!(f, "rate limited, next slot in {}ms", wait.as_millis())
            }
        }
    }
}

impl std::error::Error for CollaboratorError {}

impl From<BrokerError> for CollaboratorError {
    fn from(e: BrokerError) -> Self {
        CollaboratorError::Failed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_classification() {
        assert!(CaptureError::Open("refused".into()).is_unavailable());
        assert!(CaptureError::Unavailable("eof".into()).is_unavailable());
        assert!(!CaptureError::Read("short".into()).is_unavailable());
        assert!(!CaptureError::Timeout(Duration::from_secs(1)).is_unavailable());
    }

    #[test]
    fn test_eof_maps_to_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(CaptureError::from(io).is_unavailable());
    }

    #[test]
    fn test_display_and_source() {
        let err: Error = ConfigError::InvalidSensitivity(11).into();
        assert_eq!(
            err.to_string(),
            "configuration error: sensitivity must be between 1 and 10, got 11"
        );
        assert!(std::error::Error::source(&err).is_some());

        let err: Error = BrokerError::NotConnected.into();
        assert_eq!(err.to_string(), "broker error: not connected to broker");
    }
}
