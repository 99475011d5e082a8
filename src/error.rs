//! Error types for robovoice

use thiserror::Error;

use crate::device::DeviceRole;

/// Result type alias for robovoice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice front end
#[derive(Debug, Error)]
pub enum Error {
    /// Missing credential, malformed phrase table, bad config file
    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),

    /// No matching hardware and simulation is not permitted
    #[error("{role} unavailable: {reason}")]
    DeviceUnavailable {
        /// Logical role that failed to resolve
        role: DeviceRole,
        /// What the scan found (or did not)
        reason: String,
    },

    /// Endpoint is held by another process
    #[error("{role} busy: {detail}")]
    DeviceBusy {
        /// Logical role of the contended device
        role: DeviceRole,
        /// Platform error text
        detail: String,
    },

    /// No camera resolved and simulation is disabled
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    /// Conversation, vision or transcription call failed in a way worth retrying
    #[error("backend call failed: {0}")]
    BackendCallFailed(String),

    /// Speech synthesis failed for a provider
    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),

    /// Operation exceeded its per-attempt bound
    #[error("timed out: {0}")]
    Timeout(String),

    /// Provider asked us to slow down
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Caller passed something the operation cannot accept
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Credential rejected or device node not accessible
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Hardware or subprocess failure that retrying will not fix
    #[error("audio error: {0}")]
    Audio(String),

    /// Frame capture or description failure that retrying will not fix
    #[error("vision error: {0}")]
    Vision(String),

    /// No way to reach the robot body (e.g. `rostopic` missing)
    #[error("motion unavailable: {0}")]
    MotionUnavailable(String),

    /// The body rejected or failed an action
    #[error("motion error: {0}")]
    Motion(String),

    /// Transient failure persisted through every attempt
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        /// Label of the wrapped operation
        operation: String,
        /// How many times it was invoked
        attempts: u32,
        /// Last underlying error
        #[source]
        source: Box<Error>,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether the failure class is expected to clear up on retry
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_)
            | Self::DeviceBusy { .. }
            | Self::RateLimited(_)
            | Self::BackendCallFailed(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// The innermost error, looking through retry exhaustion
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::RetriesExhausted { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this is (or wraps) a busy-device failure
    #[must_use]
    pub fn is_device_busy(&self) -> bool {
        matches!(self.root(), Self::DeviceBusy { .. })
    }

    /// Map a non-success HTTP response onto the failure taxonomy
    ///
    /// Rate limits and server errors are transient, auth failures and other
    /// client errors are not
    #[must_use]
    pub fn from_status(service: &str, status: u16, body: &str) -> Self {
        let detail = format!("{service} returned {status}: {}", body.trim());
        match status {
            429 => Self::RateLimited(detail),
            401 | 403 => Self::PermissionDenied(detail),
            500..=599 => Self::BackendCallFailed(detail),
            _ if is_recoverable_body(body) => Self::BackendCallFailed(detail),
            _ => Self::InvalidArgument(detail),
        }
    }
}

/// Transient network-level failures sometimes surface only in the body text
fn is_recoverable_body(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("connection reset") || lower.contains("timed out") || lower.contains("dns error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(Error::from_status("tts", 429, ""), Error::RateLimited(_)));
        assert!(matches!(Error::from_status("tts", 503, ""), Error::BackendCallFailed(_)));
        assert!(matches!(Error::from_status("tts", 401, ""), Error::PermissionDenied(_)));
        assert!(matches!(Error::from_status("tts", 400, "bad"), Error::InvalidArgument(_)));
        assert!(matches!(
            Error::from_status("tts", 400, "Connection Reset by peer"),
            Error::BackendCallFailed(_)
        ));
    }

    #[test]
    fn transient_classes() {
        assert!(Error::Timeout("x".into()).is_transient());
        assert!(Error::RateLimited("x".into()).is_transient());
        assert!(
            Error::DeviceBusy {
                role: DeviceRole::Speaker,
                detail: "busy".into()
            }
            .is_transient()
        );
        assert!(!Error::PermissionDenied("x".into()).is_transient());
        assert!(!Error::InvalidArgument("x".into()).is_transient());
        assert!(
            !Error::DeviceUnavailable {
                role: DeviceRole::Camera,
                reason: "none".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn busy_seen_through_exhaustion() {
        let err = Error::RetriesExhausted {
            operation: "aplay".into(),
            attempts: 3,
            source: Box::new(Error::DeviceBusy {
                role: DeviceRole::Speaker,
                detail: "Device or resource busy".into(),
            }),
        };
        assert!(err.is_device_busy());
        assert!(!err.is_transient());
    }
}
