//! Error types for the bolt engine.

use thiserror::Error;

/// Everything that can go wrong while downloading.
///
/// Variants group into transport, protocol, identity, filesystem and
/// lifecycle families; workers retry the transient transport subset and
/// surface the rest to the supervisor unchanged.
#[derive(Debug, Clone, Error)]
pub enum BoltError {
    // --- transport ---
    #[error("network error: {0}")]
    Network(String),

    #[error("operation timed out")]
    Timeout,

    #[error("connection refused")]
    Refused,

    #[error("DNS resolution failed")]
    Dns,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("connection lost")]
    ConnectionLost,

    #[error("too many redirects")]
    TooManyRedirects,

    // --- protocol ---
    #[error("resource not found (404)")]
    NotFound,

    #[error("server error ({0})")]
    ServerError(u16),

    #[error("permission denied")]
    PermissionDenied,

    #[error("invalid byte range")]
    InvalidRange,

    // --- identity ---
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    // --- filesystem ---
    #[error("disk full")]
    DiskFull,

    #[error("file already exists")]
    FileExists,

    #[error("write error: {0}")]
    Write(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("file handle closed")]
    HandleInvalid,

    // --- lifecycle ---
    #[error("download cancelled")]
    Cancelled,

    #[error("download paused")]
    Paused,

    #[error("download stalled")]
    StallDetected,

    #[error("resume rejected: {0}")]
    ResumeFailed(String),

    #[error("no usable bandwidth")]
    NoBandwidth,

    #[error("download already running")]
    AlreadyRunning,

    #[error("operation not valid in this state")]
    WrongState,
}

pub type Result<T> = std::result::Result<T, BoltError>;

impl BoltError {
    /// Classify an HTTP status line. Success (including 206) is `None`.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            404 | 410 => Some(BoltError::NotFound),
            401 | 403 | 407 => Some(BoltError::PermissionDenied),
            416 => Some(BoltError::InvalidRange),
            500..=599 => Some(BoltError::ServerError(status)),
            s => Some(BoltError::Network(format!("unexpected HTTP status {s}"))),
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            BoltError::Timeout
        } else if err.is_redirect() {
            BoltError::TooManyRedirects
        } else if err.is_connect() {
            let text = err.to_string();
            if text.contains("dns") || text.contains("resolve") {
                BoltError::Dns
            } else if text.contains("certificate") || text.contains("tls") {
                BoltError::Tls(text)
            } else {
                BoltError::Refused
            }
        } else if err.is_body() || err.is_decode() {
            BoltError::ConnectionLost
        } else {
            BoltError::Network(err.to_string())
        }
    }

    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::PermissionDenied => BoltError::PermissionDenied,
            ErrorKind::AlreadyExists => BoltError::FileExists,
            ErrorKind::NotFound => BoltError::Read(err.to_string()),
            ErrorKind::StorageFull => BoltError::DiskFull,
            _ => BoltError::Write(err.to_string()),
        }
    }

    /// Transient errors are worth a bounded retry from the same offset.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BoltError::Network(_)
                | BoltError::Timeout
                | BoltError::Refused
                | BoltError::Dns
                | BoltError::Tls(_)
                | BoltError::ConnectionLost
                | BoltError::ServerError(_)
                | BoltError::StallDetected
        )
    }
}

impl From<reqwest::Error> for BoltError {
    fn from(err: reqwest::Error) -> Self {
        BoltError::from_reqwest(&err)
    }
}

impl From<std::io::Error> for BoltError {
    fn from(err: std::io::Error) -> Self {
        BoltError::from_io(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(BoltError::from_status(200).is_none());
        assert!(BoltError::from_status(206).is_none());
        assert!(matches!(BoltError::from_status(404), Some(BoltError::NotFound)));
        assert!(matches!(
            BoltError::from_status(403),
            Some(BoltError::PermissionDenied)
        ));
        assert!(matches!(
            BoltError::from_status(416),
            Some(BoltError::InvalidRange)
        ));
        assert!(matches!(
            BoltError::from_status(503),
            Some(BoltError::ServerError(503))
        ));
    }

    #[test]
    fn retry_classes() {
        assert!(BoltError::Timeout.is_transient());
        assert!(BoltError::ConnectionLost.is_transient());
        assert!(BoltError::ServerError(500).is_transient());
        assert!(!BoltError::NotFound.is_transient());
        assert!(!BoltError::InvalidRange.is_transient());
        assert!(!BoltError::DiskFull.is_transient());
        assert!(!BoltError::Cancelled.is_transient());
    }

    #[test]
    fn io_classification() {
        let full = std::io::Error::new(std::io::ErrorKind::StorageFull, "nope");
        assert!(matches!(BoltError::from_io(&full), BoltError::DiskFull));
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(
            BoltError::from_io(&denied),
            BoltError::PermissionDenied
        ));
    }
}
