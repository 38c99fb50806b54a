use thiserror::Error;

/// Error types for the mesh sidecar
#[derive(Error, Debug)]
pub enum SidecarError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid tunnel target: {0}")]
    InvalidTarget(String),

    #[error("Dial failed: {0}")]
    DialFailed(String),

    #[error("Upstream transport error: {0}")]
    Transport(String),

    #[error("Failed to get local client: {0}")]
    StatusClient(String),

    #[error("Failed to get status: {0}")]
    StatusQuery(String),

    #[error("SOCKS5 protocol error: {0}")]
    Socks5(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl SidecarError {
    /// Connection resets and broken pipes are routine session endings, not faults
    pub fn is_disconnect(&self) -> bool {
        match self {
            SidecarError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

/// Type alias for Results using SidecarError
pub type Result<T> = std::result::Result<T, SidecarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SidecarError::StatusQuery("backend unavailable".to_string());
        assert_eq!(err.to_string(), "Failed to get status: backend unavailable");

        let err = SidecarError::StatusClient("no socket".to_string());
        assert_eq!(err.to_string(), "Failed to get local client: no socket");
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json");
        assert!(json_err.is_err());

        let err: SidecarError = json_err.unwrap_err().into();
        assert!(matches!(err, SidecarError::SerializationError(_)));

        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: SidecarError = io_err.into();
        assert!(matches!(err, SidecarError::Io(_)));
    }

    #[test]
    fn test_is_disconnect() {
        let reset: SidecarError =
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into();
        assert!(reset.is_disconnect());

        let refused: SidecarError =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(!refused.is_disconnect());

        assert!(!SidecarError::InvalidTarget("x".to_string()).is_disconnect());
    }
}
