//! Error taxonomy shared across the orchestration engine
//!
//! Transient network and capture failures are retried locally with a fixed
//! bound; bound exhaustion always funnels the state machine into its cleanup
//! state rather than surfacing as a crash. Fatal boot failures (audio, touch,
//! camera init) are returned to the host, which restarts the device.

/// Errors produced by the engine and its hardware collaborators
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Peripheral start/write/read failure
    #[error("Hardware I/O failure: {0}")]
    HardwareIo(String),

    /// Buffer allocation or clip decode failure
    #[error("Allocation failure: {0}")]
    Allocation(String),

    /// Remote service failure; status 0 means no response was received
    #[error("Network failure (status {status}): {message}")]
    Network { status: u16, message: String },

    /// Key/value store failure; callers log and proceed with defaults
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Filesystem failure (clip storage, staged firmware image)
    #[error("Storage I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Camera produced no frame or an empty frame
    #[error("Capture failure: {0}")]
    Capture(String),
}

impl EngineError {
    /// Build a `Network` error that carries no HTTP status (transport-level)
    pub fn network_transport(message: impl Into<String>) -> Self {
        EngineError::Network {
            status: 0,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_display_includes_status() {
        let err = EngineError::Network {
            status: 403,
            message: "forbidden".to_string(),
        };
        assert!(err.to_string().contains("403"));
    }

    #[test]
    fn test_io_error_converts() {
        fn read_missing() -> Result<String, EngineError> {
            Ok(std::fs::read_to_string("/nonexistent/tutorglass")?)
        }
        assert!(matches!(read_missing(), Err(EngineError::Io(_))));
    }
}
