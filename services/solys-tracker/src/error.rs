//! Error types for the tracker device client

/// Errors that can occur when talking to the tracker device
#[derive(Debug, thiserror::Error)]
pub enum SolysError {
    #[error("Not connected to the device")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device rejected command: {code} - {reason} (raw: {raw})")]
    Device {
        code: String,
        reason: String,
        raw: String,
    },

    #[error("Session kept losing authentication while sending '{0}'")]
    ReloginLoop(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(
        "Move overran the whole countdown budget by {overrun_seconds:.1}s; \
         increase countdown, device_delay or device_delay_margin"
    )]
    TimingBudget { overrun_seconds: f64 },

    #[error("Position source error: {0}")]
    Position(#[from] sky_position::PositionError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for device operations
pub type Result<T> = std::result::Result<T, SolysError>;
