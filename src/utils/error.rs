use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from the telemetry stream transport
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// Error from I/O operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A frame that could not be turned into a telemetry record
    #[error("Frame parsing error: {0}")]
    FrameParse(String),

    /// Error from session lifecycle operations
    #[error("Session error: {0}")]
    Session(String),

    /// Error talking to the external anomaly model
    #[error("Model error: {0}")]
    Model(String),
}

/// Result type for application
pub type AppResult<T> = Result<T, AppError>;
