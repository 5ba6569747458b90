//! Error types shared by the dashboard crates
//!
//! Covers everything that can go wrong before a session is started:
//! reading, parsing and validating configuration, and logging setup.

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Main error type for configuration and startup
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configured value is present but unusable
    #[error("Invalid configuration value for `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration parsing errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] config::ConfigError),

    /// Logging could not be installed
    #[error("Logging error: {0}")]
    Logging(String),
}

impl AgentError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid value error
    pub fn invalid_value<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
