use thiserror::Error;

/// Errors raised by the configuration front-end.
///
/// Every parse failure has already been reported through the log sink
/// at the offending source location before the error value is
/// returned; the value itself carries the primary diagnostic so that
/// callers (and tests) can still inspect it.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{locus}: {message}")]
    Parse { locus: String, message: String },

    #[error("{0}")]
    Message(String),

    #[error("no listeners defined")]
    NoListeners,
}

impl ConfigError {
    /// The diagnostic text without the location prefix.
    pub fn message(&self) -> &str {
        match self {
            ConfigError::Parse { message, .. } => message,
            ConfigError::Message(message) => message,
            ConfigError::NoListeners => "no listeners defined",
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
