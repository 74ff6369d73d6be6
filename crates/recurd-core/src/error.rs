use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Invalid(_) => "CONFIG_ERROR",
            ConfigError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
