use crate::config::ConfigError;
use thiserror::Error;

/// Top-level error type for the configloader library.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("undefined output format '{name}', available: {available}")]
    UnknownFormat { name: String, available: String },

    #[error("format config: {0}")]
    Output(Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
