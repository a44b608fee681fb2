//! Error type for configuration and controller lifecycle failures.
//!
//! A buffer without a detectable pitch is not an error; see
//! [`crate::pitch::Rejection`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid detector configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("sample source reported an unusable format ({sample_rate} Hz, {channels} channels)")]
    InvalidSourceFormat { sample_rate: f64, channels: u16 },

    #[error("sample source failed to start: {0:#}")]
    Source(anyhow::Error),

    #[error("could not parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
