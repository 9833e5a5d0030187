use thiserror::Error;

use crate::common::error::VvError::GenericError;

#[derive(Debug, Error)]
pub enum VvError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Scheduler error: {0}")]
    SchedError(#[from] vvsched::Error),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::error::Error> for VvError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<anyhow::Error> for VvError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(format!("{error:?}"))
    }
}

impl From<toml::de::Error> for VvError {
    fn from(error: toml::de::Error) -> Self {
        Self::DeserializationError(error.to_string())
    }
}

pub fn error<T>(message: String) -> crate::Result<T> {
    Err(GenericError(message))
}

impl From<String> for VvError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}
