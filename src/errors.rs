//! Crate-wide error type definitions

use thiserror::Error;

#[derive(Debug, Error)]
#[error("serialization error: {0:?}")]
/// An error happened while decoding or encoding a configuration value
pub struct SerializationError(#[from] serde_json::Error);

#[derive(Debug, Error)]
#[error("internal error, this may be a bug: {0:?}")]
/// Some unexpected error happened while loading metadata or applying an update
///
/// These errors should not happen, unless there is a bug in the implementation, e.g. an
/// instance was read with a type id that does not belong to the loaded generation.
pub struct InternalError(#[from] anyhow::Error);

impl InternalError {
    pub fn msg<M>(msg: M) -> Self
    where
        M: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        Self(anyhow::Error::msg(msg))
    }
}
