use std::error::Error as StdError;

use thiserror::Error;

/// Failure reported by an event callback, interval handler or deferred command.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Other(#[from] Box<dyn StdError>),
}

impl CallbackError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

pub type CallbackResult = Result<(), CallbackError>;
