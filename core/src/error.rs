use thiserror::Error;

/// Failures caused by the caller's input rather than by storage.
///
/// Functions still return `anyhow::Result`; front ends downcast to this type
/// to pick a status code or exit message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LarderError {
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
}

impl LarderError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}
