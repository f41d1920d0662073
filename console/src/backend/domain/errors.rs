//! Error taxonomy for the console core.
//!
//! Errors are `Clone` because one in-flight fetch fans its outcome out to
//! every caller that joined it.

/// Failures surfaced by the scope coordinator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsoleError {
    /// Division or calendar absent in the remote store
    #[error("{0}")]
    NotFound(String),
    /// Network or store failure, timeouts included
    #[error("{0}")]
    RemoteFailure(String),
    /// Malformed input rejected before any remote call
    #[error("{0}")]
    Validation(String),
}

impl ConsoleError {
    /// Wrap a store error, keeping its full context chain in the message
    pub fn remote(context: impl std::fmt::Display, err: &anyhow::Error) -> Self {
        ConsoleError::RemoteFailure(format!("{}: {:#}", context, err))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ConsoleError::NotFound(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ConsoleError::Validation(message.into())
    }
}
