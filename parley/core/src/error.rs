//! Error Taxonomy
//!
//! Errors surfaced by the orchestration core. The taxonomy is deliberately
//! small: callers only ever need to distinguish "there is no authenticated
//! user", "the remote store failed", and "the turn stream died mid-flight".
//!
//! # Propagation Policy
//!
//! - [`Error::Unauthorized`] is raised before any remote call is attempted.
//! - [`Error::Store`] propagates remote-store failures untransformed. The one
//!   exception is the conversation label update at the end of a turn, which
//!   is tolerated with a warning (messages already persisted remain valid).
//! - [`Error::StreamAbort`] reports a completion stream that ended without a
//!   final message set. Persistence of the partial turn has already been
//!   attempted by the time this surfaces.

use thiserror::Error;

use crate::store::StoreError;

/// Errors produced by the orchestration core
#[derive(Debug, Error)]
pub enum Error {
    /// No authenticated user session is available
    #[error("unauthorized: no active user session")]
    Unauthorized,

    /// The remote conversation store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The completion stream ended before delivering a final message set
    #[error("turn stream aborted: {0}")]
    StreamAbort(String),
}

/// Convenience result alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_is_transparent() {
        let err = Error::from(StoreError::Timeout);
        assert_eq!(err.to_string(), StoreError::Timeout.to_string());
    }

    #[test]
    fn test_unauthorized_message() {
        assert!(Error::Unauthorized.to_string().contains("unauthorized"));
    }
}
