//! Error types for pipeline synthesis.
//!
//! Every error is raised synchronously while the graph is being built and aborts the
//! whole synthesis pass. There are no partial graphs.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("credential resolution failed: {0}")]
    CredentialResolution(String),

    #[error("assembly failed: {0}")]
    Assembly(String),

    #[error("invalid concurrency limit {0}: must be a positive integer")]
    InvalidConcurrencyLimit(i64),

    #[error("secret not found: {0}")]
    SecretNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
