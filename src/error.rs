/// Unified error types for the ledger-atlas resolution layer
use thiserror::Error;

/// Main error type for ledger resolution
#[derive(Error, Debug)]
pub enum VdrError {
    /// Pool configuration errors (missing or malformed genesis configuration)
    #[error("Pool configuration error: {0}")]
    PoolConfig(String),

    /// Underlying ledger connection could not be opened
    #[error("Failed to open pool: {0}")]
    PoolOpen(String),

    /// Pool close retries exhausted
    #[error("Failed to close pool: {0}")]
    PoolClose(String),

    /// Unknown ledger id
    #[error("Not found: {0}")]
    NotFound(String),

    /// No configured ledger returned a verifiable answer for the DID
    #[error(
        "DID {did} not found on any ledger ({production_searched} production, \
         {non_production_searched} non-production searched)"
    )]
    DidNotFound {
        did: String,
        production_searched: usize,
        non_production_searched: usize,
    },

    /// A cached ledger id is no longer present in the registry
    #[error("Cached ledger {ledger_id} for DID {did} is not in the current registry")]
    CacheInconsistency { did: String, ledger_id: String },

    /// Ledger node transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// Resolution cache backend errors
    #[error("Cache error: {0}")]
    Cache(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for resolution operations
pub type VdrResult<T> = Result<T, VdrError>;
