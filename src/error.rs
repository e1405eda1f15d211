//! The closed error taxonomy the core exposes to its callers.
//!
//! Every variant is one of the stable identifiers `spec.md` §7 asks
//! for; the `String` payloads are the "short reason" attached for logs,
//! never meant to be matched on by callers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// No DID was free in the pool at the moment of `AcquireDID`.
    #[error("no DID available in the pool")]
    Exhausted,

    /// A return leg referenced a DID with no correlated active call.
    #[error("no active call correlates to DID")]
    UnknownDID,

    /// The return leg's ANI did not match the recorded original DNIS.
    #[error("return-leg verification failed")]
    VerificationFailed,

    /// `ProcessIncoming` was called with a `call_id` already active.
    #[error("call_id is already active")]
    Duplicate,

    /// The backing store could not be reached or a query failed.
    #[error("backing store unavailable: {0}")]
    StoreUnavailable(String),

    /// A ledger-specific write or read failed.
    #[error("ledger error: {0}")]
    LedgerError(String),

    /// Anything else that leaves the request's outcome undetermined.
    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<mysql::Error> for CoreError {
    fn from(err: mysql::Error) -> Self {
        CoreError::StoreUnavailable(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
