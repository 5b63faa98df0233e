//! Error taxonomy for the wallet session and transaction core

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the session, encoding, dispatch and deployment layers
#[derive(Debug, Error)]
pub enum Error {
    /// `init()` has not completed yet
    #[error("wallet client is not initialized")]
    ClientNotInitialized,

    /// `approve()` was called without an outstanding pairing offer
    #[error("no pairing offer is awaiting approval")]
    NoPendingApproval,

    /// `connect()` was called while an earlier offer is still pending
    #[error("a pairing is already in progress")]
    PairingInProgress,

    /// `connect()` was called while a session is live
    #[error("a wallet session is already connected")]
    AlreadyConnected,

    /// The signer declined the pairing, or the pairing was cancelled locally
    #[error("pairing rejected: {reason}")]
    ApprovalRejected { reason: String },

    /// The signer did not answer the pairing in time
    #[error("pairing approval timed out after {0:?}")]
    ApprovalTimeout(Duration),

    /// No live session, or the session was torn down while a request was in flight
    #[error("wallet session lost")]
    SessionLost,

    /// The user declined the request in the signer application
    #[error("transaction rejected by user")]
    UserRejectedTransaction,

    /// The signer reported a JSON-RPC internal error
    #[error("signer internal RPC error: {message}")]
    InternalRpcError { message: String },

    /// Any signer failure without a known mapping
    #[error("unrecognized signer error (code {code:?}): {message}")]
    Unknown { code: Option<i64>, message: String },

    /// Arity or type mismatch while ABI-encoding
    #[error("ABI encoding failed: {0}")]
    AbiEncoding(String),

    /// Transaction targets a chain or sender the session was not approved for
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Module name absent from the module registry
    #[error("unknown module: {0}")]
    UnknownModule(String),

    /// Relay transport failure
    #[error("relay network error: {0}")]
    RelayNetwork(String),

    /// Session persistence failure
    #[error("session storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the caller may re-invoke the operation that produced this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ApprovalRejected { .. }
                | Error::ApprovalTimeout(_)
                | Error::UserRejectedTransaction
                | Error::RelayNetwork(_)
                | Error::SessionLost
        )
    }
}
