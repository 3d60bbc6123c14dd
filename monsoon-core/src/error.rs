//! Protocol error taxonomy.
//!
//! Input validation rejects before any chain or proof call; session-state
//! errors leave the session untouched; chain mismatches are retryable
//! with a corrected transaction; nothing here is fatal to the process.

use thiserror::Error;

use monsoon_common::FieldError;
use monsoon_merkle::MerkleError;

#[derive(Error, Debug)]
pub enum ProtocolError {
    // Input validation
    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid transaction hash: {0}")]
    InvalidTxHash(String),

    #[error("unsupported currency {0}")]
    UnsupportedCurrency(String),

    #[error("amount {0} is not representable on the destination chain")]
    AmountNotRepresentable(u128),

    #[error("malformed note: {0}")]
    MalformedNote(String),

    // Session state
    #[error("session not found")]
    SessionNotFound,

    #[error("session expired")]
    SessionExpired,

    #[error("session already validated")]
    AlreadyValidated,

    #[error("transaction {0} is already bound to another session")]
    DuplicateTx(String),

    // Chain validation
    #[error("deposit transaction mismatch on {field}: expected {expected}, got {actual}")]
    ChainMismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },

    // Proof verification
    #[error("proof verification failed")]
    InvalidProof,

    #[error("merkle root is outside the accepted history window")]
    UnknownRoot,

    // Redemption
    #[error("nullifier already redeemed")]
    AlreadyRedeemed,

    // External collaborators
    #[error("chain unavailable: {0}")]
    ChainUnavailable(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Merkle(#[from] MerkleError),

    /// The one genuinely dangerous failure: the payout landed but the
    /// nullifier-marking call did not. Surfaced loudly for operator
    /// reconciliation; retrying the redemption without reconciling risks
    /// a double payout.
    #[error("payout {tx_hash} submitted but nullifier marking failed: {reason}")]
    PayoutUnrecorded { tx_hash: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
