//! monsoon-core
//!
//! Session ledger and cross-chain withdrawal protocol.
//!
//! Flow:
//! 1. A depositor opens a session; secrets are drawn and the expected
//!    commitment derived.
//! 2. The depositor submits the deposit on the source chain; the
//!    protocol validates the transaction against the session, registers
//!    the commitment on the destination chain and issues a bearer note.
//! 3. The note holder redeems on the destination chain; after proof
//!    verification and the authoritative nullifier check, exactly one
//!    payout issues and the nullifier is consumed.
//!
//! Chain RPC, the proof system and the payout key are injected
//! capabilities; see [`chain`].

pub mod chain;
pub mod config;
pub mod currency;
pub mod error;
pub mod note;
pub mod protocol;
pub mod session;
pub mod store;

pub use chain::{
    rebuild_accumulator, sort_leaf_events, ChainReader, ChainWriter, DepositTx, Ed25519Signer,
    LeafEvent, PayoutRequest, PayoutSigner, ProofSystem, ProofWitness, PublicInputs, SignedPayout,
};
pub use config::BridgeConfig;
pub use currency::{CurrencyPair, CurrencyTable, Direction};
pub use error::{ProtocolError, Result};
pub use note::{Note, ProofPreimage};
pub use protocol::{ChainEnd, OpenDeposit, Redemption, Side, WithdrawalProtocol};
pub use session::{
    DepositInstructions, FinalizedDeposit, SessionLedger, SessionRecord, SessionStatus,
};
pub use store::{RedemptionRecord, RedemptionStore, SessionStore};

/// Contract operation a valid deposit transaction must call.
pub const DEPOSIT_METHOD: &str = "deposit";

/// Default session lifetime.
pub const SESSION_TTL_SECS: u64 = 15 * 60;
