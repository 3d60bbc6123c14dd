//! monsoon-common
//!
//! Field-element helpers, the two-to-one hash capability and the
//! commitment/nullifier derivation shared by the accumulator and the
//! withdrawal protocol. Everything here is deterministic and
//! side-effect free; chain and proof-system interaction lives in
//! `monsoon-core`.

pub mod commitment;
pub mod field;
pub mod hash;

pub use commitment::{commitment, nullifier_hash, DepositSecrets};
pub use field::{
    fr_from_bytes, fr_from_hex, fr_from_u128, fr_to_bytes, fr_to_hex, random_fr,
    reduce_be_bytes_to_fr, FieldError, Fr,
};
pub use hash::{FieldHasher, Poseidon};
