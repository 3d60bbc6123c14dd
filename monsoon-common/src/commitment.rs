//! Deposit commitments and redemption nullifiers.
//!
//! A deposit is bound to a one-time redeemable secret pair:
//!
//! - `commitment = H(nullifier, secret, currency, amount)` is the public
//!   tree leaf, binding the deposit to a specific asset and amount so a
//!   note cannot be replayed against a different pair.
//! - `nullifier_hash = H(nullifier, 0)` is the public redemption tag.
//!   Revealing it leaks nothing about `secret` and does not allow the
//!   commitment to be recomputed.

use halo2curves_axiom::ff::Field;
use rand::{CryptoRng, RngCore};

use crate::field::{fr_from_u128, random_fr, Fr};
use crate::hash::FieldHasher;

/// The secret pair a depositor holds until redemption.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepositSecrets {
    pub secret: Fr,
    pub nullifier: Fr,
}

impl DepositSecrets {
    /// Draw a fresh, independent secret and nullifier.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            secret: random_fr(rng),
            nullifier: random_fr(rng),
        }
    }
}

/// Derive the public tree leaf for a deposit.
///
/// `currency` must already be a validated field element (parse wire input
/// through `field::fr_from_hex` first); `amount` is the raw base-unit
/// integer, in-field for every `u128` by construction.
pub fn commitment<H: FieldHasher + ?Sized>(
    hasher: &H,
    secrets: &DepositSecrets,
    currency: Fr,
    amount: u128,
) -> Fr {
    hasher.hash4([
        secrets.nullifier,
        secrets.secret,
        currency,
        fr_from_u128(amount),
    ])
}

/// Derive the public redemption tag from the nullifier alone.
pub fn nullifier_hash<H: FieldHasher + ?Sized>(hasher: &H, nullifier: Fr) -> Fr {
    hasher.hash2(nullifier, Fr::zero())
}
