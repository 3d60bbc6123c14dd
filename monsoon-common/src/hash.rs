//! The hash capability used for commitments and interior tree nodes.
//!
//! The accumulator and the commitment scheme only depend on the
//! [`FieldHasher`] contract: deterministic, collision resistant,
//! side-effect free. [`Poseidon`] is the concrete implementation the
//! bridge deploys with.

use halo2curves_axiom::ff::Field;
use poseidon_primitives::poseidon::primitives::{ConstantLength, Hash as PoseidonHash, Spec};

use crate::field::Fr;

const POSEIDON_T: usize = 6;
const POSEIDON_RATE: usize = 5;
const POSEIDON_FULL_ROUNDS: usize = 8;
const POSEIDON_PARTIAL_ROUNDS: usize = 57;

/// Two-to-one (and four-to-one) hash over field elements.
pub trait FieldHasher: Send + Sync {
    /// Interior-node hash: `H(left, right)`.
    fn hash2(&self, left: Fr, right: Fr) -> Fr;

    /// Commitment hash over a fixed four-element preimage.
    fn hash4(&self, values: [Fr; 4]) -> Fr;
}

/// Poseidon over the bn256 scalar field.
#[derive(Clone, Copy, Debug, Default)]
pub struct Poseidon;

impl FieldHasher for Poseidon {
    fn hash2(&self, left: Fr, right: Fr) -> Fr {
        poseidon_hash(&[left, right])
    }

    fn hash4(&self, values: [Fr; 4]) -> Fr {
        poseidon_hash(&values)
    }
}

fn poseidon_hash<const L: usize>(values: &[Fr; L]) -> Fr {
    PoseidonHash::<Fr, BridgePoseidonSpec, ConstantLength<L>, POSEIDON_T, POSEIDON_RATE>::init()
        .hash(*values)
}

#[derive(Debug)]
struct BridgePoseidonSpec;

impl Spec<Fr, POSEIDON_T, POSEIDON_RATE> for BridgePoseidonSpec {
    fn full_rounds() -> usize {
        POSEIDON_FULL_ROUNDS
    }

    fn partial_rounds() -> usize {
        POSEIDON_PARTIAL_ROUNDS
    }

    fn sbox(val: Fr) -> Fr {
        val.pow_vartime([5])
    }

    fn secure_mds() -> usize {
        0
    }
}
