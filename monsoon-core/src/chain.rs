//! External collaborator capabilities.
//!
//! The core never talks to a chain, a proof system or a signing key
//! directly; it goes through the traits below. Concrete RPC clients live
//! with their deployments, mocks live in `monsoon-test-fixtures`.

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};

use monsoon_common::{fr_from_bytes, FieldHasher};
use monsoon_merkle::MerkleAccumulator;

use crate::error::{ProtocolError, Result};

/// A deposit-event leaf as emitted by a chain contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafEvent {
    pub leaf: [u8; 32],
    pub block_number: u64,
    pub tx_index: u32,
}

/// Canonical leaf ordering: ascending `(block_number, tx_index)`. This
/// must match the chain's own insertion order exactly, or reconstructed
/// roots diverge from on-chain roots.
pub fn sort_leaf_events(events: &mut [LeafEvent]) {
    events.sort_by_key(|event| (event.block_number, event.tx_index));
}

/// Rebuild an accumulator purely from historical deposit events.
pub fn rebuild_accumulator<H: FieldHasher>(
    levels: u32,
    hasher: H,
    mut events: Vec<LeafEvent>,
) -> Result<MerkleAccumulator<H>> {
    sort_leaf_events(&mut events);
    let mut leaves = Vec::with_capacity(events.len());
    for event in &events {
        leaves.push(fr_from_bytes(&event.leaf)?);
    }
    Ok(MerkleAccumulator::from_leaves(levels, hasher, leaves)?)
}

/// A confirmed deposit transaction with decoded call arguments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositTx {
    pub sender: String,
    pub recipient: String,
    pub method: String,
    pub currency: [u8; 32],
    pub amount: u128,
    pub commitment: [u8; 32],
}

/// Public statement a redemption proof is verified against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicInputs {
    pub root: [u8; 32],
    pub nullifier_hash: [u8; 32],
    pub recipient: String,
    pub currency: [u8; 32],
    pub amount: u128,
}

/// Witness material handed to the prover.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProofWitness {
    pub secret: [u8; 32],
    pub nullifier: [u8; 32],
    pub currency: [u8; 32],
    pub amount: u128,
    pub leaf_index: u64,
    pub siblings: Vec<[u8; 32]>,
    pub bits: Vec<u8>,
}

/// Payout instruction for the destination chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub recipient: String,
    pub currency: [u8; 32],
    pub amount: u128,
    pub nullifier_hash: [u8; 32],
}

impl PayoutRequest {
    /// Canonical signing payload.
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| ProtocolError::Store(err.to_string()))
    }
}

/// A payout authorized by the operator key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedPayout {
    pub payout: PayoutRequest,
    pub operator: String,
    pub signature: Vec<u8>,
}

/// Read side of a chain: historical deposit events.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Leaf events in `[from_block, to_block]`, in the chain's own order.
    async fn query_leaf_events(&self, from_block: u64, to_block: u64) -> Result<Vec<LeafEvent>>;
}

/// Write/observe side of a chain.
#[async_trait]
pub trait ChainWriter: Send + Sync {
    /// Fetch a confirmed transaction and its decoded deposit arguments.
    async fn fetch_deposit(&self, tx_hash: &str) -> Result<DepositTx>;

    /// Register a cross-chain commitment into this chain's tree. Resolves
    /// once the transaction is confirmed; returns its hash.
    async fn register_commitment(&self, commitment: [u8; 32]) -> Result<String>;

    /// Submit an operator-signed payout. The chain rejects a payout whose
    /// nullifier has already been paid; the first transaction to be mined
    /// wins and the loser observes `AlreadyRedeemed`.
    async fn submit_payout(&self, payout: &SignedPayout) -> Result<String>;

    /// Authoritative nullifier registry lookup.
    async fn is_nullifier_spent(&self, nullifier_hash: [u8; 32]) -> Result<bool>;

    /// Record a nullifier in the on-chain registry. The durable source of
    /// truth for double-spend prevention.
    async fn mark_nullifier_spent(&self, nullifier_hash: [u8; 32]) -> Result<()>;
}

/// The external prover/verifier pair, treated as an opaque black box with
/// standard soundness and completeness.
#[async_trait]
pub trait ProofSystem: Send + Sync {
    async fn prove(&self, witness: &ProofWitness) -> Result<Vec<u8>>;
    async fn verify(&self, proof: &[u8], public_inputs: &PublicInputs) -> Result<bool>;
}

/// Injected signing capability for destination-chain payouts. A process
/// singleton in deployments, a mock in tests.
pub trait PayoutSigner: Send + Sync {
    fn address(&self) -> String;
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>>;
}

/// Operator payout key.
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn from_hex(text: &str) -> Result<Self> {
        let digits = text.strip_prefix("0x").unwrap_or(text);
        let raw = hex::decode(digits)
            .map_err(|_| ProtocolError::InvalidAddress(format!("operator key: {text}")))?;
        let seed: [u8; 32] = raw
            .try_into()
            .map_err(|_| ProtocolError::InvalidAddress("operator key must be 32 bytes".into()))?;
        Ok(Self::from_seed(seed))
    }
}

impl PayoutSigner for Ed25519Signer {
    fn address(&self) -> String {
        format!("0x{}", hex::encode(self.key.verifying_key().to_bytes()))
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.sign(payload).to_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monsoon_common::{fr_to_bytes, Fr, Poseidon};

    fn event(leaf: u64, block: u64, tx: u32) -> LeafEvent {
        LeafEvent {
            leaf: fr_to_bytes(&Fr::from(leaf)),
            block_number: block,
            tx_index: tx,
        }
    }

    #[test]
    fn events_sort_by_block_then_tx_index() {
        let mut events = vec![event(3, 7, 0), event(1, 2, 5), event(2, 2, 9)];
        sort_leaf_events(&mut events);
        let order: Vec<u64> = events.iter().map(|e| e.block_number).collect();
        assert_eq!(order, vec![2, 2, 7]);
        assert_eq!(events[0].tx_index, 5);
        assert_eq!(events[1].tx_index, 9);
    }

    #[test]
    fn rebuild_matches_direct_insertion() {
        let events = vec![event(11, 5, 1), event(12, 3, 0), event(13, 5, 0)];
        let rebuilt = rebuild_accumulator(4, Poseidon, events).unwrap();

        // Canonical order: block 3, then block 5 tx 0, then block 5 tx 1.
        let mut direct = MerkleAccumulator::new(4, Poseidon).unwrap();
        direct.insert(Fr::from(12u64)).unwrap();
        direct.insert(Fr::from(13u64)).unwrap();
        direct.insert(Fr::from(11u64)).unwrap();

        assert_eq!(rebuilt.root(), direct.root());
    }

    #[test]
    fn rebuild_rejects_out_of_field_leaf() {
        let bad = LeafEvent {
            leaf: [0xff; 32],
            block_number: 1,
            tx_index: 0,
        };
        assert!(rebuild_accumulator(4, Poseidon, vec![bad]).is_err());
    }

    #[test]
    fn signer_is_deterministic_over_payload() {
        let signer = Ed25519Signer::from_seed([7u8; 32]);
        let payload = b"payout";
        assert_eq!(
            signer.sign(payload).unwrap(),
            signer.sign(payload).unwrap()
        );
        assert!(signer.address().starts_with("0x"));
    }

    #[test]
    fn signer_rejects_malformed_key_material() {
        assert!(Ed25519Signer::from_hex("0x1234").is_err());
        assert!(Ed25519Signer::from_hex("not hex").is_err());
        let seed = format!("0x{}", hex::encode([9u8; 32]));
        assert!(Ed25519Signer::from_hex(&seed).is_ok());
    }
}
