//! Cross-chain withdrawal orchestration.
//!
//! Per deposit the machine runs OPEN → VALIDATED → NOTE_ISSUED →
//! REDEEMED, with FAILED reachable from every step. The protocol issues
//! at most one outstanding chain-mutating call per step and waits for
//! its confirmation before advancing, so a double submission cannot
//! race itself. Racing redemptions on one nullifier are serialized by
//! the destination chain's registry: the first payout to be mined wins
//! and the loser observes `AlreadyRedeemed`.

use std::sync::{Arc, RwLock};

use tracing::{error, info, warn};
use uuid::Uuid;

use monsoon_common::{fr_to_bytes, fr_to_hex, nullifier_hash, FieldHasher};
use monsoon_merkle::MerkleAccumulator;

use crate::chain::{
    rebuild_accumulator, ChainReader, ChainWriter, PayoutRequest, PayoutSigner, ProofSystem,
    ProofWitness, PublicInputs, SignedPayout,
};
use crate::currency::{CurrencyTable, Direction};
use crate::error::{ProtocolError, Result};
use crate::note::Note;
use crate::session::{unix_now, DepositInstructions, SessionLedger, SessionRecord};
use crate::store::{RedemptionRecord, RedemptionStore};
use crate::DEPOSIT_METHOD;

/// Which of the two chains an operation addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

impl Direction {
    pub fn source_side(self) -> Side {
        match self {
            Direction::LocalToRemote => Side::Local,
            Direction::RemoteToLocal => Side::Remote,
        }
    }

    pub fn destination_side(self) -> Side {
        match self {
            Direction::LocalToRemote => Side::Remote,
            Direction::RemoteToLocal => Side::Local,
        }
    }
}

/// One chain as the protocol sees it: its collaborators, the bridge
/// contract address, and the local mirror of its commitment tree.
pub struct ChainEnd<H: FieldHasher> {
    name: String,
    bridge_address: String,
    reader: Arc<dyn ChainReader>,
    writer: Arc<dyn ChainWriter>,
    tree: RwLock<MerkleAccumulator<H>>,
}

impl<H: FieldHasher + Clone> ChainEnd<H> {
    pub fn new(
        name: impl Into<String>,
        bridge_address: impl Into<String>,
        reader: Arc<dyn ChainReader>,
        writer: Arc<dyn ChainWriter>,
        levels: u32,
        hasher: H,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            bridge_address: bridge_address.into(),
            reader,
            writer,
            tree: RwLock::new(MerkleAccumulator::new(levels, hasher)?),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tree_root(&self) -> [u8; 32] {
        fr_to_bytes(&self.tree.read().expect("tree poisoned").root())
    }

    pub fn leaf_count(&self) -> usize {
        self.tree.read().expect("tree poisoned").leaf_count()
    }
}

/// Result of opening a deposit session.
#[derive(Clone, Debug)]
pub struct OpenDeposit {
    pub session_id: Uuid,
    pub expires_at: u64,
    pub instructions: DepositInstructions,
}

/// Result of a successful redemption.
#[derive(Clone, Debug)]
pub struct Redemption {
    pub payout_tx: String,
    pub nullifier_hash: String,
    pub amount: u128,
}

pub struct WithdrawalProtocol<H: FieldHasher + Clone> {
    hasher: H,
    local: ChainEnd<H>,
    remote: ChainEnd<H>,
    proof_system: Arc<dyn ProofSystem>,
    signer: Arc<dyn PayoutSigner>,
    sessions: SessionLedger,
    redemptions: RedemptionStore,
    currencies: CurrencyTable,
}

impl<H: FieldHasher + Clone> WithdrawalProtocol<H> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hasher: H,
        local: ChainEnd<H>,
        remote: ChainEnd<H>,
        proof_system: Arc<dyn ProofSystem>,
        signer: Arc<dyn PayoutSigner>,
        sessions: SessionLedger,
        redemptions: RedemptionStore,
        currencies: CurrencyTable,
    ) -> Self {
        Self {
            hasher,
            local,
            remote,
            proof_system,
            signer,
            sessions,
            redemptions,
            currencies,
        }
    }

    pub fn end(&self, side: Side) -> &ChainEnd<H> {
        match side {
            Side::Local => &self.local,
            Side::Remote => &self.remote,
        }
    }

    /// Open a deposit session. Fails fast on an unmapped currency or a
    /// malformed sender address; no chain or cryptographic work happens
    /// before those checks.
    pub fn open_deposit(
        &self,
        sender: &str,
        currency: [u8; 32],
        amount: u128,
        direction: Direction,
    ) -> Result<OpenDeposit> {
        let pair = self.currencies.lookup(direction, currency)?;
        // Reject a conversion that could not pay out before taking the
        // deposit.
        pair.payout_amount(direction, amount)?;
        validate_address(sender)?;

        let source = self.end(direction.source_side());
        let (record, instructions) = self.sessions.open(
            &self.hasher,
            sender,
            currency,
            amount,
            direction,
            &source.bridge_address,
        )?;
        Ok(OpenDeposit {
            session_id: record.id,
            expires_at: record.expires_at,
            instructions,
        })
    }

    /// Validate the depositor's source-chain transaction against the
    /// session and, on success, issue the bearer note.
    ///
    /// Ordering is the same for both directions: the source-chain event
    /// is confirmed first, then the commitment is registered on the
    /// destination chain and mirrored locally, and only then is the
    /// session finalized and the note emitted. A note is never issued
    /// for a commitment the destination chain cannot prove against.
    pub async fn validate_deposit(&self, session_id: &Uuid, tx_hash: &str) -> Result<String> {
        validate_tx_hash(tx_hash)?;
        let record = self.sessions.get(session_id)?;
        self.sessions.guard_validation(&record, tx_hash)?;

        let source = self.end(record.direction.source_side());
        let destination = self.end(record.direction.destination_side());

        let deposit = source.writer.fetch_deposit(tx_hash).await?;
        check_deposit_matches(&record, &source.bridge_address, &deposit)?;

        let leaf = record
            .commitment
            .ok_or(ProtocolError::AlreadyValidated)
            .and_then(|bytes| Ok(monsoon_common::fr_from_bytes(&bytes)?))?;

        // One outstanding chain-mutating call; wait for confirmation
        // before touching any local state.
        let registration_tx = destination.writer.register_commitment(deposit.commitment).await?;
        let leaf_index = {
            let mut tree = destination.tree.write().expect("tree poisoned");
            let root = tree.insert(leaf)?;
            info!(
                chain = destination.name.as_str(),
                root = %fr_to_hex(&root),
                "mirrored commitment into destination tree"
            );
            (tree.leaf_count() - 1) as u64
        };

        let finalized = self.sessions.finalize(session_id, tx_hash, leaf_index)?;

        let note = Note {
            currency: fr_to_hex(&monsoon_common::fr_from_bytes(&record.currency)?),
            direction: record.direction,
            secret: fr_to_hex(&finalized.secrets.secret),
            nullifier: fr_to_hex(&finalized.secrets.nullifier),
            commitment: fr_to_hex(&finalized.commitment),
            proof_preimage: finalized.preimage,
        };
        info!(
            session = %session_id,
            registration_tx = %registration_tx,
            leaf_index,
            "deposit validated, note issued"
        );
        Ok(note.encode())
    }

    /// Redeem a bearer note: integrity check, proof verification, the
    /// authoritative nullifier check, then exactly one payout.
    pub async fn redeem(&self, encoded_note: &str, recipient: &str) -> Result<Redemption> {
        validate_address(recipient)?;
        let note = Note::decode(encoded_note)?;
        let parts = note.integrity_check(&self.hasher)?;

        let pair = self
            .currencies
            .lookup(note.direction, fr_to_bytes(&parts.currency))?;
        let payout_currency = pair.payout_currency(note.direction);
        let payout_amount = pair.payout_amount(note.direction, parts.amount)?;

        let destination = self.end(note.direction.destination_side());
        let nullifier_tag = fr_to_bytes(&parts.nullifier_hash);

        // Witness and statement against the destination tree mirror.
        let (witness, public_inputs) = {
            let tree = destination.tree.read().expect("tree poisoned");
            let index = parts.leaf_index as usize;
            match tree.leaf_at(index) {
                Some(leaf) if leaf == parts.commitment => {}
                _ => return Err(ProtocolError::InvalidProof),
            }
            let path = tree.path_for(index)?;
            let root = tree.root();
            if !tree.root_is_known(root) {
                return Err(ProtocolError::UnknownRoot);
            }
            let witness = ProofWitness {
                secret: fr_to_bytes(&parts.secrets.secret),
                nullifier: fr_to_bytes(&parts.secrets.nullifier),
                currency: fr_to_bytes(&parts.currency),
                amount: parts.amount,
                leaf_index: parts.leaf_index,
                siblings: path.siblings.iter().map(fr_to_bytes).collect(),
                bits: path.bits,
            };
            let public_inputs = PublicInputs {
                root: fr_to_bytes(&root),
                nullifier_hash: nullifier_tag,
                recipient: recipient.to_string(),
                currency: payout_currency,
                amount: payout_amount,
            };
            (witness, public_inputs)
        };

        let proof = self.proof_system.prove(&witness).await?;
        if !self.proof_system.verify(&proof, &public_inputs).await? {
            return Err(ProtocolError::InvalidProof);
        }

        // Authoritative double-spend check. The local record is consulted
        // as well: it can be ahead of the chain after an unrecorded
        // payout, and failing closed there is the point.
        if self.redemptions.is_consumed(nullifier_tag)? {
            return Err(ProtocolError::AlreadyRedeemed);
        }
        if destination.writer.is_nullifier_spent(nullifier_tag).await? {
            return Err(ProtocolError::AlreadyRedeemed);
        }

        let payout = PayoutRequest {
            recipient: recipient.to_string(),
            currency: payout_currency,
            amount: payout_amount,
            nullifier_hash: nullifier_tag,
        };
        let signature = self.signer.sign(&payout.signing_bytes()?)?;
        let signed = SignedPayout {
            payout,
            operator: self.signer.address(),
            signature,
        };

        // The payout transaction is the serialization point: the chain
        // rejects a second payout for the same nullifier, so a lost race
        // surfaces here as AlreadyRedeemed with no funds moved.
        let payout_tx = destination.writer.submit_payout(&signed).await?;

        let record = RedemptionRecord {
            nullifier_hash: nullifier_tag,
            commitment: fr_to_bytes(&parts.commitment),
            payout_tx: payout_tx.clone(),
            redeemed_at: unix_now(),
        };

        match destination.writer.mark_nullifier_spent(nullifier_tag).await {
            Ok(()) => {
                if !self.redemptions.mark_consumed(&record)? {
                    warn!(
                        nullifier = %fr_to_hex(&parts.nullifier_hash),
                        "redemption record already present at marking time"
                    );
                }
                info!(
                    chain = destination.name.as_str(),
                    payout_tx = %payout_tx,
                    amount = %payout_amount,
                    "note redeemed"
                );
                Ok(Redemption {
                    payout_tx,
                    nullifier_hash: fr_to_hex(&parts.nullifier_hash),
                    amount: payout_amount,
                })
            }
            Err(err) => {
                // The dangerous case: funds moved but the registry write
                // failed. Keep the local record so retries fail closed,
                // and surface the gap for operator reconciliation.
                let _ = self.redemptions.mark_consumed(&record);
                error!(
                    chain = destination.name.as_str(),
                    payout_tx = %payout_tx,
                    nullifier = %fr_to_hex(&parts.nullifier_hash),
                    error = %err,
                    "payout submitted but nullifier marking failed; manual reconciliation required"
                );
                Err(ProtocolError::PayoutUnrecorded {
                    tx_hash: payout_tx,
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Rebuild one side's tree mirror purely from its historical deposit
    /// events. Returns the number of leaves recovered.
    pub async fn resync(&self, side: Side) -> Result<usize> {
        let end = self.end(side);
        let events = end.reader.query_leaf_events(0, u64::MAX).await?;
        let levels = end.tree.read().expect("tree poisoned").levels();
        let rebuilt = rebuild_accumulator(levels, self.hasher.clone(), events)?;
        let count = rebuilt.leaf_count();
        *end.tree.write().expect("tree poisoned") = rebuilt;
        info!(chain = end.name.as_str(), leaves = count, "tree resynced from events");
        Ok(count)
    }

    /// Recompute a note's public redemption tag without redeeming.
    pub fn nullifier_tag(&self, encoded_note: &str) -> Result<String> {
        let note = Note::decode(encoded_note)?;
        let nullifier = monsoon_common::fr_from_hex(&note.nullifier)?;
        Ok(fr_to_hex(&nullifier_hash(&self.hasher, nullifier)))
    }
}

fn validate_address(address: &str) -> Result<()> {
    let trimmed = address.trim();
    if trimmed.len() < 3 || trimmed.len() > 128 || !trimmed.starts_with("0x") {
        return Err(ProtocolError::InvalidAddress(address.to_string()));
    }
    if !trimmed[2..].chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ProtocolError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

fn validate_tx_hash(tx_hash: &str) -> Result<()> {
    let digits = match tx_hash.strip_prefix("0x") {
        Some(rest) if !rest.is_empty() => rest,
        _ => return Err(ProtocolError::InvalidTxHash(tx_hash.to_string())),
    };
    if digits.len() > 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ProtocolError::InvalidTxHash(tx_hash.to_string()));
    }
    Ok(())
}

fn check_deposit_matches(
    record: &SessionRecord,
    bridge_address: &str,
    deposit: &crate::chain::DepositTx,
) -> Result<()> {
    if deposit.sender != record.sender {
        return Err(mismatch("sender", &record.sender, &deposit.sender));
    }
    if deposit.recipient != bridge_address {
        return Err(mismatch("recipient", bridge_address, &deposit.recipient));
    }
    if deposit.method != DEPOSIT_METHOD {
        return Err(mismatch("method", DEPOSIT_METHOD, &deposit.method));
    }
    if deposit.currency != record.currency {
        return Err(mismatch(
            "currency",
            &hex::encode(record.currency),
            &hex::encode(deposit.currency),
        ));
    }
    if deposit.amount != record.amount {
        return Err(mismatch(
            "amount",
            &record.amount.to_string(),
            &deposit.amount.to_string(),
        ));
    }
    let expected_commitment = record.commitment.ok_or(ProtocolError::AlreadyValidated)?;
    if deposit.commitment != expected_commitment {
        return Err(mismatch(
            "commitment",
            &hex::encode(expected_commitment),
            &hex::encode(deposit.commitment),
        ));
    }
    Ok(())
}

fn mismatch(field: &'static str, expected: &str, actual: &str) -> ProtocolError {
    ProtocolError::ChainMismatch {
        field,
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_are_validated() {
        assert!(validate_address("0xabc123").is_ok());
        assert!(validate_address("").is_err());
        assert!(validate_address("abc123").is_err());
        assert!(validate_address("0x").is_err());
        assert!(validate_address("0xabc 123").is_err());
    }

    #[test]
    fn tx_hashes_are_validated() {
        assert!(validate_tx_hash("0xdeadbeef").is_ok());
        assert!(validate_tx_hash("deadbeef").is_err());
        assert!(validate_tx_hash("0x").is_err());
        assert!(validate_tx_hash("0xzz").is_err());
        let long = format!("0x{}", "a".repeat(65));
        assert!(validate_tx_hash(&long).is_err());
    }
}
