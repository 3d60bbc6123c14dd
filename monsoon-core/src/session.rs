//! Deposit sessions.
//!
//! A session tracks one deposit from request to validation. While OPEN it
//! is the only holder of the secret material; `finalize` clears it and
//! hands it out exactly once, moving custody to the bearer note. Expiry
//! is advisory: a TTL comparison at read time, no background sweep.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use monsoon_common::{
    commitment, fr_from_bytes, fr_to_bytes, DepositSecrets, FieldHasher, Fr,
};

use crate::currency::Direction;
use crate::error::{ProtocolError, Result};
use crate::note::ProofPreimage;
use crate::store::SessionStore;
use crate::{DEPOSIT_METHOD, SESSION_TTL_SECS};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub sender: String,
    pub currency: [u8; 32],
    pub amount: u128,
    pub direction: Direction,
    pub created_at: u64,
    pub expires_at: u64,
    /// Secret material, present only while the session is OPEN.
    pub secret: Option<[u8; 32]>,
    pub nullifier: Option<[u8; 32]>,
    pub commitment: Option<[u8; 32]>,
    pub proof_preimage: Option<ProofPreimage>,
    /// Empty until validated.
    pub tx_hash: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Open,
    Validated,
    Expired,
}

impl SessionRecord {
    pub fn status(&self, now: u64) -> SessionStatus {
        if !self.tx_hash.is_empty() {
            SessionStatus::Validated
        } else if now > self.expires_at {
            SessionStatus::Expired
        } else {
            SessionStatus::Open
        }
    }
}

/// Unsigned transaction material the depositor submits on the source
/// chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositInstructions {
    pub to: String,
    pub method: String,
    pub currency: [u8; 32],
    pub amount: u128,
    pub commitment: [u8; 32],
}

/// Secret material released by `finalize`, exactly once per session.
#[derive(Clone, Copy, Debug)]
pub struct FinalizedDeposit {
    pub secrets: DepositSecrets,
    pub commitment: Fr,
    pub preimage: ProofPreimage,
}

/// Session bookkeeping over a [`SessionStore`].
#[derive(Clone)]
pub struct SessionLedger {
    store: SessionStore,
    ttl: Duration,
}

impl SessionLedger {
    pub fn new(store: SessionStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn with_default_ttl(store: SessionStore) -> Self {
        Self::new(store, Duration::from_secs(SESSION_TTL_SECS))
    }

    /// Create an OPEN session: draw secrets, derive the expected
    /// commitment, record the TTL. No chain interaction happens here.
    pub fn open<H: FieldHasher>(
        &self,
        hasher: &H,
        sender: &str,
        currency: [u8; 32],
        amount: u128,
        direction: Direction,
        bridge_address: &str,
    ) -> Result<(SessionRecord, DepositInstructions)> {
        let currency_fr = fr_from_bytes(&currency)?;
        let secrets = DepositSecrets::random(&mut OsRng);
        let leaf = commitment(hasher, &secrets, currency_fr, amount);

        let now = unix_now();
        let record = SessionRecord {
            id: Uuid::new_v4(),
            sender: sender.to_string(),
            currency,
            amount,
            direction,
            created_at: now,
            expires_at: now + self.ttl.as_secs(),
            secret: Some(fr_to_bytes(&secrets.secret)),
            nullifier: Some(fr_to_bytes(&secrets.nullifier)),
            commitment: Some(fr_to_bytes(&leaf)),
            proof_preimage: Some(ProofPreimage {
                amount,
                leaf_index: None,
            }),
            tx_hash: String::new(),
        };
        self.store.put(&record)?;
        info!(session = %record.id, sender = %sender, "opened deposit session");

        let instructions = DepositInstructions {
            to: bridge_address.to_string(),
            method: DEPOSIT_METHOD.to_string(),
            currency,
            amount,
            commitment: fr_to_bytes(&leaf),
        };
        Ok((record, instructions))
    }

    pub fn get(&self, id: &Uuid) -> Result<SessionRecord> {
        self.store.get(id)?.ok_or(ProtocolError::SessionNotFound)
    }

    /// Reject every state in which `id` must not be validated against
    /// `tx_hash`. The session is left untouched.
    pub fn guard_validation(&self, record: &SessionRecord, tx_hash: &str) -> Result<()> {
        match record.status(unix_now()) {
            SessionStatus::Validated => return Err(ProtocolError::AlreadyValidated),
            SessionStatus::Expired => return Err(ProtocolError::SessionExpired),
            SessionStatus::Open => {}
        }
        if self.store.tx_hash_in_use(tx_hash)? {
            return Err(ProtocolError::DuplicateTx(tx_hash.to_string()));
        }
        Ok(())
    }

    /// Consume the session: clear the secret material, bind the
    /// transaction hash, record the destination leaf index, and release
    /// the secrets to the caller. This is the single point where custody
    /// moves from the ledger to the bearer note.
    pub fn finalize(
        &self,
        id: &Uuid,
        tx_hash: &str,
        leaf_index: u64,
    ) -> Result<FinalizedDeposit> {
        let mut record = self.get(id)?;
        match record.status(unix_now()) {
            SessionStatus::Validated => return Err(ProtocolError::AlreadyValidated),
            SessionStatus::Expired => return Err(ProtocolError::SessionExpired),
            SessionStatus::Open => {}
        }

        let secret = record.secret.take().ok_or(ProtocolError::AlreadyValidated)?;
        let nullifier = record
            .nullifier
            .take()
            .ok_or(ProtocolError::AlreadyValidated)?;
        let leaf = record
            .commitment
            .take()
            .ok_or(ProtocolError::AlreadyValidated)?;
        let mut preimage = record
            .proof_preimage
            .take()
            .ok_or(ProtocolError::AlreadyValidated)?;
        preimage.leaf_index = Some(leaf_index);

        record.tx_hash = tx_hash.to_string();
        self.store.put(&record)?;
        info!(session = %record.id, tx_hash = %tx_hash, leaf_index, "session validated");

        Ok(FinalizedDeposit {
            secrets: DepositSecrets {
                secret: fr_from_bytes(&secret)?,
                nullifier: fr_from_bytes(&nullifier)?,
            },
            commitment: fr_from_bytes(&leaf)?,
            preimage,
        })
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use monsoon_common::Poseidon;

    fn ledger(ttl_secs: u64) -> SessionLedger {
        SessionLedger::new(SessionStore::in_memory(), Duration::from_secs(ttl_secs))
    }

    fn currency_id() -> [u8; 32] {
        fr_to_bytes(&Fr::from(0xaaau64))
    }

    #[test]
    fn open_sessions_hold_secret_material() {
        let ledger = ledger(900);
        let (record, instructions) = ledger
            .open(
                &Poseidon,
                "0xsender",
                currency_id(),
                100,
                Direction::LocalToRemote,
                "0xbridge",
            )
            .unwrap();
        assert_eq!(record.status(unix_now()), SessionStatus::Open);
        assert!(record.secret.is_some());
        assert!(record.nullifier.is_some());
        assert_eq!(instructions.method, DEPOSIT_METHOD);
        assert_eq!(instructions.commitment, record.commitment.unwrap());
        assert_eq!(instructions.amount, 100);
    }

    #[test]
    fn finalize_clears_secrets_and_releases_them_once() {
        let ledger = ledger(900);
        let (record, _) = ledger
            .open(
                &Poseidon,
                "0xsender",
                currency_id(),
                100,
                Direction::LocalToRemote,
                "0xbridge",
            )
            .unwrap();

        let finalized = ledger.finalize(&record.id, "0xabc", 0).unwrap();
        assert_eq!(
            fr_to_bytes(&finalized.commitment),
            record.commitment.unwrap()
        );
        assert_eq!(finalized.preimage.leaf_index, Some(0));

        let stored = ledger.get(&record.id).unwrap();
        assert_eq!(stored.status(unix_now()), SessionStatus::Validated);
        assert!(stored.secret.is_none());
        assert!(stored.nullifier.is_none());
        assert!(stored.commitment.is_none());
        assert!(stored.proof_preimage.is_none());
        assert_eq!(stored.tx_hash, "0xabc");

        // Second finalize is rejected.
        assert!(matches!(
            ledger.finalize(&record.id, "0xdef", 1),
            Err(ProtocolError::AlreadyValidated)
        ));
    }

    #[test]
    fn guards_reject_bad_states() {
        let ledger = ledger(900);
        let (record, _) = ledger
            .open(
                &Poseidon,
                "0xsender",
                currency_id(),
                100,
                Direction::LocalToRemote,
                "0xbridge",
            )
            .unwrap();

        assert!(ledger.guard_validation(&record, "0xabc").is_ok());

        ledger.finalize(&record.id, "0xabc", 0).unwrap();
        let validated = ledger.get(&record.id).unwrap();
        assert!(matches!(
            ledger.guard_validation(&validated, "0xother"),
            Err(ProtocolError::AlreadyValidated)
        ));

        // A second session cannot reuse the first one's transaction.
        let (second, _) = ledger
            .open(
                &Poseidon,
                "0xsender",
                currency_id(),
                100,
                Direction::LocalToRemote,
                "0xbridge",
            )
            .unwrap();
        assert!(matches!(
            ledger.guard_validation(&second, "0xabc"),
            Err(ProtocolError::DuplicateTx(_))
        ));
    }

    #[test]
    fn expired_sessions_fail_closed() {
        let ledger = ledger(0);
        let (mut record, _) = ledger
            .open(
                &Poseidon,
                "0xsender",
                currency_id(),
                100,
                Direction::LocalToRemote,
                "0xbridge",
            )
            .unwrap();
        // TTL of zero expires at the next whole second; backdate instead
        // of sleeping.
        record.expires_at = record.created_at.saturating_sub(1);
        ledger.store.put(&record).unwrap();

        let stale = ledger.get(&record.id).unwrap();
        assert_eq!(stale.status(unix_now()), SessionStatus::Expired);
        assert!(matches!(
            ledger.guard_validation(&stale, "0xabc"),
            Err(ProtocolError::SessionExpired)
        ));
        assert!(matches!(
            ledger.finalize(&record.id, "0xabc", 0),
            Err(ProtocolError::SessionExpired)
        ));
    }

    #[test]
    fn unknown_session_is_not_found() {
        let ledger = ledger(900);
        assert!(matches!(
            ledger.get(&Uuid::new_v4()),
            Err(ProtocolError::SessionNotFound)
        ));
    }
}
