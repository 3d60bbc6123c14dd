//! Portable bearer notes.
//!
//! A note carries the secret material needed to redeem a validated
//! deposit. Whoever holds the decoded note holds the asset, so the
//! encoding is opaque and order-unpredictable (it embeds two ~254-bit
//! secrets) and must be lossless for every field.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};

use monsoon_common::{commitment, fr_from_hex, nullifier_hash, DepositSecrets, FieldHasher, Fr};

use crate::currency::Direction;
use crate::error::{ProtocolError, Result};

/// Material the prover needs beyond the secrets themselves: the exact
/// deposited amount and, once the commitment is mirrored, its leaf index
/// on the destination tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofPreimage {
    pub amount: u128,
    pub leaf_index: Option<u64>,
}

/// The redeemable bearer token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub currency: String,
    pub direction: Direction,
    pub secret: String,
    pub nullifier: String,
    pub commitment: String,
    pub proof_preimage: ProofPreimage,
}

/// A note's fields parsed back into the field, with derived values
/// re-checked against the embedded ones.
#[derive(Clone, Copy, Debug)]
pub struct NoteParts {
    pub secrets: DepositSecrets,
    pub currency: Fr,
    pub commitment: Fr,
    pub nullifier_hash: Fr,
    pub amount: u128,
    pub leaf_index: u64,
}

impl Note {
    /// Serialize and wrap as an opaque token.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("note serialization cannot fail");
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|err| ProtocolError::MalformedNote(format!("bad encoding: {err}")))?;
        serde_json::from_slice(&raw)
            .map_err(|err| ProtocolError::MalformedNote(format!("bad payload: {err}")))
    }

    /// Parse the hex fields and recompute the commitment and nullifier
    /// hash from the embedded secrets. A tampered or foreign note fails
    /// here before any chain or proof work.
    pub fn integrity_check<H: FieldHasher>(&self, hasher: &H) -> Result<NoteParts> {
        let secrets = DepositSecrets {
            secret: fr_from_hex(&self.secret)?,
            nullifier: fr_from_hex(&self.nullifier)?,
        };
        let currency = fr_from_hex(&self.currency)?;
        let embedded = fr_from_hex(&self.commitment)?;

        let leaf_index = self.proof_preimage.leaf_index.ok_or_else(|| {
            ProtocolError::MalformedNote("note was issued without a leaf index".into())
        })?;

        let derived = commitment(hasher, &secrets, currency, self.proof_preimage.amount);
        if derived != embedded {
            return Err(ProtocolError::MalformedNote(
                "commitment does not match secret material".into(),
            ));
        }

        Ok(NoteParts {
            secrets,
            currency,
            commitment: derived,
            nullifier_hash: nullifier_hash(hasher, secrets.nullifier),
            amount: self.proof_preimage.amount,
            leaf_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monsoon_common::{fr_to_hex, Poseidon};

    fn sample_note() -> Note {
        let h = Poseidon;
        let secrets = DepositSecrets {
            secret: Fr::from(7u64),
            nullifier: Fr::from(9u64),
        };
        let currency = Fr::from(0xaaau64);
        let amount = 1_000u128;
        Note {
            currency: fr_to_hex(&currency),
            direction: Direction::LocalToRemote,
            secret: fr_to_hex(&secrets.secret),
            nullifier: fr_to_hex(&secrets.nullifier),
            commitment: fr_to_hex(&commitment(&h, &secrets, currency, amount)),
            proof_preimage: ProofPreimage {
                amount,
                leaf_index: Some(0),
            },
        }
    }

    #[test]
    fn encoding_round_trips_losslessly() {
        let note = sample_note();
        let token = note.encode();
        assert_eq!(Note::decode(&token).unwrap(), note);
    }

    #[test]
    fn large_amounts_survive_encoding() {
        let mut note = sample_note();
        note.proof_preimage.amount = u128::MAX;
        let decoded = Note::decode(&note.encode()).unwrap();
        assert_eq!(decoded.proof_preimage.amount, u128::MAX);
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        assert!(matches!(
            Note::decode("not a note"),
            Err(ProtocolError::MalformedNote(_))
        ));
        assert!(matches!(
            Note::decode(&URL_SAFE_NO_PAD.encode(b"{}")),
            Err(ProtocolError::MalformedNote(_))
        ));
    }

    #[test]
    fn intact_note_passes_integrity_check() {
        let parts = sample_note().integrity_check(&Poseidon).unwrap();
        assert_eq!(parts.amount, 1_000);
        assert_eq!(parts.leaf_index, 0);
    }

    #[test]
    fn tampered_amount_fails_integrity_check() {
        let mut note = sample_note();
        note.proof_preimage.amount = 1_001;
        assert!(matches!(
            note.integrity_check(&Poseidon),
            Err(ProtocolError::MalformedNote(_))
        ));
    }

    #[test]
    fn tampered_currency_fails_integrity_check() {
        let mut note = sample_note();
        note.currency = fr_to_hex(&Fr::from(0xbbbu64));
        assert!(note.integrity_check(&Poseidon).is_err());
    }

    #[test]
    fn foreign_secret_fails_integrity_check() {
        let mut note = sample_note();
        note.secret = fr_to_hex(&Fr::from(1234u64));
        assert!(note.integrity_check(&Poseidon).is_err());
    }
}
