//! Field-element encoding helpers.
//!
//! All public values in the protocol are elements of the bn256 scalar
//! field. Anything arriving from the wire (hex token ids, decoded note
//! secrets, event leaves) passes through these parsers, so a value that
//! is not a canonical element is rejected before it ever reaches a hash.

use halo2curves_axiom::ff::{Field, PrimeField};
use rand::{CryptoRng, RngCore};
use thiserror::Error;

pub use halo2curves_axiom::bn256::Fr;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("value is not a canonical field element (>= field modulus)")]
    OutOfField,

    #[error("invalid field element hex: {0}")]
    InvalidHex(String),
}

/// Canonical little-endian 32-byte encoding of a field element.
pub fn fr_to_bytes(fr: &Fr) -> [u8; 32] {
    let repr = fr.to_repr();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(repr.as_ref());
    bytes
}

/// Parse the canonical little-endian encoding, rejecting anything >= the
/// field modulus.
pub fn fr_from_bytes(bytes: &[u8; 32]) -> Result<Fr, FieldError> {
    Fr::from_bytes(bytes)
        .into_option()
        .ok_or(FieldError::OutOfField)
}

/// Render a field element as 0x-prefixed big-endian hex.
pub fn fr_to_hex(fr: &Fr) -> String {
    let mut bytes = fr_to_bytes(fr);
    bytes.reverse();
    format!("0x{}", hex::encode(bytes))
}

/// Parse a 0x-prefixed (or bare) big-endian hex integer into the field.
///
/// Shorter strings are left-padded with zeros; more than 64 nibbles or a
/// canonical overflow is an error.
pub fn fr_from_hex(text: &str) -> Result<Fr, FieldError> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    if digits.is_empty() || digits.len() > 64 {
        return Err(FieldError::InvalidHex(text.to_string()));
    }
    let padded = format!("{:0>64}", digits);
    let raw = hex::decode(&padded).map_err(|_| FieldError::InvalidHex(text.to_string()))?;
    let mut be = [0u8; 32];
    be.copy_from_slice(&raw);
    be.reverse();
    fr_from_bytes(&be)
}

/// Every u128 is below the modulus, so this cannot fail.
pub fn fr_from_u128(value: u128) -> Fr {
    Fr::from_u128(value)
}

/// Fold arbitrary big-endian bytes into the field as a base-256 integer.
/// Used for values with no canonical-encoding guarantee, e.g. raw digests.
pub fn reduce_be_bytes_to_fr(bytes: &[u8; 32]) -> Fr {
    let mut acc = Fr::zero();
    let base = Fr::from(256);
    for byte in bytes.iter() {
        acc = acc * base + Fr::from(*byte as u64);
    }
    acc
}

/// Uniformly random field element (full-width rejection sampling, so the
/// result carries the field's ~254 bits of entropy).
pub fn random_fr<R: RngCore + CryptoRng>(rng: &mut R) -> Fr {
    Fr::random(rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn bytes_round_trip() {
        let value = Fr::from(2024u64);
        let bytes = fr_to_bytes(&value);
        let reconstructed = fr_from_bytes(&bytes).unwrap();
        assert_eq!(value, reconstructed);
    }

    #[test]
    fn hex_round_trip() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        for _ in 0..16 {
            let value = random_fr(&mut rng);
            let text = fr_to_hex(&value);
            assert_eq!(fr_from_hex(&text).unwrap(), value);
        }
    }

    #[test]
    fn small_hex_parses() {
        assert_eq!(fr_from_hex("0x01").unwrap(), Fr::one());
        assert_eq!(fr_from_hex("ff").unwrap(), Fr::from(255u64));
    }

    #[test]
    fn modulus_is_rejected() {
        // The bn256 scalar modulus itself, big-endian.
        let modulus = "0x30644e72e131a029b85045b68181585d2833e84879b9709143e1f593f0000001";
        assert_eq!(fr_from_hex(modulus), Err(FieldError::OutOfField));
        // One below it is the largest valid element.
        let max = "0x30644e72e131a029b85045b68181585d2833e84879b9709143e1f593f0000000";
        assert!(fr_from_hex(max).is_ok());
    }

    #[test]
    fn malformed_hex_is_rejected() {
        assert!(matches!(fr_from_hex(""), Err(FieldError::InvalidHex(_))));
        assert!(matches!(fr_from_hex("0xzz"), Err(FieldError::InvalidHex(_))));
        let too_long = format!("0x{}", "0".repeat(65));
        assert!(matches!(
            fr_from_hex(&too_long),
            Err(FieldError::InvalidHex(_))
        ));
    }

    #[test]
    fn reduction_matches_small_integers() {
        let mut bytes = [0u8; 32];
        bytes[31] = 5;
        assert_eq!(reduce_be_bytes_to_fr(&bytes), Fr::from(5u64));
        bytes[30] = 1;
        assert_eq!(reduce_be_bytes_to_fr(&bytes), Fr::from(261u64));
    }
}
