//! Table-driven currency correspondence between the two chains.
//!
//! The mapping is fixed at construction, never computed; an unmapped
//! currency fails before any cryptographic work.

use serde::{Deserialize, Serialize};

use monsoon_common::fr_from_bytes;

use crate::error::{ProtocolError, Result};

/// Which chain the deposit leg runs on. The payout always happens on the
/// opposite chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    LocalToRemote,
    RemoteToLocal,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::LocalToRemote => Direction::RemoteToLocal,
            Direction::RemoteToLocal => Direction::LocalToRemote,
        }
    }
}

/// One currency correspondence row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub local: [u8; 32],
    pub remote: [u8; 32],
    pub local_decimals: u8,
    pub remote_decimals: u8,
}

impl CurrencyPair {
    /// Currency the deposit carries for `direction`.
    pub fn deposit_currency(&self, direction: Direction) -> [u8; 32] {
        match direction {
            Direction::LocalToRemote => self.local,
            Direction::RemoteToLocal => self.remote,
        }
    }

    /// Currency the payout carries for `direction`.
    pub fn payout_currency(&self, direction: Direction) -> [u8; 32] {
        match direction {
            Direction::LocalToRemote => self.remote,
            Direction::RemoteToLocal => self.local,
        }
    }

    /// Rescale a base-unit amount across the decimal difference between
    /// the two legs. Lossless or rejected: overflow and truncating
    /// divisions both fail as input validation.
    pub fn payout_amount(&self, direction: Direction, amount: u128) -> Result<u128> {
        let (from, to) = match direction {
            Direction::LocalToRemote => (self.local_decimals, self.remote_decimals),
            Direction::RemoteToLocal => (self.remote_decimals, self.local_decimals),
        };
        if from == to {
            return Ok(amount);
        }
        if to > from {
            let scale = 10u128
                .checked_pow((to - from) as u32)
                .ok_or(ProtocolError::AmountNotRepresentable(amount))?;
            amount
                .checked_mul(scale)
                .ok_or(ProtocolError::AmountNotRepresentable(amount))
        } else {
            let scale = 10u128
                .checked_pow((from - to) as u32)
                .ok_or(ProtocolError::AmountNotRepresentable(amount))?;
            if amount % scale != 0 {
                return Err(ProtocolError::AmountNotRepresentable(amount));
            }
            Ok(amount / scale)
        }
    }
}

/// Fixed currency↔currency correspondence table.
#[derive(Clone, Debug, Default)]
pub struct CurrencyTable {
    pairs: Vec<CurrencyPair>,
}

impl CurrencyTable {
    /// Build the table, checking every id is a canonical field element and
    /// no id appears twice on its side.
    pub fn new(pairs: Vec<CurrencyPair>) -> Result<Self> {
        for pair in &pairs {
            fr_from_bytes(&pair.local)?;
            fr_from_bytes(&pair.remote)?;
        }
        for (index, pair) in pairs.iter().enumerate() {
            for other in &pairs[index + 1..] {
                if pair.local == other.local || pair.remote == other.remote {
                    return Err(ProtocolError::UnsupportedCurrency(
                        "duplicate currency id in table".into(),
                    ));
                }
            }
        }
        Ok(Self { pairs })
    }

    /// Row whose deposit-side id for `direction` matches `currency`.
    pub fn lookup(&self, direction: Direction, currency: [u8; 32]) -> Result<&CurrencyPair> {
        self.pairs
            .iter()
            .find(|pair| pair.deposit_currency(direction) == currency)
            .ok_or_else(|| {
                ProtocolError::UnsupportedCurrency(format!("0x{}", hex::encode(currency)))
            })
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monsoon_common::{fr_to_bytes, Fr};

    fn id(value: u64) -> [u8; 32] {
        fr_to_bytes(&Fr::from(value))
    }

    fn pair() -> CurrencyPair {
        CurrencyPair {
            local: id(0xaaa),
            remote: id(0xbbb),
            local_decimals: 18,
            remote_decimals: 18,
        }
    }

    #[test]
    fn lookup_follows_direction() {
        let table = CurrencyTable::new(vec![pair()]).unwrap();
        assert!(table.lookup(Direction::LocalToRemote, id(0xaaa)).is_ok());
        assert!(table.lookup(Direction::RemoteToLocal, id(0xbbb)).is_ok());
        assert!(matches!(
            table.lookup(Direction::LocalToRemote, id(0xbbb)),
            Err(ProtocolError::UnsupportedCurrency(_))
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut second = pair();
        second.remote = id(0xccc);
        assert!(CurrencyTable::new(vec![pair(), second]).is_err());
    }

    #[test]
    fn out_of_field_id_is_rejected() {
        let mut bad = pair();
        bad.local = [0xff; 32];
        assert!(CurrencyTable::new(vec![bad]).is_err());
    }

    #[test]
    fn amounts_rescale_losslessly() {
        let mut p = pair();
        p.local_decimals = 18;
        p.remote_decimals = 6;
        assert_eq!(
            p.payout_amount(Direction::LocalToRemote, 5_000_000_000_000_000_000)
                .unwrap(),
            5_000_000
        );
        assert_eq!(
            p.payout_amount(Direction::RemoteToLocal, 5_000_000).unwrap(),
            5_000_000_000_000_000_000
        );
        // A truncating conversion is rejected, not rounded.
        assert!(matches!(
            p.payout_amount(Direction::LocalToRemote, 1),
            Err(ProtocolError::AmountNotRepresentable(1))
        ));
    }

    #[test]
    fn rescale_overflow_is_rejected() {
        let mut p = pair();
        p.local_decimals = 0;
        p.remote_decimals = 30;
        assert!(p
            .payout_amount(Direction::LocalToRemote, u128::MAX / 2)
            .is_err());
    }
}
