use keystone_serialize::{malformed, KeystoneSerialize};

/// A nonnegative 128-bit token amount.
///
/// Arithmetic is checked: `checked_sub` is the only operation that can fail
/// in normal use, and overflow of the 128-bit domain on addition is treated
/// as fatal by callers. The canonical wire form is a fixed 16-byte
/// big-endian encoding, part of the consensus contract for account records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Balance(u128);

impl Balance {
    pub const ZERO: Balance = Balance(0);

    pub fn new(value: u128) -> Self {
        Balance(value)
    }

    pub fn value(&self) -> u128 {
        self.0
    }

    /// `self + other`, or `None` on overflow of the 128-bit domain.
    pub fn checked_add(self, other: Balance) -> Option<Balance> {
        self.0.checked_add(other.0).map(Balance)
    }

    /// `self - other`, or `None` if `other` exceeds `self`.
    pub fn checked_sub(self, other: Balance) -> Option<Balance> {
        self.0.checked_sub(other.0).map(Balance)
    }

    /// Canonical fixed-size 16-byte big-endian encoding.
    pub fn to_fixed_bytes(&self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    /// Decode the canonical 16-byte big-endian encoding.
    pub fn from_fixed_bytes(raw: &[u8]) -> Result<Balance, std::io::Error> {
        if raw.len() != 16 {
            return Err(malformed("balance needs exactly 16 bytes"));
        }
        Ok(Balance(u128::from_be_bytes(raw.try_into().unwrap())))
    }
}

impl From<u128> for Balance {
    fn from(value: u128) -> Self {
        Balance(value)
    }
}

impl std::fmt::Display for Balance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl KeystoneSerialize for Balance {
    fn serialize_keystone(&self) -> Result<Vec<u8>, std::io::Error> {
        self.0.serialize_keystone()
    }

    fn deserialize_keystone(data: &[u8]) -> Result<Self, std::io::Error> {
        Ok(Balance(u128::deserialize_keystone(data)?))
    }
}
