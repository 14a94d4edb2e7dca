//! Keystone canonical binary serialization primitives.
//!
//! This crate defines the explicit binary format used on the consensus path.
//! Two observers encoding the same logical value must produce the same bytes,
//! so every encoding here is fixed-width where possible and big-endian for
//! integer fields. There is no framework in the middle: the layout of each
//! composite type is spelled out at the call site that composes these
//! primitives.
//!
//! Core concepts:
//! - `KeystoneSerialize`: encodes/decodes a type to/from bytes.
//! - Integers encode big-endian at their natural width (`u64` as 8 bytes,
//!   `u128` as 16 bytes).
//! - `Option<[u8; 32]>` encodes as one marker byte (0=None, 1=Some) followed
//!   by the 32 bytes if present.
//! - `Vec<u8>` encodes as a `u32` big-endian length prefix followed by the
//!   raw bytes.
//!
//! Malformed input always surfaces as `std::io::ErrorKind::InvalidData`.

/// Serialize/deserialize a type using Keystone's canonical binary format.
pub trait KeystoneSerialize: Sized {
    fn serialize_keystone(&self) -> Result<Vec<u8>, std::io::Error>;
    fn deserialize_keystone(data: &[u8]) -> Result<Self, std::io::Error>;
}

/// Shorthand for the error every decoder returns on bad input.
pub fn malformed(reason: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, reason)
}

/// Borrow exactly `n` bytes from the front of `data`, or fail.
pub fn take_exact<'a>(data: &'a [u8], n: usize, what: &str) -> Result<&'a [u8], std::io::Error> {
    if data.len() < n {
        return Err(malformed(what));
    }
    Ok(&data[..n])
}

impl KeystoneSerialize for u64 {
    fn serialize_keystone(&self) -> Result<Vec<u8>, std::io::Error> {
        Ok(self.to_be_bytes().to_vec())
    }

    fn deserialize_keystone(data: &[u8]) -> Result<Self, std::io::Error> {
        let raw = take_exact(data, 8, "u64 needs 8 bytes")?;
        Ok(u64::from_be_bytes(raw.try_into().unwrap()))
    }
}

impl KeystoneSerialize for u128 {
    fn serialize_keystone(&self) -> Result<Vec<u8>, std::io::Error> {
        Ok(self.to_be_bytes().to_vec())
    }

    fn deserialize_keystone(data: &[u8]) -> Result<Self, std::io::Error> {
        let raw = take_exact(data, 16, "u128 needs 16 bytes")?;
        Ok(u128::from_be_bytes(raw.try_into().unwrap()))
    }
}

impl KeystoneSerialize for [u8; 32] {
    fn serialize_keystone(&self) -> Result<Vec<u8>, std::io::Error> {
        Ok(self.to_vec())
    }

    fn deserialize_keystone(data: &[u8]) -> Result<Self, std::io::Error> {
        let raw = take_exact(data, 32, "hash needs 32 bytes")?;
        Ok(raw.try_into().unwrap())
    }
}

impl KeystoneSerialize for Option<[u8; 32]> {
    fn serialize_keystone(&self) -> Result<Vec<u8>, std::io::Error> {
        match self {
            None => Ok(vec![0u8]),
            Some(inner) => {
                let mut buffer = Vec::with_capacity(33);
                buffer.push(1u8);
                buffer.extend_from_slice(inner);
                Ok(buffer)
            }
        }
    }

    fn deserialize_keystone(data: &[u8]) -> Result<Self, std::io::Error> {
        match data.first() {
            Some(0) => Ok(None),
            Some(1) => Ok(Some(<[u8; 32]>::deserialize_keystone(&data[1..])?)),
            _ => Err(malformed("bad option marker")),
        }
    }
}

impl KeystoneSerialize for Vec<u8> {
    fn serialize_keystone(&self) -> Result<Vec<u8>, std::io::Error> {
        if self.len() > u32::MAX as usize {
            return Err(malformed("byte string too long"));
        }
        let mut buffer = Vec::with_capacity(4 + self.len());
        buffer.extend_from_slice(&(self.len() as u32).to_be_bytes());
        buffer.extend_from_slice(self);
        Ok(buffer)
    }

    fn deserialize_keystone(data: &[u8]) -> Result<Self, std::io::Error> {
        let raw = take_exact(data, 4, "length prefix needs 4 bytes")?;
        let len = u32::from_be_bytes(raw.try_into().unwrap()) as usize;
        let body = take_exact(&data[4..], len, "byte string shorter than its prefix")?;
        Ok(body.to_vec())
    }
}

/// Number of bytes `Option<[u8; 32]>` occupies when encoded.
pub fn option_hash_encoded_len(value: &Option<[u8; 32]>) -> usize {
    match value {
        None => 1,
        Some(_) => 33,
    }
}

/// Number of bytes a `Vec<u8>` occupies when encoded.
pub fn bytes_encoded_len(value: &[u8]) -> usize {
    4 + value.len()
}
