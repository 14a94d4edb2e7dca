use std::sync::Arc;

use keystone_crypto::types::{to_hex, StdByteArray};
use keystone_serialize::KeystoneSerialize;

use crate::persistence::Storage;
use crate::primitives::{balance::Balance, errors::StateError};
use crate::trie::{BatchTrie, TrieIterator};

/// Encoded size of an account without a birth place (user account).
const ACCOUNT_BYTES_USER: usize = 16 + 8 + 32;
/// Encoded size of an account with a birth place (contract account).
const ACCOUNT_BYTES_CONTRACT: usize = ACCOUNT_BYTES_USER + 32;

/// One on-chain entity: balance, nonce, per-account variables trie, and (for
/// contracts) the hash of the transaction that created it.
///
/// User and contract accounts are the same record; they differ only in
/// whether `birth_place` is set and whether the variables trie is used. The
/// canonical byte encoding is consensus-critical: equal logical accounts
/// must serialize to identical bytes, because the outer state trie commits
/// to these bytes.
#[derive(Clone)]
pub struct Account {
    balance: Balance,
    nonce: u64,
    /// Per-account storage; its root is committed into the account encoding.
    variables: BatchTrie,
    /// Hash of the creating transaction, for contract accounts.
    birth_place: Option<StdByteArray>,
}

impl Account {
    /// A fresh account with zero balance, zero nonce, and an empty
    /// variables trie over `storage`.
    pub(crate) fn new(storage: Arc<dyn Storage>, birth_place: Option<StdByteArray>) -> Self {
        Account {
            balance: Balance::ZERO,
            nonce: 0,
            variables: BatchTrie::empty(storage),
            birth_place,
        }
    }

    pub fn balance(&self) -> Balance {
        self.balance
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Root hash of the variables trie.
    pub fn vars_hash(&self) -> StdByteArray {
        self.variables.root_hash()
    }

    /// Hash of the creating transaction; `None` for user accounts.
    pub fn birth_place(&self) -> Option<StdByteArray> {
        self.birth_place
    }

    /// Advance the nonce by one. The nonce never legitimately reaches
    /// 2^64, so wraparound is a fatal caller bug.
    pub fn increment_nonce(&mut self) {
        self.nonce = self
            .nonce
            .checked_add(1)
            .expect("account nonce overflow");
    }

    /// Credit `value`. Overflow of the 128-bit balance domain is fatal.
    pub fn add_balance(&mut self, value: Balance) {
        self.balance = self
            .balance
            .checked_add(value)
            .expect("account balance overflow");
    }

    /// Debit `value`. Fails with `BalanceInsufficient` and leaves the
    /// balance unchanged if the account holds less than `value`.
    pub fn sub_balance(&mut self, value: Balance) -> Result<(), StateError> {
        match self.balance.checked_sub(value) {
            Some(remaining) => {
                self.balance = remaining;
                Ok(())
            }
            None => Err(StateError::BalanceInsufficient(self.balance, value)),
        }
    }

    /// Store `value` under `key` in the variables trie.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StateError> {
        self.variables.put(key, value)?;
        Ok(())
    }

    /// Read the value stored under `key` in the variables trie.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, StateError> {
        match self.variables.get(key)? {
            Some(value) => Ok(value),
            None => Err(StateError::KeyNotFound),
        }
    }

    /// Remove `key` from the variables trie.
    pub fn del(&mut self, key: &[u8]) -> Result<(), StateError> {
        self.variables.del(key)?;
        Ok(())
    }

    /// Walk every `(key, value)` pair in the variables trie whose key
    /// extends `prefix`.
    pub fn iterator(&self, prefix: &[u8]) -> Result<TrieIterator<'_>, StateError> {
        Ok(self.variables.iterator(prefix)?)
    }

    /// Canonical encoding: balance (16 bytes big-endian), nonce (8 bytes
    /// big-endian), variables root (32 bytes), then the birth place (32
    /// bytes) only if present.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StateError> {
        let mut buffer = Vec::with_capacity(ACCOUNT_BYTES_CONTRACT);
        buffer.extend(self.balance.serialize_keystone()?);
        buffer.extend(self.nonce.serialize_keystone()?);
        buffer.extend_from_slice(&self.vars_hash());
        if let Some(birth_place) = &self.birth_place {
            buffer.extend_from_slice(birth_place);
        }
        Ok(buffer)
    }

    /// Decode an account and open its variables trie, at the decoded root,
    /// against `storage`.
    pub fn from_bytes(raw: &[u8], storage: Arc<dyn Storage>) -> Result<Account, StateError> {
        if raw.len() != ACCOUNT_BYTES_USER && raw.len() != ACCOUNT_BYTES_CONTRACT {
            return Err(StateError::Malformed(format!(
                "account record must be {ACCOUNT_BYTES_USER} or {ACCOUNT_BYTES_CONTRACT} bytes, got {}",
                raw.len()
            )));
        }
        let balance = Balance::from_fixed_bytes(&raw[..16])?;
        let nonce = u64::deserialize_keystone(&raw[16..24])?;
        let vars_hash = <StdByteArray>::deserialize_keystone(&raw[24..56])?;
        let birth_place = if raw.len() == ACCOUNT_BYTES_CONTRACT {
            Some(<StdByteArray>::deserialize_keystone(&raw[56..88])?)
        } else {
            None
        };
        let variables = BatchTrie::new(vars_hash, storage)?;
        Ok(Account {
            balance,
            nonce,
            variables,
            birth_place,
        })
    }

    /// Open a batch on the variables trie. Delegated failures are logged
    /// rather than surfaced; the enclosing state drives the lifecycle.
    pub fn begin_batch(&mut self) {
        if let Err(e) = self.variables.begin_batch() {
            tracing::error!("Failed to begin batch on account variables: {e}");
        }
    }

    /// Commit the variables trie's open batch.
    pub fn commit(&mut self) {
        if let Err(e) = self.variables.commit() {
            tracing::error!("Failed to commit account variables: {e}");
        }
        tracing::debug!(account = ?self, "Account commit");
    }

    /// Roll back the variables trie's open batch.
    pub fn rollback(&mut self) {
        self.variables.rollback();
        tracing::debug!(account = ?self, "Account rollback");
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("balance", &self.balance)
            .field("nonce", &self.nonce)
            .field("vars_hash", &to_hex(&self.vars_hash()))
            .field("birth_place", &self.birth_place.map(|h| to_hex(&h)))
            .finish()
    }
}
