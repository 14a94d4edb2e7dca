use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use keystone_crypto::{
    hashing::hash_bytes,
    types::{to_hex, StdByteArray},
};

use crate::accounting::account::Account;
use crate::persistence::Storage;
use crate::primitives::errors::StateError;
use crate::trie::BatchTrie;

/// World state: every account reachable from one root hash.
///
/// The outer state trie maps `hash(address)` to the canonical account
/// encoding, so a single 32-byte root commits to every balance, nonce, and
/// per-account variable on the chain. Accounts touched since the last
/// commit live in the dirty set as shared handles; their serialization is
/// deferred until `root_hash` or `commit` flushes them into the outer trie.
///
/// One batch may be open at a time. While it is open, the outer trie and
/// the variables trie of every touched account buffer their nodes in
/// memory; `commit` promotes all of them to storage and `rollback` discards
/// all of them, restoring the pre-batch root.
pub struct AccountState {
    state_trie: BatchTrie,
    /// Accounts touched since the last commit/rollback, keyed by raw
    /// address bytes.
    dirty: HashMap<Vec<u8>, Arc<Mutex<Account>>>,
    /// Images of accounts that were already dirty when the open batch
    /// began, exactly as they were at that moment. Rollback reinstates
    /// these, so mutations made while idle outlive a batch they were
    /// never part of.
    pre_batch: HashMap<Vec<u8>, Account>,
    batching: bool,
    storage: Arc<dyn Storage>,
}

impl AccountState {
    /// Open the world state at `root`. The all-zero hash opens an empty
    /// state; any other root must be resolvable from `storage`.
    pub fn new(root: StdByteArray, storage: Arc<dyn Storage>) -> Result<Self, StateError> {
        let state_trie = BatchTrie::new(root, storage.clone())?;
        Ok(AccountState {
            state_trie,
            dirty: HashMap::new(),
            pre_batch: HashMap::new(),
            batching: false,
            storage,
        })
    }

    /// Outer-trie key for an address. Always the hashed form; raw address
    /// bytes never key the state trie.
    fn address_key(addr: &[u8]) -> StdByteArray {
        hash_bytes(addr)
    }

    /// Record `account` in the dirty set, opening its variables batch if a
    /// state batch is in progress. Replaces any handle already present.
    fn record_dirty(&mut self, addr: &[u8], mut account: Account) -> Arc<Mutex<Account>> {
        if self.batching {
            account.begin_batch();
        }
        let handle = Arc::new(Mutex::new(account));
        self.dirty.insert(addr.to_vec(), handle.clone());
        handle
    }

    fn new_account(
        &mut self,
        addr: &[u8],
        birth_place: Option<StdByteArray>,
    ) -> Arc<Mutex<Account>> {
        let account = Account::new(self.storage.clone(), birth_place);
        self.record_dirty(addr, account)
    }

    /// Look up `addr` in the dirty set first, then the state trie. A trie
    /// hit is decoded and recorded dirty so that repeated lookups share one
    /// handle (and one open variables batch) per address.
    fn get_account(&mut self, addr: &[u8]) -> Result<Arc<Mutex<Account>>, StateError> {
        if let Some(handle) = self.dirty.get(addr) {
            return Ok(handle.clone());
        }
        match self.state_trie.get(&Self::address_key(addr))? {
            Some(bytes) => {
                let account = Account::from_bytes(&bytes, self.storage.clone())?;
                Ok(self.record_dirty(addr, account))
            }
            None => Err(StateError::AccountNotFound),
        }
    }

    /// The account at `addr`, created as a fresh user account (zero
    /// balance, zero nonce, no birth place) if none exists.
    pub fn get_or_create_user_account(
        &mut self,
        addr: &[u8],
    ) -> Result<Arc<Mutex<Account>>, StateError> {
        match self.get_account(addr) {
            Err(StateError::AccountNotFound) => Ok(self.new_account(addr, None)),
            other => other,
        }
    }

    /// Existing-only lookup; never creates.
    pub fn get_contract_account(&mut self, addr: &[u8]) -> Result<Arc<Mutex<Account>>, StateError> {
        self.get_account(addr)
    }

    /// Create a contract account born at `birth_place` (the creating
    /// transaction's hash). An account already at `addr` is replaced in the
    /// dirty set; guarding against that collision is the caller's job.
    pub fn create_contract_account(
        &mut self,
        addr: &[u8],
        birth_place: StdByteArray,
    ) -> Arc<Mutex<Account>> {
        self.new_account(addr, Some(birth_place))
    }

    /// Flush every dirty account's canonical encoding into the state trie
    /// and return the trie's root. The dirty set is kept; repeated calls
    /// without intervening mutation return the same hash.
    pub fn root_hash(&mut self) -> Result<StdByteArray, StateError> {
        let Self {
            state_trie, dirty, ..
        } = &mut *self;
        for (addr, handle) in dirty.iter() {
            let account = handle.lock().expect("Failed to lock account");
            let bytes = account.to_bytes()?;
            state_trie.put(&Self::address_key(addr), &bytes)?;
        }
        Ok(state_trie.root_hash())
    }

    /// Open a batch on the state trie and on the variables trie of every
    /// account already dirty; accounts touched later join the batch as they
    /// are recorded. Accounts dirty at this point are imaged first, so a
    /// rollback can reinstate them as they stood here. Fails if a batch is
    /// already open.
    pub fn begin_batch(&mut self) -> Result<(), StateError> {
        self.state_trie.begin_batch()?;
        self.batching = true;
        let Self {
            dirty, pre_batch, ..
        } = &mut *self;
        for (addr, handle) in dirty.iter() {
            let mut account = handle.lock().expect("Failed to lock account");
            pre_batch.insert(addr.clone(), account.clone());
            account.begin_batch();
        }
        tracing::info!("AccountState begin");
        Ok(())
    }

    /// Commit the open batch: commit each dirty account's variables trie,
    /// flush its encoding into the state trie, drop it from the dirty set,
    /// then commit the state trie itself.
    pub fn commit(&mut self) -> Result<(), StateError> {
        if !self.batching {
            tracing::warn!("Commit without an open batch is a no-op");
            return Ok(());
        }
        let Self {
            state_trie, dirty, ..
        } = &mut *self;
        for (addr, handle) in dirty.drain() {
            let mut account = handle.lock().expect("Failed to lock account");
            account.commit();
            let bytes = account.to_bytes()?;
            state_trie.put(&Self::address_key(&addr), &bytes)?;
        }
        self.state_trie.commit()?;
        self.pre_batch.clear();
        self.batching = false;
        tracing::info!(
            "AccountState commit: root {}",
            to_hex(&self.state_trie.root_hash())
        );
        Ok(())
    }

    /// Discard the open batch: restore the state trie's pre-batch root,
    /// roll back each dirty account's variables trie, and drop every
    /// account the batch touched. Accounts that were dirty before the
    /// batch began are reinstated as they stood at `begin_batch`; only
    /// batch-era work is lost.
    pub fn rollback(&mut self) {
        if !self.batching {
            tracing::warn!("Rollback without an open batch is a no-op");
            return;
        }
        self.state_trie.rollback();
        for (_, handle) in self.dirty.drain() {
            handle.lock().expect("Failed to lock account").rollback();
        }
        for (addr, account) in self.pre_batch.drain() {
            self.dirty.insert(addr, Arc::new(Mutex::new(account)));
        }
        self.batching = false;
        tracing::info!(
            "AccountState rollback: root {}",
            to_hex(&self.state_trie.root_hash())
        );
    }

    /// Begin a batch whose guard rolls back on drop unless committed, so an
    /// abandoned batch cannot leak into subsequent execution.
    pub fn batch(&mut self) -> Result<Batch<'_>, StateError> {
        self.begin_batch()?;
        Ok(Batch {
            state: self,
            committed: false,
        })
    }

    /// Snapshot of this state: an independent state-trie clone and a deep
    /// copy of the dirty set, sharing only the storage handle. Mutations on
    /// either side are invisible to the other until committed.
    pub fn clone_state(&self) -> AccountState {
        let mut dirty = HashMap::with_capacity(self.dirty.len());
        for (addr, handle) in &self.dirty {
            let account = handle.lock().expect("Failed to lock account").clone();
            dirty.insert(addr.clone(), Arc::new(Mutex::new(account)));
        }
        AccountState {
            state_trie: self.state_trie.clone(),
            dirty,
            pre_batch: self.pre_batch.clone(),
            batching: self.batching,
            storage: self.storage.clone(),
        }
    }

    pub fn is_batching(&self) -> bool {
        self.batching
    }
}

impl std::fmt::Debug for AccountState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountState")
            .field("root", &to_hex(&self.state_trie.root_hash()))
            .field("dirty", &self.dirty.len())
            .field("batching", &self.batching)
            .finish()
    }
}

/// Scoped batch on an [`AccountState`]. Dropping the guard without calling
/// [`Batch::commit`] rolls the batch back, covering early returns and
/// panics in block execution.
pub struct Batch<'a> {
    state: &'a mut AccountState,
    committed: bool,
}

impl Batch<'_> {
    pub fn commit(mut self) -> Result<(), StateError> {
        let result = self.state.commit();
        self.committed = result.is_ok();
        result
    }
}

impl std::ops::Deref for Batch<'_> {
    type Target = AccountState;

    fn deref(&self) -> &AccountState {
        self.state
    }
}

impl std::ops::DerefMut for Batch<'_> {
    fn deref_mut(&mut self) -> &mut AccountState {
        self.state
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.state.rollback();
        }
    }
}
