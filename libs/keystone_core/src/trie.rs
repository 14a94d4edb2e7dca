//! Content-addressed Merkle trie with batch semantics, used for on-chain state.
//!
//! The trie operates over nibbles (0-15) of the caller's byte keys, with an
//! alphabet of 16. Every node carries 16 child slots and an optional value,
//! is encoded canonically, and is stored in the backing [`Storage`] under the
//! SHA3-256 hash of its fields. Because nodes are immutable and addressed by
//! content, a root hash is a pure function of the trie's logical key-value
//! contents: snapshots are a root copy, and unchanged subtrees are shared
//! between versions for free.
//!
//! A batch (`begin_batch`/`commit`/`rollback`) buffers every node produced
//! while it is open in an in-memory pending map. Nothing reaches storage
//! until `commit`, which flushes the pending nodes through one atomic
//! [`WriteBatch`]. `rollback` drops the pending nodes and restores the root
//! recorded when the batch opened. Outside a batch, writes go straight
//! through to storage.

use std::collections::HashMap;
use std::sync::Arc;

use keystone_crypto::{
    hashing::{DefaultHash, HashFunction},
    types::{StdByteArray, EMPTY_HASH},
};
use keystone_serialize::{bytes_encoded_len, malformed, option_hash_encoded_len, KeystoneSerialize};

use crate::persistence::{Storage, WriteBatch};

/// Split a byte key into nibbles (0-15), high nibble first.
pub(crate) fn to_nibbles(key: &[u8]) -> Vec<u8> {
    key.iter().flat_map(|b| [b >> 4, b & 0x0F]).collect()
}

/// Reassemble a byte key from an even-length nibble path.
pub(crate) fn nibbles_to_bytes(nibbles: &[u8]) -> Vec<u8> {
    debug_assert!(nibbles.len() % 2 == 0);
    nibbles.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect()
}

fn key_not_found() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotFound, "key not found in trie")
}

/// Trie node: one child slot per nibble plus an optional value.
///
/// A node with no children and no value is never stored; emptied nodes are
/// pruned bottom-up so that logically equal tries always share a root hash.
pub(crate) struct TrieNode {
    pub(crate) children: [Option<StdByteArray>; 16],
    pub(crate) value: Option<Vec<u8>>,
}

impl TrieNode {
    fn new() -> Self {
        TrieNode {
            children: [None; 16],
            value: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.iter().all(Option::is_none)
    }

    /// Hash the node: (index, child hash) for each present child in nibble
    /// order, then (16, value) if a value is present. Never called on an
    /// empty node.
    fn hash(&self, hasher: &mut impl HashFunction) -> StdByteArray {
        for (i, child) in self.children.iter().enumerate() {
            if let Some(child_hash) = child {
                hasher.update([i as u8]);
                hasher.update(child_hash);
            }
        }
        if let Some(value) = &self.value {
            hasher.update([self.children.len() as u8]);
            hasher.update(value);
        }
        hasher.finish()
    }
}

impl KeystoneSerialize for TrieNode {
    fn serialize_keystone(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut buffer = Vec::new();
        for child in &self.children {
            buffer.extend(child.serialize_keystone()?);
        }
        match &self.value {
            None => buffer.push(0u8),
            Some(value) => {
                buffer.push(1u8);
                buffer.extend(value.serialize_keystone()?);
            }
        }
        Ok(buffer)
    }

    fn deserialize_keystone(data: &[u8]) -> Result<Self, std::io::Error> {
        let mut children = [None; 16];
        let mut offset = 0;
        for child in children.iter_mut() {
            let rest = data.get(offset..).unwrap_or_default();
            let decoded = Option::<StdByteArray>::deserialize_keystone(rest)?;
            offset += option_hash_encoded_len(&decoded);
            *child = decoded;
        }
        let value = match data.get(offset) {
            Some(0) => {
                offset += 1;
                None
            }
            Some(1) => {
                offset += 1;
                let value = Vec::<u8>::deserialize_keystone(&data[offset..])?;
                offset += bytes_encoded_len(&value);
                Some(value)
            }
            _ => return Err(malformed("bad trie node value marker")),
        };
        if offset != data.len() {
            return Err(malformed("trailing bytes after trie node"));
        }
        Ok(TrieNode { children, value })
    }
}

/// Merkle trie over a shared [`Storage`] handle, with a begin/commit/rollback
/// batch cycle and cheap snapshot cloning.
#[derive(Clone)]
pub struct BatchTrie {
    /// Hash of the current root node; `None` for the empty trie.
    root: Option<StdByteArray>,
    /// Root recorded when the open batch began.
    snapshot: Option<StdByteArray>,
    /// Nodes produced while batching, keyed by their hash.
    pending: HashMap<StdByteArray, Vec<u8>>,
    batching: bool,
    storage: Arc<dyn Storage>,
}

impl BatchTrie {
    /// Open a trie at `root`. The all-zero hash opens an empty trie; any
    /// other root must name a node resolvable from `storage`.
    pub fn new(root: StdByteArray, storage: Arc<dyn Storage>) -> Result<Self, std::io::Error> {
        if root == EMPTY_HASH {
            return Ok(Self::empty(storage));
        }
        let bytes = storage.get(&root)?.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "trie root not found in storage")
        })?;
        TrieNode::deserialize_keystone(&bytes)?;
        Ok(BatchTrie {
            root: Some(root),
            snapshot: None,
            pending: HashMap::new(),
            batching: false,
            storage,
        })
    }

    /// A trie with no entries.
    pub fn empty(storage: Arc<dyn Storage>) -> Self {
        BatchTrie {
            root: None,
            snapshot: None,
            pending: HashMap::new(),
            batching: false,
            storage,
        }
    }

    /// Root hash summarizing the trie's contents; all-zero when empty.
    pub fn root_hash(&self) -> StdByteArray {
        self.root.unwrap_or(EMPTY_HASH)
    }

    pub fn is_batching(&self) -> bool {
        self.batching
    }

    /// Retrieves the value stored under `key`, if any.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, std::io::Error> {
        let Some(mut current) = self.root else {
            return Ok(None);
        };
        for nibble in to_nibbles(key) {
            let node = self.load_node(&current)?;
            match node.children[nibble as usize] {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(self.load_node(&current)?.value)
    }

    /// Stores `value` under `key`, replacing any previous value, and returns
    /// the new root hash.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<StdByteArray, std::io::Error> {
        let nibbles = to_nibbles(key);
        let new_root = self.node_put(self.root, &nibbles, value)?;
        self.root = Some(new_root);
        Ok(new_root)
    }

    /// Removes `key` and returns the new root hash. Removing an absent key
    /// is `std::io::ErrorKind::NotFound`.
    pub fn del(&mut self, key: &[u8]) -> Result<StdByteArray, std::io::Error> {
        let nibbles = to_nibbles(key);
        let root = self.root.ok_or_else(key_not_found)?;
        self.root = self.node_del(root, &nibbles)?;
        Ok(self.root_hash())
    }

    /// Lazy iterator over every `(key, value)` pair whose key extends
    /// `prefix`, in depth-first nibble order.
    pub fn iterator(&self, prefix: &[u8]) -> Result<TrieIterator<'_>, std::io::Error> {
        let mut stack = Vec::new();
        if let Some(mut current) = self.root {
            let path = to_nibbles(prefix);
            let mut found = true;
            for nibble in &path {
                let node = self.load_node(&current)?;
                match node.children[*nibble as usize] {
                    Some(child) => current = child,
                    None => {
                        found = false;
                        break;
                    }
                }
            }
            if found {
                stack.push((current, path));
            }
        }
        Ok(TrieIterator { trie: self, stack })
    }

    /// Open a batch. Every node produced until `commit` stays in memory.
    pub fn begin_batch(&mut self) -> Result<(), std::io::Error> {
        if self.batching {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "a batch is already open on this trie",
            ));
        }
        self.batching = true;
        self.snapshot = self.root;
        Ok(())
    }

    /// Flush the open batch's nodes to storage in one atomic write.
    pub fn commit(&mut self) -> Result<(), std::io::Error> {
        if !self.batching {
            return Ok(());
        }
        if !self.pending.is_empty() {
            let mut batch = WriteBatch::new();
            for (hash, bytes) in self.pending.drain() {
                batch.put(hash.to_vec(), bytes);
            }
            self.storage.write_batch(batch)?;
        }
        self.batching = false;
        self.snapshot = None;
        Ok(())
    }

    /// Drop the open batch's nodes and restore the root recorded at begin.
    pub fn rollback(&mut self) {
        if !self.batching {
            return;
        }
        self.pending.clear();
        self.root = self.snapshot;
        self.snapshot = None;
        self.batching = false;
    }

    fn node_put(
        &mut self,
        current: Option<StdByteArray>,
        nibbles: &[u8],
        value: &[u8],
    ) -> Result<StdByteArray, std::io::Error> {
        let mut node = match current {
            Some(hash) => self.load_node(&hash)?,
            None => TrieNode::new(),
        };
        if nibbles.is_empty() {
            node.value = Some(value.to_vec());
        } else {
            let index = nibbles[0] as usize;
            let child = self.node_put(node.children[index], &nibbles[1..], value)?;
            node.children[index] = Some(child);
        }
        self.store_node(&node)
    }

    fn node_del(
        &mut self,
        current: StdByteArray,
        nibbles: &[u8],
    ) -> Result<Option<StdByteArray>, std::io::Error> {
        let mut node = self.load_node(&current)?;
        if nibbles.is_empty() {
            if node.value.is_none() {
                return Err(key_not_found());
            }
            node.value = None;
        } else {
            let index = nibbles[0] as usize;
            let child = node.children[index].ok_or_else(key_not_found)?;
            node.children[index] = self.node_del(child, &nibbles[1..])?;
        }
        if node.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.store_node(&node)?))
    }

    fn store_node(&mut self, node: &TrieNode) -> Result<StdByteArray, std::io::Error> {
        let encoded = node.serialize_keystone()?;
        let hash = node.hash(&mut DefaultHash::new());
        if self.batching {
            self.pending.insert(hash, encoded);
        } else {
            self.storage.put(&hash, &encoded)?;
        }
        Ok(hash)
    }

    fn load_node(&self, hash: &StdByteArray) -> Result<TrieNode, std::io::Error> {
        if let Some(bytes) = self.pending.get(hash) {
            return TrieNode::deserialize_keystone(bytes);
        }
        match self.storage.get(hash)? {
            Some(bytes) => TrieNode::deserialize_keystone(&bytes),
            None => Err(malformed("missing trie node")),
        }
    }
}

/// Depth-first walk over a subtree of the trie, loading nodes on demand.
///
/// Children are visited in nibble order, so iteration order is deterministic
/// for equal trie contents. A node's value is yielded before its subtrees.
pub struct TrieIterator<'a> {
    trie: &'a BatchTrie,
    stack: Vec<(StdByteArray, Vec<u8>)>,
}

impl Iterator for TrieIterator<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>), std::io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((hash, path)) = self.stack.pop() {
            let node = match self.trie.load_node(&hash) {
                Ok(node) => node,
                Err(e) => {
                    self.stack.clear();
                    return Some(Err(e));
                }
            };
            for index in (0..node.children.len()).rev() {
                if let Some(child) = node.children[index] {
                    let mut child_path = path.clone();
                    child_path.push(index as u8);
                    self.stack.push((child, child_path));
                }
            }
            if let Some(value) = node.value {
                return Some(Ok((nibbles_to_bytes(&path), value)));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStorage;

    fn fresh_trie() -> (BatchTrie, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (BatchTrie::empty(storage.clone()), storage)
    }

    #[test]
    fn test_nibble_round_trip() {
        let key = b"counter".to_vec();
        assert_eq!(nibbles_to_bytes(&to_nibbles(&key)), key);
        assert_eq!(to_nibbles(&[0xAB]), vec![0x0A, 0x0B]);
    }

    #[test]
    fn test_empty_trie_root_is_zero() {
        let (trie, _) = fresh_trie();
        assert_eq!(trie.root_hash(), EMPTY_HASH);
        assert_eq!(trie.get(b"anything").unwrap(), None);
    }

    #[test]
    fn test_insert_and_get() {
        let (mut trie, _) = fresh_trie();
        trie.put(b"account1", b"state1").unwrap();
        trie.put(b"account2", b"state2").unwrap();

        assert_eq!(trie.get(b"account1").unwrap(), Some(b"state1".to_vec()));
        assert_eq!(trie.get(b"account2").unwrap(), Some(b"state2".to_vec()));
        assert_eq!(trie.get(b"account3").unwrap(), None);

        // overwrite
        trie.put(b"account1", b"state1b").unwrap();
        assert_eq!(trie.get(b"account1").unwrap(), Some(b"state1b".to_vec()));
    }

    #[test]
    fn test_key_prefix_of_another_key() {
        let (mut trie, _) = fresh_trie();
        trie.put(b"ab", b"short").unwrap();
        trie.put(b"abcd", b"long").unwrap();
        assert_eq!(trie.get(b"ab").unwrap(), Some(b"short".to_vec()));
        assert_eq!(trie.get(b"abcd").unwrap(), Some(b"long".to_vec()));
        assert_eq!(trie.get(b"abc").unwrap(), None);
    }

    #[test]
    fn test_root_is_pure_function_of_contents() {
        let (mut a, _) = fresh_trie();
        a.put(b"k1", b"v1").unwrap();
        a.put(b"k2", b"v2").unwrap();
        a.put(b"k3", b"v3").unwrap();

        let (mut b, _) = fresh_trie();
        b.put(b"k3", b"v3").unwrap();
        b.put(b"k1", b"other").unwrap();
        b.put(b"k2", b"v2").unwrap();
        b.put(b"k1", b"v1").unwrap();

        assert_eq!(a.root_hash(), b.root_hash());
    }

    #[test]
    fn test_del_restores_previous_root() {
        let (mut trie, _) = fresh_trie();
        trie.put(b"k1", b"v1").unwrap();
        let root_before = trie.root_hash();

        trie.put(b"k2", b"v2").unwrap();
        trie.del(b"k2").unwrap();
        assert_eq!(trie.root_hash(), root_before);
        assert_eq!(trie.get(b"k2").unwrap(), None);

        trie.del(b"k1").unwrap();
        assert_eq!(trie.root_hash(), EMPTY_HASH);
    }

    #[test]
    fn test_del_missing_key_is_not_found() {
        let (mut trie, _) = fresh_trie();
        let err = trie.del(b"absent").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);

        trie.put(b"k1", b"v1").unwrap();
        let err = trie.del(b"absent").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
        // a key whose path exists but holds no value
        trie.put(b"abcd", b"v").unwrap();
        let err = trie.del(b"ab").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_reopen_at_committed_root() {
        let storage = Arc::new(MemoryStorage::new());
        let mut trie = BatchTrie::empty(storage.clone());
        trie.put(b"k1", b"v1").unwrap();
        let root = trie.root_hash();

        let reopened = BatchTrie::new(root, storage.clone()).unwrap();
        assert_eq!(reopened.get(b"k1").unwrap(), Some(b"v1".to_vec()));

        assert!(BatchTrie::new([7u8; 32], storage).is_err());
    }

    #[test]
    fn test_batch_writes_stay_out_of_storage_until_commit() {
        let storage = Arc::new(MemoryStorage::new());
        let mut trie = BatchTrie::empty(storage.clone());
        trie.begin_batch().unwrap();
        trie.put(b"k1", b"v1").unwrap();

        // readable through the trie, invisible to storage
        assert_eq!(trie.get(b"k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(storage.len(), 0);

        trie.commit().unwrap();
        assert!(storage.len() > 0);
        assert!(!trie.is_batching());

        let reopened = BatchTrie::new(trie.root_hash(), storage).unwrap();
        assert_eq!(reopened.get(b"k1").unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn test_rollback_restores_root_and_drops_nodes() {
        let storage = Arc::new(MemoryStorage::new());
        let mut trie = BatchTrie::empty(storage.clone());
        trie.put(b"k1", b"v1").unwrap();
        let root_before = trie.root_hash();
        let stored_before = storage.len();

        trie.begin_batch().unwrap();
        trie.put(b"k2", b"v2").unwrap();
        trie.put(b"k1", b"changed").unwrap();
        trie.rollback();

        assert_eq!(trie.root_hash(), root_before);
        assert_eq!(trie.get(b"k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(trie.get(b"k2").unwrap(), None);
        assert_eq!(storage.len(), stored_before);
    }

    #[test]
    fn test_nested_begin_batch_is_an_error() {
        let (mut trie, _) = fresh_trie();
        trie.begin_batch().unwrap();
        let err = trie.begin_batch().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_clone_is_an_independent_snapshot() {
        let (mut trie, _) = fresh_trie();
        trie.put(b"k1", b"v1").unwrap();
        let snapshot = trie.clone();
        let root = snapshot.root_hash();

        trie.put(b"k2", b"v2").unwrap();
        assert_eq!(snapshot.root_hash(), root);
        assert_eq!(snapshot.get(b"k2").unwrap(), None);
        assert_eq!(snapshot.get(b"k1").unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn test_iterator_prefix_walk() {
        let (mut trie, _) = fresh_trie();
        trie.put(b"ab", b"1").unwrap();
        trie.put(b"abc", b"2").unwrap();
        trie.put(b"b", b"3").unwrap();

        let under_a: Vec<_> = trie
            .iterator(b"a")
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(
            under_a,
            vec![
                (b"ab".to_vec(), b"1".to_vec()),
                (b"abc".to_vec(), b"2".to_vec()),
            ]
        );

        let all: Vec<_> = trie
            .iterator(b"")
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(all.len(), 3);

        // repeat walks are deterministic
        let again: Vec<_> = trie
            .iterator(b"")
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(all, again);

        let none: Vec<_> = trie
            .iterator(b"zz")
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_node_codec_round_trip() {
        let mut node = TrieNode::new();
        node.children[3] = Some([1u8; 32]);
        node.children[15] = Some([2u8; 32]);
        node.value = Some(b"value".to_vec());

        let encoded = node.serialize_keystone().unwrap();
        let decoded = TrieNode::deserialize_keystone(&encoded).unwrap();
        assert_eq!(decoded.children, node.children);
        assert_eq!(decoded.value, node.value);

        assert!(TrieNode::deserialize_keystone(&encoded[..encoded.len() - 1]).is_err());
    }
}
