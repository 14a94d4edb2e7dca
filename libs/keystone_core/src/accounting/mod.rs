//! Account records and world-state management built on the batch trie.
pub mod account;
pub mod state;
