pub mod persistence;
pub mod trie;
pub mod primitives;
pub mod accounting;
