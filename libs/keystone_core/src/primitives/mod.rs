//! Value types and errors shared across the state layer.
pub mod balance;
pub mod errors;
