use std::fmt::Display;

use crate::primitives::balance::Balance;

/// Errors surfaced by the account-state layer.
///
/// `AccountNotFound` and `BalanceInsufficient` are recoverable and part of
/// normal control flow during block execution; everything else is propagated
/// unchanged from the trie or storage layer for the caller to abort on.
#[derive(Debug)]
pub enum StateError {
    /// No account exists at the requested address
    AccountNotFound,
    /// Subtracting more than the account holds; carries (balance, requested)
    BalanceInsufficient(Balance, Balance),
    /// The requested key is absent from the account's variables
    KeyNotFound,
    /// Propagated storage or trie failure
    Storage(std::io::Error),
    /// Account bytes that do not decode
    Malformed(String),
}

impl Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateError::AccountNotFound => {
                write!(f, "cannot find account in storage")
            }
            StateError::BalanceInsufficient(balance, requested) => {
                write!(
                    f,
                    "cannot subtract {requested} from a balance of {balance}"
                )
            }
            StateError::KeyNotFound => {
                write!(f, "key not found in account storage")
            }
            StateError::Storage(err) => {
                write!(f, "storage error: {err}")
            }
            StateError::Malformed(reason) => {
                write!(f, "malformed account bytes: {reason}")
            }
        }
    }
}

impl From<std::io::Error> for StateError {
    fn from(err: std::io::Error) -> Self {
        StateError::Storage(err)
    }
}
