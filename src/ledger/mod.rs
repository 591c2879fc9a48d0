//! Nullifier ledger: at-most-once consumption of swap secrets.
//!
//! A nullifier moves `Unseen -> Consumed` exactly once and is never removed.
//! [`NullifierLedger::consume`] is a single linearizable check-and-set, so two
//! concurrent consumers of the same nullifier see exactly one success.
//!
//! Implementations:
//! - [`InMemoryNullifierLedger`] (tests, local verifier)
//! - [`DirNullifierLedger`] (one file per nullifier, shared across processes)

mod dir;
mod memory;

pub use dir::DirNullifierLedger;
pub use memory::InMemoryNullifierLedger;

use crate::error::LedgerError;
use crate::types::NullifierHash;
use crate::utils::unix_now;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// Proof that a nullifier was consumed. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullifierRecord {
    pub nullifier_hash: NullifierHash,
    /// Unix seconds.
    pub consumed_at: u64,
    pub consuming_identity: String,
}

impl NullifierRecord {
    pub(crate) fn now(nullifier_hash: NullifierHash, identity: &str) -> Result<Self, LedgerError> {
        let consumed_at = unix_now().map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        Ok(Self {
            nullifier_hash,
            consumed_at,
            consuming_identity: identity.to_string(),
        })
    }
}

pub trait NullifierLedger: Send + Sync {
    fn is_consumed(
        &self,
        nullifier: NullifierHash,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Marks `nullifier` consumed by `identity`.
    ///
    /// Fails with `AlreadyConsumed` when any identity consumed it before, and
    /// with `SentinelNullifier` for the all-zero value.
    fn consume(
        &self,
        nullifier: NullifierHash,
        identity: &str,
    ) -> impl Future<Output = Result<NullifierRecord, LedgerError>> + Send;

    fn record(
        &self,
        nullifier: NullifierHash,
    ) -> impl Future<Output = Result<Option<NullifierRecord>, LedgerError>> + Send;
}

impl<T: NullifierLedger + ?Sized> NullifierLedger for Arc<T> {
    fn is_consumed(
        &self,
        nullifier: NullifierHash,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send {
        (**self).is_consumed(nullifier)
    }

    fn consume(
        &self,
        nullifier: NullifierHash,
        identity: &str,
    ) -> impl Future<Output = Result<NullifierRecord, LedgerError>> + Send {
        (**self).consume(nullifier, identity)
    }

    fn record(
        &self,
        nullifier: NullifierHash,
    ) -> impl Future<Output = Result<Option<NullifierRecord>, LedgerError>> + Send {
        (**self).record(nullifier)
    }
}
