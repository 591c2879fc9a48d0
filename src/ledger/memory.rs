use super::{NullifierLedger, NullifierRecord};
use crate::error::LedgerError;
use crate::types::NullifierHash;
use log::debug;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// In-process ledger. The map lock is the linearization point of `consume`.
pub struct InMemoryNullifierLedger {
    consumed: Mutex<HashMap<NullifierHash, NullifierRecord>>,
}

impl InMemoryNullifierLedger {
    pub fn new() -> Self {
        Self {
            consumed: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.consumed.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.consumed.lock().await.is_empty()
    }
}

impl Default for InMemoryNullifierLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl NullifierLedger for InMemoryNullifierLedger {
    async fn is_consumed(&self, nullifier: NullifierHash) -> Result<bool, LedgerError> {
        Ok(self.consumed.lock().await.contains_key(&nullifier))
    }

    async fn consume(
        &self,
        nullifier: NullifierHash,
        identity: &str,
    ) -> Result<NullifierRecord, LedgerError> {
        if nullifier.is_sentinel() {
            return Err(LedgerError::SentinelNullifier);
        }

        let mut consumed = self.consumed.lock().await;
        match consumed.entry(nullifier) {
            Entry::Occupied(_) => Err(LedgerError::AlreadyConsumed(nullifier.to_hex())),
            Entry::Vacant(slot) => {
                let record = NullifierRecord::now(nullifier, identity)?;
                debug!("Consumed nullifier {} for {}", nullifier, identity);
                Ok(slot.insert(record).clone())
            }
        }
    }

    async fn record(&self, nullifier: NullifierHash) -> Result<Option<NullifierRecord>, LedgerError> {
        Ok(self.consumed.lock().await.get(&nullifier).cloned())
    }
}
