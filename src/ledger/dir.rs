use super::{NullifierLedger, NullifierRecord};
use crate::error::LedgerError;
use crate::types::NullifierHash;
use log::{debug, info, warn};
use rand::rngs::OsRng;
use rand::RngCore;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const RECORD_EXTENSION: &str = "json";

/// Durable ledger storing one JSON record per nullifier under a directory.
///
/// A record is written to a temporary file, synced, then hard-linked to its
/// final name. Linking fails when the name exists, which makes `consume` an
/// atomic unique insert for every process sharing the directory, and readers
/// never observe a partially written record.
#[derive(Debug, Clone)]
pub struct DirNullifierLedger {
    dir: PathBuf,
}

impl DirNullifierLedger {
    /// Opens the ledger at `dir`, creating the directory when missing.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| LedgerError::Unavailable(format!("{}: {e}", dir.display())))?;
        info!("Opened nullifier ledger at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, nullifier: &NullifierHash) -> PathBuf {
        self.dir
            .join(format!("{}.{}", nullifier.to_hex(), RECORD_EXTENSION))
    }

    /// All stored records, in no particular order.
    pub async fn records(&self) -> Result<Vec<NullifierRecord>, LedgerError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        let mut records = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            records.push(read_record(&path).await?);
        }
        Ok(records)
    }
}

async fn read_record(path: &Path) -> Result<NullifierRecord, LedgerError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| LedgerError::Unavailable(format!("{}: {e}", path.display())))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| LedgerError::Corrupted(format!("{}: {e}", path.display())))
}

impl NullifierLedger for DirNullifierLedger {
    async fn is_consumed(&self, nullifier: NullifierHash) -> Result<bool, LedgerError> {
        tokio::fs::try_exists(self.record_path(&nullifier))
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))
    }

    async fn consume(
        &self,
        nullifier: NullifierHash,
        identity: &str,
    ) -> Result<NullifierRecord, LedgerError> {
        if nullifier.is_sentinel() {
            return Err(LedgerError::SentinelNullifier);
        }

        let record = NullifierRecord::now(nullifier, identity)?;
        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| LedgerError::Corrupted(e.to_string()))?;

        let final_path = self.record_path(&nullifier);
        let tmp_path = self
            .dir
            .join(format!(".{}.{:016x}.tmp", nullifier.to_hex(), OsRng.next_u64()));

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        let written = async {
            file.write_all(&bytes).await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(LedgerError::Unavailable(e.to_string()));
        }

        let linked = tokio::fs::hard_link(&tmp_path, &final_path).await;
        if let Err(e) = tokio::fs::remove_file(&tmp_path).await {
            warn!("Failed to remove {}: {}", tmp_path.display(), e);
        }

        match linked {
            Ok(()) => {
                debug!("Consumed nullifier {} for {}", nullifier, identity);
                Ok(record)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(LedgerError::AlreadyConsumed(nullifier.to_hex()))
            }
            Err(e) => Err(LedgerError::Unavailable(e.to_string())),
        }
    }

    async fn record(&self, nullifier: NullifierHash) -> Result<Option<NullifierRecord>, LedgerError> {
        let path = self.record_path(&nullifier);
        match tokio::fs::metadata(&path).await {
            Ok(_) => read_record(&path).await.map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LedgerError::Unavailable(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn nullifier(byte: u8) -> NullifierHash {
        NullifierHash([byte; 32])
    }

    #[tokio::test]
    async fn consume_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = DirNullifierLedger::open(dir.path()).await.unwrap();
            ledger.consume(nullifier(1), "alice").await.unwrap();
        }

        let reopened = DirNullifierLedger::open(dir.path()).await.unwrap();
        assert!(reopened.is_consumed(nullifier(1)).await.unwrap());
        assert!(!reopened.is_consumed(nullifier(2)).await.unwrap());
        assert!(matches!(
            reopened.consume(nullifier(1), "bob").await,
            Err(LedgerError::AlreadyConsumed(_))
        ));

        let record = reopened.record(nullifier(1)).await.unwrap().unwrap();
        assert_eq!(record.consuming_identity, "alice");
        assert_eq!(record.nullifier_hash, nullifier(1));
    }

    #[tokio::test]
    async fn no_temporary_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = DirNullifierLedger::open(dir.path()).await.unwrap();
        ledger.consume(nullifier(3), "alice").await.unwrap();
        let _ = ledger.consume(nullifier(3), "alice").await;

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("{}.json", nullifier(3).to_hex())]);
        assert_eq!(ledger.records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn corrupted_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = DirNullifierLedger::open(dir.path()).await.unwrap();
        std::fs::write(ledger.record_path(&nullifier(4)), b"not json").unwrap();

        assert!(ledger.is_consumed(nullifier(4)).await.unwrap());
        assert!(matches!(
            ledger.record(nullifier(4)).await,
            Err(LedgerError::Corrupted(_))
        ));
        assert!(matches!(
            ledger.consume(nullifier(4), "alice").await,
            Err(LedgerError::AlreadyConsumed(_))
        ));
    }

    #[tokio::test]
    async fn sentinel_is_never_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = DirNullifierLedger::open(dir.path()).await.unwrap();
        assert_eq!(
            ledger.consume(NullifierHash::SENTINEL, "alice").await,
            Err(LedgerError::SentinelNullifier)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumers_see_one_success() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(DirNullifierLedger::open(dir.path()).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..16 {
            // Separate handles model separate processes sharing the directory.
            let ledger = DirNullifierLedger::open(ledger.dir().to_path_buf()).await.unwrap();
            handles.push(tokio::spawn(async move {
                ledger.consume(nullifier(9), &format!("identity-{i}")).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert!(ledger.is_consumed(nullifier(9)).await.unwrap());
    }
}
