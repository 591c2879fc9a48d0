//! Local implementations of the ports.

use crate::error::{LedgerError, SwapError, SwapResult};
use crate::ledger::NullifierLedger;
use crate::ports::{
    content_id, AuditEvent, AuditSink, BlobStore, NetworkVerifier, SubmissionReceipt,
};
use crate::prover::{ContractProof, ProofEngine};
use crate::types::{PublicInputs, PublicSignals};
use crate::utils::unix_now;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::Mutex;

const NETWORK_IDENTITY: &str = "local-network-verifier";

/// Network verifier running in-process.
///
/// Checks the on-chain encoding and the protocol bounds, re-verifies with its
/// own engine and consumes the nullifier in its own ledger.
pub struct LocalNetworkVerifier<L> {
    engine: ProofEngine,
    ledger: L,
    protocol: PublicInputs,
}

impl<L: NullifierLedger> LocalNetworkVerifier<L> {
    pub fn new(engine: ProofEngine, ledger: L, protocol: PublicInputs) -> Self {
        Self {
            engine,
            ledger,
            protocol,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn protocol(&self) -> &PublicInputs {
        &self.protocol
    }
}

impl<L: NullifierLedger> NetworkVerifier for LocalNetworkVerifier<L> {
    async fn submit(
        &self,
        proof: &ContractProof,
        signals: &PublicSignals,
    ) -> SwapResult<SubmissionReceipt> {
        let decoded = proof.public_signals()?;
        if decoded != *signals {
            return Err(SwapError::Submission(
                "instance words do not match the public signals".into(),
            ));
        }
        if !decoded.matches_public_inputs(&self.protocol) {
            warn!("Rejected submission proved against foreign public inputs");
            return Err(SwapError::Submission(
                "public inputs do not match the protocol parameters".into(),
            ));
        }
        if decoded.is_eligible() != Some(true) {
            return Err(SwapError::Submission("proof does not attest eligibility".into()));
        }
        if !self.engine.verify(&proof.proof(), &decoded) {
            warn!("Rejected submission with invalid proof");
            return Err(SwapError::Submission("proof verification failed".into()));
        }

        let nullifier = decoded.nullifier();
        self.ledger
            .consume(nullifier, NETWORK_IDENTITY)
            .await
            .map_err(|e| match e {
                LedgerError::Unavailable(reason) => SwapError::NetworkUnavailable(reason),
                other => other.into(),
            })?;

        let accepted_at = unix_now().map_err(|e| SwapError::Submission(e.to_string()))?;
        info!("Accepted swap proof for nullifier {}", nullifier);
        Ok(SubmissionReceipt {
            tx_reference: content_id(&proof.calldata()),
            accepted_at,
        })
    }
}

#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for InMemoryBlobStore {
    async fn store(&self, bytes: Vec<u8>) -> SwapResult<String> {
        let cid = content_id(&bytes);
        self.blobs.lock().await.insert(cid.clone(), bytes);
        Ok(cid)
    }

    async fn fetch(&self, cid: &str) -> SwapResult<Vec<u8>> {
        self.blobs
            .lock()
            .await
            .get(cid)
            .cloned()
            .ok_or_else(|| SwapError::Storage(format!("blob not found: {cid}")))
    }
}

/// Blob store keeping one file per content identifier under a directory.
pub struct DirBlobStore {
    dir: PathBuf,
}

impl DirBlobStore {
    pub async fn open(dir: impl Into<PathBuf>) -> SwapResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SwapError::Storage(format!("{}: {e}", dir.display())))?;
        Ok(Self { dir })
    }
}

impl BlobStore for DirBlobStore {
    async fn store(&self, bytes: Vec<u8>) -> SwapResult<String> {
        let cid = content_id(&bytes);
        let path = self.dir.join(&cid);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| SwapError::Storage(format!("{}: {e}", path.display())))?;
        debug!("Stored {} byte blob as {}", bytes.len(), cid);
        Ok(cid)
    }

    async fn fetch(&self, cid: &str) -> SwapResult<Vec<u8>> {
        if cid.len() != 64 || !cid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SwapError::Storage(format!("invalid content id: {cid}")));
        }
        let bytes = match tokio::fs::read(self.dir.join(cid)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SwapError::Storage(format!("blob not found: {cid}")))
            }
            Err(e) => return Err(SwapError::Storage(e.to_string())),
        };
        if content_id(&bytes) != cid {
            return Err(SwapError::Storage(format!("blob {cid} failed its integrity check")));
        }
        Ok(bytes)
    }
}

/// Writes audit events through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    async fn emit(&self, event: AuditEvent) -> SwapResult<()> {
        info!(
            target: "audit",
            "{:?} nullifier={} data={}",
            event.event_type,
            event.nullifier_hash,
            event.data_hash
        );
        Ok(())
    }
}
