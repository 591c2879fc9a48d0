//! Ports to the collaborators the swap core consumes but does not own.
//!
//! Implementations:
//! - [`MessageSigner`] for `ethers::signers::LocalWallet`
//! - [`crate::adapters::LocalNetworkVerifier`]
//! - [`crate::adapters::InMemoryBlobStore`], [`crate::adapters::DirBlobStore`]
//! - [`crate::adapters::LogAuditSink`]

use crate::error::{SwapError, SwapResult};
use crate::prover::ContractProof;
use crate::types::{NullifierHash, PublicSignals};
use ethers::signers::{LocalWallet, Signer};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::future::Future;

/// Wallet signing capability. The core never sees the private key.
pub trait MessageSigner: Send + Sync {
    fn sign(&self, message: &str) -> impl Future<Output = SwapResult<Vec<u8>>> + Send;

    /// Stable identity recorded as the consumer of a nullifier.
    fn identity(&self) -> String;
}

impl MessageSigner for LocalWallet {
    async fn sign(&self, message: &str) -> SwapResult<Vec<u8>> {
        let signature = self
            .sign_message(message)
            .await
            .map_err(|e| SwapError::Signer(e.to_string()))?;
        Ok(signature.to_vec())
    }

    fn identity(&self) -> String {
        ethers::utils::to_checksum(&self.address(), None)
    }
}

/// Acknowledgement of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub tx_reference: String,
    pub accepted_at: u64,
}

/// The network side that re-verifies proofs and consumes nullifiers in its
/// own ledger. Local verification is never a substitute for it.
pub trait NetworkVerifier: Send + Sync {
    fn submit(
        &self,
        proof: &ContractProof,
        signals: &PublicSignals,
    ) -> impl Future<Output = SwapResult<SubmissionReceipt>> + Send;
}

/// Content-addressed blob storage.
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` and returns their content identifier.
    fn store(&self, bytes: Vec<u8>) -> impl Future<Output = SwapResult<String>> + Send;

    fn fetch(&self, cid: &str) -> impl Future<Output = SwapResult<Vec<u8>>> + Send;
}

/// Content identifier of `bytes`: hex `sha3-256`.
pub fn content_id(bytes: &[u8]) -> String {
    hex::encode(Sha3_256::digest(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ProofSubmitted,
    NullifierConsumed,
    ReceiptStored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub nullifier_hash: NullifierHash,
    pub event_type: AuditEventType,
    /// Hex `sha3-256` of the data the event refers to.
    pub data_hash: String,
}

/// Audit mirror. Emission is fire-and-forget from the workflow's view.
pub trait AuditSink: Send + Sync + 'static {
    fn emit(&self, event: AuditEvent) -> impl Future<Output = SwapResult<()>> + Send;
}
