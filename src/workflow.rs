//! End-to-end swap sequence.
//!
//! ```text
//! Idle -> WitnessValidated -> Proving -> ProofReady -> NullifierChecked
//!      -> Submitted -> ReceiptSealed -> Complete
//! ```
//!
//! Any failure moves the workflow to `Error`. Nothing is retried from `Error`;
//! the caller starts a new run. Only transient transport failures are retried
//! inside a run, with linear backoff.

use crate::config::Config;
use crate::error::{SwapError, SwapResult};
use crate::ledger::NullifierLedger;
use crate::merkle::EligibleSet;
use crate::ports::{
    content_id, AuditEvent, AuditEventType, AuditSink, BlobStore, MessageSigner, NetworkVerifier,
    SubmissionReceipt,
};
use crate::prover::ProofEngine;
use crate::receipt::{EncryptedReceipt, ReceiptVault, SwapReceipt};
use crate::secrets::{self, DerivedKey, KeyPurpose, SecretDerivation};
use crate::types::{Commitment, NullifierHash, PrivateWitness, PublicInputs, HASH_SIZE};
use crate::utils::field_to_bytes;
use log::{debug, info, warn};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    Idle,
    WitnessValidated,
    Proving,
    ProofReady,
    NullifierChecked,
    Submitted,
    ReceiptSealed,
    Complete,
    Error,
}

impl SwapState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SwapState::Complete | SwapState::Error)
    }
}

/// One swap as requested by the user.
#[derive(Clone)]
pub struct SwapRequest {
    pub balance: u64,
    pub swap_amount: u64,
    pub eligibility_flag: u64,
    pub public_inputs: PublicInputs,
    /// Reuse a nonce from an earlier failed attempt. A fresh one is drawn when unset.
    pub nonce: Option<[u8; HASH_SIZE]>,
    pub token_in: String,
    pub token_out: String,
    pub min_amount_out: u64,
    pub chain_id: u64,
}

impl fmt::Debug for SwapRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapRequest")
            .field("public_inputs", &self.public_inputs)
            .field("token_in", &self.token_in)
            .field("token_out", &self.token_out)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct SwapOutcome {
    pub nullifier: NullifierHash,
    pub commitment: Commitment,
    /// Needed to retry with the same nullifier if the caller's own bookkeeping fails.
    pub nonce: [u8; HASH_SIZE],
    pub submission: SubmissionReceipt,
    pub receipt: EncryptedReceipt,
    pub receipt_cid: String,
    pub states: Vec<SwapState>,
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
}

async fn retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> SwapResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SwapResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < policy.attempts => {
                attempt += 1;
                warn!("{} failed ({}), retry {}/{}", what, e, attempt, policy.attempts);
                tokio::time::sleep(policy.backoff * attempt).await;
            }
            other => return other,
        }
    }
}

pub struct SwapWorkflow<S, N, L, B, A> {
    signer: S,
    engine: ProofEngine,
    derivation: SecretDerivation,
    network: N,
    ledger: L,
    blobs: B,
    audit: Arc<A>,
    eligible_set: Option<EligibleSet>,
    prove_timeout: Option<Duration>,
    retry: RetryPolicy,
    state: SwapState,
    history: Vec<SwapState>,
}

impl<S, N, L, B, A> SwapWorkflow<S, N, L, B, A>
where
    S: MessageSigner,
    N: NetworkVerifier,
    L: NullifierLedger,
    B: BlobStore,
    A: AuditSink,
{
    pub fn new(signer: S, engine: ProofEngine, network: N, ledger: L, blobs: B, audit: A) -> Self {
        Self::with_config(signer, engine, network, ledger, blobs, audit, &Config::default())
    }

    pub fn with_config(
        signer: S,
        engine: ProofEngine,
        network: N,
        ledger: L,
        blobs: B,
        audit: A,
        config: &Config,
    ) -> Self {
        let prove_timeout = match config.proof.prove_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self {
            signer,
            engine,
            derivation: SecretDerivation::from_config(&config.keys),
            network,
            ledger,
            blobs,
            audit: Arc::new(audit),
            eligible_set: None,
            prove_timeout,
            retry: RetryPolicy {
                attempts: config.ledger.retry_attempts,
                backoff: Duration::from_millis(config.ledger.retry_backoff_ms),
            },
            state: SwapState::Idle,
            history: Vec::new(),
        }
    }

    /// Require membership of the derived proof secret in `set` before proving.
    pub fn with_eligible_set(mut self, set: EligibleSet) -> Self {
        self.eligible_set = Some(set);
        self
    }

    pub fn state(&self) -> SwapState {
        self.state
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    /// Derives the key the receipts of this wallet are sealed with.
    pub async fn receipt_key(&self) -> SwapResult<DerivedKey> {
        self.derive(&KeyPurpose::ReceiptEncryption).await
    }

    async fn derive(&self, purpose: &KeyPurpose) -> SwapResult<DerivedKey> {
        let signature = self.signer.sign(&secrets::purpose_message(purpose)).await?;
        Ok(self.derivation.derive_key(&signature, purpose)?)
    }

    fn transition(&mut self, next: SwapState) {
        debug!("Swap state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Runs one swap to completion.
    pub async fn run(&mut self, request: SwapRequest) -> SwapResult<SwapOutcome> {
        self.state = SwapState::Idle;
        self.history = vec![SwapState::Idle];

        match self.execute(request).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("Swap failed in state {:?}: {}", self.state, e);
                self.transition(SwapState::Error);
                Err(e)
            }
        }
    }

    async fn execute(&mut self, request: SwapRequest) -> SwapResult<SwapOutcome> {
        let proof_key = self.derive(&KeyPurpose::ProofSecret).await?;
        let receipt_key = self.derive(&KeyPurpose::ReceiptEncryption).await?;

        let reused_nonce = request.nonce.is_some();
        let nonce = request.nonce.unwrap_or_else(secrets::nonce);
        let witness = PrivateWitness {
            balance: request.balance,
            swap_amount: request.swap_amount,
            secret_key: *proof_key.as_bytes(),
            nonce,
            eligibility_flag: request.eligibility_flag,
        };
        drop(proof_key);

        witness.validate()?;
        request.public_inputs.validate()?;
        self.check_membership(&witness, &request.public_inputs)?;

        if reused_nonce {
            let nullifier = secrets::nullifier(&witness.secret_key, &witness.nonce);
            self.ensure_unconsumed(nullifier).await?;
        }
        self.transition(SwapState::WitnessValidated);

        self.transition(SwapState::Proving);
        let generated = self
            .engine
            .generate_async(witness, request.public_inputs, self.prove_timeout)
            .await?;
        self.transition(SwapState::ProofReady);

        if !generated.is_eligible {
            return Err(SwapError::ProofGeneration(
                "witness is not eligible; refusing to submit".into(),
            ));
        }
        if !self.engine.verify(&generated.proof, &generated.public_signals) {
            return Err(SwapError::LocalVerificationFailure);
        }

        let nullifier = generated.nullifier;
        self.ensure_unconsumed(nullifier).await?;
        self.transition(SwapState::NullifierChecked);

        let contract =
            ProofEngine::format_for_on_chain_verifier(&generated.proof, &generated.public_signals);
        let signals = generated.public_signals;
        let (network, contract_ref, signals_ref) = (&self.network, &contract, &signals);
        let submission = retry(self.retry, "submission", move || {
            network.submit(contract_ref, signals_ref)
        })
        .await?;
        self.transition(SwapState::Submitted);
        self.audit(AuditEventType::ProofSubmitted, nullifier, &contract.calldata());

        let identity = self.signer.identity();
        let (ledger, identity) = (&self.ledger, identity.as_str());
        let record = retry(self.retry, "nullifier consumption", move || async move {
            ledger.consume(nullifier, identity).await.map_err(SwapError::from)
        })
        .await?;
        self.audit(
            AuditEventType::NullifierConsumed,
            nullifier,
            &record.consumed_at.to_be_bytes(),
        );

        let receipt = SwapReceipt {
            token_in: request.token_in,
            token_out: request.token_out,
            amount_in: request.swap_amount,
            min_amount_out: request.min_amount_out,
            chain_id: request.chain_id,
            nullifier,
            commitment: generated.commitment,
            tx_reference: submission.tx_reference.clone(),
            created_at: submission.accepted_at,
        };
        let sealed = ReceiptVault::seal(&receipt, &receipt_key)?;
        drop(receipt_key);
        let blob = sealed.to_bytes()?;
        let receipt_cid = self.blobs.store(blob.clone()).await?;
        self.transition(SwapState::ReceiptSealed);
        self.audit(AuditEventType::ReceiptStored, nullifier, &blob);

        self.transition(SwapState::Complete);
        info!("Swap complete for nullifier {}", nullifier);

        Ok(SwapOutcome {
            nullifier,
            commitment: generated.commitment,
            nonce,
            submission,
            receipt: sealed,
            receipt_cid,
            states: self.history.clone(),
        })
    }

    fn check_membership(&self, witness: &PrivateWitness, public: &PublicInputs) -> SwapResult<()> {
        let Some(set) = &self.eligible_set else {
            return Ok(());
        };
        if field_to_bytes(set.root()) != public.merkle_root {
            return Err(SwapError::InputValidation(
                "merkle root does not match the eligible set".into(),
            ));
        }
        if !set.contains_secret(&witness.secret_key) {
            return Err(SwapError::InputValidation(
                "wallet is not a member of the eligible set".into(),
            ));
        }
        Ok(())
    }

    async fn ensure_unconsumed(&self, nullifier: NullifierHash) -> SwapResult<()> {
        let ledger = &self.ledger;
        let consumed = retry(self.retry, "nullifier lookup", move || async move {
            ledger.is_consumed(nullifier).await.map_err(SwapError::from)
        })
        .await?;
        if consumed {
            return Err(SwapError::AlreadyConsumed {
                nullifier: nullifier.to_hex(),
            });
        }
        Ok(())
    }

    fn audit(&self, event_type: AuditEventType, nullifier: NullifierHash, data: &[u8]) {
        let event = AuditEvent {
            nullifier_hash: nullifier,
            event_type,
            data_hash: content_id(data),
        };
        let sink = Arc::clone(&self.audit);
        tokio::spawn(async move {
            if let Err(e) = sink.emit(event).await {
                warn!("Audit emission failed: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use std::sync::atomic::{AtomicU32, Ordering};

    const POLICY: RetryPolicy = RetryPolicy {
        attempts: 2,
        backoff: Duration::from_millis(1),
    };

    #[tokio::test]
    async fn test_retry_gives_up_after_policy_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: SwapResult<()> = retry(POLICY, "lookup", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SwapError::Ledger(LedgerError::Unavailable("down".into())))
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_repeat_replays() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: SwapResult<()> = retry(POLICY, "consume", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::AlreadyConsumed("ab".into()).into())
        })
        .await;

        assert!(matches!(result, Err(SwapError::AlreadyConsumed { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_terminal_states() {
        assert!(SwapState::Complete.is_terminal());
        assert!(SwapState::Error.is_terminal());
        assert!(!SwapState::Submitted.is_terminal());
    }
}
