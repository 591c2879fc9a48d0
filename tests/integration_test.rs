use ethers::signers::LocalWallet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use tempfile::TempDir;
use zkp_swap_eligibility::{
    adapters::{InMemoryBlobStore, LocalNetworkVerifier, LogAuditSink},
    config::Config,
    error::LedgerError,
    ports::{AuditEvent, AuditSink, BlobStore, MessageSigner, NetworkVerifier, SubmissionReceipt},
    secrets::{self, purpose_message, KeyPurpose, SecretDerivation},
    types::{EligibilityMode, NullifierHash, PublicInputs, PublicSignals},
    utils::{decode_hex32, field_from_canonical_bytes, field_to_bytes},
    ContractProof, DirNullifierLedger, EligibleSet, EncryptedReceipt, InMemoryNullifierLedger,
    NullifierLedger, NullifierRecord, ProofEngine, ReceiptVault, SwapError, SwapRequest,
    SwapResult, SwapState, SwapWorkflow, CIRCUIT_K,
};

fn engine(mode: EligibilityMode) -> ProofEngine {
    static STRICT: OnceLock<ProofEngine> = OnceLock::new();
    static SOFT: OnceLock<ProofEngine> = OnceLock::new();
    let cell = match mode {
        EligibilityMode::Strict => &STRICT,
        EligibilityMode::Soft => &SOFT,
    };
    cell.get_or_init(|| ProofEngine::setup(CIRCUIT_K, mode).unwrap())
        .clone()
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.keys.iterations = 1_000;
    config.ledger.retry_attempts = 3;
    config.ledger.retry_backoff_ms = 1;
    config
}

fn protocol(merkle_root: [u8; 32]) -> PublicInputs {
    PublicInputs {
        min_balance: 50,
        max_swap_amount: 60,
        merkle_root,
    }
}

fn request(swap_amount: u64, merkle_root: [u8; 32]) -> SwapRequest {
    SwapRequest {
        balance: 100,
        swap_amount,
        eligibility_flag: 1,
        public_inputs: protocol(merkle_root),
        nonce: None,
        token_in: "WETH".into(),
        token_out: "USDC".into(),
        min_amount_out: 39,
        chain_id: 1,
    }
}

type LocalNetwork = LocalNetworkVerifier<Arc<InMemoryNullifierLedger>>;

fn network(mode: EligibilityMode, merkle_root: [u8; 32]) -> LocalNetwork {
    LocalNetworkVerifier::new(
        engine(mode),
        Arc::new(InMemoryNullifierLedger::new()),
        protocol(merkle_root),
    )
}

fn build<N, L, A>(
    mode: EligibilityMode,
    wallet: LocalWallet,
    network: N,
    ledger: L,
    audit: A,
) -> SwapWorkflow<LocalWallet, N, L, InMemoryBlobStore, A>
where
    N: NetworkVerifier,
    L: NullifierLedger,
    A: AuditSink,
{
    SwapWorkflow::with_config(
        wallet,
        engine(mode),
        network,
        ledger,
        InMemoryBlobStore::new(),
        audit,
        &test_config(),
    )
}

fn workflow<L: NullifierLedger>(
    mode: EligibilityMode,
    wallet: LocalWallet,
    ledger: L,
) -> SwapWorkflow<LocalWallet, LocalNetwork, L, InMemoryBlobStore, LogAuditSink> {
    build(mode, wallet, network(mode, [0u8; 32]), ledger, LogAuditSink)
}

async fn proof_secret(wallet: &LocalWallet) -> [u8; 32] {
    let derivation = SecretDerivation::from_config(&test_config().keys);
    let signature = wallet
        .sign(&purpose_message(&KeyPurpose::ProofSecret))
        .await
        .unwrap();
    *derivation
        .derive_key(&signature, &KeyPurpose::ProofSecret)
        .unwrap()
        .as_bytes()
}

/// Fails the first `failures` consume calls as unavailable.
struct FlakyLedger {
    inner: InMemoryNullifierLedger,
    failures: AtomicU32,
    consume_calls: AtomicU32,
    error: LedgerError,
}

impl FlakyLedger {
    fn new(failures: u32, error: LedgerError) -> Self {
        Self {
            inner: InMemoryNullifierLedger::new(),
            failures: AtomicU32::new(failures),
            consume_calls: AtomicU32::new(0),
            error,
        }
    }
}

impl NullifierLedger for FlakyLedger {
    async fn is_consumed(&self, nullifier: NullifierHash) -> Result<bool, LedgerError> {
        self.inner.is_consumed(nullifier).await
    }

    async fn consume(
        &self,
        nullifier: NullifierHash,
        identity: &str,
    ) -> Result<NullifierRecord, LedgerError> {
        self.consume_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(self.error.clone());
        }
        self.inner.consume(nullifier, identity).await
    }

    async fn record(&self, nullifier: NullifierHash) -> Result<Option<NullifierRecord>, LedgerError> {
        self.inner.record(nullifier).await
    }
}

/// Network that is unreachable for the first `unavailable` submissions, then
/// either reports a replay or forwards to a local verifier.
struct FlakyNetwork {
    inner: LocalNetwork,
    unavailable: AtomicU32,
    replay: bool,
    submit_calls: AtomicU32,
}

impl FlakyNetwork {
    fn new(unavailable: u32, replay: bool) -> Self {
        Self {
            inner: network(EligibilityMode::Strict, [0u8; 32]),
            unavailable: AtomicU32::new(unavailable),
            replay,
            submit_calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }
}

impl NetworkVerifier for FlakyNetwork {
    async fn submit(
        &self,
        proof: &ContractProof,
        signals: &PublicSignals,
    ) -> SwapResult<SubmissionReceipt> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.unavailable.load(Ordering::SeqCst);
        if remaining > 0 {
            self.unavailable.store(remaining - 1, Ordering::SeqCst);
            return Err(SwapError::NetworkUnavailable("gateway timeout".into()));
        }
        if self.replay {
            return Err(SwapError::AlreadyConsumed {
                nullifier: signals.nullifier().to_hex(),
            });
        }
        self.inner.submit(proof, signals).await
    }
}

/// Audit mirror that counts emissions and rejects every one.
struct FailingAuditSink {
    emits: Arc<AtomicU32>,
}

impl AuditSink for FailingAuditSink {
    async fn emit(&self, _event: AuditEvent) -> SwapResult<()> {
        self.emits.fetch_add(1, Ordering::SeqCst);
        Err(SwapError::Storage("audit mirror offline".into()))
    }
}

/// Audit mirror that never answers.
struct StalledAuditSink;

impl AuditSink for StalledAuditSink {
    async fn emit(&self, _event: AuditEvent) -> SwapResult<()> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_end_to_end_swap_workflow() {
    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let identity = wallet.identity();
    let mut workflow = workflow(
        EligibilityMode::Strict,
        wallet,
        InMemoryNullifierLedger::new(),
    );

    let outcome = workflow.run(request(40, [0u8; 32])).await.unwrap();

    assert_eq!(workflow.state(), SwapState::Complete);
    assert_eq!(
        outcome.states,
        vec![
            SwapState::Idle,
            SwapState::WitnessValidated,
            SwapState::Proving,
            SwapState::ProofReady,
            SwapState::NullifierChecked,
            SwapState::Submitted,
            SwapState::ReceiptSealed,
            SwapState::Complete,
        ]
    );
    assert!(!outcome.nullifier.is_sentinel());

    let record = workflow.ledger().record(outcome.nullifier).await.unwrap().unwrap();
    assert_eq!(record.consuming_identity, identity);
    assert!(workflow
        .network()
        .ledger()
        .is_consumed(outcome.nullifier)
        .await
        .unwrap());

    assert!(outcome.receipt.matches_commitment(&outcome.commitment));
    let stored = workflow.blobs().fetch(&outcome.receipt_cid).await.unwrap();
    assert_eq!(EncryptedReceipt::from_bytes(&stored).unwrap(), outcome.receipt);

    let key = workflow.receipt_key().await.unwrap();
    let receipt = ReceiptVault::open(&outcome.receipt, &key).unwrap();
    assert_eq!(receipt.amount_in, 40);
    assert_eq!(receipt.nullifier, outcome.nullifier);
    assert_eq!(receipt.commitment, outcome.commitment);
    assert_eq!(receipt.tx_reference, outcome.submission.tx_reference);
}

#[tokio::test]
async fn test_replay_with_same_nonce_is_rejected() {
    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let mut workflow = workflow(
        EligibilityMode::Strict,
        wallet,
        InMemoryNullifierLedger::new(),
    );

    let first = workflow.run(request(40, [0u8; 32])).await.unwrap();

    let mut replay = request(40, [0u8; 32]);
    replay.nonce = Some(first.nonce);
    let err = workflow.run(replay).await.unwrap_err();

    assert!(matches!(err, SwapError::AlreadyConsumed { .. }), "got {err:?}");
    assert_eq!(workflow.state(), SwapState::Error);
}

#[tokio::test]
async fn test_network_rejects_resubmitted_proof() {
    let engine = engine(EligibilityMode::Strict);
    let network = LocalNetworkVerifier::new(
        engine.clone(),
        InMemoryNullifierLedger::new(),
        protocol([0u8; 32]),
    );
    let witness = zkp_swap_eligibility::PrivateWitness {
        balance: 100,
        swap_amount: 40,
        secret_key: [3u8; 32],
        nonce: secrets::nonce(),
        eligibility_flag: 1,
    };
    let generated = engine
        .generate(&witness, &request(40, [0u8; 32]).public_inputs)
        .unwrap();
    let contract =
        ProofEngine::format_for_on_chain_verifier(&generated.proof, &generated.public_signals);

    network.submit(&contract, &generated.public_signals).await.unwrap();
    let err = network
        .submit(&contract, &generated.public_signals)
        .await
        .unwrap_err();
    assert!(matches!(err, SwapError::AlreadyConsumed { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_transient_ledger_failures_are_retried() {
    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let ledger = Arc::new(FlakyLedger::new(2, LedgerError::Unavailable("timeout".into())));
    let mut workflow = workflow(EligibilityMode::Strict, wallet, Arc::clone(&ledger));

    let outcome = workflow.run(request(40, [0u8; 32])).await.unwrap();

    assert_eq!(ledger.consume_calls.load(Ordering::SeqCst), 3);
    assert!(ledger.is_consumed(outcome.nullifier).await.unwrap());
}

#[tokio::test]
async fn test_corrupted_ledger_is_not_retried() {
    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let ledger = Arc::new(FlakyLedger::new(5, LedgerError::Corrupted("bad record".into())));
    let mut workflow = workflow(EligibilityMode::Strict, wallet, Arc::clone(&ledger));

    let err = workflow.run(request(40, [0u8; 32])).await.unwrap_err();

    assert!(matches!(err, SwapError::Ledger(LedgerError::Corrupted(_))), "got {err:?}");
    assert_eq!(ledger.consume_calls.load(Ordering::SeqCst), 1);
    assert_eq!(workflow.state(), SwapState::Error);
}

#[tokio::test]
async fn test_concurrent_consumers_across_ledger_handles() {
    let dir = TempDir::new().unwrap();
    let nullifier = secrets::nullifier(&[5u8; 32], &[6u8; 32]);
    let first = DirNullifierLedger::open(dir.path()).await.unwrap();
    let second = DirNullifierLedger::open(dir.path()).await.unwrap();

    let (a, b) = tokio::join!(
        first.consume(nullifier, "session-a"),
        second.consume(nullifier, "session-b")
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::AlreadyConsumed(_))))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_eligible_set_membership() {
    let member = LocalWallet::new(&mut rand::thread_rng());
    let outsider = LocalWallet::new(&mut rand::thread_rng());
    let set = EligibleSet::from_secret_keys(&[proof_secret(&member).await, [1u8; 32], [2u8; 32]])
        .unwrap();
    let root = field_to_bytes(set.root());

    let mut accepted = build(
        EligibilityMode::Strict,
        member,
        network(EligibilityMode::Strict, root),
        InMemoryNullifierLedger::new(),
        LogAuditSink,
    )
    .with_eligible_set(set.clone());
    accepted.run(request(40, root)).await.unwrap();

    let mut rejected = workflow(
        EligibilityMode::Strict,
        outsider,
        InMemoryNullifierLedger::new(),
    )
    .with_eligible_set(set);
    let err = rejected.run(request(40, root)).await.unwrap_err();
    assert!(matches!(err, SwapError::InputValidation(_)), "got {err:?}");
    assert_eq!(rejected.state(), SwapState::Error);
}

#[tokio::test]
async fn test_soft_mode_ineligible_swap_is_not_submitted() {
    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let mut workflow = workflow(EligibilityMode::Soft, wallet, InMemoryNullifierLedger::new());

    let err = workflow.run(request(70, [0u8; 32])).await.unwrap_err();

    assert!(matches!(err, SwapError::ProofGeneration(_)), "got {err:?}");
    assert_eq!(workflow.state(), SwapState::Error);
    assert!(workflow.ledger().is_empty().await);
    assert!(workflow.network().ledger().is_empty().await);
}

#[tokio::test]
async fn test_network_rejects_proof_for_foreign_bounds() {
    let engine = engine(EligibilityMode::Strict);
    let network = LocalNetworkVerifier::new(
        engine.clone(),
        InMemoryNullifierLedger::new(),
        protocol([0u8; 32]),
    );
    let witness = zkp_swap_eligibility::PrivateWitness {
        balance: 1,
        swap_amount: 1,
        secret_key: [3u8; 32],
        nonce: secrets::nonce(),
        eligibility_flag: 1,
    };
    let lax = PublicInputs {
        min_balance: 0,
        max_swap_amount: u64::MAX,
        merkle_root: [0u8; 32],
    };
    let generated = engine.generate(&witness, &lax).unwrap();
    assert!(generated.is_eligible);
    assert!(engine.verify(&generated.proof, &generated.public_signals));
    let contract =
        ProofEngine::format_for_on_chain_verifier(&generated.proof, &generated.public_signals);

    let err = network
        .submit(&contract, &generated.public_signals)
        .await
        .unwrap_err();
    assert!(matches!(err, SwapError::Submission(_)), "got {err:?}");
    assert!(network.ledger().is_empty().await);
}

#[tokio::test]
async fn test_workflow_with_foreign_bounds_is_rejected_by_network() {
    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let mut workflow = workflow(
        EligibilityMode::Strict,
        wallet,
        InMemoryNullifierLedger::new(),
    );
    let mut lax = request(1, [0u8; 32]);
    lax.balance = 1;
    lax.public_inputs.min_balance = 0;
    lax.public_inputs.max_swap_amount = u64::MAX;

    let err = workflow.run(lax).await.unwrap_err();

    assert!(matches!(err, SwapError::Submission(_)), "got {err:?}");
    assert_eq!(workflow.state(), SwapState::Error);
    assert!(workflow.ledger().is_empty().await);
    assert!(workflow.network().ledger().is_empty().await);
}

#[tokio::test]
async fn test_unavailable_network_is_retried() {
    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let mut workflow = build(
        EligibilityMode::Strict,
        wallet,
        FlakyNetwork::new(2, false),
        InMemoryNullifierLedger::new(),
        LogAuditSink,
    );

    let outcome = workflow.run(request(40, [0u8; 32])).await.unwrap();

    assert_eq!(workflow.network().calls(), 3);
    assert_eq!(workflow.state(), SwapState::Complete);
    assert!(workflow
        .network()
        .inner
        .ledger()
        .is_consumed(outcome.nullifier)
        .await
        .unwrap());
    assert!(workflow.ledger().is_consumed(outcome.nullifier).await.unwrap());
}

#[tokio::test]
async fn test_unavailable_network_gives_up_after_retry_budget() {
    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let mut workflow = build(
        EligibilityMode::Strict,
        wallet,
        FlakyNetwork::new(10, false),
        InMemoryNullifierLedger::new(),
        LogAuditSink,
    );

    let err = workflow.run(request(40, [0u8; 32])).await.unwrap_err();

    assert!(matches!(err, SwapError::NetworkUnavailable(_)), "got {err:?}");
    assert_eq!(workflow.network().calls(), test_config().ledger.retry_attempts + 1);
    assert_eq!(workflow.state(), SwapState::Error);
    assert!(workflow.ledger().is_empty().await);
}

#[tokio::test]
async fn test_network_replay_is_not_retried() {
    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let mut workflow = build(
        EligibilityMode::Strict,
        wallet,
        FlakyNetwork::new(1, true),
        InMemoryNullifierLedger::new(),
        LogAuditSink,
    );

    let err = workflow.run(request(40, [0u8; 32])).await.unwrap_err();

    assert!(matches!(err, SwapError::AlreadyConsumed { .. }), "got {err:?}");
    assert_eq!(workflow.network().calls(), 2);
    assert_eq!(workflow.state(), SwapState::Error);
    assert!(workflow.ledger().is_empty().await);
}

#[tokio::test]
async fn test_failing_audit_sink_does_not_fail_swap() {
    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let emits = Arc::new(AtomicU32::new(0));
    let mut workflow = build(
        EligibilityMode::Strict,
        wallet,
        network(EligibilityMode::Strict, [0u8; 32]),
        InMemoryNullifierLedger::new(),
        FailingAuditSink {
            emits: Arc::clone(&emits),
        },
    );

    let outcome = workflow.run(request(40, [0u8; 32])).await.unwrap();
    assert_eq!(workflow.state(), SwapState::Complete);
    assert_eq!(outcome.states.last(), Some(&SwapState::Complete));

    for _ in 0..200 {
        if emits.load(Ordering::SeqCst) == 3 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(emits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_stalled_audit_sink_does_not_block_swap() {
    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let mut workflow = build(
        EligibilityMode::Strict,
        wallet,
        network(EligibilityMode::Strict, [0u8; 32]),
        InMemoryNullifierLedger::new(),
        StalledAuditSink,
    );

    workflow.run(request(40, [0u8; 32])).await.unwrap();
    assert_eq!(workflow.state(), SwapState::Complete);
}

#[test]
fn test_end_to_end_prover_verifier_binaries() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let witness_file = temp_dir.path().join("witness.toml");
    let set_file = temp_dir.path().join("eligible.txt");
    let proof_file = temp_dir.path().join("proof.json");
    let ledger_dir = temp_dir.path().join("nullifiers");
    let config_file = temp_dir.path().join("verifier.toml");
    let foreign_config_file = temp_dir.path().join("foreign.toml");

    let prover_path = PathBuf::from("./target/release/prover");
    let verifier_path = PathBuf::from("./target/release/verifier");

    if !prover_path.exists() || !verifier_path.exists() {
        eprintln!("Skipping integration test: release binaries not found");
        return;
    }

    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let private_key_hex = format!("{:x}", wallet.signer().to_bytes());

    let leaf_output = std::process::Command::new(&prover_path)
        .arg("--private-key")
        .arg(&private_key_hex)
        .arg("--print-leaf")
        .env_remove("ZKP_CONFIG")
        .output()
        .expect("Failed to execute prover");
    assert!(
        leaf_output.status.success(),
        "Leaf export failed: {}",
        String::from_utf8_lossy(&leaf_output.stderr)
    );
    let stdout = String::from_utf8_lossy(&leaf_output.stdout);
    let leaf = stdout.lines().last().expect("leaf line").trim().to_string();
    let other = hex::encode(field_to_bytes(secrets::merkle_leaf(&[1u8; 32])));
    fs::write(&set_file, format!("{other}\n{leaf}\n")).expect("Failed to write eligible set");

    let leaves = [other.as_str(), leaf.as_str()]
        .iter()
        .map(|line| field_from_canonical_bytes(&decode_hex32(line).unwrap()).unwrap())
        .collect();
    let root = hex::encode(EligibleSet::new(leaves).unwrap().root_bytes());
    fs::write(
        &config_file,
        format!("[protocol]\nmin_balance = 50\nmax_swap_amount = 60\nmerkle_root = \"{root}\"\n"),
    )
    .expect("Failed to write verifier config");
    fs::write(
        &foreign_config_file,
        format!("[protocol]\nmin_balance = 10\nmax_swap_amount = 60\nmerkle_root = \"{root}\"\n"),
    )
    .expect("Failed to write verifier config");

    fs::write(
        &witness_file,
        "balance = 100\nswap_amount = 40\nmin_balance = 50\nmax_swap_amount = 60\n",
    )
    .expect("Failed to write witness file");

    let prover_output = std::process::Command::new(&prover_path)
        .arg("--witness-file")
        .arg(&witness_file)
        .arg("--private-key")
        .arg(&private_key_hex)
        .arg("--eligible-set")
        .arg(&set_file)
        .arg("--output")
        .arg(&proof_file)
        .env_remove("ZKP_CONFIG")
        .output()
        .expect("Failed to execute prover");
    assert!(
        prover_output.status.success(),
        "Prover failed: {}",
        String::from_utf8_lossy(&prover_output.stderr)
    );
    assert!(proof_file.exists(), "Proof file was not created");

    let verify_with = |config: &PathBuf| {
        std::process::Command::new(&verifier_path)
            .arg("--proof-file")
            .arg(&proof_file)
            .arg("--config")
            .arg(config)
            .arg("--ledger-dir")
            .arg(&ledger_dir)
            .env_remove("ZKP_CONFIG")
            .output()
            .expect("Failed to execute verifier")
    };
    let verify = || verify_with(&config_file);

    let foreign = verify_with(&foreign_config_file);
    assert!(
        !foreign.status.success(),
        "Verification against other protocol bounds should fail"
    );
    assert!(String::from_utf8_lossy(&foreign.stderr).contains("do not match the protocol"));

    let first = verify();
    assert!(
        first.status.success(),
        "First verification should succeed: {}",
        String::from_utf8_lossy(&first.stderr)
    );
    assert!(String::from_utf8_lossy(&first.stdout).contains("Proof verification PASSED"));

    let second = verify();
    assert!(
        !second.status.success(),
        "Second verification should fail due to replay"
    );
    let stderr = String::from_utf8_lossy(&second.stderr);
    assert!(
        stderr.contains("Nullifier already consumed"),
        "Error should mention the consumed nullifier: {stderr}"
    );
}
