//! Error taxonomy for the swap eligibility protocol.
//!
//! Cryptographic and ledger failures are never downgraded: each maps to its
//! own variant of [`SwapError`], and only [`SwapError::is_transient`] failures
//! may be retried.

use thiserror::Error;

/// Failures raised while deriving secrets from a wallet signature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DerivationError {
    #[error("signature is empty")]
    EmptySignature,

    #[error("malformed signature: {0}")]
    MalformedSignature(String),
}

/// Failures of the nullifier ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The nullifier was consumed before. Expected outcome of a replay.
    #[error("nullifier already consumed: {0}")]
    AlreadyConsumed(String),

    /// The backing store could not be reached. Safe to retry.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The backing store returned data that cannot be trusted.
    #[error("ledger corrupted: {0}")]
    Corrupted(String),

    /// The all-zero nullifier of an ineligible proof.
    #[error("sentinel nullifier cannot be consumed")]
    SentinelNullifier,
}

/// Failures of the receipt vault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    #[error("decryption failed (wrong key or tampered receipt)")]
    Decryption,

    #[error("unsupported receipt algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("malformed receipt: {0}")]
    Malformed(String),

    #[error("receipt serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Serialization(err.to_string())
    }
}

/// Aggregated error type of the swap workflow.
#[derive(Debug, Error)]
pub enum SwapError {
    /// Malformed or out-of-range witness or public inputs. Caught before proving.
    #[error("invalid input: {0}")]
    InputValidation(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(#[from] DerivationError),

    /// Witness unsatisfiable or prover resources unavailable.
    #[error("cannot generate proof: {0}")]
    ProofGeneration(String),

    /// A freshly generated proof failed the engine's own verification.
    #[error("generated proof failed local verification")]
    LocalVerificationFailure,

    #[error("this swap secret was already used (nullifier {nullifier})")]
    AlreadyConsumed { nullifier: String },

    #[error("receipt decryption failed")]
    Decryption,

    #[error("unsupported receipt algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Transport or infrastructure failure talking to the ledger.
    #[error("ledger error: {0}")]
    Ledger(LedgerError),

    #[error("network rejected submission: {0}")]
    Submission(String),

    /// Transient network failure during submission.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("signer error: {0}")]
    Signer(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SwapError {
    /// Whether the failure came from a transport that may succeed on retry.
    ///
    /// Replays, cryptographic failures and validation errors are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SwapError::Ledger(LedgerError::Unavailable(_)) | SwapError::NetworkUnavailable(_)
        )
    }

    /// Machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            SwapError::InputValidation(_) => "INPUT_VALIDATION",
            SwapError::KeyDerivation(_) => "KEY_DERIVATION",
            SwapError::ProofGeneration(_) => "PROOF_GENERATION",
            SwapError::LocalVerificationFailure => "LOCAL_VERIFICATION_FAILURE",
            SwapError::AlreadyConsumed { .. } => "ALREADY_CONSUMED",
            SwapError::Decryption => "DECRYPTION",
            SwapError::UnsupportedAlgorithm(_) => "UNSUPPORTED_ALGORITHM",
            SwapError::Ledger(_) => "LEDGER",
            SwapError::Submission(_) => "SUBMISSION",
            SwapError::NetworkUnavailable(_) => "NETWORK_UNAVAILABLE",
            SwapError::Storage(_) => "STORAGE",
            SwapError::Signer(_) => "SIGNER",
            SwapError::Config(_) => "CONFIG",
        }
    }
}

impl From<LedgerError> for SwapError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AlreadyConsumed(nullifier) => SwapError::AlreadyConsumed { nullifier },
            other => SwapError::Ledger(other),
        }
    }
}

impl From<VaultError> for SwapError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::Decryption => SwapError::Decryption,
            VaultError::UnsupportedAlgorithm(tag) => SwapError::UnsupportedAlgorithm(tag),
            other => SwapError::Storage(other.to_string()),
        }
    }
}

pub type SwapResult<T> = std::result::Result<T, SwapError>;
