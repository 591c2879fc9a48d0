//! ZKP Swap Eligibility
//!
//! Zero-knowledge proofs that a token swap satisfies protocol eligibility
//! rules, paired with a nullifier protocol that accepts each proof secret at
//! most once.
//!
//! # Components
//!
//! - [`EligibilityCircuit`]: halo2 circuit encoding the eligibility predicate
//! - [`ProofEngine`]: key generation, proving, verification, on-chain formatting
//! - [`secrets`]: per-purpose key derivation from a wallet signature
//! - [`EligibleSet`]: Poseidon Merkle tree over eligible participants
//! - [`ledger`]: at-most-once nullifier consumption
//! - [`receipt`]: sealed swap receipts for blob storage
//! - [`SwapWorkflow`]: the end-to-end swap sequence
//!
//! # Example
//!
//! ```no_run
//! use zkp_swap_eligibility::{
//!     EligibilityMode, PrivateWitness, ProofEngine, PublicInputs, CIRCUIT_K,
//! };
//!
//! let engine = ProofEngine::setup(CIRCUIT_K, EligibilityMode::Strict).unwrap();
//! let witness = PrivateWitness {
//!     balance: 100,
//!     swap_amount: 40,
//!     secret_key: [7u8; 32],
//!     nonce: [9u8; 32],
//!     eligibility_flag: 1,
//! };
//! let public = PublicInputs {
//!     min_balance: 50,
//!     max_swap_amount: 60,
//!     merkle_root: [0u8; 32],
//! };
//! let generated = engine.generate(&witness, &public).unwrap();
//! assert!(engine.verify(&generated.proof, &generated.public_signals));
//! ```

pub mod adapters;
pub mod circuit;
pub mod config;
pub mod error;
pub mod ledger;
pub mod merkle;
pub mod ports;
pub mod prover;
pub mod receipt;
pub mod secrets;
pub mod types;
pub mod utils;
pub mod workflow;


pub use circuit::EligibilityCircuit;
pub use error::{SwapError, SwapResult};
pub use ledger::{DirNullifierLedger, InMemoryNullifierLedger, NullifierLedger, NullifierRecord};
pub use merkle::{EligibleSet, MembershipPath};
pub use prover::{ContractProof, GeneratedProof, Proof, ProofEngine};
pub use receipt::{EncryptedReceipt, ReceiptVault};
pub use secrets::{DerivedKey, KeyPurpose, SecretDerivation};
pub use types::{
    Commitment, EligibilityMode, EligibilityResult, NullifierHash, PrivateWitness, ProofOutput,
    PublicInputs, PublicSignals,
};
pub use workflow::{SwapOutcome, SwapRequest, SwapState, SwapWorkflow};

/// Circuit parameter for the Halo2 proving system.
///
/// `k = 10` gives 2^10 = 1024 rows. The eligibility circuit needs roughly
/// 450 rows: four bit decompositions (64, 64, 66 and 65 bits) and three
/// Poseidon permutations dominate.
///
/// # Security Considerations
///
/// Changing `CIRCUIT_K` requires regenerating all proving and verifying keys.
/// Prover and verifier must use the same value, or verification will fail.
pub const CIRCUIT_K: u32 = 10;

/// Smallest `k` the circuit fits in.
pub const MIN_CIRCUIT_K: u32 = 10;

/// Largest `k` accepted from configuration.
pub const MAX_CIRCUIT_K: u32 = 16;
