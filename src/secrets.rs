//! Deterministic secret derivation from a wallet signature.
//!
//! The user signs one message per [`KeyPurpose`]; the signature is stretched
//! with PBKDF2-HMAC-SHA256 into a 32-byte key. Salts are domain separated per
//! purpose, so keys for different purposes are unlinkable even though they
//! come from the same wallet.
//!
//! Nullifier and commitment helpers here are the native twins of the circuit
//! gadgets: same Poseidon spec, same input order, same byte-to-field mapping.

use crate::config::KeysConfig;
use crate::error::{DerivationError, SwapError, SwapResult};
use crate::types::{Commitment, NullifierHash, HASH_SIZE};
use crate::utils::{bytes_to_field, field_to_uint256_be, poseidon_hash, poseidon_hash3};
use log::debug;
use pasta_curves::group::ff::Field;
use pasta_curves::pallas;
use rand::rngs::OsRng;
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Domain tag hashed with a secret key to form its eligible-set leaf.
pub const LEAF_DOMAIN: u64 = 0x6c65_6166;

const PROOF_SECRET_DOMAIN: &str = "zkswap/proof-secret/v1";
const RECEIPT_ENCRYPTION_DOMAIN: &str = "zkswap/receipt-encryption/v1";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    /// The circuit's `secretKey`.
    ProofSecret,
    /// Key of the [`crate::ReceiptVault`].
    ReceiptEncryption,
    Custom(String),
}

impl KeyPurpose {
    pub fn domain(&self) -> &str {
        match self {
            KeyPurpose::ProofSecret => PROOF_SECRET_DOMAIN,
            KeyPurpose::ReceiptEncryption => RECEIPT_ENCRYPTION_DOMAIN,
            KeyPurpose::Custom(domain) => domain.as_str(),
        }
    }
}

/// The message a wallet signs to authorize derivation for `purpose`.
pub fn purpose_message(purpose: &KeyPurpose) -> String {
    format!(
        "zkp-swap-eligibility key derivation\npurpose: {}\n\nThis signature derives a private key. It does not authorize any transaction.",
        purpose.domain()
    )
}

/// A derived 256-bit key. Wiped from memory when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; HASH_SIZE]);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_field(&self) -> pallas::Base {
        bytes_to_field(&self.0)
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(<redacted>)")
    }
}

#[derive(Debug, Clone)]
pub struct SecretDerivation {
    iterations: u32,
    salt: Vec<u8>,
}

impl Default for SecretDerivation {
    fn default() -> Self {
        Self::from_config(&KeysConfig::default())
    }
}

impl SecretDerivation {
    pub fn new(iterations: u32, salt: impl Into<Vec<u8>>) -> SwapResult<Self> {
        if iterations == 0 {
            return Err(SwapError::Config("PBKDF2 iterations must be at least 1".into()));
        }
        Ok(Self {
            iterations,
            salt: salt.into(),
        })
    }

    pub fn from_config(config: &KeysConfig) -> Self {
        Self {
            iterations: config.iterations.max(1),
            salt: config.salt.as_bytes().to_vec(),
        }
    }

    /// Stretches `signature` into the key for `purpose`.
    ///
    /// # Errors
    /// `EmptySignature` for an empty input, `MalformedSignature` for anything
    /// that is not a 64 or 65 byte non-zero ECDSA signature.
    pub fn derive_key(
        &self,
        signature: &[u8],
        purpose: &KeyPurpose,
    ) -> Result<DerivedKey, DerivationError> {
        if signature.is_empty() {
            return Err(DerivationError::EmptySignature);
        }
        if signature.len() != 64 && signature.len() != 65 {
            return Err(DerivationError::MalformedSignature(format!(
                "expected 64 or 65 bytes, got {}",
                signature.len()
            )));
        }
        if signature.iter().all(|&b| b == 0) {
            return Err(DerivationError::MalformedSignature(
                "signature is all zeros".into(),
            ));
        }

        let mut salt = self.salt.clone();
        salt.extend_from_slice(purpose.domain().as_bytes());

        let mut key = [0u8; HASH_SIZE];
        pbkdf2::pbkdf2_hmac::<Sha256>(signature, &salt, self.iterations, &mut key);
        debug!("Derived key for purpose {}", purpose.domain());

        let derived = DerivedKey(key);
        key.zeroize();
        Ok(derived)
    }
}

/// Fresh nonce from the operating system CSPRNG.
///
/// Drawn as a uniform field element and returned as its big-endian word, so
/// distinct nonces always map to distinct field values.
pub fn nonce() -> [u8; HASH_SIZE] {
    field_to_uint256_be(pallas::Base::random(OsRng))
}

pub fn nullifier_field(secret_key: pallas::Base, nonce: pallas::Base) -> pallas::Base {
    poseidon_hash(secret_key, nonce)
}

pub fn commitment_field(swap_amount: u64, balance: u64, nullifier: pallas::Base) -> pallas::Base {
    poseidon_hash3(
        pallas::Base::from(swap_amount),
        pallas::Base::from(balance),
        nullifier,
    )
}

/// `H(secretKey, nonce)`, before eligibility gating.
pub fn nullifier(secret_key: &[u8; HASH_SIZE], nonce: &[u8; HASH_SIZE]) -> NullifierHash {
    NullifierHash::from_field(nullifier_field(
        bytes_to_field(secret_key),
        bytes_to_field(nonce),
    ))
}

/// `H(swapAmount, balance, nullifier)`, before eligibility gating.
pub fn commitment(
    swap_amount: u64,
    balance: u64,
    nullifier: &NullifierHash,
) -> SwapResult<Commitment> {
    let nullifier = nullifier.to_field().ok_or_else(|| {
        SwapError::InputValidation("nullifier is not a canonical field element".into())
    })?;
    Ok(Commitment::from_field(commitment_field(
        swap_amount,
        balance,
        nullifier,
    )))
}

/// Leaf of the eligible set for the holder of `secret_key`.
pub fn merkle_leaf(secret_key: &[u8; HASH_SIZE]) -> pallas::Base {
    poseidon_hash(bytes_to_field(secret_key), pallas::Base::from(LEAF_DOMAIN))
}
