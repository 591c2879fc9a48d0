//! Authenticated encryption of swap receipts for external blob storage.
//!
//! Receipts are sealed with ChaCha20-Poly1305 under a key from
//! [`KeyPurpose::ReceiptEncryption`](crate::secrets::KeyPurpose). Every call
//! draws a fresh 96-bit IV from the OS CSPRNG. The algorithm tag and timestamp
//! are bound as associated data, so neither can be altered without failing
//! decryption.

use crate::error::VaultError;
use crate::secrets::DerivedKey;
use crate::types::{Commitment, NullifierHash};
use crate::utils::unix_now;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use log::debug;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

/// Tag of the only supported receipt format.
pub const ALGORITHM_CHACHA20_POLY1305: &str = "chacha20poly1305/v1";

pub const IV_SIZE: usize = 12;

const RECEIPT_ID_DOMAIN: &[u8] = b"zkswap/receipt-id/v1";

/// Plaintext metadata of a completed swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapReceipt {
    pub token_in: String,
    pub token_out: String,
    pub amount_in: u64,
    pub min_amount_out: u64,
    pub chain_id: u64,
    pub nullifier: NullifierHash,
    pub commitment: Commitment,
    /// Reference returned by the network verifier.
    pub tx_reference: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedReceipt {
    /// `sha3-256(domain || commitment || timestamp || iv || ciphertext)`, hex.
    pub receipt_id: String,
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_SIZE],
    pub algorithm: String,
    pub timestamp: u64,
}

impl EncryptedReceipt {
    pub fn to_bytes(&self) -> Result<Vec<u8>, VaultError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VaultError> {
        serde_json::from_slice(bytes).map_err(|e| VaultError::Malformed(e.to_string()))
    }

    /// Whether this receipt was sealed for the swap that produced `commitment`.
    pub fn matches_commitment(&self, commitment: &Commitment) -> bool {
        receipt_id(commitment, self.timestamp, &self.iv, &self.ciphertext) == self.receipt_id
    }
}

fn receipt_id(commitment: &Commitment, timestamp: u64, iv: &[u8], ciphertext: &[u8]) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(RECEIPT_ID_DOMAIN);
    hasher.update(commitment.0);
    hasher.update(timestamp.to_be_bytes());
    hasher.update(iv);
    hasher.update(ciphertext);
    hex::encode(hasher.finalize())
}

fn associated_data(algorithm: &str, timestamp: u64) -> Vec<u8> {
    let mut aad = algorithm.as_bytes().to_vec();
    aad.extend_from_slice(&timestamp.to_be_bytes());
    aad
}

pub struct ReceiptVault;

impl ReceiptVault {
    pub fn seal(receipt: &SwapReceipt, key: &DerivedKey) -> Result<EncryptedReceipt, VaultError> {
        let timestamp = unix_now().map_err(|e| VaultError::Serialization(e.to_string()))?;
        Self::seal_at(receipt, key, timestamp)
    }

    pub(crate) fn seal_at(
        receipt: &SwapReceipt,
        key: &DerivedKey,
        timestamp: u64,
    ) -> Result<EncryptedReceipt, VaultError> {
        let plaintext = serde_json::to_vec(receipt)?;

        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let aad = associated_data(ALGORITHM_CHACHA20_POLY1305, timestamp);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| VaultError::Serialization("encryption failed".into()))?;

        debug!("Sealed receipt ({} bytes of ciphertext)", ciphertext.len());

        Ok(EncryptedReceipt {
            receipt_id: receipt_id(&receipt.commitment, timestamp, &iv, &ciphertext),
            ciphertext,
            iv,
            algorithm: ALGORITHM_CHACHA20_POLY1305.to_string(),
            timestamp,
        })
    }

    /// Decrypts `sealed`.
    ///
    /// # Errors
    /// `UnsupportedAlgorithm` for an unknown tag, `Decryption` for a wrong key
    /// or any tampering, `Malformed` when the plaintext is not a receipt.
    pub fn open(sealed: &EncryptedReceipt, key: &DerivedKey) -> Result<SwapReceipt, VaultError> {
        if sealed.algorithm != ALGORITHM_CHACHA20_POLY1305 {
            return Err(VaultError::UnsupportedAlgorithm(sealed.algorithm.clone()));
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let aad = associated_data(&sealed.algorithm, sealed.timestamp);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&sealed.iv),
                Payload {
                    msg: &sealed.ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| VaultError::Decryption)?;

        serde_json::from_slice(&plaintext).map_err(|e| VaultError::Malformed(e.to_string()))
    }
}
