//! Type definitions for the swap eligibility protocol.

use crate::config::SecurityConfig;
use crate::error::{SwapError, SwapResult};
use crate::utils::{
    bytes_to_field, decode_hex32, field_from_canonical_bytes, field_from_uint256_be, field_to_bytes,
    unix_now,
};
use anyhow::{Context, Result};
use log::debug;
use pasta_curves::group::ff::Field;
use pasta_curves::pallas;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const HASH_SIZE: usize = 32;

/// Number of instance values exposed by the eligibility circuit.
pub const NUM_PUBLIC_SIGNALS: usize = 6;

/// Instance row of the nullifier output.
pub const SIGNAL_NULLIFIER: usize = 0;
/// Instance row of the commitment output.
pub const SIGNAL_COMMITMENT: usize = 1;
/// Instance row of the eligibility bit.
pub const SIGNAL_IS_ELIGIBLE: usize = 2;
pub const SIGNAL_MIN_BALANCE: usize = 3;
pub const SIGNAL_MAX_SWAP_AMOUNT: usize = 4;
/// Instance row of the eligible-set root. Bound as an instance only: the
/// circuit does not prove membership under it.
pub const SIGNAL_MERKLE_ROOT: usize = 5;

/// Serde adapter for 32-byte values encoded as hex strings.
pub(crate) mod hex32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        crate::utils::decode_hex32(&s).map_err(serde::de::Error::custom)
    }
}

/// How the circuit treats a witness that fails the eligibility predicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EligibilityMode {
    /// The conjunction gate is a hard constraint: ineligible witnesses cannot be proved.
    #[default]
    Strict,
    /// Ineligible witnesses prove `isEligible = 0` with zeroed nullifier and commitment.
    Soft,
}

macro_rules! field_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(#[serde(with = "hex32")] pub [u8; HASH_SIZE]);

        impl $name {
            /// The all-zero value an ineligible witness collapses to.
            pub const SENTINEL: Self = Self([0u8; HASH_SIZE]);

            pub fn from_field(value: pallas::Base) -> Self {
                Self(field_to_bytes(value))
            }

            /// Field value of a canonical encoding.
            pub fn to_field(&self) -> Option<pallas::Base> {
                field_from_canonical_bytes(&self.0)
            }

            pub fn is_sentinel(&self) -> bool {
                self.0 == [0u8; HASH_SIZE]
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(input: &str) -> Result<Self> {
                Ok(Self(decode_hex32(input)?))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }
    };
}

field_newtype!(
    /// Public one-time tag `H(secretKey, nonce)`.
    NullifierHash
);
field_newtype!(
    /// Binding of the hidden swap parameters `H(swapAmount, balance, nullifier)`.
    Commitment
);

/// The prover's private inputs. Zeroized on drop, never serialized.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateWitness {
    pub balance: u64,
    pub swap_amount: u64,
    pub secret_key: [u8; HASH_SIZE],
    pub nonce: [u8; HASH_SIZE],
    pub eligibility_flag: u64,
}

impl fmt::Debug for PrivateWitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateWitness")
            .field("balance", &"<redacted>")
            .field("swap_amount", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("nonce", &"<redacted>")
            .field("eligibility_flag", &self.eligibility_flag)
            .finish()
    }
}

impl PrivateWitness {
    /// Checks the range sanity the circuit relies on.
    ///
    /// A witness passing this check may still fail the eligibility predicate;
    /// that is decided against [`PublicInputs`] by the circuit.
    pub fn validate(&self) -> SwapResult<()> {
        if self.swap_amount == 0 {
            return Err(SwapError::InputValidation(
                "swap amount must be greater than zero".into(),
            ));
        }
        if self.balance < self.swap_amount {
            return Err(SwapError::InputValidation(format!(
                "balance {} is smaller than swap amount {}",
                self.balance, self.swap_amount
            )));
        }
        if self.eligibility_flag > 1 {
            return Err(SwapError::InputValidation(format!(
                "eligibility flag must be 0 or 1, got {}",
                self.eligibility_flag
            )));
        }
        if self.secret_key == [0u8; HASH_SIZE] {
            return Err(SwapError::InputValidation("secret key is all zeros".into()));
        }
        // Words at or above the modulus would alias a smaller nonce.
        if field_from_uint256_be(&self.nonce).is_none() {
            return Err(SwapError::InputValidation(
                "nonce is not a canonical field element".into(),
            ));
        }
        Ok(())
    }

    pub fn secret_key_field(&self) -> pallas::Base {
        bytes_to_field(&self.secret_key)
    }

    pub fn nonce_field(&self) -> pallas::Base {
        bytes_to_field(&self.nonce)
    }
}

/// Protocol parameters visible to every party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicInputs {
    pub min_balance: u64,
    pub max_swap_amount: u64,
    /// Canonical little-endian field encoding of the eligible-set root.
    #[serde(with = "hex32")]
    pub merkle_root: [u8; HASH_SIZE],
}

impl PublicInputs {
    pub fn validate(&self) -> SwapResult<()> {
        if self.max_swap_amount == 0 {
            return Err(SwapError::InputValidation(
                "max swap amount must be greater than zero".into(),
            ));
        }
        self.merkle_root_field()?;
        Ok(())
    }

    pub fn merkle_root_field(&self) -> SwapResult<pallas::Base> {
        field_from_canonical_bytes(&self.merkle_root).ok_or_else(|| {
            SwapError::InputValidation("merkle root is not a canonical field element".into())
        })
    }
}

/// Instance column of the eligibility circuit, in row order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicSignals(pub [pallas::Base; NUM_PUBLIC_SIGNALS]);

impl PublicSignals {
    pub fn new(
        nullifier: pallas::Base,
        commitment: pallas::Base,
        is_eligible: bool,
        public: &PublicInputs,
    ) -> SwapResult<Self> {
        Ok(Self([
            nullifier,
            commitment,
            if is_eligible {
                pallas::Base::ONE
            } else {
                pallas::Base::ZERO
            },
            pallas::Base::from(public.min_balance),
            pallas::Base::from(public.max_swap_amount),
            public.merkle_root_field()?,
        ]))
    }

    pub fn as_slice(&self) -> &[pallas::Base] {
        &self.0
    }

    pub fn nullifier(&self) -> NullifierHash {
        NullifierHash::from_field(self.0[SIGNAL_NULLIFIER])
    }

    pub fn commitment(&self) -> Commitment {
        Commitment::from_field(self.0[SIGNAL_COMMITMENT])
    }

    /// Reads signal `[2]` as a boolean. Any value other than 0 or 1 is malformed.
    pub fn is_eligible(&self) -> Option<bool> {
        let bit = self.0[SIGNAL_IS_ELIGIBLE];
        if bit == pallas::Base::ONE {
            Some(true)
        } else if bit == pallas::Base::ZERO {
            Some(false)
        } else {
            None
        }
    }

    /// Whether rows 3..6 carry exactly these public inputs.
    pub fn matches_public_inputs(&self, public: &PublicInputs) -> bool {
        let Ok(root) = public.merkle_root_field() else {
            return false;
        };
        self.0[SIGNAL_MIN_BALANCE] == pallas::Base::from(public.min_balance)
            && self.0[SIGNAL_MAX_SWAP_AMOUNT] == pallas::Base::from(public.max_swap_amount)
            && self.0[SIGNAL_MERKLE_ROOT] == root
    }

    pub fn to_hex(&self) -> Vec<String> {
        self.0.iter().map(|v| hex::encode(field_to_bytes(*v))).collect()
    }

    pub fn from_hex(values: &[String]) -> Result<Self> {
        if values.len() != NUM_PUBLIC_SIGNALS {
            return Err(anyhow::anyhow!(
                "Expected {} public signals, got {}",
                NUM_PUBLIC_SIGNALS,
                values.len()
            ));
        }
        let mut out = [pallas::Base::ZERO; NUM_PUBLIC_SIGNALS];
        for (i, value) in values.iter().enumerate() {
            let bytes = decode_hex32(value)
                .with_context(|| format!("Invalid hex for public signal {i}"))?;
            out[i] = field_from_canonical_bytes(&bytes).ok_or_else(|| {
                anyhow::anyhow!("Public signal {i} is not a canonical field element")
            })?;
        }
        Ok(Self(out))
    }
}

/// Output signals of the eligibility predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityResult {
    pub is_eligible: bool,
    pub nullifier: NullifierHash,
    pub commitment: Commitment,
    pub public_signals: PublicSignals,
}

/// On-disk proof format exchanged between the `prover` and `verifier` binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofOutput {
    pub public_inputs: PublicInputs,
    /// Instance values as canonical little-endian hex, in row order.
    pub public_signals: Vec<String>,
    /// Raw IPA transcript bytes
    pub zkp_proof: Vec<u8>,
    pub nullifier: String,
    pub commitment: String,
    pub is_eligible: bool,
    pub mode: EligibilityMode,
    pub circuit_k: u32,
    /// Unix timestamp when proof was generated
    pub timestamp: u64,
}

impl ProofOutput {
    /// Validates with the default timestamp window.
    pub fn validate(&self) -> Result<PublicSignals> {
        self.validate_with(&SecurityConfig::default())
    }

    /// Validates the structure and cross-field consistency, returning the
    /// decoded public signals.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The proof bytes are empty
    /// - The timestamp is outside the configured window
    /// - A signal is not canonical hex
    /// - Nullifier, commitment, eligibility bit or public inputs disagree
    ///   with the signal vector
    pub fn validate_with(&self, security: &SecurityConfig) -> Result<PublicSignals> {
        debug!("Starting proof output validation");
        debug!("ZK proof size: {} bytes", self.zkp_proof.len());
        debug!("Timestamp: {}", self.timestamp);

        if self.zkp_proof.is_empty() {
            return Err(anyhow::anyhow!(
                "ZK proof cannot be empty. The proof data is missing."
            ));
        }

        let current_timestamp = unix_now()?;
        if self.timestamp > current_timestamp + security.timestamp_tolerance_secs {
            return Err(anyhow::anyhow!(
                "Timestamp is too far in the future: {} (current: {}, tolerance: {}s). Please check system clock and proof timestamp.",
                self.timestamp,
                current_timestamp,
                security.timestamp_tolerance_secs
            ));
        }
        if current_timestamp > self.timestamp + security.timestamp_max_age_secs {
            return Err(anyhow::anyhow!(
                "Timestamp is too old: {} (current: {}, max age: {}s). This proof may be expired. Please generate a fresh proof.",
                self.timestamp,
                current_timestamp,
                security.timestamp_max_age_secs
            ));
        }

        let signals = PublicSignals::from_hex(&self.public_signals)
            .context("Failed to decode public signals")?;

        let nullifier = NullifierHash::from_hex(&self.nullifier).context("Invalid nullifier hex")?;
        if nullifier != signals.nullifier() {
            return Err(anyhow::anyhow!(
                "Nullifier mismatch: signal[0] is {}, file says {}. This indicates corrupted or tampered proof data.",
                signals.nullifier(),
                nullifier
            ));
        }

        let commitment =
            Commitment::from_hex(&self.commitment).context("Invalid commitment hex")?;
        if commitment != signals.commitment() {
            return Err(anyhow::anyhow!(
                "Commitment mismatch: signal[1] is {}, file says {}",
                signals.commitment(),
                commitment
            ));
        }

        match signals.is_eligible() {
            Some(bit) if bit == self.is_eligible => {}
            Some(bit) => {
                return Err(anyhow::anyhow!(
                    "Eligibility mismatch: signal[2] is {}, file says {}",
                    bit,
                    self.is_eligible
                ))
            }
            None => return Err(anyhow::anyhow!("Eligibility signal is not boolean")),
        }

        if !signals.matches_public_inputs(&self.public_inputs) {
            return Err(anyhow::anyhow!(
                "Public signals do not match the declared public inputs"
            ));
        }

        Ok(signals)
    }
}
