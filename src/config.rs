//! Configuration file support.
//!
//! Every section has defaults, so an empty TOML file is a valid configuration.
//! The `[protocol]` section has none: it carries the network's agreed bounds
//! and must be present wherever proofs are accepted.

use crate::types::{EligibilityMode, PublicInputs};
use crate::utils::decode_hex32;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_CIRCUIT_K: u32 = 10;
const DEFAULT_MAX_PROOF_FILE_SIZE: u64 = 1024 * 1024;
const DEFAULT_MAX_ZK_PROOF_SIZE: usize = 512 * 1024;
const DEFAULT_PROVE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_KDF_ITERATIONS: u32 = 100_000;
const DEFAULT_KDF_SALT: &str = "zkp-swap-eligibility/kdf-salt/v1";
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;
const DEFAULT_TIMESTAMP_TOLERANCE_SECS: u64 = 300;
const DEFAULT_TIMESTAMP_MAX_AGE_SECS: u64 = 86400;

/// Environment variable naming the configuration file used by the binaries.
pub const CONFIG_ENV_VAR: &str = "ZKP_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub proof: ProofConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<ProtocolConfig>,
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofConfig {
    #[serde(default = "default_circuit_k")]
    pub circuit_k: u32,
    #[serde(default)]
    pub mode: EligibilityMode,
    #[serde(default = "default_max_proof_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_max_zk_proof_size")]
    pub max_zk_proof_size: usize,
    #[serde(default = "default_proof_output_file")]
    pub output_file: PathBuf,
    /// Upper bound on a single proving run; `0` disables the bound.
    #[serde(default = "default_prove_timeout_secs")]
    pub prove_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    #[serde(default = "default_kdf_iterations")]
    pub iterations: u32,
    #[serde(default = "default_kdf_salt")]
    pub salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Public inputs every accepted proof must carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub min_balance: u64,
    pub max_swap_amount: u64,
    /// Canonical little-endian hex of the eligible-set root; zero when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merkle_root: Option<String>,
}

impl ProtocolConfig {
    pub fn public_inputs(&self) -> Result<PublicInputs> {
        let merkle_root = match &self.merkle_root {
            Some(root) => decode_hex32(root).context("Invalid protocol.merkle_root")?,
            None => [0u8; 32],
        };
        let public = PublicInputs {
            min_balance: self.min_balance,
            max_swap_amount: self.max_swap_amount,
            merkle_root,
        };
        public.validate().context("Invalid [protocol] section")?;
        Ok(public)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_timestamp_tolerance_secs")]
    pub timestamp_tolerance_secs: u64,
    #[serde(default = "default_timestamp_max_age_secs")]
    pub timestamp_max_age_secs: u64,
}

impl Default for ProofConfig {
    fn default() -> Self {
        Self {
            circuit_k: DEFAULT_CIRCUIT_K,
            mode: EligibilityMode::default(),
            max_file_size: DEFAULT_MAX_PROOF_FILE_SIZE,
            max_zk_proof_size: DEFAULT_MAX_ZK_PROOF_SIZE,
            output_file: default_proof_output_file(),
            prove_timeout_secs: DEFAULT_PROVE_TIMEOUT_SECS,
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_KDF_ITERATIONS,
            salt: default_kdf_salt(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            dir: default_ledger_dir(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            timestamp_tolerance_secs: DEFAULT_TIMESTAMP_TOLERANCE_SECS,
            timestamp_max_age_secs: DEFAULT_TIMESTAMP_MAX_AGE_SECS,
        }
    }
}

fn default_circuit_k() -> u32 {
    DEFAULT_CIRCUIT_K
}

fn default_max_proof_file_size() -> u64 {
    DEFAULT_MAX_PROOF_FILE_SIZE
}

fn default_max_zk_proof_size() -> usize {
    DEFAULT_MAX_ZK_PROOF_SIZE
}

fn default_proof_output_file() -> PathBuf {
    PathBuf::from("proof.json")
}

fn default_prove_timeout_secs() -> u64 {
    DEFAULT_PROVE_TIMEOUT_SECS
}

fn default_kdf_iterations() -> u32 {
    DEFAULT_KDF_ITERATIONS
}

fn default_kdf_salt() -> String {
    DEFAULT_KDF_SALT.to_string()
}

fn default_ledger_dir() -> PathBuf {
    PathBuf::from(".nullifiers")
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

fn default_timestamp_tolerance_secs() -> u64 {
    DEFAULT_TIMESTAMP_TOLERANCE_SECS
}

fn default_timestamp_max_age_secs() -> u64 {
    DEFAULT_TIMESTAMP_MAX_AGE_SECS
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Loads the file named by `ZKP_CONFIG`, or the defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => Self::load_from_file(Path::new(&path)),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(crate::MIN_CIRCUIT_K..=crate::MAX_CIRCUIT_K).contains(&self.proof.circuit_k) {
            return Err(anyhow::anyhow!(
                "circuit_k must be between {} and {}, got {}",
                crate::MIN_CIRCUIT_K,
                crate::MAX_CIRCUIT_K,
                self.proof.circuit_k
            ));
        }
        if self.keys.iterations == 0 {
            return Err(anyhow::anyhow!("keys.iterations must be at least 1"));
        }
        if self.keys.salt.is_empty() {
            return Err(anyhow::anyhow!("keys.salt cannot be empty"));
        }
        if let Some(protocol) = &self.protocol {
            protocol.public_inputs()?;
        }
        Ok(())
    }
}
