//! Proof generation and verification for the eligibility circuit.
//!
//! [`ProofEngine`] owns the IPA parameters and the key pair for one
//! `(k, mode)` choice. Keys are immutable after [`ProofEngine::setup`] and held
//! behind `Arc`, so an engine clones cheaply and can be shared across tasks.

use crate::circuit::{evaluate, EligibilityCircuit};
use crate::config::SecurityConfig;
use crate::error::{SwapError, SwapResult};
use crate::types::{
    Commitment, EligibilityMode, NullifierHash, PrivateWitness, ProofOutput, PublicInputs,
    PublicSignals, HASH_SIZE, NUM_PUBLIC_SIGNALS,
};
use crate::utils::{field_from_uint256_be, field_to_uint256_be, unix_now};
use crate::{MAX_CIRCUIT_K, MIN_CIRCUIT_K};
use halo2_proofs::{
    plonk::{create_proof, keygen_pk, keygen_vk, verify_proof, ProvingKey, SingleVerifier, VerifyingKey},
    poly::commitment::Params,
    transcript::{Blake2bRead, Blake2bWrite, Challenge255},
};
use log::{debug, info, warn};
use pasta_curves::{pallas, vesta};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Opaque proof transcript. Immutable once generated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof(Vec<u8>);

impl Proof {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Proof({} bytes)", self.0.len())
    }
}

/// A proof together with the signals it was generated against.
#[derive(Debug, Clone)]
pub struct GeneratedProof {
    pub proof: Proof,
    pub public_signals: PublicSignals,
    pub nullifier: NullifierHash,
    pub commitment: Commitment,
    pub is_eligible: bool,
}

/// Proof and instances in the layout an EVM-style verifier contract reads.
///
/// Instances are big-endian uint256 words in signal order. Calldata is the
/// instance words followed by the raw transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractProof {
    pub proof: Vec<u8>,
    pub instances: Vec<[u8; HASH_SIZE]>,
}

impl ContractProof {
    pub fn calldata(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.instances.len() * HASH_SIZE + self.proof.len());
        for word in &self.instances {
            out.extend_from_slice(word);
        }
        out.extend_from_slice(&self.proof);
        out
    }

    pub fn from_calldata(calldata: &[u8]) -> SwapResult<Self> {
        let header = NUM_PUBLIC_SIGNALS * HASH_SIZE;
        if calldata.len() <= header {
            return Err(SwapError::InputValidation(format!(
                "calldata too short: {} bytes",
                calldata.len()
            )));
        }
        let instances = calldata[..header]
            .chunks_exact(HASH_SIZE)
            .map(|chunk| {
                let mut word = [0u8; HASH_SIZE];
                word.copy_from_slice(chunk);
                word
            })
            .collect();
        Ok(Self {
            proof: calldata[header..].to_vec(),
            instances,
        })
    }

    /// Decodes the instance words back into field elements.
    pub fn public_signals(&self) -> SwapResult<PublicSignals> {
        if self.instances.len() != NUM_PUBLIC_SIGNALS {
            return Err(SwapError::InputValidation(format!(
                "expected {} instance words, got {}",
                NUM_PUBLIC_SIGNALS,
                self.instances.len()
            )));
        }
        let mut values = [pallas::Base::from(0); NUM_PUBLIC_SIGNALS];
        for (i, word) in self.instances.iter().enumerate() {
            values[i] = field_from_uint256_be(word).ok_or_else(|| {
                SwapError::InputValidation(format!("instance word {i} exceeds the field modulus"))
            })?;
        }
        Ok(PublicSignals(values))
    }

    pub fn proof(&self) -> Proof {
        Proof::from_bytes(self.proof.clone())
    }
}

#[derive(Clone)]
pub struct ProofEngine {
    params: Arc<Params<vesta::Affine>>,
    vk: Arc<VerifyingKey<vesta::Affine>>,
    pk: Arc<ProvingKey<vesta::Affine>>,
    k: u32,
    mode: EligibilityMode,
}

impl fmt::Debug for ProofEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofEngine")
            .field("k", &self.k)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl ProofEngine {
    /// Generates IPA parameters for `2^k` rows and the key pair for `mode`.
    pub fn setup(k: u32, mode: EligibilityMode) -> SwapResult<Self> {
        if !(MIN_CIRCUIT_K..=MAX_CIRCUIT_K).contains(&k) {
            return Err(SwapError::Config(format!(
                "circuit k must be between {MIN_CIRCUIT_K} and {MAX_CIRCUIT_K}, got {k}"
            )));
        }

        let started = Instant::now();
        let params = Params::<vesta::Affine>::new(k);
        let circuit = EligibilityCircuit::blank(mode);
        let vk = keygen_vk(&params, &circuit)
            .map_err(|e| SwapError::ProofGeneration(format!("verifying key generation failed: {e:?}")))?;
        let pk = keygen_pk(&params, vk.clone(), &circuit)
            .map_err(|e| SwapError::ProofGeneration(format!("proving key generation failed: {e:?}")))?;
        info!(
            "Generated {:?} mode keys for k={} in {:?}",
            mode,
            k,
            started.elapsed()
        );

        Ok(Self {
            params: Arc::new(params),
            vk: Arc::new(vk),
            pk: Arc::new(pk),
            k,
            mode,
        })
    }

    pub fn k(&self) -> u32 {
        self.k
    }

    pub fn mode(&self) -> EligibilityMode {
        self.mode
    }

    /// Proves eligibility of `witness` against `public`.
    ///
    /// # Errors
    /// `InputValidation` for malformed inputs, `ProofGeneration` when the
    /// witness is unsatisfiable in this engine's mode or the prover fails.
    pub fn generate(
        &self,
        witness: &PrivateWitness,
        public: &PublicInputs,
    ) -> SwapResult<GeneratedProof> {
        witness.validate()?;
        public.validate()?;

        let result = evaluate(witness, public)?;
        if self.mode == EligibilityMode::Strict && !result.is_eligible {
            return Err(SwapError::ProofGeneration(
                "witness does not satisfy the eligibility predicate".into(),
            ));
        }

        let started = Instant::now();
        let circuit = EligibilityCircuit::new(witness.clone(), *public, self.mode);
        let mut transcript = Blake2bWrite::<_, vesta::Affine, Challenge255<_>>::init(vec![]);
        let instances: &[&[&[pallas::Base]]] = &[&[result.public_signals.as_slice()]];
        create_proof(
            &self.params,
            &self.pk,
            &[circuit],
            instances,
            OsRng,
            &mut transcript,
        )
        .map_err(|e| SwapError::ProofGeneration(format!("prover failed: {e:?}")))?;
        let proof = Proof::from_bytes(transcript.finalize());

        debug!(
            "Generated {} byte proof in {:?} (eligible: {})",
            proof.len(),
            started.elapsed(),
            result.is_eligible
        );

        Ok(GeneratedProof {
            proof,
            public_signals: result.public_signals,
            nullifier: result.nullifier,
            commitment: result.commitment,
            is_eligible: result.is_eligible,
        })
    }

    /// Runs [`Self::generate`] on the blocking pool.
    ///
    /// When `timeout` elapses the result is discarded and `ProofGeneration`
    /// is returned. The prover thread finishes in the background.
    pub async fn generate_async(
        &self,
        witness: PrivateWitness,
        public: PublicInputs,
        timeout: Option<Duration>,
    ) -> SwapResult<GeneratedProof> {
        let engine = self.clone();
        let task = tokio::task::spawn_blocking(move || engine.generate(&witness, &public));

        let joined = match timeout {
            Some(limit) => tokio::time::timeout(limit, task).await.map_err(|_| {
                warn!("Proof generation exceeded {:?}", limit);
                SwapError::ProofGeneration(format!("proving timed out after {limit:?}"))
            })?,
            None => task.await,
        };

        joined.map_err(|e| SwapError::ProofGeneration(format!("proving task failed: {e}")))?
    }

    /// Checks `proof` against `signals`. Never panics; any malformed or
    /// tampered input yields `false`.
    pub fn verify(&self, proof: &Proof, signals: &PublicSignals) -> bool {
        if proof.is_empty() {
            return false;
        }
        let strategy = SingleVerifier::new(&self.params);
        let mut transcript =
            Blake2bRead::<_, vesta::Affine, Challenge255<_>>::init(proof.as_bytes());
        let instances: &[&[&[pallas::Base]]] = &[&[signals.as_slice()]];

        let result = verify_proof(&self.params, &self.vk, strategy, instances, &mut transcript);
        if let Err(e) = &result {
            debug!("Proof rejected: {:?}", e);
        }
        result.is_ok()
    }

    /// Converts a proof into the byte layout an on-chain verifier expects.
    pub fn format_for_on_chain_verifier(proof: &Proof, signals: &PublicSignals) -> ContractProof {
        ContractProof {
            proof: proof.as_bytes().to_vec(),
            instances: signals.as_slice().iter().map(|v| field_to_uint256_be(*v)).collect(),
        }
    }

    /// Packages a generated proof into the on-disk exchange format.
    pub fn to_output(
        &self,
        generated: &GeneratedProof,
        public: &PublicInputs,
    ) -> SwapResult<ProofOutput> {
        let timestamp = unix_now().map_err(|e| SwapError::Config(e.to_string()))?;
        Ok(ProofOutput {
            public_inputs: *public,
            public_signals: generated.public_signals.to_hex(),
            zkp_proof: generated.proof.as_bytes().to_vec(),
            nullifier: generated.nullifier.to_hex(),
            commitment: generated.commitment.to_hex(),
            is_eligible: generated.is_eligible,
            mode: self.mode,
            circuit_k: self.k,
            timestamp,
        })
    }

    /// Validates a proof file and verifies its proof with this engine.
    pub fn verify_output(
        &self,
        output: &ProofOutput,
        security: &SecurityConfig,
    ) -> anyhow::Result<PublicSignals> {
        if output.mode != self.mode || output.circuit_k != self.k {
            return Err(anyhow::anyhow!(
                "Proof was generated for {:?} mode with k={}, verifier uses {:?} mode with k={}",
                output.mode,
                output.circuit_k,
                self.mode,
                self.k
            ));
        }
        let signals = output.validate_with(security)?;
        let proof = Proof::from_bytes(output.zkp_proof.clone());
        if !self.verify(&proof, &signals) {
            return Err(anyhow::anyhow!("Proof verification failed"));
        }
        Ok(signals)
    }
}
