use halo2_proofs::dev::MockProver;
use pasta_curves::pallas;
use zkp_swap_eligibility::{
    circuit::{evaluate, EligibilityCircuit},
    secrets,
    types::{EligibilityMode, PrivateWitness, PublicInputs, PublicSignals},
    utils::field_to_uint256_be,
    ProofEngine, SwapError, CIRCUIT_K,
};

fn witness(balance: u64, swap_amount: u64) -> PrivateWitness {
    PrivateWitness {
        balance,
        swap_amount,
        secret_key: [7u8; 32],
        nonce: [9u8; 32],
        eligibility_flag: 1,
    }
}

fn public() -> PublicInputs {
    PublicInputs {
        min_balance: 50,
        max_swap_amount: 60,
        merkle_root: [0u8; 32],
    }
}

fn mock(witness: &PrivateWitness, public: &PublicInputs, mode: EligibilityMode, signals: &PublicSignals) -> bool {
    let circuit = EligibilityCircuit::new(witness.clone(), *public, mode);
    let prover = MockProver::run(CIRCUIT_K, &circuit, vec![signals.as_slice().to_vec()])
        .expect("mock prover should run");
    prover.verify().is_ok()
}

#[test]
fn test_circuit_proof_generation() {
    let engine = ProofEngine::setup(CIRCUIT_K, EligibilityMode::Strict).unwrap();
    let witness = witness(100, 40);
    let generated = engine.generate(&witness, &public()).unwrap();

    assert!(generated.is_eligible);
    assert!(engine.verify(&generated.proof, &generated.public_signals));
    assert_eq!(
        generated.nullifier,
        secrets::nullifier(&witness.secret_key, &witness.nonce)
    );
}

#[test]
fn test_native_evaluation_matches_circuit() {
    let witness = witness(100, 40);
    let result = evaluate(&witness, &public()).unwrap();
    for mode in [EligibilityMode::Strict, EligibilityMode::Soft] {
        assert!(mock(&witness, &public(), mode, &result.public_signals));
    }
}

#[test]
fn test_amount_bound_violation_by_mode() {
    let witness = witness(100, 70);
    let result = evaluate(&witness, &public()).unwrap();
    assert!(!result.is_eligible);
    assert!(result.nullifier.is_sentinel());
    assert!(result.commitment.is_sentinel());

    assert!(!mock(&witness, &public(), EligibilityMode::Strict, &result.public_signals));
    assert!(mock(&witness, &public(), EligibilityMode::Soft, &result.public_signals));

    let strict = ProofEngine::setup(CIRCUIT_K, EligibilityMode::Strict).unwrap();
    assert!(matches!(
        strict.generate(&witness, &public()),
        Err(SwapError::ProofGeneration(_))
    ));
}

#[test]
fn test_soft_mode_cannot_claim_eligibility() {
    let witness = witness(100, 70);
    let honest = witness_signals(&witness);
    let mut forged = honest.0;
    forged[2] = pallas::Base::from(1u64);
    assert!(!mock(&witness, &public(), EligibilityMode::Soft, &PublicSignals(forged)));
}

fn witness_signals(witness: &PrivateWitness) -> PublicSignals {
    evaluate(witness, &public()).unwrap().public_signals
}

#[test]
fn test_signals_fit_uint256_words() {
    let signals = witness_signals(&witness(100, 40));
    let contract = ProofEngine::format_for_on_chain_verifier(
        &zkp_swap_eligibility::Proof::from_bytes(vec![1, 2, 3]),
        &signals,
    );
    assert_eq!(contract.instances.len(), 6);
    assert_eq!(contract.instances[0], field_to_uint256_be(signals.0[0]));
    assert_eq!(contract.public_signals().unwrap(), signals);
}
