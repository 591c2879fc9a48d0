use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info};
use std::fs;
use std::path::{Path, PathBuf};
use zkp_swap_eligibility::{
    config::Config,
    error::LedgerError,
    ledger::{DirNullifierLedger, NullifierLedger},
    types::ProofOutput,
    ProofEngine,
};

const VERIFIER_IDENTITY: &str = "verifier-cli";

#[derive(Parser, Debug)]
#[command(author, version, about = "Verify a swap eligibility proof and consume its nullifier", long_about = None)]
struct Args {
    #[arg(short, long)]
    proof_file: PathBuf,

    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `[ledger] dir`
    #[arg(short, long)]
    ledger_dir: Option<PathBuf>,

    /// Verify only, without consuming the nullifier
    #[arg(long)]
    dry_run: bool,

    /// Print the on-chain calldata (instances || proof) as hex
    #[arg(long)]
    calldata: bool,
}

fn load_proof(path: &Path, config: &Config) -> Result<ProofOutput> {
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "Proof file does not exist: {}",
            path.display()
        ));
    }

    let metadata = fs::metadata(path).context("Failed to read proof file metadata")?;
    debug!("Proof file size: {} bytes", metadata.len());
    if metadata.len() > config.proof.max_file_size {
        return Err(anyhow::anyhow!(
            "Proof file too large: {} bytes (max {} bytes). This may indicate a corrupted or invalid proof file. Raise [proof] max_file_size if the file is expected.",
            metadata.len(),
            config.proof.max_file_size
        ));
    }

    let content = fs::read_to_string(path).context("Failed to read proof file")?;
    let proof: ProofOutput =
        serde_json::from_str(&content).context("Failed to parse proof JSON")?;

    if proof.zkp_proof.len() > config.proof.max_zk_proof_size {
        return Err(anyhow::anyhow!(
            "ZK proof size exceeds limit: {} bytes (max {} bytes). Verify circuit_k matches between prover and verifier (current: {}).",
            proof.zkp_proof.len(),
            config.proof.max_zk_proof_size,
            config.proof.circuit_k
        ));
    }
    Ok(proof)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::from_env()?,
    };
    let protocol = config
        .protocol
        .as_ref()
        .context("Missing [protocol] section: the verifier needs the agreed min_balance and max_swap_amount")?
        .public_inputs()?;

    info!("Loading proof from: {}", args.proof_file.display());
    let proof = load_proof(&args.proof_file, &config)?;

    println!("Proof details:");
    println!("  Nullifier: {}", proof.nullifier);
    println!("  Commitment: {}", proof.commitment);
    println!("  Eligible: {}", proof.is_eligible);
    println!("  Mode: {:?}, k={}", proof.mode, proof.circuit_k);
    println!("  Min balance: {}", proof.public_inputs.min_balance);
    println!("  Max swap amount: {}", proof.public_inputs.max_swap_amount);
    println!("  Merkle root: {}", hex::encode(proof.public_inputs.merkle_root));
    println!("  Timestamp: {}", proof.timestamp);
    println!("  ZK Proof Size: {} bytes", proof.zkp_proof.len());

    println!("Generating verification keys...");
    let engine = ProofEngine::setup(config.proof.circuit_k, config.proof.mode)
        .context("Failed to set up proof engine")?;

    let signals = match engine.verify_output(&proof, &config.security) {
        Ok(signals) => signals,
        Err(e) => {
            error!("Proof verification FAILED: {e:#}");
            println!("\n✗ Proof verification FAILED!");
            return Err(e);
        }
    };
    if !signals.matches_public_inputs(&protocol) {
        error!(
            "Proof was generated against min_balance={} max_swap_amount={}, expected {} and {}",
            proof.public_inputs.min_balance,
            proof.public_inputs.max_swap_amount,
            protocol.min_balance,
            protocol.max_swap_amount
        );
        println!("\n✗ Proof public inputs do not match the [protocol] section!");
        return Err(anyhow::anyhow!("Public inputs do not match the protocol parameters"));
    }
    info!("Proof verification PASSED");
    println!("\n✓ Proof verification PASSED!");

    if args.calldata {
        let contract = ProofEngine::format_for_on_chain_verifier(
            &zkp_swap_eligibility::Proof::from_bytes(proof.zkp_proof.clone()),
            &signals,
        );
        println!("Calldata: 0x{}", hex::encode(contract.calldata()));
    }

    if !proof.is_eligible {
        println!("The proof attests that the swap is NOT eligible. No nullifier is consumed.");
        return Err(anyhow::anyhow!("Swap is not eligible"));
    }

    if args.dry_run {
        println!("Dry run: nullifier not consumed.");
        return Ok(());
    }

    let ledger_dir = args.ledger_dir.unwrap_or_else(|| config.ledger.dir.clone());
    let ledger = DirNullifierLedger::open(&ledger_dir)
        .await
        .with_context(|| format!("Failed to open nullifier ledger at {}", ledger_dir.display()))?;

    match ledger.consume(signals.nullifier(), VERIFIER_IDENTITY).await {
        Ok(record) => {
            info!("Nullifier recorded to: {}", ledger_dir.display());
            println!("\nNullifier consumed at {} and recorded to: {}", record.consumed_at, ledger_dir.display());
            Ok(())
        }
        Err(LedgerError::AlreadyConsumed(nullifier)) => {
            error!("Replay detected for nullifier {nullifier}");
            println!("\n✗ This swap secret was already used.");
            Err(anyhow::anyhow!("Nullifier already consumed: {nullifier}"))
        }
        Err(e) => Err(e).context("Failed to record nullifier"),
    }
}
