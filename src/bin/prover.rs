use anyhow::{Context, Result};
use clap::Parser;
use ethers::signers::LocalWallet;
use log::{debug, info};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use zkp_swap_eligibility::{
    config::Config,
    ports::MessageSigner,
    secrets::{self, merkle_leaf, purpose_message, KeyPurpose, SecretDerivation},
    types::{EligibilityMode, PrivateWitness, PublicInputs},
    utils::{decode_hex32, field_from_canonical_bytes, field_to_bytes, validate_and_strip_hex},
    EligibleSet, ProofEngine,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Generate a swap eligibility proof", long_about = None)]
struct Args {
    /// TOML file with the swap amounts and protocol bounds
    #[arg(short, long, required_unless_present = "print_leaf")]
    witness_file: Option<PathBuf>,

    #[arg(short, long)]
    private_key: String,

    /// Eligible-set leaves, one canonical hex field element per line
    #[arg(short, long)]
    eligible_set: Option<PathBuf>,

    /// Reuse the nonce of an earlier attempt
    #[arg(short, long)]
    nonce: Option<String>,

    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, value_parser = parse_mode)]
    mode: Option<EligibilityMode>,

    /// Print this wallet's eligible-set leaf and exit
    #[arg(long)]
    print_leaf: bool,
}

#[derive(Debug, Deserialize)]
struct WitnessFile {
    balance: u64,
    swap_amount: u64,
    #[serde(default = "default_flag")]
    eligibility_flag: u64,
    min_balance: u64,
    max_swap_amount: u64,
    merkle_root: Option<String>,
}

fn default_flag() -> u64 {
    1
}

fn parse_mode(value: &str) -> std::result::Result<EligibilityMode, String> {
    match value {
        "strict" => Ok(EligibilityMode::Strict),
        "soft" => Ok(EligibilityMode::Soft),
        other => Err(format!("unknown mode '{other}', expected 'strict' or 'soft'")),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from_file(path),
        None => Config::from_env(),
    }
}

fn load_eligible_set(path: &Path, max_size: u64) -> Result<EligibleSet> {
    let metadata = fs::metadata(path).context("Failed to read eligible set metadata")?;
    if metadata.len() > max_size {
        return Err(anyhow::anyhow!(
            "Eligible set file too large: {} bytes (max {} bytes)",
            metadata.len(),
            max_size
        ));
    }

    let content = fs::read_to_string(path).context("Failed to read eligible set file")?;
    let leaves = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(i, line)| {
            let bytes = decode_hex32(line).with_context(|| format!("Invalid leaf on line {}", i + 1))?;
            field_from_canonical_bytes(&bytes)
                .with_context(|| format!("Leaf on line {} is not a canonical field element", i + 1))
        })
        .collect::<Result<Vec<_>>>()?;

    EligibleSet::new(leaves).context("Failed to build eligible set")
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;
    if let Some(mode) = args.mode {
        config.proof.mode = mode;
    }

    validate_and_strip_hex(&args.private_key, 64).context("Invalid private key")?;
    let wallet: LocalWallet = args
        .private_key
        .parse()
        .context("Failed to parse private key")?;
    println!("Prover address: {}", wallet.identity());

    let derivation = SecretDerivation::from_config(&config.keys);
    let purpose = KeyPurpose::ProofSecret;
    let signature = wallet
        .sign(&purpose_message(&purpose))
        .await
        .context("Failed to sign key derivation message")?;
    let proof_key = derivation
        .derive_key(&signature, &purpose)
        .context("Failed to derive proof secret")?;

    if args.print_leaf {
        println!("{}", hex::encode(field_to_bytes(merkle_leaf(proof_key.as_bytes()))));
        return Ok(());
    }

    let witness_path = args
        .witness_file
        .as_deref()
        .context("--witness-file is required")?;
    let witness_content =
        fs::read_to_string(witness_path).context("Failed to read witness file")?;
    let witness_file: WitnessFile =
        toml::from_str(&witness_content).context("Failed to parse witness file")?;

    let merkle_root = match (&args.eligible_set, &witness_file.merkle_root) {
        (Some(path), _) => {
            let set = load_eligible_set(path, config.proof.max_file_size)?;
            if !set.contains_secret(proof_key.as_bytes()) {
                return Err(anyhow::anyhow!(
                    "Wallet {} is not in the eligible set {}. Run with --print-leaf to get its leaf.",
                    wallet.identity(),
                    path.display()
                ));
            }
            info!("Eligible set of {} leaves, depth {}", set.len(), set.depth());
            set.root_bytes()
        }
        (None, Some(root)) => decode_hex32(root).context("Invalid merkle_root in witness file")?,
        (None, None) => [0u8; 32],
    };

    let nonce = match &args.nonce {
        Some(hex) => decode_hex32(hex).context("Invalid nonce")?,
        None => secrets::nonce(),
    };

    let witness = PrivateWitness {
        balance: witness_file.balance,
        swap_amount: witness_file.swap_amount,
        secret_key: *proof_key.as_bytes(),
        nonce,
        eligibility_flag: witness_file.eligibility_flag,
    };
    drop(proof_key);
    let public = PublicInputs {
        min_balance: witness_file.min_balance,
        max_swap_amount: witness_file.max_swap_amount,
        merkle_root,
    };
    debug!("Public inputs: {:?}", public);

    println!("Generating proving keys (k={}, {:?} mode)...", config.proof.circuit_k, config.proof.mode);
    let engine = ProofEngine::setup(config.proof.circuit_k, config.proof.mode)
        .context("Failed to set up proof engine")?;

    println!("Generating ZK proof (this may take a while)...");
    let timeout = match config.proof.prove_timeout_secs {
        0 => None,
        secs => Some(std::time::Duration::from_secs(secs)),
    };
    let generated = engine
        .generate_async(witness, public, timeout)
        .await
        .context("Failed to create proof")?;
    println!("ZK proof generated, size: {} bytes", generated.proof.len());

    let output = engine
        .to_output(&generated, &public)
        .context("Failed to package proof")?;
    let output_path = args.output.unwrap_or_else(|| config.proof.output_file.clone());
    let json_output =
        serde_json::to_string_pretty(&output).context("Failed to serialize proof to JSON")?;
    fs::write(&output_path, json_output).context("Failed to write proof file")?;

    println!("Proof written to: {}", output_path.display());
    println!("Eligible: {}", output.is_eligible);
    println!("Nullifier: {}", output.nullifier);
    println!("Commitment: {}", output.commitment);
    println!("Nonce: {}", hex::encode(nonce));

    Ok(())
}
