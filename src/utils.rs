//! Field encodings, Poseidon helpers and hex validation.
//!
//! Every native hash in the crate goes through [`poseidon_hash`] or
//! [`poseidon_hash3`]. The circuit instantiates the same `P128Pow5T3` spec with
//! the same width and rate, so native and in-circuit values are bit-identical.

use anyhow::Result;
use halo2_gadgets::poseidon::primitives::{
    self as poseidon, ConstantLength, P128Pow5T3 as PoseidonSpec,
};
use pasta_curves::group::ff::{Field, PrimeField};
use pasta_curves::pallas;

fn is_valid_hex_string(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_hexdigit())
}

fn strip_hex_prefix(input: &str) -> &str {
    input
        .trim()
        .strip_prefix("0x")
        .or_else(|| input.trim().strip_prefix("0X"))
        .unwrap_or_else(|| input.trim())
}

/// Validates and strips hex prefix from a string.
///
/// # Errors
/// Returns an error if:
/// - The hex string has incorrect length
/// - The hex string contains non-hex characters
///
/// # Examples
///
/// ```
/// use zkp_swap_eligibility::utils::validate_and_strip_hex;
///
/// let result = validate_and_strip_hex("0x1234abcd", 8).unwrap();
/// assert_eq!(result, "1234abcd");
/// ```
pub fn validate_and_strip_hex(input: &str, expected_len: usize) -> Result<String> {
    let stripped = strip_hex_prefix(input);

    if stripped.len() != expected_len {
        return Err(anyhow::anyhow!(
            "Invalid hex string: must be {} characters (got {})",
            expected_len,
            stripped.len()
        ));
    }

    if !is_valid_hex_string(stripped) {
        return Err(anyhow::anyhow!(
            "Invalid hex string: contains non-hex characters"
        ));
    }

    Ok(stripped.to_string())
}

/// Decodes a 32-byte hex string (with or without `0x`).
pub fn decode_hex32(input: &str) -> Result<[u8; 32]> {
    let stripped = validate_and_strip_hex(input, 64)?;
    let bytes = hex::decode(stripped)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

const BASE_U64: u64 = 256;

/// Maps arbitrary 32 bytes into the Pallas base field.
///
/// The input is read as a big-endian base-256 number and reduced modulo the
/// field order. Used for secret material (keys, nonces) where any 32 bytes are
/// acceptable. The mapping is not injective above the modulus.
#[inline]
#[must_use]
pub fn bytes_to_field(bytes: &[u8; 32]) -> pallas::Base {
    let mut value = pallas::Base::ZERO;
    let base = pallas::Base::from(BASE_U64);

    for &byte in bytes.iter() {
        value = value * base + pallas::Base::from(byte as u64);
    }

    value
}

/// Canonical little-endian encoding of a field element.
#[inline]
#[must_use]
pub fn field_to_bytes(field: pallas::Base) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    let repr = field.to_repr();
    bytes.copy_from_slice(repr.as_ref());
    bytes
}

/// Inverse of [`field_to_bytes`]. Returns `None` for non-canonical encodings.
#[must_use]
pub fn field_from_canonical_bytes(bytes: &[u8; 32]) -> Option<pallas::Base> {
    Option::from(pallas::Base::from_repr(*bytes))
}

/// Big-endian uint256 word of a field element, as EVM-style verifiers read
/// public inputs.
#[must_use]
pub fn field_to_uint256_be(field: pallas::Base) -> [u8; 32] {
    let mut bytes = field_to_bytes(field);
    bytes.reverse();
    bytes
}

/// Inverse of [`field_to_uint256_be`].
#[must_use]
pub fn field_from_uint256_be(word: &[u8; 32]) -> Option<pallas::Base> {
    let mut le = *word;
    le.reverse();
    field_from_canonical_bytes(&le)
}

/// Poseidon hash of two field elements (`P128Pow5T3`, width 3, rate 2).
///
/// # Example
///
/// ```
/// use zkp_swap_eligibility::utils::poseidon_hash;
/// use pasta_curves::pallas;
///
/// let hash = poseidon_hash(pallas::Base::from(1), pallas::Base::from(2));
/// assert_ne!(hash, pallas::Base::from(0));
/// ```
#[inline]
#[must_use]
pub fn poseidon_hash(left: pallas::Base, right: pallas::Base) -> pallas::Base {
    poseidon::Hash::<_, PoseidonSpec, ConstantLength<2>, 3, 2>::init().hash([left, right])
}

/// Poseidon hash of three field elements, absorbed as a constant-length message.
#[inline]
#[must_use]
pub fn poseidon_hash3(a: pallas::Base, b: pallas::Base, c: pallas::Base) -> pallas::Base {
    poseidon::Hash::<_, PoseidonSpec, ConstantLength<3>, 3, 2>::init().hash([a, b, c])
}

/// Current unix time in seconds.
pub fn unix_now() -> Result<u64> {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| anyhow::anyhow!("System clock unavailable: {}", e))
}
