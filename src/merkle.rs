//! Eligible-set Merkle tree.
//!
//! A binary Poseidon tree over the Pallas base field. Its root is the
//! `merkleRoot` public input of the eligibility circuit. Odd levels are padded
//! with [`EMPTY_LEAF`], so every node on a path has a sibling.

use crate::error::{SwapError, SwapResult};
use crate::secrets::merkle_leaf;
use crate::types::HASH_SIZE;
use crate::utils::{field_to_bytes, poseidon_hash};
use pasta_curves::group::ff::Field;
use pasta_curves::pallas;
use std::fmt;

/// Padding value for unpaired nodes.
pub const EMPTY_LEAF: pallas::Base = pallas::Base::ZERO;

/// Inclusion proof of one leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipPath {
    pub leaf: pallas::Base,
    pub root: pallas::Base,
    pub siblings: Vec<pallas::Base>,
    pub index: usize,
}

impl MembershipPath {
    /// Recomputes the root from the leaf and siblings.
    pub fn verify(&self) -> bool {
        let mut current = self.leaf;
        let mut index = self.index;

        for sibling in &self.siblings {
            current = if index % 2 == 0 {
                poseidon_hash(current, *sibling)
            } else {
                poseidon_hash(*sibling, current)
            };
            index /= 2;
        }

        index == 0 && current == self.root
    }
}

impl fmt::Display for MembershipPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MembershipPath:\n  Leaf: {}\n  Root: {}\n  Index: {}\n  Siblings: {}",
            hex::encode(field_to_bytes(self.leaf)),
            hex::encode(field_to_bytes(self.root)),
            self.index,
            self.siblings.len()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibleSet {
    /// `levels[0]` holds the leaves, the last level holds the root alone.
    levels: Vec<Vec<pallas::Base>>,
    len: usize,
}

impl EligibleSet {
    /// Builds the tree over `leaves`.
    ///
    /// # Errors
    /// `InputValidation` when `leaves` is empty.
    pub fn new(leaves: Vec<pallas::Base>) -> SwapResult<Self> {
        if leaves.is_empty() {
            return Err(SwapError::InputValidation(
                "eligible set must contain at least one leaf".into(),
            ));
        }

        let len = leaves.len();
        let mut levels = vec![leaves];
        while let Some(level) = levels.last() {
            if level.len() == 1 {
                break;
            }
            let next = level
                .chunks(2)
                .map(|pair| poseidon_hash(pair[0], pair.get(1).copied().unwrap_or(EMPTY_LEAF)))
                .collect();
            levels.push(next);
        }

        Ok(Self { levels, len })
    }

    /// Builds the set from the participants' proof secrets.
    pub fn from_secret_keys(secret_keys: &[[u8; HASH_SIZE]]) -> SwapResult<Self> {
        Self::new(secret_keys.iter().map(merkle_leaf).collect())
    }

    pub fn root(&self) -> pallas::Base {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or(EMPTY_LEAF)
    }

    /// Canonical encoding of the root, as carried in `PublicInputs`.
    pub fn root_bytes(&self) -> [u8; HASH_SIZE] {
        field_to_bytes(self.root())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn position(&self, leaf: &pallas::Base) -> Option<usize> {
        self.levels[0].iter().position(|l| l == leaf)
    }

    pub fn contains_secret(&self, secret_key: &[u8; HASH_SIZE]) -> bool {
        self.position(&merkle_leaf(secret_key)).is_some()
    }

    /// Inclusion path of the leaf at `index`, or `None` when out of range.
    pub fn path(&self, index: usize) -> Option<MembershipPath> {
        let leaf = *self.levels[0].get(index)?;
        let mut siblings = Vec::with_capacity(self.depth());
        let mut position = index;

        for level in &self.levels[..self.depth()] {
            let sibling = level.get(position ^ 1).copied().unwrap_or(EMPTY_LEAF);
            siblings.push(sibling);
            position /= 2;
        }

        Some(MembershipPath {
            leaf,
            root: self.root(),
            siblings,
            index,
        })
    }
}
