//! Merkle commitments over ordered evidence lists.
//!
//! Leaves are hashed individually with SHA-256; internal nodes hash the
//! concatenation of their children's hex digests. A level with an odd node
//! count duplicates its last node as its own sibling. The empty list commits
//! to `sha256("empty")` so an evidence-free proof still has a defined root.

use serde::{Deserialize, Serialize};

use crate::crypto::canonical::sha256_hex;
use crate::error::{ServiceError, ServiceResult};

/// Which side a sibling hash sits on when folding toward the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiblingPosition {
    Left,
    Right,
}

/// One step of an inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofSibling {
    pub hash: String,
    pub position: SiblingPosition,
}

/// Inclusion proof for a single leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleProof {
    pub root: String,
    pub leaf: String,
    pub leaf_index: usize,
    pub siblings: Vec<ProofSibling>,
}

/// Compute the Merkle root of an ordered leaf list.
pub fn merkle_root(leaves: &[String]) -> String {
    if leaves.is_empty() {
        return sha256_hex(b"empty");
    }
    let mut level = hash_leaves(leaves);
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0].clone()
}

/// Generate an inclusion proof for `leaves[index]`.
pub fn generate_proof(leaves: &[String], index: usize) -> ServiceResult<MerkleProof> {
    if index >= leaves.len() {
        return Err(ServiceError::Validation(format!(
            "leaf index {} out of bounds for {} leaves",
            index,
            leaves.len()
        )));
    }

    let mut level = hash_leaves(leaves);
    let leaf = level[index].clone();
    let mut siblings = Vec::new();
    let mut idx = index;

    while level.len() > 1 {
        if idx % 2 == 0 {
            // Sibling on the right; the last node of an odd level pairs
            // with itself.
            let sibling = if idx + 1 < level.len() {
                level[idx + 1].clone()
            } else {
                level[idx].clone()
            };
            siblings.push(ProofSibling {
                hash: sibling,
                position: SiblingPosition::Right,
            });
        } else {
            siblings.push(ProofSibling {
                hash: level[idx - 1].clone(),
                position: SiblingPosition::Left,
            });
        }
        level = next_level(&level);
        idx /= 2;
    }

    Ok(MerkleProof {
        root: level[0].clone(),
        leaf,
        leaf_index: index,
        siblings,
    })
}

/// Recompute the root from a proof and compare against its claimed root.
pub fn verify_proof(proof: &MerkleProof) -> bool {
    let mut current = proof.leaf.clone();
    for sibling in &proof.siblings {
        current = match sibling.position {
            SiblingPosition::Right => combine(&current, &sibling.hash),
            SiblingPosition::Left => combine(&sibling.hash, &current),
        };
    }
    current == proof.root
}

fn hash_leaves(leaves: &[String]) -> Vec<String> {
    leaves.iter().map(|l| sha256_hex(l.as_bytes())).collect()
}

fn next_level(level: &[String]) -> Vec<String> {
    let mut next = Vec::with_capacity((level.len() + 1) / 2);
    for chunk in level.chunks(2) {
        let (left, right) = if chunk.len() == 2 {
            (&chunk[0], &chunk[1])
        } else {
            (&chunk[0], &chunk[0])
        };
        next.push(combine(left, right));
    }
    next
}

fn combine(left: &str, right: &str) -> String {
    sha256_hex(format!("{}{}", left, right).as_bytes())
}
