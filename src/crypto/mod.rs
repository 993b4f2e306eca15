//! Cryptographic primitives for the reputation service
//!
//! Provides the deterministic foundations every other component builds on:
//! - Canonical JSON encoding and content addressing (`cid_` identifiers)
//! - Ed25519 signing/verification over canonical bytes (PEM keys, base64
//!   signatures)
//! - Merkle commitments with inclusion proofs over ordered evidence lists

pub mod canonical;
pub mod merkle;
pub mod signing;

pub use canonical::{canonical_bytes, content_id, sha256_hex};
pub use merkle::{generate_proof, merkle_root, verify_proof, MerkleProof, ProofSibling, SiblingPosition};
pub use signing::{
    generate_key_pair, issuer_id, sign, sign_object, verify, verify_object, InstanceIdentity,
    KeyPair,
};
