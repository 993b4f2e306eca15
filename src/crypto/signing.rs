//! Ed25519 signing and verification over canonical bytes.
//!
//! Keys travel as PEM text (PKCS#8 / SPKI), signatures as base64. `verify`
//! treats any decoding or length mismatch as a failed verification rather
//! than an error, so callers can never be poisoned by attacker-shaped input.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey,
};
use pkcs8::LineEnding;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;

use crate::crypto::canonical::{canonical_bytes, sha256_hex};
use crate::error::{ServiceError, ServiceResult};

/// A freshly generated Ed25519 key pair in PEM form.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: String,
}

/// Generate a new Ed25519 key pair.
pub fn generate_key_pair() -> ServiceResult<KeyPair> {
    let mut secret = [0u8; 32];
    OsRng.fill_bytes(&mut secret);
    let signing = SigningKey::from_bytes(&secret);

    let private_key = signing
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| ServiceError::Internal(format!("private key encoding failed: {}", e)))?
        .to_string();
    let public_key = signing
        .verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| ServiceError::Internal(format!("public key encoding failed: {}", e)))?;

    Ok(KeyPair {
        public_key,
        private_key,
    })
}

/// Sign raw bytes with a PEM private key; returns a base64 signature.
pub fn sign(bytes: &[u8], private_key_pem: &str) -> ServiceResult<String> {
    let key = SigningKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| ServiceError::Internal(format!("invalid private key: {}", e)))?;
    Ok(BASE64.encode(key.sign(bytes).to_bytes()))
}

/// Verify a base64 signature over raw bytes with a PEM public key.
///
/// Returns `false` for malformed keys or signatures, never an error.
pub fn verify(bytes: &[u8], signature_b64: &str, public_key_pem: &str) -> bool {
    let key = match VerifyingKey::from_public_key_pem(public_key_pem) {
        Ok(key) => key,
        Err(_) => return false,
    };
    let decoded = match BASE64.decode(signature_b64) {
        Ok(decoded) => decoded,
        Err(_) => return false,
    };
    let sig_bytes: [u8; 64] = match decoded.try_into() {
        Ok(sig_bytes) => sig_bytes,
        Err(_) => return false,
    };
    key.verify(bytes, &Signature::from_bytes(&sig_bytes)).is_ok()
}

/// Sign a record's canonical encoding.
pub fn sign_object<T: Serialize>(record: &T, private_key_pem: &str) -> ServiceResult<String> {
    sign(&canonical_bytes(record)?, private_key_pem)
}

/// Verify a signature over a record's canonical encoding.
pub fn verify_object<T: Serialize>(record: &T, signature_b64: &str, public_key_pem: &str) -> bool {
    match canonical_bytes(record) {
        Ok(bytes) => verify(&bytes, signature_b64, public_key_pem),
        Err(_) => false,
    }
}

/// The process-scoped signing identity, generated at boot.
///
/// Single-instance deployment is a policy, not an ambient: the identity is
/// constructed once and threaded through the components that sign.
pub struct InstanceIdentity {
    issuer: String,
    key_pair: KeyPair,
}

impl InstanceIdentity {
    /// Generate a fresh identity with an issuer id derived from the key.
    pub fn generate() -> ServiceResult<Self> {
        let key_pair = generate_key_pair()?;
        let issuer = issuer_id(&key_pair.public_key);
        Ok(Self { issuer, key_pair })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn public_key_pem(&self) -> &str {
        &self.key_pair.public_key
    }

    /// Sign a record with the instance key.
    pub fn sign_object<T: Serialize>(&self, record: &T) -> ServiceResult<String> {
        sign_object(record, &self.key_pair.private_key)
    }
}

/// Derive a stable issuer id from a PEM public key.
pub fn issuer_id(public_key_pem: &str) -> String {
    format!(
        "issuer_{}",
        &sha256_hex(public_key_pem.trim().as_bytes())[..16]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sign_verify_round_trip() {
        let pair = generate_key_pair().unwrap();
        let sig = sign(b"payload", &pair.private_key).unwrap();
        assert!(verify(b"payload", &sig, &pair.public_key));
    }

    #[test]
    fn test_bit_flip_breaks_verification() {
        let pair = generate_key_pair().unwrap();
        let sig = sign(b"payload", &pair.private_key).unwrap();
        assert!(!verify(b"payloae", &sig, &pair.public_key));

        let mut raw = BASE64.decode(&sig).unwrap();
        raw[0] ^= 0x01;
        let tampered = BASE64.encode(raw);
        assert!(!verify(b"payload", &tampered, &pair.public_key));
    }

    #[test]
    fn test_garbage_input_never_panics() {
        let pair = generate_key_pair().unwrap();
        assert!(!verify(b"x", "not base64 @@@", &pair.public_key));
        assert!(!verify(b"x", &BASE64.encode([0u8; 10]), &pair.public_key));
        assert!(!verify(b"x", &BASE64.encode([0u8; 64]), "not a pem key"));
    }

    #[test]
    fn test_object_signature_survives_key_reordering() {
        let pair = generate_key_pair().unwrap();
        let a = json!({"b": 2, "a": 1});
        let b = json!({"a": 1, "b": 2});
        let sig = sign_object(&a, &pair.private_key).unwrap();
        assert!(verify_object(&b, &sig, &pair.public_key));
    }

    #[test]
    fn test_instance_identity_signs() {
        let identity = InstanceIdentity::generate().unwrap();
        let record = json!({"subject": "ent_a"});
        let sig = identity.sign_object(&record).unwrap();
        assert!(verify_object(&record, &sig, identity.public_key_pem()));
        assert!(identity.issuer().starts_with("issuer_"));
    }
}
