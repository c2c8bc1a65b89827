use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

// ──────────────────────────────────────────────────────────────────────────────
// Hashing utilities
// ──────────────────────────────────────────────────────────────────────────────

/// Hash data with SHA-256, returning raw bytes.
pub fn hash_sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash a string with SHA-256, returning the hex digest.
pub fn sha256_hex(data: &str) -> String {
    hex::encode(hash_sha256(data.as_bytes()))
}

/// Generate a random nonce of `len` bytes, hex-encoded (output is `2 * len` chars).
pub fn generate_nonce(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand_core::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a challenge nonce for operator authentication (64 random bytes).
pub fn generate_admin_challenge() -> String {
    generate_nonce(64)
}

// ──────────────────────────────────────────────────────────────────────────────
// Domain digests
// ──────────────────────────────────────────────────────────────────────────────

/// Invite hash: SHA-256(email + timestamp + nonce).
///
/// `timestamp_ms` is unix milliseconds; the fields are concatenated without
/// separators, so the hash is only stable for a fixed field order.
pub fn invite_hash(email: &str, timestamp_ms: i64, nonce: &str) -> String {
    sha256_hex(&format!("{}{}{}", email, timestamp_ms, nonce))
}

/// Session fingerprint: SHA-256(ip + user-agent + invite-hash + timestamp).
pub fn session_fingerprint(ip: &str, user_agent: &str, invite_hash: &str, timestamp_ms: i64) -> String {
    sha256_hex(&format!("{}{}{}{}", ip, user_agent, invite_hash, timestamp_ms))
}

/// Canary signature for leak tracking: SHA-256(fingerprint + resource + timestamp).
pub fn canary_signature(fingerprint: &str, resource: &str, timestamp_ms: i64) -> String {
    sha256_hex(&format!("{}{}{}", fingerprint, resource, timestamp_ms))
}

// ──────────────────────────────────────────────────────────────────────────────
// Ed25519 keypairs
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key is not valid hex")]
    InvalidEncoding,
    #[error("key must be 32 bytes")]
    InvalidLength,
}

/// Signing keypair (Ed25519). Key material is hex-encoded at the edges.
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut rand_core::OsRng),
        }
    }

    /// Construct keypair from secret key bytes (e.g., from config).
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(bytes),
        }
    }

    /// Construct keypair from a hex-encoded secret key.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(secret_hex).map_err(|_| KeyError::InvalidEncoding)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidLength)?;
        Ok(Self::from_secret_bytes(&bytes))
    }

    /// Get the secret key as bytes (for storage).
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// Get the secret key hex-encoded.
    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.secret_key_bytes())
    }

    /// Get the public key hex-encoded.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing.verifying_key().to_bytes())
    }

    /// Sign data, returning the hex-encoded signature.
    pub fn sign(&self, data: &str) -> String {
        hex::encode(self.signing.sign(data.as_bytes()).to_bytes())
    }
}

/// Verify a hex-encoded signature over `data` with a hex-encoded public key.
///
/// Every malformed input (bad hex, wrong length, invalid key point) resolves
/// to `false`; this never panics and never surfaces an error.
pub fn verify(data: &str, signature_hex: &str, public_key_hex: &str) -> bool {
    fn inner(data: &str, signature_hex: &str, public_key_hex: &str) -> Option<bool> {
        let key_bytes: [u8; 32] = hex::decode(public_key_hex).ok()?.try_into().ok()?;
        let key = VerifyingKey::from_bytes(&key_bytes).ok()?;
        let sig_bytes = hex::decode(signature_hex).ok()?;
        let sig = Signature::from_slice(&sig_bytes).ok()?;
        Some(key.verify(data.as_bytes(), &sig).is_ok())
    }
    inner(data, signature_hex, public_key_hex).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let kp = Keypair::generate();
        let sig = kp.sign("hello");
        assert!(verify("hello", &sig, &kp.public_key_hex()));
    }

    #[test]
    fn verify_fails_on_tampered_data() {
        let kp = Keypair::generate();
        let sig = kp.sign("hello");
        assert!(!verify("hell0", &sig, &kp.public_key_hex()));
    }

    #[test]
    fn verify_fails_on_tampered_signature() {
        let kp = Keypair::generate();
        let mut sig = kp.sign("hello").into_bytes();
        // flip a hex digit
        sig[0] = if sig[0] == b'a' { b'b' } else { b'a' };
        let sig = String::from_utf8(sig).unwrap();
        assert!(!verify("hello", &sig, &kp.public_key_hex()));
    }

    #[test]
    fn verify_fails_with_wrong_key() {
        let kp = Keypair::generate();
        let other = Keypair::generate();
        let sig = kp.sign("hello");
        assert!(!verify("hello", &sig, &other.public_key_hex()));
    }

    #[test]
    fn verify_false_on_malformed_inputs() {
        let kp = Keypair::generate();
        let sig = kp.sign("hello");

        assert!(!verify("hello", "not-hex", &kp.public_key_hex()));
        assert!(!verify("hello", &sig, "not-hex"));
        assert!(!verify("hello", "deadbeef", &kp.public_key_hex()));
        assert!(!verify("hello", &sig, "deadbeef"));
        assert!(!verify("hello", "", ""));
    }

    #[test]
    fn keypair_secret_round_trip() {
        let kp = Keypair::generate();
        let restored = Keypair::from_secret_bytes(&kp.secret_key_bytes());
        assert_eq!(kp.public_key_hex(), restored.public_key_hex());

        let from_hex = Keypair::from_secret_hex(&kp.secret_key_hex()).unwrap();
        assert_eq!(kp.public_key_hex(), from_hex.public_key_hex());
    }

    #[test]
    fn keypair_from_hex_validates() {
        assert!(matches!(
            Keypair::from_secret_hex("zzzz"),
            Err(KeyError::InvalidEncoding)
        ));
        assert!(matches!(
            Keypair::from_secret_hex("deadbeef"),
            Err(KeyError::InvalidLength)
        ));
    }

    #[test]
    fn nonce_length_and_uniqueness() {
        let n = generate_nonce(32);
        assert_eq!(n.len(), 64);
        assert_ne!(n, generate_nonce(32));

        assert_eq!(generate_admin_challenge().len(), 128);
    }

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn invite_hash_is_field_concatenation() {
        let h = invite_hash("a@example.com", 1700000000000, "abcd");
        assert_eq!(h, sha256_hex("a@example.com1700000000000abcd"));
    }

    #[test]
    fn fingerprint_changes_with_any_field() {
        let base = session_fingerprint("1.2.3.4", "ua", "hash", 1);
        assert_ne!(base, session_fingerprint("1.2.3.5", "ua", "hash", 1));
        assert_ne!(base, session_fingerprint("1.2.3.4", "ub", "hash", 1));
        assert_ne!(base, session_fingerprint("1.2.3.4", "ua", "hash2", 1));
        assert_ne!(base, session_fingerprint("1.2.3.4", "ua", "hash", 2));
    }

    #[test]
    fn canary_signature_is_deterministic() {
        let a = canary_signature("fp", "/cv.pdf", 42);
        let b = canary_signature("fp", "/cv.pdf", 42);
        assert_eq!(a, b);
        assert_ne!(a, canary_signature("fp", "/cv.pdf", 43));
    }
}
