//! Ed25519 signer key pairs.
//!
//! The signer is the single ledger account that authors every mutating
//! transaction. Its public key is the account; the address shown on the
//! ledger (`registeredBy`) is derived from it.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::{ReconcileError, Result};

/// Ledger address of a signer.
///
/// Format: `tsa_` + base58 of the first 16 bytes of SHA-256(public_key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignerAddress(pub String);

impl SignerAddress {
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let hash = Sha256::digest(key.as_bytes());
        let encoded = bs58::encode(&hash[..16]).into_string();
        Self(format!("tsa_{encoded}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SignerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An Ed25519 key pair used to sign ledger transactions.
///
/// Not `Clone`: exactly one owner holds the signing key at a time.
pub struct SignerKeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl SignerKeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut rand::thread_rng());
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Reconstruct a key pair from a raw 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Parse a hex-encoded 32-byte seed (an optional `0x` prefix is accepted).
    pub fn from_hex_seed(hex_seed: &str) -> Result<Self> {
        let trimmed = hex_seed.trim();
        let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let mut bytes = hex::decode(trimmed)
            .map_err(|e| ReconcileError::InvalidKey(format!("signing key is not hex: {e}")))?;
        let seed: std::result::Result<[u8; 32], _> = bytes.as_slice().try_into();
        bytes.zeroize();
        let mut seed =
            seed.map_err(|_| ReconcileError::InvalidKey("signing key must be 32 bytes".into()))?;
        let pair = Self::from_seed(&seed);
        seed.zeroize();
        Ok(pair)
    }

    pub fn address(&self) -> SignerAddress {
        SignerAddress::from_verifying_key(&self.verifying_key)
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Return the seed bytes. Caller must zeroize after use.
    pub fn seed_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Public key as base64, the form carried in transaction envelopes.
    pub fn public_key_base64(&self) -> String {
        base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            self.verifying_key.to_bytes(),
        )
    }

    /// Sign a message, returning the signature as base64.
    pub fn sign_to_base64(&self, message: &[u8]) -> String {
        let sig = self.signing_key.sign(message);
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, sig.to_bytes())
    }
}

impl Drop for SignerKeyPair {
    fn drop(&mut self) {
        let mut bytes = self.signing_key.to_bytes();
        bytes.zeroize();
    }
}

/// Decode a base64 public key as carried in a transaction envelope.
pub fn verifying_key_from_base64(public_key_b64: &str) -> Result<VerifyingKey> {
    let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, public_key_b64)
        .map_err(|e| ReconcileError::InvalidKey(format!("invalid base64 public key: {e}")))?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| ReconcileError::InvalidKey("public key must be 32 bytes".into()))?;
    VerifyingKey::from_bytes(&array)
        .map_err(|e| ReconcileError::InvalidKey(format!("invalid verifying key: {e}")))
}

/// Verify a base64-encoded signature over `message`.
pub fn verify_base64(verifying_key: &VerifyingKey, message: &[u8], signature_b64: &str) -> Result<()> {
    let sig_bytes =
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, signature_b64)
            .map_err(|_| ReconcileError::SignatureInvalid)?;
    let sig_array: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| ReconcileError::SignatureInvalid)?;
    let signature = Signature::from_bytes(&sig_array);
    verifying_key
        .verify(message, &signature)
        .map_err(|_| ReconcileError::SignatureInvalid)
}
