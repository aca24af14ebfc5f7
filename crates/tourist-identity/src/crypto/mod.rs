//! Cryptographic primitives for the reconciler.
//!
//! - Ed25519 signer key pairs and the signer address derived from them
//! - Sealing of key material at rest (Argon2id → HKDF-SHA256 →
//!   ChaCha20-Poly1305)

pub mod seal;
pub mod signer;

pub use signer::{SignerAddress, SignerKeyPair};
