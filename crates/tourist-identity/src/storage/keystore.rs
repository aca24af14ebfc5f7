//! `.tkey` file format: encrypted signer keystore.
//!
//! Holds the reconciler's Ed25519 signing seed encrypted with
//! ChaCha20-Poly1305 under a key derived from a passphrase, next to the
//! signer address in plaintext so the account can be identified without
//! decrypting.
//!
//! File format (JSON):
//! ```json
//! {
//!     "version": 1,
//!     "format": "tkey-v1",
//!     "address": "tsa_...",
//!     "encryption": {
//!         "algorithm": "chacha20-poly1305",
//!         "kdf": "argon2id",
//!         "salt": "<base64-16-bytes>",
//!         "nonce": "<base64-12-bytes>"
//!     },
//!     "encrypted_seed": "<base64-ciphertext>"
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto::seal::{self, Sealed, NONCE_LEN, SALT_LEN};
use crate::crypto::{SignerAddress, SignerKeyPair};
use crate::error::{ReconcileError, Result};
use crate::storage::write_atomic;

const TKEY_VERSION: u32 = 1;
const TKEY_FORMAT: &str = "tkey-v1";
const TKEY_ALGORITHM: &str = "chacha20-poly1305";
const TKEY_KDF: &str = "argon2id";

/// HKDF context for the keystore cipher key. Must remain stable across versions.
const KEYSTORE_CONTEXT: &str = "tourist-identity/keystore";

/// Top-level structure written to disk as a `.tkey` file.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeystoreFile {
    pub version: u32,
    pub format: String,
    /// Signer address; public, lets operators match the file to a ledger account.
    pub address: SignerAddress,
    pub encryption: EncryptionMetadata,
    /// Base64-encoded ciphertext of the 32-byte seed.
    pub encrypted_seed: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    pub algorithm: String,
    pub kdf: String,
    pub salt: String,
    pub nonce: String,
}

fn b64_encode(bytes: &[u8]) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
}

fn b64_decode(field: &str, value: &str) -> Result<Vec<u8>> {
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, value)
        .map_err(|e| ReconcileError::InvalidFileFormat(format!("invalid {field} base64: {e}")))
}

/// Save a signer to a `.tkey` file, encrypting the seed with `passphrase`.
///
/// # Errors
///
/// Returns `ReconcileError::DerivationFailed` / `EncryptionFailed` on crypto
/// failures, or `ReconcileError::Io` for filesystem errors.
pub fn save_signer(signer: &SignerKeyPair, path: &Path, passphrase: &str) -> Result<()> {
    let mut seed = signer.seed_bytes();
    let sealed = seal::seal(passphrase.as_bytes(), KEYSTORE_CONTEXT, &seed);
    seed.zeroize();
    let sealed = sealed?;

    let file = KeystoreFile {
        version: TKEY_VERSION,
        format: TKEY_FORMAT.to_string(),
        address: signer.address(),
        encryption: EncryptionMetadata {
            algorithm: TKEY_ALGORITHM.to_string(),
            kdf: TKEY_KDF.to_string(),
            salt: b64_encode(&sealed.salt),
            nonce: b64_encode(&sealed.nonce),
        },
        encrypted_seed: b64_encode(&sealed.ciphertext),
    };

    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| ReconcileError::SerializationError(e.to_string()))?;
    write_atomic(path, json.as_bytes())
}

fn read_file(path: &Path) -> Result<KeystoreFile> {
    let bytes = std::fs::read(path)?;
    let file: KeystoreFile = serde_json::from_slice(&bytes)
        .map_err(|e| ReconcileError::InvalidFileFormat(format!("failed to parse keystore: {e}")))?;

    if file.version != TKEY_VERSION || file.format != TKEY_FORMAT {
        return Err(ReconcileError::InvalidFileFormat(format!(
            "unsupported keystore version={} format={}",
            file.version, file.format,
        )));
    }
    Ok(file)
}

/// Load a signer from a `.tkey` file.
///
/// # Errors
///
/// Returns `ReconcileError::InvalidPassphrase` if the passphrase is wrong,
/// `ReconcileError::InvalidFileFormat` for malformed files (including an
/// address that does not match the decrypted key), or `ReconcileError::Io`.
pub fn load_signer(path: &Path, passphrase: &str) -> Result<SignerKeyPair> {
    let file = read_file(path)?;

    let salt: [u8; SALT_LEN] = b64_decode("salt", &file.encryption.salt)?
        .try_into()
        .map_err(|_| ReconcileError::InvalidFileFormat("salt must be 16 bytes".into()))?;
    let nonce: [u8; NONCE_LEN] = b64_decode("nonce", &file.encryption.nonce)?
        .try_into()
        .map_err(|_| ReconcileError::InvalidFileFormat("nonce must be 12 bytes".into()))?;
    let ciphertext = b64_decode("ciphertext", &file.encrypted_seed)?;

    let mut plaintext = seal::open(
        passphrase.as_bytes(),
        KEYSTORE_CONTEXT,
        &Sealed {
            salt,
            nonce,
            ciphertext,
        },
    )?;

    let seed: std::result::Result<[u8; 32], _> = plaintext.as_slice().try_into();
    plaintext.zeroize();
    let mut seed =
        seed.map_err(|_| ReconcileError::InvalidKey("signing seed must be 32 bytes".into()))?;
    let signer = SignerKeyPair::from_seed(&seed);
    seed.zeroize();

    if signer.address() != file.address {
        return Err(ReconcileError::InvalidFileFormat(format!(
            "keystore address {} does not match its key",
            file.address
        )));
    }

    Ok(signer)
}

/// Read only the signer address, without the passphrase.
pub fn read_signer_address(path: &Path) -> Result<SignerAddress> {
    Ok(read_file(path)?.address)
}
