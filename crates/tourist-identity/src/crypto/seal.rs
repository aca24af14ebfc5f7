//! Sealing of key material at rest.
//!
//! passphrase → Argon2id(passphrase, salt) → master key →
//! HKDF-SHA256(master key, context) → ChaCha20-Poly1305 key.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{ReconcileError, Result};

const ARGON2_M_COST: u32 = 65536; // 64 MiB
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 4;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;

/// Output of [`seal`]: everything needed to open the ciphertext again
/// except the passphrase.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

fn random_array<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

fn derive_master_key(passphrase: &[u8], salt: &[u8; SALT_LEN]) -> Result<[u8; 32]> {
    let params = Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, Some(32))
        .map_err(|e| ReconcileError::DerivationFailed(format!("Argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = [0u8; 32];
    argon2
        .hash_password_into(passphrase, salt, &mut output)
        .map_err(|e| ReconcileError::DerivationFailed(format!("Argon2 hash: {e}")))?;
    Ok(output)
}

fn derive_cipher_key(master: &[u8; 32], context: &str) -> Result<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(None, master);
    let mut output = [0u8; 32];
    hk.expand(context.as_bytes(), &mut output)
        .map_err(|e| ReconcileError::DerivationFailed(format!("HKDF expand failed: {e}")))?;
    Ok(output)
}

fn cipher_key(passphrase: &[u8], salt: &[u8; SALT_LEN], context: &str) -> Result<[u8; 32]> {
    let mut master = derive_master_key(passphrase, salt)?;
    let key = derive_cipher_key(&master, context);
    master.zeroize();
    key
}

/// Encrypt `plaintext` under a key derived from `passphrase` and `context`.
pub fn seal(passphrase: &[u8], context: &str, plaintext: &[u8]) -> Result<Sealed> {
    let salt = random_array::<SALT_LEN>();
    let nonce = random_array::<NONCE_LEN>();

    let mut key = cipher_key(passphrase, &salt, context)?;
    let cipher = ChaCha20Poly1305::new_from_slice(&key)
        .map_err(|e| ReconcileError::EncryptionFailed(format!("cipher init: {e}")));
    key.zeroize();

    let ciphertext = cipher?
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| ReconcileError::EncryptionFailed(format!("encrypt: {e}")))?;

    Ok(Sealed {
        salt,
        nonce,
        ciphertext,
    })
}

/// Decrypt a [`Sealed`] blob. A wrong passphrase surfaces as
/// `ReconcileError::InvalidPassphrase` because AEAD authentication fails.
pub fn open(passphrase: &[u8], context: &str, sealed: &Sealed) -> Result<Vec<u8>> {
    let mut key = cipher_key(passphrase, &sealed.salt, context)?;
    let cipher = ChaCha20Poly1305::new_from_slice(&key)
        .map_err(|e| ReconcileError::EncryptionFailed(format!("cipher init: {e}")));
    key.zeroize();

    cipher?
        .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
        .map_err(|_| ReconcileError::InvalidPassphrase)
}
