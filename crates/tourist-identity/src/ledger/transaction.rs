//! Signed transaction envelopes.
//!
//! The canonical bytes of a transaction are its compact JSON serialization;
//! the transaction hash is BLAKE3 over those bytes, hex encoded.

use serde::{Deserialize, Serialize};

use crate::crypto::signer::{verify_base64, verifying_key_from_base64};
use crate::crypto::{SignerAddress, SignerKeyPair};
use crate::error::{ReconcileError, Result};
use crate::identity::{IdentityStatus, StakeholderRole, TouristId};

/// Hex-encoded BLAKE3 hash of a transaction's canonical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The state change a transaction asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum LedgerCall {
    RegisterTourist {
        kyc_hash: String,
        tourist_id: TouristId,
        duration_secs: u64,
        stakeholder: StakeholderRole,
        initial_status: IdentityStatus,
    },
    InactivateTourist {
        tourist_id: TouristId,
    },
}

impl LedgerCall {
    pub fn tourist_id(&self) -> &TouristId {
        match self {
            Self::RegisterTourist { tourist_id, .. } | Self::InactivateTourist { tourist_id } => {
                tourist_id
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterTourist { .. } => "register_tourist",
            Self::InactivateTourist { .. } => "inactivate_tourist",
        }
    }
}

/// Unsigned transaction body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub signer: SignerAddress,
    /// Registry (contract) address the call targets.
    pub registry: String,
    /// Per-signer sequence number; the ledger accepts them strictly in order.
    pub sequence: u64,
    /// Unix seconds at signing time.
    pub issued_at: u64,
    pub call: LedgerCall,
}

impl Transaction {
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ReconcileError::SerializationError(e.to_string()))
    }

    pub fn hash(&self) -> Result<TxHash> {
        Ok(TxHash(blake3::hash(&self.canonical_bytes()?).to_hex().to_string()))
    }

    /// Sign with `key`. The transaction's `signer` must be `key`'s address.
    pub fn sign(self, key: &SignerKeyPair) -> Result<SignedTransaction> {
        if self.signer != key.address() {
            return Err(ReconcileError::InvalidKey(format!(
                "transaction signer {} does not match key {}",
                self.signer,
                key.address()
            )));
        }
        let bytes = self.canonical_bytes()?;
        let hash = TxHash(blake3::hash(&bytes).to_hex().to_string());
        let signature = key.sign_to_base64(&bytes);
        Ok(SignedTransaction {
            tx: self,
            public_key: key.public_key_base64(),
            signature,
            hash,
        })
    }
}

/// A transaction together with its signer's public key and signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub tx: Transaction,
    /// Base64 Ed25519 public key.
    pub public_key: String,
    /// Base64 Ed25519 signature over the canonical bytes.
    pub signature: String,
    pub hash: TxHash,
}

impl SignedTransaction {
    /// Check the signature, that the key belongs to the declared signer and
    /// that the hash matches the body.
    pub fn verify(&self) -> Result<()> {
        let key = verifying_key_from_base64(&self.public_key)?;
        if SignerAddress::from_verifying_key(&key) != self.tx.signer {
            return Err(ReconcileError::SignatureInvalid);
        }
        let bytes = self.tx.canonical_bytes()?;
        verify_base64(&key, &bytes, &self.signature)?;
        if blake3::hash(&bytes).to_hex().as_str() != self.hash.0 {
            return Err(ReconcileError::SignatureInvalid);
        }
        Ok(())
    }
}
