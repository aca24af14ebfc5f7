//! Ledger boundary.
//!
//! [`LedgerClient`] is the only component that talks to the ledger. It
//! does so through a [`LedgerTransport`], which exposes the raw remote
//! operations of a particular ledger deployment:
//!
//! - [`rpc::RpcTransport`]: JSON-RPC 2.0 over HTTP(S) to a ledger gateway.
//! - [`local::LocalLedger`]: an in-process ledger with the same rules,
//!   optionally persisted to a snapshot file.
//!
//! Mutating calls are signed [`transaction::Transaction`]s and all of them
//! flow through one [`lane::SubmissionLane`] per signing key.

pub mod client;
pub mod lane;
pub mod local;
pub mod rpc;
pub mod transaction;

pub use client::{LedgerClient, LedgerClientOptions, Registration, SubmissionReceipt};
pub use local::LocalLedger;
pub use rpc::RpcTransport;
pub use transaction::{LedgerCall, SignedTransaction, Transaction, TxHash};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crypto::SignerAddress;
use crate::error::Result;
use crate::identity::{IdentityRecord, TouristId};

/// Reason code attached to a ledger-side rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectCode {
    DuplicateId,
    NotFound,
    NotActive,
    BadSequence,
    BadSignature,
    UnknownRegistry,
    Other,
}

impl RejectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateId => "duplicate_id",
            Self::NotFound => "not_found",
            Self::NotActive => "not_active",
            Self::BadSequence => "bad_sequence",
            Self::BadSignature => "bad_signature",
            Self::UnknownRegistry => "unknown_registry",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for RejectCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A "record created" entry of the ledger's append-only event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationEvent {
    pub block: u64,
    #[serde(rename = "touristID")]
    pub tourist_id: TouristId,
}

/// Final outcome of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TxOutcome {
    Confirmed,
    Rejected { code: RejectCode, reason: String },
}

/// Receipt of a transaction that the ledger has included in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub hash: TxHash,
    pub block: u64,
    pub outcome: TxOutcome,
}

/// Raw remote operations of a ledger deployment.
///
/// Implementations perform exactly one round trip per call and apply no
/// timeout of their own beyond what the transport imposes; the
/// [`LedgerClient`] bounds every call.
#[async_trait]
pub trait LedgerTransport: Send + Sync {
    /// Fetch one record; `Ok(None)` when the key is absent.
    async fn get_record(&self, id: &TouristId) -> Result<Option<IdentityRecord>>;

    /// Direct key listing. Ledgers without such an accessor return
    /// `ReconcileError::Unsupported`.
    async fn list_identity_ids(&self) -> Result<Vec<TouristId>>;

    /// Current head block number.
    async fn head_block(&self) -> Result<u64>;

    /// Registration events in blocks `from..=to`, in log order.
    async fn registration_events(&self, from: u64, to: u64) -> Result<Vec<RegistrationEvent>>;

    /// Next sequence number the ledger will accept from `signer`.
    async fn next_sequence(&self, signer: &SignerAddress) -> Result<u64>;

    /// Hand a signed transaction to the ledger. Returns once accepted for
    /// inclusion; inclusion itself is observed through
    /// [`LedgerTransport::transaction_receipt`].
    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<TxHash>;

    /// Receipt for `hash`, or `Ok(None)` while not yet included.
    async fn transaction_receipt(&self, hash: &TxHash) -> Result<Option<TxReceipt>>;
}
