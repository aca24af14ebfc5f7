//! The ledger client: the only component that performs remote calls.
//!
//! Four logical operations are exposed: register, fetch-by-key,
//! enumerate-keys and inactivate-by-key. Every remote call is bounded by
//! the configured per-call timeout; an elapsed timeout surfaces as
//! `ReconcileError::LedgerTimeout`. Mutating calls go through the
//! [`SubmissionLane`](super::lane::SubmissionLane), which owns the signing
//! key; the key itself is never reachable through the client.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::lane::{LaneHandle, LaneSettings, SubmissionLane};
use super::transaction::LedgerCall;
use super::{LedgerTransport, RegistrationEvent};
use crate::crypto::{SignerAddress, SignerKeyPair};
use crate::enumerate::{EnumerationStrategy, KeyCursor};
use crate::error::{ReconcileError, Result};
use crate::identity::{IdentityRecord, IdentityStatus, StakeholderRole, TouristId};

pub use super::lane::SubmissionReceipt;

/// Run `fut` with an upper bound of `timeout`.
pub(crate) async fn bounded<T, F>(operation: &str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ReconcileError::LedgerTimeout {
            operation: operation.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Tunables of a [`LedgerClient`].
#[derive(Debug, Clone)]
pub struct LedgerClientOptions {
    /// Registry (contract) address every transaction targets.
    pub registry_address: String,
    pub call_timeout: Duration,
    pub confirmation_timeout: Duration,
    pub receipt_poll_interval: Duration,
    /// Block window per page when replaying registration events.
    pub replay_page_blocks: u64,
}

impl LedgerClientOptions {
    pub fn new(registry_address: impl Into<String>) -> Self {
        Self {
            registry_address: registry_address.into(),
            call_timeout: Duration::from_secs(15),
            confirmation_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_secs(2),
            replay_page_blocks: 5000,
        }
    }
}

/// Input of a registration write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub kyc_hash: String,
    pub tourist_id: TouristId,
    pub duration_secs: u64,
    pub stakeholder: StakeholderRole,
    pub initial_status: IdentityStatus,
}

impl Registration {
    /// An Active registration by a tour operator.
    pub fn new(tourist_id: TouristId, kyc_hash: impl Into<String>, duration_secs: u64) -> Self {
        Self {
            kyc_hash: kyc_hash.into(),
            tourist_id,
            duration_secs,
            stakeholder: StakeholderRole::TourOperator,
            initial_status: IdentityStatus::Active,
        }
    }
}

/// Handle to the ledger. Cheap to clone; clones share one submission lane.
#[derive(Clone)]
pub struct LedgerClient {
    transport: Arc<dyn LedgerTransport>,
    lane: LaneHandle,
    options: Arc<LedgerClientOptions>,
}

impl LedgerClient {
    /// Build a client and spawn its submission lane. Must be called from
    /// within a tokio runtime.
    pub fn new(
        transport: Arc<dyn LedgerTransport>,
        signer: SignerKeyPair,
        options: LedgerClientOptions,
    ) -> Self {
        let lane = SubmissionLane::spawn(
            signer,
            Arc::clone(&transport),
            LaneSettings {
                registry: options.registry_address.clone(),
                call_timeout: options.call_timeout,
                confirmation_timeout: options.confirmation_timeout,
                receipt_poll_interval: options.receipt_poll_interval,
            },
        );
        Self {
            transport,
            lane,
            options: Arc::new(options),
        }
    }

    pub fn signer_address(&self) -> &SignerAddress {
        self.lane.address()
    }

    pub fn options(&self) -> &LedgerClientOptions {
        &self.options
    }

    /// Write a new identity record and wait for its confirmation.
    ///
    /// # Errors
    ///
    /// `LedgerRejected` when the ledger refuses the write (e.g. duplicate
    /// `touristID`), `LedgerTimeout` when confirmation is not observed in time.
    pub async fn submit_registration(&self, registration: Registration) -> Result<SubmissionReceipt> {
        if registration.initial_status == IdentityStatus::Suspended {
            return Err(ReconcileError::Configuration(
                "registrations cannot start Suspended".into(),
            ));
        }
        self.lane
            .submit(LedgerCall::RegisterTourist {
                kyc_hash: registration.kyc_hash,
                tourist_id: registration.tourist_id,
                duration_secs: registration.duration_secs,
                stakeholder: registration.stakeholder,
                initial_status: registration.initial_status,
            })
            .await
    }

    /// Read the current record for `id`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the ledger has no record under that key.
    pub async fn fetch_record(&self, id: &TouristId) -> Result<IdentityRecord> {
        bounded("fetch_record", self.options.call_timeout, self.transport.get_record(id))
            .await?
            .ok_or_else(|| ReconcileError::NotFound(id.to_string()))
    }

    /// Start a fresh, finite enumeration of every identity key.
    pub fn enumerate_identities(&self, strategy: EnumerationStrategy) -> KeyCursor {
        KeyCursor::new(self.clone(), strategy, self.options.replay_page_blocks)
    }

    /// Flip `id` from Active to Inactive. Idempotent: a record the ledger
    /// already shows as non-Active yields `SubmissionReceipt::AlreadySettled`.
    pub async fn submit_inactivation(&self, id: &TouristId) -> Result<SubmissionReceipt> {
        self.lane
            .submit(LedgerCall::InactivateTourist {
                tourist_id: id.clone(),
            })
            .await
    }

    /// Stop the submission lane once queued writes have finished.
    pub async fn shutdown(&self) {
        self.lane.shutdown().await;
    }

    pub(crate) async fn list_identity_ids(&self) -> Result<Vec<TouristId>> {
        bounded(
            "list_identity_ids",
            self.options.call_timeout,
            self.transport.list_identity_ids(),
        )
        .await
    }

    pub(crate) async fn head_block(&self) -> Result<u64> {
        bounded("head_block", self.options.call_timeout, self.transport.head_block()).await
    }

    pub(crate) async fn registration_events(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<RegistrationEvent>> {
        bounded(
            "registration_events",
            self.options.call_timeout,
            self.transport.registration_events(from, to),
        )
        .await
    }
}
