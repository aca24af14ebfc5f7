//! Single-lane submission of signed transactions.
//!
//! The ledger orders writes from one signer strictly by sequence number, so
//! a second submission issued before the first is confirmed collides with
//! it. The lane is a dedicated task that exclusively owns the signing key
//! and the sequence counter; callers talk to it through a cloneable
//! [`LaneHandle`]. Requests are processed one at a time: the next
//! transaction is signed only after the previous one has been confirmed or
//! has definitively failed.
//!
//! Inactivation is idempotent: a record that the ledger already shows as
//! non-Active yields [`SubmissionReceipt::AlreadySettled`] rather than an
//! error.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use super::client::bounded;
use super::transaction::{LedgerCall, Transaction, TxHash};
use super::{LedgerTransport, RejectCode, TxOutcome};
use crate::crypto::{SignerAddress, SignerKeyPair};
use crate::error::{ReconcileError, Result};
use crate::identity::IdentityStatus;

/// Bound on queued, not yet processed submissions.
const LANE_CAPACITY: usize = 64;

/// Outcome of a successful mutating call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SubmissionReceipt {
    /// The transaction was included and applied.
    Confirmed { hash: TxHash, block: u64 },
    /// Nothing to do: the record was no longer Active when the write landed.
    AlreadySettled { status: Option<IdentityStatus> },
}

impl SubmissionReceipt {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }
}

/// Timing and targeting parameters of a lane.
#[derive(Debug, Clone)]
pub struct LaneSettings {
    pub registry: String,
    pub call_timeout: Duration,
    pub confirmation_timeout: Duration,
    pub receipt_poll_interval: Duration,
}

enum LaneRequest {
    Submit {
        call: LedgerCall,
        reply: oneshot::Sender<Result<SubmissionReceipt>>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Task state of the lane. Owns the signing key.
pub struct SubmissionLane {
    signer: SignerKeyPair,
    transport: Arc<dyn LedgerTransport>,
    settings: LaneSettings,
    /// Next sequence number to use; `None` when it must be re-read.
    next_sequence: Option<u64>,
    inbox: mpsc::Receiver<LaneRequest>,
}

impl SubmissionLane {
    /// Spawn the lane task on the current tokio runtime.
    pub fn spawn(
        signer: SignerKeyPair,
        transport: Arc<dyn LedgerTransport>,
        settings: LaneSettings,
    ) -> LaneHandle {
        let (sender, inbox) = mpsc::channel(LANE_CAPACITY);
        let address = signer.address();
        let lane = Self {
            signer,
            transport,
            settings,
            next_sequence: None,
            inbox,
        };
        tokio::spawn(lane.run());
        LaneHandle { sender, address }
    }

    async fn run(mut self) {
        log::debug!("submission lane for {} started", self.signer.address());
        while let Some(request) = self.inbox.recv().await {
            match request {
                LaneRequest::Submit { call, reply } => {
                    let result = self.submit(call.clone()).await;
                    match &result {
                        Ok(_) | Err(ReconcileError::NotFound(_)) => {}
                        Err(e) => log::error!(
                            "{} for {} failed: {e}",
                            call.name(),
                            call.tourist_id()
                        ),
                    }
                    let _ = reply.send(result);
                }
                LaneRequest::Shutdown { ack } => {
                    let _ = ack.send(());
                    break;
                }
            }
        }
        log::debug!("submission lane for {} stopped", self.signer.address());
    }

    async fn submit(&mut self, call: LedgerCall) -> Result<SubmissionReceipt> {
        match self.submit_once(&call).await {
            Err(ReconcileError::LedgerRejected {
                code: RejectCode::BadSequence,
                reason,
            }) => {
                log::warn!(
                    "sequence drift for {} ({reason}); resyncing and resubmitting {}",
                    self.signer.address(),
                    call.name()
                );
                self.next_sequence = None;
                self.submit_once(&call).await
            }
            other => other,
        }
    }

    async fn current_sequence(&mut self) -> Result<u64> {
        if let Some(seq) = self.next_sequence {
            return Ok(seq);
        }
        let address = self.signer.address();
        let seq = bounded(
            "next_sequence",
            self.settings.call_timeout,
            self.transport.next_sequence(&address),
        )
        .await?;
        self.next_sequence = Some(seq);
        Ok(seq)
    }

    async fn submit_once(&mut self, call: &LedgerCall) -> Result<SubmissionReceipt> {
        let sequence = self.current_sequence().await?;
        let signed = Transaction {
            signer: self.signer.address(),
            registry: self.settings.registry.clone(),
            sequence,
            issued_at: crate::time::now_secs(),
            call: call.clone(),
        }
        .sign(&self.signer)?;

        log::debug!(
            "submitting {} for {} (seq {sequence}, tx {})",
            call.name(),
            call.tourist_id(),
            signed.hash
        );

        let sent = bounded(
            "send_transaction",
            self.settings.call_timeout,
            self.transport.send_transaction(&signed),
        )
        .await;

        let hash = match sent {
            Ok(hash) => hash,
            Err(e @ ReconcileError::LedgerRejected { .. }) => {
                // Refused before inclusion; the sequence number was not consumed.
                if matches!(e, ReconcileError::LedgerRejected { code: RejectCode::BadSequence, .. }) {
                    self.next_sequence = None;
                }
                return self.settle_rejection(call, e).await;
            }
            Err(e) => {
                // Unknown whether the ledger saw it.
                self.next_sequence = None;
                return Err(e);
            }
        };

        self.next_sequence = Some(sequence + 1);

        let receipt = match self.await_receipt(&hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.next_sequence = None;
                return Err(e);
            }
        };

        match receipt.outcome {
            TxOutcome::Confirmed => Ok(SubmissionReceipt::Confirmed {
                hash: receipt.hash,
                block: receipt.block,
            }),
            TxOutcome::Rejected { code, reason } => {
                self.settle_rejection(call, ReconcileError::LedgerRejected { code, reason })
                    .await
            }
        }
    }

    /// Decide whether a rejection of `call` is a real failure or the
    /// idempotent "already done" case.
    async fn settle_rejection(
        &self,
        call: &LedgerCall,
        err: ReconcileError,
    ) -> Result<SubmissionReceipt> {
        let LedgerCall::InactivateTourist { tourist_id } = call else {
            return Err(err);
        };

        match &err {
            ReconcileError::LedgerRejected {
                code: RejectCode::NotFound,
                ..
            } => return Err(ReconcileError::NotFound(tourist_id.to_string())),
            ReconcileError::LedgerRejected {
                code: RejectCode::BadSequence,
                ..
            } => return Err(err),
            _ => {}
        }

        let observed = bounded(
            "get_record",
            self.settings.call_timeout,
            self.transport.get_record(tourist_id),
        )
        .await;

        match observed {
            Ok(Some(record)) if !record.is_active() => {
                log::info!(
                    "{tourist_id} already {} on ledger; inactivation is a no-op",
                    record.status
                );
                Ok(SubmissionReceipt::AlreadySettled {
                    status: Some(record.status),
                })
            }
            _ if matches!(
                err,
                ReconcileError::LedgerRejected {
                    code: RejectCode::NotActive,
                    ..
                }
            ) =>
            {
                Ok(SubmissionReceipt::AlreadySettled { status: None })
            }
            _ => Err(err),
        }
    }

    async fn await_receipt(&self, hash: &TxHash) -> Result<super::TxReceipt> {
        let poll = async {
            loop {
                match bounded(
                    "transaction_receipt",
                    self.settings.call_timeout,
                    self.transport.transaction_receipt(hash),
                )
                .await
                {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => {}
                    Err(e) => log::debug!("receipt poll for {hash} failed: {e}"),
                }
                tokio::time::sleep(self.settings.receipt_poll_interval).await;
            }
        };

        tokio::time::timeout(self.settings.confirmation_timeout, poll)
            .await
            .map_err(|_| ReconcileError::LedgerTimeout {
                operation: "await_confirmation".to_string(),
                timeout_ms: self.settings.confirmation_timeout.as_millis() as u64,
            })
    }
}

/// Handle for submitting through a lane. Cheap to clone.
#[derive(Clone)]
pub struct LaneHandle {
    sender: mpsc::Sender<LaneRequest>,
    address: SignerAddress,
}

impl LaneHandle {
    /// Address of the signer owned by the lane.
    pub fn address(&self) -> &SignerAddress {
        &self.address
    }

    /// Queue `call` and wait for its confirmation or definitive failure.
    pub async fn submit(&self, call: LedgerCall) -> Result<SubmissionReceipt> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(LaneRequest::Submit { call, reply })
            .await
            .map_err(|_| ReconcileError::LaneClosed)?;
        rx.await.map_err(|_| ReconcileError::LaneClosed)?
    }

    /// Stop the lane after the submissions queued before this call finish.
    pub async fn shutdown(&self) {
        let (ack, rx) = oneshot::channel();
        if self.sender.send(LaneRequest::Shutdown { ack }).await.is_ok() {
            let _ = rx.await;
        }
    }
}
