//! In-process ledger.
//!
//! `LocalLedger` follows the same rules as a remote deployment:
//!
//! - transactions must be signed by the key matching their `signer`, target
//!   this ledger's registry address and carry exactly the signer's next
//!   sequence number, otherwise they are refused before inclusion;
//! - every accepted transaction is included in its own block and consumes
//!   the sequence number, even when its call is then rejected
//!   (duplicate ID, unknown ID, record not Active);
//! - successful registrations append to the registration event log.
//!
//! When opened with a path, the state lives in a JSON snapshot that several
//! processes may share (`file://` endpoints in the configuration select this
//! ledger). Every operation takes an advisory lock on a sibling `.lock`
//! file, shared for reads and exclusive for writes, and re-reads the
//! snapshot under it. Writes are saved before the lock is released
//! (atomic temp-file-then-rename).

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use super::transaction::{LedgerCall, SignedTransaction, TxHash};
use super::{LedgerTransport, RegistrationEvent, RejectCode, TxOutcome, TxReceipt};
use crate::crypto::SignerAddress;
use crate::error::{ReconcileError, Result};
use crate::identity::{IdentityRecord, IdentityStatus, TouristId};
use crate::storage::write_atomic;
use crate::time::Clock;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerState {
    version: u32,
    registry: String,
    head: u64,
    records: BTreeMap<String, IdentityRecord>,
    /// Append-only; its order is registration order.
    events: Vec<RegistrationEvent>,
    /// Next accepted sequence number, keyed by signer address.
    sequences: HashMap<String, u64>,
    receipts: HashMap<String, TxReceipt>,
}

impl LedgerState {
    fn empty(registry: String) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            registry,
            ..Self::default()
        }
    }

    fn load(path: &Path, registry: &str) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let state: Self = serde_json::from_slice(&bytes).map_err(|e| {
            ReconcileError::InvalidFileFormat(format!(
                "failed to parse ledger snapshot {}: {e}",
                path.display()
            ))
        })?;
        if state.version != SNAPSHOT_VERSION {
            return Err(ReconcileError::InvalidFileFormat(format!(
                "unsupported ledger snapshot version {}",
                state.version
            )));
        }
        if state.registry != registry {
            return Err(ReconcileError::InvalidFileFormat(format!(
                "snapshot belongs to registry {}, not {registry}",
                state.registry
            )));
        }
        Ok(state)
    }
}

/// Advisory lock on the snapshot's sibling lock file. Released on drop.
struct SnapshotLock(File);

impl SnapshotLock {
    fn acquire(snapshot: &Path, exclusive: bool) -> Result<Self> {
        let mut name = snapshot.as_os_str().to_owned();
        name.push(".lock");
        let lock_path = PathBuf::from(name);
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;
        if exclusive {
            FileExt::lock_exclusive(&file)?;
        } else {
            FileExt::lock_shared(&file)?;
        }
        Ok(Self(file))
    }
}

impl Drop for SnapshotLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

/// An in-process ledger with optional snapshot persistence.
pub struct LocalLedger {
    state: Mutex<LedgerState>,
    clock: Arc<dyn Clock>,
    snapshot: Option<PathBuf>,
}

impl LocalLedger {
    /// A fresh, memory-only ledger for `registry`.
    pub fn new(registry: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(LedgerState::empty(registry.into())),
            clock,
            snapshot: None,
        }
    }

    /// Open (or create) a ledger persisted at `path`.
    ///
    /// # Errors
    ///
    /// `InvalidFileFormat` if the snapshot cannot be parsed or belongs to a
    /// different registry; `Io` for filesystem errors.
    pub fn open(path: &Path, registry: impl Into<String>, clock: Arc<dyn Clock>) -> Result<Self> {
        let ledger = Self {
            state: Mutex::new(LedgerState::empty(registry.into())),
            clock,
            snapshot: Some(path.to_path_buf()),
        };
        ledger.with_state_exclusive(|_| Ok(()))?;
        Ok(ledger)
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the cached state with the snapshot on disk, if there is one.
    fn reload(path: &Path, state: &mut LedgerState) -> Result<()> {
        if path.exists() {
            *state = LedgerState::load(path, &state.registry)?;
        }
        Ok(())
    }

    fn persist(path: &Path, state: &LedgerState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| ReconcileError::SerializationError(e.to_string()))?;
        write_atomic(path, &json)
    }

    fn with_state_shared<T>(&self, operation: impl FnOnce(&LedgerState) -> T) -> Result<T> {
        let mut state = self.lock();
        let Some(path) = &self.snapshot else {
            return Ok(operation(&state));
        };
        let _file_lock = SnapshotLock::acquire(path, false)?;
        Self::reload(path, &mut state)?;
        Ok(operation(&state))
    }

    /// Run a mutation. The snapshot is saved only when `operation` succeeds,
    /// so it must not modify the state on its error paths.
    fn with_state_exclusive<T>(
        &self,
        operation: impl FnOnce(&mut LedgerState) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.lock();
        let Some(path) = &self.snapshot else {
            return operation(&mut state);
        };
        let _file_lock = SnapshotLock::acquire(path, true)?;
        Self::reload(path, &mut state)?;
        let result = operation(&mut state)?;
        Self::persist(path, &state)?;
        Ok(result)
    }

    /// Insert a record as if it had been registered, bypassing signing.
    /// Appends a registration event in a new block.
    pub fn seed(&self, record: IdentityRecord) -> Result<()> {
        self.with_state_exclusive(|state| {
            if state.records.contains_key(record.tourist_id.as_str()) {
                return Err(ReconcileError::rejected(
                    RejectCode::DuplicateId,
                    format!("tourist already exists with ID: {}", record.tourist_id),
                ));
            }
            state.head += 1;
            let block = state.head;
            state.events.push(RegistrationEvent {
                block,
                tourist_id: record.tourist_id.clone(),
            });
            state.records.insert(record.tourist_id.0.clone(), record);
            Ok(())
        })
    }

    /// Externally asserted suspension (an authority action, not the reconciler's).
    pub fn suspend(&self, id: &TouristId) -> Result<()> {
        let now = self.clock.now_secs();
        self.with_state_exclusive(|state| {
            let record = state
                .records
                .get_mut(id.as_str())
                .ok_or_else(|| ReconcileError::NotFound(id.to_string()))?;
            if record.status == IdentityStatus::Suspended {
                return Err(ReconcileError::rejected(
                    RejectCode::Other,
                    format!("tourist already suspended: {id}"),
                ));
            }
            record.status = IdentityStatus::Suspended;
            record.last_update_time = now;
            state.head += 1;
            Ok(())
        })
    }

    /// Current copy of a record, without going through the transport trait.
    pub fn record(&self, id: &TouristId) -> Result<Option<IdentityRecord>> {
        self.with_state_shared(|state| state.records.get(id.as_str()).cloned())
    }

    pub fn record_count(&self) -> Result<usize> {
        self.with_state_shared(|state| state.records.len())
    }

    fn apply(
        state: &mut LedgerState,
        signer: &SignerAddress,
        call: &LedgerCall,
        now: u64,
    ) -> TxOutcome {
        match call {
            LedgerCall::RegisterTourist {
                kyc_hash,
                tourist_id,
                duration_secs,
                stakeholder,
                initial_status,
            } => {
                if state.records.contains_key(tourist_id.as_str()) {
                    return TxOutcome::Rejected {
                        code: RejectCode::DuplicateId,
                        reason: format!("tourist already exists with ID: {tourist_id}"),
                    };
                }
                if *initial_status == IdentityStatus::Suspended {
                    return TxOutcome::Rejected {
                        code: RejectCode::Other,
                        reason: "initial status cannot be suspended".into(),
                    };
                }
                let record = IdentityRecord {
                    tourist_id: tourist_id.clone(),
                    registered_by: signer.clone(),
                    stakeholder_role: *stakeholder,
                    kyc_hash: kyc_hash.clone(),
                    start_time: now,
                    end_time: now.saturating_add(*duration_secs),
                    last_update_time: now,
                    status: *initial_status,
                };
                state.events.push(RegistrationEvent {
                    block: state.head,
                    tourist_id: tourist_id.clone(),
                });
                state.records.insert(tourist_id.0.clone(), record);
                TxOutcome::Confirmed
            }
            LedgerCall::InactivateTourist { tourist_id } => {
                let Some(record) = state.records.get_mut(tourist_id.as_str()) else {
                    return TxOutcome::Rejected {
                        code: RejectCode::NotFound,
                        reason: format!("tourist not found: {tourist_id}"),
                    };
                };
                if record.status != IdentityStatus::Active {
                    return TxOutcome::Rejected {
                        code: RejectCode::NotActive,
                        reason: format!("tourist {tourist_id} is {}", record.status),
                    };
                }
                record.status = IdentityStatus::Inactive;
                record.last_update_time = now;
                TxOutcome::Confirmed
            }
        }
    }
}
#[async_trait]
impl LedgerTransport for LocalLedger {
    async fn get_record(&self, id: &TouristId) -> Result<Option<IdentityRecord>> {
        self.record(id)
    }

    async fn list_identity_ids(&self) -> Result<Vec<TouristId>> {
        self.with_state_shared(|state| {
            state
                .events
                .iter()
                .map(|e| e.tourist_id.clone())
                .collect()
        })
    }

    async fn head_block(&self) -> Result<u64> {
        self.with_state_shared(|state| state.head)
    }

    async fn registration_events(&self, from: u64, to: u64) -> Result<Vec<RegistrationEvent>> {
        self.with_state_shared(|state| {
            state
                .events
                .iter()
                .filter(|e| e.block >= from && e.block <= to)
                .cloned()
                .collect()
        })
    }

    async fn next_sequence(&self, signer: &SignerAddress) -> Result<u64> {
        self.with_state_shared(|state| state.sequences.get(signer.as_str()).copied().unwrap_or(0))
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<TxHash> {
        tx.verify()
            .map_err(|e| ReconcileError::rejected(RejectCode::BadSignature, e.to_string()))?;

        let now = self.clock.now_secs();
        self.with_state_exclusive(|state| {
            if tx.tx.registry != state.registry {
                return Err(ReconcileError::rejected(
                    RejectCode::UnknownRegistry,
                    format!("registry {} is not {}", tx.tx.registry, state.registry),
                ));
            }

            let expected = state
                .sequences
                .get(tx.tx.signer.as_str())
                .copied()
                .unwrap_or(0);
            if tx.tx.sequence != expected {
                return Err(ReconcileError::rejected(
                    RejectCode::BadSequence,
                    format!("expected sequence {expected}, got {}", tx.tx.sequence),
                ));
            }

            state.sequences.insert(tx.tx.signer.0.clone(), expected + 1);
            state.head += 1;
            let outcome = Self::apply(state, &tx.tx.signer, &tx.tx.call, now);
            let receipt = TxReceipt {
                hash: tx.hash.clone(),
                block: state.head,
                outcome,
            };
            state.receipts.insert(tx.hash.0.clone(), receipt);
            Ok(tx.hash.clone())
        })
    }

    async fn transaction_receipt(&self, hash: &TxHash) -> Result<Option<TxReceipt>> {
        self.with_state_shared(|state| state.receipts.get(&hash.0).cloned())
    }
}
