//! TouristIdentity: lifecycle reconciler for ledger-anchored tourist
//! digital identities.
//!
//! Enumerates every identity record on the ledger, classifies each against
//! the wall clock, and inactivates expired ones through a single signed
//! submission lane, on a fixed cadence and without overlapping cycles.

pub mod classify;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod enumerate;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod report;
pub mod scheduler;
pub mod storage;
pub mod time;

// Re-export primary types
pub use classify::{classify, is_trackable, Classification, SkipReason};
pub use config::{parse_duration, EngineConfig, SignerSource};
pub use crypto::{SignerAddress, SignerKeyPair};
pub use engine::Reconciler;
pub use enumerate::{EnumerationStrategy, KeyCursor};
pub use error::{ErrorKind, ReconcileError, Result};
pub use identity::{IdentityRecord, IdentityStatus, StakeholderRole, TouristId};
pub use report::{LogSink, RecordFailure, RunReporter, RunSummary, SummarySink};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerState};
pub use time::{Clock, ManualClock, SystemClock};

// Re-export ledger types
pub use ledger::{
    LedgerClient, LedgerClientOptions, LedgerTransport, LocalLedger, Registration, RejectCode,
    RpcTransport, SubmissionReceipt,
};
