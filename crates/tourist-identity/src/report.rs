//! Run reporting.
//!
//! A [`RunReporter`] accumulates the outcome of every candidate during one
//! cycle and is consumed into a [`RunSummary`] at the end. The summary is the
//! only externally observable result of a cycle; it is handed to a
//! [`SummarySink`] exactly once.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::classify::SkipReason;
use crate::error::{ErrorKind, ReconcileError};
use crate::identity::TouristId;

/// One failed record (or a cycle-level failure when `tourist_id` is `None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFailure {
    #[serde(rename = "touristID")]
    pub tourist_id: Option<TouristId>,
    pub kind: ErrorKind,
    pub detail: String,
}

/// End-of-cycle summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub started_at: u64,
    pub finished_at: u64,
    pub duration_ms: u64,
    pub candidate_count: usize,
    pub transitioned_count: usize,
    pub noop_count: usize,
    pub skipped_count: usize,
    pub skipped_by_reason: BTreeMap<SkipReason, usize>,
    pub errors_by_kind: BTreeMap<ErrorKind, usize>,
    pub errors: Vec<RecordFailure>,
    /// The cycle stopped early because shutdown was requested.
    pub interrupted: bool,
}

impl RunSummary {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn skipped(&self, reason: SkipReason) -> usize {
        self.skipped_by_reason.get(&reason).copied().unwrap_or(0)
    }

    pub fn errors_of(&self, kind: ErrorKind) -> usize {
        self.errors_by_kind.get(&kind).copied().unwrap_or(0)
    }
}

/// Mutable per-cycle accumulator.
#[derive(Debug)]
pub struct RunReporter {
    started_at: u64,
    started: Instant,
    candidate_count: usize,
    transitioned_count: usize,
    noop_count: usize,
    skipped_by_reason: BTreeMap<SkipReason, usize>,
    errors: Vec<RecordFailure>,
}

impl RunReporter {
    pub fn start(started_at: u64) -> Self {
        Self {
            started_at,
            started: Instant::now(),
            candidate_count: 0,
            transitioned_count: 0,
            noop_count: 0,
            skipped_by_reason: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn candidate(&mut self) {
        self.candidate_count += 1;
    }

    pub fn noop(&mut self) {
        self.noop_count += 1;
    }

    pub fn transitioned(&mut self) {
        self.transitioned_count += 1;
    }

    pub fn skipped(&mut self, id: &TouristId, reason: SkipReason) {
        log::debug!("{id}: skipped ({reason})");
        *self.skipped_by_reason.entry(reason).or_insert(0) += 1;
    }

    pub fn failed(&mut self, id: Option<&TouristId>, err: &ReconcileError) {
        self.errors.push(RecordFailure {
            tourist_id: id.cloned(),
            kind: err.kind(),
            detail: err.to_string(),
        });
    }

    pub fn finish(self, finished_at: u64, interrupted: bool) -> RunSummary {
        let mut errors_by_kind = BTreeMap::new();
        for failure in &self.errors {
            *errors_by_kind.entry(failure.kind).or_insert(0) += 1;
        }
        RunSummary {
            started_at: self.started_at,
            finished_at,
            duration_ms: self.started.elapsed().as_millis() as u64,
            candidate_count: self.candidate_count,
            transitioned_count: self.transitioned_count,
            noop_count: self.noop_count,
            skipped_count: self.skipped_by_reason.values().sum(),
            skipped_by_reason: self.skipped_by_reason,
            errors_by_kind,
            errors: self.errors,
            interrupted,
        }
    }
}

/// Destination of cycle summaries.
pub trait SummarySink: Send + Sync {
    fn emit(&self, summary: &RunSummary);
}

impl<F> SummarySink for F
where
    F: Fn(&RunSummary) + Send + Sync,
{
    fn emit(&self, summary: &RunSummary) {
        self(summary)
    }
}

/// Writes summaries through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl SummarySink for LogSink {
    fn emit(&self, summary: &RunSummary) {
        match serde_json::to_string(summary) {
            Ok(json) => log::info!("reconciliation cycle finished: {json}"),
            Err(e) => log::error!("could not encode run summary: {e}"),
        }
        for failure in &summary.errors {
            match &failure.tourist_id {
                Some(id) => log::warn!("{id}: {} ({})", failure.detail, failure.kind),
                None => log::warn!("cycle: {} ({})", failure.detail, failure.kind),
            }
        }
    }
}
