//! One reconciliation cycle: enumerate, fetch, classify, transition.
//!
//! Fetches are read-only and run ahead of the processing point, at most
//! `fetch_concurrency` at a time; their results are consumed strictly in
//! enumeration order. Inactivations go through the client's submission
//! lane one by one. No per-record failure ends the cycle early; only a
//! shutdown request does, and then only between records.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::classify::{classify, Classification, SkipReason};
use crate::enumerate::EnumerationStrategy;
use crate::error::{ReconcileError, Result};
use crate::identity::{IdentityRecord, TouristId};
use crate::ledger::{LedgerClient, SubmissionReceipt};
use crate::report::{RunReporter, RunSummary};
use crate::time::Clock;

/// Default bound on concurrent record fetches.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

type PendingFetch = (TouristId, JoinHandle<Result<IdentityRecord>>);

/// Runs reconciliation cycles against one ledger client.
pub struct Reconciler {
    client: LedgerClient,
    strategy: EnumerationStrategy,
    clock: Arc<dyn Clock>,
    fetch_concurrency: usize,
}

impl Reconciler {
    pub fn new(client: LedgerClient, strategy: EnumerationStrategy, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            strategy,
            clock,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }

    pub fn with_fetch_concurrency(mut self, fetch_concurrency: usize) -> Self {
        self.fetch_concurrency = fetch_concurrency.max(1);
        self
    }

    pub fn client(&self) -> &LedgerClient {
        &self.client
    }

    pub fn strategy(&self) -> EnumerationStrategy {
        self.strategy
    }

    /// Run a single cycle with no shutdown signal attached.
    pub async fn run_once(&self) -> RunSummary {
        let (_keep, shutdown) = watch::channel(false);
        self.run_cycle(&shutdown).await
    }

    /// Run one full cycle. Stops between records once `shutdown` reads
    /// `true`, marking the summary as interrupted.
    pub async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) -> RunSummary {
        let mut reporter = RunReporter::start(self.clock.now_secs());
        let mut cursor = self.client.enumerate_identities(self.strategy);
        let mut pending: VecDeque<PendingFetch> = VecDeque::with_capacity(self.fetch_concurrency);
        let mut exhausted = false;
        let mut interrupted = false;

        log::debug!(
            "reconciliation cycle started on {} ({} enumeration)",
            self.client.options().registry_address,
            self.strategy
        );

        loop {
            if *shutdown.borrow() {
                interrupted = true;
                break;
            }

            while !exhausted && pending.len() < self.fetch_concurrency {
                match cursor.next().await {
                    Ok(Some(id)) => pending.push_back(self.spawn_fetch(id)),
                    Ok(None) => exhausted = true,
                    Err(e) => {
                        log::error!("enumeration aborted after {} keys: {e}", cursor.yielded());
                        reporter.failed(None, &e);
                        exhausted = true;
                    }
                }
            }

            let Some((id, fetch)) = pending.pop_front() else {
                break;
            };
            reporter.candidate();

            let fetched = match fetch.await {
                Ok(result) => result,
                Err(e) => Err(ReconcileError::TaskFailed(e.to_string())),
            };
            self.process(&id, fetched, &mut reporter).await;
        }

        for (_, fetch) in pending {
            fetch.abort();
        }

        if interrupted {
            log::info!("reconciliation cycle interrupted by shutdown");
        }
        reporter.finish(self.clock.now_secs(), interrupted)
    }

    fn spawn_fetch(&self, id: TouristId) -> PendingFetch {
        let client = self.client.clone();
        let key = id.clone();
        let handle = tokio::spawn(async move { client.fetch_record(&key).await });
        (id, handle)
    }

    async fn process(
        &self,
        id: &TouristId,
        fetched: Result<IdentityRecord>,
        reporter: &mut RunReporter,
    ) {
        let record = match fetched {
            Ok(record) => record,
            Err(ReconcileError::NotFound(_)) => {
                log::info!("{id} vanished between enumeration and fetch");
                reporter.skipped(id, SkipReason::Vanished);
                return;
            }
            Err(e) => {
                log::warn!("{id}: fetch failed: {e}");
                reporter.failed(Some(id), &e);
                return;
            }
        };

        let now = self.clock.now_secs();
        match classify(&record, now) {
            Classification::NoOp => {
                log::debug!("{id}: valid until {}", record.end_time);
                reporter.noop();
            }
            Classification::Skip(reason) => reporter.skipped(id, reason),
            Classification::Transition => {
                log::debug!("{id}: expired at {} (now {now}), inactivating", record.end_time);
                match self.client.submit_inactivation(id).await {
                    Ok(SubmissionReceipt::Confirmed { hash, block }) => {
                        log::info!("{id}: inactivated in block {block} (tx {hash})");
                        reporter.transitioned();
                    }
                    Ok(SubmissionReceipt::AlreadySettled { .. }) => {
                        reporter.skipped(id, SkipReason::SettledConcurrently);
                    }
                    Err(ReconcileError::NotFound(_)) => {
                        reporter.skipped(id, SkipReason::Vanished);
                    }
                    Err(e) => {
                        log::warn!("{id}: inactivation failed: {e}");
                        reporter.failed(Some(id), &e);
                    }
                }
            }
        }
    }
}
