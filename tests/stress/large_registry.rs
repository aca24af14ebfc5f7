//! Stress test: a registry of 3000 identities reconciled under both
//! enumeration strategies, with event replay paged in small block windows.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tourist_identity::{
    EnumerationStrategy, IdentityRecord, IdentityStatus, LedgerClient, LedgerClientOptions,
    LocalLedger, ManualClock, Reconciler, SignerAddress, SignerKeyPair, SkipReason,
    StakeholderRole, TouristId,
};

const NOW: u64 = 1_760_000_000;
const REGISTRY: &str = "0xLargeRegistry";
const RECORDS: usize = 3_000;

/// Every third record is Active and expired, every third is Active and
/// current, the rest are settled (alternating Inactive and Suspended).
fn record(i: usize) -> IdentityRecord {
    let (end_time, status) = match i % 3 {
        0 => (NOW - 1 - i as u64, IdentityStatus::Active),
        1 => (NOW + 1 + i as u64, IdentityStatus::Active),
        _ if i % 2 == 0 => (NOW - 10, IdentityStatus::Inactive),
        _ => (NOW + 10, IdentityStatus::Suspended),
    };
    IdentityRecord {
        tourist_id: TouristId::new(format!("T202510-{i:05}")),
        registered_by: SignerAddress("tsa_bulk".into()),
        stakeholder_role: StakeholderRole::from((i % 4) as u8),
        kyc_hash: format!("QmKyc{i}"),
        start_time: NOW - 604_800,
        end_time,
        last_update_time: NOW - 604_800,
        status,
    }
}

fn populated() -> (Arc<LocalLedger>, ManualClock) {
    let clock = ManualClock::new(NOW);
    let ledger = Arc::new(LocalLedger::new(REGISTRY, Arc::new(clock.clone())));
    for i in 0..RECORDS {
        ledger.seed(record(i)).unwrap();
    }
    (ledger, clock)
}

fn reconciler(
    ledger: Arc<LocalLedger>,
    clock: ManualClock,
    strategy: EnumerationStrategy,
) -> Reconciler {
    let mut options = LedgerClientOptions::new(REGISTRY);
    options.receipt_poll_interval = Duration::from_millis(1);
    options.replay_page_blocks = 7;
    let client = LedgerClient::new(ledger, SignerKeyPair::generate(), options);
    Reconciler::new(client, strategy, Arc::new(clock)).with_fetch_concurrency(16)
}

async fn reconcile_large_registry(strategy: EnumerationStrategy) {
    let (ledger, clock) = populated();
    let reconciler = reconciler(ledger.clone(), clock, strategy);

    let expired = (0..RECORDS).filter(|i| i % 3 == 0).count();
    let current = (0..RECORDS).filter(|i| i % 3 == 1).count();

    let start = Instant::now();
    let summary = reconciler.run_once().await;
    let elapsed = start.elapsed();
    eprintln!("{strategy}: reconciled {RECORDS} records in {elapsed:?}");

    assert!(!summary.has_errors(), "errors: {:?}", summary.errors);
    assert!(!summary.interrupted);
    assert_eq!(summary.candidate_count, RECORDS);
    assert_eq!(summary.transitioned_count, expired);
    assert_eq!(summary.noop_count, current);
    assert_eq!(
        summary.skipped(SkipReason::NonActive),
        RECORDS - expired - current
    );

    for i in (0..RECORDS).step_by(3) {
        let id = TouristId::new(format!("T202510-{i:05}"));
        let after = ledger.record(&id).unwrap().unwrap();
        assert_eq!(after.status, IdentityStatus::Inactive);
        assert_eq!(after.last_update_time, NOW);
    }

    // Converged: the next cycle has nothing left to do.
    let again = reconciler.run_once().await;
    assert_eq!(again.candidate_count, RECORDS);
    assert_eq!(again.transitioned_count, 0);
    assert_eq!(again.noop_count, current);

    reconciler.client().shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_3k_records_direct_listing() {
    reconcile_large_registry(EnumerationStrategy::Direct).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_3k_records_event_replay() {
    reconcile_large_registry(EnumerationStrategy::EventReplay).await;
}

#[tokio::test]
async fn stress_both_strategies_enumerate_the_same_keys() {
    let (ledger, clock) = populated();
    let direct = reconciler(ledger.clone(), clock.clone(), EnumerationStrategy::Direct);

    let listed = direct
        .client()
        .enumerate_identities(EnumerationStrategy::Direct)
        .collect()
        .await
        .unwrap();
    let replayed = direct
        .client()
        .enumerate_identities(EnumerationStrategy::EventReplay)
        .collect()
        .await
        .unwrap();

    assert_eq!(listed.len(), RECORDS);
    assert_eq!(replayed.len(), RECORDS);
    assert_eq!(
        listed.iter().collect::<HashSet<_>>(),
        replayed.iter().collect::<HashSet<_>>()
    );

    direct.client().shutdown().await;
}

#[tokio::test]
async fn stress_mass_expiry_after_clock_advance() {
    let (ledger, clock) = populated();
    let reconciler = reconciler(ledger.clone(), clock.clone(), EnumerationStrategy::Direct);

    reconciler.run_once().await;

    // Jump past every end time; the current records expire too.
    clock.advance(2 * RECORDS as u64 + 60);
    let summary = reconciler.run_once().await;
    let current = (0..RECORDS).filter(|i| i % 3 == 1).count();
    assert_eq!(summary.transitioned_count, current);
    assert_eq!(summary.noop_count, 0);

    let active = (0..RECORDS)
        .map(|i| ledger.record(&TouristId::new(format!("T202510-{i:05}"))).unwrap().unwrap())
        .filter(|r| r.status == IdentityStatus::Active)
        .count();
    assert_eq!(active, 0);

    reconciler.client().shutdown().await;
}
