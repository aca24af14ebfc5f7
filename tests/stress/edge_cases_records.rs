//! Edge cases: boundary timestamps, odd identity keys, duplicate
//! enumeration output, and registrations the ledger must refuse.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tourist_identity::ledger::{RegistrationEvent, SignedTransaction, TxHash, TxReceipt};
use tourist_identity::{
    classify, is_trackable, Classification, EnumerationStrategy, ErrorKind, IdentityRecord,
    IdentityStatus, LedgerClient, LedgerClientOptions, LedgerTransport, LocalLedger, ManualClock,
    ReconcileError, Reconciler, Registration, RejectCode, Result, SignerAddress, SignerKeyPair,
    SkipReason, StakeholderRole, SubmissionReceipt, TouristId,
};

const NOW: u64 = 1_760_000_000;
const REGISTRY: &str = "0xEdgeRegistry";

fn record(id: &str, end_time: u64, status: IdentityStatus) -> IdentityRecord {
    IdentityRecord {
        tourist_id: TouristId::new(id),
        registered_by: SignerAddress("tsa_edge".into()),
        stakeholder_role: StakeholderRole::TourOperator,
        kyc_hash: "QmKyc".into(),
        start_time: 0,
        end_time,
        last_update_time: 0,
        status,
    }
}

fn options() -> LedgerClientOptions {
    let mut options = LedgerClientOptions::new(REGISTRY);
    options.call_timeout = Duration::from_secs(5);
    options.receipt_poll_interval = Duration::from_millis(1);
    options.replay_page_blocks = 3;
    options
}

fn setup() -> (Arc<LocalLedger>, ManualClock, Reconciler) {
    let clock = ManualClock::new(NOW);
    let ledger = Arc::new(LocalLedger::new(REGISTRY, Arc::new(clock.clone())));
    let client = LedgerClient::new(ledger.clone(), SignerKeyPair::generate(), options());
    let reconciler = Reconciler::new(client, EnumerationStrategy::Direct, Arc::new(clock.clone()));
    (ledger, clock, reconciler)
}

// ── Timestamps ───────────────────────────────────────────────────────────────

#[test]
fn edge_classification_extremes() {
    let epoch = record("T-epoch", 0, IdentityStatus::Active);
    assert_eq!(classify(&epoch, 0), Classification::NoOp);
    assert_eq!(classify(&epoch, 1), Classification::Transition);

    let forever = record("T-forever", u64::MAX, IdentityStatus::Active);
    assert_eq!(classify(&forever, u64::MAX), Classification::NoOp);
    assert!(is_trackable(&forever, u64::MAX));

    let suspended = record("T-susp", u64::MAX, IdentityStatus::Suspended);
    assert_eq!(
        classify(&suspended, 0),
        Classification::Skip(SkipReason::NonActive)
    );
    assert!(!is_trackable(&suspended, 0));
}

#[tokio::test]
async fn edge_end_time_zero_and_max() {
    let (ledger, _clock, reconciler) = setup();
    ledger.seed(record("T-epoch", 0, IdentityStatus::Active)).unwrap();
    ledger
        .seed(record("T-forever", u64::MAX, IdentityStatus::Active))
        .unwrap();

    let summary = reconciler.run_once().await;
    assert_eq!(summary.transitioned_count, 1);
    assert_eq!(summary.noop_count, 1);
    assert_eq!(
        ledger.record(&TouristId::new("T-epoch")).unwrap().unwrap().status,
        IdentityStatus::Inactive
    );
    assert_eq!(
        ledger.record(&TouristId::new("T-forever")).unwrap().unwrap().status,
        IdentityStatus::Active
    );

    reconciler.client().shutdown().await;
}

#[tokio::test]
async fn edge_zero_duration_registration() {
    let (ledger, clock, reconciler) = setup();
    let id = TouristId::new("T-instant");
    reconciler
        .client()
        .submit_registration(Registration::new(id.clone(), "QmKyc", 0))
        .await
        .unwrap();

    let stored = ledger.record(&id).unwrap().unwrap();
    assert_eq!(stored.start_time, NOW);
    assert_eq!(stored.end_time, NOW);
    assert_eq!(stored.duration_secs(), 0);

    // Valid for exactly its registration second.
    assert_eq!(reconciler.run_once().await.noop_count, 1);
    clock.advance(1);
    assert_eq!(reconciler.run_once().await.transitioned_count, 1);

    reconciler.client().shutdown().await;
}

#[tokio::test]
async fn edge_duration_overflow_saturates() {
    let (ledger, _clock, reconciler) = setup();
    let id = TouristId::new("T-saturated");
    reconciler
        .client()
        .submit_registration(Registration::new(id.clone(), "QmKyc", u64::MAX))
        .await
        .unwrap();

    assert_eq!(ledger.record(&id).unwrap().unwrap().end_time, u64::MAX);
    assert_eq!(reconciler.run_once().await.noop_count, 1);

    reconciler.client().shutdown().await;
}

// ── Identity keys ────────────────────────────────────────────────────────────

#[tokio::test]
async fn edge_unusual_identity_keys() {
    let (ledger, _clock, reconciler) = setup();
    let long = "T".repeat(4_096);
    let keys = [
        "",
        " ",
        "T 2025 10 - 1",
        "टूरिस्ट-१",
        "旅行者-42",
        "🧳-emoji",
        "T\n\tcontrol",
        long.as_str(),
    ];
    for key in keys {
        ledger.seed(record(key, NOW - 1, IdentityStatus::Active)).unwrap();
    }

    for strategy in [EnumerationStrategy::Direct, EnumerationStrategy::EventReplay] {
        let ids = reconciler
            .client()
            .enumerate_identities(strategy)
            .collect()
            .await
            .unwrap();
        assert_eq!(ids.len(), keys.len(), "{strategy}");
    }

    let summary = reconciler.run_once().await;
    assert!(!summary.has_errors(), "errors: {:?}", summary.errors);
    assert_eq!(summary.transitioned_count, keys.len());
    for key in keys {
        assert_eq!(
            ledger.record(&TouristId::new(key)).unwrap().unwrap().status,
            IdentityStatus::Inactive
        );
    }

    reconciler.client().shutdown().await;
}

#[tokio::test]
async fn edge_unknown_stakeholder_code_is_kept() {
    let (ledger, _clock, reconciler) = setup();
    let id = TouristId::new("T-hotel");
    let mut registration = Registration::new(id.clone(), "QmKyc", 60);
    registration.stakeholder = StakeholderRole::from(250);
    reconciler
        .client()
        .submit_registration(registration)
        .await
        .unwrap();

    let stored = reconciler.client().fetch_record(&id).await.unwrap();
    assert_eq!(stored.stakeholder_role, StakeholderRole::Other(250));
    assert_eq!(stored, ledger.record(&id).unwrap().unwrap());

    let json = serde_json::to_value(&stored).unwrap();
    assert_eq!(json["stakeholderRole"], 250);
    assert_eq!(json["touristID"], "T-hotel");

    reconciler.client().shutdown().await;
}

// ── Duplicate enumeration output ─────────────────────────────────────────────

/// Reports every key twice, in listings and in replayed events.
struct EchoLedger {
    inner: Arc<LocalLedger>,
}

#[async_trait]
impl LedgerTransport for EchoLedger {
    async fn get_record(&self, id: &TouristId) -> Result<Option<IdentityRecord>> {
        self.inner.get_record(id).await
    }

    async fn list_identity_ids(&self) -> Result<Vec<TouristId>> {
        let ids = self.inner.list_identity_ids().await?;
        Ok(ids.iter().chain(ids.iter()).cloned().collect())
    }

    async fn head_block(&self) -> Result<u64> {
        self.inner.head_block().await
    }

    async fn registration_events(&self, from: u64, to: u64) -> Result<Vec<RegistrationEvent>> {
        let events = self.inner.registration_events(from, to).await?;
        Ok(events
            .iter()
            .flat_map(|e| [e.clone(), e.clone()])
            .collect())
    }

    async fn next_sequence(&self, signer: &SignerAddress) -> Result<u64> {
        self.inner.next_sequence(signer).await
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<TxHash> {
        self.inner.send_transaction(tx).await
    }

    async fn transaction_receipt(&self, hash: &TxHash) -> Result<Option<TxReceipt>> {
        self.inner.transaction_receipt(hash).await
    }
}

#[tokio::test]
async fn edge_duplicate_keys_are_visited_once() {
    let clock = ManualClock::new(NOW);
    let ledger = Arc::new(LocalLedger::new(REGISTRY, Arc::new(clock.clone())));
    for i in 0..10 {
        ledger
            .seed(record(&format!("T-dup-{i}"), NOW - 1, IdentityStatus::Active))
            .unwrap();
    }
    let signer = SignerKeyPair::generate();
    let address = signer.address();
    let transport = Arc::new(EchoLedger {
        inner: ledger.clone(),
    });

    for strategy in [EnumerationStrategy::Direct, EnumerationStrategy::EventReplay] {
        let client = LedgerClient::new(
            transport.clone(),
            SignerKeyPair::from_seed(&signer.seed_bytes()),
            options(),
        );
        let reconciler = Reconciler::new(client, strategy, Arc::new(clock.clone()));
        let summary = reconciler.run_once().await;
        assert_eq!(summary.candidate_count, 10, "{strategy}");
        assert!(!summary.has_errors());
        reconciler.client().shutdown().await;
    }

    // Ten inactivations in total: one per key, none repeated by the second pass.
    assert_eq!(ledger.next_sequence(&address).await.unwrap(), 10);
}

// ── Refused writes ───────────────────────────────────────────────────────────

#[tokio::test]
async fn edge_empty_registry() {
    let (_ledger, _clock, reconciler) = setup();
    let summary = reconciler.run_once().await;
    assert_eq!(summary.candidate_count, 0);
    assert_eq!(summary.transitioned_count, 0);
    assert!(!summary.has_errors());
    assert!(!summary.interrupted);
    reconciler.client().shutdown().await;
}

#[tokio::test]
async fn edge_settled_records_cost_no_writes() {
    let (ledger, _clock, reconciler) = setup();
    ledger
        .seed(record("T-old-inactive", 1, IdentityStatus::Inactive))
        .unwrap();
    ledger
        .seed(record("T-old-suspended", 1, IdentityStatus::Suspended))
        .unwrap();
    let address = reconciler.client().signer_address().clone();

    let summary = reconciler.run_once().await;
    assert_eq!(summary.skipped(SkipReason::NonActive), 2);
    assert_eq!(ledger.next_sequence(&address).await.unwrap(), 0);
    assert_eq!(
        ledger.record(&TouristId::new("T-old-suspended")).unwrap().unwrap().status,
        IdentityStatus::Suspended
    );

    reconciler.client().shutdown().await;
}

#[tokio::test]
async fn edge_duplicate_registration_rejected() {
    let (_ledger, _clock, reconciler) = setup();
    let client = reconciler.client();
    let id = TouristId::new("T-twice");
    client
        .submit_registration(Registration::new(id.clone(), "QmKyc", 60))
        .await
        .unwrap();

    let err = client
        .submit_registration(Registration::new(id, "QmOther", 60))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::LedgerRejected {
            code: RejectCode::DuplicateId,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::LedgerRejected);

    client.shutdown().await;
}

#[tokio::test]
async fn edge_suspended_registration_refused_locally() {
    let (ledger, _clock, reconciler) = setup();
    let mut registration = Registration::new(TouristId::new("T-born-suspended"), "QmKyc", 60);
    registration.initial_status = IdentityStatus::Suspended;

    let err = reconciler
        .client()
        .submit_registration(registration)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Configuration(_)));
    assert_eq!(ledger.record_count().unwrap(), 0);

    reconciler.client().shutdown().await;
}

#[tokio::test]
async fn edge_inactivating_unknown_key() {
    let (_ledger, _clock, reconciler) = setup();
    let err = reconciler
        .client()
        .submit_inactivation(&TouristId::new("T-nobody"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::NotFound(_)));

    // A second inactivation of a settled key is a no-op, not an error.
    reconciler
        .client()
        .submit_registration(Registration::new(TouristId::new("T-once"), "QmKyc", 0))
        .await
        .unwrap();
    let id = TouristId::new("T-once");
    assert!(reconciler.client().submit_inactivation(&id).await.unwrap().is_confirmed());
    assert_eq!(
        reconciler.client().submit_inactivation(&id).await.unwrap(),
        SubmissionReceipt::AlreadySettled {
            status: Some(IdentityStatus::Inactive)
        }
    );

    reconciler.client().shutdown().await;
}
