//! Stress test: many concurrent callers funnel writes through one signer's
//! submission lane. At most one transaction may be outstanding at a time and
//! no write may collide on its sequence number.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use tourist_identity::ledger::{RegistrationEvent, SignedTransaction, TxHash, TxReceipt};
use tourist_identity::{
    IdentityRecord, IdentityStatus, LedgerClient, LedgerClientOptions, LedgerTransport,
    LocalLedger, ManualClock, ReconcileError, Registration, RejectCode, Result, SignerAddress,
    SignerKeyPair, SubmissionReceipt, TouristId,
};

const REGISTRY: &str = "0xLaneRegistry";

/// Tracks how many sent transactions have not had their receipt observed.
struct CountingLedger {
    inner: Arc<LocalLedger>,
    pending: Mutex<HashSet<String>>,
    max_pending: AtomicUsize,
    bad_sequence: AtomicUsize,
    sends: AtomicUsize,
}

impl CountingLedger {
    fn new(inner: Arc<LocalLedger>) -> Self {
        Self {
            inner,
            pending: Mutex::new(HashSet::new()),
            max_pending: AtomicUsize::new(0),
            bad_sequence: AtomicUsize::new(0),
            sends: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LedgerTransport for CountingLedger {
    async fn get_record(&self, id: &TouristId) -> Result<Option<IdentityRecord>> {
        self.inner.get_record(id).await
    }

    async fn list_identity_ids(&self) -> Result<Vec<TouristId>> {
        self.inner.list_identity_ids().await
    }

    async fn head_block(&self) -> Result<u64> {
        self.inner.head_block().await
    }

    async fn registration_events(&self, from: u64, to: u64) -> Result<Vec<RegistrationEvent>> {
        self.inner.registration_events(from, to).await
    }

    async fn next_sequence(&self, signer: &SignerAddress) -> Result<u64> {
        self.inner.next_sequence(signer).await
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<TxHash> {
        // Give other tasks a chance to run while this write is in flight.
        tokio::task::yield_now().await;
        self.sends.fetch_add(1, Ordering::SeqCst);
        match self.inner.send_transaction(tx).await {
            Ok(hash) => {
                let mut pending = self.pending.lock().unwrap();
                pending.insert(hash.0.clone());
                self.max_pending.fetch_max(pending.len(), Ordering::SeqCst);
                Ok(hash)
            }
            Err(e) => {
                if matches!(
                    e,
                    ReconcileError::LedgerRejected {
                        code: RejectCode::BadSequence,
                        ..
                    }
                ) {
                    self.bad_sequence.fetch_add(1, Ordering::SeqCst);
                }
                Err(e)
            }
        }
    }

    async fn transaction_receipt(&self, hash: &TxHash) -> Result<Option<TxReceipt>> {
        let receipt = self.inner.transaction_receipt(hash).await?;
        if receipt.is_some() {
            self.pending.lock().unwrap().remove(&hash.0);
        }
        Ok(receipt)
    }
}

fn options() -> LedgerClientOptions {
    let mut options = LedgerClientOptions::new(REGISTRY);
    options.call_timeout = Duration::from_secs(5);
    options.receipt_poll_interval = Duration::from_millis(1);
    options
}

fn setup(signer: SignerKeyPair) -> (Arc<LocalLedger>, Arc<CountingLedger>, LedgerClient) {
    let ledger = Arc::new(LocalLedger::new(
        REGISTRY,
        Arc::new(ManualClock::new(1_760_000_000)),
    ));
    let counting = Arc::new(CountingLedger::new(ledger.clone()));
    let client = LedgerClient::new(counting.clone(), signer, options());
    (ledger, counting, client)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_500_concurrent_registrations_single_lane() {
    let signer = SignerKeyPair::generate();
    let address = signer.address();
    let (ledger, counting, client) = setup(signer);

    let mut tasks = Vec::new();
    for worker in 0..10 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let mut receipts = Vec::new();
            for i in 0..50 {
                let id = TouristId::new(format!("T{worker:02}-{i:03}"));
                let receipt = client
                    .submit_registration(Registration::new(id, "QmKyc", 3_600))
                    .await
                    .expect("registration should succeed");
                receipts.push(receipt);
            }
            receipts
        }));
    }

    let mut blocks = HashSet::new();
    for task in tasks {
        for receipt in task.await.unwrap() {
            match receipt {
                SubmissionReceipt::Confirmed { block, .. } => assert!(blocks.insert(block)),
                other => panic!("unexpected receipt {other:?}"),
            }
        }
    }

    assert_eq!(blocks.len(), 500);
    assert_eq!(ledger.record_count().unwrap(), 500);
    assert_eq!(counting.max_pending.load(Ordering::SeqCst), 1);
    assert_eq!(counting.bad_sequence.load(Ordering::SeqCst), 0);
    assert_eq!(counting.sends.load(Ordering::SeqCst), 500);
    assert_eq!(ledger.next_sequence(&address).await.unwrap(), 500);

    client.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_concurrent_inactivation_of_one_record() {
    let (ledger, counting, client) = setup(SignerKeyPair::generate());
    let id = TouristId::new("T202510-00001");
    client
        .submit_registration(Registration::new(id.clone(), "QmKyc", 60))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..32 {
        let client = client.clone();
        let id = id.clone();
        tasks.push(tokio::spawn(
            async move { client.submit_inactivation(&id).await },
        ));
    }

    let mut confirmed = 0;
    let mut settled = 0;
    for task in tasks {
        match task.await.unwrap().expect("inactivation should not fail") {
            SubmissionReceipt::Confirmed { .. } => confirmed += 1,
            SubmissionReceipt::AlreadySettled { status } => {
                assert_eq!(status, Some(IdentityStatus::Inactive));
                settled += 1;
            }
        }
    }

    assert_eq!(confirmed, 1);
    assert_eq!(settled, 31);
    assert_eq!(
        ledger.record(&id).unwrap().unwrap().status,
        IdentityStatus::Inactive
    );
    assert_eq!(counting.max_pending.load(Ordering::SeqCst), 1);
    assert_eq!(counting.bad_sequence.load(Ordering::SeqCst), 0);

    client.shutdown().await;
}

#[tokio::test]
async fn stress_lane_resyncs_after_foreign_writes() {
    // Two lanes signing with the same key: each write from one lane makes
    // the other's cached sequence stale.
    let seed = [7u8; 32];
    let (ledger, counting, first) = setup(SignerKeyPair::from_seed(&seed));
    let second = LedgerClient::new(counting.clone(), SignerKeyPair::from_seed(&seed), options());

    for i in 0..100 {
        let lane = if i % 2 == 0 { &first } else { &second };
        let id = TouristId::new(format!("T-alt-{i:03}"));
        let receipt = lane
            .submit_registration(Registration::new(id, "QmKyc", 60))
            .await
            .expect("resubmission after resync should succeed");
        assert!(receipt.is_confirmed());
    }

    assert_eq!(ledger.record_count().unwrap(), 100);
    // The first write of each lane reads a fresh sequence; every later one
    // collides once and is resubmitted.
    assert_eq!(counting.bad_sequence.load(Ordering::SeqCst), 98);
    assert_eq!(counting.sends.load(Ordering::SeqCst), 198);

    first.shutdown().await;
    second.shutdown().await;
}
