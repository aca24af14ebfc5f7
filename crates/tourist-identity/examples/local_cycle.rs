//! Local Cycle: register a few identities on an in-process ledger, let the
//! clock run past their end times, and reconcile.
//!
//! Run with:
//!   cargo run --example local_cycle -p tourist-identity

use std::sync::Arc;
use std::time::Duration;

use tourist_identity::{
    is_trackable, EnumerationStrategy, LedgerClient, LedgerClientOptions, LocalLedger,
    ManualClock, Reconciler, Registration, SignerKeyPair, TouristId,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── 1. A ledger and a clock we control ──────────────────────────────────
    let clock = ManualClock::new(1_760_000_000);
    let ledger = Arc::new(LocalLedger::new("0xDemoRegistry", Arc::new(clock.clone())));

    let mut options = LedgerClientOptions::new("0xDemoRegistry");
    options.receipt_poll_interval = Duration::from_millis(5);
    let client = LedgerClient::new(ledger.clone(), SignerKeyPair::generate(), options);
    println!("Signer: {}", client.signer_address());

    // ── 2. Register identities valid for one hour and one week ──────────────
    for (id, secs) in [("T202510-10001", 3_600), ("T202510-10002", 604_800)] {
        let receipt = client
            .submit_registration(Registration::new(TouristId::new(id), "QmDemoKyc", secs))
            .await?;
        println!("Registered {id}: {receipt:?}");
    }

    // ── 3. Two hours later, the first one has expired ───────────────────────
    clock.advance(7_200);
    let reconciler = Reconciler::new(
        client.clone(),
        EnumerationStrategy::EventReplay,
        Arc::new(clock.clone()),
    );
    let summary = reconciler.run_once().await;
    println!();
    println!("{}", serde_json::to_string_pretty(&summary)?);

    // ── 4. Inspect the result ───────────────────────────────────────────────
    println!();
    for id in ["T202510-10001", "T202510-10002"] {
        let record = client.fetch_record(&TouristId::new(id)).await?;
        println!(
            "{id}: {} (trackable: {})",
            record.status,
            is_trackable(&record, 1_760_007_200)
        );
    }

    client.shutdown().await;
    Ok(())
}
