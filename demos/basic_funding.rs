//! Basic matching and settlement example.
//!
//! Demonstrates how the funding engine splits a loan across investors
//! and settles the transfer atomically.

use funding_engine::core::account::AccountId;
use funding_engine::core::funding::{FundingSource, SourceId};
use funding_engine::core::loan::LoanRequest;
use funding_engine::matching::engine::MatchingEngine;
use funding_engine::matching::policy::MatchPolicy;
use funding_engine::settlement::coordinator::SettlementCoordinator;
use funding_engine::settlement::memory::InMemoryLedger;
use funding_engine::settlement::record::IdempotencyKey;
use rust_decimal_macros::dec;

fn main() {
    println!("╔═══════════════════════════════════════════╗");
    println!("║  funding-engine: Basic Funding Example    ║");
    println!("╚═══════════════════════════════════════════╝\n");

    // --- Scenario 1: Matching ---
    println!("━━━ Scenario 1: Greedy Matching ━━━\n");

    let borrower = AccountId::new("USR-BORROWER-01");
    let loan = LoanRequest::new(borrower.clone(), dec!(300));
    let sources = vec![
        FundingSource::new(SourceId::new("A"), AccountId::new("USR-INV-A"), dec!(200)),
        FundingSource::new(SourceId::new("B"), AccountId::new("USR-INV-B"), dec!(150)),
        FundingSource::new(SourceId::new("C"), AccountId::new("USR-INV-C"), dec!(50)),
    ];
    let policy = MatchPolicy::new(3, dec!(50));

    let allocation = MatchingEngine::match_loan(&loan, &sources, &policy)
        .expect("pool covers the request");
    println!("{}\n", allocation);

    // --- Scenario 2: Settlement ---
    println!("━━━ Scenario 2: Two-Phase Settlement ━━━\n");

    let ledger = InMemoryLedger::new();
    ledger.insert_loan(loan.clone());
    for source in &sources {
        ledger.insert_source(source.clone());
    }

    let coordinator = SettlementCoordinator::new(&ledger);
    let record = coordinator
        .settle(&allocation, &IdempotencyKey::new("demo-settle-1"))
        .expect("settlement commits");

    println!("Settlement status:  {}", record.status());
    println!("Borrower wallet:    {}", ledger.wallet_balance(&borrower));
    for id in ["A", "B", "C"] {
        let source = ledger.funding_source(&SourceId::new(id)).unwrap();
        println!(
            "  {:<4} available {:>6}  reserved {:>4}",
            id,
            source.available(),
            source.reserved()
        );
    }

    // --- Scenario 3: Idempotent replay ---
    println!("\n━━━ Scenario 3: Idempotent Replay ━━━\n");

    let replay = coordinator
        .settle(&allocation, &IdempotencyKey::new("demo-settle-1"))
        .expect("replay returns the stored record");
    println!(
        "Replay returned record {} with status {}, wallet still {}",
        replay.id(),
        replay.status(),
        ledger.wallet_balance(&borrower)
    );
}
