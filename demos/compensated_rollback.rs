//! Compensation example.
//!
//! Injects a store failure mid-commit and shows the coordinator
//! reversing every applied balance change, leaving the loan
//! re-matchable.

use funding_engine::core::account::AccountId;
use funding_engine::core::funding::{FundingSource, SourceId};
use funding_engine::core::loan::LoanRequest;
use funding_engine::matching::engine::MatchingEngine;
use funding_engine::matching::policy::MatchPolicy;
use funding_engine::settlement::coordinator::{SettlementCoordinator, SettlementError};
use funding_engine::settlement::memory::InMemoryLedger;
use funding_engine::settlement::record::IdempotencyKey;
use funding_engine::settlement::store::LedgerStore;
use funding_engine::simulation::fault::{FaultMode, FaultyStore};
use rust_decimal_macros::dec;

fn main() {
    println!("╔═══════════════════════════════════════════════╗");
    println!("║  funding-engine: Compensated Rollback Example ║");
    println!("╚═══════════════════════════════════════════════╝\n");

    let borrower = AccountId::new("USR-BORROWER-01");
    let loan = LoanRequest::new(borrower.clone(), dec!(300));
    let sources = vec![
        FundingSource::new(SourceId::new("A"), AccountId::new("USR-INV-A"), dec!(200)),
        FundingSource::new(SourceId::new("B"), AccountId::new("USR-INV-B"), dec!(150)),
    ];

    let ledger = InMemoryLedger::new();
    ledger.insert_loan(loan.clone());
    for source in &sources {
        ledger.insert_source(source.clone());
    }

    let allocation = MatchingEngine::match_loan(&loan, &sources, &MatchPolicy::default())
        .expect("pool covers the request");

    // Reserving two sources costs 4 balance mutations and debiting them
    // 2 more; the 7th mutation is the borrower credit, which fails.
    let faulty = FaultyStore::new(ledger, 6, FaultMode::Once);
    let coordinator = SettlementCoordinator::new(&faulty);

    println!("Settling 300 across A:200 and B:100 with the borrower credit failing...\n");
    match coordinator.settle(&allocation, &IdempotencyKey::new("demo-rollback-1")) {
        Err(SettlementError::PartialFailureCompensated {
            record,
            failed_step,
        }) => {
            println!("Failed step:    {}", failed_step);
            println!("Record status:  {}", record.status());
        }
        other => println!("Unexpected outcome: {:?}", other.map(|r| r.status())),
    }

    let ledger = faulty.into_inner();
    println!("\nAfter compensation:");
    println!("  Borrower wallet: {}", ledger.wallet_balance(&borrower));
    for id in ["A", "B"] {
        let source = ledger.funding_source(&SourceId::new(id)).unwrap();
        println!(
            "  {:<4} available {:>6}  reserved {:>4}",
            id,
            source.available(),
            source.reserved()
        );
    }
    let loan_after = ledger
        .read_loan_request(loan.id())
        .expect("loan still stored");
    println!("  Loan status:     {} (re-matchable)", loan_after.status());
}
