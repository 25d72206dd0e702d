//! funding-engine CLI
//!
//! Match and settle peer-to-peer loans from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Match a loan against a funding pool from a JSON file
//! funding-engine match --input round.json
//!
//! # Match and settle against an in-memory ledger, output as JSON
//! funding-engine settle --input round.json --format json
//!
//! # Generate a random funding round for testing
//! funding-engine generate --sources 20 --loans 5
//! ```

use funding_engine::core::account::AccountId;
use funding_engine::core::funding::{FundingSource, SourceId};
use funding_engine::core::loan::LoanRequest;
use funding_engine::matching::engine::MatchingEngine;
use funding_engine::matching::policy::MatchPolicy;
use funding_engine::settlement::coordinator::SettlementCoordinator;
use funding_engine::settlement::memory::InMemoryLedger;
use funding_engine::settlement::record::IdempotencyKey;
use funding_engine::simulation::stress_test::{
    generate_random_loans, generate_random_pool, PoolConfig,
};
use rust_decimal::Decimal;
use std::fs;
use std::process;

fn print_usage() {
    eprintln!(
        r#"funding-engine — open peer-to-peer loan funding and settlement

USAGE:
    funding-engine <COMMAND> [OPTIONS]

COMMANDS:
    match       Compute an allocation for each loan in a funding round
    settle      Match and settle a funding round against an in-memory ledger
    generate    Generate a random funding round (for testing)
    help        Show this message

OPTIONS (match, settle):
    --input <FILE>          Path to JSON funding round file
    --format <FORMAT>       Output format: text (default) or json
    --max-sources <N>       Max funding sources per loan (default: 10)
    --min-allocation <X>    Smallest slice worth allocating (default: 1)

OPTIONS (generate):
    --sources <N>       Number of funding sources (default: 20)
    --loans <N>         Number of loan requests (default: 10)
    --output <FILE>     Write to file instead of stdout

EXAMPLES:
    funding-engine match --input round.json
    funding-engine settle --input round.json --format json
    funding-engine match --input round.json --max-sources 3 --min-allocation 50
    funding-engine generate --sources 50 --loans 10 --output round.json"#
    );
}

/// JSON schema for an input funding round.
#[derive(serde::Deserialize)]
struct RoundFile {
    loans: Vec<LoanInput>,
    sources: Vec<SourceInput>,
}

#[derive(serde::Deserialize)]
struct LoanInput {
    borrower: String,
    amount: String,
}

#[derive(serde::Deserialize)]
struct SourceInput {
    id: String,
    owner: String,
    available: String,
}

/// JSON output schema for match results.
#[derive(serde::Serialize)]
struct MatchOutput {
    borrower: String,
    requested: String,
    outcome: String,
    slices: Vec<SliceOutput>,
}

#[derive(serde::Serialize)]
struct SliceOutput {
    source: String,
    amount: String,
}

#[derive(serde::Serialize)]
struct SettleOutput {
    borrower: String,
    requested: String,
    outcome: String,
    settlement_status: Option<String>,
    borrower_balance: String,
}

fn parse_decimal(raw: &str) -> Result<Decimal, String> {
    raw.parse()
        .map_err(|e| format!("Invalid amount '{}': {}", raw, e))
}

fn round_from_json(content: &str) -> Result<(Vec<LoanRequest>, Vec<FundingSource>), String> {
    let file: RoundFile =
        serde_json::from_str(content).map_err(|e| format!("Error parsing JSON: {}", e))?;

    let mut loans = Vec::with_capacity(file.loans.len());
    for l in &file.loans {
        let amount = parse_decimal(&l.amount)?;
        if amount <= Decimal::ZERO {
            return Err(format!(
                "Loan for '{}' must request a positive amount, got {}",
                l.borrower, amount
            ));
        }
        loans.push(LoanRequest::new(AccountId::new(&l.borrower), amount));
    }

    let mut sources = Vec::with_capacity(file.sources.len());
    for s in &file.sources {
        let available = parse_decimal(&s.available)?;
        if available < Decimal::ZERO {
            return Err(format!(
                "Source '{}' has a negative available balance: {}",
                s.id, available
            ));
        }
        sources.push(FundingSource::new(
            SourceId::new(&s.id),
            AccountId::new(&s.owner),
            available,
        ));
    }
    Ok((loans, sources))
}

fn load_round(path: &str) -> (Vec<LoanRequest>, Vec<FundingSource>) {
    let content = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Error reading file '{}': {}", path, e);
        process::exit(1);
    });

    round_from_json(&content).unwrap_or_else(|msg| {
        eprintln!("{}", msg);
        eprintln!("Expected format:");
        eprintln!(
            r#"{{
  "loans": [ {{ "borrower": "USR-B1", "amount": "300" }} ],
  "sources": [ {{ "id": "SRC-A", "owner": "USR-I1", "available": "200" }} ]
}}"#
        );
        process::exit(1);
    })
}

struct RoundOptions {
    input_path: String,
    format: String,
    policy: MatchPolicy,
}

fn parse_round_options(args: &[String]) -> RoundOptions {
    let mut input_path = None;
    let mut format = "text".to_string();
    let mut policy = MatchPolicy::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--input" => {
                i += 1;
                input_path = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--input requires a file path");
                    process::exit(1);
                }));
            }
            "--format" => {
                i += 1;
                format = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--format requires 'text' or 'json'");
                    process::exit(1);
                });
            }
            "--max-sources" => {
                i += 1;
                policy.max_sources_per_loan =
                    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                        eprintln!("--max-sources requires a number");
                        process::exit(1);
                    });
            }
            "--min-allocation" => {
                i += 1;
                policy.min_allocation_amount =
                    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                        eprintln!("--min-allocation requires a decimal amount");
                        process::exit(1);
                    });
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let input_path = input_path.unwrap_or_else(|| {
        eprintln!("Error: --input <FILE> is required");
        process::exit(1);
    });
    RoundOptions {
        input_path,
        format,
        policy,
    }
}

fn cmd_match(args: &[String]) {
    let options = parse_round_options(args);
    let (loans, sources) = load_round(&options.input_path);

    let mut outputs = Vec::new();
    for loan in &loans {
        let output = match MatchingEngine::match_loan(loan, &sources, &options.policy) {
            Ok(allocation) => MatchOutput {
                borrower: loan.borrower().to_string(),
                requested: loan.requested_amount().to_string(),
                outcome: "matched".to_string(),
                slices: allocation
                    .entries()
                    .iter()
                    .map(|e| SliceOutput {
                        source: e.source_id.to_string(),
                        amount: e.amount.to_string(),
                    })
                    .collect(),
            },
            Err(err) => MatchOutput {
                borrower: loan.borrower().to_string(),
                requested: loan.requested_amount().to_string(),
                outcome: err.to_string(),
                slices: Vec::new(),
            },
        };
        outputs.push(output);
    }

    if options.format == "json" {
        println!("{}", serde_json::to_string_pretty(&outputs).unwrap());
    } else {
        for output in &outputs {
            println!(
                "{} requests {} -> {}",
                output.borrower, output.requested, output.outcome
            );
            for slice in &output.slices {
                println!("  {} contributes {}", slice.source, slice.amount);
            }
        }
    }
}

fn cmd_settle(args: &[String]) {
    let options = parse_round_options(args);
    let (loans, sources) = load_round(&options.input_path);

    let ledger = InMemoryLedger::new();
    for source in &sources {
        ledger.insert_source(source.clone());
    }
    for loan in &loans {
        ledger.insert_loan(loan.clone());
    }
    let coordinator = SettlementCoordinator::new(&ledger);

    use funding_engine::settlement::store::{LedgerStore, SourceFilter};

    let mut outputs = Vec::new();
    for loan in &loans {
        let filter = SourceFilter {
            min_available: None,
            exclude_owner: Some(loan.borrower().clone()),
        };
        let candidates = ledger.read_funding_sources(&filter).unwrap_or_default();

        let (outcome, status) =
            match MatchingEngine::match_loan(loan, &candidates, &options.policy) {
                Ok(allocation) => {
                    let key = IdempotencyKey::new(format!("cli-{}", loan.id()));
                    match coordinator.settle(&allocation, &key) {
                        Ok(record) => ("settled".to_string(), Some(record.status().to_string())),
                        Err(err) => (err.to_string(), None),
                    }
                }
                Err(err) => (err.to_string(), None),
            };

        outputs.push(SettleOutput {
            borrower: loan.borrower().to_string(),
            requested: loan.requested_amount().to_string(),
            outcome,
            settlement_status: status,
            borrower_balance: ledger.wallet_balance(loan.borrower()).to_string(),
        });
    }

    if options.format == "json" {
        println!("{}", serde_json::to_string_pretty(&outputs).unwrap());
    } else {
        for output in &outputs {
            println!(
                "{} requests {} -> {} (wallet now {})",
                output.borrower, output.requested, output.outcome, output.borrower_balance
            );
        }
    }
}

fn cmd_generate(args: &[String]) {
    let mut config = PoolConfig::default();
    let mut output_path: Option<String> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--sources" => {
                i += 1;
                config.source_count =
                    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                        eprintln!("--sources requires a number");
                        process::exit(1);
                    });
            }
            "--loans" => {
                i += 1;
                config.loan_count =
                    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                        eprintln!("--loans requires a number");
                        process::exit(1);
                    });
            }
            "--output" => {
                i += 1;
                output_path = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--output requires a file path");
                    process::exit(1);
                }));
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let pool = generate_random_pool(&config);
    let loans = generate_random_loans(&config);

    #[derive(serde::Serialize)]
    struct OutputLoan {
        borrower: String,
        amount: String,
    }

    #[derive(serde::Serialize)]
    struct OutputSource {
        id: String,
        owner: String,
        available: String,
    }

    #[derive(serde::Serialize)]
    struct OutputFile {
        loans: Vec<OutputLoan>,
        sources: Vec<OutputSource>,
    }

    let output = OutputFile {
        loans: loans
            .iter()
            .map(|l| OutputLoan {
                borrower: l.borrower().to_string(),
                amount: l.requested_amount().to_string(),
            })
            .collect(),
        sources: pool
            .iter()
            .map(|s| OutputSource {
                id: s.id().to_string(),
                owner: s.owner().to_string(),
                available: s.available().to_string(),
            })
            .collect(),
    };

    let json = serde_json::to_string_pretty(&output).unwrap();

    if let Some(path) = output_path {
        fs::write(&path, &json).unwrap_or_else(|e| {
            eprintln!("Error writing to '{}': {}", path, e);
            process::exit(1);
        });
        eprintln!(
            "Generated {} loans against {} sources -> {}",
            loans.len(),
            pool.len(),
            path
        );
    } else {
        println!("{}", json);
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = args[1].as_str();
    let rest = &args[2..];

    match command {
        "match" => cmd_match(rest),
        "settle" => cmd_settle(rest),
        "generate" => cmd_generate(rest),
        "help" | "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            process::exit(1);
        }
    }
}
