//! Relief ledger replay binary
//!
//! Drives a ledger from a JSON-lines command script and prints one JSON
//! result per command to stdout. Logs go to stderr.
//!
//! ```text
//! relief-replay [--config relief.toml] [script.jsonl]
//! ```
//!
//! Without a script path, commands are read from stdin. Without `--config`,
//! configuration comes from `RELIEF_*` environment variables.

use anyhow::{Context, Result};
use clap::Parser;
use relief_ledger::{
    config::LoggingConfig, Config, GroupBy, OutcomeKind, PaymentFilter, PaymentRequest,
    ReliefLedger,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum Command {
    RegisterVendor {
        vendor_id: String,
    },
    ApproveVendor {
        vendor_id: String,
    },
    RevokeVendor {
        vendor_id: String,
    },
    VerifyBeneficiary {
        beneficiary_id: String,
        allocation: Decimal,
    },
    SuspendBeneficiary {
        beneficiary_id: String,
    },
    TopUp {
        beneficiary_id: String,
        amount: Decimal,
    },
    Donate {
        donor: String,
        amount: Decimal,
    },
    Pay {
        beneficiary_id: String,
        vendor_id: String,
        amount: Decimal,
        #[serde(default)]
        disaster_id: Option<String>,
    },
    Query {
        #[serde(default)]
        beneficiary_id: Option<String>,
        #[serde(default)]
        vendor_id: Option<String>,
        #[serde(default)]
        outcome: Option<OutcomeKind>,
    },
    Aggregate {
        group_by: GroupBy,
    },
    Dashboard,
    VerifyIntegrity,
}

#[derive(Debug, Parser)]
#[command(name = "relief-replay")]
#[command(about = "Replay a JSON-lines command script against a relief ledger")]
struct Args {
    /// TOML configuration file; `RELIEF_*` environment variables otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Command script; stdin when omitted
    script: Option<PathBuf>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn execute(ledger: &ReliefLedger, command: Command) -> relief_ledger::Result<Value> {
    let value = match command {
        Command::RegisterVendor { vendor_id } => {
            ledger.register_vendor(vendor_id.as_str());
            serde_json::to_value(ledger.vendor(vendor_id.as_str()))?
        }
        Command::ApproveVendor { vendor_id } => {
            ledger.approve_vendor(vendor_id.as_str());
            serde_json::to_value(ledger.vendor(vendor_id.as_str()))?
        }
        Command::RevokeVendor { vendor_id } => {
            ledger.revoke_vendor(vendor_id.as_str())?;
            serde_json::to_value(ledger.vendor(vendor_id.as_str()))?
        }
        Command::VerifyBeneficiary {
            beneficiary_id,
            allocation,
        } => {
            ledger.verify_beneficiary(beneficiary_id.as_str(), allocation)?;
            serde_json::to_value(ledger.beneficiary(beneficiary_id.as_str()))?
        }
        Command::SuspendBeneficiary { beneficiary_id } => {
            ledger.suspend_beneficiary(beneficiary_id.as_str())?;
            serde_json::to_value(ledger.beneficiary(beneficiary_id.as_str()))?
        }
        Command::TopUp {
            beneficiary_id,
            amount,
        } => {
            let allocation = ledger.top_up(beneficiary_id.as_str(), amount)?;
            json!({ "beneficiary_id": beneficiary_id, "allocation": allocation })
        }
        Command::Donate { donor, amount } => {
            let raised = ledger.record_donation(donor.as_str(), amount)?;
            json!({ "donor": donor, "amount": amount, "raised": raised })
        }
        Command::Pay {
            beneficiary_id,
            vendor_id,
            amount,
            disaster_id,
        } => {
            let mut request =
                PaymentRequest::new(beneficiary_id.as_str(), vendor_id.as_str(), amount);
            if let Some(disaster_id) = disaster_id {
                request = request.with_disaster(disaster_id);
            }
            serde_json::to_value(ledger.validate_and_commit(request)?)?
        }
        Command::Query {
            beneficiary_id,
            vendor_id,
            outcome,
        } => {
            let mut filter = PaymentFilter::all();
            if let Some(id) = beneficiary_id {
                filter = filter.beneficiary(id.as_str());
            }
            if let Some(id) = vendor_id {
                filter = filter.vendor(id.as_str());
            }
            if let Some(outcome) = outcome {
                filter = filter.outcome(outcome);
            }
            let payments: Vec<_> = ledger.query(filter).iter().collect();
            serde_json::to_value(payments)?
        }
        Command::Aggregate { group_by } => serde_json::to_value(ledger.aggregate_by(group_by))?,
        Command::Dashboard => serde_json::to_value(ledger.dashboard())?,
        Command::VerifyIntegrity => {
            ledger.verify_integrity()?;
            json!({ "entries": ledger.log().len() })
        }
    };
    Ok(value)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::from_env().context("loading config from environment")?,
    };

    init_tracing(&config.logging);
    tracing::info!(service = %config.service_name, "Starting relief ledger replay");

    let ledger = ReliefLedger::open(config).context("opening ledger")?;

    let input: Box<dyn BufRead> = match &args.script {
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(path)
                .with_context(|| format!("opening script {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut failures = 0usize;

    for (index, line) in input.lines().enumerate() {
        let line_no = index + 1;
        let line = line.context("reading script")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let command: Command = serde_json::from_str(line)
            .with_context(|| format!("line {}: invalid command", line_no))?;
        tracing::debug!(line = line_no, ?command, "Executing command");

        let reply = match execute(&ledger, command) {
            Ok(result) => json!({ "line": line_no, "ok": true, "result": result }),
            Err(err) => {
                failures += 1;
                tracing::warn!(line = line_no, error = %err, "Command failed");
                json!({ "line": line_no, "ok": false, "error": err.to_string() })
            }
        };
        writeln!(out, "{}", reply)?;
    }

    tracing::info!(
        entries = ledger.log().len(),
        failures,
        "Replay finished"
    );
    ledger.shutdown().context("shutting down ledger")?;
    Ok(())
}
