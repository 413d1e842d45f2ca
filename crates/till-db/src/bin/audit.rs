//! # Till Audit Tool
//!
//! Reconciles shifts and inspects the stock ledger from the command line.
//!
//! ## Usage
//! ```bash
//! # Rebuild one shift's totals from its receipts
//! cargo run -p till-db --bin till-audit -- reconcile <shift-id>
//!
//! # Every shift started in a window (RFC 3339 or YYYY-MM-DD)
//! cargo run -p till-db --bin till-audit -- reconcile-range 2026-10-01 2026-10-18
//!
//! # Stock for one product, or all products by full ledger replay
//! cargo run -p till-db --bin till-audit -- stock [product-id]
//!
//! # Use another database and discard counted drift
//! cargo run -p till-db --bin till-audit -- --db ./till.db --policy recompute reconcile <id>
//! ```

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use std::env;
use std::error::Error;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use till_core::{CashCountPolicy, Money, Reconciliation};
use till_db::migrations::migration_status;
use till_db::{Database, TillConfig};

const USAGE: &str = "\
Till Audit Tool

Usage: till-audit [OPTIONS] <COMMAND>

Commands:
  reconcile <shift-id>          Recalculate one shift from its receipts
  reconcile-range <from> <to>   Recalculate every shift started in the window
  stock [product-id]            Current stock (all products if omitted)
  rebuild-projection            Rebuild the latest-stock projection from the ledger
  verify <product-id>           Check a product's ledger chain
  stats [user-id]               Shift statistics
  config                        Print the effective configuration

Options:
  -c, --config <PATH>    Config file (default: platform config dir/till.toml)
  -d, --db <PATH>        Database file (overrides config)
  -p, --policy <POLICY>  Cash count policy: preserve_counted | recompute
  -h, --help             Show this help message";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut db_path: Option<PathBuf> = None;
    let mut policy: Option<CashCountPolicy> = None;
    let mut positional: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                config_path = Some(PathBuf::from(value_of(&args, i)?));
                i += 1;
            }
            "--db" | "-d" => {
                db_path = Some(PathBuf::from(value_of(&args, i)?));
                i += 1;
            }
            "--policy" | "-p" => {
                policy = Some(value_of(&args, i)?.parse()?);
                i += 1;
            }
            "--help" | "-h" => {
                println!("{}", USAGE);
                return Ok(());
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let Some((command, rest)) = positional.split_first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    let mut config = TillConfig::load(config_path)?;
    if let Some(path) = db_path {
        config.database.path = Some(path);
    }
    if let Some(policy) = policy {
        config.reconciliation.cash_count_policy = policy;
    }

    if command == "config" {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let db = Database::new(config.db_config()).await?;
    if !db.health_check().await {
        return Err("database is not answering queries".into());
    }
    let (total, applied) = migration_status(db.pool()).await?;
    debug!(total, applied, "Migration status");

    let result = run(&db, &config, command, rest).await;
    db.close().await;
    result
}

async fn run(
    db: &Database,
    config: &TillConfig,
    command: &str,
    rest: &[String],
) -> Result<(), Box<dyn Error>> {
    match (command, rest) {
        ("reconcile", [shift_id]) => {
            let outcome = db
                .reconciler(config.cash_count_policy())
                .recalculate(shift_id)
                .await?;
            print_reconciliation(&outcome);
        }

        ("reconcile-range", [from, to]) => {
            let from = parse_instant(from, false)?;
            let to = parse_instant(to, true)?;
            let report = db
                .reconciler(config.cash_count_policy())
                .recalculate_all(from, to)
                .await?;

            for outcome in &report.reconciled {
                print_reconciliation(outcome);
            }
            for (shift_id, error) in &report.failed {
                println!("✗ {}: {}", shift_id, error);
            }
            println!();
            println!(
                "{} reconciled, {} drifted, {} failed, {} unresolved receipt(s)",
                report.reconciled.len(),
                report.drifted(),
                report.failed.len(),
                report.warning_count()
            );
        }

        ("stock", [product_id]) => {
            let ledger = db.stock_ledger();
            match ledger.current_stock(product_id).await? {
                Some(stock) => println!("{}: {}", product_id, stock),
                None => println!("{}: no ledger entries", product_id),
            }
            if let Some(projected) = ledger.latest_stock(product_id).await? {
                println!("  projection: {}", projected);
            }
        }

        ("stock", []) => {
            let mut all: Vec<(String, i64)> =
                db.stock_ledger().current_stock_for_all().await?.into_iter().collect();
            all.sort();
            for (product_id, stock) in &all {
                println!("{:<40} {:>8}", product_id, stock);
            }
            println!("{} product(s)", all.len());
        }

        ("rebuild-projection", []) => {
            let rebuild = db.stock_ledger().rebuild_projection().await?;
            for drift in &rebuild.drifted {
                println!(
                    "~ {}: projection {:?} -> ledger {:?}",
                    drift.product_id, drift.projected, drift.ledger
                );
            }
            println!(
                "✓ Projection rebuilt for {} product(s), {} corrected",
                rebuild.products,
                rebuild.drifted.len()
            );
        }

        ("verify", [product_id]) => {
            let breaks = db.stock_ledger().verify_chain(product_id).await?;
            if breaks.is_empty() {
                println!("✓ {}: ledger chain intact", product_id);
            } else {
                for b in &breaks {
                    println!(
                        "✗ entry {} ({:?}): previous stock {} but expected {:?}",
                        b.entry_id, b.kind, b.actual_previous_stock, b.expected_previous_stock
                    );
                }
                return Err(format!("{} chain break(s) in {}", breaks.len(), product_id).into());
            }
        }

        ("stats", args) if args.len() <= 1 => {
            let user_id = args.first().map(String::as_str);
            let stats = db.shifts().get_statistics(user_id).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        _ => {
            eprintln!("{}", USAGE);
            return Err(format!("invalid command: {} {}", command, rest.join(" ")).into());
        }
    }

    Ok(())
}

fn print_reconciliation(outcome: &Reconciliation) {
    let shift = &outcome.shift;
    let marker = if outcome.had_drift() { "~" } else { "✓" };

    println!(
        "{} shift {} ({}, {}): expected {} (was {}), receipts {}",
        marker,
        shift.id,
        shift.user_name,
        shift.status,
        Money::from_cents(shift.expected_cash),
        Money::from_cents(outcome.previous_expected_cash),
        outcome.receipts_processed,
    );

    if let (Some(actual), Some(variance)) = (shift.actual_cash, shift.variance) {
        println!(
            "  actual {} variance {}",
            Money::from_cents(actual),
            Money::from_cents(variance)
        );
    }

    if shift.was_auto_closed() {
        let reason = shift.close_reason.as_deref().unwrap_or("no reason recorded");
        println!("  auto-closed: {}", reason);
    }

    if let Some(warning) = &outcome.warning {
        println!("  ⚠ {}", warning);
        for missing in &warning.unresolved {
            println!("    - {}: {}", missing.reference, missing.reason);
        }
    }
}

fn value_of(args: &[String], i: usize) -> Result<&str, Box<dyn Error>> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", args[i]).into())
}

/// RFC 3339, or a calendar date taken as the start (or end) of that UTC day.
fn parse_instant(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, Box<dyn Error>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{}': {}", raw, e))?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or("invalid time of day")?;

    Ok(Utc.from_utc_datetime(&date.and_time(time)))
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=till=trace` - Show trace for till crates only
/// - Default: INFO, debug for till crates
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,till=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
