//! # Posture Scanner CLI
//!

use clap::{Args, Parser, Subcommand};
use posture_scanner_base::results::{ScanReport, UnitStatus};
use posture_scanner_sdk::config::{Overrides, RunConfig};
use posture_scanner_sdk::{compile_catalogs, run_scan, RunError, EXIT_INVALID_INPUT};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Parser)]
#[command(name = "scanner", version, about = "Declarative cloud posture scanner")]
struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan accounts, regions and services and write the artifact set
    Scan(ScanArgs),
    /// Load, compile and plan every catalog without calling any API
    Validate {
        #[arg(long, value_name = "DIR")]
        catalog: PathBuf,
    },
}

#[derive(Debug, Args)]
struct ScanArgs {
    /// TOML run configuration
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    catalog: Option<PathBuf>,

    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    #[arg(long = "account", value_name = "ID")]
    accounts: Vec<String>,

    #[arg(long = "region", value_name = "REGION")]
    regions: Vec<String>,

    #[arg(long = "service", value_name = "SERVICE")]
    services: Vec<String>,

    #[arg(short, long)]
    workers: Option<usize>,

    /// Replay recorded responses from DIR instead of the configured client
    #[arg(long, value_name = "DIR")]
    fixtures: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    log::info!("Posture scanner v{} starting", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Command::Scan(args) => scan(args),
        Command::Validate { catalog } => validate(catalog),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        log::error!("{}", e);
        std::process::exit(e.exit_code());
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

fn scan(args: ScanArgs) -> Result<(), RunError> {
    let start = Instant::now();

    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    config.apply(Overrides {
        catalog_dir: args.catalog,
        output_dir: args.output,
        accounts: args.accounts,
        regions: args.regions,
        services: args.services,
        workers: args.workers,
        fixture_dir: args.fixtures,
    });

    let outcome = run_scan(&config, None)?;
    print_report(&outcome.report);
    println!("Duration: {:.2}s", start.elapsed().as_secs_f64());
    println!("\n[OK] Results saved to: {}", outcome.output_dir.display());
    Ok(())
}

fn print_report(report: &ScanReport) {
    let totals = report.totals();
    let summary = report.summary();

    println!("\n=== Scan Results ===");
    println!("Scan ID: {}", report.scan_id);
    println!(
        "Units: {} completed, {} error, {} cancelled",
        report.count_units(UnitStatus::Completed),
        report.count_units(UnitStatus::Error),
        report.count_units(UnitStatus::Cancelled)
    );
    println!(
        "Accounts: {}  Regions: {}  Services: {}",
        summary.accounts.len(),
        summary.regions.len(),
        summary.services.len()
    );
    println!("Passed: {}", totals.pass);
    println!("Failed: {}", totals.fail);
    println!("Skipped: {}", totals.skip);
    println!("Errors: {}", totals.error);

    for unit in report.units.iter().filter(|u| u.status == UnitStatus::Error) {
        println!(
            "  ✗ {}: {}",
            unit.unit,
            unit.error.as_deref().unwrap_or("unit failed")
        );
    }
}

fn validate(catalog_dir: PathBuf) -> Result<(), RunError> {
    let batch = compile_catalogs(&catalog_dir)?;

    println!("\n=== Catalog Validation ===");
    for catalog in &batch.loaded {
        println!(
            "✓ {} ({}, {:?}): {} discoveries, {} checks",
            catalog.service,
            catalog.provider,
            catalog.scope,
            catalog.discoveries.len(),
            catalog.checks.len()
        );
        for (wave, ids) in catalog.plan.waves.iter().enumerate() {
            println!("    wave {}: {}", wave + 1, ids.join(", "));
        }
    }
    for (path, error) in &batch.failed {
        println!("✗ {}: {}", path.display(), error);
    }
    println!("\n{}", batch.summary());

    if !batch.is_clean() {
        std::process::exit(EXIT_INVALID_INPUT);
    }
    Ok(())
}
