use anyhow::Result;
use std::env;
use std::process::ExitCode;

use bank_ledger_sync::{logging, AppContext, Config};

const USAGE: &str = "Usage: bank-ledger-sync <command>

Commands:
  sync    Pull accounts and transactions from the bank once
  init    Create the primary schema and the mirror sheets";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("sync") => run_sync().await,
        Some("init") => run_init(),
        _ => {
            eprintln!("{}", USAGE);
            Ok(ExitCode::from(2))
        }
    }
}

fn open_context() -> Result<AppContext> {
    logging::init_logging()?;
    let config = Config::from_env()?;
    AppContext::open(config)
}

fn run_init() -> Result<ExitCode> {
    let ctx = open_context()?;
    ctx.init_mirror()?;

    println!("✓ Primary store ready: {}", ctx.config.database_path.display());
    println!("✓ Mirror sheets ready: {}", ctx.config.mirror_dir.display());
    Ok(ExitCode::SUCCESS)
}

async fn run_sync() -> Result<ExitCode> {
    let ctx = open_context()?;
    let service = ctx.sync_service()?;

    let report = service.run().await;

    println!("{}", report.summary());
    for error in &report.errors {
        eprintln!("  ✗ {}", error);
    }
    let mirror_failures = ctx.accounts.mirror_failures() + ctx.transactions.mirror_failures();
    if mirror_failures > 0 {
        println!("  ⚠ {} mirror write(s) failed, primary store is complete", mirror_failures);
    }

    // Non-zero exit only when something failed
    if report.has_errors() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
