//! # Backfill Runner
//!
//! Runs one sync from the command line, then optionally recomputes reorder
//! levels.
//!
//! ## Usage
//! ```bash
//! # Full sync of inventory items for one owner
//! cargo run -p tether-sync --bin tether-backfill -- --mapping items --owner org-42
//!
//! # Resume a failed run from page 7, 50 records per page, at most 10 pages
//! cargo run -p tether-sync --bin tether-backfill -- \
//!     --mapping sales_orders --owner org-42 --page 7 --page-size 50 --max-pages 10
//!
//! # Reorder levels only
//! cargo run -p tether-sync --bin tether-backfill -- --reorder
//! ```
//!
//! Ctrl+C asks the running sync to stop after its current page.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use tether_core::catalog;
use tether_sync::{init_tracing, SyncConfig, SyncEngine, DEFAULT_LOG_FILTER};
use tracing::{error, info, warn};

#[derive(Debug, Default)]
struct Args {
    mapping: Option<String>,
    owner: Option<String>,
    page: Option<u32>,
    page_size: Option<u32>,
    max_pages: Option<u32>,
    config: Option<PathBuf>,
    db: Option<PathBuf>,
    reorder: bool,
    help: bool,
}

fn parse_args(raw: &[String]) -> Result<Args, String> {
    fn value<'a>(raw: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
        raw.get(i + 1)
            .map(String::as_str)
            .ok_or_else(|| format!("{} needs a value", flag))
    }
    fn number(raw: &[String], i: usize, flag: &str) -> Result<u32, String> {
        let v = value(raw, i, flag)?;
        v.parse().map_err(|_| format!("{} expects a number, got '{}'", flag, v))
    }

    let mut args = Args::default();
    let mut i = 1;
    while i < raw.len() {
        let flag = raw[i].as_str();
        match flag {
            "--mapping" | "-m" => args.mapping = Some(value(raw, i, flag)?.to_string()),
            "--owner" | "-o" => args.owner = Some(value(raw, i, flag)?.to_string()),
            "--page" => args.page = Some(number(raw, i, flag)?),
            "--page-size" => args.page_size = Some(number(raw, i, flag)?),
            "--max-pages" => args.max_pages = Some(number(raw, i, flag)?),
            "--config" | "-c" => args.config = Some(PathBuf::from(value(raw, i, flag)?)),
            "--db" | "-d" => args.db = Some(PathBuf::from(value(raw, i, flag)?)),
            "--reorder" => {
                args.reorder = true;
                i += 1;
                continue;
            }
            "--help" | "-h" => {
                args.help = true;
                i += 1;
                continue;
            }
            other => return Err(format!("unknown argument '{}'", other)),
        }
        i += 2;
    }

    if args.mapping.is_some() && args.owner.is_none() {
        return Err("--mapping needs --owner".to_string());
    }
    Ok(args)
}

fn print_help() {
    println!("Tether Backfill Runner");
    println!();
    println!("Usage: tether-backfill [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -m, --mapping <NAME>   Mapping to sync: {}", catalog::MAPPING_NAMES.join(", "));
    println!("  -o, --owner <ID>       Owner whose grant is used");
    println!("      --page <N>         First page (default: 1)");
    println!("      --page-size <N>    Records per page (default: from config)");
    println!("      --max-pages <N>    Stop after N pages");
    println!("  -c, --config <PATH>    Config file (default: platform config dir)");
    println!("  -d, --db <PATH>        Database file (overrides config)");
    println!("      --reorder          Recompute reorder levels afterwards");
    println!("  -h, --help             Show this help message");
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing(DEFAULT_LOG_FILTER);

    let raw: Vec<String> = env::args().collect();
    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("error: {}", message);
            print_help();
            return ExitCode::from(2);
        }
    };
    if args.help || (args.mapping.is_none() && !args.reorder) {
        print_help();
        return ExitCode::SUCCESS;
    }

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "Backfill failed");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the sync (if any) succeeded.
async fn run(args: Args) -> Result<bool, Box<dyn std::error::Error>> {
    let mut config = SyncConfig::load(args.config)?;
    if let Some(db) = args.db {
        config.database.path = Some(db);
    }

    let engine = SyncEngine::connect(config).await?;
    let mut succeeded = true;

    if let (Some(name), Some(owner)) = (args.mapping, args.owner) {
        let mapping = catalog::by_name(&name)?;
        let mut options = engine.default_options();
        if let Some(page) = args.page {
            options.page = page;
        }
        if let Some(size) = args.page_size {
            options.page_size = size;
        }
        options.max_pages = args.max_pages;

        let orchestrator = engine.orchestrator().clone();
        let stop_owner = owner.clone();
        let stopper = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current page");
                orchestrator.request_stop(&stop_owner);
            }
        });

        let report = engine.orchestrator().sync(&mapping, options, &owner).await?;
        stopper.abort();

        for rejected in report.errors.iter().take(20) {
            warn!(remote_id = %rejected.remote_id, "{}", rejected.message);
        }
        info!(summary = %report.summary, "Backfill finished");
        if let Some(last) = report.last_page.filter(|_| !report.success) {
            info!("Resume with --page {}", last + 1);
        }
        succeeded = report.success;
    }

    if args.reorder {
        let today = chrono::Utc::now().date_naive();
        let summary = engine
            .reorder()
            .compute(engine.default_reorder_params(), today)
            .await?;
        println!("{}", serde_json::to_string_pretty(&summary.items)?);
    }

    Ok(succeeded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        std::iter::once("tether-backfill")
            .chain(parts.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_full_args() {
        let args = parse_args(&argv(&[
            "--mapping", "items", "--owner", "u1", "--page", "3", "--page-size", "50", "--reorder",
        ]))
        .unwrap();

        assert_eq!(args.mapping.as_deref(), Some("items"));
        assert_eq!(args.page, Some(3));
        assert_eq!(args.page_size, Some(50));
        assert!(args.reorder);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&argv(&["--page", "three"])).is_err());
        assert!(parse_args(&argv(&["--mapping", "items"])).is_err());
        assert!(parse_args(&argv(&["--owner"])).is_err());
        assert!(parse_args(&argv(&["--bogus"])).is_err());
    }
}
