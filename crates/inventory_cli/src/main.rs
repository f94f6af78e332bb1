//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `inventory_core` linkage and database bootstrap from a shell.
//! - Print schema version and outbox backlog in a stable `key=value` form.
//!
//! Usage: `inventory_cli <db_path> [config.json]`
//!
//! Set `INVENTORY_LOG_DIR` to an absolute directory to write core logs there.

use inventory_core::{EventSource, LoggingConfig, Store, StoreConfig};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let Some(db_path) = args.next() else {
        println!("inventory_core version={}", inventory_core::core_version());
        eprintln!("usage: inventory_cli <db_path> [config.json]");
        return ExitCode::from(2);
    };

    match run(&db_path, args.next().as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(db_path: &str, config_path: Option<&str>) -> Result<(), String> {
    if let Ok(log_dir) = std::env::var("INVENTORY_LOG_DIR") {
        let logging = LoggingConfig::new(inventory_core::default_log_level(), log_dir);
        inventory_core::init_logging(&logging).map_err(|err| err.to_string())?;
    }

    let config = match config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|err| format!("{path}: {err}"))?;
            StoreConfig::from_json_str(&raw).map_err(|err| err.to_string())?
        }
        None => StoreConfig::default(),
    };

    let store = Store::open(db_path, config).map_err(|err| err.to_string())?;
    let schema_version = store.schema_version().map_err(|err| err.to_string())?;
    let pending = store
        .event_source()
        .pending_count()
        .map_err(|err| err.to_string())?;

    println!("inventory_core version={}", inventory_core::core_version());
    println!("schema_version={schema_version}");
    println!("outbox_pending={pending}");
    Ok(())
}
