//! CSV import utility (`spec.md` §6) — a collaborator, not the core.
//! Reads a `DID,Country,...` CSV and upserts each row into the `dids`
//! table through the same `MysqlStore` the router uses, the way the
//! teacher splits its own `cmd/` helper binaries from the daemon.

use std::env;
use std::process::ExitCode;

use log::{error, info, warn};
use serde::Deserialize;

use s2_router::router::SelectionMode;
use s2_router::store::MysqlStore;

#[derive(Debug, Deserialize)]
struct DidRow {
    #[serde(rename = "DID")]
    did: String,
    #[serde(rename = "Country")]
    country: String,
}

fn main() -> ExitCode {
    env_logger::init();

    let mut args = env::args().skip(1);
    let config_path = match args.next() {
        Some(path) => path,
        None => {
            eprintln!("usage: import_dids <config.yml> <dids.csv>");
            return ExitCode::FAILURE;
        }
    };
    let csv_path = match args.next() {
        Some(path) => path,
        None => {
            eprintln!("usage: import_dids <config.yml> <dids.csv>");
            return ExitCode::FAILURE;
        }
    };

    let config = match s2_router::config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to load config from {config_path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let store = match MysqlStore::connect(&config.database.dsn(), SelectionMode::default()) {
        Ok(store) => store,
        Err(err) => {
            error!("failed to connect to backing store: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut reader = match csv::Reader::from_path(&csv_path) {
        Ok(reader) => reader,
        Err(err) => {
            error!("failed to open {csv_path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut imported = 0u64;
    let mut skipped = 0u64;
    for result in reader.deserialize() {
        let row: DidRow = match result {
            Ok(row) => row,
            Err(err) => {
                warn!("skipping malformed row: {err}");
                skipped += 1;
                continue;
            }
        };

        if row.did.trim().is_empty() {
            warn!("skipping row with empty DID");
            skipped += 1;
            continue;
        }

        match store.import_did(row.did.trim(), row.country.trim()) {
            Ok(()) => imported += 1,
            Err(err) => {
                warn!("failed to import DID {}: {err}", row.did);
                skipped += 1;
            }
        }
    }

    info!("import complete: {imported} imported, {skipped} skipped");
    ExitCode::SUCCESS
}
