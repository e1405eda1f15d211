//! Wires the core together: one `MysqlStore`, one `Router` built on top
//! of it, one `Reclaimer` sweeping it in the background. No
//! process-wide globals — every component is handed the references it
//! needs explicitly, per `spec.md` §9's re-architecture guidance.
//!
//! The HTTP/AGI front-end that would normally sit in front of the
//! `Router` is out of scope for this repository (`spec.md` §1); this
//! binary only demonstrates the wiring and keeps the Reclaimer alive.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use s2_router::index::ActiveCallIndex;
use s2_router::reclaimer::{Reclaimer, ReclaimerConfig};
use s2_router::router::Router;
use s2_router::store::MysqlStore;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config_path = env::args().nth(1).unwrap_or_else(|| "config.yml".to_string());
    let config = match s2_router::config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("fatal: failed to load config from {config_path}: {err}");
            std::process::exit(1);
        }
    };

    info!("starting S2 dynamic call router");

    let store = match MysqlStore::connect(&config.database.dsn(), config.router.did_selection_mode) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            eprintln!("fatal: failed to connect to backing store: {err}");
            std::process::exit(1);
        }
    };

    let index = Arc::new(ActiveCallIndex::new());
    let router = Arc::new(Router::new(store.clone(), store.clone(), index.clone()));

    let reclaimer = Arc::new(Reclaimer::new(
        store.clone(),
        store.clone(),
        index,
        ReclaimerConfig {
            period: Duration::from_secs(config.router.reclaimer_period_s),
            stuck_did_threshold: Duration::from_secs(config.router.stuck_did_threshold_minutes as u64 * 60),
            call_timeout: Duration::from_secs(config.router.call_timeout_s as u64),
        },
    ));
    let _reclaimer_handle = reclaimer.spawn();

    info!(
        "router ready (selection_mode={:?}, active_calls={})",
        config.router.did_selection_mode,
        router.active_calls_count()
    );

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");
}
