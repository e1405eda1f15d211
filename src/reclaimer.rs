//! The Reclaimer, `spec.md` §4.5 — a periodic background sweeper.
//!
//! Follows the same `tokio::spawn` + `tokio::time::sleep` loop shape
//! the teacher's `TransactionManager` test harness uses for its own
//! watchdog (`manager.rs`'s `watchout` poller): a blocking backing-store
//! call made directly inside an async loop, acceptable per `spec.md`
//! §5 because the scheduling model tolerates a blocked thread.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};

use crate::index::ActiveCallIndex;
use crate::models::CallStatus;
use crate::store::{CallLedger, DidPool};

pub struct ReclaimerConfig {
    /// How often the sweep runs.
    pub period: Duration,
    /// `spec.md` §6 `stuck_did_threshold_minutes`.
    pub stuck_did_threshold: Duration,
    /// `spec.md` §6 `call_timeout_s`.
    pub call_timeout: Duration,
}

impl Default for ReclaimerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
            stuck_did_threshold: Duration::from_secs(60 * 60),
            call_timeout: Duration::from_secs(300),
        }
    }
}

pub struct Reclaimer {
    pool: Arc<dyn DidPool>,
    ledger: Arc<dyn CallLedger>,
    index: Arc<ActiveCallIndex>,
    config: ReclaimerConfig,
}

impl Reclaimer {
    pub fn new(
        pool: Arc<dyn DidPool>,
        ledger: Arc<dyn CallLedger>,
        index: Arc<ActiveCallIndex>,
        config: ReclaimerConfig,
    ) -> Self {
        Self { pool, ledger, index, config }
    }

    /// Runs one sweep tick: `Pool.SweepStuck` first (no Index lock),
    /// then the Index orphan scan, per the ordering table in
    /// `spec.md` §5.
    pub fn tick(&self) {
        match self.pool.sweep_stuck(self.config.stuck_did_threshold) {
            Ok(count) if count > 0 => info!("reclaimer: swept {count} stuck DID(s)"),
            Ok(_) => {}
            Err(err) => warn!("reclaimer: DID sweep failed: {err}"),
        }

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.call_timeout).unwrap_or(chrono::Duration::zero());
        let expired = self.index.drain_expired(cutoff);

        for state in expired {
            if let Err(err) = self.pool.release(&state.did_used) {
                warn!("reclaimer: failed to release DID {}: {err}", state.did_used);
                continue;
            }

            let duration = (Utc::now() - state.start_time).num_seconds();
            if let Err(err) = self.ledger.update_status(
                &state.call_id,
                CallStatus::Timeout,
                Some(Utc::now()),
                Some(duration),
            ) {
                warn!("reclaimer: failed to mark call {} as timed out: {err}", state.call_id);
                continue;
            }

            info!("reclaimer: call {} timed out, DID {} released", state.call_id, state.did_used);
        }
    }

    /// Spawns the periodic loop and returns its join handle so the
    /// caller can hold it for an orderly shutdown.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.config.period).await;
                self.tick();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::CallState;
    use crate::router::SelectionMode;
    use crate::store::testutil::InMemoryStore;

    #[test]
    fn sweeps_expired_call_and_frees_did() {
        let store = Arc::new(InMemoryStore::new(SelectionMode::Sequential));
        store.seed_did("18005550001");
        let index = Arc::new(ActiveCallIndex::new());

        index.insert(CallState {
            call_id: "call-A".to_string(),
            ani_original: "ani".to_string(),
            dnis_original: "dnis".to_string(),
            did_used: "18005550001".to_string(),
            start_time: Utc::now() - chrono::Duration::seconds(400),
        });
        store
            .create(crate::models::CallRecord::new_incoming(
                "call-A".to_string(),
                "ani".to_string(),
                "dnis".to_string(),
                "18005550001".to_string(),
            ))
            .unwrap();
        // Pool side must reflect the lease for the test to be meaningful.
        store.acquire("dnis").ok();

        let reclaimer = Reclaimer::new(
            store.clone(),
            store.clone(),
            index.clone(),
            ReclaimerConfig {
                period: Duration::from_secs(60),
                stuck_did_threshold: Duration::from_secs(60 * 60),
                call_timeout: Duration::from_secs(300),
            },
        );

        reclaimer.tick();

        assert_eq!(index.len(), 0);
        let record = store.find_by_call_id("call-A").unwrap().unwrap();
        assert_eq!(record.status, CallStatus::Timeout);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn background_loop_runs_at_least_once() {
        let store = Arc::new(InMemoryStore::new(SelectionMode::Sequential));
        store.seed_did("18005550001");
        let index = Arc::new(ActiveCallIndex::new());

        index.insert(CallState {
            call_id: "call-A".to_string(),
            ani_original: "ani".to_string(),
            dnis_original: "dnis".to_string(),
            did_used: "18005550001".to_string(),
            start_time: Utc::now() - chrono::Duration::seconds(2),
        });

        let reclaimer = Arc::new(Reclaimer::new(
            store.clone(),
            store.clone(),
            index.clone(),
            ReclaimerConfig {
                period: Duration::from_millis(50),
                stuck_did_threshold: Duration::from_secs(3600),
                call_timeout: Duration::from_secs(1),
            },
        ));

        let handle = reclaimer.spawn();
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.abort();

        assert_eq!(index.len(), 0);
    }
}
