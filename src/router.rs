//! The Router Engine, `spec.md` §4.4 — the two-phase call-correlation
//! protocol and the only mutator of the coupled (Pool, Ledger, Index)
//! state.

use std::sync::Arc;

use chrono::Utc;
use log::{info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::index::{ActiveCallIndex, CallState};
use crate::models::{CallRecord, CallStatus, Statistics};
use crate::store::{CallLedger, DidPool};

/// DID selection policy for `DidPool::acquire`, `spec.md` §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    Random,
    Sequential,
}

impl Default for SelectionMode {
    fn default() -> Self {
        SelectionMode::Random
    }
}

/// `next_hop` is always one of these two trunk names in this topology
/// (`spec.md` §1's S1→S2→S3→S4 flow).
pub const TRUNK_TO_S3: &str = "trunk_to_S3";
pub const TRUNK_TO_S4: &str = "trunk_to_S4";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingResponse {
    pub did_assigned: String,
    pub ani_to_send: String,
    pub dnis_to_send: String,
    pub next_hop: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnResponse {
    pub ani_to_send: String,
    pub dnis_to_send: String,
    pub next_hop: &'static str,
}

pub struct Router {
    pool: Arc<dyn DidPool>,
    ledger: Arc<dyn CallLedger>,
    index: Arc<ActiveCallIndex>,
}

impl Router {
    pub fn new(pool: Arc<dyn DidPool>, ledger: Arc<dyn CallLedger>, index: Arc<ActiveCallIndex>) -> Self {
        Self { pool, ledger, index }
    }

    pub fn index(&self) -> &Arc<ActiveCallIndex> {
        &self.index
    }

    /// `spec.md` §4.4 — `ProcessIncoming(call_id, ani, dnis)`.
    pub fn process_incoming(
        &self,
        call_id: &str,
        ani: &str,
        dnis: &str,
    ) -> CoreResult<IncomingResponse> {
        if self.index.contains_call_id(call_id) {
            return Err(CoreError::Duplicate);
        }

        trace!("ProcessIncoming: call_id={call_id} ani={ani} dnis={dnis}");

        let did = self.pool.acquire(dnis)?;

        let record = CallRecord::new_incoming(call_id.to_string(), ani.to_string(), dnis.to_string(), did.did.clone());

        if let Err(err) = self.ledger.create(record) {
            // Ledger insert failed after the DID was already acquired:
            // release it and fail without touching the Index.
            warn!("ledger insert failed for call_id={call_id}, releasing DID {}: {err}", did.did);
            let _ = self.pool.release(&did.did);
            return Err(match err {
                CoreError::Duplicate => CoreError::Duplicate,
                other => CoreError::LedgerError(other.to_string()),
            });
        }

        // Index insert cannot itself fail (it's an in-memory map), but
        // the ordering mirrors spec.md's failure ladder: if it ever
        // could fail, the ledger record would need to move to `failed`
        // and the DID released before returning InternalError.
        self.index.insert(CallState {
            call_id: call_id.to_string(),
            ani_original: ani.to_string(),
            dnis_original: dnis.to_string(),
            did_used: did.did.clone(),
            start_time: Utc::now(),
        });

        info!("call {call_id} routed via DID {}", did.did);

        Ok(IncomingResponse {
            did_assigned: did.did.clone(),
            ani_to_send: dnis.to_string(),
            dnis_to_send: did.did,
            next_hop: TRUNK_TO_S3,
        })
    }

    /// `spec.md` §4.4 — `ProcessReturn(ani2, did)`.
    pub fn process_return(&self, ani2: &str, did: &str) -> CoreResult<ReturnResponse> {
        trace!("ProcessReturn: ani2={ani2} did={did}");

        let state = match self.index.get_by_did(did) {
            Some(state) => state,
            None => {
                let record = self
                    .ledger
                    .find_active_by_did(did)?
                    .ok_or(CoreError::UnknownDID)?;
                let state = CallState {
                    call_id: record.call_id.clone(),
                    ani_original: record.ani_original.clone(),
                    dnis_original: record.dnis_original.clone(),
                    did_used: record.did_used.clone(),
                    start_time: record.start_time,
                };
                self.index.rebuild_one(state.clone());
                state
            }
        };

        if ani2 != state.dnis_original {
            warn!(
                "ANI verification failed for DID {did}: expected {}, got {ani2}",
                state.dnis_original
            );
            return Err(CoreError::VerificationFailed);
        }

        // Release the DID before the Index entries are removed
        // (spec.md §4.4 step 6 / §5): a concurrent Acquire racing with
        // Release must never observe the DID as free while the Index
        // still points at a non-terminal record.
        self.pool.release(did)?;

        let duration = (Utc::now() - state.start_time).num_seconds();
        self.ledger.update_status(
            &state.call_id,
            CallStatus::Completed,
            Some(Utc::now()),
            Some(duration),
        )?;

        self.index.remove_by_call_id(&state.call_id);

        info!("call {} completed, DID {did} released", state.call_id);

        Ok(ReturnResponse {
            ani_to_send: state.ani_original,
            dnis_to_send: state.dnis_original,
            next_hop: TRUNK_TO_S4,
        })
    }

    /// `spec.md` §4.4 — `CompleteCall(call_id)`. Behaves like
    /// `process_return` (minus ANI verification) when the call is
    /// still active, and is idempotent on already-terminal calls.
    ///
    /// On an Index miss this falls back to the Ledger, the same way
    /// `process_return` does at `router.rs`'s DID-lookup step: a cold
    /// process (empty Index after a restart) or a second process in a
    /// multi-process deployment (`spec.md` §5) may still hold a
    /// non-terminal ledger record with no local Index entry for it.
    pub fn complete_call(&self, call_id: &str) -> CoreResult<()> {
        let (did_used, start_time) = match self.index.get_by_call_id(call_id) {
            Some(state) => (state.did_used, state.start_time),
            None => match self.ledger.find_by_call_id(call_id)? {
                Some(record) if !record.status.is_terminal() => (record.did_used, record.start_time),
                // Never existed, already terminal, or already
                // completed via ProcessReturn — all a no-op success.
                _ => return Ok(()),
            },
        };

        self.pool.release(&did_used)?;

        let duration = (Utc::now() - start_time).num_seconds();
        self.ledger.update_status(
            call_id,
            CallStatus::Completed,
            Some(Utc::now()),
            Some(duration),
        )?;

        self.index.remove_by_call_id(call_id);
        info!("call {call_id} completed via CompleteCall");
        Ok(())
    }

    // --- Observational interfaces, spec.md §6 ---

    /// Always derives from the Ledger (truth), never the Index cache,
    /// per the Design Notes' "never expose the cache over an external
    /// interface" rule.
    pub fn statistics(&self) -> CoreResult<Statistics> {
        self.ledger.statistics()
    }

    pub fn active_calls_count(&self) -> usize {
        self.index.len()
    }

    pub fn get_call_state(&self, call_id: &str) -> Option<CallState> {
        self.index.get_by_call_id(call_id)
    }

    pub fn recent_calls(&self, limit: u32) -> CoreResult<Vec<CallRecord>> {
        self.ledger.recent(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::InMemoryStore;
    use std::thread;

    fn router_with_dids(n: usize) -> (Router, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new(SelectionMode::Random));
        store.seed_dids(n);
        let index = Arc::new(ActiveCallIndex::new());
        let router = Router::new(store.clone(), store.clone(), index);
        (router, store)
    }

    #[test]
    fn happy_path_round_trip() {
        let (router, _store) = router_with_dids(2);

        let incoming = router
            .process_incoming("call-A", "15551112222", "13334445555")
            .unwrap();
        assert_eq!(incoming.ani_to_send, "13334445555");
        assert_eq!(incoming.dnis_to_send, incoming.did_assigned);
        assert_eq!(incoming.next_hop, TRUNK_TO_S3);

        let ret = router
            .process_return("13334445555", &incoming.did_assigned)
            .unwrap();
        assert_eq!(ret.ani_to_send, "15551112222");
        assert_eq!(ret.dnis_to_send, "13334445555");
        assert_eq!(ret.next_hop, TRUNK_TO_S4);

        let record = router.recent_calls(10).unwrap();
        assert_eq!(record[0].status, CallStatus::Completed);
        assert_eq!(router.active_calls_count(), 0);
    }

    #[test]
    fn exhaustion_then_recovery() {
        let (router, _store) = router_with_dids(1);

        let a = router.process_incoming("A", "ani", "D1").unwrap();
        let err = router.process_incoming("B", "ani", "D2").unwrap_err();
        assert!(matches!(err, CoreError::Exhausted));

        router.process_return("D1", &a.did_assigned).unwrap();

        let c = router.process_incoming("C", "ani", "D3").unwrap();
        assert_eq!(c.did_assigned, a.did_assigned);
    }

    #[test]
    fn verification_failure_keeps_did_leased() {
        let (router, store) = router_with_dids(1);

        let incoming = router
            .process_incoming("A", "ANI_A", "DNIS_A")
            .unwrap();

        let err = router
            .process_return("WRONG", &incoming.did_assigned)
            .unwrap_err();
        assert!(matches!(err, CoreError::VerificationFailed));

        let (_, in_use) = store.did_count();
        assert_eq!(in_use, 1);
        assert_eq!(router.active_calls_count(), 1);

        let ret = router
            .process_return("DNIS_A", &incoming.did_assigned)
            .unwrap();
        assert_eq!(ret.ani_to_send, "ANI_A");
    }

    #[test]
    fn duplicate_call_id_is_rejected() {
        let (router, _store) = router_with_dids(2);
        router.process_incoming("A", "ani", "dnis").unwrap();
        let err = router.process_incoming("A", "ani2", "dnis2").unwrap_err();
        assert!(matches!(err, CoreError::Duplicate));
    }

    #[test]
    fn unknown_did_on_return() {
        let (router, _store) = router_with_dids(1);
        let err = router.process_return("ani", "18005559999").unwrap_err();
        assert!(matches!(err, CoreError::UnknownDID));
    }

    #[test]
    fn complete_call_is_idempotent() {
        let (router, store) = router_with_dids(1);
        let incoming = router.process_incoming("A", "ani", "dnis").unwrap();
        router.complete_call("A").unwrap();
        router.complete_call("A").unwrap();

        let (_, in_use) = store.did_count();
        assert_eq!(in_use, 0);
        let _ = incoming;
    }

    #[test]
    fn complete_call_falls_back_to_ledger_on_index_miss() {
        // A cold process (or a second process in a multi-process
        // deployment, spec.md §5): the ledger still has a non-terminal
        // record, but this router's Index never saw it.
        let store = Arc::new(InMemoryStore::new(SelectionMode::Random));
        store.seed_dids(1);
        let warm_index = Arc::new(ActiveCallIndex::new());
        let warm_router = Router::new(store.clone(), store.clone(), warm_index);
        let incoming = warm_router.process_incoming("A", "ani", "dnis").unwrap();

        let cold_index = Arc::new(ActiveCallIndex::new());
        let cold_router = Router::new(store.clone(), store.clone(), cold_index);
        assert_eq!(cold_router.active_calls_count(), 0);

        cold_router.complete_call("A").unwrap();

        let (_, in_use) = store.did_count();
        assert_eq!(in_use, 0);
        let record = store.find_by_call_id("A").unwrap().unwrap();
        assert_eq!(record.status, CallStatus::Completed);
        let _ = incoming;

        // Idempotent: a second call against the now-terminal ledger
        // record, still with no Index entry, is a no-op success.
        cold_router.complete_call("A").unwrap();
    }

    #[test]
    fn concurrent_allocation_never_double_assigns() {
        let n = 100;
        let (router, _store) = router_with_dids(n);
        let router = Arc::new(router);

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let router = router.clone();
                thread::spawn(move || {
                    router
                        .process_incoming(&format!("call-{i}"), "ani", &format!("dnis-{i}"))
                        .unwrap()
                        .did_assigned
                })
            })
            .collect();

        let mut dids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        dids.sort();
        dids.dedup();
        assert_eq!(dids.len(), n);
    }

    #[test]
    fn restart_recovery_uses_ledger_fallback() {
        // Simulate a crash after ProcessIncoming: the ledger and pool
        // carry the lease, but a fresh process has an empty Index.
        let store = Arc::new(InMemoryStore::new(SelectionMode::Sequential));
        store.seed_did("18005550001");
        let warm_index = Arc::new(ActiveCallIndex::new());
        let warm_router = Router::new(store.clone(), store.clone(), warm_index);
        let incoming = warm_router.process_incoming("A", "ANI_A", "DNIS_A").unwrap();

        let cold_index = Arc::new(ActiveCallIndex::new());
        let cold_router = Router::new(store.clone(), store.clone(), cold_index);
        assert_eq!(cold_router.active_calls_count(), 0);

        let ret = cold_router
            .process_return("DNIS_A", &incoming.did_assigned)
            .unwrap();
        assert_eq!(ret.ani_to_send, "ANI_A");

        let (_, in_use) = store.did_count();
        assert_eq!(in_use, 0);
    }
}
