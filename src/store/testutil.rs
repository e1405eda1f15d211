//! An in-memory double of `DidPool` + `CallLedger`, used to test the
//! Router and Reclaimer without a live MySQL instance. Grounded in
//! `spec.md` §9's own guidance to thread an explicit store value rather
//! than rely on a process-wide handle: this is simply a second,
//! test-only implementation of the same two traits `MysqlStore`
//! implements.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rand::seq::SliceRandom;

use crate::error::{CoreError, CoreResult};
use crate::models::{CallRecord, CallStatus, Did, Statistics};
use crate::router::SelectionMode;

use super::{CallLedger, DidPool};

struct Inner {
    dids: HashMap<String, Did>,
    calls: HashMap<String, CallRecord>,
}

/// A single in-process store implementing both backing-store traits
/// over one shared `Mutex`, standing in for the one MySQL database the
/// real `DidPool` and `CallLedger` impls share.
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    selection_mode: SelectionMode,
}

impl InMemoryStore {
    pub fn new(selection_mode: SelectionMode) -> Self {
        Self {
            inner: Mutex::new(Inner {
                dids: HashMap::new(),
                calls: HashMap::new(),
            }),
            selection_mode,
        }
    }

    /// Seeds the pool with `count` free DIDs, numbered sequentially
    /// from `18005550001`, as the CSV importer would after a bulk load.
    pub fn seed_dids(&self, count: usize) {
        let mut inner = self.inner.lock().unwrap();
        for i in 0..count {
            let did = format!("1800555{:04}", i + 1);
            inner.dids.insert(did.clone(), Did::free(did, "US"));
        }
    }

    pub fn seed_did(&self, did: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.dids.insert(did.to_string(), Did::free(did, "US"));
    }

    pub fn did_count(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        let in_use = inner.dids.values().filter(|d| d.in_use).count();
        (inner.dids.len(), in_use)
    }
}

impl DidPool for InMemoryStore {
    fn acquire(&self, destination: &str) -> CoreResult<Did> {
        let mut inner = self.inner.lock().unwrap();
        let mut free: Vec<String> = inner
            .dids
            .values()
            .filter(|d| !d.in_use)
            .map(|d| d.did.clone())
            .collect();

        if free.is_empty() {
            return Err(CoreError::Exhausted);
        }

        free.sort();
        let chosen = match self.selection_mode {
            SelectionMode::Sequential => free.into_iter().next().unwrap(),
            SelectionMode::Random => free.choose(&mut rand::thread_rng()).unwrap().clone(),
        };

        let did = inner.dids.get_mut(&chosen).unwrap();
        did.in_use = true;
        did.destination = Some(destination.to_string());
        did.last_used = Utc::now();
        Ok(did.clone())
    }

    fn release(&self, did: &str) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(d) = inner.dids.get_mut(did) {
            d.in_use = false;
            d.destination = None;
        }
        Ok(())
    }

    fn lookup_destination(&self, did: &str) -> CoreResult<Option<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.dids.get(did).and_then(|d| d.destination.clone()))
    }

    fn sweep_stuck(&self, threshold: Duration) -> CoreResult<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(threshold)
                .map_err(|e| CoreError::InternalError(e.to_string()))?;
        let mut inner = self.inner.lock().unwrap();
        let mut count = 0;
        for did in inner.dids.values_mut() {
            if did.in_use && did.last_used < cutoff {
                did.in_use = false;
                did.destination = None;
                count += 1;
            }
        }
        Ok(count)
    }
}

impl CallLedger for InMemoryStore {
    fn create(&self, record: CallRecord) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.calls.contains_key(&record.call_id) {
            return Err(CoreError::Duplicate);
        }
        inner.calls.insert(record.call_id.clone(), record);
        Ok(())
    }

    fn update_status(
        &self,
        call_id: &str,
        status: CallStatus,
        end_time: Option<chrono::DateTime<Utc>>,
        duration: Option<i64>,
    ) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.calls.get_mut(call_id) {
            if record.status.is_terminal() {
                return Ok(());
            }
            record.status = status;
            record.end_time = end_time;
            record.duration = duration;
        }
        Ok(())
    }

    fn find_active_by_did(&self, did: &str) -> CoreResult<Option<CallRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .calls
            .values()
            .filter(|r| r.did_used == did && !r.status.is_terminal())
            .max_by_key(|r| r.start_time)
            .cloned())
    }

    fn find_by_call_id(&self, call_id: &str) -> CoreResult<Option<CallRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.calls.get(call_id).cloned())
    }

    fn recent(&self, limit: u32) -> CoreResult<Vec<CallRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut records: Vec<CallRecord> = inner.calls.values().cloned().collect();
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        records.truncate(limit as usize);
        Ok(records)
    }

    fn statistics(&self) -> CoreResult<Statistics> {
        let inner = self.inner.lock().unwrap();
        let total_calls = inner.calls.len() as u64;
        let completed = inner
            .calls
            .values()
            .filter(|r| r.status == CallStatus::Completed)
            .count() as u64;
        let failed = inner
            .calls
            .values()
            .filter(|r| matches!(r.status, CallStatus::Failed | CallStatus::Timeout))
            .count() as u64;
        let active = total_calls - completed - failed;

        let completed_durations: Vec<i64> = inner
            .calls
            .values()
            .filter(|r| r.status == CallStatus::Completed)
            .filter_map(|r| r.duration)
            .collect();
        let avg_duration_s = if completed_durations.is_empty() {
            0.0
        } else {
            completed_durations.iter().sum::<i64>() as f64 / completed_durations.len() as f64
        };

        let total_dids = inner.dids.len() as u64;
        let in_use_dids = inner.dids.values().filter(|d| d.in_use).count() as u64;

        Ok(Statistics {
            total_calls,
            completed,
            failed,
            active,
            avg_duration_s,
            success_rate_pct: if total_calls > 0 {
                completed as f64 / total_calls as f64 * 100.0
            } else {
                0.0
            },
            total_dids,
            in_use_dids,
            available_dids: total_dids.saturating_sub(in_use_dids),
        })
    }
}
