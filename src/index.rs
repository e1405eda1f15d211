//! The Active-Call Index: the in-memory acceleration structure of
//! `spec.md` §4.3. One `RwLock` guards both maps — the contention bound
//! is the backing store, not the maps (`spec.md` §9, Design Notes).

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

/// A cached copy of the fields a return leg needs, per `spec.md` §3.
#[derive(Debug, Clone)]
pub struct CallState {
    pub call_id: String,
    pub ani_original: String,
    pub dnis_original: String,
    pub did_used: String,
    pub start_time: DateTime<Utc>,
}

#[derive(Default)]
struct IndexInner {
    by_call_id: HashMap<String, CallState>,
    by_did: HashMap<String, String>,
}

pub struct ActiveCallIndex {
    inner: RwLock<IndexInner>,
}

impl Default for ActiveCallIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveCallIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexInner::default()),
        }
    }

    /// Inserts both entries atomically with respect to other holders.
    pub fn insert(&self, state: CallState) {
        let mut inner = self.inner.write().unwrap();
        inner.by_did.insert(state.did_used.clone(), state.call_id.clone());
        inner.by_call_id.insert(state.call_id.clone(), state);
    }

    pub fn get_by_call_id(&self, call_id: &str) -> Option<CallState> {
        self.inner.read().unwrap().by_call_id.get(call_id).cloned()
    }

    pub fn get_by_did(&self, did: &str) -> Option<CallState> {
        let inner = self.inner.read().unwrap();
        let call_id = inner.by_did.get(did)?;
        inner.by_call_id.get(call_id).cloned()
    }

    pub fn contains_call_id(&self, call_id: &str) -> bool {
        self.inner.read().unwrap().by_call_id.contains_key(call_id)
    }

    /// Removes both entries for a call. No-op if the call isn't indexed.
    pub fn remove_by_call_id(&self, call_id: &str) -> Option<CallState> {
        let mut inner = self.inner.write().unwrap();
        let state = inner.by_call_id.remove(call_id)?;
        inner.by_did.remove(&state.did_used);
        Some(state)
    }

    /// Used by `ProcessReturn`'s ledger-fallback path to rebuild a
    /// missing entry after an Index miss (`spec.md` §4.4 step 1).
    pub fn rebuild_one(&self, state: CallState) {
        self.insert(state)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().by_call_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns call ids whose `start_time` is older than `threshold`,
    /// for the Reclaimer's orphan scan (`spec.md` §4.5). Takes the
    /// write lock for the whole scan, as `spec.md` §5 requires, and
    /// removes the entries it returns so the caller doesn't need a
    /// second pass.
    pub fn drain_expired(&self, cutoff: DateTime<Utc>) -> Vec<CallState> {
        let mut inner = self.inner.write().unwrap();
        let expired_ids: Vec<String> = inner
            .by_call_id
            .iter()
            .filter(|(_, state)| state.start_time < cutoff)
            .map(|(call_id, _)| call_id.clone())
            .collect();

        expired_ids
            .into_iter()
            .filter_map(|call_id| {
                let state = inner.by_call_id.remove(&call_id)?;
                inner.by_did.remove(&state.did_used);
                Some(state)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn state(call_id: &str, did: &str, age: Duration) -> CallState {
        CallState {
            call_id: call_id.to_string(),
            ani_original: "15551112222".to_string(),
            dnis_original: "13334445555".to_string(),
            did_used: did.to_string(),
            start_time: Utc::now() - age,
        }
    }

    #[test]
    fn insert_is_visible_from_both_maps() {
        let index = ActiveCallIndex::new();
        index.insert(state("call-A", "18005550001", Duration::zero()));

        assert!(index.get_by_call_id("call-A").is_some());
        assert_eq!(index.get_by_did("18005550001").unwrap().call_id, "call-A");
    }

    #[test]
    fn remove_clears_both_maps() {
        let index = ActiveCallIndex::new();
        index.insert(state("call-A", "18005550001", Duration::zero()));
        index.remove_by_call_id("call-A");

        assert!(index.get_by_call_id("call-A").is_none());
        assert!(index.get_by_did("18005550001").is_none());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn drain_expired_only_takes_old_entries() {
        let index = ActiveCallIndex::new();
        index.insert(state("call-old", "18005550001", Duration::seconds(400)));
        index.insert(state("call-new", "18005550002", Duration::seconds(1)));

        let expired = index.drain_expired(Utc::now() - Duration::seconds(300));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].call_id, "call-old");
        assert!(index.get_by_call_id("call-new").is_some());
        assert!(index.get_by_call_id("call-old").is_none());
    }
}
