//! The Call Ledger interface, `spec.md` §4.2.

use chrono::{DateTime, Utc};

use crate::error::CoreResult;
use crate::models::{CallRecord, CallStatus, Statistics};

pub trait CallLedger: Send + Sync {
    /// Inserts a new record. Fails with `CoreError::Duplicate` on a
    /// `call_id` collision.
    fn create(&self, record: CallRecord) -> CoreResult<()>;

    /// Updates status (and, on a terminal transition, `end_time` and
    /// `duration`). Monotonic: never overwrites a terminal status with
    /// a non-terminal one. Idempotent on identical inputs.
    fn update_status(
        &self,
        call_id: &str,
        status: CallStatus,
        end_time: Option<DateTime<Utc>>,
        duration: Option<i64>,
    ) -> CoreResult<()>;

    /// Returns the most recent non-terminal record for `did`, if any.
    fn find_active_by_did(&self, did: &str) -> CoreResult<Option<CallRecord>>;

    /// Returns a single record by `call_id`, regardless of status.
    fn find_by_call_id(&self, call_id: &str) -> CoreResult<Option<CallRecord>>;

    fn recent(&self, limit: u32) -> CoreResult<Vec<CallRecord>>;

    fn statistics(&self) -> CoreResult<Statistics>;
}
