//! `MysqlStore`: the real backing store, over the `mysql` crate — the
//! same synchronous, row-locking client the teacher depends on.
//! `SELECT ... FOR UPDATE` inside an explicit transaction is exactly
//! the pattern the original Go `GetAvailableDID` uses, and is what
//! `spec.md` §4.1 requires for serialisable Acquire/Release.

use std::time::Duration;

use chrono::{NaiveDateTime, TimeZone, Utc};
use mysql::prelude::Queryable;
use mysql::{params, Opts, Pool, TxOpts};

use crate::error::{CoreError, CoreResult};
use crate::models::{CallRecord, CallStatus, Did, Statistics};
use crate::router::SelectionMode;

use super::{CallLedger, DidPool};

pub struct MysqlStore {
    pool: Pool,
    selection_mode: SelectionMode,
}

impl MysqlStore {
    pub fn connect(dsn: &str, selection_mode: SelectionMode) -> CoreResult<Self> {
        let opts = Opts::from_url(dsn)
            .map_err(|e| CoreError::StoreUnavailable(format!("invalid DSN: {e}")))?;
        let pool = Pool::new(opts)?;
        // Fail fast: a dead connection at startup is the one fatal
        // condition spec.md §7 names.
        pool.get_conn()?;
        Ok(Self { pool, selection_mode })
    }

    fn naive(dt: chrono::DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn from_naive(naive: NaiveDateTime) -> chrono::DateTime<Utc> {
        Utc.from_utc_datetime(&naive)
    }

    /// Upserts one DID row for the CSV importer (`spec.md` §6): a new
    /// DID is inserted free; an existing one only has its `country`
    /// updated, leaving its lease state untouched.
    pub fn import_did(&self, did: &str, country: &str) -> CoreResult<()> {
        let mut conn = self.pool.get_conn()?;
        conn.exec_drop(
            "INSERT INTO dids (did, country, in_use, last_used) VALUES (:did, :country, 0, :now) \
             ON DUPLICATE KEY UPDATE country = VALUES(country)",
            params! {
                "did" => did,
                "country" => country,
                "now" => Self::naive(Utc::now()),
            },
        )?;
        Ok(())
    }
}

impl DidPool for MysqlStore {
    fn acquire(&self, destination: &str) -> CoreResult<Did> {
        let mut conn = self.pool.get_conn()?;
        let mut tx = conn.start_transaction(TxOpts::default())?;

        let query = match self.selection_mode {
            SelectionMode::Random => {
                "SELECT did, country FROM dids WHERE in_use = 0 ORDER BY RAND() LIMIT 1 FOR UPDATE"
            }
            SelectionMode::Sequential => {
                "SELECT did, country FROM dids WHERE in_use = 0 ORDER BY did ASC LIMIT 1 FOR UPDATE"
            }
        };

        let row: Option<(String, String)> = tx.exec_first(query, ())?;
        let (did, country) = match row {
            Some(row) => row,
            None => {
                tx.rollback()?;
                return Err(CoreError::Exhausted);
            }
        };

        let last_used = Utc::now();
        tx.exec_drop(
            "UPDATE dids SET in_use = 1, destination = :destination, last_used = :last_used WHERE did = :did",
            params! {
                "destination" => destination,
                "last_used" => Self::naive(last_used),
                "did" => &did,
            },
        )?;
        tx.commit()?;

        Ok(Did {
            did,
            country,
            in_use: true,
            destination: Some(destination.to_string()),
            last_used,
        })
    }

    fn release(&self, did: &str) -> CoreResult<()> {
        let mut conn = self.pool.get_conn()?;
        conn.exec_drop(
            "UPDATE dids SET in_use = 0, destination = NULL WHERE did = :did",
            params! { "did" => did },
        )?;
        Ok(())
    }

    fn lookup_destination(&self, did: &str) -> CoreResult<Option<String>> {
        let mut conn = self.pool.get_conn()?;
        let destination: Option<Option<String>> = conn.exec_first(
            "SELECT destination FROM dids WHERE did = :did",
            params! { "did" => did },
        )?;
        Ok(destination.flatten())
    }

    fn sweep_stuck(&self, threshold: Duration) -> CoreResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(threshold)
            .map_err(|e| CoreError::InternalError(e.to_string()))?;
        let mut conn = self.pool.get_conn()?;
        conn.exec_drop(
            "UPDATE dids SET in_use = 0, destination = NULL WHERE in_use = 1 AND last_used < :cutoff",
            params! { "cutoff" => Self::naive(cutoff) },
        )?;
        Ok(conn.affected_rows())
    }
}

const CALL_RECORD_COLUMNS: &str = "call_id, ani_original, dnis_original, ani_modified, did_used, \
    start_time, end_time, duration, status, server_origin, server_destination, call_path";

type CallRecordRow = (
    String,
    String,
    String,
    String,
    String,
    NaiveDateTime,
    Option<NaiveDateTime>,
    Option<i64>,
    String,
    String,
    String,
    String,
);

fn row_to_record(row: CallRecordRow) -> CoreResult<CallRecord> {
    let (
        call_id,
        ani_original,
        dnis_original,
        ani_modified,
        did_used,
        start_time,
        end_time,
        duration,
        status,
        server_origin,
        server_destination,
        call_path,
    ) = row;

    let status: CallStatus = status
        .parse()
        .map_err(|e: String| CoreError::LedgerError(e))?;

    Ok(CallRecord {
        call_id,
        ani_original,
        dnis_original,
        ani_modified,
        did_used,
        start_time: MysqlStore::from_naive(start_time),
        end_time: end_time.map(MysqlStore::from_naive),
        duration,
        status,
        server_origin,
        server_destination,
        call_path,
    })
}

impl CallLedger for MysqlStore {
    fn create(&self, record: CallRecord) -> CoreResult<()> {
        let mut conn = self.pool.get_conn()?;
        let result = conn.exec_drop(
            "INSERT INTO call_records (call_id, ani_original, dnis_original, ani_modified, \
             did_used, start_time, status, server_origin, server_destination, call_path) \
             VALUES (:call_id, :ani_original, :dnis_original, :ani_modified, :did_used, \
             :start_time, :status, :server_origin, :server_destination, :call_path)",
            params! {
                "call_id" => &record.call_id,
                "ani_original" => &record.ani_original,
                "dnis_original" => &record.dnis_original,
                "ani_modified" => &record.ani_modified,
                "did_used" => &record.did_used,
                "start_time" => Self::naive(record.start_time),
                "status" => record.status.to_string(),
                "server_origin" => &record.server_origin,
                "server_destination" => &record.server_destination,
                "call_path" => &record.call_path,
            },
        );

        match result {
            Ok(()) => Ok(()),
            Err(mysql::Error::MySqlError(ref e)) if e.code == 1062 => {
                Err(CoreError::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn update_status(
        &self,
        call_id: &str,
        status: CallStatus,
        end_time: Option<chrono::DateTime<Utc>>,
        duration: Option<i64>,
    ) -> CoreResult<()> {
        let mut conn = self.pool.get_conn()?;
        conn.exec_drop(
            "UPDATE call_records SET status = :status, end_time = :end_time, duration = :duration \
             WHERE call_id = :call_id \
             AND status NOT IN ('completed', 'failed', 'timeout')",
            params! {
                "status" => status.to_string(),
                "end_time" => end_time.map(Self::naive),
                "duration" => duration,
                "call_id" => call_id,
            },
        )?;
        Ok(())
    }

    fn find_active_by_did(&self, did: &str) -> CoreResult<Option<CallRecord>> {
        let query = format!(
            "SELECT {CALL_RECORD_COLUMNS} FROM call_records \
             WHERE did_used = :did AND status NOT IN ('completed', 'failed', 'timeout') \
             ORDER BY start_time DESC LIMIT 1"
        );
        let mut conn = self.pool.get_conn()?;
        let row: Option<CallRecordRow> = conn.exec_first(query, params! { "did" => did })?;
        row.map(row_to_record).transpose()
    }

    fn find_by_call_id(&self, call_id: &str) -> CoreResult<Option<CallRecord>> {
        let query = format!("SELECT {CALL_RECORD_COLUMNS} FROM call_records WHERE call_id = :call_id");
        let mut conn = self.pool.get_conn()?;
        let row: Option<CallRecordRow> = conn.exec_first(query, params! { "call_id" => call_id })?;
        row.map(row_to_record).transpose()
    }

    fn recent(&self, limit: u32) -> CoreResult<Vec<CallRecord>> {
        let query = format!(
            "SELECT {CALL_RECORD_COLUMNS} FROM call_records ORDER BY start_time DESC LIMIT :limit"
        );
        let mut conn = self.pool.get_conn()?;
        let rows: Vec<CallRecordRow> = conn.exec(query, params! { "limit" => limit })?;
        rows.into_iter().map(row_to_record).collect()
    }

    fn statistics(&self) -> CoreResult<Statistics> {
        let mut conn = self.pool.get_conn()?;

        let call_row: Option<(u64, u64, u64, u64, Option<f64>)> = conn.exec_first(
            "SELECT \
                COUNT(*), \
                SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), \
                SUM(CASE WHEN status IN ('failed', 'timeout') THEN 1 ELSE 0 END), \
                SUM(CASE WHEN status IN ('started', 'in_progress', 'returning') THEN 1 ELSE 0 END), \
                AVG(CASE WHEN status = 'completed' THEN duration END) \
             FROM call_records",
            (),
        )?;
        let (total_calls, completed, failed, active, avg_duration_s) =
            call_row.unwrap_or((0, 0, 0, 0, None));

        let did_row: Option<(u64, u64)> = conn.exec_first(
            "SELECT COUNT(*), SUM(CASE WHEN in_use = 1 THEN 1 ELSE 0 END) FROM dids",
            (),
        )?;
        let (total_dids, in_use_dids) = did_row.unwrap_or((0, 0));

        let success_rate_pct = if total_calls > 0 {
            completed as f64 / total_calls as f64 * 100.0
        } else {
            0.0
        };

        Ok(Statistics {
            total_calls,
            completed,
            failed,
            active,
            avg_duration_s: avg_duration_s.unwrap_or(0.0),
            success_rate_pct,
            total_dids,
            in_use_dids,
            available_dids: total_dids.saturating_sub(in_use_dids),
        })
    }
}
