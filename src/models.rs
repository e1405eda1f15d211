//! The durable data model: `Did` and `CallRecord`, per `spec.md` §3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Did {
    pub did: String,
    pub country: String,
    pub in_use: bool,
    pub destination: Option<String>,
    pub last_used: DateTime<Utc>,
}

impl Did {
    pub fn free(did: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            did: did.into(),
            country: country.into(),
            in_use: false,
            destination: None,
            last_used: Utc::now(),
        }
    }
}

/// `spec.md` §9 resolves the two divergent Go status vocabularies by
/// adopting the richer one. `InProgress`/`Returning` behave as
/// `Started` for routing correctness (`spec.md` §4.4) but are kept as
/// distinct ledger states for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Started,
    InProgress,
    Returning,
    Completed,
    Failed,
    Timeout,
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Failed | CallStatus::Timeout)
    }
}

impl std::str::FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(CallStatus::Started),
            "in_progress" => Ok(CallStatus::InProgress),
            "returning" => Ok(CallStatus::Returning),
            "completed" => Ok(CallStatus::Completed),
            "failed" => Ok(CallStatus::Failed),
            "timeout" => Ok(CallStatus::Timeout),
            other => Err(format!("unrecognised call status: {other}")),
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallStatus::Started => "started",
            CallStatus::InProgress => "in_progress",
            CallStatus::Returning => "returning",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
            CallStatus::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    pub ani_original: String,
    pub dnis_original: String,
    pub ani_modified: String,
    pub did_used: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<i64>,
    pub status: CallStatus,
    pub server_origin: String,
    pub server_destination: String,
    pub call_path: String,
}

impl CallRecord {
    /// Builds the record `ProcessIncoming` writes on a fresh forward leg.
    pub fn new_incoming(call_id: String, ani: String, dnis: String, did: String) -> Self {
        Self {
            call_id,
            ani_original: ani,
            dnis_original: dnis.clone(),
            ani_modified: dnis,
            did_used: did,
            start_time: Utc::now(),
            end_time: None,
            duration: None,
            status: CallStatus::Started,
            server_origin: "S1".to_string(),
            server_destination: "S3".to_string(),
            call_path: "S1->S2->S3".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub total_calls: u64,
    pub completed: u64,
    pub failed: u64,
    pub active: u64,
    pub avg_duration_s: f64,
    pub success_rate_pct: f64,
    pub total_dids: u64,
    pub in_use_dids: u64,
    pub available_dids: u64,
}
