use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::domain::ids::{CityId, JobId};

pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;
/// Geometric backoff between retries, in seconds.
pub const DEFAULT_BACKOFF_SECS: [u64; 4] = [60, 300, 900, 3600];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    BootstrapCity,
    IngestReddit,
    ComputeAggregations,
    RefreshMvs,
}

impl JobType {
    pub const fn as_str(self) -> &'static str {
        match self {
            JobType::BootstrapCity => "bootstrap_city",
            JobType::IngestReddit => "ingest_reddit",
            JobType::ComputeAggregations => "compute_aggregations",
            JobType::RefreshMvs => "refresh_mvs",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "bootstrap_city" => Some(JobType::BootstrapCity),
            "ingest_reddit" => Some(JobType::IngestReddit),
            "compute_aggregations" => Some(JobType::ComputeAggregations),
            "refresh_mvs" => Some(JobType::RefreshMvs),
            _ => None,
        }
    }

    pub const ALL: [JobType; 4] = [
        JobType::BootstrapCity,
        JobType::IngestReddit,
        JobType::ComputeAggregations,
        JobType::RefreshMvs,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "done" => Some(JobStatus::Done),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub payload: serde_json::Value,
}

impl NewJob {
    pub fn new(job_type: JobType, payload: serde_json::Value) -> Self {
        Self { job_type, payload }
    }

    /// Deterministic identity for idempotent enqueue: object keys are sorted
    /// recursively before hashing, so equal payloads hash equally regardless
    /// of construction order.
    pub fn payload_hash(&self) -> String {
        let mut canonical = String::new();
        write_canonical(&self.payload, &mut canonical);
        let digest = Sha256::digest(canonical.as_bytes());
        let mut out = String::with_capacity(64);
        for byte in digest {
            use std::fmt::Write;
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

// --- Typed payloads ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapCityPayload {
    pub city_query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityPayload {
    pub city_id: CityId,
}

/// Empty payload for refresh_mvs; kept as a struct so the payload hash stays
/// stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshPayload {}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Delay before the next attempt. `attempts` is the count after the failure
/// being retried, so the first retry uses `backoff[0]`. The sequence's last
/// entry applies to any further attempts.
pub fn backoff_delay(attempts: i32, backoff_secs: &[u64]) -> Duration {
    let index = usize::try_from(attempts.max(1) - 1).unwrap_or(0);
    let secs = backoff_secs
        .get(index)
        .or_else(|| backoff_secs.last())
        .copied()
        .unwrap_or(60);
    Duration::from_secs(secs)
}
