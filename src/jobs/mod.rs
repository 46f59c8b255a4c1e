// Job system module
//
// Background work is coordinated entirely through the job tables. Every
// status transition is a conditional UPDATE guarded by the expected prior
// status (and the claim's run token where one exists); zero rows affected
// means another worker got there first. There are no in-process locks --
// the guarded updates stay correct across OS process boundaries.

pub mod coordinator;
pub mod runner;
pub mod thumbnail;
pub mod worker;

use serde::{Deserialize, Serialize};

use crate::constants::JOB_BASE_BACKOFF_MINUTES;

/// Queue priority. Dequeue order is high > medium > low, FIFO within a
/// priority band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    Medium,
    Low,
}

impl JobPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::High => "high",
            JobPriority::Medium => "medium",
            JobPriority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(JobPriority::High),
            "medium" => Some(JobPriority::Medium),
            "low" => Some(JobPriority::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// SQL fragment ranking priorities for ORDER BY.
pub const PRIORITY_ORDER_SQL: &str =
    "CASE priority WHEN 'high' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END";

/// Filter for bulk job operations. All fields are optional and AND-ed.
#[derive(Debug, Clone, Default)]
pub struct JobScope {
    pub camera_id: Option<i64>,
    pub timelapse_id: Option<i64>,
    pub job_type: Option<String>,
}

/// Worker identifier recorded on claimed jobs.
pub fn worker_id() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let pid = std::process::id();
    format!("{}:{}", hostname, pid)
}

/// Exponential backoff delay for the given (1-based) retry attempt.
pub fn backoff_minutes(attempt: i64) -> i64 {
    JOB_BASE_BACKOFF_MINUTES * 2_i64.pow((attempt.max(1) - 1) as u32)
}
