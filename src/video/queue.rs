// Video generation job queue
//
// Same guarded-transition discipline as the thumbnail queue, plus the
// idempotence columns automation relies on: milestone_threshold for
// milestone triggers and period_key for scheduled triggers.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::constants::{JOB_LEASE_DURATION_SECONDS, JOB_MAX_RETRIES};
use crate::error::{LapseError, Result};
use crate::jobs::{backoff_minutes, worker_id, JobPriority, JobScope, PRIORITY_ORDER_SQL};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoJob {
    pub id: i64,
    pub timelapse_id: i64,
    pub camera_id: i64,
    pub trigger_type: String,
    pub milestone_threshold: Option<i64>,
    pub period_key: Option<String>,
    pub settings: Option<String>,
    pub video_path: Option<String>,
    pub priority: String,
    pub status: String,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub processing_time_ms: Option<i64>,
    pub claimed_by: Option<String>,
    pub run_token: Option<String>,
    pub lease_expires_at: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewVideoJob {
    pub timelapse_id: i64,
    pub camera_id: i64,
    pub trigger_type: String,
    pub milestone_threshold: Option<i64>,
    pub period_key: Option<String>,
    pub settings: Option<String>,
    pub priority: JobPriority,
}

const JOB_COLUMNS: &str = "id, timelapse_id, camera_id, trigger_type, milestone_threshold, period_key,
       settings, video_path, priority, status, error_message, retry_count,
       processing_time_ms, claimed_by, run_token, lease_expires_at,
       created_at, started_at, completed_at";

fn job_from_row(row: &Row) -> rusqlite::Result<VideoJob> {
    Ok(VideoJob {
        id: row.get(0)?,
        timelapse_id: row.get(1)?,
        camera_id: row.get(2)?,
        trigger_type: row.get(3)?,
        milestone_threshold: row.get(4)?,
        period_key: row.get(5)?,
        settings: row.get(6)?,
        video_path: row.get(7)?,
        priority: row.get(8)?,
        status: row.get(9)?,
        error_message: row.get(10)?,
        retry_count: row.get(11)?,
        processing_time_ms: row.get(12)?,
        claimed_by: row.get(13)?,
        run_token: row.get(14)?,
        lease_expires_at: row.get(15)?,
        created_at: row.get(16)?,
        started_at: row.get(17)?,
        completed_at: row.get(18)?,
    })
}

pub fn add_job(conn: &Connection, job: &NewVideoJob) -> Result<i64> {
    conn.execute(
        "INSERT INTO video_jobs (timelapse_id, camera_id, trigger_type, milestone_threshold,
                                 period_key, settings, priority)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            job.timelapse_id,
            job.camera_id,
            job.trigger_type,
            job.milestone_threshold,
            job.period_key,
            job.settings,
            job.priority.as_str(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_job(conn: &Connection, id: i64) -> Result<Option<VideoJob>> {
    let sql = format!("SELECT {} FROM video_jobs WHERE id = ?1", JOB_COLUMNS);
    let result = conn.query_row(&sql, params![id], job_from_row).optional()?;
    Ok(result)
}

/// Count of jobs currently being processed. The concurrency cap counts
/// rows rather than holding an in-memory semaphore so it stays correct
/// across worker processes.
pub fn count_processing(conn: &Connection) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM video_jobs WHERE status = 'processing'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Claim the next pending job, honoring the concurrency cap. Returns None
/// when at capacity or when nothing is eligible.
pub fn get_next_job(conn: &Connection, max_concurrent: i64) -> Result<Option<VideoJob>> {
    if count_processing(conn)? >= max_concurrent {
        return Ok(None);
    }

    let run_token = uuid::Uuid::new_v4().to_string();
    let lease = format!("+{} seconds", JOB_LEASE_DURATION_SECONDS);

    let sql = format!(
        r#"
        UPDATE video_jobs
        SET status = 'processing',
            claimed_by = ?1,
            run_token = ?2,
            lease_expires_at = datetime('now', ?3),
            started_at = datetime('now')
        WHERE id = (
            SELECT id FROM video_jobs
            WHERE status = 'pending'
              AND created_at <= datetime('now')
              AND retry_count < ?4
            ORDER BY {}, created_at ASC, id ASC
            LIMIT 1
        )
        RETURNING {}
        "#,
        PRIORITY_ORDER_SQL, JOB_COLUMNS
    );

    let result = conn.query_row(
        &sql,
        params![worker_id(), run_token, lease, JOB_MAX_RETRIES],
        job_from_row,
    );

    match result {
        Ok(job) => Ok(Some(job)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(LapseError::Database(e)),
    }
}

pub fn start_job(conn: &Connection, id: i64) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE video_jobs SET status = 'processing', started_at = datetime('now')
         WHERE id = ?1 AND status = 'pending'",
        params![id],
    )?;
    Ok(rows > 0)
}

pub fn complete_job(
    conn: &Connection,
    id: i64,
    run_token: &str,
    processing_time_ms: i64,
    video_path: &str,
) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE video_jobs SET status = 'completed', completed_at = datetime('now'),
                processing_time_ms = ?1, video_path = ?2
         WHERE id = ?3 AND status = 'processing' AND run_token = ?4",
        params![processing_time_ms, video_path, id, run_token],
    )?;
    Ok(rows > 0)
}

pub fn fail_job(conn: &Connection, id: i64, run_token: &str, error: &str) -> Result<bool> {
    let job = get_job(conn, id)?.ok_or(LapseError::JobNotFound(id))?;

    let attempt = job.retry_count + 1;
    if attempt >= JOB_MAX_RETRIES {
        let rows = conn.execute(
            "UPDATE video_jobs SET status = 'failed', error_message = ?1, retry_count = ?2,
                    completed_at = datetime('now')
             WHERE id = ?3 AND status = 'processing' AND run_token = ?4",
            params![error, attempt, id, run_token],
        )?;
        Ok(rows > 0)
    } else {
        let delay = format!("+{} minutes", backoff_minutes(attempt));
        let rows = conn.execute(
            "UPDATE video_jobs SET status = 'pending', error_message = NULL, retry_count = ?1,
                    claimed_by = NULL, run_token = NULL, lease_expires_at = NULL,
                    created_at = datetime('now', ?2)
             WHERE id = ?3 AND status = 'processing' AND run_token = ?4",
            params![attempt, delay, id, run_token],
        )?;
        Ok(rows > 0)
    }
}

pub fn schedule_retry(conn: &Connection, id: i64, retry_count: i64, delay_minutes: i64) -> Result<bool> {
    let delay = format!("+{} minutes", delay_minutes);
    let rows = conn.execute(
        "UPDATE video_jobs SET status = 'pending', error_message = NULL, retry_count = ?1,
                claimed_by = NULL, run_token = NULL, lease_expires_at = NULL,
                created_at = datetime('now', ?2)
         WHERE id = ?3 AND status = 'processing'",
        params![retry_count, delay, id],
    )?;
    Ok(rows > 0)
}

pub fn cancel_jobs(conn: &Connection, scope: &JobScope) -> Result<usize> {
    let mut sql = String::from(
        "UPDATE video_jobs SET status = 'cancelled', completed_at = datetime('now')
         WHERE status IN ('pending', 'processing')",
    );
    let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(camera_id) = scope.camera_id {
        sql.push_str(&format!(" AND camera_id = ?{}", sql_params.len() + 1));
        sql_params.push(Box::new(camera_id));
    }
    if let Some(timelapse_id) = scope.timelapse_id {
        sql.push_str(&format!(" AND timelapse_id = ?{}", sql_params.len() + 1));
        sql_params.push(Box::new(timelapse_id));
    }
    if let Some(ref job_type) = scope.job_type {
        sql.push_str(&format!(" AND job_type = ?{}", sql_params.len() + 1));
        sql_params.push(Box::new(job_type.clone()));
    }

    let rows = conn.execute(&sql, params_from_iter(sql_params.iter().map(|p| p.as_ref())))?;
    Ok(rows)
}

pub fn reclaim_expired(conn: &Connection) -> Result<usize> {
    let rows = conn.execute(
        "UPDATE video_jobs SET status = 'pending', claimed_by = NULL, run_token = NULL,
                lease_expires_at = NULL
         WHERE status = 'processing'
           AND lease_expires_at IS NOT NULL
           AND lease_expires_at < datetime('now')
           AND retry_count < ?1",
        params![JOB_MAX_RETRIES],
    )?;
    Ok(rows)
}

pub fn cleanup_terminal(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = format!("-{} days", retention_days);
    let rows = conn.execute(
        "DELETE FROM video_jobs
         WHERE status IN ('completed', 'failed', 'cancelled')
           AND completed_at < datetime('now', ?1)",
        params![cutoff],
    )?;
    Ok(rows)
}

pub fn count_by_status(conn: &Connection, scope: &JobScope) -> Result<Vec<(String, i64)>> {
    let mut sql = String::from("SELECT status, COUNT(*) FROM video_jobs WHERE 1=1");
    let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(camera_id) = scope.camera_id {
        sql.push_str(&format!(" AND camera_id = ?{}", sql_params.len() + 1));
        sql_params.push(Box::new(camera_id));
    }
    if let Some(timelapse_id) = scope.timelapse_id {
        sql.push_str(&format!(" AND timelapse_id = ?{}", sql_params.len() + 1));
        sql_params.push(Box::new(timelapse_id));
    }
    if let Some(ref job_type) = scope.job_type {
        sql.push_str(&format!(" AND job_type = ?{}", sql_params.len() + 1));
        sql_params.push(Box::new(job_type.clone()));
    }
    sql.push_str(" GROUP BY status ORDER BY status");

    let mut stmt = conn.prepare(&sql)?;
    let counts = stmt
        .query_map(params_from_iter(sql_params.iter().map(|p| p.as_ref())), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(counts)
}

/// Whether a job for this exact milestone already exists (any state but
/// cancelled). Guards milestone triggers against double-firing.
pub fn exists_milestone_job(conn: &Connection, timelapse_id: i64, threshold: i64) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM video_jobs
            WHERE timelapse_id = ?1 AND trigger_type = 'milestone'
              AND milestone_threshold = ?2 AND status != 'cancelled'
        )",
        params![timelapse_id, threshold],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Whether a scheduled job already fired for this day/week period.
pub fn exists_period_job(conn: &Connection, timelapse_id: i64, period_key: &str) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM video_jobs
            WHERE timelapse_id = ?1 AND trigger_type = 'scheduled'
              AND period_key = ?2 AND status != 'cancelled'
        )",
        params![timelapse_id, period_key],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Whether any generation was queued for this camera within the throttle
/// window. Used to damp per-capture triggers.
pub fn recently_generated(conn: &Connection, camera_id: i64, window_minutes: i64) -> Result<bool> {
    let window = format!("-{} minutes", window_minutes);
    let exists = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM video_jobs
            WHERE camera_id = ?1 AND created_at > datetime('now', ?2)
        )",
        params![camera_id, window],
        |row| row.get(0),
    )?;
    Ok(exists)
}
