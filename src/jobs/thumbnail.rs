// Thumbnail/overlay job queue
//
// Persistent priority queue over the thumbnail_jobs table. Jobs reference
// images weakly: if the image is gone by the time a worker claims the job,
// the runner cancels it and moves on.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::constants::{JOB_LEASE_DURATION_SECONDS, JOB_MAX_RETRIES};
use crate::db::schema;
use crate::error::{LapseError, Result};
use super::{backoff_minutes, worker_id, JobPriority, JobScope, PRIORITY_ORDER_SQL};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailJob {
    pub id: i64,
    pub image_id: i64,
    pub job_type: String,
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

const JOB_COLUMNS: &str = "id, image_id, job_type, priority, status, error_message, retry_count,
       processing_time_ms, claimed_by, run_token, lease_expires_at,
       created_at, started_at, completed_at";

fn job_from_row(row: &Row) -> rusqlite::Result<ThumbnailJob> {
    Ok(ThumbnailJob {
        id: row.get(0)?,
        image_id: row.get(1)?,
        job_type: row.get(2)?,
        priority: row.get(3)?,
        status: row.get(4)?,
        error_message: row.get(5)?,
        retry_count: row.get(6)?,
        processing_time_ms: row.get(7)?,
        claimed_by: row.get(8)?,
        run_token: row.get(9)?,
        lease_expires_at: row.get(10)?,
        created_at: row.get(11)?,
        started_at: row.get(12)?,
        completed_at: row.get(13)?,
    })
}

/// Queue a thumbnail or overlay job.
pub fn add_job(conn: &Connection, image_id: i64, job_type: &str, priority: JobPriority) -> Result<i64> {
    conn.execute(
        "INSERT INTO thumbnail_jobs (image_id, job_type, priority) VALUES (?1, ?2, ?3)",
        params![image_id, job_type, priority.as_str()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_job(conn: &Connection, id: i64) -> Result<Option<ThumbnailJob>> {
    let sql = format!("SELECT {} FROM thumbnail_jobs WHERE id = ?1", JOB_COLUMNS);
    let result = conn.query_row(&sql, params![id], job_from_row).optional()?;
    Ok(result)
}

/// Claim the next pending job with a lease. Ordering is priority band
/// first, then FIFO by created_at. Retried jobs have their created_at
/// pushed into the future, so the created_at filter is what makes the
/// retry delay wall-clock effective.
pub fn get_next_job(conn: &Connection) -> Result<Option<ThumbnailJob>> {
    let run_token = uuid::Uuid::new_v4().to_string();
    let lease = format!("+{} seconds", JOB_LEASE_DURATION_SECONDS);

    let sql = format!(
        r#"
        UPDATE thumbnail_jobs
        SET status = 'processing',
            claimed_by = ?1,
            run_token = ?2,
            lease_expires_at = datetime('now', ?3),
            started_at = datetime('now')
        WHERE id = (
            SELECT id FROM thumbnail_jobs
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

/// Transition a specific pending job to processing. Exactly one of any
/// number of concurrent callers wins; the rest get false.
pub fn start_job(conn: &Connection, id: i64) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE thumbnail_jobs SET status = 'processing', started_at = datetime('now')
         WHERE id = ?1 AND status = 'pending'",
        params![id],
    )?;
    Ok(rows > 0)
}

/// Complete a processing job. The run token guard keeps a reclaimed job
/// from being finished by the worker that lost it.
pub fn complete_job(
    conn: &Connection,
    id: i64,
    run_token: &str,
    processing_time_ms: i64,
) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE thumbnail_jobs SET status = 'completed', completed_at = datetime('now'),
                processing_time_ms = ?1
         WHERE id = ?2 AND status = 'processing' AND run_token = ?3",
        params![processing_time_ms, id, run_token],
    )?;
    Ok(rows > 0)
}

/// Fail a processing job: schedule a backoff retry, or mark it failed
/// once retries are exhausted.
pub fn fail_job(conn: &Connection, id: i64, run_token: &str, error: &str) -> Result<bool> {
    let job = get_job(conn, id)?.ok_or(LapseError::JobNotFound(id))?;

    let attempt = job.retry_count + 1;
    if attempt >= JOB_MAX_RETRIES {
        let rows = conn.execute(
            "UPDATE thumbnail_jobs SET status = 'failed', error_message = ?1, retry_count = ?2,
                    completed_at = datetime('now')
             WHERE id = ?3 AND status = 'processing' AND run_token = ?4",
            params![error, attempt, id, run_token],
        )?;
        Ok(rows > 0)
    } else {
        let delay = format!("+{} minutes", backoff_minutes(attempt));
        let rows = conn.execute(
            "UPDATE thumbnail_jobs SET status = 'pending', error_message = NULL, retry_count = ?1,
                    claimed_by = NULL, run_token = NULL, lease_expires_at = NULL,
                    created_at = datetime('now', ?2)
             WHERE id = ?3 AND status = 'processing' AND run_token = ?4",
            params![attempt, delay, id, run_token],
        )?;
        Ok(rows > 0)
    }
}

/// Reset a job to pending with a delay. Ordering is by created_at, so the
/// delay is applied by pushing created_at forward; the dequeue query's
/// created_at filter turns that into wall-clock eligibility.
pub fn schedule_retry(conn: &Connection, id: i64, retry_count: i64, delay_minutes: i64) -> Result<bool> {
    let delay = format!("+{} minutes", delay_minutes);
    let rows = conn.execute(
        "UPDATE thumbnail_jobs SET status = 'pending', error_message = NULL, retry_count = ?1,
                claimed_by = NULL, run_token = NULL, lease_expires_at = NULL,
                created_at = datetime('now', ?2)
         WHERE id = ?3 AND status = 'processing'",
        params![retry_count, delay, id],
    )?;
    Ok(rows > 0)
}

/// Cancel a single job regardless of its non-terminal state.
pub fn cancel_job(conn: &Connection, id: i64) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE thumbnail_jobs SET status = 'cancelled', completed_at = datetime('now')
         WHERE id = ?1 AND status IN ('pending', 'processing')",
        params![id],
    )?;
    Ok(rows > 0)
}

/// Bulk-cancel pending/processing jobs matching a scope. Workers holding
/// a cancelled job lose their conditional update and stop.
pub fn cancel_jobs(conn: &Connection, scope: &JobScope) -> Result<usize> {
    let mut sql = String::from(
        "UPDATE thumbnail_jobs SET status = 'cancelled', completed_at = datetime('now')
         WHERE status IN ('pending', 'processing')",
    );
    let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(camera_id) = scope.camera_id {
        sql.push_str(&format!(
            " AND image_id IN (SELECT id FROM images WHERE camera_id = ?{})",
            sql_params.len() + 1
        ));
        sql_params.push(Box::new(camera_id));
    }
    if let Some(timelapse_id) = scope.timelapse_id {
        sql.push_str(&format!(
            " AND image_id IN (SELECT id FROM images WHERE timelapse_id = ?{})",
            sql_params.len() + 1
        ));
        sql_params.push(Box::new(timelapse_id));
    }
    if let Some(ref job_type) = scope.job_type {
        sql.push_str(&format!(" AND job_type = ?{}", sql_params.len() + 1));
        sql_params.push(Box::new(job_type.clone()));
    }

    let rows = conn.execute(&sql, params_from_iter(sql_params.iter().map(|p| p.as_ref())))?;
    Ok(rows)
}

/// Re-queue processing jobs whose lease expired (crashed worker).
pub fn reclaim_expired(conn: &Connection) -> Result<usize> {
    let rows = conn.execute(
        "UPDATE thumbnail_jobs SET status = 'pending', claimed_by = NULL, run_token = NULL,
                lease_expires_at = NULL
         WHERE status = 'processing'
           AND lease_expires_at IS NOT NULL
           AND lease_expires_at < datetime('now')
           AND retry_count < ?1",
        params![JOB_MAX_RETRIES],
    )?;
    Ok(rows)
}

/// Hard-delete terminal jobs older than the retention window.
/// Pending/processing jobs are never touched.
pub fn cleanup_terminal(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = format!("-{} days", retention_days);
    let rows = conn.execute(
        "DELETE FROM thumbnail_jobs
         WHERE status IN ('completed', 'failed', 'cancelled')
           AND completed_at < datetime('now', ?1)",
        params![cutoff],
    )?;
    Ok(rows)
}

/// Status counts, optionally restricted to a scope.
pub fn count_by_status(conn: &Connection, scope: &JobScope) -> Result<Vec<(String, i64)>> {
    let mut sql = String::from("SELECT status, COUNT(*) FROM thumbnail_jobs WHERE 1=1");
    let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(camera_id) = scope.camera_id {
        sql.push_str(&format!(
            " AND image_id IN (SELECT id FROM images WHERE camera_id = ?{})",
            sql_params.len() + 1
        ));
        sql_params.push(Box::new(camera_id));
    }
    if let Some(timelapse_id) = scope.timelapse_id {
        sql.push_str(&format!(
            " AND image_id IN (SELECT id FROM images WHERE timelapse_id = ?{})",
            sql_params.len() + 1
        ));
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

/// Look up the image a job targets; None means the job is orphaned.
pub fn target_image(conn: &Connection, job: &ThumbnailJob) -> Result<Option<schema::Image>> {
    schema::get_image(conn, job.image_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::migrations::run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_priority_then_fifo_ordering() {
        let conn = test_db();

        // Inserted as [low, high, medium, high]
        let low = add_job(&conn, 1, "thumbnail", JobPriority::Low).unwrap();
        let high1 = add_job(&conn, 2, "thumbnail", JobPriority::High).unwrap();
        let medium = add_job(&conn, 3, "thumbnail", JobPriority::Medium).unwrap();
        let high2 = add_job(&conn, 4, "thumbnail", JobPriority::High).unwrap();

        // Dequeued as [high(1st), high(2nd), medium, low]
        let order: Vec<i64> = (0..4)
            .map(|_| get_next_job(&conn).unwrap().unwrap().id)
            .collect();
        assert_eq!(order, vec![high1, high2, medium, low]);

        assert!(get_next_job(&conn).unwrap().is_none());
    }

    #[test]
    fn test_high_beats_earlier_low() {
        let conn = test_db();
        add_job(&conn, 5, "thumbnail", JobPriority::High).unwrap();
        add_job(&conn, 5, "thumbnail", JobPriority::Low).unwrap();

        let first = get_next_job(&conn).unwrap().unwrap();
        assert_eq!(first.priority, "high");
    }

    #[test]
    fn test_start_job_exactly_one_winner() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("queue.db");
        let conn_a = crate::db::open_db(&db_path).unwrap();
        let conn_b = crate::db::open_db(&db_path).unwrap();

        let id = add_job(&conn_a, 1, "thumbnail", JobPriority::Medium).unwrap();

        // Two workers race the same pending job
        let a_won = start_job(&conn_a, id).unwrap();
        let b_won = start_job(&conn_b, id).unwrap();

        assert!(a_won ^ b_won, "exactly one claimant must win");
        let job = get_job(&conn_a, id).unwrap().unwrap();
        assert_eq!(job.status, "processing");
    }

    #[test]
    fn test_complete_requires_processing_and_token() {
        let conn = test_db();
        let id = add_job(&conn, 1, "thumbnail", JobPriority::Medium).unwrap();

        // Not yet claimed: cannot complete
        assert!(!complete_job(&conn, id, "bogus", 5).unwrap());

        let job = get_next_job(&conn).unwrap().unwrap();
        let token = job.run_token.unwrap();

        // Wrong token loses
        assert!(!complete_job(&conn, id, "bogus", 5).unwrap());
        assert!(complete_job(&conn, id, &token, 5).unwrap());

        // Second completion is a no-op
        assert!(!complete_job(&conn, id, &token, 5).unwrap());

        let job = get_job(&conn, id).unwrap().unwrap();
        assert_eq!(job.status, "completed");
        assert_eq!(job.processing_time_ms, Some(5));
    }

    #[test]
    fn test_fail_schedules_retry_then_gives_up() {
        let conn = test_db();
        let id = add_job(&conn, 1, "thumbnail", JobPriority::Medium).unwrap();

        // First two failures re-queue with a pushed-forward created_at
        for expected_retry in 1..JOB_MAX_RETRIES {
            let job = claim_ignoring_delay(&conn).unwrap();
            assert_eq!(job.id, id);
            let token = job.run_token.unwrap();
            assert!(fail_job(&conn, id, &token, "boom").unwrap());

            let job = get_job(&conn, id).unwrap().unwrap();
            assert_eq!(job.status, "pending");
            assert_eq!(job.retry_count, expected_retry);
            assert_eq!(job.error_message, None);

            // The retry delay makes the job ineligible right now
            assert!(get_next_job(&conn).unwrap().is_none());
        }

        // Final failure is terminal
        let job = claim_ignoring_delay(&conn).unwrap();
        let token = job.run_token.unwrap();
        assert!(fail_job(&conn, id, &token, "boom again").unwrap());

        let job = get_job(&conn, id).unwrap().unwrap();
        assert_eq!(job.status, "failed");
        assert_eq!(job.error_message.as_deref(), Some("boom again"));
    }

    /// Claim helper for tests that need to bypass the retry delay.
    fn claim_ignoring_delay(conn: &Connection) -> Option<ThumbnailJob> {
        // Rewind any future created_at so the claim query sees the job
        conn.execute(
            "UPDATE thumbnail_jobs SET created_at = datetime('now', '-1 minute')
             WHERE status = 'pending'",
            [],
        )
        .unwrap();
        get_next_job(conn).unwrap()
    }

    #[test]
    fn test_schedule_retry_delays_eligibility() {
        let conn = test_db();
        let id = add_job(&conn, 1, "thumbnail", JobPriority::High).unwrap();

        let job = get_next_job(&conn).unwrap().unwrap();
        assert_eq!(job.id, id);

        assert!(schedule_retry(&conn, id, 1, 10).unwrap());

        let job = get_job(&conn, id).unwrap().unwrap();
        assert_eq!(job.status, "pending");
        assert_eq!(job.retry_count, 1);

        // created_at is 10 minutes out; nothing is eligible yet
        assert!(get_next_job(&conn).unwrap().is_none());
    }

    #[test]
    fn test_cancelled_job_defeats_late_worker() {
        let conn = test_db();
        let id = add_job(&conn, 1, "thumbnail", JobPriority::Medium).unwrap();

        let job = get_next_job(&conn).unwrap().unwrap();
        let token = job.run_token.unwrap();

        // Operator cancels the in-flight job
        assert!(cancel_job(&conn, id).unwrap());

        // The worker's completion attempt loses its conditional update
        assert!(!complete_job(&conn, id, &token, 100).unwrap());
        let job = get_job(&conn, id).unwrap().unwrap();
        assert_eq!(job.status, "cancelled");
    }

    #[test]
    fn test_cancel_scoped_by_job_type() {
        let conn = test_db();
        add_job(&conn, 1, "thumbnail", JobPriority::Medium).unwrap();
        add_job(&conn, 1, "overlay", JobPriority::Medium).unwrap();

        let scope = JobScope {
            job_type: Some("overlay".to_string()),
            ..JobScope::default()
        };
        assert_eq!(cancel_jobs(&conn, &scope).unwrap(), 1);

        let counts = count_by_status(&conn, &JobScope::default()).unwrap();
        assert!(counts.contains(&("pending".to_string(), 1)));
        assert!(counts.contains(&("cancelled".to_string(), 1)));
    }

    #[test]
    fn test_cleanup_spares_pending() {
        let conn = test_db();
        let done = add_job(&conn, 1, "thumbnail", JobPriority::Medium).unwrap();
        add_job(&conn, 2, "thumbnail", JobPriority::Medium).unwrap();

        let job = get_next_job(&conn).unwrap().unwrap();
        assert_eq!(job.id, done);
        complete_job(&conn, done, &job.run_token.unwrap(), 1).unwrap();

        // Age the completed job past the window
        conn.execute(
            "UPDATE thumbnail_jobs SET completed_at = datetime('now', '-30 days') WHERE id = ?1",
            params![done],
        )
        .unwrap();

        assert_eq!(cleanup_terminal(&conn, 7).unwrap(), 1);
        assert!(get_job(&conn, done).unwrap().is_none());

        // The untouched pending job survives
        let counts = count_by_status(&conn, &JobScope::default()).unwrap();
        assert!(counts.contains(&("pending".to_string(), 1)));
    }

    #[test]
    fn test_reclaim_expired_lease() {
        let conn = test_db();
        let id = add_job(&conn, 1, "thumbnail", JobPriority::Medium).unwrap();

        let job = get_next_job(&conn).unwrap().unwrap();
        assert_eq!(job.id, id);

        // Simulate a crashed worker: expire the lease manually
        conn.execute(
            "UPDATE thumbnail_jobs SET lease_expires_at = datetime('now', '-1 minute') WHERE id = ?1",
            params![id],
        )
        .unwrap();

        assert_eq!(reclaim_expired(&conn).unwrap(), 1);
        let job = get_job(&conn, id).unwrap().unwrap();
        assert_eq!(job.status, "pending");
        assert_eq!(job.run_token, None);
    }
}
