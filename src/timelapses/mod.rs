// Timelapse lifecycle
//
// A timelapse is one capture campaign for a camera. At most one timelapse
// per camera may be running or paused, and the camera's
// active_timelapse_id always points at it.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rusqlite::{params, Connection};

use crate::constants::{MAX_CAPTURE_INTERVAL_SECONDS, MIN_CAPTURE_INTERVAL_SECONDS};
use crate::db::schema::{self, Timelapse};
use crate::error::{LapseError, Result};

/// Start a new timelapse for a camera. Any currently active timelapse is
/// completed first so the single-active invariant holds.
pub fn start_new_timelapse(
    conn: &Connection,
    camera_id: i64,
    name: &str,
    capture_interval_seconds: i64,
    tz: Tz,
) -> Result<Timelapse> {
    let camera = schema::get_camera(conn, camera_id)?
        .ok_or(LapseError::CameraNotFound(camera_id))?;

    if let Some(active_id) = camera.active_timelapse_id {
        log::info!(
            "Camera {} already has active timelapse {}; completing it",
            camera_id,
            active_id
        );
        complete_timelapse(conn, active_id)?;
    }

    let interval = capture_interval_seconds
        .clamp(MIN_CAPTURE_INTERVAL_SECONDS, MAX_CAPTURE_INTERVAL_SECONDS);
    let start_date = Utc::now().with_timezone(&tz).date_naive();

    let id = schema::insert_timelapse(
        conn,
        camera_id,
        name,
        "running",
        &start_date.format("%Y-%m-%d").to_string(),
        interval,
    )?;
    schema::set_camera_active_timelapse(conn, camera_id, Some(id))?;

    let timelapse = schema::get_timelapse(conn, id)?
        .ok_or(LapseError::TimelapseNotFound(id))?;
    Ok(timelapse)
}

/// Pause a running timelapse. Returns false if it was not running.
pub fn pause_timelapse(conn: &Connection, id: i64) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE timelapses SET status = 'paused' WHERE id = ?1 AND status = 'running'",
        params![id],
    )?;
    Ok(rows > 0)
}

/// Resume a paused timelapse. Returns false if it was not paused.
pub fn resume_timelapse(conn: &Connection, id: i64) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE timelapses SET status = 'running' WHERE id = ?1 AND status = 'paused'",
        params![id],
    )?;
    Ok(rows > 0)
}

/// Complete a timelapse and clear the camera's active pointer.
pub fn complete_timelapse(conn: &Connection, id: i64) -> Result<bool> {
    let timelapse = schema::get_timelapse(conn, id)?
        .ok_or(LapseError::TimelapseNotFound(id))?;

    let rows = conn.execute(
        "UPDATE timelapses SET status = 'completed', completed_at = datetime('now')
         WHERE id = ?1 AND status IN ('created', 'running', 'paused')",
        params![id],
    )?;

    if rows > 0 {
        conn.execute(
            "UPDATE cameras SET active_timelapse_id = NULL
             WHERE id = ?1 AND active_timelapse_id = ?2",
            params![timelapse.camera_id, id],
        )?;
    }

    Ok(rows > 0)
}

/// Compute the 1-based day number of a capture relative to the timelapse
/// start date. Day boundaries follow the configured timezone, not UTC.
pub fn day_number(start_date: &str, captured_at: DateTime<Utc>, tz: Tz) -> Result<i64> {
    let start = chrono::NaiveDate::parse_from_str(start_date, "%Y-%m-%d")
        .map_err(|e| LapseError::Other(format!("Bad timelapse start date '{}': {}", start_date, e)))?;

    let local_date = captured_at.with_timezone(&tz).date_naive();
    Ok((local_date - start).num_days() + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::migrations::run_migrations(&conn).unwrap();
        conn
    }

    fn add_camera(conn: &Connection) -> i64 {
        schema::insert_camera(
            conn,
            &schema::NewCamera {
                name: "porch".to_string(),
                rtsp_url: "rtsp://cam.local/stream".to_string(),
                heavy_checks_enabled: false,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_day_number_sequence() {
        let tz = chrono_tz::UTC;
        let start = "2026-03-01";
        let at = |d: u32, h: u32| Utc.with_ymd_and_hms(2026, 3, d, h, 0, 0).unwrap();

        // Captures on D, D+1, D+1, D+3 yield [1, 2, 2, 4]
        assert_eq!(day_number(start, at(1, 8), tz).unwrap(), 1);
        assert_eq!(day_number(start, at(2, 8), tz).unwrap(), 2);
        assert_eq!(day_number(start, at(2, 23), tz).unwrap(), 2);
        assert_eq!(day_number(start, at(4, 0), tz).unwrap(), 4);
    }

    #[test]
    fn test_day_number_follows_local_timezone() {
        // 2026-03-02 03:00 UTC is still 2026-03-01 in Chicago (UTC-6)
        let tz: Tz = "America/Chicago".parse().unwrap();
        let captured = Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).unwrap();
        assert_eq!(day_number("2026-03-01", captured, tz).unwrap(), 1);

        // Same instant in UTC is day 2
        assert_eq!(day_number("2026-03-01", captured, chrono_tz::UTC).unwrap(), 2);
    }

    #[test]
    fn test_start_enforces_single_active() {
        let conn = test_db();
        let camera_id = add_camera(&conn);

        let first = start_new_timelapse(&conn, camera_id, "spring", 60, chrono_tz::UTC).unwrap();
        assert_eq!(first.status, "running");

        let second = start_new_timelapse(&conn, camera_id, "summer", 60, chrono_tz::UTC).unwrap();

        // First was force-completed, camera points at the new one
        let first = schema::get_timelapse(&conn, first.id).unwrap().unwrap();
        assert_eq!(first.status, "completed");
        let camera = schema::get_camera(&conn, camera_id).unwrap().unwrap();
        assert_eq!(camera.active_timelapse_id, Some(second.id));
    }

    #[test]
    fn test_interval_clamped() {
        let conn = test_db();
        let camera_id = add_camera(&conn);

        let tl = start_new_timelapse(&conn, camera_id, "fast", 1, chrono_tz::UTC).unwrap();
        assert_eq!(tl.capture_interval_seconds, MIN_CAPTURE_INTERVAL_SECONDS);

        let tl = start_new_timelapse(&conn, camera_id, "slow", 1_000_000, chrono_tz::UTC).unwrap();
        assert_eq!(tl.capture_interval_seconds, MAX_CAPTURE_INTERVAL_SECONDS);
    }

    #[test]
    fn test_pause_resume_complete_transitions() {
        let conn = test_db();
        let camera_id = add_camera(&conn);
        let tl = start_new_timelapse(&conn, camera_id, "t", 60, chrono_tz::UTC).unwrap();

        // Can't resume a running timelapse
        assert!(!resume_timelapse(&conn, tl.id).unwrap());

        assert!(pause_timelapse(&conn, tl.id).unwrap());
        // Double pause is a no-op
        assert!(!pause_timelapse(&conn, tl.id).unwrap());

        assert!(resume_timelapse(&conn, tl.id).unwrap());
        assert!(complete_timelapse(&conn, tl.id).unwrap());

        let camera = schema::get_camera(&conn, camera_id).unwrap().unwrap();
        assert_eq!(camera.active_timelapse_id, None);

        // Completed is terminal
        assert!(!pause_timelapse(&conn, tl.id).unwrap());
        assert!(!complete_timelapse(&conn, tl.id).unwrap());
    }
}
