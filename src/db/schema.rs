// Database schema types and query helpers

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ----- Camera -----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub id: i64,
    pub name: String,
    pub rtsp_url: String,
    pub enabled: bool,
    pub heavy_checks_enabled: bool,
    pub active_timelapse_id: Option<i64>,
    pub last_capture_at: Option<String>,
    pub last_capture_success: bool,
    pub consecutive_failures: i64,
    pub video_automation_mode: Option<String>,
    pub milestone_thresholds: Option<String>,
    pub schedule: Option<String>,
    pub video_settings: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewCamera {
    pub name: String,
    pub rtsp_url: String,
    pub heavy_checks_enabled: bool,
}

const CAMERA_COLUMNS: &str = "id, name, rtsp_url, enabled, heavy_checks_enabled, active_timelapse_id,
       last_capture_at, last_capture_success, consecutive_failures,
       video_automation_mode, milestone_thresholds, schedule, video_settings, created_at";

fn camera_from_row(row: &Row) -> rusqlite::Result<Camera> {
    Ok(Camera {
        id: row.get(0)?,
        name: row.get(1)?,
        rtsp_url: row.get(2)?,
        enabled: row.get(3)?,
        heavy_checks_enabled: row.get(4)?,
        active_timelapse_id: row.get(5)?,
        last_capture_at: row.get(6)?,
        last_capture_success: row.get(7)?,
        consecutive_failures: row.get(8)?,
        video_automation_mode: row.get(9)?,
        milestone_thresholds: row.get(10)?,
        schedule: row.get(11)?,
        video_settings: row.get(12)?,
        created_at: row.get(13)?,
    })
}

pub fn insert_camera(conn: &Connection, camera: &NewCamera) -> Result<i64> {
    conn.execute(
        "INSERT INTO cameras (name, rtsp_url, heavy_checks_enabled) VALUES (?1, ?2, ?3)",
        params![camera.name, camera.rtsp_url, camera.heavy_checks_enabled],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_camera(conn: &Connection, id: i64) -> Result<Option<Camera>> {
    let sql = format!("SELECT {} FROM cameras WHERE id = ?1", CAMERA_COLUMNS);
    let result = conn
        .query_row(&sql, params![id], camera_from_row)
        .optional()?;
    Ok(result)
}

pub fn list_cameras(conn: &Connection) -> Result<Vec<Camera>> {
    let sql = format!("SELECT {} FROM cameras ORDER BY id", CAMERA_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let cameras = stmt
        .query_map([], camera_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(cameras)
}

pub fn set_camera_active_timelapse(conn: &Connection, camera_id: i64, timelapse_id: Option<i64>) -> Result<()> {
    conn.execute(
        "UPDATE cameras SET active_timelapse_id = ?1 WHERE id = ?2",
        params![timelapse_id, camera_id],
    )?;
    Ok(())
}

/// Record a successful capture and reset the failure streak.
pub fn mark_camera_capture_success(conn: &Connection, camera_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE cameras SET last_capture_at = datetime('now'), last_capture_success = 1,
                consecutive_failures = 0
         WHERE id = ?1",
        params![camera_id],
    )?;
    Ok(())
}

/// Record a failed capture and bump the failure streak.
pub fn mark_camera_capture_failed(conn: &Connection, camera_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE cameras SET last_capture_at = datetime('now'), last_capture_success = 0,
                consecutive_failures = consecutive_failures + 1
         WHERE id = ?1",
        params![camera_id],
    )?;
    Ok(())
}

// ----- Timelapse -----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timelapse {
    pub id: i64,
    pub camera_id: i64,
    pub name: String,
    pub status: String,
    pub start_date: String,
    pub capture_interval_seconds: i64,
    pub video_automation_mode: Option<String>,
    pub milestone_thresholds: Option<String>,
    pub schedule: Option<String>,
    pub video_settings: Option<String>,
    pub thumbnail_count: i64,
    pub small_count: i64,
    pub glitch_count: i64,
    pub created_at: String,
    pub completed_at: Option<String>,
}

const TIMELAPSE_COLUMNS: &str = "id, camera_id, name, status, start_date, capture_interval_seconds,
       video_automation_mode, milestone_thresholds, schedule, video_settings,
       thumbnail_count, small_count, glitch_count, created_at, completed_at";

fn timelapse_from_row(row: &Row) -> rusqlite::Result<Timelapse> {
    Ok(Timelapse {
        id: row.get(0)?,
        camera_id: row.get(1)?,
        name: row.get(2)?,
        status: row.get(3)?,
        start_date: row.get(4)?,
        capture_interval_seconds: row.get(5)?,
        video_automation_mode: row.get(6)?,
        milestone_thresholds: row.get(7)?,
        schedule: row.get(8)?,
        video_settings: row.get(9)?,
        thumbnail_count: row.get(10)?,
        small_count: row.get(11)?,
        glitch_count: row.get(12)?,
        created_at: row.get(13)?,
        completed_at: row.get(14)?,
    })
}

pub fn insert_timelapse(
    conn: &Connection,
    camera_id: i64,
    name: &str,
    status: &str,
    start_date: &str,
    capture_interval_seconds: i64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO timelapses (camera_id, name, status, start_date, capture_interval_seconds)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![camera_id, name, status, start_date, capture_interval_seconds],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_timelapse(conn: &Connection, id: i64) -> Result<Option<Timelapse>> {
    let sql = format!("SELECT {} FROM timelapses WHERE id = ?1", TIMELAPSE_COLUMNS);
    let result = conn
        .query_row(&sql, params![id], timelapse_from_row)
        .optional()?;
    Ok(result)
}

pub fn list_timelapses(conn: &Connection, camera_id: Option<i64>) -> Result<Vec<Timelapse>> {
    let (sql, param) = match camera_id {
        Some(id) => (
            format!("SELECT {} FROM timelapses WHERE camera_id = ?1 ORDER BY id", TIMELAPSE_COLUMNS),
            Some(id),
        ),
        None => (
            format!("SELECT {} FROM timelapses ORDER BY id", TIMELAPSE_COLUMNS),
            None,
        ),
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = match param {
        Some(id) => stmt.query_map(params![id], timelapse_from_row)?.collect::<std::result::Result<Vec<_>, _>>()?,
        None => stmt.query_map([], timelapse_from_row)?.collect::<std::result::Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}

/// Timelapses whose automation settings should be evaluated this cycle.
pub fn list_active_timelapses(conn: &Connection) -> Result<Vec<Timelapse>> {
    let sql = format!(
        "SELECT {} FROM timelapses WHERE status IN ('running', 'paused') ORDER BY id",
        TIMELAPSE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], timelapse_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn increment_thumbnail_counts(conn: &Connection, timelapse_id: i64, thumb: bool, small: bool) -> Result<()> {
    conn.execute(
        "UPDATE timelapses SET thumbnail_count = thumbnail_count + ?1,
                small_count = small_count + ?2
         WHERE id = ?3",
        params![thumb as i64, small as i64, timelapse_id],
    )?;
    Ok(())
}

pub fn increment_glitch_count(conn: &Connection, timelapse_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE timelapses SET glitch_count = glitch_count + 1 WHERE id = ?1",
        params![timelapse_id],
    )?;
    Ok(())
}

// ----- Image -----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: i64,
    pub camera_id: i64,
    pub timelapse_id: i64,
    pub file_path: String,
    pub filename: String,
    pub captured_at: String,
    pub day_number: i64,
    /// Quality score: 100 = perfect, lower values mean more corruption.
    pub corruption_score: i64,
    pub is_flagged: bool,
    pub file_size: i64,
    pub thumbnail_path: Option<String>,
    pub small_path: Option<String>,
    pub weather_temperature: Option<f64>,
    pub weather_condition: Option<String>,
    pub weather_icon: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewImage {
    pub camera_id: i64,
    pub timelapse_id: i64,
    pub file_path: String,
    pub filename: String,
    pub captured_at: String,
    pub day_number: i64,
    pub corruption_score: i64,
    pub is_flagged: bool,
    pub file_size: i64,
    pub weather_temperature: Option<f64>,
    pub weather_condition: Option<String>,
    pub weather_icon: Option<String>,
}

const IMAGE_COLUMNS: &str = "id, camera_id, timelapse_id, file_path, filename, captured_at, day_number,
       corruption_score, is_flagged, file_size, thumbnail_path, small_path,
       weather_temperature, weather_condition, weather_icon, created_at";

fn image_from_row(row: &Row) -> rusqlite::Result<Image> {
    Ok(Image {
        id: row.get(0)?,
        camera_id: row.get(1)?,
        timelapse_id: row.get(2)?,
        file_path: row.get(3)?,
        filename: row.get(4)?,
        captured_at: row.get(5)?,
        day_number: row.get(6)?,
        corruption_score: row.get(7)?,
        is_flagged: row.get(8)?,
        file_size: row.get(9)?,
        thumbnail_path: row.get(10)?,
        small_path: row.get(11)?,
        weather_temperature: row.get(12)?,
        weather_condition: row.get(13)?,
        weather_icon: row.get(14)?,
        created_at: row.get(15)?,
    })
}

pub fn insert_image(conn: &Connection, image: &NewImage) -> Result<i64> {
    conn.execute(
        "INSERT INTO images (camera_id, timelapse_id, file_path, filename, captured_at, day_number,
                             corruption_score, is_flagged, file_size,
                             weather_temperature, weather_condition, weather_icon)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            image.camera_id,
            image.timelapse_id,
            image.file_path,
            image.filename,
            image.captured_at,
            image.day_number,
            image.corruption_score,
            image.is_flagged,
            image.file_size,
            image.weather_temperature,
            image.weather_condition,
            image.weather_icon,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_image(conn: &Connection, id: i64) -> Result<Option<Image>> {
    let sql = format!("SELECT {} FROM images WHERE id = ?1", IMAGE_COLUMNS);
    let result = conn
        .query_row(&sql, params![id], image_from_row)
        .optional()?;
    Ok(result)
}

pub fn list_timelapse_images(conn: &Connection, timelapse_id: i64) -> Result<Vec<Image>> {
    let sql = format!(
        "SELECT {} FROM images WHERE timelapse_id = ?1 ORDER BY captured_at, id",
        IMAGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![timelapse_id], image_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_timelapse_images(conn: &Connection, timelapse_id: i64) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM images WHERE timelapse_id = ?1",
        params![timelapse_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn update_image_artifacts(
    conn: &Connection,
    id: i64,
    thumbnail_path: Option<&str>,
    small_path: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE images SET thumbnail_path = COALESCE(?1, thumbnail_path),
                small_path = COALESCE(?2, small_path)
         WHERE id = ?3",
        params![thumbnail_path, small_path, id],
    )?;
    Ok(())
}

/// All frame file paths known to the database (for the orphan sweep).
pub fn list_image_file_paths(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT file_path FROM images")?;
    let paths = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(paths)
}

// ----- Settings -----

pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    let result = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(result)
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
        params![key, value],
    )?;
    Ok(())
}

// ----- Corruption log -----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorruptionLogEntry {
    pub id: i64,
    pub camera_id: i64,
    pub image_id: Option<i64>,
    pub fast_score: f64,
    pub heavy_score: Option<f64>,
    pub final_score: f64,
    pub failed_checks: Vec<String>,
    pub is_corrupted: bool,
    pub processing_time_ms: i64,
    pub created_at: String,
}

pub fn insert_corruption_log(
    conn: &Connection,
    camera_id: i64,
    image_id: Option<i64>,
    fast_score: f64,
    heavy_score: Option<f64>,
    final_score: f64,
    failed_checks: &[String],
    is_corrupted: bool,
    processing_time_ms: i64,
) -> Result<i64> {
    let checks_json = serde_json::to_string(failed_checks)?;
    conn.execute(
        "INSERT INTO corruption_log (camera_id, image_id, fast_score, heavy_score, final_score,
                                     failed_checks, is_corrupted, processing_time_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            camera_id,
            image_id,
            fast_score,
            heavy_score,
            final_score,
            checks_json,
            is_corrupted,
            processing_time_ms,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_corruption_log(conn: &Connection, camera_id: i64, limit: i64) -> Result<Vec<CorruptionLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, camera_id, image_id, fast_score, heavy_score, final_score,
                failed_checks, is_corrupted, processing_time_ms, created_at
         FROM corruption_log WHERE camera_id = ?1
         ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![camera_id, limit], |row| {
            let checks_json: String = row.get(6)?;
            let failed_checks: Vec<String> = serde_json::from_str(&checks_json).unwrap_or_default();
            Ok(CorruptionLogEntry {
                id: row.get(0)?,
                camera_id: row.get(1)?,
                image_id: row.get(2)?,
                fast_score: row.get(3)?,
                heavy_score: row.get(4)?,
                final_score: row.get(5)?,
                failed_checks,
                is_corrupted: row.get(7)?,
                processing_time_ms: row.get(8)?,
                created_at: row.get(9)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
