// Read-side statistics rollups
//
// Consumers (dashboards, CLI) read aggregate state from here; nothing in
// this module mutates anything.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::jobs::JobScope;
use crate::jobs::thumbnail;
use crate::video::queue as video_queue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraStats {
    pub camera_id: i64,
    pub name: String,
    pub enabled: bool,
    pub image_count: i64,
    pub flagged_count: i64,
    pub last_capture_at: Option<String>,
    pub last_capture_success: bool,
    pub consecutive_failures: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelapseStats {
    pub timelapse_id: i64,
    pub name: String,
    pub status: String,
    pub image_count: i64,
    pub day_span: i64,
    pub thumbnail_count: i64,
    pub small_count: i64,
    pub glitch_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub thumbnail: Vec<(String, i64)>,
    pub video: Vec<(String, i64)>,
}

/// Per-camera capture health rollup.
pub fn camera_stats(conn: &Connection) -> Result<Vec<CameraStats>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.enabled, c.last_capture_at, c.last_capture_success,
                c.consecutive_failures,
                COUNT(i.id),
                COALESCE(SUM(i.is_flagged), 0)
         FROM cameras c
         LEFT JOIN images i ON i.camera_id = c.id
         GROUP BY c.id
         ORDER BY c.id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CameraStats {
                camera_id: row.get(0)?,
                name: row.get(1)?,
                enabled: row.get(2)?,
                last_capture_at: row.get(3)?,
                last_capture_success: row.get(4)?,
                consecutive_failures: row.get(5)?,
                image_count: row.get(6)?,
                flagged_count: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Per-timelapse progress rollup. day_span is the highest day number
/// reached, i.e. how many calendar days the campaign covers so far.
pub fn timelapse_stats(conn: &Connection, camera_id: Option<i64>) -> Result<Vec<TimelapseStats>> {
    let sql = "SELECT t.id, t.name, t.status, t.thumbnail_count, t.small_count, t.glitch_count,
                      COUNT(i.id), COALESCE(MAX(i.day_number), 0)
               FROM timelapses t
               LEFT JOIN images i ON i.timelapse_id = t.id
               WHERE (?1 IS NULL OR t.camera_id = ?1)
               GROUP BY t.id
               ORDER BY t.id";
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![camera_id], |row| {
            Ok(TimelapseStats {
                timelapse_id: row.get(0)?,
                name: row.get(1)?,
                status: row.get(2)?,
                thumbnail_count: row.get(3)?,
                small_count: row.get(4)?,
                glitch_count: row.get(5)?,
                image_count: row.get(6)?,
                day_span: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Depth of both job queues by status.
pub fn queue_stats(conn: &Connection) -> Result<QueueStats> {
    Ok(QueueStats {
        thumbnail: thumbnail::count_by_status(conn, &JobScope::default())?,
        video: video_queue::count_by_status(conn, &JobScope::default())?,
    })
}
