// Retention maintenance
//
// Periodic cleanup: terminal jobs past their window, completed timelapses
// past theirs (with their frames and artifacts), and frame files on disk
// that no image row references anymore.

use std::collections::HashSet;
use std::path::Path;

use rusqlite::{params, Connection};
use walkdir::WalkDir;

use crate::constants::FRAMES_FOLDER;
use crate::db::schema;
use crate::error::Result;
use crate::jobs::thumbnail;
use crate::settings::Settings;
use crate::video::queue as video_queue;

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub thumbnail_jobs_deleted: usize,
    pub video_jobs_deleted: usize,
    pub timelapses_deleted: usize,
    pub images_deleted: usize,
    pub orphan_files_removed: usize,
}

/// Run all retention passes.
pub fn run_cleanup(conn: &Connection, library_root: &Path, settings: &Settings) -> Result<CleanupReport> {
    let job_days = settings.job_retention_days(conn);
    let timelapse_days = settings.timelapse_retention_days(conn);

    let mut report = CleanupReport {
        thumbnail_jobs_deleted: thumbnail::cleanup_terminal(conn, job_days)?,
        video_jobs_deleted: video_queue::cleanup_terminal(conn, job_days)?,
        ..CleanupReport::default()
    };

    let (timelapses, images) = delete_expired_timelapses(conn, library_root, timelapse_days)?;
    report.timelapses_deleted = timelapses;
    report.images_deleted = images;

    report.orphan_files_removed = prune_orphan_frames(conn, library_root)?;

    log::info!(
        "Cleanup: {} thumbnail jobs, {} video jobs, {} timelapses ({} images), {} orphan files",
        report.thumbnail_jobs_deleted,
        report.video_jobs_deleted,
        report.timelapses_deleted,
        report.images_deleted,
        report.orphan_files_removed
    );
    Ok(report)
}

/// Delete completed timelapses older than the retention window, cascading
/// to their image rows and files. Running/paused campaigns are never
/// touched.
pub fn delete_expired_timelapses(
    conn: &Connection,
    library_root: &Path,
    retention_days: i64,
) -> Result<(usize, usize)> {
    let cutoff = format!("-{} days", retention_days);
    let mut stmt = conn.prepare(
        "SELECT id FROM timelapses
         WHERE status = 'completed' AND completed_at < datetime('now', ?1)",
    )?;
    let expired: Vec<i64> = stmt
        .query_map(params![cutoff], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut images_deleted = 0;
    for timelapse_id in &expired {
        for image in schema::list_timelapse_images(conn, *timelapse_id)? {
            remove_image_files(library_root, &image);
            images_deleted += 1;
        }
        // images cascade with the timelapse row
        conn.execute("DELETE FROM timelapses WHERE id = ?1", params![timelapse_id])?;
    }

    Ok((expired.len(), images_deleted))
}

fn remove_image_files(library_root: &Path, image: &schema::Image) {
    for rel in [Some(image.file_path.as_str()), image.thumbnail_path.as_deref(), image.small_path.as_deref()]
        .into_iter()
        .flatten()
    {
        let path = library_root.join(rel);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Could not remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Remove frame files on disk that no image row references. Discard
/// crashes and manual deletions both leave these behind.
pub fn prune_orphan_frames(conn: &Connection, library_root: &Path) -> Result<usize> {
    let frames_dir = library_root.join(FRAMES_FOLDER);
    if !frames_dir.exists() {
        return Ok(0);
    }

    let known: HashSet<String> = schema::list_image_file_paths(conn)?.into_iter().collect();

    let mut removed = 0;
    for entry in WalkDir::new(&frames_dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = match entry.path().strip_prefix(library_root) {
            Ok(rel) => rel.to_string_lossy().to_string(),
            Err(_) => continue,
        };
        if !known.contains(&rel) {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                log::warn!("Could not remove orphan {}: {}", entry.path().display(), e);
            } else {
                removed += 1;
            }
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::migrations::run_migrations(&conn).unwrap();
        conn
    }

    fn seed(conn: &Connection) -> (i64, i64) {
        let camera_id = schema::insert_camera(
            conn,
            &schema::NewCamera {
                name: "barn".to_string(),
                rtsp_url: "rtsp://cam/stream".to_string(),
                heavy_checks_enabled: false,
            },
        )
        .unwrap();
        let tl = crate::timelapses::start_new_timelapse(conn, camera_id, "t", 60, chrono_tz::UTC)
            .unwrap();
        (camera_id, tl.id)
    }

    fn seed_frame(conn: &Connection, root: &Path, camera_id: i64, timelapse_id: i64, name: &str) -> i64 {
        let rel = format!("frames/{}/{}", camera_id, name);
        let abs = root.join(&rel);
        std::fs::create_dir_all(abs.parent().unwrap()).unwrap();
        std::fs::write(&abs, b"jpeg bytes").unwrap();
        schema::insert_image(
            conn,
            &schema::NewImage {
                camera_id,
                timelapse_id,
                file_path: rel,
                filename: name.to_string(),
                captured_at: "2026-08-04T12:00:00Z".to_string(),
                day_number: 1,
                corruption_score: 100,
                is_flagged: false,
                file_size: 10,
                weather_temperature: None,
                weather_condition: None,
                weather_icon: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_expired_timelapse_cascades_to_files() {
        let dir = TempDir::new().unwrap();
        let conn = test_db();
        let (camera_id, timelapse_id) = seed(&conn);
        seed_frame(&conn, dir.path(), camera_id, timelapse_id, "a.jpg");

        crate::timelapses::complete_timelapse(&conn, timelapse_id).unwrap();
        conn.execute(
            "UPDATE timelapses SET completed_at = datetime('now', '-120 days') WHERE id = ?1",
            params![timelapse_id],
        )
        .unwrap();

        let (timelapses, images) = delete_expired_timelapses(&conn, dir.path(), 90).unwrap();
        assert_eq!(timelapses, 1);
        assert_eq!(images, 1);
        assert!(schema::get_timelapse(&conn, timelapse_id).unwrap().is_none());
        assert!(!dir.path().join(format!("frames/{}/a.jpg", camera_id)).exists());
    }

    #[test]
    fn test_recent_and_running_timelapses_survive() {
        let dir = TempDir::new().unwrap();
        let conn = test_db();
        let (_, timelapse_id) = seed(&conn);

        // Running campaign: never deleted regardless of age
        let (timelapses, _) = delete_expired_timelapses(&conn, dir.path(), 90).unwrap();
        assert_eq!(timelapses, 0);

        // Recently completed: kept
        crate::timelapses::complete_timelapse(&conn, timelapse_id).unwrap();
        let (timelapses, _) = delete_expired_timelapses(&conn, dir.path(), 90).unwrap();
        assert_eq!(timelapses, 0);
        assert!(schema::get_timelapse(&conn, timelapse_id).unwrap().is_some());
    }

    #[test]
    fn test_orphan_sweep_spares_known_frames() {
        let dir = TempDir::new().unwrap();
        let conn = test_db();
        let (camera_id, timelapse_id) = seed(&conn);
        seed_frame(&conn, dir.path(), camera_id, timelapse_id, "known.jpg");

        // An orphan next to it
        let orphan = dir.path().join(format!("frames/{}/orphan.jpg", camera_id));
        std::fs::write(&orphan, b"stray").unwrap();

        let removed = prune_orphan_frames(&conn, dir.path()).unwrap();
        assert_eq!(removed, 1);
        assert!(!orphan.exists());
        assert!(dir.path().join(format!("frames/{}/known.jpg", camera_id)).exists());
    }
}
