// Database migrations
// Migrations are forward-only. Never edit or delete a migration after it ships.

use rusqlite::Connection;
use anyhow::Result;

/// All migrations in order. Each migration is a SQL string.
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Cameras
    CREATE TABLE cameras (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        rtsp_url TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        heavy_checks_enabled INTEGER NOT NULL DEFAULT 0,
        active_timelapse_id INTEGER REFERENCES timelapses(id),
        last_capture_at TEXT,
        last_capture_success INTEGER NOT NULL DEFAULT 1,
        consecutive_failures INTEGER NOT NULL DEFAULT 0,
        video_automation_mode TEXT
            CHECK (video_automation_mode IN ('manual', 'per_capture', 'milestone', 'scheduled')),
        milestone_thresholds TEXT,
        schedule TEXT,
        video_settings TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    -- Timelapses (capture campaigns)
    CREATE TABLE timelapses (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        camera_id INTEGER NOT NULL REFERENCES cameras(id),
        name TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'created'
            CHECK (status IN ('created', 'running', 'paused', 'completed')),
        start_date TEXT NOT NULL,
        capture_interval_seconds INTEGER NOT NULL,
        video_automation_mode TEXT
            CHECK (video_automation_mode IN ('manual', 'per_capture', 'milestone', 'scheduled')),
        milestone_thresholds TEXT,
        schedule TEXT,
        video_settings TEXT,
        thumbnail_count INTEGER NOT NULL DEFAULT 0,
        small_count INTEGER NOT NULL DEFAULT 0,
        glitch_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        completed_at TEXT
    );

    -- Captured frames
    CREATE TABLE images (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        camera_id INTEGER NOT NULL REFERENCES cameras(id),
        timelapse_id INTEGER NOT NULL REFERENCES timelapses(id) ON DELETE CASCADE,
        file_path TEXT NOT NULL,
        filename TEXT NOT NULL,
        captured_at TEXT NOT NULL,
        day_number INTEGER NOT NULL,
        corruption_score INTEGER NOT NULL DEFAULT 100,
        is_flagged INTEGER NOT NULL DEFAULT 0,
        file_size INTEGER NOT NULL,
        thumbnail_path TEXT,
        small_path TEXT,
        weather_temperature REAL,
        weather_condition TEXT,
        weather_icon TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    -- Thumbnail/overlay work queue.
    -- Jobs reference but do not own their image; a deleted image leaves
    -- an orphaned job that workers cancel on claim.
    CREATE TABLE thumbnail_jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        image_id INTEGER NOT NULL,
        job_type TEXT NOT NULL DEFAULT 'thumbnail'
            CHECK (job_type IN ('thumbnail', 'overlay')),
        priority TEXT NOT NULL DEFAULT 'medium'
            CHECK (priority IN ('high', 'medium', 'low')),
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'processing', 'completed', 'failed', 'cancelled')),
        error_message TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        processing_time_ms INTEGER,
        claimed_by TEXT,
        run_token TEXT,
        lease_expires_at TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        started_at TEXT,
        completed_at TEXT
    );

    -- Video generation work queue
    CREATE TABLE video_jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timelapse_id INTEGER NOT NULL,
        camera_id INTEGER NOT NULL,
        job_type TEXT NOT NULL DEFAULT 'video'
            CHECK (job_type IN ('video')),
        trigger_type TEXT NOT NULL DEFAULT 'manual'
            CHECK (trigger_type IN ('manual', 'per_capture', 'milestone', 'scheduled')),
        milestone_threshold INTEGER,
        period_key TEXT,
        settings TEXT,
        video_path TEXT,
        priority TEXT NOT NULL DEFAULT 'medium'
            CHECK (priority IN ('high', 'medium', 'low')),
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'processing', 'completed', 'failed', 'cancelled')),
        error_message TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        processing_time_ms INTEGER,
        claimed_by TEXT,
        run_token TEXT,
        lease_expires_at TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        started_at TEXT,
        completed_at TEXT
    );

    -- Key/value settings
    CREATE TABLE settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    -- Corruption detection audit log
    CREATE TABLE corruption_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        camera_id INTEGER NOT NULL,
        image_id INTEGER,
        fast_score REAL NOT NULL,
        heavy_score REAL,
        final_score REAL NOT NULL,
        failed_checks TEXT NOT NULL DEFAULT '[]',
        is_corrupted INTEGER NOT NULL DEFAULT 0,
        processing_time_ms INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    -- Indexes for common queries
    CREATE INDEX idx_timelapses_camera ON timelapses(camera_id);
    CREATE INDEX idx_timelapses_status ON timelapses(status);
    CREATE INDEX idx_images_timelapse ON images(timelapse_id);
    CREATE INDEX idx_images_camera ON images(camera_id);
    CREATE INDEX idx_images_captured_at ON images(captured_at);
    CREATE INDEX idx_thumbnail_jobs_status ON thumbnail_jobs(status);
    CREATE INDEX idx_thumbnail_jobs_image ON thumbnail_jobs(image_id);
    CREATE INDEX idx_video_jobs_status ON video_jobs(status);
    CREATE INDEX idx_video_jobs_timelapse ON video_jobs(timelapse_id);
    CREATE INDEX idx_video_jobs_camera ON video_jobs(camera_id);
    CREATE INDEX idx_corruption_log_camera ON corruption_log(camera_id);
    "#,
];

/// Get current schema version from database
fn get_schema_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

/// Run all pending migrations (crash-safe)
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    let target_version = MIGRATIONS.len() as u32;

    // Refuse to open a DB created by a newer LapseCam build
    if current_version > target_version {
        anyhow::bail!(
            "Database schema version {} is newer than this build supports (max {}). Please upgrade LapseCam.",
            current_version,
            target_version
        );
    }

    if current_version == target_version {
        return Ok(());
    }

    // Apply pending migrations one-by-one
    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let migration_version = (i + 1) as u32;
        if migration_version <= current_version {
            continue;
        }

        conn.execute_batch(migration)?;
        conn.execute_batch(&format!("PRAGMA user_version = {}", migration_version))?;

        log::info!("Applied migration {}", migration_version);
    }

    Ok(())
}
