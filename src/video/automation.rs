// Video automation engine
//
// Evaluates milestone and schedule triggers each cycle and drives the
// video job queue under the concurrency cap. Idempotence is enforced
// through queue columns (milestone_threshold, period_key), never through
// in-memory state, so overlapping cycles and multiple workers stay safe.

use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::schema::{self, Camera, Timelapse};
use crate::error::{LapseError, Result};
use crate::jobs::JobPriority;
use crate::settings::{Settings, VideoGenerationOverrides};
use super::queue::{self, NewVideoJob};

/// Parsed schedule for scheduled-mode automation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub frequency: ScheduleFrequency,
    /// Lowercase English weekday name, required for weekly schedules.
    pub weekday: Option<String>,
    pub hour: u32,
    pub minute: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleFrequency {
    Daily,
    Weekly,
}

impl ScheduleSpec {
    pub fn from_json(json: &str) -> Option<Self> {
        serde_json::from_str(json).ok()
    }

    /// Minute-granularity match against a local clock reading.
    pub fn matches(&self, local: &DateTime<chrono_tz::Tz>) -> bool {
        use chrono::Timelike;

        if local.hour() != self.hour || local.minute() != self.minute {
            return false;
        }
        match self.frequency {
            ScheduleFrequency::Daily => true,
            ScheduleFrequency::Weekly => {
                let today = local.format("%A").to_string().to_lowercase();
                self.weekday.as_deref() == Some(today.as_str())
            }
        }
    }

    /// Idempotence key for the current period: calendar day for daily
    /// schedules, ISO week for weekly ones.
    pub fn period_key(&self, local: &DateTime<chrono_tz::Tz>) -> String {
        match self.frequency {
            ScheduleFrequency::Daily => local.format("%Y-%m-%d").to_string(),
            ScheduleFrequency::Weekly => local.format("%G-W%V").to_string(),
        }
    }
}

/// Automation mode with timelapse-overrides-camera inheritance.
pub fn effective_automation_mode(timelapse: &Timelapse, camera: &Camera) -> Option<String> {
    timelapse
        .video_automation_mode
        .clone()
        .or_else(|| camera.video_automation_mode.clone())
}

/// Milestone thresholds (JSON array of image counts), inherited the same way.
pub fn effective_milestones(timelapse: &Timelapse, camera: &Camera) -> Vec<i64> {
    let raw = timelapse
        .milestone_thresholds
        .as_deref()
        .or(camera.milestone_thresholds.as_deref());
    raw.and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default()
}

pub fn effective_schedule(timelapse: &Timelapse, camera: &Camera) -> Option<ScheduleSpec> {
    timelapse
        .schedule
        .as_deref()
        .or(camera.schedule.as_deref())
        .and_then(ScheduleSpec::from_json)
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub reclaimed: usize,
    pub milestone_jobs: usize,
    pub scheduled_jobs: usize,
    pub processed: usize,
}

pub struct VideoAutomationEngine {
    settings: Settings,
}

impl VideoAutomationEngine {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// One automation cycle: reclaim stale claims, evaluate triggers,
    /// then process queued jobs up to the concurrency cap.
    pub fn run_cycle(&self, conn: &Connection, library_root: &Path) -> Result<CycleReport> {
        let mut report = CycleReport {
            reclaimed: queue::reclaim_expired(conn)?,
            ..CycleReport::default()
        };

        report.milestone_jobs = self.evaluate_milestone_triggers(conn)?;
        report.scheduled_jobs = self.evaluate_scheduled_triggers(conn, Utc::now())?;
        report.processed = self.process_jobs(conn, library_root)?;

        Ok(report)
    }

    /// Scan running timelapses in milestone mode and queue a job for every
    /// threshold the image count has landed on exactly.
    pub fn evaluate_milestone_triggers(&self, conn: &Connection) -> Result<usize> {
        let mut queued = 0;
        for timelapse in schema::list_active_timelapses(conn)? {
            if timelapse.status != "running" {
                continue;
            }
            let image_count = schema::count_timelapse_images(conn, timelapse.id)?;
            if self.check_milestone(conn, &timelapse, image_count)?.is_some() {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Milestone check for a single timelapse at a known image count.
    /// Fires only on exact threshold equality, at most once per threshold.
    pub fn check_milestone(
        &self,
        conn: &Connection,
        timelapse: &Timelapse,
        image_count: i64,
    ) -> Result<Option<i64>> {
        let camera = schema::get_camera(conn, timelapse.camera_id)?
            .ok_or(LapseError::CameraNotFound(timelapse.camera_id))?;

        if effective_automation_mode(timelapse, &camera).as_deref() != Some("milestone") {
            return Ok(None);
        }

        let thresholds = effective_milestones(timelapse, &camera);
        if !thresholds.contains(&image_count) {
            return Ok(None);
        }

        if queue::exists_milestone_job(conn, timelapse.id, image_count)? {
            log::debug!(
                "Milestone {} for timelapse {} already queued",
                image_count,
                timelapse.id
            );
            return Ok(None);
        }

        let job_id = queue::add_job(
            conn,
            &NewVideoJob {
                timelapse_id: timelapse.id,
                camera_id: timelapse.camera_id,
                trigger_type: "milestone".to_string(),
                milestone_threshold: Some(image_count),
                period_key: None,
                settings: None,
                priority: JobPriority::Medium,
            },
        )?;
        log::info!(
            "Queued milestone video job {} (timelapse {}, threshold {})",
            job_id,
            timelapse.id,
            image_count
        );
        Ok(Some(job_id))
    }

    /// Fire scheduled triggers whose HH:MM matches the current minute in
    /// the configured timezone, once per day/week period.
    pub fn evaluate_scheduled_triggers(&self, conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
        let tz = self.settings.timezone(conn);
        let local = now.with_timezone(&tz);

        let mut queued = 0;
        for timelapse in schema::list_active_timelapses(conn)? {
            if timelapse.status != "running" {
                continue;
            }
            let camera = schema::get_camera(conn, timelapse.camera_id)?
                .ok_or(LapseError::CameraNotFound(timelapse.camera_id))?;

            if effective_automation_mode(&timelapse, &camera).as_deref() != Some("scheduled") {
                continue;
            }
            let Some(spec) = effective_schedule(&timelapse, &camera) else {
                continue;
            };
            if !spec.matches(&local) {
                continue;
            }

            let period_key = spec.period_key(&local);
            if queue::exists_period_job(conn, timelapse.id, &period_key)? {
                log::debug!(
                    "Scheduled job for timelapse {} already fired this period ({})",
                    timelapse.id,
                    period_key
                );
                continue;
            }

            let job_id = queue::add_job(
                conn,
                &NewVideoJob {
                    timelapse_id: timelapse.id,
                    camera_id: timelapse.camera_id,
                    trigger_type: "scheduled".to_string(),
                    milestone_threshold: None,
                    period_key: Some(period_key),
                    settings: None,
                    priority: JobPriority::Medium,
                },
            )?;
            log::info!(
                "Queued scheduled video job {} (timelapse {})",
                job_id,
                timelapse.id
            );
            queued += 1;
        }
        Ok(queued)
    }

    /// Per-capture trigger entry point for the external scheduler. A
    /// recent generation for the camera silently swallows the request.
    pub fn request_per_capture(
        &self,
        conn: &Connection,
        camera_id: i64,
        timelapse_id: i64,
    ) -> Result<Option<i64>> {
        let config = self.settings.automation_config(conn);
        if queue::recently_generated(conn, camera_id, config.per_capture_throttle_minutes)? {
            log::debug!(
                "Per-capture trigger for camera {} throttled ({}m window)",
                camera_id,
                config.per_capture_throttle_minutes
            );
            return Ok(None);
        }

        let job_id = queue::add_job(
            conn,
            &NewVideoJob {
                timelapse_id,
                camera_id,
                trigger_type: "per_capture".to_string(),
                milestone_threshold: None,
                period_key: None,
                settings: None,
                priority: JobPriority::Low,
            },
        )?;
        Ok(Some(job_id))
    }

    /// Claim and run queued generation jobs until the queue drains or the
    /// concurrency cap is reached.
    pub fn process_jobs(&self, conn: &Connection, library_root: &Path) -> Result<usize> {
        let config = self.settings.automation_config(conn);
        let mut processed = 0;

        while let Some(job) = queue::get_next_job(conn, config.max_concurrent_jobs)? {
            let token = job.run_token.clone().unwrap_or_default();
            let started = Instant::now();

            let outcome = self.run_generation(conn, library_root, &job);
            let elapsed_ms = started.elapsed().as_millis() as i64;

            match outcome {
                Ok(Some(video_path)) => {
                    queue::complete_job(conn, job.id, &token, elapsed_ms, &video_path)?;
                    log::info!("Video job {} completed in {}ms", job.id, elapsed_ms);
                }
                Ok(None) => {
                    // Orphaned target; the job was already cancelled
                    log::info!("Video job {} skipped (target gone)", job.id);
                }
                Err(e) => {
                    queue::fail_job(conn, job.id, &token, &e.to_string())?;
                    log::error!("Video job {} failed: {}", job.id, e);
                }
            }
            processed += 1;
        }

        Ok(processed)
    }

    /// Generate for one claimed job. Ok(None) means the target timelapse
    /// no longer exists and the job was cancelled rather than failed.
    fn run_generation(
        &self,
        conn: &Connection,
        library_root: &Path,
        job: &super::queue::VideoJob,
    ) -> Result<Option<String>> {
        let Some(timelapse) = schema::get_timelapse(conn, job.timelapse_id)? else {
            queue::cancel_jobs(
                conn,
                &crate::jobs::JobScope {
                    timelapse_id: Some(job.timelapse_id),
                    ..Default::default()
                },
            )?;
            return Ok(None);
        };
        let camera = schema::get_camera(conn, timelapse.camera_id)?
            .ok_or(LapseError::CameraNotFound(timelapse.camera_id))?;

        let job_overrides = job
            .settings
            .as_deref()
            .and_then(VideoGenerationOverrides::from_json);
        let resolved = super::resolve_settings(
            &self.settings,
            conn,
            &camera,
            &timelapse,
            job_overrides.as_ref(),
        );

        let output = super::generate_video(conn, library_root, &timelapse, &resolved)?;
        Ok(Some(output.to_string_lossy().to_string()))
    }
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
                name: "yard".to_string(),
                rtsp_url: "rtsp://cam.local/stream".to_string(),
                heavy_checks_enabled: false,
            },
        )
        .unwrap()
    }

    fn add_running_timelapse(conn: &Connection, camera_id: i64) -> Timelapse {
        crate::timelapses::start_new_timelapse(conn, camera_id, "t", 60, chrono_tz::UTC).unwrap()
    }

    fn set_milestone_mode(conn: &Connection, timelapse_id: i64, thresholds: &str) {
        conn.execute(
            "UPDATE timelapses SET video_automation_mode = 'milestone', milestone_thresholds = ?1
             WHERE id = ?2",
            rusqlite::params![thresholds, timelapse_id],
        )
        .unwrap();
    }

    fn local(tz: chrono_tz::Tz, y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<chrono_tz::Tz> {
        tz.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_daily_schedule_matches_minute() {
        let spec = ScheduleSpec {
            frequency: ScheduleFrequency::Daily,
            weekday: None,
            hour: 18,
            minute: 30,
        };
        let tz = chrono_tz::UTC;

        assert!(spec.matches(&local(tz, 2026, 8, 4, 18, 30)));
        assert!(!spec.matches(&local(tz, 2026, 8, 4, 18, 31)));
        assert!(!spec.matches(&local(tz, 2026, 8, 4, 17, 30)));
    }

    #[test]
    fn test_weekly_schedule_checks_weekday() {
        let spec = ScheduleSpec {
            frequency: ScheduleFrequency::Weekly,
            weekday: Some("tuesday".to_string()),
            hour: 9,
            minute: 0,
        };
        let tz = chrono_tz::UTC;

        // 2026-08-04 is a Tuesday
        assert!(spec.matches(&local(tz, 2026, 8, 4, 9, 0)));
        // Wednesday at the same time does not match
        assert!(!spec.matches(&local(tz, 2026, 8, 5, 9, 0)));
    }

    #[test]
    fn test_period_keys() {
        let tz = chrono_tz::UTC;
        let at = local(tz, 2026, 8, 4, 9, 0);

        let daily = ScheduleSpec {
            frequency: ScheduleFrequency::Daily,
            weekday: None,
            hour: 9,
            minute: 0,
        };
        assert_eq!(daily.period_key(&at), "2026-08-04");

        let weekly = ScheduleSpec {
            frequency: ScheduleFrequency::Weekly,
            weekday: Some("tuesday".to_string()),
            hour: 9,
            minute: 0,
        };
        assert_eq!(weekly.period_key(&at), "2026-W32");
    }

    #[test]
    fn test_milestone_fires_on_exact_count_once() {
        let conn = test_db();
        let camera_id = add_camera(&conn);
        let timelapse = add_running_timelapse(&conn, camera_id);
        set_milestone_mode(&conn, timelapse.id, "[500, 1000]");
        let timelapse = schema::get_timelapse(&conn, timelapse.id).unwrap().unwrap();

        let engine = VideoAutomationEngine::new(Settings::new());

        // Off-threshold counts never fire
        assert!(engine.check_milestone(&conn, &timelapse, 499).unwrap().is_none());
        assert!(engine.check_milestone(&conn, &timelapse, 501).unwrap().is_none());

        // Exact threshold fires exactly once
        let job_id = engine.check_milestone(&conn, &timelapse, 500).unwrap();
        assert!(job_id.is_some());
        assert!(engine.check_milestone(&conn, &timelapse, 500).unwrap().is_none());

        // A different threshold is independent
        assert!(engine.check_milestone(&conn, &timelapse, 1000).unwrap().is_some());
    }

    #[test]
    fn test_milestone_ignored_without_milestone_mode() {
        let conn = test_db();
        let camera_id = add_camera(&conn);
        let timelapse = add_running_timelapse(&conn, camera_id);

        let engine = VideoAutomationEngine::new(Settings::new());
        assert!(engine.check_milestone(&conn, &timelapse, 500).unwrap().is_none());
    }

    #[test]
    fn test_milestone_inherits_camera_settings() {
        let conn = test_db();
        let camera_id = add_camera(&conn);
        conn.execute(
            "UPDATE cameras SET video_automation_mode = 'milestone', milestone_thresholds = '[100]'
             WHERE id = ?1",
            rusqlite::params![camera_id],
        )
        .unwrap();
        let timelapse = add_running_timelapse(&conn, camera_id);

        let engine = VideoAutomationEngine::new(Settings::new());
        assert!(engine.check_milestone(&conn, &timelapse, 100).unwrap().is_some());
    }

    #[test]
    fn test_scheduled_trigger_once_per_period() {
        let conn = test_db();
        let camera_id = add_camera(&conn);
        let timelapse = add_running_timelapse(&conn, camera_id);
        conn.execute(
            "UPDATE timelapses SET video_automation_mode = 'scheduled',
                    schedule = '{\"frequency\":\"daily\",\"weekday\":null,\"hour\":18,\"minute\":30}'
             WHERE id = ?1",
            rusqlite::params![timelapse.id],
        )
        .unwrap();

        let engine = VideoAutomationEngine::new(Settings::new());
        let at_trigger = Utc.with_ymd_and_hms(2026, 8, 4, 18, 30, 0).unwrap();

        assert_eq!(engine.evaluate_scheduled_triggers(&conn, at_trigger).unwrap(), 1);
        // Same minute again: period already served
        assert_eq!(engine.evaluate_scheduled_triggers(&conn, at_trigger).unwrap(), 0);

        // Next day fires again
        let next_day = Utc.with_ymd_and_hms(2026, 8, 5, 18, 30, 0).unwrap();
        assert_eq!(engine.evaluate_scheduled_triggers(&conn, next_day).unwrap(), 1);

        // Off-minute never fires
        let off = Utc.with_ymd_and_hms(2026, 8, 6, 18, 31, 0).unwrap();
        assert_eq!(engine.evaluate_scheduled_triggers(&conn, off).unwrap(), 0);
    }

    #[test]
    fn test_per_capture_throttled_by_recent_generation() {
        let conn = test_db();
        let camera_id = add_camera(&conn);
        let timelapse = add_running_timelapse(&conn, camera_id);

        let engine = VideoAutomationEngine::new(Settings::new());

        let first = engine.request_per_capture(&conn, camera_id, timelapse.id).unwrap();
        assert!(first.is_some());

        // Within the throttle window: silently skipped
        let second = engine.request_per_capture(&conn, camera_id, timelapse.id).unwrap();
        assert!(second.is_none());
    }
}
