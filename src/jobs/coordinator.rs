// Job coordination
//
// Decides which background jobs to create after a capture or event and
// where to send them. Routing is a fallback chain tried in fixed order:
// scheduler authority, then the legacy pipeline, then direct queue
// insertion. The chain lets partial deployments keep functioning when the
// scheduler component is not wired up; every result carries the method
// that served it so telemetry can tell the paths apart.

use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::schema;
use crate::error::Result;
use crate::settings::{Settings, VideoGenerationOverrides};
use crate::video::automation::{self, VideoAutomationEngine};
use crate::video::queue as video_queue;
use super::{thumbnail, JobPriority, JobScope};

/// Outcome of one coordination call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationResult {
    pub success: bool,
    pub job_id: Option<i64>,
    /// Which route served the request: "scheduler_authority",
    /// "legacy_queue", "direct_queue", or "none" when gated off.
    pub method: String,
    pub reason: Option<String>,
    pub error: Option<String>,
}

impl CoordinationResult {
    fn ok(method: &str, job_id: Option<i64>) -> Self {
        Self {
            success: true,
            job_id,
            method: method.to_string(),
            reason: None,
            error: None,
        }
    }

    fn failed(method: &str, error: String) -> Self {
        Self {
            success: false,
            job_id: None,
            method: method.to_string(),
            reason: None,
            error: Some(error),
        }
    }

    fn rejected(reason: &str) -> Self {
        Self {
            success: false,
            job_id: None,
            method: "none".to_string(),
            reason: Some(reason.to_string()),
            error: None,
        }
    }
}

/// A background job request, independent of how it will be routed.
#[derive(Debug, Clone)]
pub enum JobRequest {
    Thumbnail {
        image_id: i64,
    },
    Overlay {
        image_id: i64,
    },
    Video {
        timelapse_id: i64,
        camera_id: i64,
        trigger_type: String,
        milestone_threshold: Option<i64>,
        period_key: Option<String>,
        overrides: Option<VideoGenerationOverrides>,
    },
}

/// Optional scheduler-authority collaborator. When present it owns all
/// immediate generation decisions.
pub trait SchedulerAuthority: Send + Sync {
    fn schedule_immediate_thumbnail_generation(&self, image_id: i64, priority: JobPriority) -> bool;
    fn schedule_immediate_video_generation(
        &self,
        timelapse_id: i64,
        settings: Option<&VideoGenerationOverrides>,
        priority: JobPriority,
    ) -> bool;
    fn schedule_immediate_overlay_generation(&self, image_id: i64, priority: JobPriority) -> bool;
}

/// Optional legacy job-queue/video-pipeline collaborator.
pub trait LegacyPipeline: Send + Sync {
    fn enqueue(&self, request: &JobRequest, priority: JobPriority) -> std::result::Result<i64, String>;
}

/// One link in the fallback chain. Returning None means "not my request,
/// try the next route"; any Some result ends the chain.
trait JobRoute: Send + Sync {
    fn method(&self) -> &'static str;
    fn dispatch(
        &self,
        conn: &Connection,
        request: &JobRequest,
        priority: JobPriority,
    ) -> Option<CoordinationResult>;
}

struct SchedulerRoute(Arc<dyn SchedulerAuthority>);

impl JobRoute for SchedulerRoute {
    fn method(&self) -> &'static str {
        "scheduler_authority"
    }

    fn dispatch(
        &self,
        _conn: &Connection,
        request: &JobRequest,
        priority: JobPriority,
    ) -> Option<CoordinationResult> {
        let accepted = match request {
            JobRequest::Thumbnail { image_id } => {
                self.0.schedule_immediate_thumbnail_generation(*image_id, priority)
            }
            JobRequest::Overlay { image_id } => {
                self.0.schedule_immediate_overlay_generation(*image_id, priority)
            }
            JobRequest::Video {
                timelapse_id,
                overrides,
                ..
            } => self
                .0
                .schedule_immediate_video_generation(*timelapse_id, overrides.as_ref(), priority),
        };

        if accepted {
            Some(CoordinationResult::ok(self.method(), None))
        } else {
            Some(CoordinationResult::failed(
                self.method(),
                "scheduler authority declined the request".to_string(),
            ))
        }
    }
}

struct LegacyRoute(Arc<dyn LegacyPipeline>);

impl JobRoute for LegacyRoute {
    fn method(&self) -> &'static str {
        "legacy_queue"
    }

    fn dispatch(
        &self,
        _conn: &Connection,
        request: &JobRequest,
        priority: JobPriority,
    ) -> Option<CoordinationResult> {
        match self.0.enqueue(request, priority) {
            Ok(job_id) => Some(CoordinationResult::ok(self.method(), Some(job_id))),
            Err(e) => Some(CoordinationResult::failed(self.method(), e)),
        }
    }
}

/// Last-resort route: insert straight into the persistent queues.
struct DirectRoute;

impl JobRoute for DirectRoute {
    fn method(&self) -> &'static str {
        "direct_queue"
    }

    fn dispatch(
        &self,
        conn: &Connection,
        request: &JobRequest,
        priority: JobPriority,
    ) -> Option<CoordinationResult> {
        let inserted = match request {
            JobRequest::Thumbnail { image_id } => {
                thumbnail::add_job(conn, *image_id, "thumbnail", priority)
            }
            JobRequest::Overlay { image_id } => {
                thumbnail::add_job(conn, *image_id, "overlay", priority)
            }
            JobRequest::Video {
                timelapse_id,
                camera_id,
                trigger_type,
                milestone_threshold,
                period_key,
                overrides,
            } => {
                let settings_json = overrides
                    .as_ref()
                    .and_then(|o| serde_json::to_string(o).ok());
                video_queue::add_job(
                    conn,
                    &video_queue::NewVideoJob {
                        timelapse_id: *timelapse_id,
                        camera_id: *camera_id,
                        trigger_type: trigger_type.clone(),
                        milestone_threshold: *milestone_threshold,
                        period_key: period_key.clone(),
                        settings: settings_json,
                        priority,
                    },
                )
            }
        };

        Some(match inserted {
            Ok(job_id) => CoordinationResult::ok(self.method(), Some(job_id)),
            Err(e) => CoordinationResult::failed(self.method(), e.to_string()),
        })
    }
}

/// Per-type status counts for a scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub thumbnail: Vec<(String, i64)>,
    pub video: Vec<(String, i64)>,
}

/// Outcome of a bulk cancel. Partial failures are collected, not raised.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelReport {
    pub thumbnail_cancelled: usize,
    pub video_cancelled: usize,
    pub errors: Vec<String>,
}

/// Outcome of automation trigger evaluation after a capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvaluation {
    pub mode: Option<String>,
    pub queued_jobs: usize,
}

pub struct JobCoordinator {
    routes: Vec<Box<dyn JobRoute>>,
    settings: Settings,
    engine: VideoAutomationEngine,
}

impl JobCoordinator {
    /// Coordinator with direct queue insertion only.
    pub fn new(settings: Settings) -> Self {
        Self::with_collaborators(settings, None, None)
    }

    /// Coordinator with the full fallback chain. Route order is fixed:
    /// scheduler authority, legacy pipeline, direct insertion.
    pub fn with_collaborators(
        settings: Settings,
        scheduler: Option<Arc<dyn SchedulerAuthority>>,
        legacy: Option<Arc<dyn LegacyPipeline>>,
    ) -> Self {
        let mut routes: Vec<Box<dyn JobRoute>> = Vec::new();
        if let Some(scheduler) = scheduler {
            routes.push(Box::new(SchedulerRoute(scheduler)));
        }
        if let Some(legacy) = legacy {
            routes.push(Box::new(LegacyRoute(legacy)));
        }
        routes.push(Box::new(DirectRoute));

        Self {
            routes,
            settings: settings.clone(),
            engine: VideoAutomationEngine::new(settings),
        }
    }

    fn dispatch(&self, conn: &Connection, request: &JobRequest, priority: JobPriority) -> CoordinationResult {
        for route in &self.routes {
            if let Some(result) = route.dispatch(conn, request, priority) {
                return result;
            }
        }
        // Unreachable while DirectRoute terminates the chain
        CoordinationResult::failed("none", "no job route available".to_string())
    }

    /// Queue a thumbnail job for a captured image. Short-circuits without
    /// touching any queue when thumbnail generation is globally disabled.
    pub fn coordinate_thumbnail_job(
        &self,
        conn: &Connection,
        image_id: i64,
        priority: JobPriority,
    ) -> CoordinationResult {
        if !self.settings.thumbnail_generation_enabled(conn) {
            return CoordinationResult::rejected("thumbnail_generation_disabled");
        }
        self.dispatch(conn, &JobRequest::Thumbnail { image_id }, priority)
    }

    pub fn coordinate_overlay_job(
        &self,
        conn: &Connection,
        image_id: i64,
        priority: JobPriority,
    ) -> CoordinationResult {
        self.dispatch(conn, &JobRequest::Overlay { image_id }, priority)
    }

    /// Queue a video generation job for a timelapse.
    pub fn coordinate_video_job(
        &self,
        conn: &Connection,
        timelapse_id: i64,
        overrides: Option<VideoGenerationOverrides>,
        priority: JobPriority,
        trigger_type: &str,
    ) -> CoordinationResult {
        let timelapse = match schema::get_timelapse(conn, timelapse_id) {
            Ok(Some(t)) => t,
            Ok(None) => {
                return CoordinationResult::failed(
                    "none",
                    format!("timelapse {} not found", timelapse_id),
                )
            }
            Err(e) => return CoordinationResult::failed("none", e.to_string()),
        };

        self.dispatch(
            conn,
            &JobRequest::Video {
                timelapse_id,
                camera_id: timelapse.camera_id,
                trigger_type: trigger_type.to_string(),
                milestone_threshold: None,
                period_key: None,
                overrides,
            },
            priority,
        )
    }

    /// Evaluate automation triggers for a timelapse at its current image
    /// count. Milestone mode fires on exact threshold equality; scheduled
    /// mode delegates to the time-window evaluator; per_capture mode is
    /// deliberately untouched here -- per-capture triggering is owned by
    /// the external scheduler, not this coordinator.
    pub fn evaluate_video_automation_triggers(
        &self,
        conn: &Connection,
        timelapse_id: i64,
        image_count: i64,
    ) -> Result<TriggerEvaluation> {
        let timelapse = schema::get_timelapse(conn, timelapse_id)?
            .ok_or(crate::error::LapseError::TimelapseNotFound(timelapse_id))?;
        let camera = schema::get_camera(conn, timelapse.camera_id)?
            .ok_or(crate::error::LapseError::CameraNotFound(timelapse.camera_id))?;

        let mode = automation::effective_automation_mode(&timelapse, &camera);
        let queued_jobs = match mode.as_deref() {
            Some("milestone") => self
                .engine
                .check_milestone(conn, &timelapse, image_count)?
                .map(|_| 1)
                .unwrap_or(0),
            Some("scheduled") => self
                .engine
                .evaluate_scheduled_triggers(conn, chrono::Utc::now())?,
            // per_capture is the scheduler's concern; manual never self-fires
            _ => 0,
        };

        Ok(TriggerEvaluation { mode, queued_jobs })
    }

    /// Status counts for both queues, restricted to a scope.
    pub fn track_job_status(&self, conn: &Connection, scope: &JobScope) -> Result<JobStatusReport> {
        Ok(JobStatusReport {
            thumbnail: thumbnail::count_by_status(conn, scope)?,
            video: video_queue::count_by_status(conn, scope)?,
        })
    }

    /// Bulk-cancel jobs in both queues. Each queue's failure is recorded
    /// in the report instead of aborting the other's cancellation.
    pub fn cancel_pending_jobs(&self, conn: &Connection, scope: &JobScope) -> CancelReport {
        let mut report = CancelReport::default();

        match thumbnail::cancel_jobs(conn, scope) {
            Ok(count) => report.thumbnail_cancelled = count,
            Err(e) => report.errors.push(format!("thumbnail queue: {}", e)),
        }
        match video_queue::cancel_jobs(conn, scope) {
            Ok(count) => report.video_cancelled = count,
            Err(e) => report.errors.push(format!("video queue: {}", e)),
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::migrations::run_migrations(&conn).unwrap();
        conn
    }

    struct StubScheduler {
        accept: bool,
        called: AtomicBool,
    }

    impl StubScheduler {
        fn new(accept: bool) -> Arc<Self> {
            Arc::new(Self {
                accept,
                called: AtomicBool::new(false),
            })
        }
    }

    impl SchedulerAuthority for StubScheduler {
        fn schedule_immediate_thumbnail_generation(&self, _image_id: i64, _priority: JobPriority) -> bool {
            self.called.store(true, Ordering::Relaxed);
            self.accept
        }
        fn schedule_immediate_video_generation(
            &self,
            _timelapse_id: i64,
            _settings: Option<&VideoGenerationOverrides>,
            _priority: JobPriority,
        ) -> bool {
            self.called.store(true, Ordering::Relaxed);
            self.accept
        }
        fn schedule_immediate_overlay_generation(&self, _image_id: i64, _priority: JobPriority) -> bool {
            self.called.store(true, Ordering::Relaxed);
            self.accept
        }
    }

    struct StubLegacy;

    impl LegacyPipeline for StubLegacy {
        fn enqueue(&self, _request: &JobRequest, _priority: JobPriority) -> std::result::Result<i64, String> {
            Ok(4242)
        }
    }

    #[test]
    fn test_direct_fallback_inserts_row() {
        let conn = test_db();
        let coordinator = JobCoordinator::new(Settings::new());

        let result = coordinator.coordinate_thumbnail_job(&conn, 9, JobPriority::Medium);
        assert!(result.success);
        assert_eq!(result.method, "direct_queue");

        let job = thumbnail::get_job(&conn, result.job_id.unwrap()).unwrap().unwrap();
        assert_eq!(job.image_id, 9);
        assert_eq!(job.priority, "medium");
        assert_eq!(job.status, "pending");
    }

    #[test]
    fn test_overlay_jobs_ride_the_thumbnail_queue() {
        let conn = test_db();
        let coordinator = JobCoordinator::new(Settings::new());

        let result = coordinator.coordinate_overlay_job(&conn, 3, JobPriority::Low);
        assert!(result.success);

        let job = thumbnail::get_job(&conn, result.job_id.unwrap()).unwrap().unwrap();
        assert_eq!(job.job_type, "overlay");
        assert_eq!(job.image_id, 3);
    }

    #[test]
    fn test_scheduler_authority_preferred() {
        let conn = test_db();
        let scheduler = StubScheduler::new(true);
        let coordinator = JobCoordinator::with_collaborators(
            Settings::new(),
            Some(scheduler.clone()),
            Some(Arc::new(StubLegacy)),
        );

        let result = coordinator.coordinate_thumbnail_job(&conn, 9, JobPriority::High);
        assert!(result.success);
        assert_eq!(result.method, "scheduler_authority");
        assert!(scheduler.called.load(Ordering::Relaxed));

        // Nothing reached the persistent queue
        let counts = thumbnail::count_by_status(&conn, &JobScope::default()).unwrap();
        assert!(counts.is_empty());
    }

    #[test]
    fn test_scheduler_rejection_ends_chain() {
        let conn = test_db();
        let coordinator = JobCoordinator::with_collaborators(
            Settings::new(),
            Some(StubScheduler::new(false)),
            Some(Arc::new(StubLegacy)),
        );

        // The scheduler's verdict is final; no fallback past it
        let result = coordinator.coordinate_thumbnail_job(&conn, 9, JobPriority::High);
        assert!(!result.success);
        assert_eq!(result.method, "scheduler_authority");
        let counts = thumbnail::count_by_status(&conn, &JobScope::default()).unwrap();
        assert!(counts.is_empty());
    }

    #[test]
    fn test_legacy_route_when_no_scheduler() {
        let conn = test_db();
        let coordinator =
            JobCoordinator::with_collaborators(Settings::new(), None, Some(Arc::new(StubLegacy)));

        let result = coordinator.coordinate_thumbnail_job(&conn, 9, JobPriority::Low);
        assert!(result.success);
        assert_eq!(result.method, "legacy_queue");
        assert_eq!(result.job_id, Some(4242));
    }

    #[test]
    fn test_thumbnail_gating_short_circuits() {
        let conn = test_db();
        let settings = Settings::new();
        settings.set(&conn, "thumbnail_generation_enabled", "false").unwrap();

        // Even with a scheduler wired, the gate comes first
        let scheduler = StubScheduler::new(true);
        let coordinator =
            JobCoordinator::with_collaborators(settings, Some(scheduler.clone()), None);

        let result = coordinator.coordinate_thumbnail_job(&conn, 9, JobPriority::Medium);
        assert!(!result.success);
        assert_eq!(result.reason.as_deref(), Some("thumbnail_generation_disabled"));
        assert!(!scheduler.called.load(Ordering::Relaxed));

        let counts = thumbnail::count_by_status(&conn, &JobScope::default()).unwrap();
        assert!(counts.is_empty());
    }

    #[test]
    fn test_video_job_resolves_camera() {
        let conn = test_db();
        let camera_id = schema::insert_camera(
            &conn,
            &schema::NewCamera {
                name: "gate".to_string(),
                rtsp_url: "rtsp://cam/stream".to_string(),
                heavy_checks_enabled: false,
            },
        )
        .unwrap();
        let timelapse =
            crate::timelapses::start_new_timelapse(&conn, camera_id, "t", 60, chrono_tz::UTC).unwrap();

        let coordinator = JobCoordinator::new(Settings::new());
        let result =
            coordinator.coordinate_video_job(&conn, timelapse.id, None, JobPriority::High, "manual");
        assert!(result.success);

        let job = video_queue::get_job(&conn, result.job_id.unwrap()).unwrap().unwrap();
        assert_eq!(job.camera_id, camera_id);
        assert_eq!(job.trigger_type, "manual");
    }

    #[test]
    fn test_video_job_missing_timelapse_is_structured_failure() {
        let conn = test_db();
        let coordinator = JobCoordinator::new(Settings::new());

        let result = coordinator.coordinate_video_job(&conn, 404, None, JobPriority::Low, "manual");
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
    }

    #[test]
    fn test_per_capture_mode_is_a_no_op_here() {
        let conn = test_db();
        let camera_id = schema::insert_camera(
            &conn,
            &schema::NewCamera {
                name: "door".to_string(),
                rtsp_url: "rtsp://cam/stream".to_string(),
                heavy_checks_enabled: false,
            },
        )
        .unwrap();
        conn.execute(
            "UPDATE cameras SET video_automation_mode = 'per_capture' WHERE id = ?1",
            rusqlite::params![camera_id],
        )
        .unwrap();
        let timelapse =
            crate::timelapses::start_new_timelapse(&conn, camera_id, "t", 60, chrono_tz::UTC).unwrap();

        let coordinator = JobCoordinator::new(Settings::new());
        let eval = coordinator
            .evaluate_video_automation_triggers(&conn, timelapse.id, 50)
            .unwrap();

        assert_eq!(eval.mode.as_deref(), Some("per_capture"));
        assert_eq!(eval.queued_jobs, 0);
        let counts = video_queue::count_by_status(&conn, &JobScope::default()).unwrap();
        assert!(counts.is_empty());
    }

    #[test]
    fn test_milestone_trigger_through_coordinator() {
        let conn = test_db();
        let camera_id = schema::insert_camera(
            &conn,
            &schema::NewCamera {
                name: "field".to_string(),
                rtsp_url: "rtsp://cam/stream".to_string(),
                heavy_checks_enabled: false,
            },
        )
        .unwrap();
        let timelapse =
            crate::timelapses::start_new_timelapse(&conn, camera_id, "t", 60, chrono_tz::UTC).unwrap();
        conn.execute(
            "UPDATE timelapses SET video_automation_mode = 'milestone', milestone_thresholds = '[500]'
             WHERE id = ?1",
            rusqlite::params![timelapse.id],
        )
        .unwrap();

        let coordinator = JobCoordinator::new(Settings::new());

        let eval = coordinator
            .evaluate_video_automation_triggers(&conn, timelapse.id, 500)
            .unwrap();
        assert_eq!(eval.queued_jobs, 1);

        // Idempotent on re-evaluation at the same count
        let eval = coordinator
            .evaluate_video_automation_triggers(&conn, timelapse.id, 500)
            .unwrap();
        assert_eq!(eval.queued_jobs, 0);
    }

    #[test]
    fn test_cancel_report_spans_both_queues() {
        let conn = test_db();
        thumbnail::add_job(&conn, 1, "thumbnail", JobPriority::Medium).unwrap();
        video_queue::add_job(
            &conn,
            &video_queue::NewVideoJob {
                timelapse_id: 1,
                camera_id: 1,
                trigger_type: "manual".to_string(),
                milestone_threshold: None,
                period_key: None,
                settings: None,
                priority: JobPriority::Medium,
            },
        )
        .unwrap();

        let coordinator = JobCoordinator::new(Settings::new());
        let report = coordinator.cancel_pending_jobs(&conn, &JobScope::default());

        assert_eq!(report.thumbnail_cancelled, 1);
        assert_eq!(report.video_cancelled, 1);
        assert!(report.errors.is_empty());
    }
}
