// Capture workflow orchestrator
//
// Conducts one capture attempt end to end: validate references, grab the
// frame, score it, persist the image row, queue background jobs, and
// broadcast the result. The orchestrator is the error boundary for the
// whole pipeline -- the scheduler loop above it only ever sees a
// structured CaptureResult, never an error.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::capture::{CaptureSettings, FrameCapture};
use crate::constants::{
    EVENT_CAPTURE_FAILED, EVENT_IMAGE_CAPTURED, EVENT_SOURCE_WORKFLOW, FRAMES_FOLDER,
};
use crate::corruption::{CorruptionResult, CorruptionScorer};
use crate::db::schema;
use crate::error::{LapseError, Result};
use crate::events::{EventPriority, EventSink};
use crate::jobs::coordinator::JobCoordinator;
use crate::jobs::JobPriority;
use crate::settings::Settings;
use crate::timelapses;
use crate::weather::WeatherProvider;

/// The in-flight context of one capture attempt. Created at workflow
/// entry, discarded when the attempt resolves; never persisted.
#[derive(Debug, Clone)]
pub struct CaptureJob {
    pub camera_id: i64,
    pub timelapse_id: i64,
    pub is_retry: bool,
}

impl CaptureJob {
    pub fn new(camera_id: i64, timelapse_id: i64) -> Self {
        Self {
            camera_id,
            timelapse_id,
            is_retry: false,
        }
    }

    fn retry(&self) -> Self {
        Self {
            is_retry: true,
            ..self.clone()
        }
    }
}

/// Whether the workflow runs the corruption scorer, or accepts every
/// frame unconditionally (the legacy bypass, kept as a swappable policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityPolicy {
    AcceptAll,
    Evaluate,
}

/// Structured outcome of one capture attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureResult {
    pub success: bool,
    pub image_id: Option<i64>,
    pub image_path: Option<String>,
    pub file_size: Option<i64>,
    pub metadata: serde_json::Value,
    pub error: Option<String>,
}

impl CaptureResult {
    fn failure(error: String, metadata: serde_json::Value) -> Self {
        Self {
            success: false,
            image_id: None,
            image_path: None,
            file_size: None,
            metadata,
            error: Some(error),
        }
    }
}

pub struct WorkflowOrchestrator {
    capture: Box<dyn FrameCapture>,
    coordinator: JobCoordinator,
    events: Arc<dyn EventSink>,
    weather: Box<dyn WeatherProvider>,
    settings: Settings,
    policy_override: Option<QualityPolicy>,
}

impl WorkflowOrchestrator {
    pub fn new(
        capture: Box<dyn FrameCapture>,
        coordinator: JobCoordinator,
        events: Arc<dyn EventSink>,
        weather: Box<dyn WeatherProvider>,
        settings: Settings,
    ) -> Self {
        Self {
            capture,
            coordinator,
            events,
            weather,
            settings,
            policy_override: None,
        }
    }

    /// Pin the quality policy instead of reading it from settings.
    pub fn with_policy(mut self, policy: QualityPolicy) -> Self {
        self.policy_override = Some(policy);
        self
    }

    fn quality_policy(&self, conn: &Connection) -> QualityPolicy {
        if let Some(policy) = self.policy_override {
            return policy;
        }
        if self.settings.quality_evaluation_enabled(conn) {
            QualityPolicy::Evaluate
        } else {
            QualityPolicy::AcceptAll
        }
    }

    /// Execute one capture attempt. Never returns an error: anything the
    /// pipeline throws is converted into a failure result here, after a
    /// best-effort camera connectivity update.
    pub fn execute_capture_workflow(
        &self,
        conn: &Connection,
        library_root: &Path,
        camera_id: i64,
        timelapse_id: i64,
        job: Option<CaptureJob>,
    ) -> CaptureResult {
        let job = job.unwrap_or_else(|| CaptureJob::new(camera_id, timelapse_id));

        match self.run(conn, library_root, &job) {
            Ok(result) => result,
            Err(e) => {
                if let Err(mark_err) = schema::mark_camera_capture_failed(conn, camera_id) {
                    log::warn!(
                        "Could not record capture failure for camera {}: {}",
                        camera_id,
                        mark_err
                    );
                }
                let error = e.to_string();
                log::error!(
                    "Capture workflow failed for camera {} timelapse {}: {}",
                    camera_id,
                    timelapse_id,
                    error
                );
                self.events.create_event(
                    EVENT_CAPTURE_FAILED,
                    json!({
                        "camera_id": camera_id,
                        "timelapse_id": timelapse_id,
                        "error": error,
                    }),
                    EventPriority::High,
                    EVENT_SOURCE_WORKFLOW,
                );
                CaptureResult::failure(error, json!({ "is_retry": job.is_retry }))
            }
        }
    }

    fn run(&self, conn: &Connection, library_root: &Path, job: &CaptureJob) -> Result<CaptureResult> {
        // Validate: existence checks only. Whether this capture should
        // happen now is the scheduler's call; this only guards against
        // referential corruption.
        let camera = schema::get_camera(conn, job.camera_id)?
            .ok_or(LapseError::CameraNotFound(job.camera_id))?;
        let timelapse = schema::get_timelapse(conn, job.timelapse_id)?
            .ok_or(LapseError::TimelapseNotFound(job.timelapse_id))?;
        if timelapse.camera_id != camera.id {
            return Err(LapseError::Other(format!(
                "Timelapse {} does not belong to camera {}",
                timelapse.id, camera.id
            )));
        }

        // Capture
        let captured_at = Utc::now();
        let filename = format!("capture_{}.jpg", captured_at.format("%Y%m%d_%H%M%S%f"));
        let rel_path = format!("{}/{}/{}", FRAMES_FOLDER, camera.id, filename);
        let frame_path = library_root.join(&rel_path);

        let capture_meta =
            self.capture
                .capture_and_process_frame(&camera, &frame_path, &CaptureSettings::default())?;
        schema::mark_camera_capture_success(conn, camera.id)?;

        // Evaluate quality
        let evaluation = match self.quality_policy(conn) {
            QualityPolicy::AcceptAll => None,
            QualityPolicy::Evaluate => {
                let scorer = CorruptionScorer::new(self.settings.corruption_config(conn));
                Some(scorer.evaluate(&frame_path, camera.heavy_checks_enabled))
            }
        };

        // Discard handling
        if let Some(result) = evaluation.as_ref().filter(|r| r.auto_discard) {
            return self.handle_discard(conn, library_root, job, &camera, result, &frame_path);
        }

        // Persist
        let tz = self.settings.timezone(conn);
        let day_number = timelapses::day_number(&timelapse.start_date, captured_at, tz)?;
        let weather = self.weather.get_latest_weather(conn);

        let (quality_score, is_flagged) = match evaluation.as_ref() {
            Some(result) => (
                (100.0 - result.final_score).round() as i64,
                result.is_corrupted,
            ),
            None => (100, false),
        };

        let image_id = schema::insert_image(
            conn,
            &schema::NewImage {
                camera_id: camera.id,
                timelapse_id: timelapse.id,
                file_path: rel_path.clone(),
                filename,
                captured_at: captured_at.to_rfc3339(),
                day_number,
                corruption_score: quality_score,
                is_flagged,
                file_size: capture_meta.file_size as i64,
                weather_temperature: weather.as_ref().and_then(|w| w.temperature_c),
                weather_condition: weather.as_ref().and_then(|w| w.condition.clone()),
                weather_icon: weather.as_ref().and_then(|w| w.icon.clone()),
            },
        )?;

        if is_flagged {
            schema::increment_glitch_count(conn, timelapse.id)?;
        }
        if let Some(result) = evaluation.as_ref() {
            self.log_evaluation(conn, camera.id, Some(image_id), result);
        }

        let image_count = schema::count_timelapse_images(conn, timelapse.id)?;

        // Coordinate background jobs. A failed coordination degrades
        // functionality but never fails the capture. Video triggering is
        // deliberately absent here -- the scheduler authority owns it.
        let coordination =
            self.coordinator
                .coordinate_thumbnail_job(conn, image_id, JobPriority::Medium);
        if !coordination.success {
            log::warn!(
                "Thumbnail coordination failed for image {}: {:?}",
                image_id,
                coordination.error.as_deref().or(coordination.reason.as_deref())
            );
        }

        // Broadcast
        self.events.create_event(
            EVENT_IMAGE_CAPTURED,
            json!({
                "image_count": image_count,
                "day_number": day_number,
                "image_id": image_id,
                "camera_id": camera.id,
                "timelapse_id": timelapse.id,
            }),
            EventPriority::Normal,
            EVENT_SOURCE_WORKFLOW,
        );

        Ok(CaptureResult {
            success: true,
            image_id: Some(image_id),
            image_path: Some(rel_path),
            file_size: Some(capture_meta.file_size as i64),
            metadata: json!({
                "day_number": day_number,
                "image_count": image_count,
                "capture_elapsed_ms": capture_meta.elapsed_ms,
                "quality_score": quality_score,
                "is_flagged": is_flagged,
                "evaluated": evaluation.is_some(),
                "corruption": evaluation.as_ref().map(|r| json!({
                    "final_score": r.final_score,
                    "failed_checks": r.failed_checks,
                })),
                "job_coordination": {
                    "success": coordination.success,
                    "method": coordination.method,
                    "job_id": coordination.job_id,
                },
                "is_retry": job.is_retry,
            }),
            error: None,
        })
    }

    /// A frame past the auto-discard threshold: delete it, retry the whole
    /// workflow once if allowed, otherwise report a quality failure. This
    /// is a content-level rejection, not a capture error, so camera
    /// connectivity is untouched.
    fn handle_discard(
        &self,
        conn: &Connection,
        library_root: &Path,
        job: &CaptureJob,
        camera: &schema::Camera,
        result: &CorruptionResult,
        frame_path: &Path,
    ) -> Result<CaptureResult> {
        if let Err(e) = std::fs::remove_file(frame_path) {
            log::warn!("Could not delete discarded frame {}: {}", frame_path.display(), e);
        }
        self.log_evaluation(conn, camera.id, None, result);

        log::info!(
            "Discarded frame from camera {} (score {:.0}, checks {:?})",
            camera.id,
            result.final_score,
            result.failed_checks
        );

        if !job.is_retry && self.settings.retry_on_discard(conn) {
            log::info!("Retrying capture for camera {} after discard", camera.id);
            return Ok(self.execute_capture_workflow(
                conn,
                library_root,
                job.camera_id,
                job.timelapse_id,
                Some(job.retry()),
            ));
        }

        Ok(CaptureResult::failure(
            format!(
                "Frame discarded for quality (corruption score {:.0})",
                result.final_score
            ),
            json!({
                "discarded": true,
                "final_score": result.final_score,
                "failed_checks": result.failed_checks,
                "is_retry": job.is_retry,
            }),
        ))
    }

    /// Append to the corruption audit log, best-effort.
    fn log_evaluation(
        &self,
        conn: &Connection,
        camera_id: i64,
        image_id: Option<i64>,
        result: &CorruptionResult,
    ) {
        if let Err(e) = schema::insert_corruption_log(
            conn,
            camera_id,
            image_id,
            result.fast_score,
            result.heavy_score,
            result.final_score,
            &result.failed_checks,
            result.is_corrupted,
            result.processing_time_ms,
        ) {
            log::warn!("Could not write corruption log for camera {}: {}", camera_id, e);
        }
    }
}
