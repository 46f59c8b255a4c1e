// RTSP frame capture
//
// Grabs a single frame from a camera's RTSP stream with ffmpeg and writes
// it atomically (temp file + rename). Stream-level retries and reconnect
// policy live inside ffmpeg's own options, not here: a failed grab is
// reported once and the workflow decides what happens next.

use std::path::Path;
use std::process::Command;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::constants::{CAPTURE_JPEG_QSCALE, DEFAULT_CAPTURE_TIMEOUT_SECS, DEFAULT_RTSP_TRANSPORT};
use crate::db::schema::Camera;
use crate::error::{LapseError, Result};
use crate::tools;

/// Options for a single frame grab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    pub timeout_seconds: u64,
    pub rtsp_transport: String,
    pub jpeg_qscale: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_CAPTURE_TIMEOUT_SECS,
            rtsp_transport: DEFAULT_RTSP_TRANSPORT.to_string(),
            jpeg_qscale: CAPTURE_JPEG_QSCALE,
        }
    }
}

/// Metadata reported by a successful grab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub file_size: u64,
    pub elapsed_ms: i64,
}

/// Result of an RTSP connection probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub success: bool,
    pub response_time_ms: Option<i64>,
    pub error: Option<String>,
}

/// Frame capture collaborator consumed by the workflow orchestrator.
pub trait FrameCapture: Send + Sync {
    fn capture_and_process_frame(
        &self,
        camera: &Camera,
        output_path: &Path,
        settings: &CaptureSettings,
    ) -> Result<CaptureMetadata>;

    fn test_connection(&self, camera: &Camera) -> ConnectionTest;
}

/// ffmpeg-based RTSP capture.
#[derive(Debug, Default)]
pub struct RtspCapture;

impl RtspCapture {
    pub fn new() -> Self {
        RtspCapture
    }
}

impl FrameCapture for RtspCapture {
    fn capture_and_process_frame(
        &self,
        camera: &Camera,
        output_path: &Path,
        settings: &CaptureSettings,
    ) -> Result<CaptureMetadata> {
        let started = Instant::now();

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Use temp file for atomic write
        let tmp_path = output_path.with_extension("tmp.jpg");

        let output = Command::new(tools::ffmpeg_path())
            .args([
                "-y",
                "-loglevel", "error",
                "-rtsp_transport", &settings.rtsp_transport,
                "-timeout", &(settings.timeout_seconds * 1_000_000).to_string(),
                "-i", &camera.rtsp_url,
                "-frames:v", "1",
                "-q:v", &settings.jpeg_qscale.to_string(),
                &tmp_path.to_string_lossy(),
            ])
            .output()?;

        if !output.status.success() {
            let _ = std::fs::remove_file(&tmp_path);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LapseError::Capture(format!(
                "ffmpeg frame grab failed for camera {}: {}",
                camera.id,
                stderr.trim()
            )));
        }

        // Atomic rename
        std::fs::rename(&tmp_path, output_path)?;

        let file_size = std::fs::metadata(output_path)?.len();
        if file_size == 0 {
            let _ = std::fs::remove_file(output_path);
            return Err(LapseError::Capture(format!(
                "ffmpeg produced an empty frame for camera {}",
                camera.id
            )));
        }

        Ok(CaptureMetadata {
            file_size,
            elapsed_ms: started.elapsed().as_millis() as i64,
        })
    }

    fn test_connection(&self, camera: &Camera) -> ConnectionTest {
        let started = Instant::now();

        let result = Command::new(tools::ffprobe_path())
            .args([
                "-v", "quiet",
                "-rtsp_transport", DEFAULT_RTSP_TRANSPORT,
                "-show_streams",
                "-of", "json",
                "-i", &camera.rtsp_url,
            ])
            .output();

        let elapsed = started.elapsed().as_millis() as i64;

        match result {
            Ok(output) if output.status.success() => ConnectionTest {
                success: true,
                response_time_ms: Some(elapsed),
                error: None,
            },
            Ok(output) => ConnectionTest {
                success: false,
                response_time_ms: Some(elapsed),
                error: Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            },
            Err(e) => ConnectionTest {
                success: false,
                response_time_ms: None,
                error: Some(e.to_string()),
            },
        }
    }
}
