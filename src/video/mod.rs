// Video assembly
//
// Builds a timelapse video from a campaign's frames with ffmpeg's concat
// demuxer. Frame order is capture order; encoder settings come from the
// resolved defaults < camera < timelapse < job inheritance chain.

pub mod automation;
pub mod queue;

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;
use rusqlite::Connection;

use crate::constants::{LAPSECAM_FOLDER, VIDEOS_FOLDER};
use crate::db::schema::{self, Camera, Timelapse};
use crate::error::{LapseError, Result};
use crate::settings::{Settings, VideoGenerationOverrides, VideoGenerationSettings};
use crate::tools;

/// Resolve effective generation settings for a timelapse, optionally with
/// a job-level override layer on top.
pub fn resolve_settings(
    settings: &Settings,
    conn: &Connection,
    camera: &Camera,
    timelapse: &Timelapse,
    job_overrides: Option<&VideoGenerationOverrides>,
) -> VideoGenerationSettings {
    let defaults = settings.video_defaults(conn);
    let camera_layer = camera
        .video_settings
        .as_deref()
        .and_then(VideoGenerationOverrides::from_json);
    let timelapse_layer = timelapse
        .video_settings
        .as_deref()
        .and_then(VideoGenerationOverrides::from_json);

    VideoGenerationSettings::resolve(
        &defaults,
        camera_layer.as_ref(),
        timelapse_layer.as_ref(),
        job_overrides,
    )
}

/// Assemble the timelapse video. Returns the output path relative to the
/// library root.
pub fn generate_video(
    conn: &Connection,
    library_root: &Path,
    timelapse: &Timelapse,
    settings: &VideoGenerationSettings,
) -> Result<PathBuf> {
    let images = schema::list_timelapse_images(conn, timelapse.id)?;
    if images.is_empty() {
        return Err(LapseError::Other(format!(
            "Timelapse {} has no frames to assemble",
            timelapse.id
        )));
    }

    let videos_dir = library_root.join(VIDEOS_FOLDER);
    std::fs::create_dir_all(&videos_dir)?;

    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let output_rel = PathBuf::from(VIDEOS_FOLDER).join(format!(
        "timelapse_{}_{}.mp4",
        timelapse.id, stamp
    ));
    let output_path = library_root.join(&output_rel);

    // Concat list; frames are ordered by captured_at
    let list_path = library_root
        .join(LAPSECAM_FOLDER)
        .join(format!("concat_{}.txt", timelapse.id));
    let mut list = String::new();
    for image in &images {
        let frame_path = library_root.join(&image.file_path);
        if !frame_path.exists() {
            log::warn!("Skipping missing frame {}", frame_path.display());
            continue;
        }
        // Single quotes in paths use the concat demuxer's '\'' escape
        let escaped = frame_path.to_string_lossy().replace('\'', r"'\''");
        list.push_str(&format!("file '{}'\n", escaped));
    }
    if list.is_empty() {
        return Err(LapseError::Other(format!(
            "Timelapse {} frames are all missing on disk",
            timelapse.id
        )));
    }
    std::fs::write(&list_path, &list)?;

    let mut args: Vec<String> = vec![
        "-y".into(),
        "-f".into(), "concat".into(),
        "-safe".into(), "0".into(),
        "-r".into(), settings.framerate.to_string(),
        "-i".into(), list_path.to_string_lossy().to_string(),
        "-c:v".into(), "libx264".into(),
        "-crf".into(), settings.crf.to_string(),
        "-pix_fmt".into(), "yuv420p".into(),
    ];
    if let Some(max_width) = settings.max_width {
        args.push("-vf".into());
        args.push(format!("scale='min({},iw)':-2", max_width));
    }
    args.push(output_path.to_string_lossy().to_string());

    let output = Command::new(tools::ffmpeg_path()).args(&args).output()?;
    let _ = std::fs::remove_file(&list_path);

    if !output.status.success() {
        let _ = std::fs::remove_file(&output_path);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(LapseError::FFmpeg(format!(
            "Video assembly failed for timelapse {}: {}",
            timelapse.id,
            stderr.trim()
        )));
    }

    if let Some(frames) = parse_encoded_frames(&String::from_utf8_lossy(&output.stderr)) {
        log::info!(
            "Assembled timelapse {} ({} frames) -> {}",
            timelapse.id,
            frames,
            output_rel.display()
        );
    }

    if !output_path.exists() || std::fs::metadata(&output_path)?.len() == 0 {
        let _ = std::fs::remove_file(&output_path);
        return Err(LapseError::FFmpeg(format!(
            "Video output is empty or missing for timelapse {}",
            timelapse.id
        )));
    }

    Ok(output_rel)
}

/// Parse the final encoded frame count from ffmpeg stderr.
fn parse_encoded_frames(stderr: &str) -> Option<u64> {
    let re = regex::Regex::new(r"frame=\s*(\d+)").ok()?;
    re.captures_iter(stderr)
        .filter_map(|cap| cap.get(1)?.as_str().parse::<u64>().ok())
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_encoded_frames() {
        let stderr = "frame=   10 fps=0.0 q=29.0\nframe=  240 fps=120 q=-1.0 Lsize= 1024kB";
        assert_eq!(parse_encoded_frames(stderr), Some(240));
        assert_eq!(parse_encoded_frames("no frames here"), None);
    }
}
