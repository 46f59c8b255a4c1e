// Caption overlay rendering
//
// Burns a timestamp/weather caption into a frame copy with ffmpeg's
// drawtext filter. The original frame is never modified.

use std::path::Path;
use std::process::Command;

use crate::error::{LapseError, Result};
use crate::tools;

/// Render a caption onto a frame. The caption lands bottom-left on a
/// translucent box.
pub fn render_overlay(source_path: &Path, output_path: &Path, caption: &str) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use temp file for atomic write
    let tmp_path = output_path.with_extension("tmp.jpg");

    let filter = format!(
        "drawtext=text='{}':x=10:y=h-th-10:fontsize=24:fontcolor=white:box=1:boxcolor=black@0.5:boxborderw=8",
        escape_drawtext(caption)
    );

    let output = Command::new(tools::ffmpeg_path())
        .args([
            "-y",
            "-loglevel", "error",
            "-i", &source_path.to_string_lossy(),
            "-vf", &filter,
            "-q:v", "3",
            &tmp_path.to_string_lossy(),
        ])
        .output()?;

    if !output.status.success() {
        let _ = std::fs::remove_file(&tmp_path);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(LapseError::FFmpeg(format!(
            "Overlay render failed: {}",
            stderr.trim()
        )));
    }

    // Atomic rename
    std::fs::rename(&tmp_path, output_path)?;

    if !output_path.exists() || std::fs::metadata(output_path)?.len() == 0 {
        let _ = std::fs::remove_file(output_path);
        return Err(LapseError::FFmpeg(format!(
            "Overlay came out empty: {}",
            output_path.display()
        )));
    }

    Ok(())
}

/// Escape drawtext's special characters in caption text.
fn escape_drawtext(text: &str) -> String {
    text.replace('\\', r"\\")
        .replace('\'', r"\'")
        .replace(':', r"\:")
        .replace('%', r"\%")
}

/// Build the standard caption for a frame: local timestamp plus weather
/// when a snapshot was recorded.
pub fn build_caption(image: &crate::db::schema::Image) -> String {
    let mut caption = image.captured_at.clone();
    if let Some(temp) = image.weather_temperature {
        caption.push_str(&format!("  {:.0}C", temp));
    }
    if let Some(ref condition) = image.weather_condition {
        caption.push_str(&format!("  {}", condition));
    }
    caption
}
