// Preview artifact pipeline
//
// Derives display artifacts from captured frames: grid thumbnails, small
// list thumbnails, and caption overlays. Artifact paths mirror the frame
// layout under their own folders.

pub mod overlay;
pub mod thumb;

use std::path::{Path, PathBuf};

use crate::constants::{OVERLAYS_FOLDER, THUMBS_FOLDER};
use crate::db::schema::Image;
use crate::error::{LapseError, Result};

/// Library-relative path for a frame's thumbnail artifact.
pub fn thumb_rel_path(image: &Image) -> PathBuf {
    artifact_rel_path(image, THUMBS_FOLDER, "thumb")
}

/// Library-relative path for a frame's small artifact.
pub fn small_rel_path(image: &Image) -> PathBuf {
    artifact_rel_path(image, THUMBS_FOLDER, "small")
}

/// Library-relative path for a frame's overlay render.
pub fn overlay_rel_path(image: &Image) -> PathBuf {
    artifact_rel_path(image, OVERLAYS_FOLDER, "overlay")
}

fn artifact_rel_path(image: &Image, folder: &str, suffix: &str) -> PathBuf {
    let stem = Path::new(&image.filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| image.filename.clone());
    PathBuf::from(folder)
        .join(image.camera_id.to_string())
        .join(format!("{}_{}.jpg", stem, suffix))
}

/// Resolve a frame's absolute path and confirm it still exists.
pub fn source_frame_path(library_root: &Path, image: &Image) -> Result<PathBuf> {
    let path = library_root.join(&image.file_path);
    if !path.exists() {
        return Err(LapseError::FileNotFound(path.to_string_lossy().to_string()));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image() -> Image {
        Image {
            id: 1,
            camera_id: 4,
            timelapse_id: 2,
            file_path: "frames/4/capture_20260804_120000.jpg".to_string(),
            filename: "capture_20260804_120000.jpg".to_string(),
            captured_at: "2026-08-04T12:00:00Z".to_string(),
            day_number: 1,
            corruption_score: 100,
            is_flagged: false,
            file_size: 10_000,
            thumbnail_path: None,
            small_path: None,
            weather_temperature: None,
            weather_condition: None,
            weather_icon: None,
            created_at: "2026-08-04 12:00:00".to_string(),
        }
    }

    #[test]
    fn test_artifact_paths_mirror_camera_layout() {
        let image = sample_image();
        assert_eq!(
            thumb_rel_path(&image),
            PathBuf::from("thumbs/4/capture_20260804_120000_thumb.jpg")
        );
        assert_eq!(
            small_rel_path(&image),
            PathBuf::from("thumbs/4/capture_20260804_120000_small.jpg")
        );
        assert_eq!(
            overlay_rel_path(&image),
            PathBuf::from("overlays/4/capture_20260804_120000_overlay.jpg")
        );
    }
}
