// Thumbnail generation
//
// Resizes captured JPEG frames in-process with the image crate. Output is
// written to a temp file and renamed so readers never see partial files.

use std::path::Path;

use image::imageops::FilterType;
use image::GenericImageView;

use crate::constants::{THUMB_JPEG_QUALITY, THUMB_MAX_WIDTH};
use crate::error::{LapseError, Result};

/// Options for thumbnail generation.
#[derive(Debug, Clone)]
pub struct ThumbOptions {
    pub max_width: u32,
    pub jpeg_quality: u8,
}

impl Default for ThumbOptions {
    fn default() -> Self {
        Self {
            max_width: THUMB_MAX_WIDTH,
            jpeg_quality: THUMB_JPEG_QUALITY,
        }
    }
}

impl ThumbOptions {
    pub fn with_max_width(max_width: u32) -> Self {
        Self {
            max_width,
            ..Self::default()
        }
    }
}

/// Generate a thumbnail from a captured frame. Never upscales.
pub fn generate_thumbnail(source_path: &Path, output_path: &Path, options: &ThumbOptions) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let img = image::open(source_path)?;
    let resized = if img.width() > options.max_width {
        img.resize(options.max_width, u32::MAX, FilterType::Lanczos3)
    } else {
        img
    };

    // Use temp file for atomic write
    let tmp_path = output_path.with_extension("tmp.jpg");
    let rgb = resized.to_rgb8();
    let mut out = std::fs::File::create(&tmp_path)?;
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, options.jpeg_quality);
    if let Err(e) = rgb.write_with_encoder(encoder) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(LapseError::Image(e));
    }
    drop(out);

    // Atomic rename
    std::fs::rename(&tmp_path, output_path)?;

    if std::fs::metadata(output_path)?.len() == 0 {
        let _ = std::fs::remove_file(output_path);
        return Err(LapseError::Other(format!(
            "Thumbnail came out empty: {}",
            output_path.display()
        )));
    }

    Ok(())
}
