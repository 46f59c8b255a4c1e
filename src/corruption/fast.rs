// Fast heuristic checks
// Cheap bounds checks run on every captured frame. Each failed check
// contributes a fixed 25-point penalty; the fast score is bounded at 100.

use crate::constants::*;
use super::{score_from_failures, FrameStats};

/// Run all fast checks. Returns (score, failed check tokens).
pub fn run_checks(file_size: u64, stats: &FrameStats) -> (f64, Vec<String>) {
    let mut failed = Vec::new();

    if let Some(token) = check_file_size(file_size) {
        failed.push(token.to_string());
    }
    if let Some(token) = check_dimensions(stats.width, stats.height) {
        failed.push(token.to_string());
    }
    if let Some(token) = check_brightness(stats.mean_brightness) {
        failed.push(token.to_string());
    }
    if let Some(token) = check_contrast(stats.variance.sqrt()) {
        failed.push(token.to_string());
    }
    if let Some(token) = check_noise_ratio(stats.laplacian_variance, stats.variance) {
        failed.push(token.to_string());
    }

    let score = score_from_failures(failed.len(), FAST_CHECK_PENALTY);
    if !failed.is_empty() {
        log::debug!("Fast checks failed: {:?} (score {})", failed, score);
    }
    (score, failed)
}

/// Truncated transfers produce tiny files; runaway encodes produce huge ones.
fn check_file_size(file_size: u64) -> Option<&'static str> {
    if file_size < FAST_MIN_FILE_BYTES || file_size > FAST_MAX_FILE_BYTES {
        Some(C_FILE_SIZE)
    } else {
        None
    }
}

fn check_dimensions(width: u32, height: u32) -> Option<&'static str> {
    let min = width.min(height);
    let max = width.max(height);
    if min < FAST_MIN_DIMENSION || max > FAST_MAX_DIMENSION {
        Some(C_DIMENSIONS)
    } else {
        None
    }
}

/// All-black and all-white frames are the most common RTSP glitch output.
fn check_brightness(mean: f64) -> Option<&'static str> {
    if mean < FAST_MIN_BRIGHTNESS || mean > FAST_MAX_BRIGHTNESS {
        Some(C_BRIGHTNESS)
    } else {
        None
    }
}

fn check_contrast(stddev: f64) -> Option<&'static str> {
    if stddev < FAST_MIN_CONTRAST_STDDEV {
        Some(C_CONTRAST)
    } else {
        None
    }
}

/// High Laplacian variance relative to overall variance means the frame is
/// dominated by pixel-level noise rather than scene structure.
fn check_noise_ratio(laplacian_variance: f64, variance: f64) -> Option<&'static str> {
    if variance < f64::EPSILON {
        // Flat frame; the contrast check already covers it
        return None;
    }
    if laplacian_variance / variance > FAST_MAX_NOISE_RATIO {
        Some(C_NOISE)
    } else {
        None
    }
}
