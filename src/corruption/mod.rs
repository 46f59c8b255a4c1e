// Corruption detection engine
// Scores captured frames for glitches and transport corruption.
// Higher score = more corrupt; the workflow inverts to quality before persisting.

pub mod fast;
pub mod heavy;

#[cfg(test)]
mod tests;

use std::path::Path;
use std::time::Instant;

use image::GenericImageView;
use serde::{Deserialize, Serialize};

use crate::constants::{C_IMAGE_LOAD, SCORE_MAX};
use crate::settings::CorruptionConfig;

/// Result of evaluating a single frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorruptionResult {
    pub fast_score: f64,
    pub heavy_score: Option<f64>,
    pub final_score: f64,
    pub failed_checks: Vec<String>,
    pub is_corrupted: bool,
    pub auto_discard: bool,
    pub processing_time_ms: i64,
}

/// Pixel statistics computed once per frame and shared by both check paths.
pub struct FrameStats {
    pub width: u32,
    pub height: u32,
    pub luma: Vec<u8>,
    pub mean_brightness: f64,
    pub variance: f64,
    pub laplacian_variance: f64,
    pub channel_means: [f64; 3],
    pub mean_saturation: f64,
}

impl FrameStats {
    pub fn from_image(img: &image::DynamicImage) -> Self {
        let (width, height) = img.dimensions();
        let luma_img = img.to_luma8();
        let luma = luma_img.into_raw();

        // Mean and variance of luma
        let n = luma.len().max(1) as f64;
        let sum: f64 = luma.iter().map(|&v| v as f64).sum();
        let mean = sum / n;
        let variance = luma.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;

        let laplacian_variance = laplacian_variance(&luma, width as usize, height as usize);

        // Per-channel means and mean saturation from the RGB view
        let rgb = img.to_rgb8();
        let mut channel_sums = [0.0f64; 3];
        let mut saturation_sum = 0.0f64;
        for pixel in rgb.pixels() {
            let [r, g, b] = pixel.0;
            channel_sums[0] += r as f64;
            channel_sums[1] += g as f64;
            channel_sums[2] += b as f64;
            let max = r.max(g).max(b) as f64;
            let min = r.min(g).min(b) as f64;
            if max > 0.0 {
                saturation_sum += (max - min) / max;
            }
        }
        let pixel_count = (rgb.width() as f64 * rgb.height() as f64).max(1.0);
        let channel_means = [
            channel_sums[0] / pixel_count,
            channel_sums[1] / pixel_count,
            channel_sums[2] / pixel_count,
        ];
        let mean_saturation = saturation_sum / pixel_count;

        Self {
            width,
            height,
            luma,
            mean_brightness: mean,
            variance,
            laplacian_variance,
            channel_means,
            mean_saturation,
        }
    }
}

/// Variance of the 4-neighbor Laplacian over interior pixels.
/// Near zero for flat or blurred content, large for noise and sharp detail.
fn laplacian_variance(luma: &[u8], width: usize, height: usize) -> f64 {
    if width < 3 || height < 3 {
        return 0.0;
    }

    let mut responses = Vec::with_capacity((width - 2) * (height - 2));
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = luma[y * width + x] as f64;
            let up = luma[(y - 1) * width + x] as f64;
            let down = luma[(y + 1) * width + x] as f64;
            let left = luma[y * width + x - 1] as f64;
            let right = luma[y * width + x + 1] as f64;
            responses.push(4.0 * center - up - down - left - right);
        }
    }

    let n = responses.len() as f64;
    let mean = responses.iter().sum::<f64>() / n;
    responses.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / n
}

/// Score from a count of failed checks: fixed penalty per check, bounded at 100.
pub fn score_from_failures(failed_count: usize, penalty: f64) -> f64 {
    (failed_count as f64 * penalty).min(SCORE_MAX)
}

/// Corruption scorer with configured thresholds and weights.
#[derive(Debug, Clone, Default)]
pub struct CorruptionScorer {
    config: CorruptionConfig,
}

impl CorruptionScorer {
    pub fn new(config: CorruptionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CorruptionConfig {
        &self.config
    }

    /// Evaluate a captured frame. Never fails: an unreadable or undecodable
    /// file scores 100 so the pipeline can still reach a discard decision.
    pub fn evaluate(&self, image_path: &Path, heavy_enabled: bool) -> CorruptionResult {
        let started = Instant::now();

        let file_size = match std::fs::metadata(image_path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                log::warn!("Corruption check could not stat {}: {}", image_path.display(), e);
                return self.load_failure_result(started);
            }
        };

        let img = match image::open(image_path) {
            Ok(img) => img,
            Err(e) => {
                log::warn!("Corruption check could not decode {}: {}", image_path.display(), e);
                return self.load_failure_result(started);
            }
        };

        let stats = FrameStats::from_image(&img);

        let (fast_score, mut failed_checks) = fast::run_checks(file_size, &stats);

        let heavy_score = if heavy_enabled {
            let (score, mut heavy_failed) = heavy::run_checks(&stats);
            failed_checks.append(&mut heavy_failed);
            Some(score)
        } else {
            None
        };

        let final_score = self.combine(fast_score, heavy_score);

        CorruptionResult {
            fast_score,
            heavy_score,
            final_score,
            failed_checks,
            is_corrupted: self.is_corrupted(final_score),
            auto_discard: self.should_auto_discard(final_score),
            processing_time_ms: started.elapsed().as_millis() as i64,
        }
    }

    /// Weighted combination when the heavy path ran, fast score alone otherwise.
    pub fn combine(&self, fast_score: f64, heavy_score: Option<f64>) -> f64 {
        let combined = match heavy_score {
            Some(heavy) => fast_score * self.config.fast_weight + heavy * self.config.heavy_weight,
            None => fast_score,
        };
        combined.clamp(0.0, SCORE_MAX)
    }

    pub fn is_corrupted(&self, score: f64) -> bool {
        score >= self.config.corruption_threshold
    }

    pub fn should_auto_discard(&self, score: f64) -> bool {
        score >= self.config.auto_discard_threshold
    }

    fn load_failure_result(&self, started: Instant) -> CorruptionResult {
        CorruptionResult {
            fast_score: SCORE_MAX,
            heavy_score: None,
            final_score: SCORE_MAX,
            failed_checks: vec![C_IMAGE_LOAD.to_string()],
            is_corrupted: true,
            auto_discard: self.should_auto_discard(SCORE_MAX),
            processing_time_ms: started.elapsed().as_millis() as i64,
        }
    }
}
