// Heavy CV checks
// CPU-intensive analysis enabled per camera. Each failed check contributes
// a fixed 20-point penalty; the heavy score is bounded at 100.

use crate::constants::*;
use super::{score_from_failures, FrameStats};

/// Run all heavy checks. Returns (score, failed check tokens).
pub fn run_checks(stats: &FrameStats) -> (f64, Vec<String>) {
    let mut failed = Vec::new();

    if let Some(token) = check_blur(stats.laplacian_variance) {
        failed.push(token.to_string());
    }
    if let Some(token) = check_edge_density(&stats.luma, stats.width as usize, stats.height as usize) {
        failed.push(token.to_string());
    }
    if let Some(token) = check_color_variance(&stats.channel_means) {
        failed.push(token.to_string());
    }
    if let Some(token) = check_histogram_peaks(&stats.luma) {
        failed.push(token.to_string());
    }
    if let Some(token) = check_saturation(stats.mean_saturation) {
        failed.push(token.to_string());
    }

    let score = score_from_failures(failed.len(), HEAVY_CHECK_PENALTY);
    if !failed.is_empty() {
        log::debug!("Heavy checks failed: {:?} (score {})", failed, score);
    }
    (score, failed)
}

/// Laplacian variance floor: blurred or defocused frames score near zero.
fn check_blur(laplacian_variance: f64) -> Option<&'static str> {
    if laplacian_variance < HEAVY_MIN_LAPLACIAN_VARIANCE {
        Some(C_BLUR)
    } else {
        None
    }
}

/// Fraction of pixels whose Sobel gradient magnitude clears the edge
/// threshold. Glitch frames (smears, solid fills) carry almost no edges.
fn check_edge_density(luma: &[u8], width: usize, height: usize) -> Option<&'static str> {
    if width < 3 || height < 3 {
        return Some(C_EDGE_DENSITY);
    }

    let mut edge_pixels = 0usize;
    let total = (width - 2) * (height - 2);
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let p = |dx: isize, dy: isize| -> f64 {
                luma[((y as isize + dy) as usize) * width + (x as isize + dx) as usize] as f64
            };
            let gx = (p(1, -1) + 2.0 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1));
            let gy = (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1));
            if (gx * gx + gy * gy).sqrt() > HEAVY_EDGE_GRADIENT_THRESHOLD {
                edge_pixels += 1;
            }
        }
    }

    let density = edge_pixels as f64 / total.max(1) as f64;
    if density < HEAVY_MIN_EDGE_DENSITY {
        Some(C_EDGE_DENSITY)
    } else {
        None
    }
}

/// Spread between the R/G/B channel means. A decoder feeding a single
/// channel (green smear, magenta wash) collapses or explodes this spread;
/// a fully gray frame collapses it to zero.
fn check_color_variance(channel_means: &[f64; 3]) -> Option<&'static str> {
    let mean = (channel_means[0] + channel_means[1] + channel_means[2]) / 3.0;
    let variance = channel_means
        .iter()
        .map(|&m| (m - mean).powi(2))
        .sum::<f64>()
        / 3.0;
    if variance < HEAVY_MIN_COLOR_VARIANCE {
        Some(C_COLOR_VARIANCE)
    } else {
        None
    }
}

/// Count distinct peaks in the smoothed luma histogram. A healthy scene has
/// at least two tonal clusters; a glitch frame collapses to one.
fn check_histogram_peaks(luma: &[u8]) -> Option<&'static str> {
    let mut histogram = [0u32; 256];
    for &v in luma {
        histogram[v as usize] += 1;
    }

    // Moving-average smoothing to suppress single-bin jitter
    let mut smoothed = [0.0f64; 256];
    for i in 0..256 {
        let lo = i.saturating_sub(2);
        let hi = (i + 2).min(255);
        let window = &histogram[lo..=hi];
        smoothed[i] = window.iter().map(|&c| c as f64).sum::<f64>() / window.len() as f64;
    }

    let min_height = (luma.len() as f64 / 500.0).max(1.0);
    let mut peaks = 0usize;
    for i in 0..256 {
        if smoothed[i] < min_height {
            continue;
        }
        let lo = i.saturating_sub(2);
        let hi = (i + 2).min(255);
        if (lo..=hi).all(|j| smoothed[j] <= smoothed[i]) {
            peaks += 1;
        }
    }

    if peaks < HEAVY_MIN_HISTOGRAM_PEAKS {
        Some(C_HISTOGRAM)
    } else {
        None
    }
}

fn check_saturation(mean_saturation: f64) -> Option<&'static str> {
    if mean_saturation < HEAVY_MIN_SATURATION {
        Some(C_SATURATION)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blur_floor() {
        assert_eq!(check_blur(10.0), Some(C_BLUR));
        assert_eq!(check_blur(500.0), None);
    }

    #[test]
    fn test_color_variance_gray_frame_fails() {
        assert_eq!(check_color_variance(&[128.0, 128.0, 128.0]), Some(C_COLOR_VARIANCE));
        assert_eq!(check_color_variance(&[140.0, 120.0, 100.0]), None);
    }

    #[test]
    fn test_saturation_floor() {
        assert_eq!(check_saturation(0.0), Some(C_SATURATION));
        assert_eq!(check_saturation(0.2), None);
    }

    #[test]
    fn test_edge_density_flat_frame_fails() {
        let flat = vec![128u8; 64 * 64];
        assert_eq!(check_edge_density(&flat, 64, 64), Some(C_EDGE_DENSITY));
    }

    #[test]
    fn test_edge_density_checkerboard_passes() {
        // 8px checkerboard: plenty of strong edges
        let mut luma = vec![0u8; 64 * 64];
        for y in 0..64 {
            for x in 0..64 {
                if ((x / 8) + (y / 8)) % 2 == 0 {
                    luma[y * 64 + x] = 255;
                }
            }
        }
        assert_eq!(check_edge_density(&luma, 64, 64), None);
    }

    #[test]
    fn test_histogram_single_cluster_fails() {
        let flat = vec![128u8; 4096];
        assert_eq!(check_histogram_peaks(&flat), Some(C_HISTOGRAM));
    }

    #[test]
    fn test_histogram_two_clusters_pass() {
        let mut luma = vec![40u8; 4096];
        for v in luma.iter_mut().skip(2048) {
            *v = 200;
        }
        assert_eq!(check_histogram_peaks(&luma), None);
    }
}
