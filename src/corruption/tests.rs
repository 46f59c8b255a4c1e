// Corruption scoring test fixtures
// Synthetic frames are generated in-memory with the image crate;
// no binary fixtures are checked in.

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use tempfile::TempDir;

    use image::RgbImage;

    use crate::constants::{C_IMAGE_LOAD, FAST_CHECK_PENALTY, HEAVY_CHECK_PENALTY};
    use crate::corruption::{score_from_failures, CorruptionScorer};
    use crate::settings::CorruptionConfig;

    /// A healthy frame: gradient structure, texture, and color spread.
    fn write_good_frame(dir: &TempDir) -> PathBuf {
        let img = RgbImage::from_fn(640, 480, |x, y| {
            let v = (x * 255 / 639) as i32;
            let j = ((x * 7 + y * 13) % 49) as i32 - 24;
            let clamp = |n: i32| n.clamp(0, 255) as u8;
            image::Rgb([
                clamp(v + j),
                clamp(v * 4 / 5 + j),
                clamp(255 - v + j),
            ])
        });
        let path = dir.path().join("good.png");
        img.save(&path).unwrap();
        path
    }

    /// A glitch frame: solid black, no structure at all.
    fn write_black_frame(dir: &TempDir) -> PathBuf {
        let img = RgbImage::from_pixel(640, 480, image::Rgb([0, 0, 0]));
        let path = dir.path().join("black.jpg");
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_good_frame_passes_all_checks() {
        let dir = TempDir::new().unwrap();
        let path = write_good_frame(&dir);

        let scorer = CorruptionScorer::new(CorruptionConfig::default());
        let result = scorer.evaluate(&path, true);

        assert_eq!(result.fast_score, 0.0, "failed: {:?}", result.failed_checks);
        assert_eq!(result.heavy_score, Some(0.0), "failed: {:?}", result.failed_checks);
        assert_eq!(result.final_score, 0.0);
        assert!(!result.is_corrupted);
        assert!(!result.auto_discard);
        assert!(result.failed_checks.is_empty());
    }

    #[test]
    fn test_black_frame_is_flagged() {
        let dir = TempDir::new().unwrap();
        let path = write_black_frame(&dir);

        let scorer = CorruptionScorer::new(CorruptionConfig::default());
        let result = scorer.evaluate(&path, true);

        // Fast path: brightness and contrast fail (50). Heavy path: every
        // check fails (100). Combined: 50*0.7 + 100*0.3 = 65.
        assert_eq!(result.fast_score, 50.0, "failed: {:?}", result.failed_checks);
        assert_eq!(result.heavy_score, Some(100.0));
        assert!((result.final_score - 65.0).abs() < 0.001);
        assert!(result.is_corrupted);
        assert!(!result.auto_discard);
    }

    #[test]
    fn test_black_frame_fast_only() {
        let dir = TempDir::new().unwrap();
        let path = write_black_frame(&dir);

        let scorer = CorruptionScorer::new(CorruptionConfig::default());
        let result = scorer.evaluate(&path, false);

        assert_eq!(result.fast_score, 50.0);
        assert_eq!(result.heavy_score, None);
        assert_eq!(result.final_score, 50.0);
        assert!(result.is_corrupted);
    }

    #[test]
    fn test_decode_failure_scores_100() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.jpg");
        std::fs::write(&path, b"this is not a jpeg").unwrap();

        let scorer = CorruptionScorer::new(CorruptionConfig::default());
        let result = scorer.evaluate(&path, true);

        assert_eq!(result.final_score, 100.0);
        assert_eq!(result.failed_checks, vec![C_IMAGE_LOAD.to_string()]);
        assert!(result.is_corrupted);
        assert!(result.auto_discard);
    }

    #[test]
    fn test_missing_file_scores_100() {
        let scorer = CorruptionScorer::new(CorruptionConfig::default());
        let result = scorer.evaluate(std::path::Path::new("/nonexistent/frame.jpg"), false);

        assert_eq!(result.final_score, 100.0);
        assert_eq!(result.failed_checks, vec![C_IMAGE_LOAD.to_string()]);
    }

    #[test]
    fn test_fast_score_steps_by_25_bounded() {
        let mut previous = score_from_failures(0, FAST_CHECK_PENALTY);
        assert_eq!(previous, 0.0);
        for n in 1..=4 {
            let score = score_from_failures(n, FAST_CHECK_PENALTY);
            assert_eq!(score - previous, 25.0);
            previous = score;
        }
        // A fifth failure is absorbed by the bound
        assert_eq!(score_from_failures(5, FAST_CHECK_PENALTY), 100.0);
        assert_eq!(score_from_failures(6, FAST_CHECK_PENALTY), 100.0);
    }

    #[test]
    fn test_heavy_score_steps_by_20_bounded() {
        let mut previous = score_from_failures(0, HEAVY_CHECK_PENALTY);
        for n in 1..=5 {
            let score = score_from_failures(n, HEAVY_CHECK_PENALTY);
            assert_eq!(score - previous, 20.0);
            previous = score;
        }
        assert_eq!(score_from_failures(6, HEAVY_CHECK_PENALTY), 100.0);
    }

    #[test]
    fn test_discard_implies_corrupted() {
        // Holds whenever auto_discard_threshold >= corruption_threshold
        let scorer = CorruptionScorer::new(CorruptionConfig {
            corruption_threshold: 50.0,
            auto_discard_threshold: 75.0,
            ..CorruptionConfig::default()
        });

        for score in 0..=100 {
            let score = score as f64;
            if scorer.should_auto_discard(score) {
                assert!(scorer.is_corrupted(score), "discarded but not corrupted at {}", score);
            }
        }
    }

    #[test]
    fn test_thresholds_independent() {
        // Flag-but-keep band: corrupted without discard
        let scorer = CorruptionScorer::new(CorruptionConfig::default());
        assert!(scorer.is_corrupted(60.0));
        assert!(!scorer.should_auto_discard(60.0));
        assert!(scorer.should_auto_discard(80.0));
    }

    #[test]
    fn test_combination_weights() {
        let scorer = CorruptionScorer::new(CorruptionConfig::default());

        // Heavy ran: weighted blend
        assert!((scorer.combine(50.0, Some(0.0)) - 35.0).abs() < 0.001);
        assert!((scorer.combine(0.0, Some(100.0)) - 30.0).abs() < 0.001);
        assert_eq!(scorer.combine(100.0, Some(100.0)), 100.0);

        // Heavy skipped: fast alone
        assert_eq!(scorer.combine(50.0, None), 50.0);
    }
}
