// Settings provider and typed configuration
//
// All tunable behavior reads through the settings KV table with documented
// defaults. The provider is constructed once at process start and passed
// down; nothing in the crate reaches for global state.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::db::schema;
use crate::error::Result;

/// Parse a stored boolean. Accepts "true"/"1"/"yes" case-insensitively.
pub fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

/// Read-through settings provider over the settings table.
#[derive(Debug, Clone, Default)]
pub struct Settings;

impl Settings {
    pub fn new() -> Self {
        Settings
    }

    pub fn get(&self, conn: &Connection, key: &str) -> Result<Option<String>> {
        schema::get_setting(conn, key)
    }

    pub fn set(&self, conn: &Connection, key: &str, value: &str) -> Result<()> {
        schema::set_setting(conn, key, value)
    }

    pub fn get_bool(&self, conn: &Connection, key: &str, default: bool) -> bool {
        match schema::get_setting(conn, key) {
            Ok(Some(v)) => parse_bool(&v),
            _ => default,
        }
    }

    pub fn get_i64(&self, conn: &Connection, key: &str, default: i64) -> i64 {
        match schema::get_setting(conn, key) {
            Ok(Some(v)) => v.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_f64(&self, conn: &Connection, key: &str, default: f64) -> f64 {
        match schema::get_setting(conn, key) {
            Ok(Some(v)) => v.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Whether thumbnail jobs may be queued at all.
    pub fn thumbnail_generation_enabled(&self, conn: &Connection) -> bool {
        self.get_bool(conn, "thumbnail_generation_enabled", true)
    }

    /// Whether the capture workflow runs the corruption scorer
    /// (false restores the accept-everything bypass).
    pub fn quality_evaluation_enabled(&self, conn: &Connection) -> bool {
        self.get_bool(conn, "quality_evaluation_enabled", true)
    }

    /// Whether an auto-discarded capture is retried once.
    pub fn retry_on_discard(&self, conn: &Connection) -> bool {
        self.get_bool(conn, "retry_on_discard", true)
    }

    /// The IANA timezone that day numbering and schedules run in.
    pub fn timezone(&self, conn: &Connection) -> chrono_tz::Tz {
        match schema::get_setting(conn, "timezone") {
            Ok(Some(name)) => name.parse().unwrap_or(chrono_tz::UTC),
            _ => chrono_tz::UTC,
        }
    }

    pub fn corruption_config(&self, conn: &Connection) -> CorruptionConfig {
        CorruptionConfig {
            corruption_threshold: self.get_f64(conn, "corruption_threshold", DEFAULT_CORRUPTION_THRESHOLD),
            auto_discard_threshold: self.get_f64(conn, "auto_discard_threshold", DEFAULT_AUTO_DISCARD_THRESHOLD),
            fast_weight: self.get_f64(conn, "corruption_fast_weight", DEFAULT_FAST_WEIGHT),
            heavy_weight: self.get_f64(conn, "corruption_heavy_weight", DEFAULT_HEAVY_WEIGHT),
        }
    }

    pub fn automation_config(&self, conn: &Connection) -> VideoAutomationConfig {
        VideoAutomationConfig {
            max_concurrent_jobs: self.get_i64(conn, "video_max_concurrent_jobs", DEFAULT_MAX_CONCURRENT_VIDEO_JOBS),
            per_capture_throttle_minutes: self.get_i64(
                conn,
                "per_capture_throttle_minutes",
                DEFAULT_PER_CAPTURE_THROTTLE_MINUTES,
            ),
        }
    }

    /// Global video generation defaults, the lowest layer of the
    /// defaults < camera < timelapse < job inheritance chain.
    pub fn video_defaults(&self, conn: &Connection) -> VideoGenerationSettings {
        VideoGenerationSettings {
            framerate: self.get_i64(conn, "video_framerate", DEFAULT_VIDEO_FRAMERATE as i64) as u32,
            crf: self.get_i64(conn, "video_crf", DEFAULT_VIDEO_CRF as i64) as u32,
            max_width: None,
        }
    }

    pub fn job_retention_days(&self, conn: &Connection) -> i64 {
        self.get_i64(conn, "job_retention_days", DEFAULT_JOB_RETENTION_DAYS)
    }

    pub fn timelapse_retention_days(&self, conn: &Connection) -> i64 {
        self.get_i64(conn, "timelapse_retention_days", DEFAULT_TIMELAPSE_RETENTION_DAYS)
    }
}

// ----- Typed configuration structs -----

/// Corruption scoring thresholds and combination weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorruptionConfig {
    /// Score at or above which a frame is flagged as corrupted.
    pub corruption_threshold: f64,
    /// Score at or above which a frame is discarded outright.
    pub auto_discard_threshold: f64,
    pub fast_weight: f64,
    pub heavy_weight: f64,
}

impl Default for CorruptionConfig {
    fn default() -> Self {
        Self {
            corruption_threshold: DEFAULT_CORRUPTION_THRESHOLD,
            auto_discard_threshold: DEFAULT_AUTO_DISCARD_THRESHOLD,
            fast_weight: DEFAULT_FAST_WEIGHT,
            heavy_weight: DEFAULT_HEAVY_WEIGHT,
        }
    }
}

/// Video automation engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoAutomationConfig {
    pub max_concurrent_jobs: i64,
    pub per_capture_throttle_minutes: i64,
}

impl Default for VideoAutomationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_VIDEO_JOBS,
            per_capture_throttle_minutes: DEFAULT_PER_CAPTURE_THROTTLE_MINUTES,
        }
    }
}

/// Fully resolved video generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoGenerationSettings {
    pub framerate: u32,
    pub crf: u32,
    pub max_width: Option<u32>,
}

impl Default for VideoGenerationSettings {
    fn default() -> Self {
        Self {
            framerate: DEFAULT_VIDEO_FRAMERATE,
            crf: DEFAULT_VIDEO_CRF,
            max_width: None,
        }
    }
}

/// A partial settings layer. Every field is optional; absent fields
/// inherit from the layer below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoGenerationOverrides {
    pub framerate: Option<u32>,
    pub crf: Option<u32>,
    pub max_width: Option<u32>,
}

impl VideoGenerationOverrides {
    pub fn from_json(json: &str) -> Option<Self> {
        serde_json::from_str(json).ok()
    }
}

impl VideoGenerationSettings {
    /// Resolve the inheritance chain: defaults < camera < timelapse < job.
    pub fn resolve(
        defaults: &VideoGenerationSettings,
        camera: Option<&VideoGenerationOverrides>,
        timelapse: Option<&VideoGenerationOverrides>,
        job: Option<&VideoGenerationOverrides>,
    ) -> VideoGenerationSettings {
        let mut resolved = defaults.clone();
        for layer in [camera, timelapse, job].into_iter().flatten() {
            if let Some(framerate) = layer.framerate {
                resolved.framerate = framerate;
            }
            if let Some(crf) = layer.crf {
                resolved.crf = crf;
            }
            if let Some(max_width) = layer.max_width {
                resolved.max_width = Some(max_width);
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_accepted_forms() {
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("1"));
        assert!(parse_bool("yes"));
        assert!(parse_bool("Yes "));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("no"));
        assert!(!parse_bool(""));
        assert!(!parse_bool("on"));
    }

    #[test]
    fn test_video_settings_inheritance_order() {
        let defaults = VideoGenerationSettings { framerate: 30, crf: 23, max_width: None };
        let camera = VideoGenerationOverrides { framerate: Some(24), crf: None, max_width: Some(1920) };
        let timelapse = VideoGenerationOverrides { framerate: None, crf: Some(18), max_width: None };
        let job = VideoGenerationOverrides { framerate: Some(60), crf: None, max_width: None };

        let resolved = VideoGenerationSettings::resolve(
            &defaults,
            Some(&camera),
            Some(&timelapse),
            Some(&job),
        );

        // Job wins for framerate, timelapse for crf, camera for max_width
        assert_eq!(resolved.framerate, 60);
        assert_eq!(resolved.crf, 18);
        assert_eq!(resolved.max_width, Some(1920));
    }

    #[test]
    fn test_video_settings_inherit_when_layers_absent() {
        let defaults = VideoGenerationSettings::default();
        let resolved = VideoGenerationSettings::resolve(&defaults, None, None, None);
        assert_eq!(resolved, defaults);
    }

    #[test]
    fn test_settings_read_through_defaults() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        crate::db::migrations::run_migrations(&conn).unwrap();
        let settings = Settings::new();

        assert!(settings.thumbnail_generation_enabled(&conn));
        settings.set(&conn, "thumbnail_generation_enabled", "false").unwrap();
        assert!(!settings.thumbnail_generation_enabled(&conn));

        assert_eq!(settings.timezone(&conn), chrono_tz::UTC);
        settings.set(&conn, "timezone", "America/Chicago").unwrap();
        assert_eq!(settings.timezone(&conn), chrono_tz::America::Chicago);
    }
}
