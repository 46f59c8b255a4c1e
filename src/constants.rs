// LapseCam Constants
// Capture, scoring, and job tuning values. Changing a scoring constant
// changes flag/discard behavior for every camera, so bump carefully.

// Paths
pub const LAPSECAM_FOLDER: &str = ".lapsecam";
pub const DB_FILENAME: &str = "lapsecam.db";
pub const FRAMES_FOLDER: &str = "frames";
pub const THUMBS_FOLDER: &str = "thumbs";
pub const OVERLAYS_FOLDER: &str = "overlays";
pub const VIDEOS_FOLDER: &str = "videos";

// Capture
pub const DEFAULT_CAPTURE_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_RTSP_TRANSPORT: &str = "tcp";
pub const CAPTURE_JPEG_QSCALE: u32 = 2;
pub const MIN_CAPTURE_INTERVAL_SECONDS: i64 = 30;
pub const MAX_CAPTURE_INTERVAL_SECONDS: i64 = 86_400;

// ----- Corruption Scoring -----

// Fast checks: 25 points per failed check, score clamped to 100.
pub const FAST_CHECK_PENALTY: f64 = 25.0;
// Heavy checks: 20 points per failed check, score clamped to 100.
pub const HEAVY_CHECK_PENALTY: f64 = 20.0;
pub const SCORE_MAX: f64 = 100.0;

// Combination weights when the heavy path ran
pub const DEFAULT_FAST_WEIGHT: f64 = 0.7;
pub const DEFAULT_HEAVY_WEIGHT: f64 = 0.3;

// Decision thresholds (independently configurable via settings)
pub const DEFAULT_CORRUPTION_THRESHOLD: f64 = 50.0;
pub const DEFAULT_AUTO_DISCARD_THRESHOLD: f64 = 75.0;

// Fast check bounds
pub const FAST_MIN_FILE_BYTES: u64 = 1_024;
pub const FAST_MAX_FILE_BYTES: u64 = 50 * 1_024 * 1_024;
pub const FAST_MIN_DIMENSION: u32 = 64;
pub const FAST_MAX_DIMENSION: u32 = 10_000;
pub const FAST_MIN_BRIGHTNESS: f64 = 10.0;
pub const FAST_MAX_BRIGHTNESS: f64 = 245.0;
pub const FAST_MIN_CONTRAST_STDDEV: f64 = 8.0;
pub const FAST_MAX_NOISE_RATIO: f64 = 5.0;

// Heavy check floors
pub const HEAVY_MIN_LAPLACIAN_VARIANCE: f64 = 100.0;
pub const HEAVY_MIN_EDGE_DENSITY: f64 = 0.01;
pub const HEAVY_EDGE_GRADIENT_THRESHOLD: f64 = 40.0;
pub const HEAVY_MIN_COLOR_VARIANCE: f64 = 4.0;
pub const HEAVY_MIN_HISTOGRAM_PEAKS: usize = 2;
pub const HEAVY_MIN_SATURATION: f64 = 0.03;

// ----- Stable Check Tokens -----
// Machine-parseable names recorded in failed_checks and the audit log.

pub const C_IMAGE_LOAD: &str = "image_load";
pub const C_FILE_SIZE: &str = "file_size";
pub const C_DIMENSIONS: &str = "dimensions";
pub const C_BRIGHTNESS: &str = "brightness";
pub const C_CONTRAST: &str = "contrast";
pub const C_NOISE: &str = "noise";
pub const C_BLUR: &str = "blur";
pub const C_EDGE_DENSITY: &str = "edge_density";
pub const C_COLOR_VARIANCE: &str = "color_variance";
pub const C_HISTOGRAM: &str = "histogram";
pub const C_SATURATION: &str = "saturation";

// ----- Job Queue -----

pub const JOB_MAX_RETRIES: i64 = 3;
pub const JOB_BASE_BACKOFF_MINUTES: i64 = 1;
pub const JOB_LEASE_DURATION_SECONDS: i64 = 300; // 5 minutes
pub const WORKER_POLL_INTERVAL_SECS: u64 = 5;

// ----- Video Automation -----

pub const DEFAULT_MAX_CONCURRENT_VIDEO_JOBS: i64 = 3;
pub const DEFAULT_PER_CAPTURE_THROTTLE_MINUTES: i64 = 5;
pub const DEFAULT_VIDEO_FRAMERATE: u32 = 30;
pub const DEFAULT_VIDEO_CRF: u32 = 23;

// ----- Thumbnails -----

pub const THUMB_MAX_WIDTH: u32 = 480;
pub const SMALL_MAX_WIDTH: u32 = 160;
pub const THUMB_JPEG_QUALITY: u8 = 85;

// ----- Retention -----

pub const DEFAULT_JOB_RETENTION_DAYS: i64 = 7;
pub const DEFAULT_TIMELAPSE_RETENTION_DAYS: i64 = 90;

// ----- Events -----

pub const EVENT_IMAGE_CAPTURED: &str = "image_captured";
pub const EVENT_CAPTURE_FAILED: &str = "capture_failed";
pub const EVENT_SOURCE_WORKFLOW: &str = "capture_workflow";
