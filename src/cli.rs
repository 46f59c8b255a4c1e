// LapseCam CLI binary

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use lapsecam::capture::{FrameCapture, RtspCapture};
use lapsecam::db::{self, schema};
use lapsecam::events::LogEventSink;
use lapsecam::jobs::coordinator::JobCoordinator;
use lapsecam::jobs::{runner, worker, JobPriority, JobScope};
use lapsecam::settings::Settings;
use lapsecam::video::automation::VideoAutomationEngine;
use lapsecam::weather::SettingsWeather;
use lapsecam::workflow::WorkflowOrchestrator;
use lapsecam::{retention, stats, timelapses};

#[derive(Parser)]
#[command(name = "lapsecam")]
#[command(about = "RTSP camera timelapse capture, scoring, and assembly", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new timelapse library
    Init {
        /// Library root path
        path: PathBuf,
    },

    /// Register a camera
    AddCamera {
        /// Camera name
        name: String,
        /// RTSP stream URL
        url: String,
        /// Enable CPU-intensive corruption checks for this camera
        #[arg(long)]
        heavy_checks: bool,
        /// Library root (defaults to current directory)
        #[arg(short, long)]
        library: Option<PathBuf>,
    },

    /// List cameras and their capture health
    Cameras {
        #[arg(short, long)]
        library: Option<PathBuf>,
    },

    /// Start a new timelapse for a camera
    Start {
        /// Camera ID
        camera_id: i64,
        /// Timelapse name
        #[arg(short, long)]
        name: Option<String>,
        /// Capture interval in seconds (clamped to 30-86400)
        #[arg(short, long, default_value = "300")]
        interval: i64,
        #[arg(short, long)]
        library: Option<PathBuf>,
    },

    /// Pause a running timelapse
    Pause {
        timelapse_id: i64,
        #[arg(short, long)]
        library: Option<PathBuf>,
    },

    /// Resume a paused timelapse
    Resume {
        timelapse_id: i64,
        #[arg(short, long)]
        library: Option<PathBuf>,
    },

    /// Complete a timelapse
    Complete {
        timelapse_id: i64,
        #[arg(short, long)]
        library: Option<PathBuf>,
    },

    /// Run one capture for a camera's active timelapse
    Capture {
        camera_id: i64,
        #[arg(short, long)]
        library: Option<PathBuf>,
    },

    /// Probe a camera's RTSP stream
    TestConnection {
        camera_id: i64,
        #[arg(short, long)]
        library: Option<PathBuf>,
    },

    /// Run the background job worker in the foreground
    Worker {
        #[arg(short, long)]
        library: Option<PathBuf>,
    },

    /// Run one video automation cycle
    Automate {
        #[arg(short, long)]
        library: Option<PathBuf>,
    },

    /// Queue a manual video generation job
    GenerateVideo {
        timelapse_id: i64,
        #[arg(short, long)]
        library: Option<PathBuf>,
    },

    /// Show or cancel queued jobs
    Jobs {
        /// Cancel all pending/processing jobs for a timelapse
        #[arg(long)]
        cancel_timelapse: Option<i64>,
        /// Run pending thumbnail jobs now
        #[arg(long)]
        run: bool,
        #[arg(short, long)]
        library: Option<PathBuf>,
    },

    /// Show capture and queue statistics
    Stats {
        #[arg(short, long)]
        library: Option<PathBuf>,
    },

    /// Run retention cleanup
    Cleanup {
        #[arg(short, long)]
        library: Option<PathBuf>,
    },

    /// Get or set a settings key
    Config {
        key: String,
        value: Option<String>,
        #[arg(short, long)]
        library: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path } => cmd_init(path),
        Commands::AddCamera {
            name,
            url,
            heavy_checks,
            library,
        } => cmd_add_camera(name, url, heavy_checks, library),
        Commands::Cameras { library } => cmd_cameras(library),
        Commands::Start {
            camera_id,
            name,
            interval,
            library,
        } => cmd_start(camera_id, name, interval, library),
        Commands::Pause { timelapse_id, library } => cmd_pause(timelapse_id, library),
        Commands::Resume { timelapse_id, library } => cmd_resume(timelapse_id, library),
        Commands::Complete { timelapse_id, library } => cmd_complete(timelapse_id, library),
        Commands::Capture { camera_id, library } => cmd_capture(camera_id, library),
        Commands::TestConnection { camera_id, library } => cmd_test_connection(camera_id, library),
        Commands::Worker { library } => cmd_worker(library),
        Commands::Automate { library } => cmd_automate(library),
        Commands::GenerateVideo { timelapse_id, library } => cmd_generate_video(timelapse_id, library),
        Commands::Jobs {
            cancel_timelapse,
            run,
            library,
        } => cmd_jobs(cancel_timelapse, run, library),
        Commands::Stats { library } => cmd_stats(library),
        Commands::Cleanup { library } => cmd_cleanup(library),
        Commands::Config { key, value, library } => cmd_config(key, value, library),
    }
}

/// Resolve the library root: explicit flag or current directory.
fn resolve_library_root(library: Option<PathBuf>) -> Result<PathBuf> {
    let root = match library {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let root = root.canonicalize().unwrap_or(root);
    if !db::get_db_path(&root).exists() {
        anyhow::bail!(
            "No timelapse library at {} (run `lapsecam init` first)",
            root.display()
        );
    }
    Ok(root)
}

fn open(library: Option<PathBuf>) -> Result<(PathBuf, rusqlite::Connection)> {
    let root = resolve_library_root(library)?;
    let conn = db::open_library_db(&root)?;
    Ok((root, conn))
}

fn build_orchestrator() -> WorkflowOrchestrator {
    WorkflowOrchestrator::new(
        Box::new(RtspCapture::new()),
        JobCoordinator::new(Settings::new()),
        Arc::new(LogEventSink),
        Box::new(SettingsWeather),
        Settings::new(),
    )
}

fn cmd_init(path: PathBuf) -> Result<()> {
    let library_root = path.canonicalize().unwrap_or(path.clone());

    let db_path = db::get_db_path(&library_root);
    if db_path.exists() {
        anyhow::bail!("Library already exists at {}", library_root.display());
    }

    db::init_library_folders(&library_root)?;
    db::open_db(&db_path)?;

    println!("Initialized timelapse library at {}", library_root.display());
    println!("Structure created:");
    println!("  .lapsecam/lapsecam.db - Database");
    println!("  frames/               - Captured frames");
    println!("  thumbs/               - Thumbnails");
    println!("  overlays/             - Caption overlays");
    println!("  videos/               - Assembled timelapses");

    Ok(())
}

fn cmd_add_camera(name: String, url: String, heavy_checks: bool, library: Option<PathBuf>) -> Result<()> {
    let (_, conn) = open(library)?;

    let id = schema::insert_camera(
        &conn,
        &schema::NewCamera {
            name: name.clone(),
            rtsp_url: url,
            heavy_checks_enabled: heavy_checks,
        },
    )?;

    println!("Added camera {} '{}'", id, name);
    Ok(())
}

fn cmd_cameras(library: Option<PathBuf>) -> Result<()> {
    let (_, conn) = open(library)?;

    let all = stats::camera_stats(&conn)?;
    if all.is_empty() {
        println!("No cameras registered");
        return Ok(());
    }
    for cam in all {
        let health = if cam.last_capture_success {
            "ok".to_string()
        } else {
            format!("failing ({} in a row)", cam.consecutive_failures)
        };
        println!(
            "{:>4}  {:<20} {:>6} images  {:>4} flagged  last: {}  [{}]",
            cam.camera_id,
            cam.name,
            cam.image_count,
            cam.flagged_count,
            cam.last_capture_at.as_deref().unwrap_or("never"),
            health,
        );
    }
    Ok(())
}

fn cmd_start(camera_id: i64, name: Option<String>, interval: i64, library: Option<PathBuf>) -> Result<()> {
    let (_, conn) = open(library)?;
    let settings = Settings::new();

    let camera = schema::get_camera(&conn, camera_id)?
        .ok_or_else(|| anyhow::anyhow!("Camera {} not found", camera_id))?;
    let name = name.unwrap_or_else(|| format!("{} timelapse", camera.name));

    let tz = settings.timezone(&conn);
    let timelapse = timelapses::start_new_timelapse(&conn, camera_id, &name, interval, tz)?;

    println!(
        "Started timelapse {} '{}' (every {}s, from {})",
        timelapse.id, timelapse.name, timelapse.capture_interval_seconds, timelapse.start_date
    );
    Ok(())
}

fn cmd_pause(timelapse_id: i64, library: Option<PathBuf>) -> Result<()> {
    let (_, conn) = open(library)?;
    if timelapses::pause_timelapse(&conn, timelapse_id)? {
        println!("Paused timelapse {}", timelapse_id);
    } else {
        println!("Timelapse {} was not running", timelapse_id);
    }
    Ok(())
}

fn cmd_resume(timelapse_id: i64, library: Option<PathBuf>) -> Result<()> {
    let (_, conn) = open(library)?;
    if timelapses::resume_timelapse(&conn, timelapse_id)? {
        println!("Resumed timelapse {}", timelapse_id);
    } else {
        println!("Timelapse {} was not paused", timelapse_id);
    }
    Ok(())
}

fn cmd_complete(timelapse_id: i64, library: Option<PathBuf>) -> Result<()> {
    let (_, conn) = open(library)?;
    if timelapses::complete_timelapse(&conn, timelapse_id)? {
        println!("Completed timelapse {}", timelapse_id);
    } else {
        println!("Timelapse {} was already completed", timelapse_id);
    }
    Ok(())
}

fn cmd_capture(camera_id: i64, library: Option<PathBuf>) -> Result<()> {
    let (root, conn) = open(library)?;

    let camera = schema::get_camera(&conn, camera_id)?
        .ok_or_else(|| anyhow::anyhow!("Camera {} not found", camera_id))?;
    let timelapse_id = camera
        .active_timelapse_id
        .ok_or_else(|| anyhow::anyhow!("Camera {} has no active timelapse", camera_id))?;

    let orchestrator = build_orchestrator();
    let result = orchestrator.execute_capture_workflow(&conn, &root, camera_id, timelapse_id, None);

    if result.success {
        println!(
            "Captured image {} -> {}",
            result.image_id.unwrap_or_default(),
            result.image_path.as_deref().unwrap_or("?")
        );
    } else {
        println!("Capture failed: {}", result.error.as_deref().unwrap_or("unknown"));
    }
    println!("{}", serde_json::to_string_pretty(&result.metadata)?);
    Ok(())
}

fn cmd_test_connection(camera_id: i64, library: Option<PathBuf>) -> Result<()> {
    let (_, conn) = open(library)?;

    let camera = schema::get_camera(&conn, camera_id)?
        .ok_or_else(|| anyhow::anyhow!("Camera {} not found", camera_id))?;

    let capture = RtspCapture::new();
    let test = capture.test_connection(&camera);

    if test.success {
        println!(
            "Connection ok ({} ms)",
            test.response_time_ms.unwrap_or_default()
        );
    } else {
        println!(
            "Connection failed: {}",
            test.error.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

fn cmd_worker(library: Option<PathBuf>) -> Result<()> {
    let (root, _) = open(library)?;

    println!("Worker polling {} (ctrl-c to stop)", root.display());
    let shutdown = Arc::new(AtomicBool::new(false));
    worker::worker_loop(&root, &shutdown);
    Ok(())
}

fn cmd_automate(library: Option<PathBuf>) -> Result<()> {
    let (root, conn) = open(library)?;

    let engine = VideoAutomationEngine::new(Settings::new());
    let report = engine.run_cycle(&conn, &root)?;

    println!(
        "Automation cycle: {} reclaimed, {} milestone queued, {} scheduled queued, {} processed",
        report.reclaimed, report.milestone_jobs, report.scheduled_jobs, report.processed
    );
    Ok(())
}

fn cmd_generate_video(timelapse_id: i64, library: Option<PathBuf>) -> Result<()> {
    let (_, conn) = open(library)?;

    let coordinator = JobCoordinator::new(Settings::new());
    let result = coordinator.coordinate_video_job(&conn, timelapse_id, None, JobPriority::High, "manual");

    if result.success {
        println!(
            "Queued video job {} via {}",
            result.job_id.unwrap_or_default(),
            result.method
        );
    } else {
        println!(
            "Could not queue video job: {}",
            result.error.or(result.reason).unwrap_or_default()
        );
    }
    Ok(())
}

fn cmd_jobs(cancel_timelapse: Option<i64>, run: bool, library: Option<PathBuf>) -> Result<()> {
    let (root, conn) = open(library)?;
    let coordinator = JobCoordinator::new(Settings::new());

    if let Some(timelapse_id) = cancel_timelapse {
        let scope = JobScope {
            timelapse_id: Some(timelapse_id),
            ..JobScope::default()
        };
        let report = coordinator.cancel_pending_jobs(&conn, &scope);
        println!(
            "Cancelled {} thumbnail jobs, {} video jobs",
            report.thumbnail_cancelled, report.video_cancelled
        );
        for error in &report.errors {
            println!("  warning: {}", error);
        }
        return Ok(());
    }

    if run {
        let count = runner::run_all_jobs(&conn, &root)?;
        println!("Processed {} jobs", count);
        return Ok(());
    }

    let report = coordinator.track_job_status(&conn, &JobScope::default())?;
    println!("Thumbnail queue:");
    for (status, count) in &report.thumbnail {
        println!("  {:<12} {}", status, count);
    }
    println!("Video queue:");
    for (status, count) in &report.video {
        println!("  {:<12} {}", status, count);
    }
    Ok(())
}

fn cmd_stats(library: Option<PathBuf>) -> Result<()> {
    let (_, conn) = open(library)?;

    println!("Cameras:");
    for cam in stats::camera_stats(&conn)? {
        println!(
            "  {:>4} {:<20} {:>6} images, {} flagged",
            cam.camera_id, cam.name, cam.image_count, cam.flagged_count
        );
    }

    println!("Timelapses:");
    for tl in stats::timelapse_stats(&conn, None)? {
        println!(
            "  {:>4} {:<20} [{}] {} images over {} days, {} glitches",
            tl.timelapse_id, tl.name, tl.status, tl.image_count, tl.day_span, tl.glitch_count
        );
    }

    let queues = stats::queue_stats(&conn)?;
    println!("Queues:");
    for (status, count) in &queues.thumbnail {
        println!("  thumbnail {:<12} {}", status, count);
    }
    for (status, count) in &queues.video {
        println!("  video     {:<12} {}", status, count);
    }
    Ok(())
}

fn cmd_cleanup(library: Option<PathBuf>) -> Result<()> {
    let (root, conn) = open(library)?;

    let report = retention::run_cleanup(&conn, &root, &Settings::new())?;
    println!(
        "Removed {} thumbnail jobs, {} video jobs, {} timelapses ({} images), {} orphan files",
        report.thumbnail_jobs_deleted,
        report.video_jobs_deleted,
        report.timelapses_deleted,
        report.images_deleted,
        report.orphan_files_removed
    );
    Ok(())
}

fn cmd_config(key: String, value: Option<String>, library: Option<PathBuf>) -> Result<()> {
    let (_, conn) = open(library)?;
    let settings = Settings::new();

    match value {
        Some(value) => {
            settings.set(&conn, &key, &value)?;
            println!("{} = {}", key, value);
        }
        None => match settings.get(&conn, &key)? {
            Some(value) => println!("{} = {}", key, value),
            None => println!("{} is not set", key),
        },
    }
    Ok(())
}
