// Background job worker -- polls the queues and processes work.
//
// The worker thread spawns once at process startup and runs until the
// shutdown flag flips. Each cycle it drains the thumbnail queue, then
// runs one video automation cycle (trigger evaluation + generation under
// the concurrency cap). Every job executes under catch_unwind so a
// panicking job can never kill the worker.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::constants::WORKER_POLL_INTERVAL_SECS;
use crate::settings::Settings;
use crate::video::automation::VideoAutomationEngine;

/// Spawn the background worker thread. Call once during startup.
pub fn spawn_worker(library_root: PathBuf, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("job-worker".into())
        .spawn(move || {
            worker_loop(&library_root, &shutdown);
        })
        .expect("Failed to spawn job worker thread")
}

/// Run the worker loop on the current thread until shutdown.
pub fn worker_loop(library_root: &Path, shutdown: &AtomicBool) {
    let engine = VideoAutomationEngine::new(Settings::new());

    while !shutdown.load(Ordering::Relaxed) {
        run_one_cycle(library_root, &engine);

        // Sleep in short slices so shutdown stays responsive
        for _ in 0..WORKER_POLL_INTERVAL_SECS {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            std::thread::sleep(Duration::from_secs(1));
        }
    }
}

/// One poll cycle: drain thumbnails, then run video automation.
/// Panics are caught per phase so the thread never dies.
fn run_one_cycle(library_root: &Path, engine: &VideoAutomationEngine) {
    // Open a short-lived DB connection per cycle
    let conn = match crate::db::open_library_db(library_root) {
        Ok(c) => c,
        Err(e) => {
            log::error!("Job worker: failed to open DB: {}", e);
            return;
        }
    };

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        super::runner::run_all_jobs(&conn, library_root)
    }));
    match result {
        Ok(Ok(count)) if count > 0 => log::info!("Job worker: processed {} thumbnail jobs", count),
        Ok(Ok(_)) => {}
        Ok(Err(e)) => log::error!("Job worker: thumbnail run failed: {}", e),
        Err(_) => log::error!("Job worker: thumbnail run panicked (recovered)"),
    }

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        engine.run_cycle(&conn, library_root)
    }));
    match result {
        Ok(Ok(report)) => {
            if report.milestone_jobs + report.scheduled_jobs + report.processed > 0 {
                log::info!(
                    "Job worker: automation queued {} milestone / {} scheduled, processed {}",
                    report.milestone_jobs,
                    report.scheduled_jobs,
                    report.processed
                );
            }
        }
        Ok(Err(e)) => log::error!("Job worker: automation cycle failed: {}", e),
        Err(_) => log::error!("Job worker: automation cycle panicked (recovered)"),
    }
}
