// Job runner - executes thumbnail/overlay jobs from the queue

use std::path::Path;
use std::time::Instant;

use rusqlite::Connection;

use crate::db::schema;
use crate::error::{LapseError, Result};
use crate::preview::{self, overlay, thumb};
use crate::constants::SMALL_MAX_WIDTH;
use super::thumbnail::{self, ThumbnailJob};

/// Claim and run one job from the thumbnail queue. Returns false when the
/// queue had nothing eligible.
pub fn run_next_job(conn: &Connection, library_root: &Path) -> Result<bool> {
    // First reclaim any expired claims from crashed workers
    let reclaimed = thumbnail::reclaim_expired(conn)?;
    if reclaimed > 0 {
        log::warn!("Reclaimed {} expired thumbnail jobs", reclaimed);
    }

    let job = match thumbnail::get_next_job(conn)? {
        Some(j) => j,
        None => return Ok(false), // No jobs available
    };

    let run_token = job.run_token.clone().unwrap_or_default();
    let started = Instant::now();

    log::info!("Running thumbnail job {} (type: {})", job.id, job.job_type);

    // Orphaned job: the target image was deleted after queueing. Cancel
    // and move on; this is routine, not an error.
    let image = match thumbnail::target_image(conn, &job)? {
        Some(image) => image,
        None => {
            thumbnail::cancel_job(conn, job.id)?;
            log::info!("Job {} cancelled: image {} no longer exists", job.id, job.image_id);
            return Ok(true);
        }
    };

    let result = match job.job_type.as_str() {
        "thumbnail" => run_thumbnail_job(conn, &image, library_root),
        "overlay" => run_overlay_job(&image, library_root),
        other => Err(LapseError::Other(format!("Unknown job type: {}", other))),
    };

    let elapsed_ms = started.elapsed().as_millis() as i64;
    match result {
        Ok(_) => {
            thumbnail::complete_job(conn, job.id, &run_token, elapsed_ms)?;
            log::info!("Job {} completed in {}ms", job.id, elapsed_ms);
        }
        Err(e) => {
            thumbnail::fail_job(conn, job.id, &run_token, &e.to_string())?;
            log::error!("Job {} failed: {}", job.id, e);
        }
    }

    Ok(true)
}

/// Run all eligible jobs until the queue drains.
pub fn run_all_jobs(conn: &Connection, library_root: &Path) -> Result<usize> {
    let mut count = 0;
    while run_next_job(conn, library_root)? {
        count += 1;
    }
    Ok(count)
}

/// Generate the grid and small thumbnails for an image and record them.
fn run_thumbnail_job(conn: &Connection, image: &schema::Image, library_root: &Path) -> Result<()> {
    let source = preview::source_frame_path(library_root, image)?;

    let thumb_rel = preview::thumb_rel_path(image);
    let small_rel = preview::small_rel_path(image);

    thumb::generate_thumbnail(&source, &library_root.join(&thumb_rel), &thumb::ThumbOptions::default())?;
    thumb::generate_thumbnail(
        &source,
        &library_root.join(&small_rel),
        &thumb::ThumbOptions::with_max_width(SMALL_MAX_WIDTH),
    )?;

    // Denormalized counters only move when an artifact first appears;
    // a retried job that overwrites existing files doesn't double-count.
    let newly_thumbed = image.thumbnail_path.is_none();
    let newly_smalled = image.small_path.is_none();

    schema::update_image_artifacts(
        conn,
        image.id,
        Some(&thumb_rel.to_string_lossy()),
        Some(&small_rel.to_string_lossy()),
    )?;
    if newly_thumbed || newly_smalled {
        schema::increment_thumbnail_counts(conn, image.timelapse_id, newly_thumbed, newly_smalled)?;
    }

    Ok(())
}

/// Render the caption overlay for an image.
fn run_overlay_job(image: &schema::Image, library_root: &Path) -> Result<()> {
    let source = preview::source_frame_path(library_root, image)?;
    let overlay_rel = preview::overlay_rel_path(image);
    let caption = overlay::build_caption(image);
    overlay::render_overlay(&source, &library_root.join(&overlay_rel), &caption)
}
