// Database module

pub mod migrations;
pub mod schema;

use rusqlite::Connection;
use std::path::Path;
use anyhow::Result;

use crate::constants::{DB_FILENAME, LAPSECAM_FOLDER};

/// Open or create a database at the given path
pub fn open_db(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;

    // Enable foreign keys (must be done per connection)
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    // Enable WAL mode for better concurrency
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;

    // Worker threads share the file; wait instead of failing on a write lock
    conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

    // Run migrations
    migrations::run_migrations(&conn)?;

    Ok(conn)
}

/// Open the database for a library root
pub fn open_library_db(library_root: &Path) -> Result<Connection> {
    open_db(&get_db_path(library_root))
}

/// Get the database path for a library root
pub fn get_db_path(library_root: &Path) -> std::path::PathBuf {
    library_root.join(LAPSECAM_FOLDER).join(DB_FILENAME)
}

/// Initialize library folder structure
pub fn init_library_folders(library_root: &Path) -> Result<()> {
    use crate::constants::*;

    std::fs::create_dir_all(library_root.join(LAPSECAM_FOLDER))?;
    std::fs::create_dir_all(library_root.join(FRAMES_FOLDER))?;
    std::fs::create_dir_all(library_root.join(THUMBS_FOLDER))?;
    std::fs::create_dir_all(library_root.join(OVERLAYS_FOLDER))?;
    std::fs::create_dir_all(library_root.join(VIDEOS_FOLDER))?;

    Ok(())
}
