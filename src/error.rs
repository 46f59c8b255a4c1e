// LapseCam Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LapseError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Camera not found: {0}")]
    CameraNotFound(i64),

    #[error("Timelapse not found: {0}")]
    TimelapseNotFound(i64),

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("FFmpeg error: {0}")]
    FFmpeg(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for LapseError {
    fn from(err: anyhow::Error) -> Self {
        LapseError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LapseError>;
