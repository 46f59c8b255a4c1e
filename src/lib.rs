// LapseCam - Library Entry Point

pub mod capture;
pub mod constants;
pub mod corruption;
pub mod db;
pub mod error;
pub mod events;
pub mod jobs;
pub mod preview;
pub mod retention;
pub mod settings;
pub mod stats;
pub mod timelapses;
pub mod tools;
pub mod video;
pub mod weather;
pub mod workflow;

pub use error::{LapseError, Result};
