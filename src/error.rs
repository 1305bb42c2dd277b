use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by the persistence gateway, as seen by the controller.
///
/// None of these reach the shell directly; the controller turns them into
/// session flags and events.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("cannot list directory {}: {source}", .path.display())]
    Scan { path: PathBuf, source: io::Error },

    #[error("cannot read entry {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("cannot write entry {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("no journal directory selected")]
    NoDirectory,
}

pub type Result<T> = std::result::Result<T, JournalError>;
