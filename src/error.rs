//! Custom error types for the recorder.
//!
//! This module defines the primary error type, `RecorderError`, for the whole
//! pipeline. Every failure the fetchers, the writer or the recorder loop can
//! hit is one of its variants, and [`RecorderError::disposition`] tells the
//! recorder loop what to do about it.
//!
//! ## Error Hierarchy
//!
//! - **`Device`**: A driver call failed. Carries the translated device code.
//!   The session is torn down and re-established.
//! - **`DiskFull`**: The recording volume crossed the disk-full threshold when
//!   a file had to be opened. The page is dropped; draining continues.
//! - **`MalformedPage`**: A fetched page header is corrupt or undersized.
//! - **`MalformedRecord`**: A vendor metadata record reported by the device is
//!   inconsistent. Treated like a device fault.
//! - **`FileOpen`** / **`CreateDirectory`** / **`Io`**: Local filesystem faults.
//! - **`Config`**: Wraps errors from `figment` while loading configuration.
//! - **`Configuration`**: Semantic errors caught during validation.

use crate::device::DeviceError;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the recorder error type.
pub type RecorderResult<T> = std::result::Result<T, RecorderError>;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Disk full: recording volume at {percent}% (threshold {threshold}%)")]
    DiskFull { percent: u32, threshold: u32 },

    #[error("Malformed page: {0}")]
    MalformedPage(String),

    #[error("Malformed metadata record: {0}")]
    MalformedRecord(String),

    #[error("Failed to open recording file {path}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl From<figment::Error> for RecorderError {
    fn from(err: figment::Error) -> Self {
        RecorderError::Config(Box::new(err))
    }
}

/// What the recorder loop does with a failed iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Disconnect, reconnect, reset every fetcher cursor, continue.
    Reconnect,
    /// Discard the page in hand and keep draining the device.
    DropPage,
    /// Terminate the recording session.
    Fatal,
}

impl RecorderError {
    /// Recoverable vs. fatal classification of this error.
    pub fn disposition(&self) -> Disposition {
        match self {
            RecorderError::Device(_) | RecorderError::MalformedRecord(_) => Disposition::Reconnect,
            RecorderError::DiskFull { .. } => Disposition::DropPage,
            RecorderError::MalformedPage(_)
            | RecorderError::FileOpen { .. }
            | RecorderError::CreateDirectory { .. }
            | RecorderError::Io(_)
            | RecorderError::Config(_)
            | RecorderError::Configuration(_) => Disposition::Fatal,
        }
    }
}
