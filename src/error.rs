use std::{io, path::PathBuf, process::ExitStatus, time::Duration};

use thiserror::Error;

use crate::ScreenPoint;

/// Failures while grabbing pixels from the screen.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("No display available: {0}")]
    NoDisplay(String),

    #[error("Capture region around {anchor} lies outside the screen")]
    EmptyRegion { anchor: ScreenPoint },

    #[error("Screen capture failed: {0}")]
    Backend(String),
}

/// Failures while invoking the OCR engine or reading its output.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine `{command}` could not be started: {source}")]
    EngineMissing {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("OCR language data directory does not exist: {}", .0.display())]
    DataPathMissing(PathBuf),

    #[error("OCR engine exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },

    #[error("OCR engine did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Malformed OCR output at line {line}: {reason}")]
    MalformedOutput { line: usize, reason: String },

    #[error("Failed to encode image for OCR: {0}")]
    Encode(#[from] image::ImageError),

    #[error("OCR I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Everything that can keep a request from producing a usable result set.
#[derive(Debug, Error)]
pub enum LocateError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error("Request {requested} was superseded by request {current}")]
    Superseded { requested: u64, current: u64 },

    #[error("OCR worker is no longer running")]
    WorkerStopped,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
