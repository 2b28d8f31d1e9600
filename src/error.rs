//! Error types for the fbdev backend
//!
//! Every fallible construction step returns a [`FbdevResult`], so a failure
//! part way through building an output or the backend unwinds whatever was
//! already acquired when the partially built values are dropped.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Main error type for fbdev backend operations
#[derive(Debug, thiserror::Error)]
pub enum FbdevError {
    /// The framebuffer device node could not be opened
    #[error("Failed to open frame buffer device '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A mode query or mode set ioctl failed
    #[error("Failed to {request} on '{}': {source}", path.display())]
    Ioctl {
        path: PathBuf,
        request: &'static str,
        #[source]
        source: io::Error,
    },

    /// The device reports a pixel layout we cannot drive
    #[error("Frame buffer '{}' uses an unsupported format", path.display())]
    UnsupportedFormat { path: PathBuf },

    /// The device reports a resolution no surface can have
    #[error("Frame buffer '{}' reports an unsupported mode {width}×{height}", path.display())]
    UnsupportedMode {
        path: PathBuf,
        width: u32,
        height: u32,
    },

    /// Mapping the device memory failed
    #[error("Failed to mmap frame buffer '{}': {source}", path.display())]
    Map {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The device memory is too small for the reported mode
    #[error(
        "Frame buffer '{}' is too small: {required} bytes needed, {available} mapped",
        path.display()
    )]
    BufferTooSmall {
        path: PathBuf,
        required: usize,
        available: usize,
    },

    /// Rasterizer state could not be created for an output
    #[error("Rendering error: {0}")]
    Render(String),

    /// The backend could not be brought up
    #[error("Backend error: {0}")]
    Backend(String),

    /// An output could not be rebuilt after its mode changed across a VT switch
    #[error("Failed to recreate output for '{}': {source}", path.display())]
    Recreate {
        path: PathBuf,
        #[source]
        source: Box<FbdevError>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FbdevError {
    pub(crate) fn open(path: &Path, source: io::Error) -> Self {
        Self::Open {
            path: path.to_owned(),
            source,
        }
    }

    pub(crate) fn ioctl(path: &Path, request: &'static str, source: io::Error) -> Self {
        Self::Ioctl {
            path: path.to_owned(),
            request,
            source,
        }
    }

    /// Whether this error means the device itself cannot be used.
    ///
    /// Open, ioctl and mmap failures fall in this class, and so does an
    /// unsupported pixel format: in every case output creation is abandoned.
    pub fn is_device_unavailable(&self) -> bool {
        match self {
            Self::Open { .. }
            | Self::Ioctl { .. }
            | Self::UnsupportedFormat { .. }
            | Self::UnsupportedMode { .. }
            | Self::Map { .. }
            | Self::BufferTooSmall { .. } => true,
            Self::Recreate { source, .. } => source.is_device_unavailable(),
            _ => false,
        }
    }
}

/// Result type alias for fbdev operations
pub type FbdevResult<T> = Result<T, FbdevError>;

/// Helper for operations that should log errors but not propagate them
pub fn log_error<T, E: fmt::Display>(result: Result<T, E>) -> Option<T> {
    match result {
        Ok(val) => Some(val),
        Err(err) => {
            tracing::error!("Operation failed: {err}");
            None
        }
    }
}
