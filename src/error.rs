use std::path::{Path, PathBuf};

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SpliceError>;

/// Broad failure classes, each mapped to one process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad invocation, caught before any file is touched.
    Usage,
    /// Target and source do not describe the same binning.
    Validation,
    /// Open/read/write/close failure, or an unreadable table.
    Io,
}

impl ErrorCategory {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorCategory::Usage => 2,
            ErrorCategory::Validation => 3,
            ErrorCategory::Io => 4,
        }
    }
}

#[derive(Debug, Error)]
pub enum SpliceError {
    #[error("invalid wavelength window: low ({low}) must be strictly less than high ({high})")]
    InvalidWindow { low: f64, high: f64 },

    #[error("target and source differ in {what}: target has {target}, source has {source_value}")]
    ShapeMismatch {
        what: &'static str,
        target: usize,
        source_value: usize,
    },

    #[error("target and source differ in '{column}' at row {row}, channel {channel}: {target} != {source_value}")]
    ColumnMismatch {
        column: &'static str,
        row: usize,
        channel: usize,
        target: f64,
        source_value: f64,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: {message}", path.display())]
    Format { path: PathBuf, message: String },
}

impl SpliceError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        SpliceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn format(path: &Path, message: impl Into<String>) -> Self {
        SpliceError::Format {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// Fold an `anyhow` chain from the loaders into a format error,
    /// keeping every context layer in the message.
    pub fn from_loader(path: &Path, err: anyhow::Error) -> Self {
        SpliceError::format(path, format!("{err:#}"))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            SpliceError::InvalidWindow { .. } => ErrorCategory::Usage,
            SpliceError::ShapeMismatch { .. } | SpliceError::ColumnMismatch { .. } => {
                ErrorCategory::Validation
            }
            SpliceError::Io { .. } | SpliceError::Format { .. } => ErrorCategory::Io,
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.category().exit_code()
    }
}
