use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by the correlation engine and the matrix file layer.
///
/// Cells with fewer than two jointly valid observations, or with zero
/// restricted variance, are not errors: they are written as `0.0`.
#[derive(Debug, Error)]
pub enum PccError {
    #[error("cannot allocate {rows}x{cols} buffer for {what}")]
    Allocation {
        what: &'static str,
        rows: usize,
        cols: usize,
    },

    #[error("shape mismatch: {what} is {actual_rows}x{actual_cols}, expected {expected}")]
    ShapeMismatch {
        what: &'static str,
        actual_rows: usize,
        actual_cols: usize,
        expected: String,
    },

    #[error("{}:{line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PccError {
    /// Numeric status for hosts that cannot consume a Rust error.
    /// Zero is never returned; it stands for success on the host side.
    pub fn code(&self) -> i32 {
        match self {
            PccError::Allocation { .. } => 1,
            PccError::ShapeMismatch { .. } => 2,
            PccError::Parse { .. } => 3,
            PccError::Io { .. } => 4,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PccError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        PccError::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}
