//! Error types for indexlib.
//!
//! All fallible operations return [`Result`], whose error type is
//! [`IndexlibError`]. Variants follow the error taxonomy of the engine:
//! configuration problems (`Schema`, `BadParameter`) are never retried,
//! I/O failures carry the offending path, and `IndexCollapsed` signals that
//! on-disk data is inconsistent and needs operator attention.
//!
//! # Examples
//!
//! ```
//! use indexlib::error::{IndexlibError, Result};
//!
//! fn check_thread_num(n: usize) -> Result<()> {
//!     if n == 0 {
//!         return Err(IndexlibError::bad_parameter("thread_num must be positive"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_thread_num(0).is_err());
//! ```

use std::io;

use thiserror::Error;

/// The main error type for indexlib operations.
#[derive(Error, Debug)]
pub enum IndexlibError {
    /// I/O errors raised by the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// I/O errors tied to a concrete file.
    #[error("File I/O error on [{path}]: {reason}")]
    FileIo { path: String, reason: String },

    /// Storage backend errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Schema errors (invalid attribute/index configuration).
    #[error("Schema error: {0}")]
    Schema(String),

    /// Invalid parameters passed to a component.
    #[error("Bad parameter: {0}")]
    BadParameter(String),

    /// On-disk data is corrupt or inconsistent.
    #[error("Index collapsed: {0}")]
    IndexCollapsed(String),

    /// The requested operation is not supported by this component.
    #[error("Unsupported: {0}")]
    UnSupported(String),

    /// A component was used in the wrong state.
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    /// A value was out of the accepted range.
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// A file or object that should exist does not.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Thread join errors.
    #[error("Thread join error: {0}")]
    ThreadJoin(String),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error.
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with IndexlibError.
pub type Result<T> = std::result::Result<T, IndexlibError>;

impl IndexlibError {
    /// Create a new file I/O error.
    pub fn file_io<P: Into<String>, S: Into<String>>(path: P, reason: S) -> Self {
        IndexlibError::FileIo {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        IndexlibError::Storage(msg.into())
    }

    /// Create a new schema error.
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        IndexlibError::Schema(msg.into())
    }

    /// Create a new bad parameter error.
    pub fn bad_parameter<S: Into<String>>(msg: S) -> Self {
        IndexlibError::BadParameter(msg.into())
    }

    /// Create a new index collapsed error.
    pub fn index_collapsed<S: Into<String>>(msg: S) -> Self {
        IndexlibError::IndexCollapsed(msg.into())
    }

    /// Create a new unsupported error.
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        IndexlibError::UnSupported(msg.into())
    }

    /// Create a new inconsistent state error.
    pub fn inconsistent_state<S: Into<String>>(msg: S) -> Self {
        IndexlibError::InconsistentState(msg.into())
    }

    /// Create a new out of range error.
    pub fn out_of_range<S: Into<String>>(msg: S) -> Self {
        IndexlibError::OutOfRange(msg.into())
    }

    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        IndexlibError::NotFound(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        IndexlibError::Other(msg.into())
    }

    /// Whether the error denotes corrupt on-disk data.
    pub fn is_index_collapsed(&self) -> bool {
        matches!(self, IndexlibError::IndexCollapsed(_))
    }

    /// Whether the error is a file-not-found condition.
    pub fn is_not_found(&self) -> bool {
        match self {
            IndexlibError::NotFound(_) => true,
            IndexlibError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
