//! Unified error handling for the helper-dispatch crate
//!
//! Domain modules keep their own error types ([`DispatchError`],
//! [`StoreError`]); this module folds them into one [`Error`] for code that
//! crosses module boundaries, such as the CLI and configuration loading.
//!
//! # Usage
//!
//! ```rust,ignore
//! use helper_dispatch::error::{Error, ErrorCategory};
//!
//! fn report(err: Error) {
//!     if err.is_recoverable() {
//!         eprintln!("temporary failure, try again: {err}");
//!     } else {
//!         eprintln!("{:?} error: {err}", err.category());
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::dispatch::error::DispatchError;
pub use crate::storage::StoreError;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller supplied bad input
    Validation,
    /// Requested booking or helper does not exist
    NotFound,
    /// Lost a race or hit a terminal booking
    Conflict,
    /// Store and I/O failures
    Storage,
    /// Configuration and startup errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the helper-dispatch crate
#[derive(Error, Debug)]
pub enum Error {
    /// Assignment, escalation and lifecycle errors
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Store backend errors raised outside the dispatch core
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Dispatch(e) => e.is_recoverable(),
            Self::Store(StoreError::Unavailable(_)) => true,
            Self::Store(_) => false,
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Dispatch(e) => match e {
                DispatchError::InvalidRequest { .. } => ErrorCategory::Validation,
                DispatchError::NotFound { .. } => ErrorCategory::NotFound,
                DispatchError::ClaimConflict { .. }
                | DispatchError::InvalidState { .. }
                | DispatchError::NoEligibleHelpers => ErrorCategory::Conflict,
                DispatchError::StoreUnavailable(_) => ErrorCategory::Storage,
            },
            Self::Store(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Validation,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
