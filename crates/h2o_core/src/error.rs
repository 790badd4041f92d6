//! # Assembly Error Types
//!
//! All errors that can occur while assembling molecules.

use std::io;

use thiserror::Error;

use crate::atom::Species;

/// Errors that can occur in the assembly system.
#[derive(Error, Debug)]
pub enum AssemblyError {
    /// A run parameter is malformed or out of range.
    #[error("invalid argument {name}: {reason}")]
    InvalidArgument {
        /// Parameter name (NO, NH, TI, TB).
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Shared state, a worker thread or the output sink could not be set up.
    #[error("resource initialization failed: {0}")]
    ResourceInit(String),

    /// Writing to the activity log failed. Fatal for the whole run.
    #[error("event log write failed: {0}")]
    LogWrite(#[from] io::Error),

    /// The run was aborted while this worker was blocked.
    #[error("assembly aborted")]
    Aborted,

    /// A worker thread panicked before reaching DONE.
    #[error("worker {species} {index} panicked")]
    WorkerPanicked {
        /// Species of the panicked atom.
        species: Species,
        /// Index of the panicked atom.
        index: u32,
    },

    /// Invalid settings file.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AssemblyError {
    /// Shorthand for an [`AssemblyError::InvalidArgument`].
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    /// Returns true if this error is the cancellation signal rather than a fault.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Result type for assembly operations.
pub type AssemblyResult<T> = Result<T, AssemblyError>;
