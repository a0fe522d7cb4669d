//! Error types for the patch engine and the pipeline controller.

use std::time::Duration;
use thiserror::Error;

/// Failures raised while resolving anchors or applying edit operations.
///
/// These are terminal for the operation list they occur in: the engine does
/// not retry an op list after one of its operations fails. A fresh generation
/// may still produce a working list on the next attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// The anchor text was not found at the requested occurrence, even after
    /// the whitespace-tolerant fallback (when enabled).
    #[error("anchor not found ({op}): {anchor}")]
    AnchorNotFound { op: &'static str, anchor: String },

    /// `replace_between` could not locate its start marker.
    #[error("start marker not found: {marker}")]
    StartMarkerNotFound { marker: String },

    /// `replace_between` found the start marker but no end marker after it.
    /// Inverted markers (end text preceding start text) land here too, since
    /// the end is only ever searched for past the start match.
    #[error("end marker not found after start: {marker}")]
    EndMarkerNotFound { marker: String },

    /// The operation's target path is absolute, empty, or escapes the root.
    #[error("invalid target path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Reading the target file failed for a reason other than absence.
    #[error("failed to read {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    /// Writing a fully-applied file back to the tree failed.
    #[error("failed to write {path}: {reason}")]
    WriteFailed { path: String, reason: String },
}

/// Fatal conditions that end a pipeline run early.
///
/// Gate failures and generation failures are *not* represented here - they
/// are folded into the run's attempt records and drive the refinement loop.
/// These variants are the conditions where refinement is meaningless.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The sandbox failed to start, crashed, or timed out. There are no gate
    /// diagnostics to refine against, so the run aborts without consuming a
    /// refinement attempt.
    #[error("sandbox failed fatally: {0}")]
    SandboxFatal(String),

    /// The run was cancelled from outside.
    #[error("run cancelled")]
    Cancelled,

    /// Writing the winning attempt's files to the working tree failed.
    #[error("failed to commit changes: {0}")]
    CommitFailed(String),
}

/// Fatal sandbox conditions, distinct from gate failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxFailure {
    #[error("sandbox failed to start: {0}")]
    Startup(String),

    #[error("sandbox timed out after {0:?}")]
    TimedOut(Duration),

    #[error("sandbox crashed: {0}")]
    Crashed(String),
}

impl From<SandboxFailure> for PipelineError {
    fn from(failure: SandboxFailure) -> Self {
        PipelineError::SandboxFatal(failure.to_string())
    }
}
