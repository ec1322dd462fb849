// ============================================================================
// kestrel-core/src/error.rs
// ============================================================================
//
// ERROR HANDLING: Custom Error Types and Result Definitions
//
// This module defines the error handling infrastructure for the kestrel-core
// library. Every failure the pipeline can hit maps onto one of a small set of
// kinds with a fixed propagation policy: probe and scorer failures are
// retryable, tool-launch and validation failures are fatal, and cancellation
// is reported distinctly so callers can map it to its own exit code.
//
// KEY COMPONENTS:
// - CoreError: enum of all error kinds produced by the library
// - CoreResult: type alias for Result<T, CoreError>
// - CoreError::is_retryable: classification consumed by the scheduler's
//   retry policy
//
// AI-ASSISTANT-INFO: Error handling infrastructure for the kestrel-core library

// ---- External crate imports ----
use thiserror::Error;

// ---- Standard library imports ----
use std::io;
use std::path::PathBuf;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Comprehensive error type for the kestrel-core library.
///
/// Variants follow the pipeline's propagation policy: `RetryableEncode` and
/// `ProcessExit` from probe encodes are recovered by the scheduler, everything
/// else surfaces to the caller after a checkpoint write.
#[derive(Error, Debug)]
pub enum CoreError {
    // ---- I/O and Filesystem Errors ----
    /// Standard I/O errors from the std::io module
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // ---- Configuration Errors ----
    /// Invalid or conflicting options; fatal, maps to exit code 1
    #[error("Configuration error: {0}")]
    Config(String),

    // ---- Input Errors ----
    /// Source is missing required streams, has an unsupported codec, or a
    /// corrupt container; fatal for that input
    #[error("Input validation failed for {path}: {reason}")]
    InputValidation { path: PathBuf, reason: String },

    // ---- External Process Errors ----
    /// External tool missing or not executable; fatal for the whole job
    #[error("Failed to launch {tool}: {reason}")]
    ProcessLaunch { tool: String, reason: String },

    /// External tool exited non-zero. `tail` carries the last lines of
    /// stderr for the user-visible failure report.
    #[error("{tool} exited with code {code}: {tail}")]
    ProcessExit {
        tool: String,
        code: i32,
        tail: String,
    },

    // ---- Parsing Errors ----
    /// Errors that occur when parsing ffprobe output
    #[error("ffprobe output parsing error: {0}")]
    FfprobeParse(String),

    /// Errors that occur when parsing JSON output
    #[error("Failed to parse JSON output: {0}")]
    JsonParse(String),

    // ---- Encoding Errors ----
    /// A probe could not converge, the scorer returned NaN, or an
    /// intermittent I/O fault interrupted an encode. Caught by the
    /// scheduler's retry policy.
    #[error("Retryable encode failure on segment {segment}: {reason}")]
    RetryableEncode { segment: usize, reason: String },

    /// A segment exhausted its retries
    #[error("Segment {segment} failed after {attempts} attempts: {reason}")]
    SegmentFailed {
        segment: usize,
        attempts: u32,
        reason: String,
    },

    // ---- Output Errors ----
    /// Post-encode output does not match the container contract
    #[error("Output validation failed: {0}")]
    Validation(String),

    // ---- Cancellation ----
    /// Cooperative cancel; state has been persisted before this is returned
    #[error("Operation cancelled")]
    Cancelled,

    // ---- Notification Errors ----
    /// Errors that occur when sending notifications
    #[error("Notification error: {0}")]
    Notification(String),
}

impl CoreError {
    /// Whether the scheduler may requeue the segment that produced this error.
    ///
    /// Probe-level and scorer-level failures are retryable; launch failures,
    /// config errors and validation errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::RetryableEncode { .. } | CoreError::ProcessExit { .. }
        )
    }

    /// A short suggestion string for user-visible failure reports.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            CoreError::ProcessLaunch { .. } => {
                Some("Check that the tool is installed and on PATH")
            }
            CoreError::Config(_) => Some("Review the flags and config file for conflicts"),
            CoreError::InputValidation { .. } => {
                Some("Verify the source file plays and has at least one audio stream")
            }
            CoreError::Validation(_) => {
                Some("Keep the temp directory and inspect the assembler logs")
            }
            CoreError::SegmentFailed { .. } => {
                Some("Re-run with --verbose to capture the encoder stderr tail")
            }
            _ => None,
        }
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Type alias for Result using our custom error type.
pub type CoreResult<T> = Result<T, CoreError>;

// ============================================================================
// HELPER CONSTRUCTORS
// ============================================================================

/// Convenience constructor for a launch failure.
pub fn launch_error(tool: impl Into<String>, error: io::Error) -> CoreError {
    CoreError::ProcessLaunch {
        tool: tool.into(),
        reason: error.to_string(),
    }
}

/// Convenience constructor for a non-zero exit, keeping only the stderr tail.
pub fn exit_error(tool: impl Into<String>, code: i32, stderr_tail: impl Into<String>) -> CoreError {
    CoreError::ProcessExit {
        tool: tool.into(),
        code,
        tail: stderr_tail.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let retryable = CoreError::RetryableEncode {
            segment: 3,
            reason: "scorer returned NaN".to_string(),
        };
        assert!(retryable.is_retryable());

        let exit = exit_error("ffmpeg", 1, "tail");
        assert!(exit.is_retryable());

        let launch = CoreError::ProcessLaunch {
            tool: "ffmpeg".to_string(),
            reason: "not found".to_string(),
        };
        assert!(!launch.is_retryable());

        assert!(!CoreError::Cancelled.is_retryable());
        assert!(!CoreError::Config("bad".to_string()).is_retryable());
    }

    #[test]
    fn suggestions_present_for_fatal_kinds() {
        assert!(CoreError::Config("x".to_string()).suggestion().is_some());
        assert!(CoreError::Validation("x".to_string()).suggestion().is_some());
        assert!(CoreError::Cancelled.suggestion().is_none());
    }
}
