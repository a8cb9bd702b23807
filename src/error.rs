//! Error types for blocktune trials
//!
//! Every failure names the harness phase it came from. Resources acquired
//! before the failure are already released when the error reaches the caller.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for trial operations
pub type Result<T> = std::result::Result<T, TrialError>;

/// Where a buffer lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemorySpace {
    /// Host (CPU) memory
    Host,
    /// Accelerator memory
    Device,
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Device => write!(f, "device"),
        }
    }
}

/// Harness phase a trial was in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Not running
    Idle,
    /// Acquiring host and device buffers
    Allocating,
    /// Copying A and B to the device
    Uploading,
    /// Deriving geometry, recording the start event and launching
    Launching,
    /// Waiting on the stop event
    AwaitingCompletion,
    /// Reading the elapsed time between events
    Measuring,
    /// Downloading C and comparing against the closed form
    Verifying,
    /// Dropping device then host buffers
    Releasing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Allocating => "allocating",
            Self::Uploading => "uploading",
            Self::Launching => "launching",
            Self::AwaitingCompletion => "awaiting-completion",
            Self::Measuring => "measuring",
            Self::Verifying => "verifying",
            Self::Releasing => "releasing",
        };
        f.write_str(name)
    }
}

/// Coarse failure category, as reported to a tuning driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Host or device buffer could not be obtained
    AllocationFailure,
    /// Host to device or device to host copy failed
    TransferFailure,
    /// Launch rejected (bad geometry, limits exceeded, launch error)
    LaunchFailure,
    /// Fault reported at synchronization or during measurement
    ExecutionFailure,
    /// Completion did not arrive before the deadline
    TimedOut,
    /// Output did not match the expected result
    VerificationFailure,
    /// Backend could not be initialized
    DeviceUnavailable,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AllocationFailure => "allocation failure",
            Self::TransferFailure => "transfer failure",
            Self::LaunchFailure => "launch failure",
            Self::ExecutionFailure => "execution failure",
            Self::TimedOut => "timed out",
            Self::VerificationFailure => "verification failure",
            Self::DeviceUnavailable => "device unavailable",
        };
        f.write_str(name)
    }
}

/// Errors that can end a trial
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TrialError {
    /// Block dimension zero or negative
    #[error("Invalid block shape ({x}, {y}): dimensions must be positive")]
    InvalidBlockShape {
        /// Requested x extent
        x: i64,
        /// Requested y extent
        y: i64,
    },

    /// Problem size with a zero extent or a byte size that overflows
    #[error("Invalid problem size {m}x{n}x{k}: {reason}")]
    InvalidProblemSize {
        /// Rows of A and C
        m: u32,
        /// Columns of B and C
        n: u32,
        /// Inner dimension
        k: u32,
        /// What is wrong with it
        reason: String,
    },

    /// Buffer allocation failed
    #[error("{space} allocation of {bytes} bytes for {buffer} failed: {reason}")]
    Allocation {
        /// Host or device
        space: MemorySpace,
        /// Buffer name (a, b or c)
        buffer: &'static str,
        /// Requested size
        bytes: usize,
        /// Backend message
        reason: String,
    },

    /// Copy between host and device failed
    #[error("Transfer failed in {phase}: {reason}")]
    Transfer {
        /// Uploading or Verifying
        phase: Phase,
        /// Backend message
        reason: String,
    },

    /// Launch rejected
    #[error("Launch failed: {0}")]
    Launch(String),

    /// Fault detected while waiting for or measuring the kernel
    #[error("Execution failed in {phase}: {reason}")]
    Execution {
        /// AwaitingCompletion or Measuring
        phase: Phase,
        /// Backend message
        reason: String,
    },

    /// Stop event did not complete in time
    #[error("Timed out after {timeout_ms} ms waiting for kernel completion")]
    TimedOut {
        /// Configured deadline
        timeout_ms: u64,
    },

    /// Output mismatch
    #[error("Verification failed at C[{row}, {col}]: expected {expected}, got {actual}")]
    Verification {
        /// Row of the first bad cell
        row: usize,
        /// Column of the first bad cell
        col: usize,
        /// Closed-form value
        expected: f32,
        /// Value read back
        actual: f32,
    },

    /// Backend could not be brought up
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),
}

impl TrialError {
    /// Failure category
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidBlockShape { .. } | Self::InvalidProblemSize { .. } | Self::Launch(_) => {
                FailureKind::LaunchFailure
            }
            Self::Allocation { .. } => FailureKind::AllocationFailure,
            Self::Transfer { .. } => FailureKind::TransferFailure,
            Self::Execution { .. } => FailureKind::ExecutionFailure,
            Self::TimedOut { .. } => FailureKind::TimedOut,
            Self::Verification { .. } => FailureKind::VerificationFailure,
            Self::DeviceUnavailable(_) => FailureKind::DeviceUnavailable,
        }
    }

    /// Phase the failure belongs to
    #[must_use]
    pub fn phase(&self) -> Phase {
        match self {
            Self::InvalidBlockShape { .. }
            | Self::InvalidProblemSize { .. }
            | Self::Allocation { .. }
            | Self::DeviceUnavailable(_) => Phase::Allocating,
            Self::Transfer { phase, .. } | Self::Execution { phase, .. } => *phase,
            Self::Launch(_) => Phase::Launching,
            Self::TimedOut { .. } => Phase::AwaitingCompletion,
            Self::Verification { .. } => Phase::Verifying,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_block_shape_is_launch_failure() {
        let err = TrialError::InvalidBlockShape { x: 0, y: 16 };
        assert_eq!(err.kind(), FailureKind::LaunchFailure);
        assert_eq!(
            err.to_string(),
            "Invalid block shape (0, 16): dimensions must be positive"
        );
    }

    #[test]
    fn test_allocation_error_display() {
        let err = TrialError::Allocation {
            space: MemorySpace::Device,
            buffer: "a",
            bytes: 16384,
            reason: "out of memory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "device allocation of 16384 bytes for a failed: out of memory"
        );
        assert_eq!(err.kind(), FailureKind::AllocationFailure);
        assert_eq!(err.phase(), Phase::Allocating);
    }

    #[test]
    fn test_phase_carried_by_transfer_and_execution() {
        let upload = TrialError::Transfer {
            phase: Phase::Uploading,
            reason: "x".to_string(),
        };
        let measure = TrialError::Execution {
            phase: Phase::Measuring,
            reason: "negative elapsed time".to_string(),
        };
        assert_eq!(upload.phase(), Phase::Uploading);
        assert_eq!(measure.phase(), Phase::Measuring);
        assert_eq!(measure.kind(), FailureKind::ExecutionFailure);
    }

    #[test]
    fn test_timed_out() {
        let err = TrialError::TimedOut { timeout_ms: 50 };
        assert_eq!(err.kind(), FailureKind::TimedOut);
        assert_eq!(err.phase(), Phase::AwaitingCompletion);
        assert!(err.to_string().contains("50 ms"));
    }

    #[test]
    fn test_failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::LaunchFailure).unwrap();
        assert_eq!(json, "\"launch_failure\"");
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::AwaitingCompletion.to_string(), "awaiting-completion");
        assert_eq!(MemorySpace::Host.to_string(), "host");
    }
}
