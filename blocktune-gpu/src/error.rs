//! Error types for blocktune-gpu operations
//!
//! Covers PTX generation, CUDA driver calls, memory management and
//! event-based timing.

use thiserror::Error;

/// Result type alias for blocktune-gpu operations
pub type Result<T> = std::result::Result<T, GpuError>;

/// Errors that can occur during GPU operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GpuError {
    /// PTX generation error
    #[error("PTX generation error: {0}")]
    PtxGeneration(String),

    /// Invalid PTX version
    #[error("Invalid PTX version: {major}.{minor} (requires >= 7.0)")]
    InvalidPtxVersion {
        /// Major version
        major: u32,
        /// Minor version
        minor: u32,
    },

    /// Invalid compute capability target
    #[error("Invalid compute capability: {0} (requires sm_70+)")]
    InvalidTarget(String),

    /// CUDA driver library missing or `cuda` feature disabled
    #[error("CUDA not available: {0}")]
    CudaNotAvailable(String),

    /// cuInit or context setup failed
    #[error("CUDA device initialization failed: {0}")]
    DeviceInit(String),

    /// Requested device ordinal does not exist
    #[error("CUDA device {0} not found ({1} devices present)")]
    DeviceNotFound(i32, usize),

    /// CUDA driver error
    #[error("CUDA driver error: {0} (code: {1})")]
    CudaDriver(String, i32),

    /// Memory allocation error
    #[error("GPU memory allocation failed: {0}")]
    MemoryAllocation(String),

    /// Host/device copy failed
    #[error("GPU memory transfer failed: {0}")]
    Transfer(String),

    /// PTX could not be JIT-compiled
    #[error("Module load failed: {0}")]
    ModuleLoad(String),

    /// Kernel entry not present in module
    #[error("Kernel function not found: {0}")]
    FunctionNotFound(String),

    /// Kernel launch error
    #[error("Kernel launch failed: {0}")]
    KernelLaunch(String),

    /// Invalid kernel configuration
    #[error("Invalid launch config: {0}")]
    InvalidLaunchConfig(String),

    /// Stream creation failed
    #[error("Stream creation failed: {0}")]
    StreamCreate(String),

    /// Stream or context synchronization reported a failure
    #[error("Stream synchronization failed: {0}")]
    StreamSync(String),

    /// Event creation, recording or timing failed
    #[error("Event operation failed: {0}")]
    Event(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ptx_generation_error() {
        let err = GpuError::PtxGeneration("invalid instruction".to_string());
        assert!(err.to_string().contains("PTX generation error"));
        assert!(err.to_string().contains("invalid instruction"));
    }

    #[test]
    fn test_invalid_ptx_version() {
        let err = GpuError::InvalidPtxVersion { major: 6, minor: 5 };
        assert!(err.to_string().contains("6.5"));
        assert!(err.to_string().contains("requires >= 7.0"));
    }

    #[test]
    fn test_cuda_driver_error() {
        let err = GpuError::CudaDriver("CUDA_ERROR_OUT_OF_MEMORY".to_string(), 2);
        assert!(err.to_string().contains("OUT_OF_MEMORY"));
        assert!(err.to_string().contains("code: 2"));
    }

    #[test]
    fn test_device_not_found() {
        let err = GpuError::DeviceNotFound(3, 1);
        assert_eq!(err.to_string(), "CUDA device 3 not found (1 devices present)");
    }

    #[test]
    fn test_event_error() {
        let err = GpuError::Event("cuEventRecord".to_string());
        assert!(err.to_string().contains("Event operation failed"));
    }

    #[test]
    fn test_error_clone_eq() {
        let err = GpuError::KernelLaunch("too many threads".to_string());
        assert_eq!(err.clone(), err);
    }
}
