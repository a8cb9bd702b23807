//! CUDA Stream Management
//!
//! Every trial owns one non-blocking stream. Work on it is ordered, and it
//! never implicitly synchronizes with the legacy default stream or with
//! other trials' streams.

use std::ffi::c_void;
use std::ptr;

use super::context::{get_driver, CudaContext};
use super::sys::{CUfunction, CUstream, CudaDriver, CU_STREAM_NON_BLOCKING};
use super::types::LaunchConfig;
use crate::GpuError;

/// CUDA execution stream
///
/// Destroyed on drop. Work still queued at that point completes on the
/// device before the driver reclaims the handle.
pub struct CudaStream {
    /// Stream handle
    stream: CUstream,
}

// SAFETY: CUstream handles may be used from any thread with the context current
unsafe impl Send for CudaStream {}
unsafe impl Sync for CudaStream {}

impl CudaStream {
    /// Create a non-blocking stream
    ///
    /// # Errors
    ///
    /// Returns `Err(GpuError::StreamCreate)` if stream creation fails.
    pub fn new(_ctx: &CudaContext) -> Result<Self, GpuError> {
        let driver = get_driver()?;

        let mut stream: CUstream = ptr::null_mut();
        // SAFETY: stream pointer is valid
        let result = unsafe { (driver.cuStreamCreate)(&mut stream, CU_STREAM_NON_BLOCKING) };
        CudaDriver::check(result).map_err(|e| GpuError::StreamCreate(e.to_string()))?;

        Ok(Self { stream })
    }

    /// Get raw stream handle
    ///
    /// The returned handle is only valid while this `CudaStream` is alive.
    #[must_use]
    pub fn raw(&self) -> CUstream {
        self.stream
    }

    /// Block until all commands in this stream have completed
    ///
    /// # Errors
    ///
    /// Returns `Err(GpuError::CudaDriver)` carrying the driver code, so
    /// callers can tell kernel faults from API misuse.
    pub fn synchronize(&self) -> Result<(), GpuError> {
        let driver = get_driver()?;

        // SAFETY: stream is valid from constructor
        let result = unsafe { (driver.cuStreamSynchronize)(self.stream) };
        CudaDriver::check(result)
    }

    /// Launch a kernel function on this stream
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - `func` belongs to a module loaded in the current context
    /// - `args` holds one valid pointer per kernel parameter, in order
    /// - device pointers in `args` stay allocated until the stream drains
    ///
    /// # Errors
    ///
    /// Returns `Err(GpuError::CudaDriver)` if the launch is rejected.
    pub unsafe fn launch_function(
        &self,
        driver: &CudaDriver,
        func: CUfunction,
        config: &LaunchConfig,
        args: &mut [*mut c_void],
    ) -> Result<(), GpuError> {
        // SAFETY: func is valid, args contains valid pointers (caller's responsibility)
        let result = unsafe {
            (driver.cuLaunchKernel)(
                func,
                config.grid.0,
                config.grid.1,
                config.grid.2,
                config.block.0,
                config.block.1,
                config.block.2,
                config.shared_mem,
                self.stream,
                args.as_mut_ptr(),
                ptr::null_mut(),
            )
        };

        CudaDriver::check(result)
    }
}

impl Drop for CudaStream {
    fn drop(&mut self) {
        if let Ok(driver) = get_driver() {
            // SAFETY: stream is valid from constructor
            unsafe {
                let _ = (driver.cuStreamDestroy)(self.stream);
            }
        }
    }
}
