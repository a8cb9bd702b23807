//! CUDA Context Management
//!
//! RAII wrapper over the device's primary context
//! (`cuDevicePrimaryCtxRetain`). The primary context is shared by every
//! user in the process and reference counted by the driver, so each
//! harness thread can retain it and make it current independently.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use super::sys::{
    CUcontext, CUdevice, CudaDriver, CUDA_SUCCESS, CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_X,
    CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Y, CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_X,
    CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Y, CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK,
};
use crate::GpuError;

// ============================================================================
// Global Initialization State
// ============================================================================

/// Track whether cuInit has been called
static CUDA_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Get the CUDA driver, initializing if needed
///
/// # Errors
///
/// Returns `Err(GpuError::CudaNotAvailable)` if CUDA driver is not installed.
/// Returns `Err(GpuError::DeviceInit)` if cuInit fails.
pub fn get_driver() -> Result<&'static CudaDriver, GpuError> {
    let driver = CudaDriver::load()
        .ok_or_else(|| GpuError::CudaNotAvailable("CUDA driver not found".to_string()))?;

    if !CUDA_INITIALIZED.swap(true, Ordering::SeqCst) {
        // SAFETY: cuInit has no preconditions
        let result = unsafe { (driver.cuInit)(0) };
        if result != CUDA_SUCCESS {
            CUDA_INITIALIZED.store(false, Ordering::SeqCst);
            return Err(GpuError::DeviceInit(format!(
                "cuInit failed with code {}",
                result
            )));
        }
    }

    Ok(driver)
}

// ============================================================================
// Device Attributes
// ============================================================================

/// Launch limits reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAttributes {
    /// Maximum threads in one block
    pub max_threads_per_block: u32,
    /// Maximum block extent (x, y)
    pub max_block_dim: (u32, u32),
    /// Maximum grid extent (x, y)
    pub max_grid_dim: (u32, u32),
}

// ============================================================================
// CUDA Context
// ============================================================================

/// CUDA context with RAII cleanup
///
/// # Example
///
/// ```ignore
/// let ctx = CudaContext::new(0)?;
/// let (free, total) = ctx.memory_info()?;
/// println!("GPU memory: {} / {} bytes free", free, total);
/// ```
pub struct CudaContext {
    /// Device handle
    device: CUdevice,
    /// Primary context handle
    context: CUcontext,
}

// SAFETY: the primary context may be made current on any thread
unsafe impl Send for CudaContext {}
unsafe impl Sync for CudaContext {}

impl CudaContext {
    /// Retain the primary context of `device_ordinal` and make it current
    ///
    /// # Errors
    ///
    /// Returns `Err(GpuError::DeviceNotFound)` if device doesn't exist.
    /// Returns `Err(GpuError::DeviceInit)` if context creation fails.
    pub fn new(device_ordinal: i32) -> Result<Self, GpuError> {
        let driver = get_driver()?;

        let mut count: i32 = 0;
        // SAFETY: count is a valid pointer
        let result = unsafe { (driver.cuDeviceGetCount)(&mut count) };
        CudaDriver::check(result)?;

        if device_ordinal < 0 || device_ordinal >= count {
            return Err(GpuError::DeviceNotFound(device_ordinal, count as usize));
        }

        let mut device: CUdevice = 0;
        // SAFETY: device_ordinal is validated above
        let result = unsafe { (driver.cuDeviceGet)(&mut device, device_ordinal) };
        CudaDriver::check(result)?;

        let mut context: CUcontext = ptr::null_mut();
        // SAFETY: device is a valid handle from cuDeviceGet
        let result = unsafe { (driver.cuDevicePrimaryCtxRetain)(&mut context, device) };
        CudaDriver::check(result).map_err(|e| GpuError::DeviceInit(e.to_string()))?;

        let ctx = Self { device, context };
        // Drop releases the retained context if this fails
        ctx.make_current()?;
        Ok(ctx)
    }

    /// Bind this context to the calling thread
    ///
    /// Driver calls resolve the context per thread, so every thread that
    /// touches this device must call this first.
    ///
    /// # Errors
    ///
    /// Returns `Err(GpuError::DeviceInit)` if `cuCtxSetCurrent` fails.
    pub fn make_current(&self) -> Result<(), GpuError> {
        let driver = get_driver()?;
        // SAFETY: context is valid from cuDevicePrimaryCtxRetain
        let result = unsafe { (driver.cuCtxSetCurrent)(self.context) };
        CudaDriver::check(result).map_err(|e| GpuError::DeviceInit(e.to_string()))
    }

    /// Get device handle
    #[must_use]
    pub fn device(&self) -> i32 {
        self.device
    }

    /// Get raw context handle
    ///
    /// The returned handle is only valid while this `CudaContext` is alive.
    #[must_use]
    pub fn raw(&self) -> CUcontext {
        self.context
    }

    /// Query free and total device memory as `(free_bytes, total_bytes)`
    ///
    /// # Errors
    ///
    /// Returns `Err(GpuError::CudaDriver)` if query fails.
    pub fn memory_info(&self) -> Result<(usize, usize), GpuError> {
        let driver = get_driver()?;

        let mut free: usize = 0;
        let mut total: usize = 0;

        // SAFETY: pointers are valid
        let result = unsafe { (driver.cuMemGetInfo)(&mut free, &mut total) };
        CudaDriver::check(result)?;

        Ok((free, total))
    }

    /// Synchronize all work on this context
    ///
    /// # Errors
    ///
    /// Returns `Err(GpuError::StreamSync)` if synchronization fails.
    pub fn synchronize(&self) -> Result<(), GpuError> {
        let driver = get_driver()?;

        // SAFETY: no pointer arguments
        let result = unsafe { (driver.cuCtxSynchronize)() };
        CudaDriver::check(result).map_err(|e| GpuError::StreamSync(e.to_string()))
    }

    /// Get device name
    ///
    /// # Errors
    ///
    /// Returns `Err(GpuError::CudaDriver)` if query fails.
    pub fn device_name(&self) -> Result<String, GpuError> {
        let driver = get_driver()?;

        let mut name: [c_char; 256] = [0; 256];
        // SAFETY: buffer is valid and large enough
        let result = unsafe { (driver.cuDeviceGetName)(name.as_mut_ptr(), 256, self.device) };
        CudaDriver::check(result)?;

        // SAFETY: the driver writes a NUL-terminated string into the buffer
        let name_str = unsafe { CStr::from_ptr(name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        Ok(name_str)
    }

    /// Get total device memory in bytes
    ///
    /// # Errors
    ///
    /// Returns `Err(GpuError::CudaDriver)` if query fails.
    pub fn total_memory(&self) -> Result<usize, GpuError> {
        let driver = get_driver()?;

        let mut bytes: usize = 0;
        // SAFETY: pointer is valid, device is valid
        let result = unsafe { (driver.cuDeviceTotalMem)(&mut bytes, self.device) };
        CudaDriver::check(result)?;

        Ok(bytes)
    }

    /// Query launch limits
    ///
    /// # Errors
    ///
    /// Returns `Err(GpuError::CudaDriver)` if any attribute query fails.
    pub fn attributes(&self) -> Result<DeviceAttributes, GpuError> {
        Ok(DeviceAttributes {
            max_threads_per_block: self.attribute(CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK)?,
            max_block_dim: (
                self.attribute(CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_X)?,
                self.attribute(CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Y)?,
            ),
            max_grid_dim: (
                self.attribute(CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_X)?,
                self.attribute(CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Y)?,
            ),
        })
    }

    fn attribute(&self, attrib: c_int) -> Result<u32, GpuError> {
        let driver = get_driver()?;

        let mut value: c_int = 0;
        // SAFETY: value is a valid pointer, device is valid
        let result = unsafe { (driver.cuDeviceGetAttribute)(&mut value, attrib, self.device) };
        CudaDriver::check(result)?;

        Ok(value.max(0) as u32)
    }
}

impl Drop for CudaContext {
    fn drop(&mut self) {
        if let Ok(driver) = get_driver() {
            // SAFETY: device is valid from constructor
            unsafe {
                let _ = (driver.cuDevicePrimaryCtxRelease)(self.device);
            }
        }
    }
}

// ============================================================================
// Device Enumeration
// ============================================================================

/// Get the number of CUDA devices
///
/// # Errors
///
/// Returns `Err(GpuError::CudaNotAvailable)` if CUDA is not available.
pub fn device_count() -> Result<usize, GpuError> {
    let driver = get_driver()?;

    let mut count: i32 = 0;
    // SAFETY: count is a valid pointer
    let result = unsafe { (driver.cuDeviceGetCount)(&mut count) };
    CudaDriver::check(result)?;

    Ok(count.max(0) as usize)
}

/// Returns `true` if the CUDA driver is installed and at least one device exists
#[must_use]
pub fn cuda_available() -> bool {
    device_count().map(|c| c > 0).unwrap_or(false)
}
