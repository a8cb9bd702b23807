//! GPU Memory Management
//!
//! RAII wrapper for linear device memory. Freed on drop.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::mem;

use super::context::{get_driver, CudaContext};
use super::stream::CudaStream;
use super::sys::{CUdeviceptr, CudaDriver};
use crate::GpuError;

/// GPU memory buffer with RAII cleanup
///
/// # Example
///
/// ```ignore
/// let ctx = CudaContext::new(0)?;
/// let mut buf: GpuBuffer<f32> = GpuBuffer::new(&ctx, 1024)?;
///
/// buf.copy_from_host(&vec![1.0; 1024])?;
///
/// let mut result = vec![0.0f32; 1024];
/// buf.copy_to_host(&mut result)?;
/// ```
pub struct GpuBuffer<T> {
    /// Device pointer
    ptr: CUdeviceptr,
    /// Number of elements
    len: usize,
    _marker: PhantomData<T>,
}

// SAFETY: GPU memory is accessible from any thread
unsafe impl<T: Send> Send for GpuBuffer<T> {}
unsafe impl<T: Sync> Sync for GpuBuffer<T> {}

impl<T> GpuBuffer<T> {
    /// Allocate `len` elements of device memory
    ///
    /// # Errors
    ///
    /// Returns `Err(GpuError::MemoryAllocation)` if the size overflows or
    /// the driver cannot satisfy the request.
    pub fn new(_ctx: &CudaContext, len: usize) -> Result<Self, GpuError> {
        if len == 0 {
            return Ok(Self {
                ptr: 0,
                len: 0,
                _marker: PhantomData,
            });
        }

        let driver = get_driver()?;
        let size = len.checked_mul(mem::size_of::<T>()).ok_or_else(|| {
            GpuError::MemoryAllocation(format!("{} elements overflow usize bytes", len))
        })?;

        let mut ptr: CUdeviceptr = 0;
        // SAFETY: ptr is valid, size is computed correctly
        let result = unsafe { (driver.cuMemAlloc)(&mut ptr, size) };
        CudaDriver::check(result).map_err(|e| GpuError::MemoryAllocation(e.to_string()))?;

        Ok(Self {
            ptr,
            len,
            _marker: PhantomData,
        })
    }

    /// Get device pointer as raw u64
    #[must_use]
    pub fn as_ptr(&self) -> CUdeviceptr {
        self.ptr
    }

    /// Get number of elements
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get size in bytes
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.len * mem::size_of::<T>()
    }
}

impl<T: Copy> GpuBuffer<T> {
    /// Copy data from host to device (synchronous)
    ///
    /// # Errors
    ///
    /// Returns `Err(GpuError::Transfer)` if lengths differ or the copy fails.
    pub fn copy_from_host(&mut self, data: &[T]) -> Result<(), GpuError> {
        self.check_len(data.len())?;
        if self.len == 0 {
            return Ok(());
        }

        let driver = get_driver()?;
        // SAFETY: data is valid for size bytes, ptr is valid device pointer
        let result = unsafe {
            (driver.cuMemcpyHtoD)(self.ptr, data.as_ptr().cast::<c_void>(), self.size_bytes())
        };
        CudaDriver::check(result).map_err(|e| GpuError::Transfer(e.to_string()))
    }

    /// Queue a host to device copy on `stream`
    ///
    /// Later work on `stream` sees the copied data.
    ///
    /// # Safety
    ///
    /// `data` must stay alive and unmodified until the stream has drained.
    ///
    /// # Errors
    ///
    /// Returns `Err(GpuError::Transfer)` if lengths differ or the copy
    /// cannot be queued.
    pub unsafe fn copy_from_host_async(
        &mut self,
        data: &[T],
        stream: &CudaStream,
    ) -> Result<(), GpuError> {
        self.check_len(data.len())?;
        if self.len == 0 {
            return Ok(());
        }

        let driver = get_driver()?;
        // SAFETY: data is valid for size bytes; the caller keeps it alive
        // until the stream drains
        let result = unsafe {
            (driver.cuMemcpyHtoDAsync)(
                self.ptr,
                data.as_ptr().cast::<c_void>(),
                self.size_bytes(),
                stream.raw(),
            )
        };
        CudaDriver::check(result).map_err(|e| GpuError::Transfer(e.to_string()))
    }

    /// Copy data from device to host (synchronous)
    ///
    /// # Errors
    ///
    /// Returns `Err(GpuError::Transfer)` if lengths differ or the copy fails.
    pub fn copy_to_host(&self, data: &mut [T]) -> Result<(), GpuError> {
        self.check_len(data.len())?;
        if self.len == 0 {
            return Ok(());
        }

        let driver = get_driver()?;
        // SAFETY: data is valid for size bytes, ptr is valid device pointer
        let result = unsafe {
            (driver.cuMemcpyDtoH)(
                data.as_mut_ptr().cast::<c_void>(),
                self.ptr,
                self.size_bytes(),
            )
        };
        CudaDriver::check(result).map_err(|e| GpuError::Transfer(e.to_string()))
    }

    fn check_len(&self, host_len: usize) -> Result<(), GpuError> {
        if host_len != self.len {
            return Err(GpuError::Transfer(format!(
                "Length mismatch: host {} vs device {}",
                host_len, self.len
            )));
        }
        Ok(())
    }
}

impl<T> Drop for GpuBuffer<T> {
    fn drop(&mut self) {
        if self.ptr == 0 {
            return;
        }
        if let Ok(driver) = get_driver() {
            // SAFETY: ptr was allocated by cuMemAlloc and is freed once
            unsafe {
                let _ = (driver.cuMemFree)(self.ptr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::context::cuda_available;

    #[test]
    fn test_round_trip() {
        if !cuda_available() {
            return;
        }
        let ctx = CudaContext::new(0).expect("context");
        let mut buf: GpuBuffer<f32> = GpuBuffer::new(&ctx, 256).expect("alloc");
        assert_eq!(buf.size_bytes(), 1024);

        let host: Vec<f32> = (0..256).map(|i| i as f32).collect();
        buf.copy_from_host(&host).expect("upload");
        let mut back = vec![0.0f32; 256];
        buf.copy_to_host(&mut back).expect("download");
        assert_eq!(host, back);
    }

    #[test]
    fn test_async_upload_on_stream() {
        if !cuda_available() {
            return;
        }
        let ctx = CudaContext::new(0).expect("context");
        let stream = CudaStream::new(&ctx).expect("stream");
        let mut buf: GpuBuffer<f32> = GpuBuffer::new(&ctx, 512).expect("alloc");

        let host: Vec<f32> = (0..512).map(|i| i as f32 * 0.5).collect();
        // SAFETY: host outlives the synchronize below
        unsafe { buf.copy_from_host_async(&host, &stream) }.expect("queue upload");
        stream.synchronize().expect("sync");

        let mut back = vec![0.0f32; 512];
        buf.copy_to_host(&mut back).expect("download");
        assert_eq!(host, back);
    }

    #[test]
    fn test_length_mismatch_is_transfer_error() {
        if !cuda_available() {
            return;
        }
        let ctx = CudaContext::new(0).expect("context");
        let mut buf: GpuBuffer<f32> = GpuBuffer::new(&ctx, 4).expect("alloc");
        assert!(matches!(
            buf.copy_from_host(&[1.0; 3]),
            Err(GpuError::Transfer(_))
        ));
    }

    #[test]
    fn test_empty_buffer_needs_no_device() {
        if !cuda_available() {
            return;
        }
        let ctx = CudaContext::new(0).expect("context");
        let buf: GpuBuffer<f32> = GpuBuffer::new(&ctx, 0).expect("alloc");
        assert!(buf.is_empty());
        assert_eq!(buf.as_ptr(), 0);
    }
}
