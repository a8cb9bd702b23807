//! CUDA Events
//!
//! Device-side timestamps. Two events recorded on the same stream around a
//! kernel launch bracket its device execution time, independent of host
//! scheduling noise.

use std::ptr;
use std::thread;
use std::time::{Duration, Instant};

use super::context::get_driver;
use super::stream::CudaStream;
use super::sys::{CUevent, CudaDriver, CUDA_ERROR_NOT_READY, CU_EVENT_DEFAULT};
use crate::GpuError;

/// Interval between completion polls in [`CudaEvent::wait_timeout`]
const POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Map an event query result to `Ok(true)` (done), `Ok(false)` (pending) or an error
fn ready(result: i32) -> Result<bool, GpuError> {
    if result == CUDA_ERROR_NOT_READY {
        return Ok(false);
    }
    CudaDriver::check(result).map(|()| true)
}

/// CUDA event with timing enabled. Destroyed on drop.
pub struct CudaEvent {
    event: CUevent,
}

// SAFETY: CUevent handles may be used from any thread with the context current
unsafe impl Send for CudaEvent {}
unsafe impl Sync for CudaEvent {}

impl CudaEvent {
    /// Create an event
    ///
    /// # Errors
    ///
    /// Returns `Err(GpuError::Event)` if creation fails.
    pub fn new() -> Result<Self, GpuError> {
        let driver = get_driver()?;

        let mut event: CUevent = ptr::null_mut();
        // SAFETY: event pointer is valid
        let result = unsafe { (driver.cuEventCreate)(&mut event, CU_EVENT_DEFAULT) };
        CudaDriver::check(result).map_err(|e| GpuError::Event(e.to_string()))?;

        Ok(Self { event })
    }

    /// Enqueue this event on `stream`
    ///
    /// # Errors
    ///
    /// Returns `Err(GpuError::Event)` if recording fails.
    pub fn record(&self, stream: &CudaStream) -> Result<(), GpuError> {
        let driver = get_driver()?;

        // SAFETY: event and stream are valid handles
        let result = unsafe { (driver.cuEventRecord)(self.event, stream.raw()) };
        CudaDriver::check(result).map_err(|e| GpuError::Event(e.to_string()))
    }

    /// Non-blocking completion check
    ///
    /// # Errors
    ///
    /// Returns `Err(GpuError::CudaDriver)` with the fault code if work ahead
    /// of the event failed.
    pub fn query(&self) -> Result<bool, GpuError> {
        let driver = get_driver()?;

        // SAFETY: event is valid from constructor
        let result = unsafe { (driver.cuEventQuery)(self.event) };
        ready(result)
    }

    /// Block until the event completes
    ///
    /// # Errors
    ///
    /// Returns `Err(GpuError::CudaDriver)` with the fault code if work ahead
    /// of the event failed.
    pub fn synchronize(&self) -> Result<(), GpuError> {
        let driver = get_driver()?;

        // SAFETY: event is valid from constructor
        let result = unsafe { (driver.cuEventSynchronize)(self.event) };
        CudaDriver::check(result)
    }

    /// Wait for completion, giving up after `timeout`
    ///
    /// Returns `Ok(true)` once complete and `Ok(false)` if the deadline
    /// passed first. `None` waits without bound.
    ///
    /// # Errors
    ///
    /// Same as [`CudaEvent::query`].
    pub fn wait_timeout(&self, timeout: Option<Duration>) -> Result<bool, GpuError> {
        let Some(timeout) = timeout else {
            self.synchronize()?;
            return Ok(true);
        };

        let deadline = Instant::now() + timeout;
        loop {
            if self.query()? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Milliseconds elapsed between `start` and `self`
    ///
    /// Both events must have completed.
    ///
    /// # Errors
    ///
    /// Returns `Err(GpuError::Event)` if either event is incomplete or was
    /// never recorded.
    pub fn elapsed_since(&self, start: &CudaEvent) -> Result<f32, GpuError> {
        let driver = get_driver()?;

        let mut ms: f32 = 0.0;
        // SAFETY: ms is a valid pointer, both events are valid
        let result = unsafe { (driver.cuEventElapsedTime)(&mut ms, start.event, self.event) };
        CudaDriver::check(result).map_err(|e| GpuError::Event(e.to_string()))?;

        Ok(ms)
    }
}

impl Drop for CudaEvent {
    fn drop(&mut self) {
        if let Ok(driver) = get_driver() {
            // SAFETY: event is valid from constructor
            unsafe {
                let _ = (driver.cuEventDestroy)(self.event);
            }
        }
    }
}
