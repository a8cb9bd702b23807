//! Accelerator abstraction
//!
//! The harness talks to the device only through [`Accelerator`]. Each trial
//! creates its own stream and events, so trials never share ordering state.
//!
//! Two backends:
//! - [`SimAccelerator`]: runs the GEMM unit body on CPU worker threads,
//!   one per stream, with allocation tracking and fault injection.
//! - `CudaAccelerator` (feature `cuda`): the CUDA driver API through
//!   `blocktune-gpu`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrialError};
use crate::geometry::{BlockShape, LaunchGeometry, ProblemSize};

mod sim;

#[cfg(feature = "cuda")]
mod cuda;

pub use sim::{FaultPlan, LaunchStats, SimAccelerator, SimBuffer, SimEvent, SimStream};

#[cfg(feature = "cuda")]
pub use cuda::{CudaAccelerator, CudaBuffer};

/// Launch limits of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLimits {
    /// Maximum units in one block
    pub max_threads_per_block: u32,
    /// Maximum block extent (x, y)
    pub max_block_dim: (u32, u32),
    /// Maximum grid extent (x, y)
    pub max_grid_dim: (u32, u32),
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_threads_per_block: 1024,
            max_block_dim: (1024, 1024),
            max_grid_dim: (2_147_483_647, 65_535),
        }
    }
}

impl DeviceLimits {
    /// Set the threads-per-block limit
    #[must_use]
    pub fn with_max_threads_per_block(mut self, threads: u32) -> Self {
        self.max_threads_per_block = threads;
        self
    }

    /// Set the block extent limits
    #[must_use]
    pub fn with_max_block_dim(mut self, x: u32, y: u32) -> Self {
        self.max_block_dim = (x, y);
        self
    }

    /// Set the grid extent limits
    #[must_use]
    pub fn with_max_grid_dim(mut self, x: u32, y: u32) -> Self {
        self.max_grid_dim = (x, y);
        self
    }

    /// Whether a block shape is launchable at all, regardless of grid
    #[must_use]
    pub fn admits(&self, block: BlockShape) -> bool {
        block.threads() <= u64::from(self.max_threads_per_block)
            && block.x <= self.max_block_dim.0
            && block.y <= self.max_block_dim.1
    }

    /// Check a full launch
    ///
    /// # Errors
    ///
    /// Returns `TrialError::Launch` naming the first exceeded limit.
    pub fn check(&self, geometry: &LaunchGeometry) -> Result<()> {
        let block = geometry.block;
        if block.threads() > u64::from(self.max_threads_per_block) {
            return Err(TrialError::Launch(format!(
                "block {} has {} threads, limit is {}",
                block,
                block.threads(),
                self.max_threads_per_block
            )));
        }
        if block.x > self.max_block_dim.0 || block.y > self.max_block_dim.1 {
            return Err(TrialError::Launch(format!(
                "block {} exceeds maximum block dimensions {}x{}",
                block, self.max_block_dim.0, self.max_block_dim.1
            )));
        }
        if geometry.grid.x > self.max_grid_dim.0 || geometry.grid.y > self.max_grid_dim.1 {
            return Err(TrialError::Launch(format!(
                "grid {}x{} exceeds maximum grid dimensions {}x{}",
                geometry.grid.x, geometry.grid.y, self.max_grid_dim.0, self.max_grid_dim.1
            )));
        }
        Ok(())
    }
}

/// Device buffers bound to one GEMM launch
#[derive(Debug)]
pub struct GemmArgs<'a, B> {
    /// M×K input
    pub a: &'a B,
    /// K×N input
    pub b: &'a B,
    /// M×N output
    pub c: &'a B,
    /// Extents passed to the kernel
    pub problem: ProblemSize,
}

/// Host/device seam used by the harness
///
/// Commands issued on one stream execute in submission order. Only
/// [`wait_event`](Accelerator::wait_event) and
/// [`download`](Accelerator::download) block the caller.
pub trait Accelerator: Send + Sync {
    /// Per-trial ordered execution context
    type Stream: Send;
    /// Device buffer of f32, released on drop
    type Buffer: Send;
    /// Timestamp marker recorded on a stream
    type Event: Send;

    /// Backend name for logs and reports
    fn name(&self) -> &str;

    /// Launch limits
    fn limits(&self) -> DeviceLimits;

    /// Create a fresh stream
    fn create_stream(&self) -> Result<Self::Stream>;

    /// Allocate `len` elements of device memory
    fn allocate(&self, label: &'static str, len: usize) -> Result<Self::Buffer>;

    /// Queue a host to device copy on `stream`
    fn upload(&self, stream: &Self::Stream, dst: &mut Self::Buffer, src: &[f32]) -> Result<()>;

    /// Copy device to host once everything queued on `stream` has run
    fn download(&self, stream: &Self::Stream, src: &Self::Buffer, dst: &mut [f32]) -> Result<()>;

    /// Create an unrecorded event
    fn create_event(&self) -> Result<Self::Event>;

    /// Queue `event` on `stream`
    fn record_event(&self, stream: &Self::Stream, event: &Self::Event) -> Result<()>;

    /// Queue one GEMM launch on `stream`
    fn launch_gemm(
        &self,
        stream: &Self::Stream,
        geometry: &LaunchGeometry,
        args: GemmArgs<'_, Self::Buffer>,
    ) -> Result<()>;

    /// Block until `event` completes; `Ok(false)` if `timeout` elapsed first
    fn wait_event(&self, event: &Self::Event, timeout: Option<Duration>) -> Result<bool>;

    /// Ask work still queued or running on `stream` to stop
    fn cancel(&self, stream: &Self::Stream);

    /// Milliseconds between two completed events
    fn elapsed_ms(&self, start: &Self::Event, stop: &Self::Event) -> Result<f32>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    fn geometry(bx: u32, by: u32) -> LaunchGeometry {
        LaunchGeometry::derive(ProblemSize::default(), BlockShape { x: bx, y: by })
    }

    #[test]
    fn test_default_limits_admit_1024_threads() {
        let limits = DeviceLimits::default();
        assert!(limits.admits(BlockShape { x: 32, y: 32 }));
        assert!(!limits.admits(BlockShape { x: 32, y: 64 }));
        assert!(limits.check(&geometry(32, 32)).is_ok());
    }

    #[test]
    fn test_check_rejects_oversized_block() {
        let err = DeviceLimits::default().check(&geometry(64, 32)).unwrap_err();
        assert_eq!(err.kind(), FailureKind::LaunchFailure);
        assert!(err.to_string().contains("2048 threads"));
    }

    #[test]
    fn test_check_rejects_block_dim() {
        let limits = DeviceLimits::default().with_max_block_dim(16, 16);
        assert!(limits.check(&geometry(32, 1)).is_err());
        assert!(!limits.admits(BlockShape { x: 32, y: 1 }));
    }

    #[test]
    fn test_check_rejects_grid_y() {
        let p = ProblemSize::new(70_000, 1, 1).unwrap();
        let g = LaunchGeometry::derive(p, BlockShape { x: 1, y: 1 });
        let err = DeviceLimits::default().check(&g).unwrap_err();
        assert!(err.to_string().contains("grid"));
    }
}
