//! CUDA accelerator
//!
//! Drives a real device through the `blocktune-gpu` driver wrappers. The
//! GEMM PTX is JIT-compiled once per accelerator; problem extents are
//! kernel parameters, so the same function serves every trial.
//!
//! A kernel already running on the device cannot be preempted. On timeout
//! the stream is abandoned; freeing the trial's buffers afterwards
//! synchronizes with the kernel.

use std::ffi::c_void;
use std::time::Duration;

use blocktune_gpu::driver::sys::{is_execution_fault, CUfunction};
use blocktune_gpu::driver::{
    get_driver, CudaContext, CudaEvent, CudaModule, CudaStream, GpuBuffer,
};
use blocktune_gpu::kernels::{GemmKernel, Kernel};
use blocktune_gpu::GpuError;
use tracing::{debug, info, warn};

use super::{Accelerator, DeviceLimits, GemmArgs};
use crate::error::{MemorySpace, Phase, Result, TrialError};
use crate::geometry::LaunchGeometry;
use crate::tracking::{AllocationTracker, TrackedAllocation};

/// Loaded kernel entry point
struct KernelFunction(CUfunction);

// SAFETY: function handles are immutable once the module is loaded and may
// be passed to cuLaunchKernel from any thread with the context current
unsafe impl Send for KernelFunction {}
unsafe impl Sync for KernelFunction {}

/// Device buffer registered with the accelerator's tracker
pub struct CudaBuffer {
    inner: GpuBuffer<f32>,
    _tracked: TrackedAllocation,
}

impl CudaBuffer {
    /// Number of elements
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Map a driver error reported by a synchronizing call
fn execution_error(phase: Phase, err: GpuError) -> TrialError {
    TrialError::Execution {
        phase,
        reason: err.to_string(),
    }
}

/// Accelerator backed by the CUDA driver API
pub struct CudaAccelerator {
    name: String,
    limits: DeviceLimits,
    memory: AllocationTracker,
    // Field order matters: the module must unload before the context is released
    function: KernelFunction,
    _module: CudaModule,
    ctx: CudaContext,
}

impl CudaAccelerator {
    /// Open device `ordinal` and load the GEMM kernel
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the driver, device, context or
    /// module cannot be brought up.
    pub fn new(ordinal: i32) -> Result<Self> {
        let unavailable = |e: GpuError| TrialError::DeviceUnavailable(e.to_string());

        let ctx = CudaContext::new(ordinal).map_err(unavailable)?;
        let name = ctx.device_name().map_err(unavailable)?;
        let attrs = ctx.attributes().map_err(unavailable)?;

        let kernel = GemmKernel::naive(1, 1, 1);
        let mut module = CudaModule::from_ptx(&ctx, &kernel.emit_ptx()).map_err(unavailable)?;
        let function = module.get_function(kernel.name()).map_err(unavailable)?;

        let limits = DeviceLimits {
            max_threads_per_block: attrs.max_threads_per_block,
            max_block_dim: attrs.max_block_dim,
            max_grid_dim: attrs.max_grid_dim,
        };
        info!(device = %name, ?limits, "CUDA accelerator ready");

        Ok(Self {
            name,
            limits,
            memory: AllocationTracker::new(),
            function: KernelFunction(function),
            _module: module,
            ctx,
        })
    }

    /// Device memory registry
    #[must_use]
    pub fn memory(&self) -> &AllocationTracker {
        &self.memory
    }

    fn bind(&self, phase: Phase) -> Result<()> {
        self.ctx
            .make_current()
            .map_err(|e| execution_error(phase, e))
    }
}

impl Accelerator for CudaAccelerator {
    type Stream = CudaStream;
    type Buffer = CudaBuffer;
    type Event = CudaEvent;

    fn name(&self) -> &str {
        &self.name
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_stream(&self) -> Result<CudaStream> {
        self.ctx
            .make_current()
            .and_then(|()| CudaStream::new(&self.ctx))
            .map_err(|e| TrialError::DeviceUnavailable(e.to_string()))
    }

    fn allocate(&self, label: &'static str, len: usize) -> Result<CudaBuffer> {
        let bytes = len.saturating_mul(std::mem::size_of::<f32>());
        let fail = |reason: String| TrialError::Allocation {
            space: MemorySpace::Device,
            buffer: label,
            bytes,
            reason,
        };

        self.ctx.make_current().map_err(|e| fail(e.to_string()))?;
        let inner = GpuBuffer::new(&self.ctx, len).map_err(|e| fail(e.to_string()))?;
        let tracked = self
            .memory
            .track(label, bytes)
            .ok_or_else(|| fail("tracker refused allocation".to_string()))?;

        debug!(buffer = label, bytes, "device buffer allocated");
        Ok(CudaBuffer {
            inner,
            _tracked: tracked,
        })
    }

    fn upload(&self, stream: &CudaStream, dst: &mut CudaBuffer, src: &[f32]) -> Result<()> {
        let fail = |e: GpuError| TrialError::Transfer {
            phase: Phase::Uploading,
            reason: e.to_string(),
        };
        self.ctx.make_current().map_err(fail)?;
        // SAFETY: src is pageable, so the driver stages it before returning;
        // the harness also keeps host buffers alive past the stream
        unsafe { dst.inner.copy_from_host_async(src, stream) }.map_err(fail)
    }

    fn download(&self, stream: &CudaStream, src: &CudaBuffer, dst: &mut [f32]) -> Result<()> {
        self.bind(Phase::Verifying)?;
        stream
            .synchronize()
            .map_err(|e| execution_error(Phase::Verifying, e))?;
        src.inner
            .copy_to_host(dst)
            .map_err(|e| TrialError::Transfer {
                phase: Phase::Verifying,
                reason: e.to_string(),
            })
    }

    fn create_event(&self) -> Result<CudaEvent> {
        self.ctx
            .make_current()
            .and_then(|()| CudaEvent::new())
            .map_err(|e| TrialError::Launch(e.to_string()))
    }

    fn record_event(&self, stream: &CudaStream, event: &CudaEvent) -> Result<()> {
        self.ctx
            .make_current()
            .and_then(|()| event.record(stream))
            .map_err(|e| TrialError::Launch(e.to_string()))
    }

    fn launch_gemm(
        &self,
        stream: &CudaStream,
        geometry: &LaunchGeometry,
        args: GemmArgs<'_, CudaBuffer>,
    ) -> Result<()> {
        self.limits.check(geometry)?;
        self.ctx
            .make_current()
            .map_err(|e| TrialError::Launch(e.to_string()))?;
        let driver = get_driver().map_err(|e| TrialError::Launch(e.to_string()))?;

        let mut a_ptr = args.a.inner.as_ptr();
        let mut b_ptr = args.b.inner.as_ptr();
        let mut c_ptr = args.c.inner.as_ptr();
        let (mut m, mut n, mut k) = (args.problem.m, args.problem.n, args.problem.k);
        let mut params: [*mut c_void; 6] = [
            std::ptr::addr_of_mut!(a_ptr).cast(),
            std::ptr::addr_of_mut!(b_ptr).cast(),
            std::ptr::addr_of_mut!(c_ptr).cast(),
            std::ptr::addr_of_mut!(m).cast(),
            std::ptr::addr_of_mut!(n).cast(),
            std::ptr::addr_of_mut!(k).cast(),
        ];

        let config = geometry.to_launch_config();
        // SAFETY: the function comes from this accelerator's module, params
        // match the kernel signature (3 x u64, 3 x u32), and the buffers are
        // owned by the caller until the stream has drained
        unsafe { stream.launch_function(driver, self.function.0, &config, &mut params) }
            .map_err(|e| TrialError::Launch(e.to_string()))
    }

    fn wait_event(&self, event: &CudaEvent, timeout: Option<Duration>) -> Result<bool> {
        self.bind(Phase::AwaitingCompletion)?;
        event.wait_timeout(timeout).map_err(|e| {
            if let GpuError::CudaDriver(_, code) = &e {
                if is_execution_fault(*code) {
                    warn!(code, "kernel faulted");
                }
            }
            execution_error(Phase::AwaitingCompletion, e)
        })
    }

    fn cancel(&self, _stream: &CudaStream) {
        warn!("running CUDA kernels cannot be preempted; buffers are freed once it finishes");
    }

    fn elapsed_ms(&self, start: &CudaEvent, stop: &CudaEvent) -> Result<f32> {
        self.bind(Phase::Measuring)?;
        stop.elapsed_since(start)
            .map_err(|e| execution_error(Phase::Measuring, e))
    }
}
