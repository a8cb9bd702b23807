//! Simulated accelerator
//!
//! Executes the GEMM unit body on the CPU, block by block over the full
//! grid, including the over-provisioned units that do nothing. Each stream
//! is a worker thread draining a command queue in submission order, and an
//! event is stamped when the worker reaches it. A fault on a stream is
//! sticky: every later command on it fails with the same message.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use blocktune_gpu::kernels::{GemmKernel, UnitIndex};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::{Accelerator, DeviceLimits, GemmArgs};
use crate::error::{MemorySpace, Phase, Result, TrialError};
use crate::geometry::LaunchGeometry;
use crate::tracking::{AllocationTracker, TrackedAllocation};

/// Device memory capacity when none is configured (1 GiB)
const DEFAULT_MEMORY_BYTES: usize = 1 << 30;

/// Granularity of cancellable sleeps
const SLICE: Duration = Duration::from_millis(1);

type DeviceMemory = Arc<Mutex<Vec<f32>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Fault Injection
// ============================================================================

/// Faults to inject into a [`SimAccelerator`]
///
/// All faults are disabled by default.
///
/// # Examples
///
/// ```
/// use blocktune::device::FaultPlan;
/// use std::time::Duration;
///
/// let plan = FaultPlan::new()
///     .with_allocation_failure_at(2)
///     .with_execution_delay(Duration::from_millis(5))
///     .build();
/// assert_eq!(plan.fail_allocation_at, Some(2));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Fail the Nth device allocation (1-based) on this accelerator
    pub fail_allocation_at: Option<usize>,
    /// Reject every upload
    pub fail_upload: bool,
    /// Reject every launch
    pub fail_launch: bool,
    /// Fault partway through every kernel
    pub fault_during_execution: bool,
    /// Fail every elapsed-time query
    pub fail_timing: bool,
    /// Extra time every kernel takes before it starts computing
    pub execution_delay: Option<Duration>,
}

impl FaultPlan {
    /// No faults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `n`th device allocation (1-based)
    #[must_use]
    pub fn with_allocation_failure_at(mut self, n: usize) -> Self {
        self.fail_allocation_at = Some(n);
        self
    }

    /// Reject uploads
    #[must_use]
    pub fn with_upload_failure(mut self) -> Self {
        self.fail_upload = true;
        self
    }

    /// Reject launches
    #[must_use]
    pub fn with_launch_failure(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    /// Fault in the middle of the grid
    #[must_use]
    pub fn with_execution_fault(mut self) -> Self {
        self.fault_during_execution = true;
        self
    }

    /// Fail elapsed-time queries
    #[must_use]
    pub fn with_timing_failure(mut self) -> Self {
        self.fail_timing = true;
        self
    }

    /// Slow every kernel down by `delay`
    #[must_use]
    pub fn with_execution_delay(mut self, delay: Duration) -> Self {
        self.execution_delay = Some(delay);
        self
    }

    /// Finalize configuration (no-op, for builder pattern consistency)
    #[must_use]
    pub fn build(self) -> Self {
        self
    }
}

// ============================================================================
// Buffers, Events, Statistics
// ============================================================================

/// Work counts from the most recent completed launch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchStats {
    /// Units executed
    pub total_units: u64,
    /// Units that wrote their cell
    pub writes: u64,
    /// Units outside C that did nothing
    pub idle_units: u64,
    /// Distinct cells written
    pub cells_written: u64,
    /// Writes to a cell that had already been written
    pub duplicate_writes: u64,
}

/// Simulated device buffer
#[derive(Debug)]
pub struct SimBuffer {
    memory: DeviceMemory,
    len: usize,
    _tracked: TrackedAllocation,
}

impl SimBuffer {
    /// Number of elements
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug, Default)]
struct EventState {
    recorded: bool,
    completed_at: Option<Instant>,
    error: Option<String>,
}

#[derive(Debug, Default)]
struct EventInner {
    state: Mutex<EventState>,
    done: Condvar,
}

impl EventInner {
    fn complete(&self, outcome: std::result::Result<Instant, String>) {
        let mut state = lock(&self.state);
        match outcome {
            Ok(at) => state.completed_at = Some(at),
            Err(e) => state.error = Some(e),
        }
        self.done.notify_all();
    }
}

/// Simulated event
#[derive(Debug, Default)]
pub struct SimEvent {
    inner: Arc<EventInner>,
}

impl SimEvent {
    fn completed_at(&self) -> Option<Instant> {
        lock(&self.inner.state).completed_at
    }
}

// ============================================================================
// Streams
// ============================================================================

enum Command {
    Upload {
        dst: DeviceMemory,
        data: Vec<f32>,
    },
    Download {
        src: DeviceMemory,
        reply: mpsc::Sender<std::result::Result<Vec<f32>, String>>,
    },
    Launch(LaunchJob),
    Record(Arc<EventInner>),
}

struct LaunchJob {
    kernel: GemmKernel,
    geometry: LaunchGeometry,
    a: DeviceMemory,
    b: DeviceMemory,
    c: DeviceMemory,
    fault: bool,
    delay: Option<Duration>,
    stats: Arc<Mutex<Option<LaunchStats>>>,
}

impl LaunchJob {
    fn run(self, cancel: &AtomicBool) -> std::result::Result<(), String> {
        if let Some(delay) = self.delay {
            sleep_cancellable(delay, cancel)?;
        }

        let a = lock(&self.a);
        let b_guard;
        let b: &[f32] = if Arc::ptr_eq(&self.a, &self.b) {
            &a
        } else {
            b_guard = lock(&self.b);
            &b_guard
        };
        let mut c = lock(&self.c);

        let g = self.geometry;
        let n = u64::from(g.problem.n);
        let total_blocks = u64::from(g.grid.x) * u64::from(g.grid.y);
        let mut written = vec![false; c.len()];
        let mut stats = LaunchStats::default();

        for by in 0..g.grid.y {
            for bx in 0..g.grid.x {
                if cancel.load(Ordering::Acquire) {
                    return Err("kernel cancelled".to_string());
                }
                let linear = u64::from(by) * u64::from(g.grid.x) + u64::from(bx);
                if self.fault && linear == total_blocks / 2 {
                    return Err(format!(
                        "illegal address in block ({}, {}) (injected)",
                        bx, by
                    ));
                }

                for ty in 0..g.block.y {
                    for tx in 0..g.block.x {
                        let unit = UnitIndex {
                            block_idx: (bx, by),
                            block_dim: (g.block.x, g.block.y),
                            thread_idx: (tx, ty),
                        };
                        stats.total_units += 1;
                        if self.kernel.execute_unit(&a, b, &mut c, unit) {
                            stats.writes += 1;
                            let (row, col) = unit.output_coord();
                            let cell = &mut written[(row * n + col) as usize];
                            if *cell {
                                stats.duplicate_writes += 1;
                            } else {
                                *cell = true;
                                stats.cells_written += 1;
                            }
                        } else {
                            stats.idle_units += 1;
                        }
                    }
                }
            }
        }

        trace!(?stats, "simulated launch finished");
        *lock(&self.stats) = Some(stats);
        Ok(())
    }
}

fn sleep_cancellable(total: Duration, cancel: &AtomicBool) -> std::result::Result<(), String> {
    let deadline = Instant::now() + total;
    loop {
        if cancel.load(Ordering::Acquire) {
            return Err("kernel cancelled".to_string());
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::sleep(SLICE.min(deadline - now));
    }
}

fn run_worker(commands: mpsc::Receiver<Command>, cancel: Arc<AtomicBool>) {
    let mut fault: Option<String> = None;

    for command in commands {
        if fault.is_none() && cancel.load(Ordering::Acquire) {
            fault = Some("stream cancelled".to_string());
        }
        match command {
            Command::Upload { dst, data } => {
                if fault.is_none() {
                    lock(&dst).copy_from_slice(&data);
                }
            }
            Command::Download { src, reply } => {
                let outcome = match &fault {
                    Some(e) => Err(e.clone()),
                    None => Ok(lock(&src).clone()),
                };
                let _ = reply.send(outcome);
            }
            Command::Launch(job) => {
                if fault.is_none() {
                    if let Err(e) = job.run(&cancel) {
                        warn!(error = %e, "simulated kernel faulted");
                        fault = Some(e);
                    }
                }
            }
            Command::Record(event) => match &fault {
                Some(e) => event.complete(Err(e.clone())),
                None => event.complete(Ok(Instant::now())),
            },
        }
    }
}

/// Simulated stream: a worker thread with an ordered command queue
///
/// Dropping the stream cancels outstanding work and joins the worker.
#[derive(Debug)]
pub struct SimStream {
    id: u64,
    sender: Option<mpsc::Sender<Command>>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimStream {
    fn spawn(id: u64) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);
        let worker = thread::Builder::new()
            .name(format!("blocktune-sim-stream-{}", id))
            .spawn(move || run_worker(receiver, worker_cancel))?;

        debug!(stream = id, "simulated stream started");
        Ok(Self {
            id,
            sender: Some(sender),
            cancel,
            worker: Some(worker),
        })
    }

    fn submit(&self, command: Command) -> std::result::Result<(), String> {
        self.sender
            .as_ref()
            .ok_or_else(|| "stream closed".to_string())?
            .send(command)
            .map_err(|_| format!("stream {} worker has stopped", self.id))
    }

    /// Stream identifier
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether cancellation has been requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

impl Drop for SimStream {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Release);
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        debug!(stream = self.id, "simulated stream stopped");
    }
}

// ============================================================================
// Accelerator
// ============================================================================

/// CPU-backed accelerator
#[derive(Debug)]
pub struct SimAccelerator {
    limits: DeviceLimits,
    memory: AllocationTracker,
    faults: FaultPlan,
    allocations: AtomicUsize,
    streams: AtomicU64,
    last_launch: Arc<Mutex<Option<LaunchStats>>>,
}

impl Default for SimAccelerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SimAccelerator {
    /// Default limits, 1 GiB of memory, no faults
    #[must_use]
    pub fn new() -> Self {
        Self {
            limits: DeviceLimits::default(),
            memory: AllocationTracker::with_capacity(DEFAULT_MEMORY_BYTES),
            faults: FaultPlan::default(),
            allocations: AtomicUsize::new(0),
            streams: AtomicU64::new(0),
            last_launch: Arc::default(),
        }
    }

    /// Set launch limits
    #[must_use]
    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set device memory capacity in bytes
    #[must_use]
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory = AllocationTracker::with_capacity(bytes);
        self
    }

    /// Set injected faults
    #[must_use]
    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    /// Device memory registry
    #[must_use]
    pub fn memory(&self) -> &AllocationTracker {
        &self.memory
    }

    /// Statistics of the most recent launch that ran to completion
    #[must_use]
    pub fn last_launch(&self) -> Option<LaunchStats> {
        *lock(&self.last_launch)
    }

    /// Streams created so far
    #[must_use]
    pub fn streams_created(&self) -> u64 {
        self.streams.load(Ordering::Relaxed)
    }
}

impl Accelerator for SimAccelerator {
    type Stream = SimStream;
    type Buffer = SimBuffer;
    type Event = SimEvent;

    fn name(&self) -> &str {
        "sim"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_stream(&self) -> Result<SimStream> {
        let id = self.streams.fetch_add(1, Ordering::Relaxed);
        SimStream::spawn(id).map_err(|e| {
            TrialError::DeviceUnavailable(format!("cannot start stream worker: {}", e))
        })
    }

    fn allocate(&self, label: &'static str, len: usize) -> Result<SimBuffer> {
        let nth = self.allocations.fetch_add(1, Ordering::Relaxed) + 1;
        let bytes = len.saturating_mul(std::mem::size_of::<f32>());
        let fail = |reason: &str| TrialError::Allocation {
            space: MemorySpace::Device,
            buffer: label,
            bytes,
            reason: reason.to_string(),
        };

        if self.faults.fail_allocation_at == Some(nth) {
            return Err(fail("injected allocation failure"));
        }
        let tracked = self
            .memory
            .track(label, bytes)
            .ok_or_else(|| fail("device memory exhausted"))?;

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|e| fail(&e.to_string()))?;
        data.resize(len, 0.0);

        trace!(buffer = label, bytes, "device buffer allocated");
        Ok(SimBuffer {
            memory: Arc::new(Mutex::new(data)),
            len,
            _tracked: tracked,
        })
    }

    fn upload(&self, stream: &SimStream, dst: &mut SimBuffer, src: &[f32]) -> Result<()> {
        let fail = |reason: String| TrialError::Transfer {
            phase: Phase::Uploading,
            reason,
        };
        if self.faults.fail_upload {
            return Err(fail("injected transfer failure".to_string()));
        }
        if src.len() != dst.len {
            return Err(fail(format!(
                "length mismatch: host {} vs device {}",
                src.len(),
                dst.len
            )));
        }
        stream
            .submit(Command::Upload {
                dst: Arc::clone(&dst.memory),
                data: src.to_vec(),
            })
            .map_err(fail)
    }

    fn download(&self, stream: &SimStream, src: &SimBuffer, dst: &mut [f32]) -> Result<()> {
        let fail = |reason: String| TrialError::Transfer {
            phase: Phase::Verifying,
            reason,
        };
        if dst.len() != src.len {
            return Err(fail(format!(
                "length mismatch: host {} vs device {}",
                dst.len(),
                src.len
            )));
        }

        let (reply, response) = mpsc::channel();
        stream
            .submit(Command::Download {
                src: Arc::clone(&src.memory),
                reply,
            })
            .map_err(fail)?;
        let data = response
            .recv()
            .map_err(|_| fail("stream worker dropped the download".to_string()))?
            .map_err(fail)?;
        dst.copy_from_slice(&data);
        Ok(())
    }

    fn create_event(&self) -> Result<SimEvent> {
        Ok(SimEvent::default())
    }

    fn record_event(&self, stream: &SimStream, event: &SimEvent) -> Result<()> {
        {
            let mut state = lock(&event.inner.state);
            *state = EventState {
                recorded: true,
                ..EventState::default()
            };
        }
        stream
            .submit(Command::Record(Arc::clone(&event.inner)))
            .map_err(TrialError::Launch)
    }

    fn launch_gemm(
        &self,
        stream: &SimStream,
        geometry: &LaunchGeometry,
        args: GemmArgs<'_, SimBuffer>,
    ) -> Result<()> {
        if self.faults.fail_launch {
            return Err(TrialError::Launch("injected launch failure".to_string()));
        }
        self.limits.check(geometry)?;

        let problem = args.problem;
        if geometry.problem != problem {
            return Err(TrialError::Launch(format!(
                "geometry derived for {} but launched with {}",
                geometry.problem, problem
            )));
        }
        for (name, buf, expected) in [
            ("a", args.a, problem.a_len()),
            ("b", args.b, problem.b_len()),
            ("c", args.c, problem.c_len()),
        ] {
            if buf.len != expected {
                return Err(TrialError::Launch(format!(
                    "buffer {} holds {} elements, problem {} needs {}",
                    name, buf.len, problem, expected
                )));
            }
        }
        if Arc::ptr_eq(&args.c.memory, &args.a.memory)
            || Arc::ptr_eq(&args.c.memory, &args.b.memory)
        {
            return Err(TrialError::Launch(
                "output buffer aliases an input buffer".to_string(),
            ));
        }

        *lock(&self.last_launch) = None;
        let job = LaunchJob {
            kernel: GemmKernel::naive(problem.m, problem.n, problem.k),
            geometry: *geometry,
            a: Arc::clone(&args.a.memory),
            b: Arc::clone(&args.b.memory),
            c: Arc::clone(&args.c.memory),
            fault: self.faults.fault_during_execution,
            delay: self.faults.execution_delay,
            stats: Arc::clone(&self.last_launch),
        };
        trace!(stream = stream.id, %geometry, "launch queued");
        stream.submit(Command::Launch(job)).map_err(TrialError::Launch)
    }

    fn wait_event(&self, event: &SimEvent, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = lock(&event.inner.state);
        if !state.recorded {
            return Err(TrialError::Execution {
                phase: Phase::AwaitingCompletion,
                reason: "event was never recorded".to_string(),
            });
        }

        while state.completed_at.is_none() && state.error.is_none() {
            match deadline {
                None => {
                    state = event
                        .inner
                        .done
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    state = event
                        .inner
                        .done
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }

        match &state.error {
            Some(e) => Err(TrialError::Execution {
                phase: Phase::AwaitingCompletion,
                reason: e.clone(),
            }),
            None => Ok(true),
        }
    }

    fn cancel(&self, stream: &SimStream) {
        warn!(stream = stream.id, "cancelling simulated stream");
        stream.cancel.store(true, Ordering::Release);
    }

    fn elapsed_ms(&self, start: &SimEvent, stop: &SimEvent) -> Result<f32> {
        let fail = |reason: &str| TrialError::Execution {
            phase: Phase::Measuring,
            reason: reason.to_string(),
        };
        if self.faults.fail_timing {
            return Err(fail("injected timing failure"));
        }
        match (start.completed_at(), stop.completed_at()) {
            (Some(t0), Some(t1)) => Ok(t1.saturating_duration_since(t0).as_secs_f32() * 1000.0),
            _ => Err(fail("both events must complete before timing")),
        }
    }
}
