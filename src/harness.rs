//! Benchmark Harness
//!
//! Runs one GEMM trial for one block shape and reports the device time
//! between two events recorded around the launch.
//!
//! Each trial owns its host buffers, device buffers, stream and events.
//! They are declared so that Rust's reverse drop order releases events, then
//! the stream, then device buffers, then host buffers, whichever phase the
//! trial leaves from.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::device::{Accelerator, GemmArgs, SimAccelerator};
use crate::error::{Phase, Result, TrialError};
use crate::geometry::{BlockShape, LaunchGeometry, ProblemSize};
use crate::host::HostMatrices;
use crate::tracking::AllocationTracker;
use crate::verify::{verify_output, VerificationReport};

/// Per-trial configuration
///
/// # Examples
///
/// ```
/// use blocktune::{ProblemSize, TrialConfig};
/// use std::time::Duration;
///
/// let config = TrialConfig::new()
///     .with_problem(ProblemSize::square(128).unwrap())
///     .with_timeout(Duration::from_secs(2))
///     .with_verification(true)
///     .build();
/// assert!(config.verify);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialConfig {
    /// GEMM extents
    pub problem: ProblemSize,
    /// Deadline for kernel completion (None = wait forever)
    pub timeout: Option<Duration>,
    /// Download C and check it after measurement
    pub verify: bool,
    /// Keep a copy of C in the report
    pub capture_output: bool,
    /// Cap on host bytes held by trials of this harness
    pub host_memory_limit: Option<usize>,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            problem: ProblemSize::default(),
            timeout: None,
            verify: false,
            capture_output: false,
            host_memory_limit: None,
        }
    }
}

impl TrialConfig {
    /// Default configuration: 64³, no timeout, no verification
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set problem size
    #[must_use]
    pub fn with_problem(mut self, problem: ProblemSize) -> Self {
        self.problem = problem;
        self
    }

    /// Bound the wait for completion
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable or disable verification
    #[must_use]
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Enable or disable capturing C
    #[must_use]
    pub fn with_output_capture(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    /// Limit host memory
    #[must_use]
    pub fn with_host_memory_limit(mut self, bytes: usize) -> Self {
        self.host_memory_limit = Some(bytes);
        self
    }

    /// Finalize configuration (no-op, for builder pattern consistency)
    #[must_use]
    pub fn build(self) -> Self {
        self
    }
}

/// Result of one successful trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialReport {
    /// Block shape tried
    pub shape: BlockShape,
    /// Grid derived for it
    pub geometry: LaunchGeometry,
    /// Device time between start and stop events
    pub elapsed_ms: f32,
    /// Present when verification ran
    pub verification: Option<VerificationReport>,
    /// C as read back, when capture was requested
    #[serde(skip)]
    pub output: Option<Vec<f32>>,
}

/// Runs trials on one accelerator
#[derive(Debug)]
pub struct Harness<A> {
    accelerator: A,
    config: TrialConfig,
    host: AllocationTracker,
}

impl<A: Accelerator> Harness<A> {
    /// Create a harness
    pub fn new(accelerator: A, config: TrialConfig) -> Self {
        let host = match config.host_memory_limit {
            Some(bytes) => AllocationTracker::with_capacity(bytes),
            None => AllocationTracker::new(),
        };
        Self {
            accelerator,
            config,
            host,
        }
    }

    /// Backend in use
    pub fn accelerator(&self) -> &A {
        &self.accelerator
    }

    /// Trial configuration
    pub fn config(&self) -> &TrialConfig {
        &self.config
    }

    /// Host memory registry
    pub fn host_memory(&self) -> &AllocationTracker {
        &self.host
    }

    /// Run a trial from caller-supplied signed extents
    ///
    /// # Errors
    ///
    /// Returns `InvalidBlockShape` before acquiring anything if either
    /// extent is not positive, otherwise as [`Harness::run`].
    pub fn run_dims(&self, block_x: i64, block_y: i64) -> Result<TrialReport> {
        self.run(BlockShape::new(block_x, block_y)?)
    }

    /// Run one trial
    ///
    /// # Errors
    ///
    /// Returns the first failure, tagged with its phase. Everything the
    /// trial acquired is released before this returns.
    #[instrument(
        skip(self, shape),
        fields(backend = self.accelerator.name(), problem = %self.config.problem, shape = %shape)
    )]
    pub fn run(&self, shape: BlockShape) -> Result<TrialReport> {
        let problem = self.config.problem;
        problem.validate()?;
        shape.validate()?;
        let acc = &self.accelerator;

        debug!(phase = %Phase::Allocating, "acquiring buffers");
        let mut host = HostMatrices::new(problem, &self.host)?;
        let mut a = acc.allocate("a", problem.a_len())?;
        let mut b = acc.allocate("b", problem.b_len())?;
        let c = acc.allocate("c", problem.c_len())?;
        let stream = acc.create_stream()?;

        debug!(phase = %Phase::Uploading, "uploading A and B");
        acc.upload(&stream, &mut a, &host.a)?;
        acc.upload(&stream, &mut b, &host.b)?;

        let geometry = LaunchGeometry::derive(problem, shape);
        debug!(
            phase = %Phase::Launching,
            %geometry,
            total_units = geometry.total_units(),
            idle_units = geometry.idle_units(),
            "launching"
        );
        let start = acc.create_event()?;
        let stop = acc.create_event()?;
        acc.record_event(&stream, &start)?;
        acc.launch_gemm(
            &stream,
            &geometry,
            GemmArgs {
                a: &a,
                b: &b,
                c: &c,
                problem,
            },
        )?;
        acc.record_event(&stream, &stop)?;

        debug!(phase = %Phase::AwaitingCompletion, timeout = ?self.config.timeout, "waiting");
        if !acc.wait_event(&stop, self.config.timeout)? {
            acc.cancel(&stream);
            // round up so a sub-millisecond deadline never reports 0 ms
            let timeout_ms = self.config.timeout.map_or(0, |t| {
                u64::try_from(t.as_micros().div_ceil(1000)).unwrap_or(u64::MAX)
            });
            warn!(timeout_ms, "trial timed out");
            return Err(TrialError::TimedOut { timeout_ms });
        }

        debug!(phase = %Phase::Measuring, "reading events");
        let elapsed_ms = acc.elapsed_ms(&start, &stop)?;
        if !elapsed_ms.is_finite() || elapsed_ms < 0.0 {
            return Err(TrialError::Execution {
                phase: Phase::Measuring,
                reason: format!("invalid elapsed time {} ms", elapsed_ms),
            });
        }

        let mut verification = None;
        let mut output = None;
        if self.config.verify || self.config.capture_output {
            debug!(phase = %Phase::Verifying, "downloading C");
            acc.download(&stream, &c, &mut host.c)?;
            if self.config.verify {
                verification = Some(verify_output(problem, &host.c)?);
            }
            if self.config.capture_output {
                output = Some(host.c.to_vec());
            }
        }

        debug!(phase = %Phase::Releasing, "releasing buffers");
        info!(elapsed_ms, "trial complete");
        Ok(TrialReport {
            shape,
            geometry,
            elapsed_ms,
            verification,
            output,
        })
    }
}

/// Run one trial with the default configuration and return elapsed ms
///
/// Uses the CUDA device when built with `cuda` and one is present, the
/// simulated accelerator otherwise.
///
/// # Errors
///
/// Returns `InvalidBlockShape` if either extent is not positive, or the
/// failure of whichever phase failed.
///
/// # Examples
///
/// ```
/// let ms = blocktune::run_gemm_trial(16, 16).unwrap();
/// assert!(ms >= 0.0);
///
/// assert!(blocktune::run_gemm_trial(0, 16).is_err());
/// ```
pub fn run_gemm_trial(block_x: i32, block_y: i32) -> Result<f32> {
    let shape = BlockShape::new(i64::from(block_x), i64::from(block_y))?;

    #[cfg(feature = "cuda")]
    if blocktune_gpu::driver::cuda_available() {
        let accelerator = crate::device::CudaAccelerator::new(0)?;
        return Harness::new(accelerator, TrialConfig::default())
            .run(shape)
            .map(|report| report.elapsed_ms);
    }

    Harness::new(SimAccelerator::new(), TrialConfig::default())
        .run(shape)
        .map(|report| report.elapsed_ms)
}
