//! Blocktune: GEMM Thread-Block Shape Benchmark Harness
//!
//! **Blocktune** times one naive GEMM launch (`C = A·B`, one unit of work per
//! output element) for a caller-chosen 2-D block shape, so a tuner can
//! sweep shapes and keep the fastest.
//!
//! 1. **Harness** - buffer lifecycle, launch geometry, event timing
//! 2. **Accelerators** - simulated (CPU worker threads) or CUDA (`cuda` feature)
//! 3. **Sweep** - cartesian product of candidate dimensions with pruning
//!
//! # Design Principles
//!
//! - **Every step is fallible**: allocation, transfer, launch and sync return `Result`
//! - **RAII release**: buffers, streams and events are freed on every exit path
//! - **Per-trial streams**: concurrent trials never share ordering state
//! - **Timing only**: verification is a separate, optional phase
//!
//! # Quick Start
//!
//! ```rust
//! use blocktune::{BlockShape, Harness, SimAccelerator, TrialConfig};
//!
//! let harness = Harness::new(SimAccelerator::new(), TrialConfig::new().with_verification(true));
//! let report = harness.run(BlockShape::new(16, 16).unwrap()).unwrap();
//!
//! assert_eq!((report.geometry.grid.x, report.geometry.grid.y), (4, 4));
//! assert!(report.elapsed_ms >= 0.0);
//! ```

#![warn(missing_docs)]
// Extents are u32 on the device and usize on the host
#![allow(clippy::cast_possible_truncation)]
// f32 ↔ f64 conversions are intentional in timing and verification
#![allow(clippy::cast_precision_loss)]

pub mod device;
pub mod error;
pub mod geometry;
pub mod harness;
pub mod host;
pub mod sweep;
pub mod tracking;
pub mod verify;

pub use device::{Accelerator, DeviceLimits, FaultPlan, SimAccelerator};
pub use error::{FailureKind, Phase, Result, TrialError};
pub use geometry::{BlockShape, LaunchGeometry, ProblemSize};
pub use harness::{run_gemm_trial, Harness, TrialConfig, TrialReport};
pub use sweep::{Outcome, Sweep, SweepConfig, SweepReport};

#[cfg(feature = "cuda")]
pub use device::CudaAccelerator;

/// Accelerator selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// CPU simulation
    Sim,
    /// CUDA driver API (requires the `cuda` feature)
    Cuda,
    /// CUDA if a device is present, otherwise simulation
    #[default]
    Auto,
}

impl Backend {
    /// Resolve `Auto` to a concrete backend
    #[must_use]
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto => Self::select_best(),
            other => other,
        }
    }

    /// Select the best available backend for this machine
    #[must_use]
    pub fn select_best() -> Self {
        if blocktune_gpu::driver::cuda_available() {
            Self::Cuda
        } else {
            Self::Sim
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Sim => "sim",
            Self::Cuda => "cuda",
            Self::Auto => "auto",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sim" => Ok(Self::Sim),
            "cuda" => Ok(Self::Cuda),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown backend '{}' (expected sim, cuda or auto)", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse_roundtrip() {
        for backend in [Backend::Sim, Backend::Cuda, Backend::Auto] {
            assert_eq!(backend.to_string().parse::<Backend>(), Ok(backend));
        }
        assert!("metal".parse::<Backend>().is_err());
    }

    #[test]
    fn test_resolve_never_auto() {
        assert_ne!(Backend::Auto.resolve(), Backend::Auto);
        assert_eq!(Backend::Sim.resolve(), Backend::Sim);
    }

    #[test]
    fn test_select_best_without_cuda() {
        #[cfg(not(feature = "cuda"))]
        assert_eq!(Backend::select_best(), Backend::Sim);
    }
}
