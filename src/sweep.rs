//! Block-shape sweep
//!
//! Tries every (x, y) in the cartesian product of the candidate dimensions,
//! skipping shapes the device cannot launch, and keeps the fastest shape
//! that ran to completion.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::device::Accelerator;
use crate::error::FailureKind;
use crate::geometry::BlockShape;
use crate::harness::{Harness, TrialConfig};

/// Candidate block dimensions tried when none are given
pub const DEFAULT_DIMS: [u32; 4] = [4, 8, 16, 32];

/// Sweep configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Candidate block x extents
    pub x_dims: Vec<u32>,
    /// Candidate block y extents
    pub y_dims: Vec<u32>,
    /// Trials per candidate; the fastest counts
    pub repeats: usize,
    /// Configuration of each trial
    pub trial: TrialConfig,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            x_dims: DEFAULT_DIMS.to_vec(),
            y_dims: DEFAULT_DIMS.to_vec(),
            repeats: 1,
            trial: TrialConfig::default(),
        }
    }
}

impl SweepConfig {
    /// Default sweep: {4, 8, 16, 32} squared, one trial each
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the same candidates for x and y
    #[must_use]
    pub fn with_dims(mut self, dims: &[u32]) -> Self {
        self.x_dims = dims.to_vec();
        self.y_dims = dims.to_vec();
        self
    }

    /// Separate candidates for x and y
    #[must_use]
    pub fn with_xy_dims(mut self, x_dims: &[u32], y_dims: &[u32]) -> Self {
        self.x_dims = x_dims.to_vec();
        self.y_dims = y_dims.to_vec();
        self
    }

    /// Trials per candidate (at least 1)
    #[must_use]
    pub fn with_repeats(mut self, repeats: usize) -> Self {
        self.repeats = repeats.max(1);
        self
    }

    /// Per-trial configuration
    #[must_use]
    pub fn with_trial(mut self, trial: TrialConfig) -> Self {
        self.trial = trial;
        self
    }

    /// Finalize configuration (no-op, for builder pattern consistency)
    #[must_use]
    pub fn build(self) -> Self {
        self
    }

    /// Every candidate shape, x-major; zero extents are dropped
    #[must_use]
    pub fn candidates(&self) -> Vec<BlockShape> {
        self.x_dims
            .iter()
            .filter(|&&x| x > 0)
            .flat_map(|&x| {
                self.y_dims
                    .iter()
                    .filter(|&&y| y > 0)
                    .map(move |&y| BlockShape { x, y })
            })
            .collect()
    }
}

/// What happened to one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Ran; fastest time over the repeats
    Completed {
        /// Milliseconds
        elapsed_ms: f32,
    },
    /// Skipped: the device cannot launch this shape
    Pruned,
    /// A trial failed
    Failed {
        /// Failure category
        kind: FailureKind,
        /// Error message
        message: String,
    },
}

/// One candidate and its outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    /// Block shape
    pub shape: BlockShape,
    /// Result
    pub outcome: Outcome,
}

impl CandidateResult {
    /// Elapsed time if the candidate completed
    #[must_use]
    pub fn elapsed_ms(&self) -> Option<f32> {
        match self.outcome {
            Outcome::Completed { elapsed_ms } => Some(elapsed_ms),
            _ => None,
        }
    }
}

/// All candidate outcomes plus the winner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Outcomes in candidate order
    pub results: Vec<CandidateResult>,
    /// Fastest completed candidate
    pub best: Option<CandidateResult>,
}

impl SweepReport {
    fn from_results(results: Vec<CandidateResult>) -> Self {
        // ties go to the earlier candidate
        let best = results
            .iter()
            .filter_map(|r| r.elapsed_ms().map(|ms| (ms, r)))
            .fold(None::<(f32, &CandidateResult)>, |best, (ms, r)| match best {
                Some((best_ms, _)) if best_ms <= ms => best,
                _ => Some((ms, r)),
            })
            .map(|(_, r)| r.clone());
        Self { results, best }
    }

    /// Number of candidates with the given outcome shape
    #[must_use]
    pub fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Sweep driver
#[derive(Debug)]
pub struct Sweep<A> {
    harness: Harness<A>,
    config: SweepConfig,
}

impl<A: Accelerator> Sweep<A> {
    /// Create a sweep over `accelerator`
    pub fn new(accelerator: A, config: SweepConfig) -> Self {
        Self {
            harness: Harness::new(accelerator, config.trial.clone()),
            config,
        }
    }

    /// Underlying harness
    pub fn harness(&self) -> &Harness<A> {
        &self.harness
    }

    /// Sweep configuration
    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    fn evaluate(&self, shape: BlockShape) -> CandidateResult {
        let limits = self.harness.accelerator().limits();
        if !limits.admits(shape) {
            info!(%shape, threads = shape.threads(), "pruned");
            return CandidateResult {
                shape,
                outcome: Outcome::Pruned,
            };
        }

        // at least one run, and the harness rejects non-finite times
        let runs = self.config.repeats.max(1);
        let fastest = (0..runs).try_fold(f32::INFINITY, |fastest, _| {
            self.harness
                .run(shape)
                .map(|report| fastest.min(report.elapsed_ms))
        });
        let outcome = match fastest {
            Ok(elapsed_ms) => Outcome::Completed { elapsed_ms },
            Err(e) => {
                warn!(%shape, error = %e, "candidate failed");
                Outcome::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                }
            }
        };
        CandidateResult { shape, outcome }
    }

    /// Run every candidate in order on the calling thread
    #[instrument(skip(self), fields(backend = self.harness.accelerator().name()))]
    pub fn run(&self) -> SweepReport {
        let results = self
            .config
            .candidates()
            .into_iter()
            .map(|shape| self.evaluate(shape))
            .collect();
        let report = SweepReport::from_results(results);
        if let Some(best) = &report.best {
            info!(shape = %best.shape, elapsed_ms = best.elapsed_ms(), "sweep finished");
        }
        report
    }

    /// Run candidates on the rayon pool, each trial on its own stream
    ///
    /// Results keep candidate order.
    #[cfg(feature = "parallel")]
    #[instrument(skip(self), fields(backend = self.harness.accelerator().name()))]
    pub fn run_parallel(&self) -> SweepReport {
        use rayon::prelude::*;

        let results = self
            .config
            .candidates()
            .into_par_iter()
            .map(|shape| self.evaluate(shape))
            .collect();
        SweepReport::from_results(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceLimits, FaultPlan, SimAccelerator};
    use crate::geometry::ProblemSize;

    fn small_trial() -> TrialConfig {
        TrialConfig::new().with_problem(ProblemSize::square(16).unwrap())
    }

    #[test]
    fn test_default_candidates() {
        let cfg = SweepConfig::default();
        let shapes = cfg.candidates();
        assert_eq!(shapes.len(), 16);
        assert_eq!(shapes[0], BlockShape { x: 4, y: 4 });
        assert_eq!(shapes[1], BlockShape { x: 4, y: 8 });
        assert_eq!(shapes[15], BlockShape { x: 32, y: 32 });
    }

    #[test]
    fn test_zero_dims_dropped() {
        let cfg = SweepConfig::new().with_xy_dims(&[0, 2], &[3, 0]);
        assert_eq!(cfg.candidates(), vec![BlockShape { x: 2, y: 3 }]);
    }

    #[test]
    fn test_repeats_at_least_one() {
        assert_eq!(SweepConfig::new().with_repeats(0).repeats, 1);
    }

    #[test]
    fn test_prunes_over_limit() {
        let sim = SimAccelerator::new()
            .with_limits(DeviceLimits::default().with_max_threads_per_block(256));
        let sweep = Sweep::new(sim, SweepConfig::new().with_trial(small_trial()));
        let report = sweep.run();

        // 16x32, 32x16, 32x32 exceed 256 threads
        assert_eq!(report.count(|o| matches!(o, Outcome::Pruned)), 3);
        assert_eq!(report.count(|o| matches!(o, Outcome::Completed { .. })), 13);
        let best = report.best.unwrap();
        assert!(best.shape.threads() <= 256);
    }

    #[test]
    fn test_failed_candidates_never_best() {
        let sim = SimAccelerator::new().with_faults(FaultPlan::new().with_launch_failure());
        let sweep = Sweep::new(
            sim,
            SweepConfig::new()
                .with_dims(&[4, 8])
                .with_trial(small_trial()),
        );
        let report = sweep.run();
        assert!(report.best.is_none());
        assert!(report.results.iter().all(|r| matches!(
            r.outcome,
            Outcome::Failed {
                kind: FailureKind::LaunchFailure,
                ..
            }
        )));
    }

    #[test]
    fn test_admitted_candidate_never_reported_pruned() {
        let sweep = Sweep::new(
            SimAccelerator::new(),
            SweepConfig::new()
                .with_dims(&[8])
                .with_repeats(4)
                .with_trial(small_trial()),
        );
        let result = sweep.evaluate(BlockShape { x: 8, y: 8 });
        assert!(result.elapsed_ms().is_some_and(f32::is_finite));
        assert_eq!(sweep.harness().accelerator().streams_created(), 4);
    }

    #[test]
    fn test_failure_stops_remaining_repeats() {
        let sim = SimAccelerator::new().with_faults(FaultPlan::new().with_launch_failure());
        let sweep = Sweep::new(
            sim,
            SweepConfig::new()
                .with_dims(&[8])
                .with_repeats(3)
                .with_trial(small_trial()),
        );
        let result = sweep.evaluate(BlockShape { x: 8, y: 8 });
        assert!(matches!(result.outcome, Outcome::Failed { .. }));
        assert_eq!(sweep.harness().accelerator().streams_created(), 1);
    }

    #[test]
    fn test_best_is_minimum() {
        let results = vec![
            CandidateResult {
                shape: BlockShape { x: 4, y: 4 },
                outcome: Outcome::Completed { elapsed_ms: 2.0 },
            },
            CandidateResult {
                shape: BlockShape { x: 8, y: 8 },
                outcome: Outcome::Failed {
                    kind: FailureKind::TimedOut,
                    message: String::new(),
                },
            },
            CandidateResult {
                shape: BlockShape { x: 16, y: 8 },
                outcome: Outcome::Completed { elapsed_ms: 0.5 },
            },
            CandidateResult {
                shape: BlockShape { x: 8, y: 16 },
                outcome: Outcome::Completed { elapsed_ms: 0.5 },
            },
        ];
        let report = SweepReport::from_results(results);
        assert_eq!(report.best.unwrap().shape, BlockShape { x: 16, y: 8 });
    }

    #[test]
    fn test_outcome_json_tagged() {
        let json = serde_json::to_string(&Outcome::Pruned).unwrap();
        assert_eq!(json, r#"{"status":"pruned"}"#);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_keeps_order() {
        let sweep = Sweep::new(
            SimAccelerator::new(),
            SweepConfig::new().with_trial(small_trial().with_verification(true)),
        );
        let report = sweep.run_parallel();
        let shapes: Vec<_> = report.results.iter().map(|r| r.shape).collect();
        assert_eq!(shapes, sweep.config().candidates());
        assert!(report.results.iter().all(|r| r.elapsed_ms().is_some()));
    }
}
