//! Sweep Tests
//!
//! Pruning, failure recording and best-shape selection over the simulated
//! accelerator.

use std::time::Duration;

use blocktune::device::{DeviceLimits, FaultPlan, SimAccelerator};
use blocktune::sweep::CandidateResult;
use blocktune::{
    BlockShape, FailureKind, Outcome, ProblemSize, Sweep, SweepConfig, TrialConfig,
};

fn trial() -> TrialConfig {
    TrialConfig::new()
        .with_problem(ProblemSize::square(32).unwrap())
        .with_verification(true)
}

#[test]
fn test_default_sweep_runs_all_sixteen() {
    let sweep = Sweep::new(SimAccelerator::new(), SweepConfig::new().with_trial(trial()));
    let report = sweep.run();

    assert_eq!(report.results.len(), 16);
    // 32x32 = 1024 threads is still launchable
    assert_eq!(report.count(|o| matches!(o, Outcome::Completed { .. })), 16);

    let best = report.best.clone().unwrap();
    let fastest = report
        .results
        .iter()
        .filter_map(CandidateResult::elapsed_ms)
        .fold(f32::INFINITY, f32::min);
    assert_eq!(best.elapsed_ms(), Some(fastest));
    assert_eq!(sweep.harness().accelerator().memory().live_allocations(), 0);
}

#[test]
fn test_oversized_candidates_pruned_without_running() {
    let sweep = Sweep::new(
        SimAccelerator::new(),
        SweepConfig::new()
            .with_dims(&[16, 32, 64])
            .with_trial(trial()),
    );
    let report = sweep.run();

    let pruned: Vec<BlockShape> = report
        .results
        .iter()
        .filter(|r| r.outcome == Outcome::Pruned)
        .map(|r| r.shape)
        .collect();
    assert_eq!(
        pruned,
        vec![
            BlockShape { x: 32, y: 64 },
            BlockShape { x: 64, y: 32 },
            BlockShape { x: 64, y: 64 },
        ]
    );
    // 16x64 and 64x16 are exactly 1024 threads and still run
    assert!(report
        .results
        .iter()
        .any(|r| r.shape == BlockShape { x: 16, y: 64 } && r.elapsed_ms().is_some()));
    // only admitted shapes reached the device: 6 trials x 3 buffers
    assert_eq!(
        sweep.harness().accelerator().memory().total_allocations(),
        6 * 3
    );
}

#[test]
fn test_limits_from_device_drive_pruning() {
    let sim =
        SimAccelerator::new().with_limits(DeviceLimits::default().with_max_threads_per_block(64));
    let sweep = Sweep::new(
        sim,
        SweepConfig::new()
            .with_dims(&[4, 8, 16])
            .with_trial(trial()),
    );
    let report = sweep.run();
    for result in &report.results {
        let admitted = result.shape.threads() <= 64;
        assert_eq!(result.outcome != Outcome::Pruned, admitted, "{}", result.shape);
    }
}

#[test]
fn test_timeouts_recorded_as_failed() {
    let sim = SimAccelerator::new()
        .with_faults(FaultPlan::new().with_execution_delay(Duration::from_secs(60)));
    let sweep = Sweep::new(
        sim,
        SweepConfig::new()
            .with_dims(&[8])
            .with_trial(trial().with_timeout(Duration::from_millis(10))),
    );
    let report = sweep.run();

    assert!(report.best.is_none());
    match &report.results[0].outcome {
        Outcome::Failed { kind, message } => {
            assert_eq!(*kind, FailureKind::TimedOut);
            assert!(message.contains("10 ms"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn test_repeats_keep_minimum() {
    let sweep = Sweep::new(
        SimAccelerator::new(),
        SweepConfig::new()
            .with_xy_dims(&[8], &[4, 8])
            .with_repeats(3)
            .with_trial(trial()),
    );
    let report = sweep.run();
    assert_eq!(report.results.len(), 2);
    // 2 candidates x 3 repeats
    assert_eq!(sweep.harness().accelerator().streams_created(), 6);
    assert!(report.best.is_some());
}

#[test]
fn test_report_json() {
    let sweep = Sweep::new(
        SimAccelerator::new(),
        SweepConfig::new().with_dims(&[4, 64]).with_trial(trial()),
    );
    let report = sweep.run();
    let json = serde_json::to_value(&report).unwrap();
    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 4);
    assert_eq!(results[0]["outcome"]["status"], "completed");
    assert_eq!(results[3]["outcome"]["status"], "pruned");
    assert!(json["best"]["outcome"]["elapsed_ms"].is_number());
}
