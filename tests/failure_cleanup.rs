//! Failure Cleanup Tests
//!
//! Every failure kind must surface as an error tagged with its phase, and
//! leave zero live host and device allocations behind.

use std::time::{Duration, Instant};

use blocktune::device::{DeviceLimits, FaultPlan, SimAccelerator};
use blocktune::error::MemorySpace;
use blocktune::{BlockShape, FailureKind, Harness, Phase, ProblemSize, TrialConfig, TrialError};

const SHAPE: BlockShape = BlockShape { x: 16, y: 16 };

fn assert_clean(harness: &Harness<SimAccelerator>) {
    assert_eq!(
        harness.host_memory().live_allocations(),
        0,
        "host buffers still live: {:?}",
        harness.host_memory().live_labels()
    );
    assert_eq!(
        harness.accelerator().memory().live_allocations(),
        0,
        "device buffers still live: {:?}",
        harness.accelerator().memory().live_labels()
    );
}

fn faulty(faults: FaultPlan, config: TrialConfig) -> Harness<SimAccelerator> {
    Harness::new(SimAccelerator::new().with_faults(faults), config)
}

#[test]
fn test_invalid_shape_acquires_nothing() {
    let harness = Harness::new(SimAccelerator::new(), TrialConfig::new());
    for (x, y) in [(0, 16), (16, 0), (-1, -1)] {
        let err = harness.run_dims(x, y).unwrap_err();
        assert_eq!(err.kind(), FailureKind::LaunchFailure);
        assert_eq!(err, TrialError::InvalidBlockShape { x, y });
    }
    assert_eq!(harness.host_memory().total_allocations(), 0);
    assert_eq!(harness.accelerator().memory().total_allocations(), 0);
    assert_eq!(harness.accelerator().streams_created(), 0);
}

#[test]
fn test_zero_field_shape_acquires_nothing() {
    // built from public fields, bypassing BlockShape::new
    let harness = Harness::new(SimAccelerator::new(), TrialConfig::new());
    for shape in [BlockShape { x: 0, y: 16 }, BlockShape { x: 16, y: 0 }] {
        let err = harness.run(shape).unwrap_err();
        assert_eq!(err.kind(), FailureKind::LaunchFailure);
        assert_eq!(
            err,
            TrialError::InvalidBlockShape {
                x: i64::from(shape.x),
                y: i64::from(shape.y),
            }
        );
    }
    assert_eq!(harness.host_memory().total_allocations(), 0);
    assert_eq!(harness.accelerator().memory().total_allocations(), 0);
    assert_eq!(harness.accelerator().streams_created(), 0);
}

#[test]
fn test_zero_shape_rejected_when_deserialized() {
    assert!(serde_json::from_str::<BlockShape>(r#"{"x":0,"y":8}"#).is_err());
}

#[test]
fn test_host_allocation_failure() {
    // room for A only
    let harness = Harness::new(
        SimAccelerator::new(),
        TrialConfig::new().with_host_memory_limit(4096 * 4),
    );
    let err = harness.run(SHAPE).unwrap_err();
    assert!(matches!(
        err,
        TrialError::Allocation {
            space: MemorySpace::Host,
            buffer: "b",
            ..
        }
    ));
    assert_eq!(err.phase(), Phase::Allocating);
    assert_clean(&harness);
}

#[test]
fn test_device_allocation_failure_for_each_buffer() {
    for (nth, name) in [(1, "a"), (2, "b"), (3, "c")] {
        let harness = faulty(
            FaultPlan::new().with_allocation_failure_at(nth),
            TrialConfig::new(),
        );
        match harness.run(SHAPE).unwrap_err() {
            TrialError::Allocation { space, buffer, .. } => {
                assert_eq!(space, MemorySpace::Device);
                assert_eq!(buffer, name);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_clean(&harness);
        assert_eq!(harness.accelerator().memory().total_allocations(), nth as u64 - 1);
    }
}

#[test]
fn test_device_memory_exhausted() {
    let sim = SimAccelerator::new().with_memory_limit(2 * 4096 * 4);
    let harness = Harness::new(sim, TrialConfig::new());
    let err = harness.run(SHAPE).unwrap_err();
    assert_eq!(err.kind(), FailureKind::AllocationFailure);
    assert_clean(&harness);
}

#[test]
fn test_transfer_failure() {
    let harness = faulty(FaultPlan::new().with_upload_failure(), TrialConfig::new());
    let err = harness.run(SHAPE).unwrap_err();
    assert_eq!(err.kind(), FailureKind::TransferFailure);
    assert_eq!(err.phase(), Phase::Uploading);
    assert_clean(&harness);
}

#[test]
fn test_launch_failure() {
    let harness = faulty(FaultPlan::new().with_launch_failure(), TrialConfig::new());
    let err = harness.run(SHAPE).unwrap_err();
    assert_eq!(err.kind(), FailureKind::LaunchFailure);
    assert_eq!(err.phase(), Phase::Launching);
    assert_clean(&harness);
}

#[test]
fn test_over_limit_block_is_launch_failure() {
    let harness = Harness::new(SimAccelerator::new(), TrialConfig::new());
    let err = harness.run(BlockShape { x: 64, y: 32 }).unwrap_err();
    assert_eq!(err.kind(), FailureKind::LaunchFailure);
    assert!(err.to_string().contains("2048 threads"));
    assert_clean(&harness);
}

#[test]
fn test_custom_limits() {
    let sim = SimAccelerator::new().with_limits(DeviceLimits::default().with_max_block_dim(8, 8));
    let harness = Harness::new(sim, TrialConfig::new());
    assert!(harness.run(BlockShape { x: 8, y: 8 }).is_ok());
    let err = harness.run(BlockShape { x: 16, y: 4 }).unwrap_err();
    assert_eq!(err.kind(), FailureKind::LaunchFailure);
    assert_clean(&harness);
}

#[test]
fn test_execution_fault() {
    let harness = faulty(
        FaultPlan::new().with_execution_fault(),
        TrialConfig::new().with_verification(true),
    );
    let err = harness.run(SHAPE).unwrap_err();
    assert_eq!(err.kind(), FailureKind::ExecutionFailure);
    assert_eq!(err.phase(), Phase::AwaitingCompletion);
    assert!(harness.accelerator().last_launch().is_none());
    assert_clean(&harness);
}

#[test]
fn test_measurement_failure() {
    let harness = faulty(FaultPlan::new().with_timing_failure(), TrialConfig::new());
    let err = harness.run(SHAPE).unwrap_err();
    assert_eq!(err.phase(), Phase::Measuring);
    assert_clean(&harness);
}

#[test]
fn test_timeout_cancels_and_cleans_up() {
    let harness = faulty(
        FaultPlan::new().with_execution_delay(Duration::from_secs(60)),
        TrialConfig::new().with_timeout(Duration::from_millis(25)),
    );
    let started = Instant::now();
    let err = harness.run(SHAPE).unwrap_err();

    assert_eq!(err, TrialError::TimedOut { timeout_ms: 25 });
    assert_eq!(err.kind(), FailureKind::TimedOut);
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "cancellation did not stop the kernel"
    );
    assert_clean(&harness);
}

#[test]
fn test_sub_millisecond_timeout_rounds_up() {
    let harness = faulty(
        FaultPlan::new().with_execution_delay(Duration::from_secs(60)),
        TrialConfig::new().with_timeout(Duration::from_micros(300)),
    );
    let err = harness.run(SHAPE).unwrap_err();
    assert_eq!(err, TrialError::TimedOut { timeout_ms: 1 });
    assert!(err.to_string().contains("1 ms"));
    assert_clean(&harness);
}

#[test]
fn test_timeout_not_hit_by_fast_kernel() {
    let harness = Harness::new(
        SimAccelerator::new(),
        TrialConfig::new().with_timeout(Duration::from_secs(30)),
    );
    assert!(harness.run(SHAPE).is_ok());
}

#[test]
fn test_invalid_problem_size_rejected() {
    let config = TrialConfig {
        problem: ProblemSize { m: 0, n: 4, k: 4 },
        ..TrialConfig::default()
    };
    let harness = Harness::new(SimAccelerator::new(), config);
    let err = harness.run(SHAPE).unwrap_err();
    assert!(matches!(err, TrialError::InvalidProblemSize { .. }));
    assert_eq!(harness.host_memory().total_allocations(), 0);
}

#[test]
fn test_harness_reusable_after_failure() {
    let harness = faulty(
        FaultPlan::new().with_allocation_failure_at(2),
        TrialConfig::new().with_verification(true),
    );
    assert!(harness.run(SHAPE).is_err());
    // allocation counter has moved past the faulty slot
    let report = harness.run(SHAPE).unwrap();
    assert!(report.verification.is_some());
    assert_clean(&harness);
}
