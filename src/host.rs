//! Host-side matrices
//!
//! A holds `i + 1` at flattened index `i`, B is all ones and C starts
//! zeroed. C is never uploaded; the device only writes it.

use std::ops::{Deref, DerefMut};

use crate::error::{MemorySpace, Result, TrialError};
use crate::geometry::ProblemSize;
use crate::tracking::{AllocationTracker, TrackedAllocation};

/// Tracked host buffer of f32
#[derive(Debug)]
pub struct HostBuffer {
    data: Vec<f32>,
    _tracked: TrackedAllocation,
}

impl HostBuffer {
    /// Allocate `len` zeroed elements without aborting on failure
    ///
    /// # Errors
    ///
    /// Returns `Allocation { space: Host }` if the tracker's capacity or
    /// the system allocator refuses the request.
    pub fn zeroed(tracker: &AllocationTracker, label: &'static str, len: usize) -> Result<Self> {
        let bytes = len.saturating_mul(std::mem::size_of::<f32>());
        let fail = |reason: String| TrialError::Allocation {
            space: MemorySpace::Host,
            buffer: label,
            bytes,
            reason,
        };

        let tracked = tracker
            .track(label, bytes)
            .ok_or_else(|| fail("host memory limit exceeded".to_string()))?;

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|e| fail(e.to_string()))?;
        data.resize(len, 0.0);

        Ok(Self {
            data,
            _tracked: tracked,
        })
    }
}

impl Deref for HostBuffer {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.data
    }
}

impl DerefMut for HostBuffer {
    fn deref_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

/// Host copies of A, B and C for one trial
#[derive(Debug)]
pub struct HostMatrices {
    /// M×K input
    pub a: HostBuffer,
    /// K×N input
    pub b: HostBuffer,
    /// M×N output
    pub c: HostBuffer,
}

impl HostMatrices {
    /// Allocate and initialize all three matrices
    ///
    /// # Errors
    ///
    /// Returns `Allocation { space: Host }` naming the first buffer that
    /// could not be obtained. Buffers already obtained are released.
    pub fn new(problem: ProblemSize, tracker: &AllocationTracker) -> Result<Self> {
        let mut a = HostBuffer::zeroed(tracker, "a", problem.a_len())?;
        let mut b = HostBuffer::zeroed(tracker, "b", problem.b_len())?;
        let c = HostBuffer::zeroed(tracker, "c", problem.c_len())?;

        for (i, v) in a.iter_mut().enumerate() {
            *v = i as f32 + 1.0;
        }
        b.fill(1.0);

        Ok(Self { a, b, c })
    }
}
