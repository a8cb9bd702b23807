//! Output verification
//!
//! With A[i] = i + 1 and B all ones, row `m` of C is the sum of a run of K
//! consecutive integers starting at `m·K + 1`, independent of the column:
//!
//! ```text
//! C[m, n] = K·(m·K + 1) + K·(K − 1)/2
//! ```
//!
//! Verification is never part of a timed trial.

use serde::{Deserialize, Serialize};

use crate::error::{Phase, Result, TrialError};
use crate::geometry::ProblemSize;

/// Largest integer every smaller integer of which is exactly representable in f32
const F32_EXACT_LIMIT: f64 = 16_777_216.0;

/// Summary of a passed verification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Cells compared
    pub cells_checked: usize,
    /// Largest absolute deviation from the closed form
    pub max_abs_error: f64,
}

/// Closed-form value of every cell in row `row`
#[must_use]
pub fn expected_cell(row: u32, k: u32) -> f64 {
    let (row, k) = (f64::from(row), f64::from(k));
    k * (row * k + 1.0) + k * (k - 1.0) / 2.0
}

/// Acceptable deviation for an f32 sum of `k` terms ending at `expected`
///
/// Zero while every partial sum is an exactly representable integer.
fn tolerance(expected: f64, k: u32) -> f64 {
    if expected <= F32_EXACT_LIMIT {
        0.0
    } else {
        expected * f64::from(k) * f64::from(f32::EPSILON)
    }
}

/// Compare C against the closed form
///
/// # Errors
///
/// Returns `Verification` naming the first mismatching cell in row-major
/// order, or `Transfer` if `c` does not have M·N elements.
pub fn verify_output(problem: ProblemSize, c: &[f32]) -> Result<VerificationReport> {
    if c.len() != problem.c_len() {
        return Err(TrialError::Transfer {
            phase: Phase::Verifying,
            reason: format!("read back {} elements, expected {}", c.len(), problem.c_len()),
        });
    }

    let n = problem.n as usize;
    let mut max_abs_error = 0.0f64;
    for (row, cells) in c.chunks_exact(n).enumerate() {
        // row < m, which fits in u32
        let expected = expected_cell(row as u32, problem.k);
        let tol = tolerance(expected, problem.k);
        for (col, &actual) in cells.iter().enumerate() {
            let err = (f64::from(actual) - expected).abs();
            if err.is_nan() || err > tol {
                return Err(TrialError::Verification {
                    row,
                    col,
                    expected: expected as f32,
                    actual,
                });
            }
            max_abs_error = max_abs_error.max(err);
        }
    }

    Ok(VerificationReport {
        cells_checked: c.len(),
        max_abs_error,
    })
}

/// Scalar reference GEMM for arbitrary inputs
///
/// Same accumulation order as the kernel: separate multiply and add, k
/// ascending, f32 throughout.
///
/// # Panics
///
/// Panics if a slice is shorter than the dimensions imply.
#[must_use]
pub fn reference_gemm(a: &[f32], b: &[f32], m: usize, n: usize, k: usize) -> Vec<f32> {
    let mut c = vec![0.0f32; m * n];
    for row in 0..m {
        for col in 0..n {
            let mut acc = 0.0f32;
            for i in 0..k {
                acc += a[row * k + i] * b[i * n + col];
            }
            c[row * n + col] = acc;
        }
    }
    c
}
