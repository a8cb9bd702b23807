//! Kernel Validation Tests (No CUDA Required)
//!
//! Validate the GEMM PTX structure and check the scalar unit body against
//! a straightforward triple loop. Run with:
//!
//! ```bash
//! cargo test -p blocktune-gpu --test kernel_validation
//! ```

use blocktune_gpu::kernels::{GemmKernel, Kernel, UnitIndex};
use blocktune_gpu::ptx::validate_ptx;
use proptest::prelude::*;

// ============================================================================
// SCALAR BASELINE
// ============================================================================

fn scalar_gemm(a: &[f32], b: &[f32], m: usize, n: usize, k: usize) -> Vec<f32> {
    let mut c = vec![0.0f32; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0f32;
            for l in 0..k {
                sum += a[i * k + l] * b[l * n + j];
            }
            c[i * n + j] = sum;
        }
    }
    c
}

/// Run every unit of a `block`-shaped launch that covers `m`×`n`
fn run_units(kernel: &GemmKernel, a: &[f32], b: &[f32], block: (u32, u32)) -> (Vec<f32>, usize) {
    let cfg = *kernel.config();
    let grid = (cfg.n.div_ceil(block.0), cfg.m.div_ceil(block.1));
    let mut c = vec![f32::NAN; (cfg.m * cfg.n) as usize];
    let mut idle = 0;
    for by in 0..grid.1 {
        for bx in 0..grid.0 {
            for ty in 0..block.1 {
                for tx in 0..block.0 {
                    let unit = UnitIndex {
                        block_idx: (bx, by),
                        block_dim: block,
                        thread_idx: (tx, ty),
                    };
                    if !kernel.execute_unit(a, b, &mut c, unit) {
                        idle += 1;
                    }
                }
            }
        }
    }
    (c, idle)
}

// ============================================================================
// PTX STRUCTURE
// ============================================================================

#[test]
fn gemm_ptx_structure() {
    let ptx = GemmKernel::naive(64, 64, 64).emit_ptx();

    assert!(ptx.contains(".version 8.0"));
    assert!(ptx.contains(".target sm_"));
    assert!(ptx.contains(".address_size 64"));
    assert!(ptx.contains(".visible .entry gemm_naive("));
    assert!(ptx.contains("%ctaid.x"));
    assert!(ptx.contains("%ctaid.y"));
    assert!(ptx.contains("%ntid.x"));
    assert!(ptx.contains("%tid.y"));
    assert!(ptx.contains("cvta.to.global.u64"));
    assert!(ptx.ends_with("}\n"));
    assert!(validate_ptx(&ptx).is_ok());
}

#[test]
fn gemm_ptx_guards_both_bounds_before_any_load() {
    let ptx = GemmKernel::naive(64, 64, 64).emit_ptx();
    let first_load = ptx.find("ld.global.f32").expect("load");
    let guards: Vec<usize> = ptx.match_indices("bra exit;").map(|(i, _)| i).collect();
    assert_eq!(guards.len(), 2);
    assert!(guards.iter().all(|&g| g < first_load));
}

#[test]
fn gemm_ptx_single_store() {
    let ptx = GemmKernel::naive(64, 64, 64).emit_ptx();
    assert_eq!(ptx.matches("st.global.f32").count(), 1);
}

#[test]
fn gemm_module_validates() {
    let module = GemmKernel::naive(64, 64, 64).as_module();
    assert!(module.validate().is_ok());
    assert_eq!(module.kernels().len(), 1);
    assert_eq!(module.kernels()[0].params().len(), 6);
}

// ============================================================================
// SCALAR UNIT BODY
// ============================================================================

#[test]
fn unit_body_matches_triple_loop_with_ragged_edges() {
    let (m, n, k) = (7u32, 5u32, 3u32);
    let a: Vec<f32> = (0..m * k).map(|i| (i % 11) as f32 - 5.0).collect();
    let b: Vec<f32> = (0..k * n).map(|i| (i % 7) as f32 * 0.5).collect();
    let kernel = GemmKernel::naive(m, n, k);

    let (c, idle) = run_units(&kernel, &a, &b, (4, 4));
    let expected = scalar_gemm(&a, &b, m as usize, n as usize, k as usize);

    assert_eq!(c, expected);
    // grid 2x2 of 4x4 = 64 units, 35 cells
    assert_eq!(idle, 64 - 35);
}

#[test]
fn unit_body_k_zero_writes_zero() {
    let kernel = GemmKernel::naive(2, 3, 0);
    let (c, idle) = run_units(&kernel, &[], &[], (4, 1));
    assert_eq!(c, vec![0.0; 6]);
    assert_eq!(idle, 2 * 4 - 6);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every output cell is written exactly once and equals the baseline,
    /// whatever the block shape.
    #[test]
    fn prop_result_independent_of_block_shape(
        m in 1u32..24,
        n in 1u32..24,
        k in 1u32..12,
        bx in prop::sample::select(vec![1u32, 2, 4, 8, 16, 32]),
        by in prop::sample::select(vec![1u32, 2, 4, 8, 16, 32]),
    ) {
        let a: Vec<f32> = (0..m * k).map(|i| (i + 1) as f32).collect();
        let b = vec![1.0f32; (k * n) as usize];
        let kernel = GemmKernel::naive(m, n, k);

        let (c, idle) = run_units(&kernel, &a, &b, (bx, by));
        let expected = scalar_gemm(&a, &b, m as usize, n as usize, k as usize);
        prop_assert_eq!(c, expected);

        let total = n.div_ceil(bx) * bx * m.div_ceil(by) * by;
        prop_assert_eq!(idle as u32, total - m * n);
    }
}
