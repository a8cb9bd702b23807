//! GEMM (General Matrix Multiply) Kernel
//!
//! Computes C = A @ B with one unit of work per element of C. A is M×K, B is
//! K×N, C is M×N, all row-major f32.
//!
//! The same kernel exists twice: as PTX for the CUDA driver and as a scalar
//! per-unit body for CPU execution. Both accumulate in ascending k with a
//! separate multiply and add, so their results match bit for bit.

use super::Kernel;
use crate::ptx::{PtxKernel, PtxReg, PtxType};

/// GEMM problem dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmConfig {
    /// M dimension (rows of A and C)
    pub m: u32,
    /// N dimension (cols of B and C)
    pub n: u32,
    /// K dimension (cols of A, rows of B)
    pub k: u32,
}

impl Default for GemmConfig {
    fn default() -> Self {
        Self {
            m: 64,
            n: 64,
            k: 64,
        }
    }
}

/// Position of one unit of work inside a 2-D launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitIndex {
    /// Block index (x, y) within the grid
    pub block_idx: (u32, u32),
    /// Block dimensions (x, y)
    pub block_dim: (u32, u32),
    /// Thread index (x, y) within the block
    pub thread_idx: (u32, u32),
}

impl UnitIndex {
    /// Output coordinate `(row, col)` this unit owns.
    ///
    /// x maps to columns (N), y maps to rows (M).
    #[must_use]
    pub fn output_coord(&self) -> (u64, u64) {
        let col = u64::from(self.block_idx.0) * u64::from(self.block_dim.0)
            + u64::from(self.thread_idx.0);
        let row = u64::from(self.block_idx.1) * u64::from(self.block_dim.1)
            + u64::from(self.thread_idx.1);
        (row, col)
    }
}

/// Naive GEMM kernel
#[derive(Debug, Clone)]
pub struct GemmKernel {
    config: GemmConfig,
}

impl GemmKernel {
    /// One thread per output element, no tiling
    #[must_use]
    pub fn naive(m: u32, n: u32, k: u32) -> Self {
        Self {
            config: GemmConfig { m, n, k },
        }
    }

    /// Problem dimensions
    #[must_use]
    pub fn config(&self) -> &GemmConfig {
        &self.config
    }

    /// Run one unit of work on the CPU.
    ///
    /// Returns `true` if the unit wrote its output cell, `false` if its
    /// coordinate fell outside the output and it did nothing.
    ///
    /// # Panics
    ///
    /// Panics if a slice is shorter than the dimensions imply.
    pub fn execute_unit(&self, a: &[f32], b: &[f32], c: &mut [f32], unit: UnitIndex) -> bool {
        let (row, col) = unit.output_coord();
        let (m, n, k) = (
            u64::from(self.config.m),
            u64::from(self.config.n),
            u64::from(self.config.k),
        );
        if row >= m || col >= n {
            return false;
        }

        let (row, col) = (row as usize, col as usize);
        let (n, k) = (n as usize, k as usize);
        let mut acc = 0.0f32;
        for i in 0..k {
            acc += a[row * k + i] * b[i * n + col];
        }
        c[row * n + col] = acc;
        true
    }
}

impl Kernel for GemmKernel {
    fn name(&self) -> &str {
        "gemm_naive"
    }

    fn build_ptx(&self) -> PtxKernel {
        // Dimensions come from params, so one PTX image serves every problem size.
        PtxKernel::new("gemm_naive")
            .param(PtxType::U64, "a_ptr")
            .param(PtxType::U64, "b_ptr")
            .param(PtxType::U64, "c_ptr")
            .param(PtxType::U32, "m")
            .param(PtxType::U32, "n")
            .param(PtxType::U32, "k")
            .build(|ctx| {
                // row = ctaid.y * ntid.y + tid.y, col = ctaid.x * ntid.x + tid.x
                let ctaid_y = ctx.special_reg(PtxReg::CtaIdY);
                let ntid_y = ctx.special_reg(PtxReg::NtidY);
                let tid_y = ctx.special_reg(PtxReg::TidY);
                let ctaid_x = ctx.special_reg(PtxReg::CtaIdX);
                let ntid_x = ctx.special_reg(PtxReg::NtidX);
                let tid_x = ctx.special_reg(PtxReg::TidX);

                let row = ctx.mad_lo_u32(ctaid_y, ntid_y, tid_y);
                let col = ctx.mad_lo_u32(ctaid_x, ntid_x, tid_x);

                let m_param = ctx.load_param_u32("m");
                let n_param = ctx.load_param_u32("n");
                let k_param = ctx.load_param_u32("k");

                let pred_m = ctx.setp_ge_u32(row, m_param);
                ctx.branch_if(pred_m, "exit");
                let pred_n = ctx.setp_ge_u32(col, n_param);
                ctx.branch_if(pred_n, "exit");

                let a_param = ctx.load_param_u64("a_ptr");
                let b_param = ctx.load_param_u64("b_ptr");
                let c_param = ctx.load_param_u64("c_ptr");
                let a_ptr = ctx.cvta_global(a_param);
                let b_ptr = ctx.cvta_global(b_param);
                let c_ptr = ctx.cvta_global(c_param);

                // &A[row, 0]
                let a_row_start = ctx.mul_lo_u32(row, k_param);
                let a_row_bytes = ctx.mul_wide_u32(a_row_start, 4);
                let a_addr = ctx.add_u64(a_ptr, a_row_bytes);

                // &B[0, col] and the byte stride of one B row
                let col_bytes = ctx.mul_wide_u32(col, 4);
                let b_addr = ctx.add_u64(b_ptr, col_bytes);
                let four = ctx.mov_u32_imm(4);
                let b_stride = ctx.mul_wide_u32_reg(n_param, four);

                let acc = ctx.mov_f32_imm(0.0);
                let i = ctx.mov_u32_imm(0);

                ctx.label("loop_k");
                let done = ctx.setp_ge_u32(i, k_param);
                ctx.branch_if(done, "loop_end");

                let a_val = ctx.ld_global_f32(a_addr);
                let b_val = ctx.ld_global_f32(b_addr);
                let prod = ctx.mul_f32(a_val, b_val);
                ctx.add_f32_inplace(acc, prod);

                ctx.add_u64_imm_inplace(a_addr, 4);
                ctx.add_u64_inplace(b_addr, b_stride);
                ctx.add_u32_imm_inplace(i, 1);
                ctx.branch("loop_k");

                ctx.label("loop_end");

                // &C[row, col] = c_ptr + (row * n + col) * 4
                let c_index = ctx.mad_lo_u32(row, n_param, col);
                let c_offset = ctx.mul_wide_u32(c_index, 4);
                let c_addr = ctx.add_u64(c_ptr, c_offset);
                ctx.st_global_f32(c_addr, acc);

                ctx.label("exit");
                ctx.ret();
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(block: (u32, u32), dim: (u32, u32), thread: (u32, u32)) -> UnitIndex {
        UnitIndex {
            block_idx: block,
            block_dim: dim,
            thread_idx: thread,
        }
    }

    #[test]
    fn test_naive_gemm_name() {
        let kernel = GemmKernel::naive(512, 512, 512);
        assert_eq!(kernel.name(), "gemm_naive");
        assert_eq!(kernel.config().m, 512);
    }

    #[test]
    fn test_gemm_config_default() {
        let config = GemmConfig::default();
        assert_eq!((config.m, config.n, config.k), (64, 64, 64));
    }

    #[test]
    fn test_gemm_ptx_params() {
        let ptx = GemmKernel::naive(64, 64, 64).emit_ptx();

        assert!(ptx.contains(".param .u64 a_ptr"));
        assert!(ptx.contains(".param .u64 b_ptr"));
        assert!(ptx.contains(".param .u64 c_ptr"));
        assert!(ptx.contains(".param .u32 m"));
        assert!(ptx.contains(".param .u32 n"));
        assert!(ptx.contains(".param .u32 k"));
    }

    #[test]
    fn test_naive_gemm_full_ptx() {
        let ptx = GemmKernel::naive(128, 128, 128).emit_ptx();

        assert!(ptx.contains("loop_k:"));
        assert!(ptx.contains("loop_end:"));
        assert!(ptx.contains("exit:"));
        assert!(ptx.contains("ld.global.f32"));
        assert!(ptx.contains("st.global.f32"));
        assert!(ptx.contains("mul.rn.f32"));
        assert!(ptx.contains("add.rn.f32"));
        assert!(!ptx.contains("fma"));
    }

    #[test]
    fn test_loop_carries_accumulator_in_place() {
        let ptx = GemmKernel::naive(64, 64, 64).emit_ptx();
        let acc_update = ptx
            .lines()
            .find(|l| l.contains("add.rn.f32"))
            .expect("accumulate instruction");
        let operands: Vec<&str> = acc_update
            .trim()
            .trim_start_matches("add.rn.f32")
            .trim_end_matches(';')
            .split(',')
            .map(str::trim)
            .collect();
        assert_eq!(operands[0], operands[1]);
        assert!(ptx.contains("add.u32 %r"));
    }

    #[test]
    fn test_ptx_same_for_every_problem_size() {
        assert_eq!(
            GemmKernel::naive(64, 64, 64).emit_ptx(),
            GemmKernel::naive(7, 300, 2).emit_ptx()
        );
    }

    #[test]
    fn test_output_coord_x_is_column() {
        let u = unit((2, 1), (16, 8), (3, 5));
        assert_eq!(u.output_coord(), (13, 35));
    }

    #[test]
    fn test_execute_unit_in_bounds() {
        // A = [[1, 2], [3, 4]], B = [[5, 6], [7, 8]]
        let kernel = GemmKernel::naive(2, 2, 2);
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        let mut c = [0.0f32; 4];
        for ty in 0..2 {
            for tx in 0..2 {
                assert!(kernel.execute_unit(&a, &b, &mut c, unit((0, 0), (2, 2), (tx, ty))));
            }
        }
        assert_eq!(c, [19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_execute_unit_out_of_bounds_is_noop() {
        let kernel = GemmKernel::naive(2, 2, 2);
        let a = [1.0; 4];
        let b = [1.0; 4];
        let mut c = [-1.0f32; 4];
        assert!(!kernel.execute_unit(&a, &b, &mut c, unit((1, 0), (2, 2), (0, 0))));
        assert!(!kernel.execute_unit(&a, &b, &mut c, unit((0, 0), (4, 4), (0, 3))));
        assert_eq!(c, [-1.0; 4]);
    }
}
