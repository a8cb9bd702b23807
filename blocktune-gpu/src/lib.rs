//! # blocktune-gpu: PTX Generation and CUDA Driver Bindings
//!
//! The device half of blocktune: the GEMM kernel as PTX and as a scalar
//! per-unit body, plus a minimal dynamically loaded CUDA driver binding
//! to run it.
//!
//! ## Quick Start
//!
//! ```rust
//! use blocktune_gpu::kernels::{GemmKernel, Kernel};
//!
//! let kernel = GemmKernel::naive(64, 64, 64);
//! let ptx = kernel.emit_ptx();
//! assert!(ptx.contains(".visible .entry gemm_naive("));
//! ```
//!
//! ## Modules
//!
//! - [`ptx`] - PTX code generation (builder pattern)
//! - [`kernels`] - GEMM kernel (PTX and CPU unit body)
//! - [`driver`] - CUDA driver API (minimal FFI, optional)

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
// Allow precision loss in non-critical floating point calculations
#![allow(clippy::cast_precision_loss)]
// Allow possible truncation - we handle 64-bit correctly
#![allow(clippy::cast_possible_truncation)]
// Allow format push string - not a critical performance path
#![allow(clippy::format_push_string)]
// Allow doc markdown for code references
#![allow(clippy::doc_markdown)]
// Allow missing errors doc during initial development
#![allow(clippy::missing_errors_doc)]
// Allow manual div_ceil - will use std when stabilized
#![allow(clippy::manual_div_ceil)]
// Allow cast_lossless - we intentionally use as for u32->u64
#![allow(clippy::cast_lossless)]
// Allow uninlined format args - stylistic preference
#![allow(clippy::uninlined_format_args)]
// Allow expect_used in tests and non-critical paths
#![allow(clippy::expect_used)]
// Allow too_many_lines during development - will be refactored
#![allow(clippy::too_many_lines)]
// Allow float_cmp in tests where exact comparison is intended
#![allow(clippy::float_cmp)]
// Allow cast_sign_loss - we know values are positive
#![allow(clippy::cast_sign_loss)]

pub mod driver;
pub mod kernels;
pub mod ptx;

/// Error types for blocktune-gpu operations
pub mod error;

pub use error::{GpuError, Result};

#[cfg(test)]
mod tests {
    #[test]
    fn test_crate_compiles() {
        let _ = super::error::Result::<()>::Ok(());
    }
}
