//! PTX Code Generation Module
//!
//! Pure Rust PTX generation: builder → PTX IR → PTX text → CUDA driver JIT.
//!
//! ## Example
//!
//! ```rust
//! use blocktune_gpu::ptx::{PtxModule, PtxKernel, PtxType};
//!
//! let module = PtxModule::new()
//!     .version(8, 0)
//!     .target("sm_70")
//!     .address_size(64);
//!
//! let ptx = module.emit();
//! assert!(ptx.contains(".version 8.0"));
//! ```

mod builder;
mod emit;
mod instructions;
mod registers;
mod types;

pub use builder::{KernelBuilder, PtxKernel, PtxModule};
pub use emit::validate_ptx;
pub use instructions::{CmpOp, Operand, Predicate, PtxInstruction, PtxOp, RoundingMode};
pub use registers::{PtxReg, RegisterAllocator, VirtualReg};
pub use types::{PtxStateSpace, PtxType};

use crate::error::{GpuError, Result};

/// Minimum supported PTX version (7.0 for SM 7.0+)
pub const MIN_PTX_VERSION: (u32, u32) = (7, 0);

/// Validate PTX version
pub fn validate_version(major: u32, minor: u32) -> Result<()> {
    if major < MIN_PTX_VERSION.0 || (major == MIN_PTX_VERSION.0 && minor < MIN_PTX_VERSION.1) {
        return Err(GpuError::InvalidPtxVersion { major, minor });
    }
    Ok(())
}

/// Validate compute capability target (`sm_XX`, XX >= 70)
pub fn validate_target(target: &str) -> Result<()> {
    let version: u32 = target
        .strip_prefix("sm_")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| GpuError::InvalidTarget(target.to_string()))?;

    if version < 70 {
        return Err(GpuError::InvalidTarget(target.to_string()));
    }

    Ok(())
}
