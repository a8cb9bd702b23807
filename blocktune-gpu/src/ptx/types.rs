//! PTX Type System
//!
//! The subset of PTX data types and state spaces the GEMM kernel needs.

use std::fmt;

/// PTX data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PtxType {
    /// Predicate (1-bit boolean)
    Pred,
    /// 32-bit unsigned integer
    U32,
    /// 64-bit unsigned integer (addresses)
    U64,
    /// 32-bit floating point (single precision)
    F32,
}

impl PtxType {
    /// Get size in bytes
    #[must_use]
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::Pred => 1,
            Self::U32 | Self::F32 => 4,
            Self::U64 => 8,
        }
    }

    /// Convert to PTX string representation
    #[must_use]
    pub const fn to_ptx_string(self) -> &'static str {
        match self {
            Self::Pred => ".pred",
            Self::U32 => ".u32",
            Self::U64 => ".u64",
            Self::F32 => ".f32",
        }
    }

    /// Check if this is a floating point type
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32)
    }

    /// Register name prefix; unique per type so declarations never collide
    #[must_use]
    pub const fn register_prefix(self) -> &'static str {
        match self {
            Self::Pred => "%p",
            Self::U32 => "%r",
            Self::U64 => "%rd",
            Self::F32 => "%f",
        }
    }
}

impl fmt::Display for PtxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_ptx_string())
    }
}

/// PTX state spaces (memory hierarchy)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PtxStateSpace {
    /// Register (per-thread)
    Reg,
    /// Global memory (device-wide)
    Global,
    /// Parameter space (kernel arguments)
    Param,
}

impl PtxStateSpace {
    /// Convert to PTX string
    #[must_use]
    pub const fn to_ptx_string(self) -> &'static str {
        match self {
            Self::Reg => ".reg",
            Self::Global => ".global",
            Self::Param => ".param",
        }
    }
}

impl fmt::Display for PtxStateSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_ptx_string())
    }
}
