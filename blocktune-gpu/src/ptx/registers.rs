//! PTX Register Management
//!
//! Virtual registers are numbered per type, so `%r3` and `%f3` are distinct
//! and each type gets one `.reg` declaration.

use super::types::PtxType;
use std::collections::BTreeMap;

/// Special PTX registers (read-only hardware registers)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PtxReg {
    /// Thread ID X dimension
    TidX,
    /// Thread ID Y dimension
    TidY,
    /// Block ID X dimension (CTA = Cooperative Thread Array)
    CtaIdX,
    /// Block ID Y dimension
    CtaIdY,
    /// Block dimension X (threads per block)
    NtidX,
    /// Block dimension Y
    NtidY,
    /// Grid dimension X (blocks per grid)
    NctaIdX,
    /// Grid dimension Y
    NctaIdY,
}

impl PtxReg {
    /// Convert to PTX string representation
    #[must_use]
    pub const fn to_ptx_string(self) -> &'static str {
        match self {
            Self::TidX => "%tid.x",
            Self::TidY => "%tid.y",
            Self::CtaIdX => "%ctaid.x",
            Self::CtaIdY => "%ctaid.y",
            Self::NtidX => "%ntid.x",
            Self::NtidY => "%ntid.y",
            Self::NctaIdX => "%nctaid.x",
            Self::NctaIdY => "%nctaid.y",
        }
    }

    /// All special registers here are 32-bit
    #[must_use]
    pub const fn data_type(self) -> PtxType {
        PtxType::U32
    }
}

/// Virtual register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualReg {
    id: u32,
    ty: PtxType,
}

impl VirtualReg {
    /// Create a new virtual register
    #[must_use]
    pub const fn new(id: u32, ty: PtxType) -> Self {
        Self { id, ty }
    }

    /// Get register ID (unique within its type)
    #[must_use]
    pub const fn id(self) -> u32 {
        self.id
    }

    /// Get register type
    #[must_use]
    pub const fn ty(self) -> PtxType {
        self.ty
    }

    /// Convert to PTX string
    #[must_use]
    pub fn to_ptx_string(self) -> String {
        format!("{}{}", self.ty.register_prefix(), self.id)
    }
}

/// Per-kernel register allocator
#[derive(Debug, Clone, Default)]
pub struct RegisterAllocator {
    counts: BTreeMap<PtxType, u32>,
}

impl RegisterAllocator {
    /// Create an empty allocator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh virtual register of `ty`
    pub fn allocate_virtual(&mut self, ty: PtxType) -> VirtualReg {
        let next = self.counts.entry(ty).or_insert(0);
        let vreg = VirtualReg::new(*next, ty);
        *next += 1;
        vreg
    }

    /// Number of registers allocated for `ty`
    #[must_use]
    pub fn count(&self, ty: PtxType) -> u32 {
        self.counts.get(&ty).copied().unwrap_or(0)
    }

    /// Total registers across all types
    #[must_use]
    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    /// `.reg` declarations, one line per used type, in a stable order
    #[must_use]
    pub fn emit_declarations(&self) -> String {
        let mut decls = String::new();
        for (ty, count) in &self.counts {
            if *count > 0 {
                decls.push_str(&format!(
                    "    .reg {} {}<{}>;\n",
                    ty.to_ptx_string(),
                    ty.register_prefix(),
                    count
                ));
            }
        }
        decls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_register_strings() {
        assert_eq!(PtxReg::TidX.to_ptx_string(), "%tid.x");
        assert_eq!(PtxReg::CtaIdY.to_ptx_string(), "%ctaid.y");
        assert_eq!(PtxReg::NtidX.to_ptx_string(), "%ntid.x");
        assert_eq!(PtxReg::NctaIdY.to_ptx_string(), "%nctaid.y");
    }

    #[test]
    fn test_virtual_register_string() {
        assert_eq!(VirtualReg::new(5, PtxType::F32).to_ptx_string(), "%f5");
        assert_eq!(VirtualReg::new(3, PtxType::U32).to_ptx_string(), "%r3");
        assert_eq!(VirtualReg::new(2, PtxType::U64).to_ptx_string(), "%rd2");
        assert_eq!(VirtualReg::new(1, PtxType::Pred).to_ptx_string(), "%p1");
    }

    #[test]
    fn test_ids_are_per_type() {
        let mut alloc = RegisterAllocator::new();
        let f0 = alloc.allocate_virtual(PtxType::F32);
        let r0 = alloc.allocate_virtual(PtxType::U32);
        let f1 = alloc.allocate_virtual(PtxType::F32);

        assert_eq!(f0.id(), 0);
        assert_eq!(r0.id(), 0);
        assert_eq!(f1.id(), 1);
        assert_eq!(alloc.count(PtxType::F32), 2);
        assert_eq!(alloc.total(), 3);
    }

    #[test]
    fn test_emit_declarations() {
        let mut alloc = RegisterAllocator::new();
        let _ = alloc.allocate_virtual(PtxType::F32);
        let _ = alloc.allocate_virtual(PtxType::F32);
        let _ = alloc.allocate_virtual(PtxType::U64);

        let decls = alloc.emit_declarations();
        assert!(decls.contains(".reg .f32 %f<2>;"));
        assert!(decls.contains(".reg .u64 %rd<1>;"));
        assert!(!decls.contains(".pred"));
    }
}
