//! PTX Instructions
//!
//! The instruction subset used by the kernels in this crate, plus text
//! emission for each form.

use std::fmt;

use super::registers::{PtxReg, VirtualReg};
use super::types::{PtxStateSpace, PtxType};

/// PTX operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtxOp {
    /// Add two values
    Add,
    /// Multiply (full width for floats)
    Mul,
    /// Multiply, keep low half
    MulLo,
    /// Multiply, widen to twice the source width
    MulWide,
    /// Multiply-add low bits
    MadLo,
    /// Set predicate (comparison)
    Setp,
    /// Move/copy
    Mov,
    /// Load from memory
    Ld,
    /// Store to memory
    St,
    /// Load parameter
    LdParam,
    /// Convert generic address to global state space
    Cvta,
    /// Branch
    Bra,
    /// Return
    Ret,
}

/// Comparison operators for setp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Less than
    Lt,
    /// Less than or equal
    Le,
    /// Greater than
    Gt,
    /// Greater than or equal
    Ge,
}

impl CmpOp {
    /// Convert to PTX string
    #[must_use]
    pub const fn to_ptx_string(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
        }
    }
}

/// Rounding modes
///
/// An explicit `.rn` on `mul`/`add` stops ptxas from contracting them into an
/// FMA, which keeps device results identical to the scalar kernel body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundingMode {
    /// Round to nearest, ties to even
    #[default]
    Rn,
    /// Round toward zero
    Rz,
}

impl RoundingMode {
    /// Convert to PTX string
    #[must_use]
    pub const fn to_ptx_string(self) -> &'static str {
        match self {
            Self::Rn => ".rn",
            Self::Rz => ".rz",
        }
    }
}

/// Instruction operand
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Virtual register
    Reg(VirtualReg),
    /// Special register
    SpecialReg(PtxReg),
    /// Immediate unsigned
    ImmU32(u32),
    /// Immediate float, emitted as its exact bit pattern
    ImmF32(f32),
    /// Parameter name
    Param(String),
    /// Memory address (base + offset)
    Addr {
        /// Base register
        base: VirtualReg,
        /// Offset in bytes
        offset: i32,
    },
    /// Label reference
    Label(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reg(reg) => write!(f, "{}", reg.to_ptx_string()),
            Self::SpecialReg(reg) => write!(f, "{}", reg.to_ptx_string()),
            Self::ImmU32(v) => write!(f, "{v}"),
            Self::ImmF32(v) => write!(f, "0f{:08X}", v.to_bits()),
            Self::Param(name) => write!(f, "[{name}]"),
            Self::Addr { base, offset: 0 } => write!(f, "[{}]", base.to_ptx_string()),
            Self::Addr { base, offset } => write!(f, "[{}+{}]", base.to_ptx_string(), offset),
            Self::Label(name) => write!(f, "{name}"),
        }
    }
}

/// Predicate for conditional execution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Predicate {
    /// Predicate register
    pub reg: VirtualReg,
    /// Negated?
    pub negated: bool,
}

/// A single PTX instruction
#[derive(Debug, Clone, PartialEq)]
pub struct PtxInstruction {
    /// Operation
    pub op: PtxOp,
    /// Data type (source type for `mul.wide` and `setp`)
    pub ty: PtxType,
    /// Destination operand (if any)
    pub dst: Option<Operand>,
    /// Source operands
    pub srcs: Vec<Operand>,
    /// Predicate guard (optional)
    pub predicate: Option<Predicate>,
    /// State space (for memory ops)
    pub state_space: Option<PtxStateSpace>,
    /// Rounding mode (for FP ops)
    pub rounding: Option<RoundingMode>,
    /// Comparison (for setp)
    pub cmp: Option<CmpOp>,
    /// Label (for branch targets)
    pub label: Option<String>,
}

impl PtxInstruction {
    /// Create a new instruction
    #[must_use]
    pub fn new(op: PtxOp, ty: PtxType) -> Self {
        Self {
            op,
            ty,
            dst: None,
            srcs: Vec::new(),
            predicate: None,
            state_space: None,
            rounding: None,
            cmp: None,
            label: None,
        }
    }

    /// Set destination
    #[must_use]
    pub fn dst(mut self, dst: Operand) -> Self {
        self.dst = Some(dst);
        self
    }

    /// Add source operand
    #[must_use]
    pub fn src(mut self, src: Operand) -> Self {
        self.srcs.push(src);
        self
    }

    /// Set predicate guard
    #[must_use]
    pub fn predicated(mut self, pred: Predicate) -> Self {
        self.predicate = Some(pred);
        self
    }

    /// Set state space
    #[must_use]
    pub fn space(mut self, space: PtxStateSpace) -> Self {
        self.state_space = Some(space);
        self
    }

    /// Set rounding mode
    #[must_use]
    pub fn rounding(mut self, mode: RoundingMode) -> Self {
        self.rounding = Some(mode);
        self
    }

    /// Set comparison operator
    #[must_use]
    pub fn cmp(mut self, cmp: CmpOp) -> Self {
        self.cmp = Some(cmp);
        self
    }

    /// Set label
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Opcode with all modifiers, e.g. `add.rn.f32` or `@%p0 bra`
    fn opcode(&self) -> String {
        let ty = self.ty.to_ptx_string();
        let rounding = self.rounding.map_or("", RoundingMode::to_ptx_string);
        let space = self.state_space.map_or("", PtxStateSpace::to_ptx_string);
        match self.op {
            PtxOp::Add => format!("add{rounding}{ty}"),
            PtxOp::Mul => format!("mul{rounding}{ty}"),
            PtxOp::MulLo => format!("mul.lo{ty}"),
            PtxOp::MulWide => format!("mul.wide{ty}"),
            PtxOp::MadLo => format!("mad.lo{ty}"),
            PtxOp::Setp => {
                let cmp = self.cmp.unwrap_or(CmpOp::Eq).to_ptx_string();
                format!("setp.{cmp}{ty}")
            }
            PtxOp::Mov => format!("mov{ty}"),
            PtxOp::Ld => format!("ld{space}{ty}"),
            PtxOp::St => format!("st{space}{ty}"),
            PtxOp::LdParam => format!("ld.param{ty}"),
            PtxOp::Cvta => format!("cvta.to.global{ty}"),
            PtxOp::Bra if self.predicate.is_some() => "bra".to_string(),
            PtxOp::Bra => "bra.uni".to_string(),
            PtxOp::Ret => "ret".to_string(),
        }
    }

    /// Emit this instruction as one line of PTX (without indentation)
    #[must_use]
    pub fn emit(&self) -> String {
        let mut line = String::new();
        if let Some(pred) = &self.predicate {
            let bang = if pred.negated { "!" } else { "" };
            line.push_str(&format!("@{bang}{} ", pred.reg.to_ptx_string()));
        }
        line.push_str(&self.opcode());

        let mut operands: Vec<String> = Vec::with_capacity(self.srcs.len() + 1);
        if let Some(dst) = &self.dst {
            operands.push(dst.to_string());
        }
        operands.extend(self.srcs.iter().map(ToString::to_string));
        if let Some(label) = &self.label {
            operands.push(label.clone());
        }

        if !operands.is_empty() {
            line.push(' ');
            line.push_str(&operands.join(", "));
        }
        line.push(';');
        line
    }
}
