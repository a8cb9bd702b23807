//! PTX Module and Kernel Builders
//!
//! `PtxModule` holds the header directives and entries, `PtxKernel` one
//! `.entry`, and `KernelBuilder` is the instruction-level API handed to the
//! closure passed to [`PtxKernel::build`].

use super::instructions::{CmpOp, Operand, Predicate, PtxInstruction, PtxOp, RoundingMode};
use super::registers::{PtxReg, RegisterAllocator, VirtualReg};
use super::types::{PtxStateSpace, PtxType};
use super::{validate_target, validate_version};
use crate::error::{GpuError, Result};

/// A statement in a kernel body
#[derive(Debug, Clone, PartialEq)]
enum Statement {
    Instr(PtxInstruction),
    Label(String),
}

/// A PTX module: header directives plus kernel entries
#[derive(Debug, Clone)]
pub struct PtxModule {
    version: (u32, u32),
    target: String,
    address_size: u32,
    kernels: Vec<PtxKernel>,
}

impl Default for PtxModule {
    fn default() -> Self {
        Self::new()
    }
}

impl PtxModule {
    /// New module targeting PTX 8.0 / sm_70 / 64-bit addressing
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: (8, 0),
            target: "sm_70".to_string(),
            address_size: 64,
            kernels: Vec::new(),
        }
    }

    /// Set PTX ISA version
    #[must_use]
    pub fn version(mut self, major: u32, minor: u32) -> Self {
        self.version = (major, minor);
        self
    }

    /// Set compute capability target
    #[must_use]
    pub fn target(mut self, target: &str) -> Self {
        self.target = target.to_string();
        self
    }

    /// Set address size (32 or 64)
    #[must_use]
    pub fn address_size(mut self, bits: u32) -> Self {
        self.address_size = bits;
        self
    }

    /// Append a kernel entry
    #[must_use]
    pub fn add_kernel(mut self, kernel: PtxKernel) -> Self {
        self.kernels.push(kernel);
        self
    }

    /// PTX ISA version
    #[must_use]
    pub fn get_version(&self) -> (u32, u32) {
        self.version
    }

    /// Compute capability target
    #[must_use]
    pub fn get_target(&self) -> &str {
        &self.target
    }

    /// Address size in bits
    #[must_use]
    pub fn get_address_size(&self) -> u32 {
        self.address_size
    }

    /// Kernel entries in emission order
    #[must_use]
    pub fn kernels(&self) -> &[PtxKernel] {
        &self.kernels
    }

    /// Check header directives and every kernel body
    pub fn validate(&self) -> Result<()> {
        validate_version(self.version.0, self.version.1)?;
        validate_target(&self.target)?;
        if self.address_size != 32 && self.address_size != 64 {
            return Err(GpuError::PtxGeneration(format!(
                "address size must be 32 or 64, got {}",
                self.address_size
            )));
        }
        for kernel in &self.kernels {
            kernel.validate()?;
        }
        Ok(())
    }

    /// Emit PTX source text
    #[must_use]
    pub fn emit(&self) -> String {
        let mut out = String::new();
        out.push_str("//\n// Generated by blocktune-gpu\n//\n\n");
        out.push_str(&format!(".version {}.{}\n", self.version.0, self.version.1));
        out.push_str(&format!(".target {}\n", self.target));
        out.push_str(&format!(".address_size {}\n", self.address_size));
        for kernel in &self.kernels {
            out.push('\n');
            out.push_str(&kernel.emit());
        }
        out
    }
}

/// One `.visible .entry` kernel
#[derive(Debug, Clone)]
pub struct PtxKernel {
    name: String,
    params: Vec<(PtxType, String)>,
    registers: RegisterAllocator,
    body: Vec<Statement>,
    errors: Vec<String>,
}

impl PtxKernel {
    /// New kernel with no parameters and an empty body
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Vec::new(),
            registers: RegisterAllocator::new(),
            body: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Declare a kernel parameter
    #[must_use]
    pub fn param(mut self, ty: PtxType, name: &str) -> Self {
        self.params.push((ty, name.to_string()));
        self
    }

    /// Generate the body
    #[must_use]
    pub fn build<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut KernelBuilder<'_>),
    {
        let mut builder = KernelBuilder {
            params: &self.params,
            registers: RegisterAllocator::new(),
            body: Vec::new(),
            errors: Vec::new(),
        };
        f(&mut builder);
        let KernelBuilder {
            registers,
            body,
            errors,
            ..
        } = builder;
        self.registers = registers;
        self.body = body;
        self.errors = errors;
        self
    }

    /// Entry name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameters
    #[must_use]
    pub fn params(&self) -> &[(PtxType, String)] {
        &self.params
    }

    /// Number of instructions in the body (labels excluded)
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.body
            .iter()
            .filter(|s| matches!(s, Statement::Instr(_)))
            .count()
    }

    /// Register allocation for this kernel
    #[must_use]
    pub fn registers(&self) -> &RegisterAllocator {
        &self.registers
    }

    /// Fail if the body referenced unknown params or undefined labels
    pub fn validate(&self) -> Result<()> {
        if let Some(err) = self.errors.first() {
            return Err(GpuError::PtxGeneration(format!("{}: {}", self.name, err)));
        }
        for stmt in &self.body {
            if let Statement::Instr(instr) = stmt {
                if let Some(target) = &instr.label {
                    let defined = self
                        .body
                        .iter()
                        .any(|s| matches!(s, Statement::Label(l) if l == target));
                    if !defined {
                        return Err(GpuError::PtxGeneration(format!(
                            "{}: branch to undefined label '{}'",
                            self.name, target
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Emit the `.entry` block
    #[must_use]
    pub fn emit(&self) -> String {
        let mut out = format!(".visible .entry {}(\n", self.name);
        let params: Vec<String> = self
            .params
            .iter()
            .map(|(ty, name)| format!("    .param {} {}", ty.to_ptx_string(), name))
            .collect();
        out.push_str(&params.join(",\n"));
        out.push_str("\n)\n{\n");
        out.push_str(&self.registers.emit_declarations());
        out.push('\n');
        for stmt in &self.body {
            match stmt {
                Statement::Instr(instr) => {
                    out.push_str("    ");
                    out.push_str(&instr.emit());
                    out.push('\n');
                }
                Statement::Label(label) => {
                    out.push_str(label);
                    out.push_str(":\n");
                }
            }
        }
        out.push_str("}\n");
        out
    }
}

/// Instruction-level builder for a kernel body
///
/// Every value-producing method allocates a fresh register. The `*_inplace`
/// variants write back into an existing register, which is how loop-carried
/// values (accumulators, counters, pointers) stay in one register across
/// iterations.
pub struct KernelBuilder<'a> {
    params: &'a [(PtxType, String)],
    registers: RegisterAllocator,
    body: Vec<Statement>,
    errors: Vec<String>,
}

impl KernelBuilder<'_> {
    fn push(&mut self, instr: PtxInstruction) {
        self.body.push(Statement::Instr(instr));
    }

    fn fresh(&mut self, ty: PtxType) -> VirtualReg {
        self.registers.allocate_virtual(ty)
    }

    fn binary(&mut self, op: PtxOp, ty: PtxType, dst: VirtualReg, a: Operand, b: Operand) {
        let mut instr = PtxInstruction::new(op, ty).dst(Operand::Reg(dst)).src(a).src(b);
        if ty.is_float() {
            instr = instr.rounding(RoundingMode::Rn);
        }
        self.push(instr);
    }

    /// Copy a special register into a fresh u32 register
    pub fn special_reg(&mut self, reg: PtxReg) -> VirtualReg {
        let dst = self.fresh(reg.data_type());
        self.push(
            PtxInstruction::new(PtxOp::Mov, reg.data_type())
                .dst(Operand::Reg(dst))
                .src(Operand::SpecialReg(reg)),
        );
        dst
    }

    /// `mov.u32 dst, imm`
    pub fn mov_u32_imm(&mut self, value: u32) -> VirtualReg {
        let dst = self.fresh(PtxType::U32);
        self.push(
            PtxInstruction::new(PtxOp::Mov, PtxType::U32)
                .dst(Operand::Reg(dst))
                .src(Operand::ImmU32(value)),
        );
        dst
    }

    /// `mov.f32 dst, imm`
    pub fn mov_f32_imm(&mut self, value: f32) -> VirtualReg {
        let dst = self.fresh(PtxType::F32);
        self.push(
            PtxInstruction::new(PtxOp::Mov, PtxType::F32)
                .dst(Operand::Reg(dst))
                .src(Operand::ImmF32(value)),
        );
        dst
    }

    fn load_param(&mut self, ty: PtxType, name: &str) -> VirtualReg {
        match self.params.iter().find(|(_, n)| n == name) {
            Some((declared, _)) if *declared != ty => self.errors.push(format!(
                "parameter '{}' declared {} but loaded as {}",
                name, declared, ty
            )),
            Some(_) => {}
            None => self.errors.push(format!("unknown parameter '{name}'")),
        }
        let dst = self.fresh(ty);
        self.push(
            PtxInstruction::new(PtxOp::LdParam, ty)
                .dst(Operand::Reg(dst))
                .src(Operand::Param(name.to_string())),
        );
        dst
    }

    /// `ld.param.u32`
    pub fn load_param_u32(&mut self, name: &str) -> VirtualReg {
        self.load_param(PtxType::U32, name)
    }

    /// `ld.param.u64`
    pub fn load_param_u64(&mut self, name: &str) -> VirtualReg {
        self.load_param(PtxType::U64, name)
    }

    /// `cvta.to.global.u64` on a pointer parameter
    pub fn cvta_global(&mut self, ptr: VirtualReg) -> VirtualReg {
        let dst = self.fresh(PtxType::U64);
        self.push(
            PtxInstruction::new(PtxOp::Cvta, PtxType::U64)
                .dst(Operand::Reg(dst))
                .src(Operand::Reg(ptr)),
        );
        dst
    }

    /// `dst = a * b + c` (low 32 bits)
    pub fn mad_lo_u32(&mut self, a: VirtualReg, b: VirtualReg, c: VirtualReg) -> VirtualReg {
        let dst = self.fresh(PtxType::U32);
        self.push(
            PtxInstruction::new(PtxOp::MadLo, PtxType::U32)
                .dst(Operand::Reg(dst))
                .src(Operand::Reg(a))
                .src(Operand::Reg(b))
                .src(Operand::Reg(c)),
        );
        dst
    }

    /// `dst = a * b` (low 32 bits)
    pub fn mul_lo_u32(&mut self, a: VirtualReg, b: VirtualReg) -> VirtualReg {
        let dst = self.fresh(PtxType::U32);
        self.binary(PtxOp::MulLo, PtxType::U32, dst, Operand::Reg(a), Operand::Reg(b));
        dst
    }

    /// `dst = (u64) a * imm`
    pub fn mul_wide_u32(&mut self, a: VirtualReg, imm: u32) -> VirtualReg {
        let dst = self.fresh(PtxType::U64);
        self.binary(PtxOp::MulWide, PtxType::U32, dst, Operand::Reg(a), Operand::ImmU32(imm));
        dst
    }

    /// `dst = (u64) a * b`
    pub fn mul_wide_u32_reg(&mut self, a: VirtualReg, b: VirtualReg) -> VirtualReg {
        let dst = self.fresh(PtxType::U64);
        self.binary(PtxOp::MulWide, PtxType::U32, dst, Operand::Reg(a), Operand::Reg(b));
        dst
    }

    /// `dst = a + b` on addresses
    pub fn add_u64(&mut self, a: VirtualReg, b: VirtualReg) -> VirtualReg {
        let dst = self.fresh(PtxType::U64);
        self.binary(PtxOp::Add, PtxType::U64, dst, Operand::Reg(a), Operand::Reg(b));
        dst
    }

    /// `dst += src` on addresses
    pub fn add_u64_inplace(&mut self, dst: VirtualReg, src: VirtualReg) {
        self.binary(PtxOp::Add, PtxType::U64, dst, Operand::Reg(dst), Operand::Reg(src));
    }

    /// `dst += imm` on addresses
    pub fn add_u64_imm_inplace(&mut self, dst: VirtualReg, imm: u32) {
        self.binary(PtxOp::Add, PtxType::U64, dst, Operand::Reg(dst), Operand::ImmU32(imm));
    }

    /// `dst += imm`
    pub fn add_u32_imm_inplace(&mut self, dst: VirtualReg, imm: u32) {
        self.binary(PtxOp::Add, PtxType::U32, dst, Operand::Reg(dst), Operand::ImmU32(imm));
    }

    /// `dst = a * b` (round-to-nearest, never fused)
    pub fn mul_f32(&mut self, a: VirtualReg, b: VirtualReg) -> VirtualReg {
        let dst = self.fresh(PtxType::F32);
        self.binary(PtxOp::Mul, PtxType::F32, dst, Operand::Reg(a), Operand::Reg(b));
        dst
    }

    /// `acc += value` (round-to-nearest, never fused)
    pub fn add_f32_inplace(&mut self, acc: VirtualReg, value: VirtualReg) {
        self.binary(PtxOp::Add, PtxType::F32, acc, Operand::Reg(acc), Operand::Reg(value));
    }

    /// `pred = a >= b` (unsigned)
    pub fn setp_ge_u32(&mut self, a: VirtualReg, b: VirtualReg) -> VirtualReg {
        let dst = self.fresh(PtxType::Pred);
        self.push(
            PtxInstruction::new(PtxOp::Setp, PtxType::U32)
                .cmp(CmpOp::Ge)
                .dst(Operand::Reg(dst))
                .src(Operand::Reg(a))
                .src(Operand::Reg(b)),
        );
        dst
    }

    /// `@pred bra label`
    pub fn branch_if(&mut self, pred: VirtualReg, label: &str) {
        self.push(
            PtxInstruction::new(PtxOp::Bra, PtxType::U32)
                .predicated(Predicate {
                    reg: pred,
                    negated: false,
                })
                .label(label),
        );
    }

    /// `bra.uni label`
    pub fn branch(&mut self, label: &str) {
        self.push(PtxInstruction::new(PtxOp::Bra, PtxType::U32).label(label));
    }

    /// Place a label
    pub fn label(&mut self, name: &str) {
        self.body.push(Statement::Label(name.to_string()));
    }

    /// `ld.global.f32 dst, [addr]`
    pub fn ld_global_f32(&mut self, addr: VirtualReg) -> VirtualReg {
        let dst = self.fresh(PtxType::F32);
        self.push(
            PtxInstruction::new(PtxOp::Ld, PtxType::F32)
                .space(PtxStateSpace::Global)
                .dst(Operand::Reg(dst))
                .src(Operand::Addr {
                    base: addr,
                    offset: 0,
                }),
        );
        dst
    }

    /// `st.global.f32 [addr], value`
    pub fn st_global_f32(&mut self, addr: VirtualReg, value: VirtualReg) {
        self.push(
            PtxInstruction::new(PtxOp::St, PtxType::F32)
                .space(PtxStateSpace::Global)
                .src(Operand::Addr {
                    base: addr,
                    offset: 0,
                })
                .src(Operand::Reg(value)),
        );
    }

    /// `ret;`
    pub fn ret(&mut self) {
        self.push(PtxInstruction::new(PtxOp::Ret, PtxType::U32));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_param_is_reported() {
        let kernel = PtxKernel::new("bad")
            .param(PtxType::U32, "n")
            .build(|ctx| {
                let _ = ctx.load_param_u32("missing");
                ctx.ret();
            });
        let err = kernel.validate().unwrap_err();
        assert!(err.to_string().contains("unknown parameter 'missing'"));
    }

    #[test]
    fn test_param_type_mismatch_is_reported() {
        let kernel = PtxKernel::new("bad")
            .param(PtxType::U64, "ptr")
            .build(|ctx| {
                let _ = ctx.load_param_u32("ptr");
            });
        assert!(kernel.validate().is_err());
    }

    #[test]
    fn test_undefined_label_is_reported() {
        let kernel = PtxKernel::new("bad").build(|ctx| {
            ctx.branch("nowhere");
            ctx.ret();
        });
        let err = kernel.validate().unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_inplace_ops_reuse_register() {
        let kernel = PtxKernel::new("acc").build(|ctx| {
            let acc = ctx.mov_f32_imm(0.0);
            let one = ctx.mov_f32_imm(1.0);
            ctx.add_f32_inplace(acc, one);
            ctx.ret();
        });
        let ptx = kernel.emit();
        assert!(ptx.contains("add.rn.f32 %f0, %f0, %f1;"));
        assert_eq!(kernel.registers().count(PtxType::F32), 2);
    }

    #[test]
    fn test_labels_emitted_at_column_zero() {
        let kernel = PtxKernel::new("labels").build(|ctx| {
            ctx.label("exit");
            ctx.ret();
        });
        assert!(kernel.emit().contains("\nexit:\n    ret;\n"));
        assert_eq!(kernel.instruction_count(), 1);
    }

    #[test]
    fn test_module_validate_rejects_address_size() {
        let module = PtxModule::new().address_size(48);
        assert!(module.validate().is_err());
    }
}
