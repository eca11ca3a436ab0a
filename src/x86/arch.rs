// This module defines the architecture parameter that lets one encoder
// implementation serve both x86 variants. The trait supplies everything
// that differs between them: whether REX prefixes exist, which registers
// are encodable, which relocation type numbers a PC-relative or absolute
// fixup carries, and which legacy opcode groups (pusha/popa, the x87
// stack) are still available. The encoder is written once against this
// interface and instantiated per target, so there is no dynamic dispatch
// anywhere on the emission path.

//! Architecture traits parameterizing the encoder over 32-/64-bit x86.

use crate::core::{EmitError, EmitResult, RelocKind};

use super::operand::Address;
use super::regs::{ByteReg, Gpr, OpSize, Xmm};

/// Static description of an x86 target variant.
pub trait Arch: Copy + Clone + std::fmt::Debug + 'static {
    const IS_64BIT: bool;
    const NAME: &'static str;

    /// pusha/popa exist only in 32-bit mode.
    const HAS_PUSHA: bool;
    /// The x87 stack is only used by the 32-bit lowering.
    const HAS_X87: bool;

    /// Register taking the short-form accumulator opcodes.
    const ACCUMULATOR: Gpr = Gpr::Ax;
    /// Register implied by shift-by-register encodings.
    const COUNTER: Gpr = Gpr::Cx;

    /// Relocation type of a 32-bit PC-relative fixup on this target.
    const PC_REL32: RelocKind;
    /// Relocation type of a 32-bit absolute fixup on this target.
    const ABS32: RelocKind;

    fn check_gpr(reg: Gpr) -> EmitResult<()>;
    fn check_xmm(reg: Xmm) -> EmitResult<()>;
    fn check_byte_reg(reg: ByteReg) -> EmitResult<()>;

    /// Whether `reg` can appear in a byte-sized GPR instruction.
    fn check_byte_alias(reg: Gpr) -> EmitResult<()>;

    fn check_size(ty: OpSize) -> EmitResult<()>;

    /// Whether `addr` is encodable: extended base/index registers demand
    /// REX bits that do not exist in 32-bit mode.
    fn check_addr(addr: &Address) -> EmitResult<()> {
        if !Self::IS_64BIT && addr.rex_bits() != 0 {
            return Err(EmitError::AddressNeedsRex);
        }
        Ok(())
    }
}

/// 32-bit protected-mode x86.
#[derive(Clone, Copy, Debug)]
pub struct X86_32;

impl Arch for X86_32 {
    const IS_64BIT: bool = false;
    const NAME: &'static str = "x86";
    const HAS_PUSHA: bool = true;
    const HAS_X87: bool = true;
    const PC_REL32: RelocKind = RelocKind::R_386_PC32;
    const ABS32: RelocKind = RelocKind::R_386_32;

    fn check_gpr(reg: Gpr) -> EmitResult<()> {
        if reg.is_extended() {
            return Err(EmitError::InvalidRegister { reg: reg.name() });
        }
        Ok(())
    }

    fn check_xmm(reg: Xmm) -> EmitResult<()> {
        if reg.is_extended() {
            return Err(EmitError::InvalidRegister { reg: reg.name() });
        }
        Ok(())
    }

    fn check_byte_reg(reg: ByteReg) -> EmitResult<()> {
        if reg.needs_rex() {
            return Err(EmitError::InvalidRegister { reg: reg.name() });
        }
        Ok(())
    }

    fn check_byte_alias(reg: Gpr) -> EmitResult<()> {
        // Only eax/ecx/edx/ebx have low-byte aliases without REX.
        if reg.encoding() > 3 {
            return Err(EmitError::NoByteAlias { reg: reg.name() });
        }
        Ok(())
    }

    fn check_size(ty: OpSize) -> EmitResult<()> {
        if ty.is_quad() {
            return Err(EmitError::InvalidOperandSize { bits: 64 });
        }
        Ok(())
    }
}

/// Long-mode x86-64.
#[derive(Clone, Copy, Debug)]
pub struct X86_64;

impl Arch for X86_64 {
    const IS_64BIT: bool = true;
    const NAME: &'static str = "x86_64";
    const HAS_PUSHA: bool = false;
    const HAS_X87: bool = false;
    const PC_REL32: RelocKind = RelocKind::R_X86_64_PC32;
    const ABS32: RelocKind = RelocKind::R_X86_64_32;

    fn check_gpr(_reg: Gpr) -> EmitResult<()> {
        Ok(())
    }

    fn check_xmm(_reg: Xmm) -> EmitResult<()> {
        Ok(())
    }

    fn check_byte_reg(reg: ByteReg) -> EmitResult<()> {
        // ah/ch/dh/bh remain reachable, but not in combination with a REX
        // prefix; the encoder rejects them where REX bits are present.
        let _ = reg;
        Ok(())
    }

    fn check_byte_alias(_reg: Gpr) -> EmitResult<()> {
        // With REX every GPR has a low-byte alias.
        Ok(())
    }

    fn check_size(_ty: OpSize) -> EmitResult<()> {
        Ok(())
    }
}
