//! x86-emit - machine code assembly for 32- and 64-bit x86.
//!
//! This crate converts already-selected, already operand-assigned machine
//! instructions into the exact byte sequences the CPU expects, while
//! tracking not-yet-known jump targets and external symbol references so
//! they can be patched later. Instruction selection, register allocation
//! and linking are external collaborators; the byte-for-byte encoding is
//! the contract.
//!
//! # Primary Usage
//!
//! ```
//! use x86_emit::{Assembler, Gpr, Immediate, OpSize, X86_64};
//!
//! let mut asm = Assembler::<X86_64>::new();
//! asm.mov_reg_imm(OpSize::S32, Gpr::Ax, &Immediate::new(42))?;
//! asm.ret()?;
//! let out = asm.finalize()?;
//! assert_eq!(out.code, vec![0xB8, 0x2A, 0x00, 0x00, 0x00, 0xC3]);
//! # Ok::<(), x86_emit::EmitError>(())
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Shared infrastructure (buffer, labels, fixups, errors)
//! - [`x86`] - The encoder, operand model and architecture traits
//! - [`obj`] - Relocatable ELF output through the `object` crate
//!
//! One assembler instance owns one function's code buffer and is driven
//! by a single thread; many functions may be assembled concurrently with
//! an assembler each.

pub mod core;
pub mod obj;
pub mod x86;

pub use crate::core::{
    CodeBuffer, EmitError, EmitResult, Fixup, FixupRef, Label, RelocKind, SymbolId, SymbolTable,
    MAX_INSTRUCTION_LEN,
};
pub use crate::x86::{
    Address, Arch, Assembler, ByteReg, CmppsCond, Cond, FpSize, Gpr, Immediate, MachineCode,
    OpSize, RoundingMode, Scale, X86_32, X86_64, Xmm, X87,
};
