//! x86-specific components.
//!
//! This module contains everything that knows about x86 encodings:
//! - Register files and operand sizes
//! - The ModRM/SIB address builder and immediates
//! - Condition codes
//! - The architecture traits for the 32- and 64-bit variants
//! - The instruction encoder itself

pub mod arch;
pub mod assembler;
pub mod cond;
pub mod operand;
pub mod regs;

pub use arch::{Arch, X86_32, X86_64};
pub use assembler::{Assembler, MachineCode, CALL_EXTERNAL_SIZE};
pub use cond::{CmppsCond, Cond, RoundingMode};
pub use operand::{Address, Immediate, Scale};
pub use regs::{ByteReg, FpSize, Gpr, OpSize, X87, Xmm};
