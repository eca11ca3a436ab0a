// This module defines error types for the assembler using the thiserror crate
// for idiomatic Rust error handling. EmitError is the main error enum covering
// the three failure classes of the encoder: illegal operand combinations
// (registers unavailable on the target, stack pointer used as an index,
// immediates that overflow their field, shift counts outside cl), label misuse
// (rebinding a bound label, short branches whose displacement cannot fit in
// eight bits), and unresolved patch sites at finalize. Every variant indicates
// a bug in the instruction-selection layer upstream; none are recoverable at
// runtime. The module also provides EmitResult<T> as a convenience type alias
// for Result<T, EmitError>.

//! Error types for the encoder boundary.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

/// Main error type for instruction emission.
///
/// Every variant is a caller bug: the instruction selector handed the
/// encoder something the hardware cannot express. No byte of the offending
/// instruction is committed to the buffer when an error is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmitError {
    #[error("register {reg} is not encodable on this target")]
    InvalidRegister { reg: &'static str },

    #[error("register {reg} has no byte-addressable alias")]
    NoByteAlias { reg: &'static str },

    #[error("{bits}-bit operands are not supported on this target")]
    InvalidOperandSize { bits: u32 },

    #[error("address requires extended registers unavailable on this target")]
    AddressNeedsRex,

    #[error("the stack pointer cannot be used as an index register")]
    IndexIsStackPointer,

    #[error("immediate {value} does not fit in {bits} bits")]
    ImmediateOverflow { value: i32, bits: u32 },

    #[error("shift count must be in cl, found {reg}")]
    ShiftCountNotCl { reg: &'static str },

    #[error("no nop encoding of {size} bytes")]
    InvalidNopSize { size: usize },

    #[error("opcode is only available on 32-bit targets")]
    Legacy32Only,

    #[error("opcode is only available on 64-bit targets")]
    Long64Only,

    #[error("x87 instructions are not available on this target")]
    NoX87,

    #[error("label is already bound at offset {offset}")]
    LabelRebound { offset: usize },

    #[error("short branch displacement {disp} does not fit in 8 bits")]
    ShortDisplacementOverflow { disp: i64 },

    #[error("{count} unresolved patch sites remain at finalize")]
    UnresolvedPatches { count: usize },
}

/// Result type alias for emission operations.
pub type EmitResult<T> = Result<T, EmitError>;
