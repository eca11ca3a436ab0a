//! Target-independent assembler infrastructure.
//!
//! This module provides the pieces shared by any instruction encoder: the
//! code buffer with its capacity-guard discipline, the label state machine
//! with explicit pending-patch side tables, relocation records, and the
//! error type used at the encoder boundary.

pub mod buffer;
pub mod error;
pub mod fixup;
pub mod label;

pub use buffer::{CodeBuffer, MAX_INSTRUCTION_LEN};
pub use error::{EmitError, EmitResult};
pub use fixup::{Fixup, FixupRef, RelocKind, SymbolId, SymbolTable};
pub use label::Label;
