// This module implements the growable byte sink the encoder writes into.
// CodeBuffer owns the emitted bytes and the side list of fixups recorded
// while encoding. The central discipline is the per-instruction capacity
// guard: ensure_capacity() runs once before any byte of an instruction and
// guarantees enough spare room for the longest legal x86 instruction, so no
// reallocation can happen between the first and last byte of one
// instruction. Patching of already-written fields (label resolution) goes
// through load/store accessors rather than raw pointers.

//! Code buffer with the one-growth-check-per-instruction discipline.

use super::fixup::Fixup;

/// Architectural upper bound on the length of one x86 instruction.
pub const MAX_INSTRUCTION_LEN: usize = 15;

/// Spare room guaranteed by [`CodeBuffer::ensure_capacity`]. Leaves space
/// for the longest possible instruction and allows a single, fast space
/// check per instruction.
const CAPACITY_GAP: usize = 32;

const INITIAL_CAPACITY: usize = 4096;

/// Growable byte store for one function's machine code.
///
/// Created per compiled function and owned exclusively by one assembler
/// instance; there is no internal synchronization because none is needed.
pub struct CodeBuffer {
    bytes: Vec<u8>,
    fixups: Vec<Fixup>,
    /// Debug guard: emission is only legal below this watermark, i.e.
    /// within the span covered by the last `ensure_capacity` call.
    #[cfg(debug_assertions)]
    ensured_until: usize,
}

impl CodeBuffer {
    pub fn new() -> CodeBuffer {
        CodeBuffer {
            bytes: Vec::with_capacity(INITIAL_CAPACITY),
            fixups: Vec::new(),
            #[cfg(debug_assertions)]
            ensured_until: 0,
        }
    }

    /// Guarantee room for one worst-case instruction.
    ///
    /// Must be called exactly once per instruction, before its first byte.
    /// Growth may move the backing storage, which is why it is forbidden
    /// between the bytes of a single instruction.
    pub fn ensure_capacity(&mut self) {
        let spare = self.bytes.capacity() - self.bytes.len();
        if spare < CAPACITY_GAP {
            self.bytes.reserve(CAPACITY_GAP.max(self.bytes.capacity()));
        }
        #[cfg(debug_assertions)]
        {
            self.ensured_until = self.bytes.len() + CAPACITY_GAP;
        }
    }

    #[inline]
    fn check_guard(&self) {
        #[cfg(debug_assertions)]
        debug_assert!(
            self.bytes.len() < self.ensured_until,
            "emission outside an ensured instruction scope"
        );
    }

    #[inline]
    pub fn emit_u8(&mut self, value: u8) {
        self.check_guard();
        self.bytes.push(value);
    }

    #[inline]
    pub fn emit_u16(&mut self, value: u16) {
        self.check_guard();
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn emit_i32(&mut self, value: i32) {
        self.check_guard();
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Current length, which is also the offset of the next byte emitted.
    #[inline]
    pub fn position(&self) -> usize {
        self.bytes.len()
    }

    pub fn load_u8(&self, position: usize) -> u8 {
        self.bytes[position]
    }

    pub fn store_u8(&mut self, position: usize, value: u8) {
        self.bytes[position] = value;
    }

    pub fn load_i32(&self, position: usize) -> i32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[position..position + 4]);
        i32::from_le_bytes(raw)
    }

    pub fn store_i32(&mut self, position: usize, value: i32) {
        self.bytes[position..position + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Record a fixup whose patch field starts at the current position.
    pub fn record_fixup(&mut self, fixup: Fixup) {
        log::trace!(
            "fixup kind {} for symbol #{} at offset {}",
            fixup.kind.0,
            fixup.sym.index(),
            fixup.position
        );
        self.fixups.push(fixup);
    }

    pub fn fixups(&self) -> &[Fixup] {
        &self.fixups
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Freeze the buffer, handing the bytes and fixup list to the caller.
    pub fn finish(self) -> (Vec<u8>, Vec<Fixup>) {
        (self.bytes, self.fixups)
    }
}

impl Default for CodeBuffer {
    fn default() -> Self {
        CodeBuffer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_emission() {
        let mut buf = CodeBuffer::new();
        buf.ensure_capacity();
        buf.emit_u8(0x05);
        buf.emit_i32(0x12345678);
        assert_eq!(buf.bytes(), &[0x05, 0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn store_patches_in_place() {
        let mut buf = CodeBuffer::new();
        buf.ensure_capacity();
        buf.emit_u8(0xE9);
        let pos = buf.position();
        buf.emit_i32(0);
        buf.store_i32(pos, -5);
        assert_eq!(buf.load_i32(pos), -5);
        assert_eq!(buf.position(), 5);
    }

    #[test]
    fn max_instruction_fits_without_second_growth() {
        let mut buf = CodeBuffer::new();
        // Push the buffer right up to a capacity boundary.
        buf.ensure_capacity();
        while buf.bytes.capacity() - buf.position() > CAPACITY_GAP {
            buf.emit_u8(0x90);
            buf.ensure_capacity();
        }
        buf.ensure_capacity();
        let cap = buf.bytes.capacity();
        for _ in 0..MAX_INSTRUCTION_LEN {
            buf.emit_u8(0x90);
        }
        assert_eq!(cap, buf.bytes.capacity());
    }
}
