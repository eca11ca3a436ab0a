// This module implements the mnemonic encoder table, the bulk of the
// assembler. Every public method encodes exactly one instruction for one
// operand shape: it validates the operands against the architecture
// parameter, runs the buffer's capacity check, and then appends the
// documented byte sequence. The recurring structure is factored the way
// the hardware factors it: the eight integer ALU instructions share one
// opcode-arithmetic scheme driven by a three-bit tag, the four shifts
// share a generic shift emitter, the SSE families share prefix/escape
// selection, and REX prefixes are derived minimally from the operands'
// high bits (statically absent on the 32-bit instantiation).

//! The x86 instruction encoder, generic over the target variant.

use std::collections::HashMap;
use std::marker::PhantomData;

use crate::core::label::LabelState;
use crate::core::{
    CodeBuffer, EmitError, EmitResult, Fixup, Label, SymbolId, SymbolTable,
};

use super::arch::Arch;
use super::cond::{CmppsCond, Cond, RoundingMode};
use super::operand::{Address, Immediate, REX_B, REX_R, REX_W};
use super::regs::{ByteReg, FpSize, Gpr, OpSize, X87, Xmm};

/// ALU operation tags: bits 3..5 of the shared opcode scheme.
const TAG_ADD: u8 = 0;
const TAG_OR: u8 = 1;
const TAG_ADC: u8 = 2;
const TAG_SBB: u8 = 3;
const TAG_AND: u8 = 4;
const TAG_SUB: u8 = 5;
const TAG_XOR: u8 = 6;
const TAG_CMP: u8 = 7;

/// Shift group tags: the reg field of the D0..D3/C0..C1 opcodes.
const TAG_ROL: u8 = 0;
const TAG_SHL: u8 = 4;
const TAG_SHR: u8 = 5;
const TAG_SAR: u8 = 7;

const MAX_NOP_SIZE: usize = 8;

/// Byte length of `call <external symbol>`: opcode plus rel32.
pub const CALL_EXTERNAL_SIZE: usize = 5;

/// Bundle alignment for function entry padding.
const FUNCTION_ALIGN: usize = 32;

/// A finalized function: raw machine code plus the relocation records a
/// downstream linker still has to resolve.
pub struct MachineCode {
    pub code: Vec<u8>,
    pub fixups: Vec<Fixup>,
    pub symbols: SymbolTable,
}

/// One-function assembler instance.
///
/// Filled sequentially by one logical thread; independent functions get
/// independent assemblers and may be encoded concurrently with no shared
/// state. The generic parameter selects the 32- or 64-bit encoding rules
/// at compile time.
pub struct Assembler<A: Arch> {
    buffer: CodeBuffer,
    labels: Vec<LabelState>,
    /// Labels for numbered basic blocks, created on first reference.
    block_labels: HashMap<usize, Label>,
    symbols: SymbolTable,
    _arch: PhantomData<A>,
}

impl<A: Arch> Assembler<A> {
    pub fn new() -> Assembler<A> {
        Assembler {
            buffer: CodeBuffer::new(),
            labels: Vec::new(),
            block_labels: HashMap::new(),
            symbols: SymbolTable::new(),
            _arch: PhantomData,
        }
    }

    /// Offset of the next instruction emitted.
    pub fn position(&self) -> usize {
        self.buffer.position()
    }

    pub fn bytes(&self) -> &[u8] {
        self.buffer.bytes()
    }

    /// Intern an external symbol for call/jump/data fixups.
    pub fn extern_symbol(&mut self, name: &str) -> SymbolId {
        self.symbols.intern(name)
    }

    // ==== LABEL MANAGEMENT ====

    pub fn new_label(&mut self) -> Label {
        self.labels.push(LabelState::new());
        Label((self.labels.len() - 1) as u32)
    }

    /// Get or create the label for a numbered basic block.
    pub fn block_label(&mut self, block: usize) -> Label {
        if let Some(&label) = self.block_labels.get(&block) {
            return label;
        }
        let label = self.new_label();
        self.block_labels.insert(block, label);
        label
    }

    /// Bind the label for a numbered basic block at the current position.
    pub fn bind_block(&mut self, block: usize) -> EmitResult<()> {
        let label = self.block_label(block);
        self.bind(label)
    }

    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.labels[label.index()].offset()
    }

    pub fn is_bound(&self, label: Label) -> bool {
        self.labels[label.index()].is_bound()
    }

    /// Bind `label` to the current position and resolve every patch site
    /// recorded against it.
    ///
    /// Binding twice is a caller bug. A pending short patch whose
    /// displacement no longer fits eight bits means the caller promised a
    /// near branch the layout could not keep; nothing is written back in
    /// that case.
    pub fn bind(&mut self, label: Label) -> EmitResult<()> {
        let bound = self.buffer.position();
        let state = std::mem::replace(&mut self.labels[label.index()], LabelState::new());
        match state {
            LabelState::Bound { offset } => {
                self.labels[label.index()] = LabelState::Bound { offset };
                Err(EmitError::LabelRebound { offset })
            }
            LabelState::Unbound {
                long_patches,
                short_patches,
            } => {
                for &pos in &short_patches {
                    let disp = bound as i64 - (pos as i64 + 1);
                    if i8::try_from(disp).is_err() {
                        // Leave the patch lists intact for finalize's
                        // unresolved-patch accounting.
                        self.labels[label.index()] = LabelState::Unbound {
                            long_patches,
                            short_patches,
                        };
                        return Err(EmitError::ShortDisplacementOverflow { disp });
                    }
                }
                log::trace!(
                    "label #{} bound at {} ({} long, {} short patches)",
                    label.index(),
                    bound,
                    long_patches.len(),
                    short_patches.len()
                );
                for pos in long_patches {
                    self.buffer.store_i32(pos, (bound - (pos + 4)) as i32);
                }
                for pos in short_patches {
                    self.buffer.store_u8(pos, (bound as i64 - (pos as i64 + 1)) as u8);
                }
                self.labels[label.index()] = LabelState::Bound { offset: bound };
                Ok(())
            }
        }
    }

    /// Freeze the buffer and hand over code, fixups and symbols.
    ///
    /// Fails if any forward reference was never resolved; the bytes would
    /// not be valid machine code.
    pub fn finalize(self) -> EmitResult<MachineCode> {
        let pending: usize = self.labels.iter().map(|l| l.pending_patches()).sum();
        if pending > 0 {
            return Err(EmitError::UnresolvedPatches { count: pending });
        }
        let (code, fixups) = self.buffer.finish();
        log::debug!(
            "finalized {} bytes of {} code, {} fixups",
            code.len(),
            A::NAME,
            fixups.len()
        );
        Ok(MachineCode {
            code,
            fixups,
            symbols: self.symbols,
        })
    }

    // ==== PREFIX AND OPERAND EMISSION HELPERS ====

    #[inline]
    fn emit_operand_size_override(&mut self) {
        self.buffer.emit_u8(0x66);
    }

    /// Emit a REX prefix for the collected bits. No-op on the 32-bit
    /// instantiation; `force` emits the bare 0x40 prefix needed to reach
    /// spl/bpl/sil/dil in byte instructions.
    #[inline]
    fn emit_rex(&mut self, bits: u8, force: bool) {
        if A::IS_64BIT && (bits != 0 || force) {
            self.buffer.emit_u8(0x40 | bits);
        }
    }

    #[inline]
    fn rex_w(ty: OpSize) -> u8 {
        if ty.is_quad() {
            REX_W
        } else {
            0
        }
    }

    /// REX bits for a register(reg field)/register(rm field) pair.
    #[inline]
    fn rex_rr(ty: OpSize, reg: u8, rm: u8) -> u8 {
        Self::rex_w(ty)
            | (if reg & 8 != 0 { REX_R } else { 0 })
            | (if rm & 8 != 0 { REX_B } else { 0 })
    }

    /// REX bits for a register(reg field)/memory pair.
    #[inline]
    fn rex_ra(ty: OpSize, reg: u8, addr: &Address) -> u8 {
        Self::rex_w(ty) | (if reg & 8 != 0 { REX_R } else { 0 }) | addr.rex_bits()
    }

    /// REX bits for a memory operand alone (reg field holds a tag).
    #[inline]
    fn rex_a(ty: OpSize, addr: &Address) -> u8 {
        Self::rex_w(ty) | addr.rex_bits()
    }

    /// Byte instructions touching encodings 4..=7 need a REX prefix even
    /// without any bit set, otherwise they would address ah/ch/dh/bh.
    #[inline]
    fn byte_force(ty: OpSize, encodings: &[u8]) -> bool {
        A::IS_64BIT && ty.is_byte() && encodings.iter().any(|&e| (4..8).contains(&e))
    }

    /// ModRM with mod=11.
    #[inline]
    fn emit_register_operand(&mut self, reg: u8, rm: u8) {
        self.buffer.emit_u8(0xC0 | ((reg & 7) << 3) | (rm & 7));
    }

    /// Emit an encoded operand with `reg_field` folded into its ModRM
    /// byte, registering the operand's fixup at the displacement field.
    fn emit_operand(&mut self, reg_field: u8, operand: &Address) {
        debug_assert!(reg_field < 8);
        let enc = operand.encoding();
        debug_assert!(enc[0] & 0x38 == 0);
        let disp_start = match operand.fixup() {
            Some(_) => enc.len() - 4,
            None => enc.len(),
        };
        self.buffer.emit_u8(enc[0] | ((reg_field & 7) << 3));
        for &byte in &enc[1..disp_start] {
            self.buffer.emit_u8(byte);
        }
        if let Some(fixup) = operand.fixup() {
            let position = self.buffer.position();
            self.buffer.record_fixup(Fixup {
                position,
                kind: fixup.kind,
                sym: fixup.sym,
                addend: operand.disp32(),
            });
            for &byte in &enc[disp_start..] {
                self.buffer.emit_u8(byte);
            }
        }
    }

    /// Emit a 16- or 32-bit immediate field, registering its fixup.
    fn emit_immediate(&mut self, ty: OpSize, imm: &Immediate) {
        if ty.is_word() {
            debug_assert!(imm.fixup().is_none(), "fixups patch 32-bit fields only");
            self.buffer.emit_u16(imm.value() as u16);
        } else {
            if let Some(fixup) = imm.fixup() {
                let position = self.buffer.position();
                self.buffer.record_fixup(Fixup {
                    position,
                    kind: fixup.kind,
                    sym: fixup.sym,
                    addend: imm.value(),
                });
            }
            self.buffer.emit_i32(imm.value());
        }
    }

    /// Shared byte-sized ALU immediate forms: accumulator short form or
    /// 0x80 /tag ib.
    fn emit_complex_i8(&mut self, tag: u8, operand: &Address, imm: &Immediate) {
        debug_assert!(tag < 8);
        debug_assert!(imm.is_int8());
        if operand.is_direct_register(A::ACCUMULATOR) {
            // Short form against al.
            self.buffer.emit_u8(0x04 | (tag << 3));
            self.buffer.emit_u8(imm.value() as u8);
        } else {
            self.buffer.emit_u8(0x80);
            self.emit_operand(tag, operand);
            self.buffer.emit_u8(imm.value() as u8);
        }
    }

    /// Shared full-width ALU immediate forms: sign-extended imm8 (0x83),
    /// accumulator short form, or 0x81 /tag.
    fn emit_complex(&mut self, ty: OpSize, tag: u8, operand: &Address, imm: &Immediate) {
        debug_assert!(tag < 8);
        if imm.is_int8() {
            // Sign-extended 8-bit immediate.
            self.buffer.emit_u8(0x83);
            self.emit_operand(tag, operand);
            self.buffer.emit_u8(imm.value() as u8);
        } else if operand.is_direct_register(A::ACCUMULATOR) {
            self.buffer.emit_u8(0x05 | (tag << 3));
            self.emit_immediate(ty, imm);
        } else {
            self.buffer.emit_u8(0x81);
            self.emit_operand(tag, operand);
            self.emit_immediate(ty, imm);
        }
    }

    // ==== INTEGER ALU GROUP ====

    fn arith_reg_reg(&mut self, tag: u8, ty: OpSize, dst: Gpr, src: Gpr) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_gpr(dst)?;
        A::check_gpr(src)?;
        if ty.is_byte() {
            A::check_byte_alias(dst)?;
            A::check_byte_alias(src)?;
        }
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(
            Self::rex_rr(ty, dst.encoding(), src.encoding()),
            Self::byte_force(ty, &[dst.encoding(), src.encoding()]),
        );
        self.buffer
            .emit_u8(tag * 8 + if ty.is_byte() { 2 } else { 3 });
        self.emit_register_operand(dst.low_bits(), src.low_bits());
        Ok(())
    }

    fn arith_reg_mem(&mut self, tag: u8, ty: OpSize, dst: Gpr, src: &Address) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_gpr(dst)?;
        A::check_addr(src)?;
        if ty.is_byte() {
            A::check_byte_alias(dst)?;
        }
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(
            Self::rex_ra(ty, dst.encoding(), src),
            Self::byte_force(ty, &[dst.encoding()]),
        );
        self.buffer
            .emit_u8(tag * 8 + if ty.is_byte() { 2 } else { 3 });
        self.emit_operand(dst.low_bits(), src);
        Ok(())
    }

    fn arith_mem_reg(&mut self, tag: u8, ty: OpSize, dst: &Address, src: Gpr) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_gpr(src)?;
        A::check_addr(dst)?;
        if ty.is_byte() {
            A::check_byte_alias(src)?;
        }
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(
            Self::rex_ra(ty, src.encoding(), dst),
            Self::byte_force(ty, &[src.encoding()]),
        );
        self.buffer
            .emit_u8(tag * 8 + if ty.is_byte() { 0 } else { 1 });
        self.emit_operand(src.low_bits(), dst);
        Ok(())
    }

    fn arith_reg_imm(&mut self, tag: u8, ty: OpSize, dst: Gpr, imm: &Immediate) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_gpr(dst)?;
        if ty.is_byte() {
            A::check_byte_alias(dst)?;
            if !imm.is_int8() {
                return Err(EmitError::ImmediateOverflow {
                    value: imm.value(),
                    bits: 8,
                });
            }
        }
        self.buffer.ensure_capacity();
        let operand = Address::direct(dst);
        if ty.is_byte() {
            self.emit_rex(
                Self::rex_a(ty, &operand),
                Self::byte_force(ty, &[dst.encoding()]),
            );
            self.emit_complex_i8(tag, &operand, imm);
            return Ok(());
        }
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(Self::rex_a(ty, &operand), false);
        self.emit_complex(ty, tag, &operand, imm);
        Ok(())
    }

    fn arith_mem_imm(&mut self, tag: u8, ty: OpSize, dst: &Address, imm: &Immediate) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_addr(dst)?;
        if ty.is_byte() && !imm.is_int8() {
            return Err(EmitError::ImmediateOverflow {
                value: imm.value(),
                bits: 8,
            });
        }
        self.buffer.ensure_capacity();
        if ty.is_byte() {
            self.emit_rex(Self::rex_a(ty, dst), false);
            self.emit_complex_i8(tag, dst, imm);
            return Ok(());
        }
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(Self::rex_a(ty, dst), false);
        self.emit_complex(ty, tag, dst, imm);
        Ok(())
    }

    // ==== SHIFT GROUP ====

    fn generic_shift_imm(&mut self, tag: u8, ty: OpSize, reg: Gpr, imm: &Immediate) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_gpr(reg)?;
        if ty.is_byte() {
            A::check_byte_alias(reg)?;
        }
        if !imm.is_int8() {
            return Err(EmitError::ImmediateOverflow {
                value: imm.value(),
                bits: 8,
            });
        }
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(
            Self::rex_rr(ty, 0, reg.encoding()),
            Self::byte_force(ty, &[reg.encoding()]),
        );
        if imm.value() == 1 {
            self.buffer.emit_u8(if ty.is_byte() { 0xD0 } else { 0xD1 });
            self.emit_register_operand(tag, reg.low_bits());
        } else {
            self.buffer.emit_u8(if ty.is_byte() { 0xC0 } else { 0xC1 });
            self.emit_register_operand(tag, reg.low_bits());
            self.buffer.emit_u8(imm.value() as u8);
        }
        Ok(())
    }

    /// Shift by a register amount. Only the counter register can hold the
    /// shift count; that is a hardware restriction.
    fn generic_shift_cl_reg(&mut self, tag: u8, ty: OpSize, reg: Gpr, shifter: Gpr) -> EmitResult<()> {
        if shifter != A::COUNTER {
            return Err(EmitError::ShiftCountNotCl {
                reg: shifter.name(),
            });
        }
        A::check_size(ty)?;
        A::check_gpr(reg)?;
        if ty.is_byte() {
            A::check_byte_alias(reg)?;
        }
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(
            Self::rex_rr(ty, 0, reg.encoding()),
            Self::byte_force(ty, &[reg.encoding()]),
        );
        self.buffer.emit_u8(if ty.is_byte() { 0xD2 } else { 0xD3 });
        self.emit_register_operand(tag, reg.low_bits());
        Ok(())
    }

    fn generic_shift_cl_mem(&mut self, tag: u8, ty: OpSize, operand: &Address, shifter: Gpr) -> EmitResult<()> {
        if shifter != A::COUNTER {
            return Err(EmitError::ShiftCountNotCl {
                reg: shifter.name(),
            });
        }
        A::check_size(ty)?;
        A::check_addr(operand)?;
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(Self::rex_a(ty, operand), false);
        self.buffer.emit_u8(if ty.is_byte() { 0xD2 } else { 0xD3 });
        self.emit_operand(tag, operand);
        Ok(())
    }

    // ==== SSE HELPERS ====

    fn xmm_rr(&mut self, prefix: Option<u8>, opcode: u8, reg: u8, rm: u8) {
        if let Some(p) = prefix {
            self.buffer.emit_u8(p);
        }
        self.emit_rex(Self::rex_rr(OpSize::S32, reg, rm), false);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(opcode);
        self.emit_register_operand(reg & 7, rm & 7);
    }

    fn xmm_ra(&mut self, prefix: Option<u8>, opcode: u8, reg: u8, addr: &Address) {
        if let Some(p) = prefix {
            self.buffer.emit_u8(p);
        }
        self.emit_rex(Self::rex_ra(OpSize::S32, reg, addr), false);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(opcode);
        self.emit_operand(reg & 7, addr);
    }

    fn xmm38_rr(&mut self, opcode: u8, reg: u8, rm: u8) {
        self.buffer.emit_u8(0x66);
        self.emit_rex(Self::rex_rr(OpSize::S32, reg, rm), false);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0x38);
        self.buffer.emit_u8(opcode);
        self.emit_register_operand(reg & 7, rm & 7);
    }

    fn xmm38_ra(&mut self, opcode: u8, reg: u8, addr: &Address) {
        self.buffer.emit_u8(0x66);
        self.emit_rex(Self::rex_ra(OpSize::S32, reg, addr), false);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0x38);
        self.buffer.emit_u8(opcode);
        self.emit_operand(reg & 7, addr);
    }

    fn xmm3a_rr(&mut self, opcode: u8, reg: u8, rm: u8, imm: u8) {
        self.buffer.emit_u8(0x66);
        self.emit_rex(Self::rex_rr(OpSize::S32, reg, rm), false);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0x3A);
        self.buffer.emit_u8(opcode);
        self.emit_register_operand(reg & 7, rm & 7);
        self.buffer.emit_u8(imm);
    }

    /// Element-size opcode choice shared by the packed-integer families.
    fn packed_elem_opcode(ty: OpSize, b8: u8, b16: u8, b32: u8) -> u8 {
        match ty {
            OpSize::S8 => b8,
            OpSize::S16 => b16,
            _ => b32,
        }
    }

    // ==== CALL / PUSH / POP ====

    pub fn call_reg(&mut self, reg: Gpr) -> EmitResult<()> {
        A::check_gpr(reg)?;
        self.buffer.ensure_capacity();
        self.emit_rex(Self::rex_rr(OpSize::S32, 0, reg.encoding()), false);
        self.buffer.emit_u8(0xFF);
        self.emit_register_operand(2, reg.low_bits());
        Ok(())
    }

    pub fn call_mem(&mut self, address: &Address) -> EmitResult<()> {
        A::check_addr(address)?;
        self.buffer.ensure_capacity();
        self.emit_rex(Self::rex_a(OpSize::S32, address), false);
        self.buffer.emit_u8(0xFF);
        self.emit_operand(2, address);
        Ok(())
    }

    /// Call an external symbol through a PC-relative fixup; the field is
    /// pre-loaded with -4 so a linker adding the target address lands on
    /// the instruction end.
    pub fn call_sym(&mut self, sym: SymbolId) -> EmitResult<()> {
        self.buffer.ensure_capacity();
        let start = self.buffer.position();
        self.buffer.emit_u8(0xE8);
        let position = self.buffer.position();
        self.buffer.record_fixup(Fixup {
            position,
            kind: A::PC_REL32,
            sym,
            addend: -4,
        });
        self.buffer.emit_i32(-4);
        debug_assert_eq!(self.buffer.position() - start, CALL_EXTERNAL_SIZE);
        Ok(())
    }

    pub fn push_reg(&mut self, reg: Gpr) -> EmitResult<()> {
        A::check_gpr(reg)?;
        self.buffer.ensure_capacity();
        self.emit_rex(Self::rex_rr(OpSize::S32, 0, reg.encoding()), false);
        self.buffer.emit_u8(0x50 + reg.low_bits());
        Ok(())
    }

    pub fn pop_reg(&mut self, reg: Gpr) -> EmitResult<()> {
        A::check_gpr(reg)?;
        self.buffer.ensure_capacity();
        self.emit_rex(Self::rex_rr(OpSize::S32, 0, reg.encoding()), false);
        self.buffer.emit_u8(0x58 + reg.low_bits());
        Ok(())
    }

    pub fn pop_mem(&mut self, address: &Address) -> EmitResult<()> {
        A::check_addr(address)?;
        self.buffer.ensure_capacity();
        self.emit_rex(Self::rex_a(OpSize::S32, address), false);
        self.buffer.emit_u8(0x8F);
        self.emit_operand(0, address);
        Ok(())
    }

    /// Legacy push-all; removed from the 64-bit instruction set.
    pub fn pusha(&mut self) -> EmitResult<()> {
        if !A::HAS_PUSHA {
            return Err(EmitError::Legacy32Only);
        }
        self.buffer.ensure_capacity();
        self.buffer.emit_u8(0x60);
        Ok(())
    }

    pub fn popa(&mut self) -> EmitResult<()> {
        if !A::HAS_PUSHA {
            return Err(EmitError::Legacy32Only);
        }
        self.buffer.ensure_capacity();
        self.buffer.emit_u8(0x61);
        Ok(())
    }

    // ==== SETCC / MOV FAMILY ====

    pub fn setcc(&mut self, condition: Cond, dst: ByteReg) -> EmitResult<()> {
        A::check_byte_reg(dst)?;
        self.buffer.ensure_capacity();
        self.emit_rex(
            if dst.is_extended() { REX_B } else { 0 },
            dst.needs_rex(),
        );
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0x90 + condition.encoding());
        self.buffer.emit_u8(0xC0 + dst.low_bits());
        Ok(())
    }

    pub fn setcc_mem(&mut self, condition: Cond, dst: &Address) -> EmitResult<()> {
        A::check_addr(dst)?;
        self.buffer.ensure_capacity();
        self.emit_rex(dst.rex_bits(), false);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0x90 + condition.encoding());
        self.emit_operand(0, dst);
        Ok(())
    }

    pub fn mov_reg_imm(&mut self, ty: OpSize, dst: Gpr, imm: &Immediate) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_gpr(dst)?;
        self.buffer.ensure_capacity();
        match ty {
            OpSize::S8 => {
                A::check_byte_alias(dst)?;
                self.emit_rex(
                    if dst.is_extended() { REX_B } else { 0 },
                    Self::byte_force(ty, &[dst.encoding()]),
                );
                self.buffer.emit_u8(0xB0 + dst.low_bits());
                self.buffer.emit_u8(imm.value() as u8);
            }
            OpSize::S16 | OpSize::S32 => {
                if ty.is_word() {
                    self.emit_operand_size_override();
                }
                self.emit_rex(if dst.is_extended() { REX_B } else { 0 }, false);
                self.buffer.emit_u8(0xB8 + dst.low_bits());
                self.emit_immediate(ty, imm);
            }
            OpSize::S64 => {
                // Sign-extended 32-bit immediate; full 64-bit constants
                // are materialized by the lowering in two steps.
                let operand = Address::direct(dst);
                self.emit_rex(Self::rex_a(ty, &operand), false);
                self.buffer.emit_u8(0xC7);
                self.emit_operand(0, &operand);
                self.emit_immediate(ty, imm);
            }
        }
        Ok(())
    }

    pub fn mov_reg_reg(&mut self, ty: OpSize, dst: Gpr, src: Gpr) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_gpr(dst)?;
        A::check_gpr(src)?;
        if ty.is_byte() {
            A::check_byte_alias(dst)?;
            A::check_byte_alias(src)?;
        }
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(
            Self::rex_rr(ty, src.encoding(), dst.encoding()),
            Self::byte_force(ty, &[dst.encoding(), src.encoding()]),
        );
        self.buffer.emit_u8(if ty.is_byte() { 0x88 } else { 0x89 });
        self.emit_register_operand(src.low_bits(), dst.low_bits());
        Ok(())
    }

    pub fn mov_reg_mem(&mut self, ty: OpSize, dst: Gpr, src: &Address) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_gpr(dst)?;
        A::check_addr(src)?;
        if ty.is_byte() {
            A::check_byte_alias(dst)?;
        }
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(
            Self::rex_ra(ty, dst.encoding(), src),
            Self::byte_force(ty, &[dst.encoding()]),
        );
        self.buffer.emit_u8(if ty.is_byte() { 0x8A } else { 0x8B });
        self.emit_operand(dst.low_bits(), src);
        Ok(())
    }

    pub fn mov_mem_reg(&mut self, ty: OpSize, dst: &Address, src: Gpr) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_gpr(src)?;
        A::check_addr(dst)?;
        if ty.is_byte() {
            A::check_byte_alias(src)?;
        }
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(
            Self::rex_ra(ty, src.encoding(), dst),
            Self::byte_force(ty, &[src.encoding()]),
        );
        self.buffer.emit_u8(if ty.is_byte() { 0x88 } else { 0x89 });
        self.emit_operand(src.low_bits(), dst);
        Ok(())
    }

    pub fn mov_mem_imm(&mut self, ty: OpSize, dst: &Address, imm: &Immediate) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_addr(dst)?;
        self.buffer.ensure_capacity();
        if ty.is_byte() {
            self.emit_rex(Self::rex_a(ty, dst), false);
            self.buffer.emit_u8(0xC6);
            self.emit_operand(0, dst);
            self.buffer.emit_u8(imm.value() as u8);
        } else {
            if ty.is_word() {
                self.emit_operand_size_override();
            }
            self.emit_rex(Self::rex_a(ty, dst), false);
            self.buffer.emit_u8(0xC7);
            self.emit_operand(0, dst);
            self.emit_immediate(ty, imm);
        }
        Ok(())
    }

    /// Zero-extending load/move; `src_ty` is the source width (8 or 16).
    pub fn movzx_reg_reg(&mut self, src_ty: OpSize, dst: Gpr, src: Gpr) -> EmitResult<()> {
        if !matches!(src_ty, OpSize::S8 | OpSize::S16) {
            return Err(EmitError::InvalidOperandSize { bits: src_ty.bits() });
        }
        A::check_gpr(dst)?;
        A::check_gpr(src)?;
        if src_ty.is_byte() {
            A::check_byte_alias(src)?;
        }
        self.buffer.ensure_capacity();
        self.emit_rex(
            Self::rex_rr(OpSize::S32, dst.encoding(), src.encoding()),
            Self::byte_force(src_ty, &[src.encoding()]),
        );
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(if src_ty.is_byte() { 0xB6 } else { 0xB7 });
        self.emit_register_operand(dst.low_bits(), src.low_bits());
        Ok(())
    }

    pub fn movzx_reg_mem(&mut self, src_ty: OpSize, dst: Gpr, src: &Address) -> EmitResult<()> {
        if !matches!(src_ty, OpSize::S8 | OpSize::S16) {
            return Err(EmitError::InvalidOperandSize { bits: src_ty.bits() });
        }
        A::check_gpr(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        self.emit_rex(Self::rex_ra(OpSize::S32, dst.encoding(), src), false);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(if src_ty.is_byte() { 0xB6 } else { 0xB7 });
        self.emit_operand(dst.low_bits(), src);
        Ok(())
    }

    pub fn movsx_reg_reg(&mut self, src_ty: OpSize, dst: Gpr, src: Gpr) -> EmitResult<()> {
        if !matches!(src_ty, OpSize::S8 | OpSize::S16) {
            return Err(EmitError::InvalidOperandSize { bits: src_ty.bits() });
        }
        A::check_gpr(dst)?;
        A::check_gpr(src)?;
        if src_ty.is_byte() {
            A::check_byte_alias(src)?;
        }
        self.buffer.ensure_capacity();
        self.emit_rex(
            Self::rex_rr(OpSize::S32, dst.encoding(), src.encoding()),
            Self::byte_force(src_ty, &[src.encoding()]),
        );
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(if src_ty.is_byte() { 0xBE } else { 0xBF });
        self.emit_register_operand(dst.low_bits(), src.low_bits());
        Ok(())
    }

    pub fn movsx_reg_mem(&mut self, src_ty: OpSize, dst: Gpr, src: &Address) -> EmitResult<()> {
        if !matches!(src_ty, OpSize::S8 | OpSize::S16) {
            return Err(EmitError::InvalidOperandSize { bits: src_ty.bits() });
        }
        A::check_gpr(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        self.emit_rex(Self::rex_ra(OpSize::S32, dst.encoding(), src), false);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(if src_ty.is_byte() { 0xBE } else { 0xBF });
        self.emit_operand(dst.low_bits(), src);
        Ok(())
    }

    /// 32-to-64-bit sign extension; long mode only.
    pub fn movsxd_reg_reg(&mut self, dst: Gpr, src: Gpr) -> EmitResult<()> {
        if !A::IS_64BIT {
            return Err(EmitError::Long64Only);
        }
        self.buffer.ensure_capacity();
        self.emit_rex(
            Self::rex_rr(OpSize::S64, dst.encoding(), src.encoding()),
            false,
        );
        self.buffer.emit_u8(0x63);
        self.emit_register_operand(dst.low_bits(), src.low_bits());
        Ok(())
    }

    pub fn movsxd_reg_mem(&mut self, dst: Gpr, src: &Address) -> EmitResult<()> {
        if !A::IS_64BIT {
            return Err(EmitError::Long64Only);
        }
        self.buffer.ensure_capacity();
        self.emit_rex(Self::rex_ra(OpSize::S64, dst.encoding(), src), false);
        self.buffer.emit_u8(0x63);
        self.emit_operand(dst.low_bits(), src);
        Ok(())
    }

    pub fn lea(&mut self, ty: OpSize, dst: Gpr, src: &Address) -> EmitResult<()> {
        if ty.is_byte() {
            return Err(EmitError::InvalidOperandSize { bits: 8 });
        }
        A::check_size(ty)?;
        A::check_gpr(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(Self::rex_ra(ty, dst.encoding(), src), false);
        self.buffer.emit_u8(0x8D);
        self.emit_operand(dst.low_bits(), src);
        Ok(())
    }

    pub fn cmov_reg_reg(&mut self, ty: OpSize, cond: Cond, dst: Gpr, src: Gpr) -> EmitResult<()> {
        if ty.is_byte() {
            return Err(EmitError::InvalidOperandSize { bits: 8 });
        }
        A::check_size(ty)?;
        A::check_gpr(dst)?;
        A::check_gpr(src)?;
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(Self::rex_rr(ty, dst.encoding(), src.encoding()), false);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0x40 + cond.encoding());
        self.emit_register_operand(dst.low_bits(), src.low_bits());
        Ok(())
    }

    pub fn cmov_reg_mem(&mut self, ty: OpSize, cond: Cond, dst: Gpr, src: &Address) -> EmitResult<()> {
        if ty.is_byte() {
            return Err(EmitError::InvalidOperandSize { bits: 8 });
        }
        A::check_size(ty)?;
        A::check_gpr(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(Self::rex_ra(ty, dst.encoding(), src), false);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0x40 + cond.encoding());
        self.emit_operand(dst.low_bits(), src);
        Ok(())
    }

    pub fn rep_movsb(&mut self) -> EmitResult<()> {
        self.buffer.ensure_capacity();
        self.buffer.emit_u8(0xF3);
        self.buffer.emit_u8(0xA4);
        Ok(())
    }

    // ==== TEST ====

    pub fn test_reg_reg(&mut self, ty: OpSize, reg1: Gpr, reg2: Gpr) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_gpr(reg1)?;
        A::check_gpr(reg2)?;
        if ty.is_byte() {
            A::check_byte_alias(reg1)?;
            A::check_byte_alias(reg2)?;
        }
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(
            Self::rex_rr(ty, reg1.encoding(), reg2.encoding()),
            Self::byte_force(ty, &[reg1.encoding(), reg2.encoding()]),
        );
        self.buffer.emit_u8(if ty.is_byte() { 0x84 } else { 0x85 });
        self.emit_register_operand(reg1.low_bits(), reg2.low_bits());
        Ok(())
    }

    pub fn test_mem_reg(&mut self, ty: OpSize, addr: &Address, reg: Gpr) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_gpr(reg)?;
        A::check_addr(addr)?;
        if ty.is_byte() {
            A::check_byte_alias(reg)?;
        }
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(
            Self::rex_ra(ty, reg.encoding(), addr),
            Self::byte_force(ty, &[reg.encoding()]),
        );
        self.buffer.emit_u8(if ty.is_byte() { 0x84 } else { 0x85 });
        self.emit_operand(reg.low_bits(), addr);
        Ok(())
    }

    pub fn test_reg_imm(&mut self, ty: OpSize, reg: Gpr, imm: &Immediate) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_gpr(reg)?;
        self.buffer.ensure_capacity();
        // For registers with a legacy byte alias, testing only the byte
        // keeps the encoding short; flags come out the same because the
        // immediate's high bits are zero.
        if imm.is_uint8() && reg.encoding() < 4 {
            if reg == A::ACCUMULATOR {
                self.buffer.emit_u8(0xA8);
            } else {
                self.buffer.emit_u8(0xF6);
                self.buffer.emit_u8(0xC0 + reg.low_bits());
            }
            self.buffer.emit_u8(imm.value() as u8);
        } else if reg == A::ACCUMULATOR {
            if ty.is_word() {
                self.emit_operand_size_override();
            }
            self.emit_rex(Self::rex_w(ty), false);
            self.buffer.emit_u8(0xA9);
            self.emit_immediate(ty, imm);
        } else {
            if ty.is_word() {
                self.emit_operand_size_override();
            }
            self.emit_rex(Self::rex_rr(ty, 0, reg.encoding()), false);
            self.buffer.emit_u8(0xF7);
            self.emit_register_operand(0, reg.low_bits());
            self.emit_immediate(ty, imm);
        }
        Ok(())
    }

    pub fn test_mem_imm(&mut self, ty: OpSize, addr: &Address, imm: &Immediate) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_addr(addr)?;
        self.buffer.ensure_capacity();
        if imm.is_uint8() {
            self.emit_rex(addr.rex_bits(), false);
            self.buffer.emit_u8(0xF6);
            self.emit_operand(0, addr);
            self.buffer.emit_u8(imm.value() as u8);
        } else {
            if ty.is_word() {
                self.emit_operand_size_override();
            }
            self.emit_rex(Self::rex_a(ty, addr), false);
            self.buffer.emit_u8(0xF7);
            self.emit_operand(0, addr);
            self.emit_immediate(ty, imm);
        }
        Ok(())
    }

    // ==== UNARY / MUL / DIV GROUP ====

    fn group3(&mut self, tag: u8, ty: OpSize, reg: Gpr) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_gpr(reg)?;
        if ty.is_byte() {
            A::check_byte_alias(reg)?;
        }
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(
            Self::rex_rr(ty, 0, reg.encoding()),
            Self::byte_force(ty, &[reg.encoding()]),
        );
        self.buffer.emit_u8(if ty.is_byte() { 0xF6 } else { 0xF7 });
        self.emit_register_operand(tag, reg.low_bits());
        Ok(())
    }

    fn group3_mem(&mut self, tag: u8, ty: OpSize, addr: &Address) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_addr(addr)?;
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(Self::rex_a(ty, addr), false);
        self.buffer.emit_u8(if ty.is_byte() { 0xF6 } else { 0xF7 });
        self.emit_operand(tag, addr);
        Ok(())
    }

    pub fn not_reg(&mut self, ty: OpSize, reg: Gpr) -> EmitResult<()> {
        self.group3(2, ty, reg)
    }

    pub fn neg_reg(&mut self, ty: OpSize, reg: Gpr) -> EmitResult<()> {
        self.group3(3, ty, reg)
    }

    pub fn neg_mem(&mut self, ty: OpSize, addr: &Address) -> EmitResult<()> {
        self.group3_mem(3, ty, addr)
    }

    pub fn mul_reg(&mut self, ty: OpSize, reg: Gpr) -> EmitResult<()> {
        self.group3(4, ty, reg)
    }

    pub fn mul_mem(&mut self, ty: OpSize, addr: &Address) -> EmitResult<()> {
        self.group3_mem(4, ty, addr)
    }

    /// One-operand imul: widening multiply into dx:ax.
    pub fn imul_reg(&mut self, ty: OpSize, reg: Gpr) -> EmitResult<()> {
        self.group3(5, ty, reg)
    }

    pub fn imul_mem(&mut self, ty: OpSize, addr: &Address) -> EmitResult<()> {
        self.group3_mem(5, ty, addr)
    }

    pub fn div_reg(&mut self, ty: OpSize, reg: Gpr) -> EmitResult<()> {
        self.group3(6, ty, reg)
    }

    pub fn div_mem(&mut self, ty: OpSize, addr: &Address) -> EmitResult<()> {
        self.group3_mem(6, ty, addr)
    }

    pub fn idiv_reg(&mut self, ty: OpSize, reg: Gpr) -> EmitResult<()> {
        self.group3(7, ty, reg)
    }

    pub fn idiv_mem(&mut self, ty: OpSize, addr: &Address) -> EmitResult<()> {
        self.group3_mem(7, ty, addr)
    }

    pub fn imul_reg_reg(&mut self, ty: OpSize, dst: Gpr, src: Gpr) -> EmitResult<()> {
        if ty.is_byte() {
            return Err(EmitError::InvalidOperandSize { bits: 8 });
        }
        A::check_size(ty)?;
        A::check_gpr(dst)?;
        A::check_gpr(src)?;
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(Self::rex_rr(ty, dst.encoding(), src.encoding()), false);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0xAF);
        self.emit_register_operand(dst.low_bits(), src.low_bits());
        Ok(())
    }

    pub fn imul_reg_mem(&mut self, ty: OpSize, dst: Gpr, src: &Address) -> EmitResult<()> {
        if ty.is_byte() {
            return Err(EmitError::InvalidOperandSize { bits: 8 });
        }
        A::check_size(ty)?;
        A::check_gpr(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(Self::rex_ra(ty, dst.encoding(), src), false);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0xAF);
        self.emit_operand(dst.low_bits(), src);
        Ok(())
    }

    pub fn imul_reg_imm(&mut self, ty: OpSize, reg: Gpr, imm: &Immediate) -> EmitResult<()> {
        if ty.is_byte() {
            return Err(EmitError::InvalidOperandSize { bits: 8 });
        }
        A::check_size(ty)?;
        A::check_gpr(reg)?;
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(
            Self::rex_rr(ty, reg.encoding(), reg.encoding()),
            false,
        );
        if imm.is_int8() {
            self.buffer.emit_u8(0x6B);
            self.emit_register_operand(reg.low_bits(), reg.low_bits());
            self.buffer.emit_u8(imm.value() as u8);
        } else {
            self.buffer.emit_u8(0x69);
            self.emit_register_operand(reg.low_bits(), reg.low_bits());
            self.emit_immediate(ty, imm);
        }
        Ok(())
    }

    pub fn inc_reg(&mut self, ty: OpSize, reg: Gpr) -> EmitResult<()> {
        self.inc_dec_reg(0, ty, reg)
    }

    pub fn dec_reg(&mut self, ty: OpSize, reg: Gpr) -> EmitResult<()> {
        self.inc_dec_reg(1, ty, reg)
    }

    fn inc_dec_reg(&mut self, tag: u8, ty: OpSize, reg: Gpr) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_gpr(reg)?;
        if ty.is_byte() {
            A::check_byte_alias(reg)?;
        }
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        if ty.is_byte() {
            self.emit_rex(
                Self::rex_rr(ty, 0, reg.encoding()),
                Self::byte_force(ty, &[reg.encoding()]),
            );
            self.buffer.emit_u8(0xFE);
            self.emit_register_operand(tag, reg.low_bits());
        } else if A::IS_64BIT {
            // 0x40+r / 0x48+r became the REX prefixes in long mode.
            self.emit_rex(Self::rex_rr(ty, 0, reg.encoding()), false);
            self.buffer.emit_u8(0xFF);
            self.emit_register_operand(tag, reg.low_bits());
        } else {
            self.buffer
                .emit_u8(if tag == 0 { 0x40 } else { 0x48 } + reg.low_bits());
        }
        Ok(())
    }

    pub fn inc_mem(&mut self, ty: OpSize, addr: &Address) -> EmitResult<()> {
        self.inc_dec_mem(0, ty, addr)
    }

    pub fn dec_mem(&mut self, ty: OpSize, addr: &Address) -> EmitResult<()> {
        self.inc_dec_mem(1, ty, addr)
    }

    fn inc_dec_mem(&mut self, tag: u8, ty: OpSize, addr: &Address) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_addr(addr)?;
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(Self::rex_a(ty, addr), false);
        self.buffer.emit_u8(if ty.is_byte() { 0xFE } else { 0xFF });
        self.emit_operand(tag, addr);
        Ok(())
    }

    // ==== SIGN-EXTENSION HELPERS ====

    pub fn cbw(&mut self) -> EmitResult<()> {
        self.buffer.ensure_capacity();
        self.emit_operand_size_override();
        self.buffer.emit_u8(0x98);
        Ok(())
    }

    pub fn cwd(&mut self) -> EmitResult<()> {
        self.buffer.ensure_capacity();
        self.emit_operand_size_override();
        self.buffer.emit_u8(0x99);
        Ok(())
    }

    pub fn cdq(&mut self) -> EmitResult<()> {
        self.buffer.ensure_capacity();
        self.buffer.emit_u8(0x99);
        Ok(())
    }

    pub fn cqo(&mut self) -> EmitResult<()> {
        if !A::IS_64BIT {
            return Err(EmitError::Long64Only);
        }
        self.buffer.ensure_capacity();
        self.emit_rex(REX_W, false);
        self.buffer.emit_u8(0x99);
        Ok(())
    }

    // ==== BIT OPERATIONS ====

    pub fn bsf_reg_reg(&mut self, ty: OpSize, dst: Gpr, src: Gpr) -> EmitResult<()> {
        self.bit_scan_rr(0xBC, ty, dst, src)
    }

    pub fn bsf_reg_mem(&mut self, ty: OpSize, dst: Gpr, src: &Address) -> EmitResult<()> {
        self.bit_scan_ra(0xBC, ty, dst, src)
    }

    pub fn bsr_reg_reg(&mut self, ty: OpSize, dst: Gpr, src: Gpr) -> EmitResult<()> {
        self.bit_scan_rr(0xBD, ty, dst, src)
    }

    pub fn bsr_reg_mem(&mut self, ty: OpSize, dst: Gpr, src: &Address) -> EmitResult<()> {
        self.bit_scan_ra(0xBD, ty, dst, src)
    }

    fn bit_scan_rr(&mut self, opcode: u8, ty: OpSize, dst: Gpr, src: Gpr) -> EmitResult<()> {
        if ty.is_byte() {
            return Err(EmitError::InvalidOperandSize { bits: 8 });
        }
        A::check_size(ty)?;
        A::check_gpr(dst)?;
        A::check_gpr(src)?;
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(Self::rex_rr(ty, dst.encoding(), src.encoding()), false);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(opcode);
        self.emit_register_operand(dst.low_bits(), src.low_bits());
        Ok(())
    }

    fn bit_scan_ra(&mut self, opcode: u8, ty: OpSize, dst: Gpr, src: &Address) -> EmitResult<()> {
        if ty.is_byte() {
            return Err(EmitError::InvalidOperandSize { bits: 8 });
        }
        A::check_size(ty)?;
        A::check_gpr(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(Self::rex_ra(ty, dst.encoding(), src), false);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(opcode);
        self.emit_operand(dst.low_bits(), src);
        Ok(())
    }

    pub fn bswap(&mut self, ty: OpSize, reg: Gpr) -> EmitResult<()> {
        if !matches!(ty, OpSize::S32 | OpSize::S64) {
            return Err(EmitError::InvalidOperandSize { bits: ty.bits() });
        }
        A::check_size(ty)?;
        A::check_gpr(reg)?;
        self.buffer.ensure_capacity();
        self.emit_rex(Self::rex_rr(ty, 0, reg.encoding()), false);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0xC8 | reg.low_bits());
        Ok(())
    }

    pub fn bt_reg_reg(&mut self, base: Gpr, offset: Gpr) -> EmitResult<()> {
        A::check_gpr(base)?;
        A::check_gpr(offset)?;
        self.buffer.ensure_capacity();
        self.emit_rex(
            Self::rex_rr(OpSize::S32, offset.encoding(), base.encoding()),
            false,
        );
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0xA3);
        self.emit_register_operand(offset.low_bits(), base.low_bits());
        Ok(())
    }

    // ==== DOUBLE-SHIFTS ====

    pub fn shld_reg_reg(&mut self, ty: OpSize, dst: Gpr, src: Gpr) -> EmitResult<()> {
        self.double_shift_rr(0xA5, ty, dst, src)
    }

    pub fn shld_reg_reg_imm(&mut self, ty: OpSize, dst: Gpr, src: Gpr, imm: &Immediate) -> EmitResult<()> {
        self.double_shift_rr_imm(0xA4, ty, dst, src, imm)
    }

    pub fn shld_mem_reg(&mut self, ty: OpSize, dst: &Address, src: Gpr) -> EmitResult<()> {
        self.double_shift_ar(0xA5, ty, dst, src)
    }

    pub fn shrd_reg_reg(&mut self, ty: OpSize, dst: Gpr, src: Gpr) -> EmitResult<()> {
        self.double_shift_rr(0xAD, ty, dst, src)
    }

    pub fn shrd_reg_reg_imm(&mut self, ty: OpSize, dst: Gpr, src: Gpr, imm: &Immediate) -> EmitResult<()> {
        self.double_shift_rr_imm(0xAC, ty, dst, src, imm)
    }

    pub fn shrd_mem_reg(&mut self, ty: OpSize, dst: &Address, src: Gpr) -> EmitResult<()> {
        self.double_shift_ar(0xAD, ty, dst, src)
    }

    fn double_shift_rr(&mut self, opcode: u8, ty: OpSize, dst: Gpr, src: Gpr) -> EmitResult<()> {
        if ty.is_byte() {
            return Err(EmitError::InvalidOperandSize { bits: 8 });
        }
        A::check_size(ty)?;
        A::check_gpr(dst)?;
        A::check_gpr(src)?;
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(Self::rex_rr(ty, src.encoding(), dst.encoding()), false);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(opcode);
        self.emit_register_operand(src.low_bits(), dst.low_bits());
        Ok(())
    }

    fn double_shift_rr_imm(
        &mut self,
        opcode: u8,
        ty: OpSize,
        dst: Gpr,
        src: Gpr,
        imm: &Immediate,
    ) -> EmitResult<()> {
        if ty.is_byte() {
            return Err(EmitError::InvalidOperandSize { bits: 8 });
        }
        A::check_size(ty)?;
        A::check_gpr(dst)?;
        A::check_gpr(src)?;
        if !imm.is_int8() {
            return Err(EmitError::ImmediateOverflow {
                value: imm.value(),
                bits: 8,
            });
        }
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(Self::rex_rr(ty, src.encoding(), dst.encoding()), false);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(opcode);
        self.emit_register_operand(src.low_bits(), dst.low_bits());
        self.buffer.emit_u8(imm.value() as u8);
        Ok(())
    }

    fn double_shift_ar(&mut self, opcode: u8, ty: OpSize, dst: &Address, src: Gpr) -> EmitResult<()> {
        if ty.is_byte() {
            return Err(EmitError::InvalidOperandSize { bits: 8 });
        }
        A::check_size(ty)?;
        A::check_gpr(src)?;
        A::check_addr(dst)?;
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(Self::rex_ra(ty, src.encoding(), dst), false);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(opcode);
        self.emit_operand(src.low_bits(), dst);
        Ok(())
    }

    // ==== CONTROL FLOW ====

    pub fn ret(&mut self) -> EmitResult<()> {
        self.buffer.ensure_capacity();
        self.buffer.emit_u8(0xC3);
        Ok(())
    }

    pub fn ret_imm(&mut self, imm: &Immediate) -> EmitResult<()> {
        if !imm.is_uint16() {
            return Err(EmitError::ImmediateOverflow {
                value: imm.value(),
                bits: 16,
            });
        }
        self.buffer.ensure_capacity();
        self.buffer.emit_u8(0xC2);
        self.buffer.emit_u16(imm.value() as u16);
        Ok(())
    }

    /// Multi-byte nop, 1..=8 bytes.
    pub fn nop(&mut self, size: usize) -> EmitResult<()> {
        self.buffer.ensure_capacity();
        match size {
            1 => self.buffer.emit_u8(0x90),
            2 => {
                self.buffer.emit_u8(0x66);
                self.buffer.emit_u8(0x90);
            }
            3 => {
                self.buffer.emit_u8(0x0F);
                self.buffer.emit_u8(0x1F);
                self.buffer.emit_u8(0x00);
            }
            4 => {
                self.buffer.emit_u8(0x0F);
                self.buffer.emit_u8(0x1F);
                self.buffer.emit_u8(0x40);
                self.buffer.emit_u8(0x00);
            }
            5 => {
                self.buffer.emit_u8(0x0F);
                self.buffer.emit_u8(0x1F);
                self.buffer.emit_u8(0x44);
                self.buffer.emit_u8(0x00);
                self.buffer.emit_u8(0x00);
            }
            6 => {
                self.buffer.emit_u8(0x66);
                self.buffer.emit_u8(0x0F);
                self.buffer.emit_u8(0x1F);
                self.buffer.emit_u8(0x44);
                self.buffer.emit_u8(0x00);
                self.buffer.emit_u8(0x00);
            }
            7 => {
                self.buffer.emit_u8(0x0F);
                self.buffer.emit_u8(0x1F);
                self.buffer.emit_u8(0x80);
                self.buffer.emit_u8(0x00);
                self.buffer.emit_u8(0x00);
                self.buffer.emit_u8(0x00);
                self.buffer.emit_u8(0x00);
            }
            8 => {
                self.buffer.emit_u8(0x0F);
                self.buffer.emit_u8(0x1F);
                self.buffer.emit_u8(0x84);
                self.buffer.emit_u8(0x00);
                self.buffer.emit_u8(0x00);
                self.buffer.emit_u8(0x00);
                self.buffer.emit_u8(0x00);
                self.buffer.emit_u8(0x00);
            }
            _ => return Err(EmitError::InvalidNopSize { size }),
        }
        Ok(())
    }

    pub fn int3(&mut self) -> EmitResult<()> {
        self.buffer.ensure_capacity();
        self.buffer.emit_u8(0xCC);
        Ok(())
    }

    pub fn hlt(&mut self) -> EmitResult<()> {
        self.buffer.ensure_capacity();
        self.buffer.emit_u8(0xF4);
        Ok(())
    }

    pub fn ud2(&mut self) -> EmitResult<()> {
        self.buffer.ensure_capacity();
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0x0B);
        Ok(())
    }

    /// Conditional jump to a label.
    ///
    /// Backward branches pick the shortest fitting form on their own.
    /// For a forward branch, `near` promises the target will bind within
    /// an 8-bit displacement; without the hint the safe 32-bit form is
    /// reserved.
    pub fn j(&mut self, condition: Cond, label: Label, near: bool) -> EmitResult<()> {
        self.buffer.ensure_capacity();
        if let Some(target) = self.labels[label.index()].offset() {
            const SHORT_SIZE: i64 = 2;
            const LONG_SIZE: i64 = 6;
            let offset = target as i64 - self.buffer.position() as i64;
            debug_assert!(offset <= 0);
            if i8::try_from(offset - SHORT_SIZE).is_ok() {
                self.buffer.emit_u8(0x70 + condition.encoding());
                self.buffer.emit_u8((offset - SHORT_SIZE) as u8);
            } else {
                self.buffer.emit_u8(0x0F);
                self.buffer.emit_u8(0x80 + condition.encoding());
                self.buffer.emit_i32((offset - LONG_SIZE) as i32);
            }
        } else if near {
            self.buffer.emit_u8(0x70 + condition.encoding());
            self.emit_near_label_link(label);
        } else {
            self.buffer.emit_u8(0x0F);
            self.buffer.emit_u8(0x80 + condition.encoding());
            self.emit_label_link(label);
        }
        Ok(())
    }

    /// Conditional jump to an external symbol.
    pub fn j_sym(&mut self, condition: Cond, sym: SymbolId) -> EmitResult<()> {
        self.buffer.ensure_capacity();
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0x80 + condition.encoding());
        let position = self.buffer.position();
        self.buffer.record_fixup(Fixup {
            position,
            kind: A::PC_REL32,
            sym,
            addend: -4,
        });
        self.buffer.emit_i32(-4);
        Ok(())
    }

    pub fn jmp_reg(&mut self, reg: Gpr) -> EmitResult<()> {
        A::check_gpr(reg)?;
        self.buffer.ensure_capacity();
        self.emit_rex(Self::rex_rr(OpSize::S32, 0, reg.encoding()), false);
        self.buffer.emit_u8(0xFF);
        self.emit_register_operand(4, reg.low_bits());
        Ok(())
    }

    pub fn jmp(&mut self, label: Label, near: bool) -> EmitResult<()> {
        self.buffer.ensure_capacity();
        if let Some(target) = self.labels[label.index()].offset() {
            const SHORT_SIZE: i64 = 2;
            const LONG_SIZE: i64 = 5;
            let offset = target as i64 - self.buffer.position() as i64;
            debug_assert!(offset <= 0);
            if i8::try_from(offset - SHORT_SIZE).is_ok() {
                self.buffer.emit_u8(0xEB);
                self.buffer.emit_u8((offset - SHORT_SIZE) as u8);
            } else {
                self.buffer.emit_u8(0xE9);
                self.buffer.emit_i32((offset - LONG_SIZE) as i32);
            }
        } else if near {
            self.buffer.emit_u8(0xEB);
            self.emit_near_label_link(label);
        } else {
            self.buffer.emit_u8(0xE9);
            self.emit_label_link(label);
        }
        Ok(())
    }

    pub fn jmp_sym(&mut self, sym: SymbolId) -> EmitResult<()> {
        self.buffer.ensure_capacity();
        self.buffer.emit_u8(0xE9);
        let position = self.buffer.position();
        self.buffer.record_fixup(Fixup {
            position,
            kind: A::PC_REL32,
            sym,
            addend: -4,
        });
        self.buffer.emit_i32(-4);
        Ok(())
    }

    /// Reserve a 32-bit displacement field resolved when `label` binds.
    fn emit_label_link(&mut self, label: Label) {
        debug_assert!(!self.labels[label.index()].is_bound());
        let position = self.buffer.position();
        self.buffer.emit_i32(0);
        self.labels[label.index()].link_long(position);
    }

    /// Reserve an 8-bit displacement field resolved when `label` binds.
    fn emit_near_label_link(&mut self, label: Label) {
        debug_assert!(!self.labels[label.index()].is_bound());
        let position = self.buffer.position();
        self.buffer.emit_u8(0);
        self.labels[label.index()].link_short(position);
    }

    // ==== ATOMIC GROUP ====

    pub fn mfence(&mut self) -> EmitResult<()> {
        self.buffer.ensure_capacity();
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0xAE);
        self.buffer.emit_u8(0xF0);
        Ok(())
    }

    /// Compare-and-exchange against memory; `locked` adds the bus-lock
    /// prefix making it atomic.
    pub fn cmpxchg(&mut self, ty: OpSize, addr: &Address, reg: Gpr, locked: bool) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_gpr(reg)?;
        A::check_addr(addr)?;
        if ty.is_byte() {
            A::check_byte_alias(reg)?;
        }
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        if locked {
            self.buffer.emit_u8(0xF0);
        }
        self.emit_rex(
            Self::rex_ra(ty, reg.encoding(), addr),
            Self::byte_force(ty, &[reg.encoding()]),
        );
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(if ty.is_byte() { 0xB0 } else { 0xB1 });
        self.emit_operand(reg.low_bits(), addr);
        Ok(())
    }

    pub fn cmpxchg8b(&mut self, addr: &Address, locked: bool) -> EmitResult<()> {
        A::check_addr(addr)?;
        self.buffer.ensure_capacity();
        if locked {
            self.buffer.emit_u8(0xF0);
        }
        self.emit_rex(addr.rex_bits(), false);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0xC7);
        self.emit_operand(1, addr);
        Ok(())
    }

    /// Exchange-and-add; `locked` adds the bus-lock prefix.
    pub fn xadd(&mut self, ty: OpSize, addr: &Address, reg: Gpr, locked: bool) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_gpr(reg)?;
        A::check_addr(addr)?;
        if ty.is_byte() {
            A::check_byte_alias(reg)?;
        }
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        if locked {
            self.buffer.emit_u8(0xF0);
        }
        self.emit_rex(
            Self::rex_ra(ty, reg.encoding(), addr),
            Self::byte_force(ty, &[reg.encoding()]),
        );
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(if ty.is_byte() { 0xC0 } else { 0xC1 });
        self.emit_operand(reg.low_bits(), addr);
        Ok(())
    }

    /// Register/memory exchange; implicitly locked by the hardware.
    pub fn xchg(&mut self, ty: OpSize, addr: &Address, reg: Gpr) -> EmitResult<()> {
        A::check_size(ty)?;
        A::check_gpr(reg)?;
        A::check_addr(addr)?;
        if ty.is_byte() {
            A::check_byte_alias(reg)?;
        }
        self.buffer.ensure_capacity();
        if ty.is_word() {
            self.emit_operand_size_override();
        }
        self.emit_rex(
            Self::rex_ra(ty, reg.encoding(), addr),
            Self::byte_force(ty, &[reg.encoding()]),
        );
        self.buffer.emit_u8(if ty.is_byte() { 0x86 } else { 0x87 });
        self.emit_operand(reg.low_bits(), addr);
        Ok(())
    }

    pub fn segment_override(&mut self, prefix: u8) -> EmitResult<()> {
        self.buffer.ensure_capacity();
        self.buffer.emit_u8(prefix);
        Ok(())
    }

    // ==== ALIGNMENT ====

    pub fn pad_with_nops(&mut self, mut padding: usize) -> EmitResult<()> {
        while padding > MAX_NOP_SIZE {
            self.nop(MAX_NOP_SIZE)?;
            padding -= MAX_NOP_SIZE;
        }
        if padding > 0 {
            self.nop(padding)?;
        }
        Ok(())
    }

    /// Pad with nops until `offset + position` is `alignment`-aligned.
    pub fn align(&mut self, alignment: usize, offset: usize) -> EmitResult<()> {
        debug_assert!(alignment.is_power_of_two());
        let pos = offset + self.buffer.position();
        let modulo = pos & (alignment - 1);
        if modulo == 0 {
            return Ok(());
        }
        self.pad_with_nops(alignment - modulo)?;
        debug_assert_eq!((offset + self.buffer.position()) & (alignment - 1), 0);
        Ok(())
    }

    /// Fill up to the next bundle boundary with hlt, used between
    /// functions so a fall-through lands on a trap.
    pub fn align_function(&mut self) -> EmitResult<()> {
        while self.buffer.position() % FUNCTION_ALIGN != 0 {
            self.hlt()?;
        }
        Ok(())
    }

    // ==== SSE: MOVES ====

    /// Scalar float move, register to register. `ty` selects the `ss`
    /// (f32) or `sd` (f64) form.
    pub fn movss_reg_reg(&mut self, ty: FpSize, dst: Xmm, src: Xmm) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        // The store direction is used so dst sits in the rm field.
        self.xmm_rr(Some(ty.scalar_prefix()), 0x11, src.encoding(), dst.encoding());
        Ok(())
    }

    pub fn movss_reg_mem(&mut self, ty: FpSize, dst: Xmm, src: &Address) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        self.xmm_ra(Some(ty.scalar_prefix()), 0x10, dst.encoding(), src);
        Ok(())
    }

    pub fn movss_mem_reg(&mut self, ty: FpSize, dst: &Address, src: Xmm) -> EmitResult<()> {
        A::check_xmm(src)?;
        A::check_addr(dst)?;
        self.buffer.ensure_capacity();
        self.xmm_ra(Some(ty.scalar_prefix()), 0x11, src.encoding(), dst);
        Ok(())
    }

    pub fn movd_xmm_reg(&mut self, dst: Xmm, src: Gpr) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_gpr(src)?;
        self.buffer.ensure_capacity();
        self.xmm_rr(Some(0x66), 0x6E, dst.encoding(), src.encoding());
        Ok(())
    }

    pub fn movd_xmm_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        self.xmm_ra(Some(0x66), 0x6E, dst.encoding(), src);
        Ok(())
    }

    pub fn movd_reg_xmm(&mut self, dst: Gpr, src: Xmm) -> EmitResult<()> {
        A::check_gpr(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm_rr(Some(0x66), 0x7E, src.encoding(), dst.encoding());
        Ok(())
    }

    pub fn movd_mem_xmm(&mut self, dst: &Address, src: Xmm) -> EmitResult<()> {
        A::check_xmm(src)?;
        A::check_addr(dst)?;
        self.buffer.ensure_capacity();
        self.xmm_ra(Some(0x66), 0x7E, src.encoding(), dst);
        Ok(())
    }

    pub fn movq_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm_rr(Some(0xF3), 0x7E, dst.encoding(), src.encoding());
        Ok(())
    }

    pub fn movq_reg_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        self.xmm_ra(Some(0xF3), 0x7E, dst.encoding(), src);
        Ok(())
    }

    pub fn movq_mem_reg(&mut self, dst: &Address, src: Xmm) -> EmitResult<()> {
        A::check_xmm(src)?;
        A::check_addr(dst)?;
        self.buffer.ensure_capacity();
        self.xmm_ra(Some(0x66), 0xD6, src.encoding(), dst);
        Ok(())
    }

    pub fn movaps_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm_rr(None, 0x28, dst.encoding(), src.encoding());
        Ok(())
    }

    pub fn movups_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm_rr(None, 0x10, dst.encoding(), src.encoding());
        Ok(())
    }

    pub fn movups_reg_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        self.xmm_ra(None, 0x10, dst.encoding(), src);
        Ok(())
    }

    pub fn movups_mem_reg(&mut self, dst: &Address, src: Xmm) -> EmitResult<()> {
        A::check_xmm(src)?;
        A::check_addr(dst)?;
        self.buffer.ensure_capacity();
        self.xmm_ra(None, 0x11, src.encoding(), dst);
        Ok(())
    }

    pub fn movhlps(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm_rr(None, 0x12, dst.encoding(), src.encoding());
        Ok(())
    }

    pub fn movlhps(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm_rr(None, 0x16, dst.encoding(), src.encoding());
        Ok(())
    }

    pub fn movmskps(&mut self, dst: Gpr, src: Xmm) -> EmitResult<()> {
        A::check_gpr(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm_rr(None, 0x50, dst.encoding(), src.encoding());
        Ok(())
    }

    pub fn movmskpd(&mut self, dst: Gpr, src: Xmm) -> EmitResult<()> {
        A::check_gpr(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm_rr(Some(0x66), 0x50, dst.encoding(), src.encoding());
        Ok(())
    }

    // ==== SSE: SCALAR ARITHMETIC ====

    fn scalar_rr(&mut self, ty: FpSize, opcode: u8, dst: Xmm, src: Xmm) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm_rr(Some(ty.scalar_prefix()), opcode, dst.encoding(), src.encoding());
        Ok(())
    }

    fn scalar_ra(&mut self, ty: FpSize, opcode: u8, dst: Xmm, src: &Address) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        self.xmm_ra(Some(ty.scalar_prefix()), opcode, dst.encoding(), src);
        Ok(())
    }

    pub fn addss_reg_reg(&mut self, ty: FpSize, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.scalar_rr(ty, 0x58, dst, src)
    }

    pub fn addss_reg_mem(&mut self, ty: FpSize, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.scalar_ra(ty, 0x58, dst, src)
    }

    pub fn subss_reg_reg(&mut self, ty: FpSize, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.scalar_rr(ty, 0x5C, dst, src)
    }

    pub fn subss_reg_mem(&mut self, ty: FpSize, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.scalar_ra(ty, 0x5C, dst, src)
    }

    pub fn mulss_reg_reg(&mut self, ty: FpSize, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.scalar_rr(ty, 0x59, dst, src)
    }

    pub fn mulss_reg_mem(&mut self, ty: FpSize, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.scalar_ra(ty, 0x59, dst, src)
    }

    pub fn divss_reg_reg(&mut self, ty: FpSize, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.scalar_rr(ty, 0x5E, dst, src)
    }

    pub fn divss_reg_mem(&mut self, ty: FpSize, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.scalar_ra(ty, 0x5E, dst, src)
    }

    pub fn sqrtss_reg_reg(&mut self, ty: FpSize, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.scalar_rr(ty, 0x51, dst, src)
    }

    pub fn sqrtss_reg_mem(&mut self, ty: FpSize, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.scalar_ra(ty, 0x51, dst, src)
    }

    /// Unordered scalar compare; `ucomiss` for f32, `ucomisd` for f64.
    pub fn ucomiss_reg_reg(&mut self, ty: FpSize, a: Xmm, b: Xmm) -> EmitResult<()> {
        A::check_xmm(a)?;
        A::check_xmm(b)?;
        self.buffer.ensure_capacity();
        let prefix = match ty {
            FpSize::F32 => None,
            FpSize::F64 => Some(0x66),
        };
        self.xmm_rr(prefix, 0x2E, a.encoding(), b.encoding());
        Ok(())
    }

    pub fn ucomiss_reg_mem(&mut self, ty: FpSize, a: Xmm, b: &Address) -> EmitResult<()> {
        A::check_xmm(a)?;
        A::check_addr(b)?;
        self.buffer.ensure_capacity();
        let prefix = match ty {
            FpSize::F32 => None,
            FpSize::F64 => Some(0x66),
        };
        self.xmm_ra(prefix, 0x2E, a.encoding(), b);
        Ok(())
    }

    // ==== SSE: CONVERSIONS ====

    /// Integer to scalar float; `dest_ty` picks `cvtsi2ss`/`cvtsi2sd`.
    pub fn cvtsi2ss_reg_reg(&mut self, dest_ty: FpSize, dst: Xmm, src: Gpr) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_gpr(src)?;
        self.buffer.ensure_capacity();
        self.xmm_rr(Some(dest_ty.scalar_prefix()), 0x2A, dst.encoding(), src.encoding());
        Ok(())
    }

    pub fn cvtsi2ss_reg_mem(&mut self, dest_ty: FpSize, dst: Xmm, src: &Address) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        self.xmm_ra(Some(dest_ty.scalar_prefix()), 0x2A, dst.encoding(), src);
        Ok(())
    }

    /// Truncating scalar float to integer; `src_ty` picks
    /// `cvttss2si`/`cvttsd2si`.
    pub fn cvttss2si_reg_reg(&mut self, src_ty: FpSize, dst: Gpr, src: Xmm) -> EmitResult<()> {
        A::check_gpr(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm_rr(Some(src_ty.scalar_prefix()), 0x2C, dst.encoding(), src.encoding());
        Ok(())
    }

    pub fn cvttss2si_reg_mem(&mut self, src_ty: FpSize, dst: Gpr, src: &Address) -> EmitResult<()> {
        A::check_gpr(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        self.xmm_ra(Some(src_ty.scalar_prefix()), 0x2C, dst.encoding(), src);
        Ok(())
    }

    /// Scalar float width conversion: `cvtss2sd` from f32, `cvtsd2ss`
    /// from f64.
    pub fn cvtfloat2float_reg_reg(&mut self, src_ty: FpSize, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.scalar_rr(src_ty, 0x5A, dst, src)
    }

    pub fn cvtfloat2float_reg_mem(&mut self, src_ty: FpSize, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.scalar_ra(src_ty, 0x5A, dst, src)
    }

    pub fn cvtdq2ps_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm_rr(None, 0x5B, dst.encoding(), src.encoding());
        Ok(())
    }

    pub fn cvtdq2ps_reg_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        self.xmm_ra(None, 0x5B, dst.encoding(), src);
        Ok(())
    }

    pub fn cvttps2dq_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm_rr(Some(0xF3), 0x5B, dst.encoding(), src.encoding());
        Ok(())
    }

    pub fn cvttps2dq_reg_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        self.xmm_ra(Some(0xF3), 0x5B, dst.encoding(), src);
        Ok(())
    }

    // ==== SSE: PACKED FLOAT ====

    fn packed_ps_rr(&mut self, prefix: Option<u8>, opcode: u8, dst: Xmm, src: Xmm) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm_rr(prefix, opcode, dst.encoding(), src.encoding());
        Ok(())
    }

    fn packed_ps_ra(&mut self, prefix: Option<u8>, opcode: u8, dst: Xmm, src: &Address) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        self.xmm_ra(prefix, opcode, dst.encoding(), src);
        Ok(())
    }

    pub fn addps_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(None, 0x58, dst, src)
    }

    pub fn addps_reg_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.packed_ps_ra(None, 0x58, dst, src)
    }

    pub fn subps_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(None, 0x5C, dst, src)
    }

    pub fn subps_reg_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.packed_ps_ra(None, 0x5C, dst, src)
    }

    pub fn mulps_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(None, 0x59, dst, src)
    }

    pub fn mulps_reg_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.packed_ps_ra(None, 0x59, dst, src)
    }

    pub fn divps_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(None, 0x5E, dst, src)
    }

    pub fn divps_reg_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.packed_ps_ra(None, 0x5E, dst, src)
    }

    pub fn minps_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(None, 0x5D, dst, src)
    }

    pub fn maxps_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(None, 0x5F, dst, src)
    }

    pub fn minpd_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(Some(0x66), 0x5D, dst, src)
    }

    pub fn maxpd_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(Some(0x66), 0x5F, dst, src)
    }

    pub fn andps_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(None, 0x54, dst, src)
    }

    pub fn andps_reg_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.packed_ps_ra(None, 0x54, dst, src)
    }

    pub fn andpd_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(Some(0x66), 0x54, dst, src)
    }

    pub fn andpd_reg_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.packed_ps_ra(Some(0x66), 0x54, dst, src)
    }

    pub fn orps_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(None, 0x56, dst, src)
    }

    pub fn orpd_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(Some(0x66), 0x56, dst, src)
    }

    pub fn xorps_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(None, 0x57, dst, src)
    }

    pub fn xorps_reg_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.packed_ps_ra(None, 0x57, dst, src)
    }

    pub fn xorpd_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(Some(0x66), 0x57, dst, src)
    }

    pub fn xorpd_reg_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.packed_ps_ra(Some(0x66), 0x57, dst, src)
    }

    pub fn sqrtps(&mut self, dst: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(None, 0x51, dst, dst)
    }

    pub fn rsqrtps(&mut self, dst: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(None, 0x52, dst, dst)
    }

    pub fn reciprocalps(&mut self, dst: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(None, 0x53, dst, dst)
    }

    pub fn sqrtpd(&mut self, dst: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(Some(0x66), 0x51, dst, dst)
    }

    pub fn unpcklps_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(None, 0x14, dst, src)
    }

    pub fn unpckhps_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(None, 0x15, dst, src)
    }

    pub fn unpcklpd_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(Some(0x66), 0x14, dst, src)
    }

    pub fn unpckhpd_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_ps_rr(Some(0x66), 0x15, dst, src)
    }

    /// Packed float compare with an explicit predicate immediate.
    pub fn cmpps_reg_reg(&mut self, dst: Xmm, src: Xmm, predicate: CmppsCond) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm_rr(None, 0xC2, dst.encoding(), src.encoding());
        self.buffer.emit_u8(predicate.encoding());
        Ok(())
    }

    pub fn cmpps_reg_mem(&mut self, dst: Xmm, src: &Address, predicate: CmppsCond) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        self.xmm_ra(None, 0xC2, dst.encoding(), src);
        self.buffer.emit_u8(predicate.encoding());
        Ok(())
    }

    // ==== SSE: SHUFFLES ====

    pub fn shufps_reg_reg(&mut self, dst: Xmm, src: Xmm, mask: &Immediate) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        if !mask.is_uint8() {
            return Err(EmitError::ImmediateOverflow {
                value: mask.value(),
                bits: 8,
            });
        }
        self.buffer.ensure_capacity();
        self.xmm_rr(None, 0xC6, dst.encoding(), src.encoding());
        self.buffer.emit_u8(mask.value() as u8);
        Ok(())
    }

    pub fn shufps_reg_mem(&mut self, dst: Xmm, src: &Address, mask: &Immediate) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_addr(src)?;
        if !mask.is_uint8() {
            return Err(EmitError::ImmediateOverflow {
                value: mask.value(),
                bits: 8,
            });
        }
        self.buffer.ensure_capacity();
        self.xmm_ra(None, 0xC6, dst.encoding(), src);
        self.buffer.emit_u8(mask.value() as u8);
        Ok(())
    }

    pub fn shufpd_reg_reg(&mut self, dst: Xmm, src: Xmm, mask: &Immediate) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        if !mask.is_uint8() {
            return Err(EmitError::ImmediateOverflow {
                value: mask.value(),
                bits: 8,
            });
        }
        self.buffer.ensure_capacity();
        self.xmm_rr(Some(0x66), 0xC6, dst.encoding(), src.encoding());
        self.buffer.emit_u8(mask.value() as u8);
        Ok(())
    }

    pub fn pshufd_reg_reg(&mut self, dst: Xmm, src: Xmm, mask: &Immediate) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        if !mask.is_uint8() {
            return Err(EmitError::ImmediateOverflow {
                value: mask.value(),
                bits: 8,
            });
        }
        self.buffer.ensure_capacity();
        self.xmm_rr(Some(0x66), 0x70, dst.encoding(), src.encoding());
        self.buffer.emit_u8(mask.value() as u8);
        Ok(())
    }

    pub fn pshufd_reg_mem(&mut self, dst: Xmm, src: &Address, mask: &Immediate) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_addr(src)?;
        if !mask.is_uint8() {
            return Err(EmitError::ImmediateOverflow {
                value: mask.value(),
                bits: 8,
            });
        }
        self.buffer.ensure_capacity();
        self.xmm_ra(Some(0x66), 0x70, dst.encoding(), src);
        self.buffer.emit_u8(mask.value() as u8);
        Ok(())
    }

    // ==== SSE: PACKED INTEGER ====

    fn packed_int_rr(&mut self, opcode: u8, dst: Xmm, src: Xmm) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm_rr(Some(0x66), opcode, dst.encoding(), src.encoding());
        Ok(())
    }

    fn packed_int_ra(&mut self, opcode: u8, dst: Xmm, src: &Address) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        self.xmm_ra(Some(0x66), opcode, dst.encoding(), src);
        Ok(())
    }

    /// Packed integer add; `ty` is the element width.
    pub fn padd_reg_reg(&mut self, ty: OpSize, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_int_rr(Self::packed_elem_opcode(ty, 0xFC, 0xFD, 0xFE), dst, src)
    }

    pub fn padd_reg_mem(&mut self, ty: OpSize, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.packed_int_ra(Self::packed_elem_opcode(ty, 0xFC, 0xFD, 0xFE), dst, src)
    }

    pub fn psub_reg_reg(&mut self, ty: OpSize, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_int_rr(Self::packed_elem_opcode(ty, 0xF8, 0xF9, 0xFA), dst, src)
    }

    pub fn psub_reg_mem(&mut self, ty: OpSize, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.packed_int_ra(Self::packed_elem_opcode(ty, 0xF8, 0xF9, 0xFA), dst, src)
    }

    pub fn pand_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_int_rr(0xDB, dst, src)
    }

    pub fn pand_reg_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.packed_int_ra(0xDB, dst, src)
    }

    pub fn pandn_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_int_rr(0xDF, dst, src)
    }

    pub fn pandn_reg_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.packed_int_ra(0xDF, dst, src)
    }

    pub fn por_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_int_rr(0xEB, dst, src)
    }

    pub fn por_reg_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.packed_int_ra(0xEB, dst, src)
    }

    pub fn pxor_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_int_rr(0xEF, dst, src)
    }

    pub fn pxor_reg_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.packed_int_ra(0xEF, dst, src)
    }

    /// Packed low multiply; 16- and 32-bit elements only, the latter via
    /// the 0F38 escape.
    pub fn pmull_reg_reg(&mut self, ty: OpSize, dst: Xmm, src: Xmm) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        match ty {
            OpSize::S16 => {
                self.buffer.ensure_capacity();
                self.xmm_rr(Some(0x66), 0xD5, dst.encoding(), src.encoding());
            }
            OpSize::S32 => {
                self.buffer.ensure_capacity();
                self.xmm38_rr(0x40, dst.encoding(), src.encoding());
            }
            _ => return Err(EmitError::InvalidOperandSize { bits: ty.bits() }),
        }
        Ok(())
    }

    pub fn pmull_reg_mem(&mut self, ty: OpSize, dst: Xmm, src: &Address) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_addr(src)?;
        match ty {
            OpSize::S16 => {
                self.buffer.ensure_capacity();
                self.xmm_ra(Some(0x66), 0xD5, dst.encoding(), src);
            }
            OpSize::S32 => {
                self.buffer.ensure_capacity();
                self.xmm38_ra(0x40, dst.encoding(), src);
            }
            _ => return Err(EmitError::InvalidOperandSize { bits: ty.bits() }),
        }
        Ok(())
    }

    pub fn pmuludq_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_int_rr(0xF4, dst, src)
    }

    pub fn pmuludq_reg_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.packed_int_ra(0xF4, dst, src)
    }

    pub fn pcmpeq_reg_reg(&mut self, ty: OpSize, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_int_rr(Self::packed_elem_opcode(ty, 0x74, 0x75, 0x76), dst, src)
    }

    pub fn pcmpeq_reg_mem(&mut self, ty: OpSize, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.packed_int_ra(Self::packed_elem_opcode(ty, 0x74, 0x75, 0x76), dst, src)
    }

    pub fn pcmpgt_reg_reg(&mut self, ty: OpSize, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_int_rr(Self::packed_elem_opcode(ty, 0x64, 0x65, 0x66), dst, src)
    }

    pub fn pcmpgt_reg_mem(&mut self, ty: OpSize, dst: Xmm, src: &Address) -> EmitResult<()> {
        self.packed_int_ra(Self::packed_elem_opcode(ty, 0x64, 0x65, 0x66), dst, src)
    }

    pub fn pmovsxdq_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm38_rr(0x25, dst.encoding(), src.encoding());
        Ok(())
    }

    pub fn blendvps_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm38_rr(0x14, dst.encoding(), src.encoding());
        Ok(())
    }

    pub fn blendvps_reg_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        self.xmm38_ra(0x14, dst.encoding(), src);
        Ok(())
    }

    pub fn pblendvb_reg_reg(&mut self, dst: Xmm, src: Xmm) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm38_rr(0x10, dst.encoding(), src.encoding());
        Ok(())
    }

    pub fn pblendvb_reg_mem(&mut self, dst: Xmm, src: &Address) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_addr(src)?;
        self.buffer.ensure_capacity();
        self.xmm38_ra(0x10, dst.encoding(), src);
        Ok(())
    }

    // ==== SSE: PACKED SHIFTS ====

    fn packed_shift_rr(&mut self, ty: OpSize, op16: u8, op32: u8, op64: Option<u8>, dst: Xmm, src: Xmm) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        let opcode = match ty {
            OpSize::S16 => op16,
            OpSize::S32 => op32,
            OpSize::S64 => op64.ok_or(EmitError::InvalidOperandSize { bits: 64 })?,
            OpSize::S8 => return Err(EmitError::InvalidOperandSize { bits: 8 }),
        };
        self.buffer.ensure_capacity();
        self.xmm_rr(Some(0x66), opcode, dst.encoding(), src.encoding());
        Ok(())
    }

    fn packed_shift_imm(&mut self, ty: OpSize, tag: u8, has64: bool, dst: Xmm, imm: &Immediate) -> EmitResult<()> {
        A::check_xmm(dst)?;
        if !imm.is_int8() {
            return Err(EmitError::ImmediateOverflow {
                value: imm.value(),
                bits: 8,
            });
        }
        let opcode = match ty {
            OpSize::S16 => 0x71,
            OpSize::S32 => 0x72,
            OpSize::S64 if has64 => 0x73,
            _ => return Err(EmitError::InvalidOperandSize { bits: ty.bits() }),
        };
        self.buffer.ensure_capacity();
        self.xmm_rr(Some(0x66), opcode, tag, dst.encoding());
        self.buffer.emit_u8(imm.value() as u8);
        Ok(())
    }

    pub fn psll_reg_reg(&mut self, ty: OpSize, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_shift_rr(ty, 0xF1, 0xF2, None, dst, src)
    }

    pub fn psll_reg_imm(&mut self, ty: OpSize, dst: Xmm, imm: &Immediate) -> EmitResult<()> {
        self.packed_shift_imm(ty, 6, false, dst, imm)
    }

    pub fn psra_reg_reg(&mut self, ty: OpSize, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_shift_rr(ty, 0xE1, 0xE2, None, dst, src)
    }

    pub fn psra_reg_imm(&mut self, ty: OpSize, dst: Xmm, imm: &Immediate) -> EmitResult<()> {
        self.packed_shift_imm(ty, 4, false, dst, imm)
    }

    pub fn psrl_reg_reg(&mut self, ty: OpSize, dst: Xmm, src: Xmm) -> EmitResult<()> {
        self.packed_shift_rr(ty, 0xD1, 0xD2, Some(0xD3), dst, src)
    }

    pub fn psrl_reg_imm(&mut self, ty: OpSize, dst: Xmm, imm: &Immediate) -> EmitResult<()> {
        self.packed_shift_imm(ty, 2, true, dst, imm)
    }

    // ==== SSE: INSERT / EXTRACT / ROUND ====

    pub fn insertps(&mut self, dst: Xmm, src: Xmm, imm: &Immediate) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        if !imm.is_uint8() {
            return Err(EmitError::ImmediateOverflow {
                value: imm.value(),
                bits: 8,
            });
        }
        self.buffer.ensure_capacity();
        self.xmm3a_rr(0x21, dst.encoding(), src.encoding(), imm.value() as u8);
        Ok(())
    }

    /// Insert a GPR lane; element width selects pinsrb/pinsrw/pinsrd.
    pub fn pinsr(&mut self, ty: OpSize, dst: Xmm, src: Gpr, imm: &Immediate) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_gpr(src)?;
        if !imm.is_uint8() {
            return Err(EmitError::ImmediateOverflow {
                value: imm.value(),
                bits: 8,
            });
        }
        self.buffer.ensure_capacity();
        match ty {
            OpSize::S16 => {
                self.buffer.emit_u8(0x66);
                self.emit_rex(Self::rex_rr(OpSize::S32, dst.encoding(), src.encoding()), false);
                self.buffer.emit_u8(0x0F);
                self.buffer.emit_u8(0xC4);
                self.emit_register_operand(dst.low_bits(), src.low_bits());
                self.buffer.emit_u8(imm.value() as u8);
            }
            _ => {
                self.xmm3a_rr(
                    if ty.is_byte() { 0x20 } else { 0x22 },
                    dst.encoding(),
                    src.encoding(),
                    imm.value() as u8,
                );
            }
        }
        Ok(())
    }

    /// Extract a lane to a GPR; element width selects pextrb/pextrw/pextrd.
    pub fn pextr(&mut self, ty: OpSize, dst: Gpr, src: Xmm, imm: &Immediate) -> EmitResult<()> {
        A::check_gpr(dst)?;
        A::check_xmm(src)?;
        if !imm.is_uint8() {
            return Err(EmitError::ImmediateOverflow {
                value: imm.value(),
                bits: 8,
            });
        }
        self.buffer.ensure_capacity();
        match ty {
            OpSize::S16 => {
                self.buffer.emit_u8(0x66);
                self.emit_rex(Self::rex_rr(OpSize::S32, dst.encoding(), src.encoding()), false);
                self.buffer.emit_u8(0x0F);
                self.buffer.emit_u8(0xC5);
                self.emit_register_operand(dst.low_bits(), src.low_bits());
                self.buffer.emit_u8(imm.value() as u8);
            }
            _ => {
                // The 0F3A forms are MRI: the xmm source sits in the reg
                // field because the destination may be memory.
                self.xmm3a_rr(
                    if ty.is_byte() { 0x14 } else { 0x16 },
                    src.encoding(),
                    dst.encoding(),
                    imm.value() as u8,
                );
            }
        }
        Ok(())
    }

    /// Scalar round with a fixed mode; the precision exception is masked.
    pub fn roundsd(&mut self, dst: Xmm, src: Xmm, mode: RoundingMode) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm3a_rr(0x0B, dst.encoding(), src.encoding(), mode.encoding() | 0x8);
        Ok(())
    }

    pub fn roundss(&mut self, dst: Xmm, src: Xmm, mode: RoundingMode) -> EmitResult<()> {
        A::check_xmm(dst)?;
        A::check_xmm(src)?;
        self.buffer.ensure_capacity();
        self.xmm3a_rr(0x0A, dst.encoding(), src.encoding(), mode.encoding() | 0x8);
        Ok(())
    }

    // ==== X87 LEGACY FLOAT STACK ====

    fn x87_op(&mut self, escape: u8, tag: u8, addr: &Address) -> EmitResult<()> {
        if !A::HAS_X87 {
            return Err(EmitError::NoX87);
        }
        A::check_addr(addr)?;
        self.buffer.ensure_capacity();
        self.buffer.emit_u8(escape);
        self.emit_operand(tag, addr);
        Ok(())
    }

    pub fn fld(&mut self, ty: FpSize, src: &Address) -> EmitResult<()> {
        self.x87_op(if ty == FpSize::F32 { 0xD9 } else { 0xDD }, 0, src)
    }

    /// Store and pop the top of the float stack.
    pub fn fstp(&mut self, ty: FpSize, dst: &Address) -> EmitResult<()> {
        self.x87_op(if ty == FpSize::F32 { 0xD9 } else { 0xDD }, 3, dst)
    }

    pub fn fstp_st(&mut self, st: X87) -> EmitResult<()> {
        if !A::HAS_X87 {
            return Err(EmitError::NoX87);
        }
        self.buffer.ensure_capacity();
        self.buffer.emit_u8(0xDD);
        self.buffer.emit_u8(0xD8 + st.encoding());
        Ok(())
    }

    pub fn fnstcw(&mut self, dst: &Address) -> EmitResult<()> {
        self.x87_op(0xD9, 7, dst)
    }

    pub fn fldcw(&mut self, src: &Address) -> EmitResult<()> {
        self.x87_op(0xD9, 5, src)
    }

    pub fn fistp_i32(&mut self, dst: &Address) -> EmitResult<()> {
        self.x87_op(0xDB, 3, dst)
    }

    pub fn fistp_i64(&mut self, dst: &Address) -> EmitResult<()> {
        self.x87_op(0xDF, 7, dst)
    }

    pub fn fild_i32(&mut self, src: &Address) -> EmitResult<()> {
        self.x87_op(0xDB, 0, src)
    }

    pub fn fild_i64(&mut self, src: &Address) -> EmitResult<()> {
        self.x87_op(0xDF, 5, src)
    }

    pub fn fincstp(&mut self) -> EmitResult<()> {
        if !A::HAS_X87 {
            return Err(EmitError::NoX87);
        }
        self.buffer.ensure_capacity();
        self.buffer.emit_u8(0xD9);
        self.buffer.emit_u8(0xF7);
        Ok(())
    }
}

impl<A: Arch> Default for Assembler<A> {
    fn default() -> Self {
        Assembler::new()
    }
}

// ==== ALU PUBLIC WRAPPERS ====

macro_rules! alu_ops {
    ($tag:expr, $rr:ident, $rm:ident, $mr:ident, $ri:ident, $mi:ident) => {
        impl<A: Arch> Assembler<A> {
            pub fn $rr(&mut self, ty: OpSize, dst: Gpr, src: Gpr) -> EmitResult<()> {
                self.arith_reg_reg($tag, ty, dst, src)
            }

            pub fn $rm(&mut self, ty: OpSize, dst: Gpr, src: &Address) -> EmitResult<()> {
                self.arith_reg_mem($tag, ty, dst, src)
            }

            pub fn $mr(&mut self, ty: OpSize, dst: &Address, src: Gpr) -> EmitResult<()> {
                self.arith_mem_reg($tag, ty, dst, src)
            }

            pub fn $ri(&mut self, ty: OpSize, dst: Gpr, imm: &Immediate) -> EmitResult<()> {
                self.arith_reg_imm($tag, ty, dst, imm)
            }

            pub fn $mi(&mut self, ty: OpSize, dst: &Address, imm: &Immediate) -> EmitResult<()> {
                self.arith_mem_imm($tag, ty, dst, imm)
            }
        }
    };
}

alu_ops!(TAG_ADD, add_reg_reg, add_reg_mem, add_mem_reg, add_reg_imm, add_mem_imm);
alu_ops!(TAG_OR, or_reg_reg, or_reg_mem, or_mem_reg, or_reg_imm, or_mem_imm);
alu_ops!(TAG_ADC, adc_reg_reg, adc_reg_mem, adc_mem_reg, adc_reg_imm, adc_mem_imm);
alu_ops!(TAG_SBB, sbb_reg_reg, sbb_reg_mem, sbb_mem_reg, sbb_reg_imm, sbb_mem_imm);
alu_ops!(TAG_AND, and_reg_reg, and_reg_mem, and_mem_reg, and_reg_imm, and_mem_imm);
alu_ops!(TAG_SUB, sub_reg_reg, sub_reg_mem, sub_mem_reg, sub_reg_imm, sub_mem_imm);
alu_ops!(TAG_XOR, xor_reg_reg, xor_reg_mem, xor_mem_reg, xor_reg_imm, xor_mem_imm);
alu_ops!(TAG_CMP, cmp_reg_reg, cmp_reg_mem, cmp_mem_reg, cmp_reg_imm, cmp_mem_imm);

// ==== SHIFT PUBLIC WRAPPERS ====

macro_rules! shift_ops {
    ($tag:expr, $ri:ident, $rc:ident, $mc:ident) => {
        impl<A: Arch> Assembler<A> {
            pub fn $ri(&mut self, ty: OpSize, reg: Gpr, imm: &Immediate) -> EmitResult<()> {
                self.generic_shift_imm($tag, ty, reg, imm)
            }

            /// Shift by a register amount, which must be the counter
            /// register.
            pub fn $rc(&mut self, ty: OpSize, reg: Gpr, shifter: Gpr) -> EmitResult<()> {
                self.generic_shift_cl_reg($tag, ty, reg, shifter)
            }

            pub fn $mc(&mut self, ty: OpSize, operand: &Address, shifter: Gpr) -> EmitResult<()> {
                self.generic_shift_cl_mem($tag, ty, operand, shifter)
            }
        }
    };
}

shift_ops!(TAG_ROL, rol_reg_imm, rol_reg_cl, rol_mem_cl);
shift_ops!(TAG_SHL, shl_reg_imm, shl_reg_cl, shl_mem_cl);
shift_ops!(TAG_SHR, shr_reg_imm, shr_reg_cl, shr_mem_cl);
shift_ops!(TAG_SAR, sar_reg_imm, sar_reg_cl, sar_mem_cl);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x86::arch::{X86_32, X86_64};

    fn asm32() -> Assembler<X86_32> {
        Assembler::new()
    }

    fn asm64() -> Assembler<X86_64> {
        Assembler::new()
    }

    #[test]
    fn accumulator_add_short_form() {
        let mut asm = asm32();
        asm.add_reg_imm(OpSize::S32, Gpr::Ax, &Immediate::new(0x12345678))
            .unwrap();
        assert_eq!(asm.bytes(), &[0x05, 0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn sign_extended_imm8_form() {
        let mut asm = asm32();
        asm.add_reg_imm(OpSize::S32, Gpr::Cx, &Immediate::new(5))
            .unwrap();
        assert_eq!(asm.bytes(), &[0x83, 0xC1, 0x05]);
    }

    #[test]
    fn rebinding_fails() {
        let mut asm = asm32();
        let label = asm.new_label();
        asm.bind(label).unwrap();
        assert!(matches!(
            asm.bind(label),
            Err(EmitError::LabelRebound { offset: 0 })
        ));
    }

    #[test]
    fn forward_long_branch_patched() {
        let mut asm = asm32();
        let label = asm.new_label();
        asm.j(Cond::E, label, false).unwrap();
        asm.nop(1).unwrap();
        asm.bind(label).unwrap();
        // je rel32 with displacement 1 (one nop between patch field end
        // and target).
        assert_eq!(asm.bytes(), &[0x0F, 0x84, 0x01, 0x00, 0x00, 0x00, 0x90]);
    }

    #[test]
    fn forward_near_branch_patched() {
        let mut asm = asm32();
        let label = asm.new_label();
        asm.j(Cond::Ne, label, true).unwrap();
        asm.nop(3).unwrap();
        asm.bind(label).unwrap();
        assert_eq!(asm.bytes(), &[0x75, 0x03, 0x0F, 0x1F, 0x00]);
    }

    #[test]
    fn near_promise_violation_is_fatal() {
        let mut asm = asm32();
        let label = asm.new_label();
        asm.jmp(label, true).unwrap();
        for _ in 0..40 {
            asm.nop(4).unwrap();
        }
        assert!(matches!(
            asm.bind(label),
            Err(EmitError::ShortDisplacementOverflow { .. })
        ));
    }

    #[test]
    fn unresolved_patches_fail_finalize() {
        let mut asm = asm32();
        let label = asm.new_label();
        asm.jmp(label, false).unwrap();
        match asm.finalize() {
            Err(EmitError::UnresolvedPatches { count }) => assert_eq!(count, 1),
            other => panic!("expected unresolved patches, got {:?}", other.err()),
        }
    }

    #[test]
    fn backward_branch_short_and_long() {
        let mut asm = asm32();
        let label = asm.new_label();
        asm.bind(label).unwrap();
        asm.jmp(label, false).unwrap();
        // jmp rel8, displacement -2.
        assert_eq!(asm.bytes(), &[0xEB, 0xFE]);

        let mut asm = asm32();
        let label = asm.new_label();
        asm.bind(label).unwrap();
        for _ in 0..126 {
            asm.nop(1).unwrap();
        }
        asm.jmp(label, false).unwrap();
        // Encoded rel8 of -128 still fits the short form.
        assert_eq!(&asm.bytes()[126..], &[0xEB, 0x80]);

        let mut asm = asm32();
        let label = asm.new_label();
        asm.bind(label).unwrap();
        for _ in 0..127 {
            asm.nop(1).unwrap();
        }
        asm.jmp(label, false).unwrap();
        // One byte further the long form takes over: rel32 of -132.
        assert_eq!(&asm.bytes()[127..], &[0xE9, 0x7C, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn shift_by_register_requires_cl() {
        let mut asm = asm32();
        assert_eq!(
            asm.shl_reg_cl(OpSize::S32, Gpr::Ax, Gpr::Dx).unwrap_err(),
            EmitError::ShiftCountNotCl { reg: "dx" }
        );
        asm.shl_reg_cl(OpSize::S32, Gpr::Ax, Gpr::Cx).unwrap();
        assert_eq!(asm.bytes(), &[0xD3, 0xE0]);
    }

    #[test]
    fn rex_w_and_extended_registers() {
        let mut asm = asm64();
        asm.add_reg_reg(OpSize::S64, Gpr::Ax, Gpr::Cx).unwrap();
        // REX.W add rax, rcx in the r64, r/m64 direction.
        assert_eq!(asm.bytes(), &[0x48, 0x03, 0xC1]);

        let mut asm = asm64();
        asm.add_reg_reg(OpSize::S64, Gpr::R8, Gpr::R15).unwrap();
        assert_eq!(asm.bytes(), &[0x4D, 0x03, 0xC7]);
    }

    #[test]
    fn extended_registers_rejected_on_32_bit() {
        let mut asm = asm32();
        assert_eq!(
            asm.mov_reg_reg(OpSize::S32, Gpr::R8, Gpr::Ax).unwrap_err(),
            EmitError::InvalidRegister { reg: "r8" }
        );
        assert_eq!(
            asm.mov_reg_imm(OpSize::S64, Gpr::Ax, &Immediate::new(1))
                .unwrap_err(),
            EmitError::InvalidOperandSize { bits: 64 }
        );
    }

    #[test]
    fn byte_op_requires_byte_alias() {
        let mut asm = asm32();
        assert_eq!(
            asm.add_reg_reg(OpSize::S8, Gpr::Si, Gpr::Ax).unwrap_err(),
            EmitError::NoByteAlias { reg: "si" }
        );
        // On x86-64 the same operation reaches sil through a bare REX.
        let mut asm = asm64();
        asm.add_reg_reg(OpSize::S8, Gpr::Si, Gpr::Ax).unwrap();
        assert_eq!(asm.bytes(), &[0x40, 0x02, 0xF0]);
    }

    #[test]
    fn locked_prefix_is_optional() {
        let addr = Address::base_disp(Gpr::Bx, 0);
        let mut asm = asm32();
        asm.cmpxchg(OpSize::S32, &addr, Gpr::Cx, true).unwrap();
        assert_eq!(asm.bytes(), &[0xF0, 0x0F, 0xB1, 0x0B]);

        let mut asm = asm32();
        asm.cmpxchg(OpSize::S32, &addr, Gpr::Cx, false).unwrap();
        assert_eq!(asm.bytes(), &[0x0F, 0xB1, 0x0B]);
    }

    #[test]
    fn x87_gated_by_target() {
        let addr = Address::base_disp(Gpr::Sp, 4);
        let mut asm = asm64();
        assert_eq!(asm.fld(FpSize::F32, &addr).unwrap_err(), EmitError::NoX87);
        let mut asm = asm32();
        asm.fld(FpSize::F32, &addr).unwrap();
        assert_eq!(asm.bytes(), &[0xD9, 0x44, 0x24, 0x04]);
    }

    #[test]
    fn pusha_gated_by_target() {
        let mut asm = asm64();
        assert_eq!(asm.pusha().unwrap_err(), EmitError::Legacy32Only);
        let mut asm = asm32();
        asm.pusha().unwrap();
        asm.popa().unwrap();
        assert_eq!(asm.bytes(), &[0x60, 0x61]);
    }

    #[test]
    fn call_external_symbol_records_pc_rel_fixup() {
        let mut asm = asm32();
        let sym = asm.extern_symbol("memset");
        asm.call_sym(sym).unwrap();
        let code = asm.finalize().unwrap();
        assert_eq!(code.code, vec![0xE8, 0xFC, 0xFF, 0xFF, 0xFF]);
        assert_eq!(code.fixups.len(), 1);
        let fixup = code.fixups[0];
        assert_eq!(fixup.position, 1);
        assert_eq!(fixup.kind, crate::core::RelocKind::R_386_PC32);
        assert_eq!(fixup.addend, -4);
        assert_eq!(code.symbols.name(fixup.sym), "memset");
    }

    #[test]
    fn block_labels_are_get_or_create() {
        let mut asm = asm32();
        let a = asm.block_label(7);
        let b = asm.block_label(7);
        assert_eq!(a, b);
        assert_ne!(asm.block_label(8), a);
    }
}
