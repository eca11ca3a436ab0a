//! Golden byte-vector tests for the 64-bit encoder: REX derivation,
//! extended registers, and the long-mode special cases.

use x86_emit::{
    Address, Assembler, ByteReg, Cond, EmitError, EmitResult, FpSize, Gpr, Immediate, OpSize,
    Scale, X86_64, Xmm,
};

fn emit(f: impl FnOnce(&mut Assembler<X86_64>) -> EmitResult<()>) -> Vec<u8> {
    let mut asm = Assembler::<X86_64>::new();
    f(&mut asm).unwrap();
    asm.finalize().unwrap().code
}

#[test]
fn rex_w_for_quad_operands() {
    assert_eq!(
        emit(|a| a.mov_reg_reg(OpSize::S64, Gpr::Ax, Gpr::Bx)),
        [0x48, 0x89, 0xD8]
    );
    assert_eq!(
        emit(|a| a.add_reg_reg(OpSize::S64, Gpr::Ax, Gpr::Cx)),
        [0x48, 0x03, 0xC1]
    );
    assert_eq!(
        emit(|a| a.cmp_reg_imm(OpSize::S64, Gpr::Ax, &Immediate::new(5))),
        [0x48, 0x83, 0xF8, 0x05]
    );
    assert_eq!(
        emit(|a| a.test_reg_reg(OpSize::S64, Gpr::Cx, Gpr::Cx)),
        [0x48, 0x85, 0xC9]
    );
    assert_eq!(emit(|a| a.cqo()), [0x48, 0x99]);
    // No REX.W for 32-bit operands.
    assert_eq!(
        emit(|a| a.mov_reg_reg(OpSize::S32, Gpr::Ax, Gpr::Bx)),
        [0x89, 0xD8]
    );
}

#[test]
fn rex_r_x_b_from_extended_registers() {
    assert_eq!(
        emit(|a| a.add_reg_reg(OpSize::S64, Gpr::R8, Gpr::R15)),
        [0x4D, 0x03, 0xC7]
    );
    assert_eq!(
        emit(|a| a.mov_reg_reg(OpSize::S32, Gpr::R8, Gpr::Ax)),
        [0x41, 0x89, 0xC0]
    );
    assert_eq!(emit(|a| a.push_reg(Gpr::R9)), [0x41, 0x51]);
    assert_eq!(emit(|a| a.pop_reg(Gpr::R15)), [0x41, 0x5F]);
    // REX.X from an extended index register.
    let addr = Address::base_index_disp(Gpr::Ax, Gpr::R9, Scale::Eight, 0).unwrap();
    assert_eq!(
        emit(|a| a.mov_reg_mem(OpSize::S64, Gpr::Dx, &addr)),
        [0x4A, 0x8B, 0x14, 0xC8]
    );
}

#[test]
fn mov_imm_forms() {
    assert_eq!(
        emit(|a| a.mov_reg_imm(OpSize::S32, Gpr::Ax, &Immediate::new(42))),
        [0xB8, 0x2A, 0x00, 0x00, 0x00]
    );
    // Quad immediates take the sign-extending C7 form.
    assert_eq!(
        emit(|a| a.mov_reg_imm(OpSize::S64, Gpr::Cx, &Immediate::new(0x100))),
        [0x48, 0xC7, 0xC1, 0x00, 0x01, 0x00, 0x00]
    );
    assert_eq!(
        emit(|a| a.mov_reg_imm(OpSize::S8, Gpr::Si, &Immediate::new(1))),
        [0x40, 0xB6, 0x01]
    );
    assert_eq!(
        emit(|a| a.mov_reg_imm(OpSize::S8, Gpr::R10, &Immediate::new(1))),
        [0x41, 0xB2, 0x01]
    );
}

#[test]
fn movsxd_long_mode_only() {
    assert_eq!(
        emit(|a| a.movsxd_reg_reg(Gpr::Dx, Gpr::Ax)),
        [0x48, 0x63, 0xD0]
    );
    let mut asm32 = Assembler::<x86_emit::X86_32>::new();
    assert_eq!(
        asm32.movsxd_reg_reg(Gpr::Dx, Gpr::Ax).unwrap_err(),
        EmitError::Long64Only
    );
}

#[test]
fn sp_and_bp_family_addressing() {
    // r12 shares rsp's low bits and also demands a SIB byte.
    let addr = Address::base_disp(Gpr::R12, 8);
    assert_eq!(
        emit(|a| a.add_mem_reg(OpSize::S32, &addr, Gpr::Si)),
        [0x41, 0x01, 0x74, 0x24, 0x08]
    );
    // r13 shares rbp's low bits and keeps the forced zero disp8.
    let addr = Address::base_disp(Gpr::R13, 0);
    assert_eq!(
        emit(|a| a.mov_reg_mem(OpSize::S64, Gpr::Ax, &addr)),
        [0x49, 0x8B, 0x45, 0x00]
    );
    let addr = Address::base_disp(Gpr::Sp, 8);
    assert_eq!(
        emit(|a| a.mov_reg_mem(OpSize::S64, Gpr::Ax, &addr)),
        [0x48, 0x8B, 0x44, 0x24, 0x08]
    );
}

#[test]
fn byte_registers_in_long_mode() {
    // spl/sil and friends need a bare REX prefix.
    assert_eq!(
        emit(|a| a.add_reg_reg(OpSize::S8, Gpr::Si, Gpr::Ax)),
        [0x40, 0x02, 0xF0]
    );
    assert_eq!(
        emit(|a| a.add_reg_imm(OpSize::S8, Gpr::Sp, &Immediate::new(1))),
        [0x40, 0x80, 0xC4, 0x01]
    );
    assert_eq!(
        emit(|a| a.setcc(Cond::E, ByteReg::R14b)),
        [0x41, 0x0F, 0x94, 0xC6]
    );
    assert_eq!(
        emit(|a| a.setcc(Cond::E, ByteReg::Spl)),
        [0x40, 0x0F, 0x94, 0xC4]
    );
    // Plain al stays prefix-free.
    assert_eq!(emit(|a| a.setcc(Cond::Ne, ByteReg::Al)), [0x0F, 0x95, 0xC0]);
}

#[test]
fn inc_dec_are_modrm_forms_in_long_mode() {
    // 0x40+r / 0x48+r are REX prefixes now.
    assert_eq!(emit(|a| a.inc_reg(OpSize::S32, Gpr::Ax)), [0xFF, 0xC0]);
    assert_eq!(
        emit(|a| a.inc_reg(OpSize::S64, Gpr::Cx)),
        [0x48, 0xFF, 0xC1]
    );
    assert_eq!(
        emit(|a| a.dec_reg(OpSize::S32, Gpr::R11)),
        [0x41, 0xFF, 0xCB]
    );
}

#[test]
fn sse_with_extended_registers() {
    assert_eq!(
        emit(|a| a.movss_reg_mem(FpSize::F32, Xmm::Xmm8, &Address::base_disp(Gpr::Ax, 0))),
        [0xF3, 0x44, 0x0F, 0x10, 0x00]
    );
    assert_eq!(
        emit(|a| a.padd_reg_reg(OpSize::S32, Xmm::Xmm9, Xmm::Xmm10)),
        [0x66, 0x45, 0x0F, 0xFE, 0xCA]
    );
    assert_eq!(
        emit(|a| a.addss_reg_reg(FpSize::F64, Xmm::Xmm0, Xmm::Xmm12)),
        [0xF2, 0x41, 0x0F, 0x58, 0xC4]
    );
}

#[test]
fn quad_alu_against_memory() {
    let addr = Address::base_disp(Gpr::Bx, 16);
    assert_eq!(
        emit(|a| a.add_reg_mem(OpSize::S64, Gpr::Ax, &addr)),
        [0x48, 0x03, 0x43, 0x10]
    );
    assert_eq!(
        emit(|a| a.xor_mem_reg(OpSize::S64, &addr, Gpr::R8)),
        [0x4C, 0x31, 0x43, 0x10]
    );
    assert_eq!(
        emit(|a| a.and_mem_imm(OpSize::S64, &addr, &Immediate::new(-2))),
        [0x48, 0x83, 0x63, 0x10, 0xFE]
    );
}

#[test]
fn shifts_and_bswap_quad() {
    assert_eq!(
        emit(|a| a.shl_reg_imm(OpSize::S64, Gpr::Ax, &Immediate::new(3))),
        [0x48, 0xC1, 0xE0, 0x03]
    );
    assert_eq!(
        emit(|a| a.sar_reg_cl(OpSize::S64, Gpr::R10, Gpr::Cx)),
        [0x49, 0xD3, 0xFA]
    );
    assert_eq!(
        emit(|a| a.bswap(OpSize::S64, Gpr::Dx)),
        [0x48, 0x0F, 0xCA]
    );
    assert_eq!(
        emit(|a| a.bswap(OpSize::S64, Gpr::R9)),
        [0x49, 0x0F, 0xC9]
    );
}

#[test]
fn atomics_with_rex() {
    let addr = Address::base_disp(Gpr::R8, 0);
    assert_eq!(
        emit(|a| a.cmpxchg(OpSize::S64, &addr, Gpr::Cx, true)),
        [0xF0, 0x49, 0x0F, 0xB1, 0x08]
    );
    assert_eq!(
        emit(|a| a.xadd(OpSize::S32, &addr, Gpr::Dx, false)),
        [0x41, 0x0F, 0xC1, 0x10]
    );
}

#[test]
fn legacy_opcodes_rejected() {
    let mut asm = Assembler::<X86_64>::new();
    assert_eq!(asm.pusha().unwrap_err(), EmitError::Legacy32Only);
    assert_eq!(
        asm.fld(FpSize::F32, &Address::base_disp(Gpr::Sp, 0))
            .unwrap_err(),
        EmitError::NoX87
    );
}
