//! Cross-validation against the iced-x86 decoder.
//!
//! Golden vectors pin exact bytes; these tests additionally feed the
//! emitted code to an independent decoder and check that it reads back
//! as the intended instructions.

use iced_x86::{Decoder, DecoderOptions, Mnemonic, OpKind, Register};
use x86_emit::{
    Address, Assembler, Cond, FpSize, Gpr, Immediate, OpSize, Scale, X86_32, X86_64, Xmm,
};

fn decode_all(bitness: u32, code: &[u8]) -> Vec<iced_x86::Instruction> {
    let mut decoder = Decoder::new(bitness, code, DecoderOptions::NONE);
    let mut out = Vec::new();
    while decoder.can_decode() {
        out.push(decoder.decode());
    }
    out
}

#[test]
fn integer_sequence_decodes_on_64_bit() {
    let mut asm = Assembler::<X86_64>::new();
    asm.mov_reg_reg(OpSize::S64, Gpr::Ax, Gpr::Bx).unwrap();
    asm.add_reg_imm(OpSize::S32, Gpr::Ax, &Immediate::new(0x12345678))
        .unwrap();
    let addr = Address::base_index_disp(Gpr::Di, Gpr::Cx, Scale::Four, 16).unwrap();
    asm.mov_reg_mem(OpSize::S32, Gpr::Dx, &addr).unwrap();
    asm.imul_reg_reg(OpSize::S64, Gpr::Cx, Gpr::R8).unwrap();
    asm.shl_reg_imm(OpSize::S64, Gpr::Ax, &Immediate::new(3))
        .unwrap();
    asm.ret().unwrap();
    let code = asm.finalize().unwrap().code;

    let instrs = decode_all(64, &code);
    assert_eq!(instrs.len(), 6);

    assert_eq!(instrs[0].mnemonic(), Mnemonic::Mov);
    assert_eq!(instrs[0].op0_register(), Register::RAX);
    assert_eq!(instrs[0].op1_register(), Register::RBX);

    assert_eq!(instrs[1].mnemonic(), Mnemonic::Add);
    assert_eq!(instrs[1].op0_register(), Register::EAX);
    assert_eq!(instrs[1].immediate32(), 0x12345678);

    assert_eq!(instrs[2].mnemonic(), Mnemonic::Mov);
    assert_eq!(instrs[2].op0_register(), Register::EDX);
    assert_eq!(instrs[2].op1_kind(), OpKind::Memory);
    assert_eq!(instrs[2].memory_base(), Register::RDI);
    assert_eq!(instrs[2].memory_index(), Register::RCX);
    assert_eq!(instrs[2].memory_index_scale(), 4);
    assert_eq!(instrs[2].memory_displacement64(), 16);

    assert_eq!(instrs[3].mnemonic(), Mnemonic::Imul);
    assert_eq!(instrs[3].op0_register(), Register::RCX);
    assert_eq!(instrs[3].op1_register(), Register::R8);

    assert_eq!(instrs[4].mnemonic(), Mnemonic::Shl);
    assert_eq!(instrs[5].mnemonic(), Mnemonic::Ret);
}

#[test]
fn branch_forms_decode_on_32_bit() {
    let mut asm = Assembler::<X86_32>::new();
    let top = asm.new_label();
    asm.bind(top).unwrap();
    asm.dec_reg(OpSize::S32, Gpr::Cx).unwrap();
    asm.j(Cond::Ne, top, false).unwrap();
    let exit = asm.new_label();
    asm.jmp(exit, false).unwrap();
    asm.pusha().unwrap();
    asm.bind(exit).unwrap();
    asm.ret().unwrap();
    let code = asm.finalize().unwrap().code;

    let instrs = decode_all(32, &code);
    assert_eq!(instrs[0].mnemonic(), Mnemonic::Dec);
    assert_eq!(instrs[1].mnemonic(), Mnemonic::Jne);
    // Backward branch over one dec: short form targeting offset 0.
    assert_eq!(instrs[1].len(), 2);
    assert_eq!(instrs[1].near_branch_target(), 0);
    assert_eq!(instrs[2].mnemonic(), Mnemonic::Jmp);
    assert_eq!(instrs[3].mnemonic(), Mnemonic::Pushad);
    assert_eq!(instrs[4].mnemonic(), Mnemonic::Ret);
}

#[test]
fn sse_sequence_decodes_on_64_bit() {
    let mut asm = Assembler::<X86_64>::new();
    asm.movss_reg_mem(FpSize::F64, Xmm::Xmm1, &Address::base_disp(Gpr::Sp, 8))
        .unwrap();
    asm.addss_reg_reg(FpSize::F64, Xmm::Xmm1, Xmm::Xmm9).unwrap();
    asm.cvttss2si_reg_reg(FpSize::F64, Gpr::Ax, Xmm::Xmm1)
        .unwrap();
    asm.pxor_reg_reg(Xmm::Xmm0, Xmm::Xmm0).unwrap();
    let code = asm.finalize().unwrap().code;

    let instrs = decode_all(64, &code);
    assert_eq!(instrs[0].mnemonic(), Mnemonic::Movsd);
    assert_eq!(instrs[0].op0_register(), Register::XMM1);
    assert_eq!(instrs[0].memory_base(), Register::RSP);

    assert_eq!(instrs[1].mnemonic(), Mnemonic::Addsd);
    assert_eq!(instrs[1].op1_register(), Register::XMM9);

    assert_eq!(instrs[2].mnemonic(), Mnemonic::Cvttsd2si);
    assert_eq!(instrs[2].op0_register(), Register::EAX);

    assert_eq!(instrs[3].mnemonic(), Mnemonic::Pxor);
}

#[test]
fn atomic_and_byte_ops_decode() {
    let mut asm = Assembler::<X86_64>::new();
    let addr = Address::base_disp(Gpr::R8, 0);
    asm.cmpxchg(OpSize::S64, &addr, Gpr::Cx, true).unwrap();
    asm.add_reg_reg(OpSize::S8, Gpr::Si, Gpr::Ax).unwrap();
    let code = asm.finalize().unwrap().code;

    let instrs = decode_all(64, &code);
    assert_eq!(instrs[0].mnemonic(), Mnemonic::Cmpxchg);
    assert!(instrs[0].has_lock_prefix());
    assert_eq!(instrs[0].memory_base(), Register::R8);
    assert_eq!(instrs[0].op1_register(), Register::RCX);

    assert_eq!(instrs[1].mnemonic(), Mnemonic::Add);
    assert_eq!(instrs[1].op0_register(), Register::SIL);
    assert_eq!(instrs[1].op1_register(), Register::AL);
}
