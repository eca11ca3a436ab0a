//! Demo object generator.
//!
//! Assembles a small built-in function for the chosen target and writes
//! it out as a relocatable ELF object (or a hex dump), mainly useful for
//! eyeballing encodings with objdump.

use std::fs;
use std::path::PathBuf;

use clap::Parser;

use x86_emit::obj::write_object;
use x86_emit::{
    Address, Arch, Assembler, Cond, EmitResult, Gpr, Immediate, MachineCode, OpSize, Scale,
    X86_32, X86_64,
};

#[derive(Parser)]
#[command(name = "asmgen", about = "Assemble a demo function to an ELF object")]
struct Args {
    /// Target: x86 or x86_64.
    #[arg(long, default_value = "x86_64")]
    target: String,

    /// Output path; defaults to demo-<target>.o.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print a hex dump instead of writing an object file.
    #[arg(long)]
    hex: bool,
}

/// Sum the `len` 32-bit elements at `ptr`, then tail-call a logging hook.
///
/// Exercises the interesting encoder paths: scaled addressing, a forward
/// branch, a backward near loop and an external fixup.
fn demo<A: Arch>() -> EmitResult<MachineCode> {
    let (ptr, len) = (Gpr::Di, Gpr::Si);
    let mut asm = Assembler::<A>::new();
    let done = asm.new_label();
    let top = asm.new_label();

    asm.xor_reg_reg(OpSize::S32, Gpr::Ax, Gpr::Ax)?;
    asm.xor_reg_reg(OpSize::S32, Gpr::Cx, Gpr::Cx)?;
    asm.test_reg_reg(OpSize::S32, len, len)?;
    asm.j(Cond::E, done, false)?;
    asm.bind(top)?;
    let elem = Address::base_index_disp(ptr, Gpr::Cx, Scale::Four, 0)?;
    asm.add_reg_mem(OpSize::S32, Gpr::Ax, &elem)?;
    asm.inc_reg(OpSize::S32, Gpr::Cx)?;
    asm.cmp_reg_reg(OpSize::S32, Gpr::Cx, len)?;
    asm.j(Cond::B, top, false)?;
    asm.bind(done)?;
    let hook = asm.extern_symbol("sum_logged");
    asm.call_sym(hook)?;
    asm.add_reg_imm(OpSize::S32, Gpr::Ax, &Immediate::new(0))?;
    asm.ret()?;
    asm.align_function()?;
    asm.finalize()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let (code, object) = match args.target.as_str() {
        "x86" => {
            let code = demo::<X86_32>()?;
            let object = write_object::<X86_32>("sum_u32", &code)?;
            (code, object)
        }
        "x86_64" => {
            let code = demo::<X86_64>()?;
            let object = write_object::<X86_64>("sum_u32", &code)?;
            (code, object)
        }
        other => {
            eprintln!("unknown target `{other}` (expected x86 or x86_64)");
            std::process::exit(1);
        }
    };

    if args.hex {
        for chunk in code.code.chunks(16) {
            let line: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
            println!("{}", line.join(" "));
        }
        return Ok(());
    }

    let path = args
        .output
        .unwrap_or_else(|| PathBuf::from(format!("demo-{}.o", args.target)));
    fs::write(&path, object)?;
    println!(
        "wrote {} ({} bytes of code, {} fixups)",
        path.display(),
        code.code.len(),
        code.fixups.len()
    );
    Ok(())
}
