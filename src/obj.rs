// This module turns a finalized function into a relocatable ELF object
// through the object crate: one .text section holding the code, a defined
// function symbol, an undefined symbol per external reference, and one
// relocation per fixup. The assembler's relocation kinds are the literal
// ELF r_type numbers, so the mapping here is a direct translation into
// the object crate's generic relocation model.

//! Relocatable ELF output for assembled functions.

use object::write::{Object, Relocation, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, RelocationEncoding, RelocationFlags, RelocationKind,
    SymbolFlags, SymbolKind, SymbolScope,
};

use crate::core::RelocKind;
use crate::x86::{Arch, MachineCode};

/// Translate an assembler relocation kind into the object crate's model.
///
/// Both targets use r_type 2 for 32-bit PC-relative; the absolute kinds
/// differ (`R_386_32` = 1, `R_X86_64_32` = 10).
fn relocation_flags(kind: RelocKind) -> RelocationFlags {
    let generic_kind = match kind {
        RelocKind(2) => RelocationKind::Relative,
        _ => RelocationKind::Absolute,
    };
    RelocationFlags::Generic {
        kind: generic_kind,
        encoding: RelocationEncoding::Generic,
        size: 32,
    }
}

/// Build a relocatable ELF object containing one function.
///
/// `name` becomes the global text symbol; every symbol referenced by a
/// fixup is added as undefined and left for the linker.
pub fn write_object<A: Arch>(name: &str, code: &MachineCode) -> object::write::Result<Vec<u8>> {
    let architecture = if A::IS_64BIT {
        Architecture::X86_64
    } else {
        Architecture::I386
    };
    let mut obj = Object::new(BinaryFormat::Elf, architecture, Endianness::Little);
    let text = obj.section_id(object::write::StandardSection::Text);

    let func = obj.add_symbol(Symbol {
        name: name.as_bytes().to_vec(),
        value: 0,
        size: code.code.len() as u64,
        kind: SymbolKind::Text,
        scope: SymbolScope::Linkage,
        weak: false,
        section: SymbolSection::Undefined,
        flags: SymbolFlags::None,
    });
    let offset = obj.add_symbol_data(func, text, &code.code, 16);

    // One undefined symbol per interned name, in table order.
    let mut externs = Vec::with_capacity(code.symbols.len());
    for (_, sym_name) in code.symbols.iter() {
        externs.push(obj.add_symbol(Symbol {
            name: sym_name.as_bytes().to_vec(),
            value: 0,
            size: 0,
            kind: SymbolKind::Text,
            scope: SymbolScope::Unknown,
            weak: false,
            section: SymbolSection::Undefined,
            flags: SymbolFlags::None,
        }));
    }

    for fixup in &code.fixups {
        obj.add_relocation(
            text,
            Relocation {
                offset: offset + fixup.position as u64,
                symbol: externs[fixup.sym.index()],
                addend: fixup.addend as i64,
                flags: relocation_flags(fixup.kind),
            },
        )?;
    }

    log::debug!(
        "object for `{}`: {} bytes, {} relocations",
        name,
        code.code.len(),
        code.fixups.len()
    );
    obj.write()
}
