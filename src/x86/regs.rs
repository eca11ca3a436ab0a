// This module defines the register files the encoder operates on. Each
// class is a closed enumeration carrying its raw hardware encoding number.
// The width-neutral general-purpose names (ax, cx, ...) stand for
// eax/rax etc. depending on the operand size of the instruction using
// them; which encodings are actually reachable on a given target is
// decided by the architecture parameter, not here.

//! Register enumerations: general-purpose, byte, SSE and x87 classes.

/// Operand size selector for the integer instruction set.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OpSize {
    S8,
    S16,
    S32,
    S64,
}

impl OpSize {
    #[inline]
    pub fn is_byte(self) -> bool {
        self == OpSize::S8
    }

    #[inline]
    pub fn is_word(self) -> bool {
        self == OpSize::S16
    }

    #[inline]
    pub fn is_quad(self) -> bool {
        self == OpSize::S64
    }

    pub fn bits(self) -> u32 {
        match self {
            OpSize::S8 => 8,
            OpSize::S16 => 16,
            OpSize::S32 => 32,
            OpSize::S64 => 64,
        }
    }
}

/// Scalar floating-point width, selecting the `ss` (F3) or `sd` (F2)
/// variant of an SSE instruction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FpSize {
    F32,
    F64,
}

impl FpSize {
    /// Mandatory prefix byte of the scalar instruction family.
    #[inline]
    pub(crate) fn scalar_prefix(self) -> u8 {
        match self {
            FpSize::F32 => 0xF3,
            FpSize::F64 => 0xF2,
        }
    }
}

/// General-purpose registers. The names are width-neutral: encoding 0 is
/// eax on a 32-bit target and rax/eax/ax/al on a 64-bit one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum Gpr {
    Ax = 0,
    Cx = 1,
    Dx = 2,
    Bx = 3,
    Sp = 4,
    Bp = 5,
    Si = 6,
    Di = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Gpr {
    #[inline]
    pub fn encoding(self) -> u8 {
        self as u8
    }

    /// Low three bits, what goes into a ModRM/SIB field.
    #[inline]
    pub fn low_bits(self) -> u8 {
        self.encoding() & 7
    }

    /// True for r8..r15, which need a REX bit to address.
    #[inline]
    pub fn is_extended(self) -> bool {
        self.encoding() >= 8
    }

    pub fn name(self) -> &'static str {
        const NAMES: [&str; 16] = [
            "ax", "cx", "dx", "bx", "sp", "bp", "si", "di", "r8", "r9", "r10", "r11", "r12",
            "r13", "r14", "r15",
        ];
        NAMES[self.encoding() as usize]
    }
}

/// Byte registers addressable without an operand-size game: the legacy
/// eight plus the REX-only low-byte forms.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ByteReg {
    Al = 0,
    Cl = 1,
    Dl = 2,
    Bl = 3,
    // Encodings 4..=7 are ah/ch/dh/bh without REX, spl/bpl/sil/dil with.
    Ah = 4,
    Ch = 5,
    Dh = 6,
    Bh = 7,
    Spl = 16 + 4,
    Bpl = 16 + 5,
    Sil = 16 + 6,
    Dil = 16 + 7,
    R8b = 16 + 8,
    R9b = 16 + 9,
    R10b = 16 + 10,
    R11b = 16 + 11,
    R12b = 16 + 12,
    R13b = 16 + 13,
    R14b = 16 + 14,
    R15b = 16 + 15,
}

impl ByteReg {
    #[inline]
    pub fn encoding(self) -> u8 {
        (self as u8) & 0x0F
    }

    #[inline]
    pub fn low_bits(self) -> u8 {
        self.encoding() & 7
    }

    /// The high-byte legacy registers ah/ch/dh/bh. Unreachable in any
    /// instruction carrying a REX prefix.
    #[inline]
    pub fn is_high_byte(self) -> bool {
        matches!(self, ByteReg::Ah | ByteReg::Ch | ByteReg::Dh | ByteReg::Bh)
    }

    /// True when the register is only expressible with a REX prefix
    /// present (spl/bpl/sil/dil and r8b..r15b).
    #[inline]
    pub fn needs_rex(self) -> bool {
        (self as u8) >= 16
    }

    #[inline]
    pub fn is_extended(self) -> bool {
        self.encoding() >= 8
    }

    pub fn name(self) -> &'static str {
        match self {
            ByteReg::Al => "al",
            ByteReg::Cl => "cl",
            ByteReg::Dl => "dl",
            ByteReg::Bl => "bl",
            ByteReg::Ah => "ah",
            ByteReg::Ch => "ch",
            ByteReg::Dh => "dh",
            ByteReg::Bh => "bh",
            ByteReg::Spl => "spl",
            ByteReg::Bpl => "bpl",
            ByteReg::Sil => "sil",
            ByteReg::Dil => "dil",
            ByteReg::R8b => "r8b",
            ByteReg::R9b => "r9b",
            ByteReg::R10b => "r10b",
            ByteReg::R11b => "r11b",
            ByteReg::R12b => "r12b",
            ByteReg::R13b => "r13b",
            ByteReg::R14b => "r14b",
            ByteReg::R15b => "r15b",
        }
    }
}

/// SSE registers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Xmm {
    Xmm0 = 0,
    Xmm1 = 1,
    Xmm2 = 2,
    Xmm3 = 3,
    Xmm4 = 4,
    Xmm5 = 5,
    Xmm6 = 6,
    Xmm7 = 7,
    Xmm8 = 8,
    Xmm9 = 9,
    Xmm10 = 10,
    Xmm11 = 11,
    Xmm12 = 12,
    Xmm13 = 13,
    Xmm14 = 14,
    Xmm15 = 15,
}

impl Xmm {
    #[inline]
    pub fn encoding(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn low_bits(self) -> u8 {
        self.encoding() & 7
    }

    #[inline]
    pub fn is_extended(self) -> bool {
        self.encoding() >= 8
    }

    pub fn name(self) -> &'static str {
        const NAMES: [&str; 16] = [
            "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7", "xmm8", "xmm9",
            "xmm10", "xmm11", "xmm12", "xmm13", "xmm14", "xmm15",
        ];
        NAMES[self.encoding() as usize]
    }
}

/// Legacy x87 float-stack registers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum X87 {
    St0 = 0,
    St1 = 1,
    St2 = 2,
    St3 = 3,
    St4 = 4,
    St5 = 5,
    St6 = 6,
    St7 = 7,
}

impl X87 {
    #[inline]
    pub fn encoding(self) -> u8 {
        self as u8
    }
}
