//! The typed instruction stream shared by every detector.
//!
//! Spec §9 calls for a single per-instruction classification pass instead of
//! each detector re-scanning raw mnemonic text with its own substring
//! dispatch. [`Category`] is that classification: a cheap, non-exclusive set
//! of tags computed once when the instruction is lexed. Detectors use it to
//! cull the stream before applying their own exact-match logic (spec says
//! register names and mnemonics are compared literally; `Category` never
//! replaces that, it only narrows candidates).

use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Category: u16 {
        const MEMORY_LOAD  = 1 << 0;
        const MEMORY_STORE = 1 << 1;
        const ARITHMETIC   = 1 << 2;
        const BRANCH       = 1 << 3;
        const SYNC         = 1 << 4;
        const ATOMIC       = 1 << 5;
        const CONVERSION   = 1 << 6;
        const TEXTURE      = 1 << 7;
        const UNKNOWN      = 1 << 8;
    }
}

/// Classifies an instruction's raw text (predicate prefix included) into the
/// coarse tag set from spec §9's design note. Substring matching only --
/// exact-mnemonic decisions remain the responsibility of each detector.
pub fn classify(raw_text: &str) -> Category {
    let mut cat = Category::empty();

    if raw_text.contains("LDG.") || raw_text.contains("LDS") || raw_text.contains("LDL") {
        cat |= Category::MEMORY_LOAD;
    }
    if raw_text.contains("STL") || raw_text.contains("STS") || raw_text.contains("STG") {
        cat |= Category::MEMORY_STORE;
    }
    if raw_text.contains("LDGSTS") {
        cat |= Category::MEMORY_LOAD | Category::MEMORY_STORE;
    }
    for arith in ["MAD", "ADD", "MUL", "FMA", "MUFU", "RRO"] {
        if raw_text.contains(arith) {
            cat |= Category::ARITHMETIC;
            break;
        }
    }
    if raw_text.contains(" BRA ") {
        cat |= Category::BRANCH;
    }
    if raw_text.contains("SYNC") {
        cat |= Category::SYNC;
    }
    for atomic in ["ATOM.", "ATOMS", "ATOMG", "RED."] {
        if raw_text.contains(atomic) {
            cat |= Category::ATOMIC;
            break;
        }
    }
    for conv in ["I2F", "F2I", "F2F"] {
        if raw_text.contains(conv) {
            cat |= Category::CONVERSION;
            break;
        }
    }
    for tex in ["TEX.", "TLD", "TXQ"] {
        if raw_text.contains(tex) {
            cat |= Category::TEXTURE;
            break;
        }
    }

    if cat.is_empty() {
        Category::UNKNOWN
    } else {
        cat
    }
}

/// A program-counter offset, normalized per spec §3: a lowercase 4-hex-digit
/// string form and an integer form, kept in sync with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PcOffset(pub u32);

impl PcOffset {
    pub fn from_hex(text: &str) -> Option<Self> {
        u32::from_str_radix(text.trim(), 16).ok().map(PcOffset)
    }

    pub fn hex(&self) -> String {
        format!("{:04x}", self.0)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl Serialize for PcOffset {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.hex())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LiveRegisterCounts {
    pub general: u32,
    pub predicate: u32,
    pub uniform_general: u32,
}

impl LiveRegisterCounts {
    pub fn sum(&self) -> u32 {
        self.general + self.predicate + self.uniform_general
    }
}

/// One disassembly instruction line. Immutable once produced (spec §3).
#[derive(Debug, Clone)]
pub struct Instruction {
    pub pc_offset: PcOffset,
    /// Inherits the last source-line marker seen above it; 0 if none yet.
    pub source_line: u32,
    /// Leading non-space token of the operand region. For predicated
    /// instructions (`@P0 BRA ...`) this is the predicate, not the opcode --
    /// detectors that care about predication search `raw_text` instead.
    pub mnemonic: String,
    pub raw_text: String,
    pub live_registers: Option<LiveRegisterCounts>,
    pub category: Category,
}

impl Instruction {
    pub fn new(
        pc_offset: PcOffset,
        source_line: u32,
        mnemonic: String,
        raw_text: String,
        live_registers: Option<LiveRegisterCounts>,
    ) -> Self {
        let category = classify(&raw_text);
        Instruction {
            pc_offset,
            source_line,
            mnemonic,
            raw_text,
            live_registers,
            category,
        }
    }
}

/// A label definition, completed once the first following instruction is read.
#[derive(Debug, Clone)]
pub struct Label {
    pub name: String,
    pub source_line: u32,
    pub pc_offset: PcOffset,
}
