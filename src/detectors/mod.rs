//! Detector registry (spec §9: "a single process with a detector registry"
//! replacing the original's set of parallel programs).
//!
//! Each submodule is one independent pass from spec §4.7: it consumes a
//! kernel's typed instruction stream (or, for the atomic detector, the IR
//! stream) and emits a typed finding list. Detectors share nothing but the
//! helpers in this module -- no detector mutates another's state.

pub mod atomic_ir;
pub mod datatype_conversion;
pub mod deadlock;
pub mod register_spill;
pub mod restrict_candidate;
pub mod shared_memory;
pub mod texture_memory;
pub mod vectorization;
pub mod warp_divergence;

use serde::Serialize;

use crate::instruction::PcOffset;
use crate::lexer::disasm::KernelDisassembly;

/// Severity a finding is tagged with (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
}

/// Common addressing a finding carries for the join phase (spec §4.8):
/// which kernel it belongs to, which source line and pc-offset to join
/// stall samples and live-register pressure against, and (for detectors
/// that need per-instruction precision) which register name the stall
/// sample's sass text must mention.
pub trait Located {
    fn kernel(&self) -> &str;
    fn source_line(&self) -> u32;
    fn pc_offset(&self) -> PcOffset;
    fn register(&self) -> Option<&str> {
        None
    }
}

const ARITHMETIC_MNEMONICS: [&str; 6] = ["MAD", "ADD", "MUL", "FMA", "MUFU", "RRO"];

/// Does `text` contain any of the arithmetic mnemonic substrings that
/// spec §4.7.4 and §4.7.6 both key off?
pub fn contains_arithmetic(text: &str) -> bool {
    ARITHMETIC_MNEMONICS.iter().any(|m| text.contains(m))
}

/// Mnemonics that remove a loaded register from restrict/texture
/// consideration once they write back to it (spec §4.7.6, §4.7.8).
pub const WRITE_MNEMONICS: [&str; 8] = ["MAD", "ADD", "MUL", "FMA", "ATOMS", "ATOMG", "MUFU", "RED."];

/// Extracts an instruction's destination register, matching the original's
/// `find_register`/`find_register_reduction` split: the last whitespace
/// token of the first comma-delimited operand field, except for `RED.`
/// instructions, whose destination is the *last* comma-delimited field
/// (`RED.E.ADD.F32... [UR4], R0 ;` writes back through its second operand,
/// not its first).
pub fn destination_register(mnemonic: &str, raw_text: &str) -> Option<String> {
    let operand_text = raw_text.strip_prefix(mnemonic).unwrap_or(raw_text);
    let field = if mnemonic.contains("RED.") {
        operand_text.split(',').next_back()?
    } else {
        operand_text.split(',').next()?
    };
    register_tokens(field).last().map(|s| s.to_string())
}

/// Does a plain `MUL`/`ADD` instruction read the same register it writes
/// (`FADD R8, R8, R12 ;`)? Matches the original's `same_register_read_write`:
/// the destination field is skipped, every later comma field is checked.
pub fn same_register_read_write(mnemonic: &str, raw_text: &str, destination: &str) -> bool {
    let operand_text = raw_text.strip_prefix(mnemonic).unwrap_or(raw_text);
    operand_text
        .split(',')
        .skip(1)
        .any(|field| register_tokens(field).iter().any(|t| *t == destination))
}

/// An `LDG`-family operand, decoded per spec §3's Register-Load Record:
/// a written register, a base register, and an unroll offset from
/// `[Base+0xNN]` syntax (0 when there is no `+offset`, spec §8 boundary
/// behavior).
#[derive(Debug, Clone)]
pub struct LdgOperand {
    pub written_register: String,
    pub base_register: String,
    pub offset: i64,
}

/// A load's vectorization width, tagged the way spec §4.7.9 names it
/// (`VEC_128`/`VEC_64`/`VEC_32`), not the raw bit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VecWidth {
    #[serde(rename = "VEC_32")]
    Vec32,
    #[serde(rename = "VEC_64")]
    Vec64,
    #[serde(rename = "VEC_128")]
    Vec128,
}

/// Classifies an `LDG`-family mnemonic's width (spec §4.7.9).
pub fn classify_width(mnemonic: &str) -> VecWidth {
    if mnemonic.contains(".128") {
        VecWidth::Vec128
    } else if mnemonic.contains(".64") {
        VecWidth::Vec64
    } else {
        VecWidth::Vec32
    }
}

pub fn register_tokens(text: &str) -> Vec<&str> {
    text.split(|c: char| c == ',' || c == '[' || c == ']' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Extracts the written register and the `[Base+offset]` addressing of an
/// `LDG`-family instruction's operand text (the text after the mnemonic).
pub fn parse_ldg_operand(operand_text: &str) -> Option<LdgOperand> {
    let bracket_start = operand_text.find('[')?;
    let bracket_rel_end = operand_text[bracket_start..].find(']')?;
    let bracket_end = bracket_start + bracket_rel_end;
    let inside = operand_text[bracket_start + 1..bracket_end].trim();

    let written_register = register_tokens(&operand_text[..bracket_start])
        .last()
        .map(|s| s.to_string())?;

    let (base_register, offset) = if let Some(idx) = inside.find("+-0x") {
        let base = inside[..idx].trim().to_string();
        let offset = i64::from_str_radix(inside[idx + 4..].trim(), 16).unwrap_or(0);
        (base, -offset)
    } else if let Some(idx) = inside.find("+0x") {
        let base = inside[..idx].trim().to_string();
        let offset = i64::from_str_radix(inside[idx + 3..].trim(), 16).unwrap_or(0);
        (base, offset)
    } else {
        (inside.to_string(), 0)
    };

    Some(LdgOperand {
        written_register,
        base_register,
        offset,
    })
}

/// Extracts the target label name from a branch's backtick-delimited
/// segment `` `(.L_x_N) `` (spec §4.7.5).
pub fn extract_branch_target(raw_text: &str) -> Option<String> {
    let start = raw_text.find('`')?;
    let rest = &raw_text[start + 1..];
    let open = rest.find('(')?;
    let close = rest[open + 1..].find(')')? + open + 1;
    Some(rest[open + 1..close].to_string())
}

/// Computes the disassembly-side loop regions using the §4.7.3 rule
/// (unified per spec §9 Open Question (c)): a branch to a label defined
/// strictly before it, whose line differs from the branch's own line,
/// marks `[label_line, branch_line]` as a loop body.
pub fn loop_regions(kernel: &KernelDisassembly) -> Vec<(u32, u32)> {
    let mut regions = Vec::new();
    for (branch_idx, inst) in kernel.instructions.iter().enumerate() {
        if !inst.raw_text.contains(" BRA ") {
            continue;
        }
        let Some(target_name) = extract_branch_target(&inst.raw_text) else {
            continue;
        };
        let Some(label) = kernel.labels.get(&target_name) else {
            continue;
        };
        let Some(label_idx) = kernel
            .instructions
            .iter()
            .position(|i| i.pc_offset == label.pc_offset)
        else {
            continue;
        };
        if label_idx < branch_idx && label.source_line != inst.source_line {
            let (start, end) = if label.source_line <= inst.source_line {
                (label.source_line, inst.source_line)
            } else {
                (inst.source_line, label.source_line)
            };
            regions.push((start, end));
        }
    }
    regions
}

pub fn line_in_any_region(line: u32, regions: &[(u32, u32)]) -> bool {
    regions.iter().any(|&(start, end)| line >= start && line <= end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ldg_with_no_offset_is_unroll_zero() {
        let op = parse_ldg_operand(" R8, [R4]").unwrap();
        assert_eq!(op.written_register, "R8");
        assert_eq!(op.base_register, "R4");
        assert_eq!(op.offset, 0);
    }

    #[test]
    fn ldg_with_offset_decodes_hex() {
        let op = parse_ldg_operand(" R9, [R4+0x4]").unwrap();
        assert_eq!(op.base_register, "R4");
        assert_eq!(op.offset, 4);
    }

    #[test]
    fn ldg_with_negative_offset() {
        let op = parse_ldg_operand(" R9, [R4+-0x4]").unwrap();
        assert_eq!(op.offset, -4);
    }

    #[test]
    fn classifies_width_from_mnemonic_suffix() {
        assert_eq!(classify_width("LDG.E.128"), VecWidth::Vec128);
        assert_eq!(classify_width("LDG.E.64"), VecWidth::Vec64);
        assert_eq!(classify_width("LDG.E.SYS"), VecWidth::Vec32);
    }

    #[test]
    fn extracts_branch_target_from_backtick_segment() {
        assert_eq!(
            extract_branch_target("@P0 BRA `(.L_x_3) ;"),
            Some(".L_x_3".to_string())
        );
    }
}
