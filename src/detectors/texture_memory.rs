//! Texture-memory-candidate Detector (spec §4.7.8).

use indexmap::IndexMap;
use serde::Serialize;

use super::{destination_register, parse_ldg_operand, same_register_read_write, Located, Severity, WRITE_MNEMONICS};
use crate::instruction::{Category, Instruction, PcOffset};
use crate::lexer::disasm::KernelDisassembly;

#[derive(Debug, Clone, Serialize)]
pub struct TextureFinding {
    #[serde(skip)]
    pub kernel: String,
    pub register: String,
    pub base_register: String,
    pub unroll_offsets: Vec<i64>,
    pub spatial_locality: bool,
    #[serde(rename = "line")]
    pub source_line: u32,
    #[serde(rename = "pc")]
    pub pc_offset: PcOffset,
    pub severity: Severity,
}

impl Located for TextureFinding {
    fn kernel(&self) -> &str {
        &self.kernel
    }
    fn source_line(&self) -> u32 {
        self.source_line
    }
    fn pc_offset(&self) -> PcOffset {
        self.pc_offset
    }
    fn register(&self) -> Option<&str> {
        Some(&self.register)
    }
}

struct LoadRecord {
    index: usize,
    written_register: String,
    base_register: String,
    offset: i64,
    source_line: u32,
    pc_offset: PcOffset,
}

/// A register is marked USED when it is the *destination* of a later
/// write-set instruction (spec §4.7.8, same write set as §4.7.6), except
/// that a plain `MUL`/`ADD` which also reads the same register on its
/// right-hand side (`FADD R8, R8, R12 ;`) is a read-modify-write and stays
/// NOT_USED.
fn used_after(instructions: &[Instruction], start: usize, register: &str) -> bool {
    instructions[start..].iter().any(|inst| {
        if !inst.category.intersects(Category::ARITHMETIC | Category::ATOMIC) {
            return false;
        }
        if !WRITE_MNEMONICS.iter().any(|m| inst.mnemonic.contains(m)) {
            return false;
        }
        let Some(dest) = destination_register(&inst.mnemonic, &inst.raw_text) else {
            return false;
        };
        if dest != register {
            return false;
        }
        if (inst.mnemonic.contains("MUL") || inst.mnemonic.contains("ADD"))
            && same_register_read_write(&inst.mnemonic, &inst.raw_text, &dest)
        {
            return false;
        }
        true
    })
}

pub fn detect(kernels: &IndexMap<String, KernelDisassembly>) -> IndexMap<String, Vec<TextureFinding>> {
    let mut out = IndexMap::new();
    for (kernel_name, kernel) in kernels {
        if kernel_name.is_empty() {
            continue;
        }
        // Kernel already reads through the texture path: nothing to suggest.
        if kernel.instructions.iter().any(|i| i.category.contains(Category::TEXTURE)) {
            continue;
        }

        let mut loads: Vec<LoadRecord> = Vec::new();
        for (idx, inst) in kernel.instructions.iter().enumerate() {
            if !inst.category.contains(Category::MEMORY_LOAD) {
                continue;
            }
            if !inst.mnemonic.contains("LDG.") || inst.mnemonic.contains(".CI") || inst.mnemonic.contains(".CONSTANT") {
                continue;
            }
            let operand_text = inst
                .raw_text
                .strip_prefix(inst.mnemonic.as_str())
                .unwrap_or(inst.raw_text.as_str());
            if let Some(op) = parse_ldg_operand(operand_text) {
                loads.push(LoadRecord {
                    index: idx,
                    written_register: op.written_register,
                    base_register: op.base_register,
                    offset: op.offset,
                    source_line: inst.source_line,
                    pc_offset: inst.pc_offset,
                });
            }
        }

        let mut groups: IndexMap<String, Vec<&LoadRecord>> = IndexMap::new();
        for load in &loads {
            groups.entry(load.base_register.clone()).or_default().push(load);
        }

        let mut findings = Vec::new();
        for (base_register, group) in &groups {
            let mut offsets: Vec<i64> = group.iter().map(|l| l.offset).collect();
            offsets.sort_unstable();
            let spatial_locality = offsets.len() > 1
                && offsets
                    .windows(2)
                    .all(|w| matches!((w[1] - w[0]).unsigned_abs(), 4 | 8 | 16));
            if !spatial_locality {
                continue;
            }

            for load in group {
                if used_after(&kernel.instructions, load.index + 1, &load.written_register) {
                    continue;
                }
                findings.push(TextureFinding {
                    kernel: kernel_name.clone(),
                    register: load.written_register.clone(),
                    base_register: base_register.clone(),
                    unroll_offsets: offsets.clone(),
                    spatial_locality,
                    source_line: load.source_line,
                    pc_offset: load.pc_offset,
                    severity: Severity::Info,
                });
            }
        }

        findings.sort_by_key(|f| (f.source_line, f.pc_offset));
        if !findings.is_empty() {
            out.insert(kernel_name.clone(), findings);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::disasm;

    #[test]
    fn unused_spatially_local_unrolled_loads_are_three_candidates() {
        let text = "\t.section .text._Z3fooV,\"ax\",@progbits\n\
            \t\t// line 5\n\
            \t\t/*0000*/ LDG.E.SYS R8, [R4] ;\n\
            \t\t// line 6\n\
            \t\t/*0010*/ LDG.E.SYS R12, [R4+0x4] ;\n\
            \t\t// line 7\n\
            \t\t/*0020*/ LDG.E.SYS R16, [R4+0x8] ;\n";
        let kernels = disasm::lex(text);
        let findings = detect(&kernels);
        let kernel_findings = findings.get("_Z3fooV").unwrap();
        assert_eq!(kernel_findings.len(), 3);
        for finding in kernel_findings {
            assert_eq!(finding.base_register, "R4");
            assert_eq!(finding.unroll_offsets, vec![0, 4, 8]);
            assert!(finding.spatial_locality);
        }
        assert_eq!(kernel_findings[0].register, "R8");
        assert_eq!(kernel_findings[1].register, "R12");
        assert_eq!(kernel_findings[2].register, "R16");
    }

    #[test]
    fn already_using_texture_path_suppresses_all_findings() {
        let text = "\t.section .text._Z3fooV,\"ax\",@progbits\n\
            \t\t/*0000*/ LDG.E.SYS R8, [R4] ;\n\
            \t\t/*0010*/ LDG.E.SYS R9, [R4+0x4] ;\n\
            \t\t/*0020*/ TEX.1D.LZ R12, R8, 0x0 ;\n";
        let kernels = disasm::lex(text);
        assert!(detect(&kernels).is_empty());
    }

    #[test]
    fn register_written_later_is_not_a_candidate() {
        let text = "\t.section .text._Z3fooV,\"ax\",@progbits\n\
            \t\t/*0000*/ LDG.E.SYS R8, [R4] ;\n\
            \t\t/*0010*/ LDG.E.SYS R9, [R4+0x4] ;\n\
            \t\t/*0020*/ IMAD R8, R3, 0x1, R7 ;\n\
            \t\t/*0030*/ IMAD R9, R3, 0x1, R7 ;\n";
        let kernels = disasm::lex(text);
        assert!(detect(&kernels).get("_Z3fooV").is_none());
    }

    #[test]
    fn read_modify_write_of_the_same_register_stays_a_candidate() {
        let text = "\t.section .text._Z3fooV,\"ax\",@progbits\n\
            \t\t/*0000*/ LDG.E.SYS R8, [R4] ;\n\
            \t\t/*0010*/ LDG.E.SYS R9, [R4+0x4] ;\n\
            \t\t/*0020*/ FADD R8, R8, R11 ;\n";
        let kernels = disasm::lex(text);
        let findings = detect(&kernels);
        let kernel_findings = findings.get("_Z3fooV").unwrap();
        assert_eq!(kernel_findings.len(), 2);
    }

    #[test]
    fn register_only_read_by_later_arithmetic_is_still_a_candidate() {
        let text = "\t.section .text._Z3fooV,\"ax\",@progbits\n\
            \t\t/*0000*/ LDG.E.SYS R8, [R4] ;\n\
            \t\t/*0010*/ LDG.E.SYS R9, [R4+0x4] ;\n\
            \t\t/*0020*/ FADD R20, R8, R9 ;\n";
        let kernels = disasm::lex(text);
        let findings = detect(&kernels);
        let kernel_findings = findings.get("_Z3fooV").unwrap();
        assert_eq!(kernel_findings.len(), 2);
        assert!(kernel_findings[0].spatial_locality);
    }
}
