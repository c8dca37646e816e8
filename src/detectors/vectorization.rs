//! Vectorization-candidate Detector (spec §4.7.9).

use indexmap::IndexMap;
use serde::Serialize;

use super::{classify_width, parse_ldg_operand, Located, Severity, VecWidth};
use crate::instruction::{Category, PcOffset};
use crate::lexer::disasm::KernelDisassembly;

#[derive(Debug, Clone, Serialize)]
pub struct VectorizationFinding {
    #[serde(skip)]
    pub kernel: String,
    pub base_register: String,
    pub register_load_type: VecWidth,
    pub adjacent_memory_accesses: u32,
    #[serde(rename = "line")]
    pub source_line: u32,
    #[serde(rename = "pc")]
    pub pc_offset: PcOffset,
    pub severity: Severity,
}

impl Located for VectorizationFinding {
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
        Some(&self.base_register)
    }
}

struct LoadRecord {
    base_register: String,
    offset: i64,
    width: VecWidth,
    source_line: u32,
    pc_offset: PcOffset,
}

/// Groups scalar (32-bit) `LDG`s that share a source line and base register:
/// unrolled scalar loads off the same base register and line are candidates
/// for a single vector (`.64`/`.128`) load (spec §4.7.9).
pub fn detect(kernels: &IndexMap<String, KernelDisassembly>) -> IndexMap<String, Vec<VectorizationFinding>> {
    let mut out = IndexMap::new();
    for (kernel_name, kernel) in kernels {
        if kernel_name.is_empty() {
            continue;
        }

        let mut loads: Vec<LoadRecord> = Vec::new();
        for inst in &kernel.instructions {
            if !inst.category.contains(Category::MEMORY_LOAD) {
                continue;
            }
            if !inst.mnemonic.contains("LDG.") {
                continue;
            }
            let operand_text = inst
                .raw_text
                .strip_prefix(inst.mnemonic.as_str())
                .unwrap_or(inst.raw_text.as_str());
            let Some(op) = parse_ldg_operand(operand_text) else {
                continue;
            };
            loads.push(LoadRecord {
                base_register: op.base_register,
                offset: op.offset,
                width: classify_width(&inst.mnemonic),
                source_line: inst.source_line,
                pc_offset: inst.pc_offset,
            });
        }

        let mut groups: IndexMap<(u32, String), Vec<&LoadRecord>> = IndexMap::new();
        for load in &loads {
            groups
                .entry((load.source_line, load.base_register.clone()))
                .or_default()
                .push(load);
        }

        let mut findings = Vec::new();
        for ((source_line, base_register), group) in &groups {
            if !group.iter().all(|l| l.width == VecWidth::Vec32) {
                continue;
            }
            let non_zero_unrolls = group.iter().filter(|l| l.offset != 0).count() as u32;
            if non_zero_unrolls == 0 {
                continue;
            }
            let first = group.iter().min_by_key(|l| l.pc_offset).unwrap();
            findings.push(VectorizationFinding {
                kernel: kernel_name.clone(),
                base_register: base_register.clone(),
                register_load_type: VecWidth::Vec32,
                adjacent_memory_accesses: non_zero_unrolls,
                source_line: *source_line,
                pc_offset: first.pc_offset,
                severity: Severity::Warning,
            });
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
    fn unrolled_scalar_loads_on_one_line_are_a_candidate() {
        let text = "\t.section .text._Z3fooV,\"ax\",@progbits\n\
            \t\t// line 20\n\
            \t\t/*0000*/ LDG.E.SYS R8, [R4] ;\n\
            \t\t// line 20\n\
            \t\t/*0010*/ LDG.E.SYS R9, [R4+0x4] ;\n";
        let kernels = disasm::lex(text);
        let findings = detect(&kernels);
        let kernel_findings = findings.get("_Z3fooV").unwrap();
        assert_eq!(kernel_findings.len(), 1);
        assert_eq!(kernel_findings[0].adjacent_memory_accesses, 1);
        assert_eq!(kernel_findings[0].register_load_type, VecWidth::Vec32);
    }

    #[test]
    fn vector_width_loads_are_not_a_candidate() {
        let text = "\t.section .text._Z3fooV,\"ax\",@progbits\n\
            \t\t// line 20\n\
            \t\t/*0000*/ LDG.E.128.SYS R8, [R4] ;\n\
            \t\t// line 20\n\
            \t\t/*0010*/ LDG.E.128.SYS R12, [R4+0x10] ;\n";
        let kernels = disasm::lex(text);
        assert!(detect(&kernels).get("_Z3fooV").is_none());
    }

    #[test]
    fn single_load_with_no_unroll_is_not_a_candidate() {
        let text = "\t.section .text._Z3fooV,\"ax\",@progbits\n\
            \t\t// line 20\n\
            \t\t/*0000*/ LDG.E.SYS R8, [R4] ;\n";
        let kernels = disasm::lex(text);
        assert!(detect(&kernels).get("_Z3fooV").is_none());
    }
}
