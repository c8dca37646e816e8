//! Register-Spill Detector (spec §4.7.4), with last-compute tracking: the
//! arithmetic instruction that most recently wrote a register before it was
//! first seen in a spill is captured in each spill finding.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::HashSet;

use super::{contains_arithmetic, register_tokens, Located, Severity};
use crate::instruction::{Category, PcOffset};
use crate::lexer::disasm::KernelDisassembly;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpKind {
    Load,
    Store,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastCompute {
    pub instruction: String,
    pub line: u32,
    pub pc: PcOffset,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpillFinding {
    #[serde(skip)]
    pub kernel: String,
    pub register: String,
    #[serde(rename = "line")]
    pub source_line: u32,
    #[serde(rename = "pc")]
    pub pc_offset: PcOffset,
    pub operation: OpKind,
    pub previous_compute_instruction: Option<LastCompute>,
    pub severity: Severity,
}

impl Located for SpillFinding {
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

/// Extracts the base register from `[Base+0xNN]`/`[Base+-0xNN]` syntax, or
/// (absent an offset) the last register operand for a store / the first
/// register operand for a load (spec §4.7.4).
fn extract_spill_register(op_kind: OpKind, operand_text: &str) -> Option<String> {
    if let Some(idx) = operand_text.find("+0x").or_else(|| operand_text.find("+-0x")) {
        let before = &operand_text[..idx];
        let base_start = before.rfind('[')? + 1;
        return Some(before[base_start..].trim().to_string());
    }
    let tokens = register_tokens(operand_text);
    match op_kind {
        OpKind::Store => tokens.last().map(|s| s.to_string()),
        OpKind::Load => tokens.first().map(|s| s.to_string()),
    }
}

fn first_register_operand(operand_text: &str) -> Option<String> {
    register_tokens(operand_text).first().map(|s| s.to_string())
}

pub fn detect(kernels: &IndexMap<String, KernelDisassembly>) -> IndexMap<String, Vec<SpillFinding>> {
    let mut out = IndexMap::new();
    for (kernel_name, kernel) in kernels {
        if kernel_name.is_empty() {
            continue;
        }
        let mut last_compute: FxHashMap<String, LastCompute> = FxHashMap::default();
        let mut spilled: HashSet<String> = HashSet::new();
        let mut findings = Vec::new();

        for inst in &kernel.instructions {
            if !inst
                .category
                .intersects(Category::MEMORY_LOAD | Category::MEMORY_STORE | Category::ARITHMETIC)
            {
                continue;
            }
            let operand_text = inst
                .raw_text
                .strip_prefix(inst.mnemonic.as_str())
                .unwrap_or(inst.raw_text.as_str());

            if inst.mnemonic == "STL" || inst.mnemonic == "LDL" {
                let op_kind = if inst.mnemonic == "STL" {
                    OpKind::Store
                } else {
                    OpKind::Load
                };
                if let Some(register) = extract_spill_register(op_kind, operand_text) {
                    spilled.insert(register.clone());
                    findings.push(SpillFinding {
                        kernel: kernel_name.clone(),
                        previous_compute_instruction: last_compute.get(&register).cloned(),
                        register,
                        source_line: inst.source_line,
                        pc_offset: inst.pc_offset,
                        operation: op_kind,
                        severity: Severity::Warning,
                    });
                }
                continue;
            }

            if contains_arithmetic(&inst.mnemonic) {
                if let Some(written) = first_register_operand(operand_text) {
                    if !spilled.contains(&written) {
                        last_compute.insert(
                            written,
                            LastCompute {
                                instruction: inst.mnemonic.clone(),
                                line: inst.source_line,
                                pc: inst.pc_offset,
                            },
                        );
                    }
                }
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
    fn spill_captures_last_compute() {
        // spec §8 scenario 3.
        let text = "\t.section .text._Z3fooV,\"ax\",@progbits\n\
            \t\t// line 12\n\
            \t\t/*0020*/ IMAD R5, R3, 0x1, R7 ;\n\
            \t\t// line 15\n\
            \t\t/*00a0*/ STL [R2], R5 ;\n";
        let kernels = disasm::lex(text);
        let findings = detect(&kernels);
        let kernel_findings = findings.get("_Z3fooV").unwrap();
        assert_eq!(kernel_findings.len(), 1);
        let finding = &kernel_findings[0];
        assert_eq!(finding.register, "R5");
        assert_eq!(finding.source_line, 15);
        assert_eq!(finding.pc_offset.hex(), "00a0");
        assert_eq!(finding.operation, OpKind::Store);
        let last_compute = finding.previous_compute_instruction.as_ref().unwrap();
        assert_eq!(last_compute.instruction, "IMAD");
        assert_eq!(last_compute.line, 12);
        assert_eq!(last_compute.pc.hex(), "0020");
    }

    #[test]
    fn arithmetic_after_a_spill_does_not_overwrite_last_compute() {
        let text = "\t.section .text._Z3fooV,\"ax\",@progbits\n\
            \t\t// line 1\n\
            \t\t/*0000*/ IMAD R5, R1, R2, R3 ;\n\
            \t\t// line 2\n\
            \t\t/*0010*/ STL [R4], R5 ;\n\
            \t\t// line 3\n\
            \t\t/*0020*/ FADD R5, R6, R7 ;\n\
            \t\t// line 4\n\
            \t\t/*0030*/ STL [R8], R5 ;\n";
        let kernels = disasm::lex(text);
        let findings = detect(&kernels);
        let kernel_findings = findings.get("_Z3fooV").unwrap();
        assert_eq!(kernel_findings.len(), 2);
        let second = &kernel_findings[1];
        assert_eq!(
            second.previous_compute_instruction.as_ref().unwrap().line,
            1
        );
    }
}
