//! Shared-memory-candidate Detector (spec §4.7.7).

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::Serialize;

use super::{contains_arithmetic, line_in_any_region, loop_regions, parse_ldg_operand, Located, Severity};
use crate::instruction::{Category, PcOffset};
use crate::lexer::disasm::KernelDisassembly;

#[derive(Debug, Clone, Serialize)]
pub struct SharedMemoryFinding {
    #[serde(skip)]
    pub kernel: String,
    pub register: String,
    pub loads: u32,
    pub uses: u32,
    #[serde(rename = "line")]
    pub source_line: u32,
    #[serde(rename = "pc")]
    pub pc_offset: PcOffset,
    /// Instruction-count gap (pc-offset delta / 16) to a later `STS` of the
    /// same register, if one already exists (spec §4.7.7).
    pub already_uses_shared_memory_gap: Option<u32>,
    pub uses_async_copy: bool,
    pub severity: Severity,
}

impl Located for SharedMemoryFinding {
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

struct RegisterCounters {
    loads: u32,
    uses: u32,
    first_line: u32,
    first_pc: PcOffset,
    in_loop: bool,
    already_uses_shared_memory_gap: Option<u32>,
    uses_async_copy: bool,
}

pub fn detect(kernels: &IndexMap<String, KernelDisassembly>) -> IndexMap<String, Vec<SharedMemoryFinding>> {
    let mut out = IndexMap::new();
    for (kernel_name, kernel) in kernels {
        if kernel_name.is_empty() {
            continue;
        }
        let regions = loop_regions(kernel);
        let mut counters: FxHashMap<String, RegisterCounters> = FxHashMap::default();

        for (idx, inst) in kernel.instructions.iter().enumerate() {
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

            if inst.mnemonic.contains("LDGSTS") {
                if let Some(op) = parse_ldg_operand(operand_text) {
                    let entry = counters
                        .entry(op.written_register)
                        .or_insert_with(|| RegisterCounters {
                            loads: 0,
                            uses: 0,
                            first_line: inst.source_line,
                            first_pc: inst.pc_offset,
                            in_loop: line_in_any_region(inst.source_line, &regions),
                            already_uses_shared_memory_gap: None,
                            uses_async_copy: false,
                        });
                    entry.uses_async_copy = true;
                }
                continue;
            }

            if inst.mnemonic.contains("LDG.") {
                let Some(op) = parse_ldg_operand(operand_text) else {
                    continue;
                };
                let later_sts = kernel.instructions[idx + 1..]
                    .iter()
                    .find(|later| later.mnemonic.contains("STS") && later.raw_text.contains(op.written_register.as_str()));
                let gap = later_sts.map(|sts| {
                    (sts.pc_offset.value() as i64 - inst.pc_offset.value() as i64).unsigned_abs() as u32 / 16
                });

                let entry = counters
                    .entry(op.written_register)
                    .or_insert_with(|| RegisterCounters {
                        loads: 0,
                        uses: 0,
                        first_line: inst.source_line,
                        first_pc: inst.pc_offset,
                        in_loop: line_in_any_region(inst.source_line, &regions),
                        already_uses_shared_memory_gap: None,
                        uses_async_copy: false,
                    });
                entry.loads += 1;
                if entry.already_uses_shared_memory_gap.is_none() {
                    entry.already_uses_shared_memory_gap = gap;
                }
                continue;
            }

            if contains_arithmetic(&inst.mnemonic) {
                for (register, counters) in counters.iter_mut() {
                    if inst.raw_text.contains(register.as_str()) {
                        counters.uses += 1;
                    }
                }
            }
        }

        let mut findings = Vec::new();
        for (register, c) in &counters {
            if c.loads > 0 && c.uses > 1 && c.uses > c.loads && c.in_loop {
                findings.push(SharedMemoryFinding {
                    kernel: kernel_name.clone(),
                    register: register.clone(),
                    loads: c.loads,
                    uses: c.uses,
                    source_line: c.first_line,
                    pc_offset: c.first_pc,
                    already_uses_shared_memory_gap: c.already_uses_shared_memory_gap,
                    uses_async_copy: c.uses_async_copy,
                    severity: Severity::Warning,
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
    fn loop_body_reload_with_multiple_uses_is_a_candidate() {
        let text = "\t.section .text._Z3fooV,\"ax\",@progbits\n\
            .L_x_1:\n\
            \t\t// line 10\n\
            \t\t/*0000*/ LDG.E.SYS R8, [R4] ;\n\
            \t\t// line 11\n\
            \t\t/*0010*/ FADD R9, R8, R8 ;\n\
            \t\t// line 12\n\
            \t\t/*0020*/ FMUL R10, R8, R8 ;\n\
            \t\t// line 13\n\
            \t\t/*0030*/ @P0 BRA `(.L_x_1) ;\n";
        let kernels = disasm::lex(text);
        let findings = detect(&kernels);
        let kernel_findings = findings.get("_Z3fooV").unwrap();
        assert_eq!(kernel_findings.len(), 1);
        assert_eq!(kernel_findings[0].register, "R8");
        assert_eq!(kernel_findings[0].loads, 1);
        assert_eq!(kernel_findings[0].uses, 2);
    }

    #[test]
    fn outside_a_loop_is_not_a_candidate() {
        let text = "\t.section .text._Z3fooV,\"ax\",@progbits\n\
            \t\t/*0000*/ LDG.E.SYS R8, [R4] ;\n\
            \t\t/*0010*/ FADD R9, R8, R8 ;\n\
            \t\t/*0020*/ FMUL R10, R8, R8 ;\n";
        let kernels = disasm::lex(text);
        assert!(detect(&kernels).get("_Z3fooV").is_none());
    }
}
