//! Read-only/restrict-candidate Detector (spec §4.7.6).

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::Serialize;

use super::{destination_register, parse_ldg_operand, Located, Severity, WRITE_MNEMONICS};
use crate::instruction::{Category, PcOffset};
use crate::lexer::disasm::KernelDisassembly;

#[derive(Debug, Clone, Serialize)]
pub struct RestrictFinding {
    #[serde(skip)]
    pub kernel: String,
    pub register: String,
    #[serde(rename = "line")]
    pub source_line: u32,
    #[serde(rename = "pc")]
    pub pc_offset: PcOffset,
    pub already_read_only: bool,
    pub severity: Severity,
}

impl Located for RestrictFinding {
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

struct FirstLoad {
    index: usize,
    source_line: u32,
    pc_offset: PcOffset,
    already_read_only: bool,
}

pub fn detect(kernels: &IndexMap<String, KernelDisassembly>) -> IndexMap<String, Vec<RestrictFinding>> {
    let mut out = IndexMap::new();
    for (kernel_name, kernel) in kernels {
        if kernel_name.is_empty() {
            continue;
        }

        // Only the first LDG. for a register is recorded; later loads of
        // the same register are ignored (spec §4.7.6).
        let mut first_loads: FxHashMap<String, FirstLoad> = FxHashMap::default();
        for (idx, inst) in kernel.instructions.iter().enumerate() {
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
            first_loads.entry(op.written_register).or_insert(FirstLoad {
                index: idx,
                source_line: inst.source_line,
                pc_offset: inst.pc_offset,
                already_read_only: inst.mnemonic.contains(".CI") || inst.mnemonic.contains(".CONSTANT"),
            });
        }

        let mut findings = Vec::new();
        for (register, load) in &first_loads {
            let written_later = kernel.instructions[load.index + 1..].iter().any(|inst| {
                inst.category.intersects(Category::ARITHMETIC | Category::ATOMIC)
                    && WRITE_MNEMONICS.iter().any(|m| inst.mnemonic.contains(m))
                    && destination_register(&inst.mnemonic, &inst.raw_text).as_deref() == Some(register.as_str())
            });
            if written_later {
                continue;
            }
            findings.push(RestrictFinding {
                kernel: kernel_name.clone(),
                register: register.clone(),
                source_line: load.source_line,
                pc_offset: load.pc_offset,
                already_read_only: load.already_read_only,
                severity: if load.already_read_only {
                    Severity::Info
                } else {
                    Severity::Warning
                },
            });
        }

        findings.sort_by_key(|f| (f.source_line, f.pc_offset));
        if !findings.is_empty() {
            out.insert(kernel_name.clone(), findings);
        }
    }
    out
}
