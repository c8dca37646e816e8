//! Warp-Divergence Detector (spec §4.7.5).

use indexmap::IndexMap;
use serde::Serialize;

use super::{extract_branch_target, Located, Severity};
use crate::instruction::{Category, PcOffset};
use crate::lexer::disasm::KernelDisassembly;

#[derive(Debug, Clone, Serialize)]
pub struct DivergenceFinding {
    #[serde(skip)]
    pub kernel: String,
    #[serde(rename = "line")]
    pub source_line: u32,
    #[serde(rename = "pc")]
    pub pc_offset: PcOffset,
    pub target_label: String,
    pub target_line: u32,
    pub target_pc: PcOffset,
    pub severity: Severity,
}

impl Located for DivergenceFinding {
    fn kernel(&self) -> &str {
        &self.kernel
    }
    fn source_line(&self) -> u32 {
        self.source_line
    }
    fn pc_offset(&self) -> PcOffset {
        self.pc_offset
    }
}

/// For each instruction containing ` BRA `, resolves the target label and
/// emits a finding only when the branch's source line differs from the
/// target's (spec §4.7.5).
pub fn detect(kernels: &IndexMap<String, KernelDisassembly>) -> IndexMap<String, Vec<DivergenceFinding>> {
    let mut out = IndexMap::new();
    for (kernel_name, kernel) in kernels {
        if kernel_name.is_empty() {
            continue;
        }
        let mut findings = Vec::new();
        for inst in &kernel.instructions {
            if !inst.category.contains(Category::BRANCH) {
                continue;
            }
            if !inst.raw_text.contains(" BRA ") {
                continue;
            }
            let Some(target_name) = extract_branch_target(&inst.raw_text) else {
                continue;
            };
            let Some(label) = kernel.labels.get(&target_name) else {
                continue;
            };
            if label.source_line == inst.source_line {
                continue;
            }
            findings.push(DivergenceFinding {
                kernel: kernel_name.clone(),
                source_line: inst.source_line,
                pc_offset: inst.pc_offset,
                target_label: target_name,
                target_line: label.source_line,
                target_pc: label.pc_offset,
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
