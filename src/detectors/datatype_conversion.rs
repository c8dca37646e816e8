//! Datatype-Conversion Detector (spec §4.7.1).

use indexmap::IndexMap;
use serde::Serialize;

use super::{Located, Severity};
use crate::instruction::{Category, PcOffset};
use crate::lexer::disasm::KernelDisassembly;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConversionCategory {
    I2F,
    F2I,
    F2F,
}

const CATEGORIES: [(&str, ConversionCategory); 3] = [
    ("I2F", ConversionCategory::I2F),
    ("F2I", ConversionCategory::F2I),
    ("F2F", ConversionCategory::F2F),
];

#[derive(Debug, Clone, Serialize)]
pub struct ConversionFinding {
    #[serde(skip)]
    pub kernel: String,
    pub category: ConversionCategory,
    #[serde(rename = "line")]
    pub source_line: u32,
    #[serde(rename = "pc")]
    pub pc_offset: PcOffset,
    pub severity: Severity,
}

impl Located for ConversionFinding {
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

/// For each instruction whose mnemonic contains `I2F`, `F2I`, or `F2F`,
/// emit a finding. Categories are disjoint substrings, so the listed order
/// only matters as a defensive tie-break (spec §4.7.1).
pub fn detect(kernels: &IndexMap<String, KernelDisassembly>) -> IndexMap<String, Vec<ConversionFinding>> {
    let mut out = IndexMap::new();
    for (kernel_name, kernel) in kernels {
        if kernel_name.is_empty() {
            continue;
        }
        let mut findings = Vec::new();
        for inst in &kernel.instructions {
            if !inst.category.contains(Category::CONVERSION) {
                continue;
            }
            if let Some(&(_, category)) = CATEGORIES.iter().find(|(needle, _)| inst.mnemonic.contains(needle)) {
                findings.push(ConversionFinding {
                    kernel: kernel_name.clone(),
                    category,
                    source_line: inst.source_line,
                    pc_offset: inst.pc_offset,
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
