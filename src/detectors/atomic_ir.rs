//! Atomic-operation Detector (spec §4.7.3), run over the IR stream rather
//! than the disassembly: there is no pc-offset concept in PTX-like IR, so
//! this detector's findings join against per-kernel metrics only, not
//! against stall samples or live-register pressure (spec §4.8).

use indexmap::IndexMap;
use serde::Serialize;

use super::Severity;
use crate::lexer::ir::KernelIr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AtomicKind {
    Global,
    Shared,
}

#[derive(Debug, Clone, Serialize)]
pub struct AtomicFinding {
    #[serde(skip)]
    pub kernel: String,
    pub kind: AtomicKind,
    #[serde(rename = "line")]
    pub source_line: u32,
    pub ir_line: u32,
    pub inside_loop: bool,
    pub severity: Severity,
}

/// The IR-side application of the §4.7.3 rule, unified with
/// `detectors::loop_regions`'s disassembly version per spec §9 Open
/// Question (c): a `bra` to a label whose first *user-source* line
/// differs from the branch's own user-source line, and which was defined
/// at or before the branch in IR order, marks the user-source-line span
/// between them as a loop body. Atomics are then tested against their
/// user-source line, not the raw IR line.
fn loop_regions(kernel: &KernelIr) -> Vec<(u32, u32)> {
    let mut regions = Vec::new();
    for inst in &kernel.instructions {
        let Some(target_name) = crate::lexer::ir::branch_target(&inst.text) else {
            continue;
        };
        let Some(label) = kernel.labels.get(&target_name) else {
            continue;
        };
        if label.ir_line <= inst.ir_line && label.user_source_line != inst.user_source_line {
            let (start, end) = if label.user_source_line <= inst.user_source_line {
                (label.user_source_line, inst.user_source_line)
            } else {
                (inst.user_source_line, label.user_source_line)
            };
            regions.push((start, end));
        }
    }
    regions
}

fn in_any_region(user_source_line: u32, regions: &[(u32, u32)]) -> bool {
    regions
        .iter()
        .any(|&(start, end)| user_source_line >= start && user_source_line <= end)
}

pub fn detect(kernels: &IndexMap<String, KernelIr>) -> IndexMap<String, Vec<AtomicFinding>> {
    let mut out = IndexMap::new();
    for (kernel_name, kernel) in kernels {
        if kernel_name.is_empty() {
            continue;
        }
        let regions = loop_regions(kernel);
        let mut findings = Vec::new();
        for inst in &kernel.instructions {
            let kind = if inst.text.contains("atom.global.add") {
                Some(AtomicKind::Global)
            } else if inst.text.contains("atom.shared.add") {
                Some(AtomicKind::Shared)
            } else {
                None
            };
            let Some(kind) = kind else {
                continue;
            };
            let inside_loop = in_any_region(inst.user_source_line, &regions);
            findings.push(AtomicFinding {
                kernel: kernel_name.clone(),
                kind,
                source_line: inst.user_source_line,
                ir_line: inst.ir_line,
                inside_loop,
                severity: if inside_loop { Severity::Warning } else { Severity::Info },
            });
        }
        findings.sort_by_key(|f| f.ir_line);
        if !findings.is_empty() {
            out.insert(kernel_name.clone(), findings);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::ir;

    #[test]
    fn global_atomic_inside_a_loop_is_a_warning() {
        let text = "\
.visible .entry _Z6kernelv{
.loc 1 10 5, inlined_at 1 10 5
$L__BB0_1:
.loc 1 2 3, inlined_at 1 11 3
atom.global.add.f32 [%rd1], %f1;
.loc 1 2 3, inlined_at 1 12 3
bra $L__BB0_1;
}
";
        let kernels = ir::lex(text);
        let findings = detect(&kernels);
        let kernel_findings = findings.get("_Z6kernelv").unwrap();
        assert_eq!(kernel_findings.len(), 1);
        assert_eq!(kernel_findings[0].kind, AtomicKind::Global);
        assert!(kernel_findings[0].inside_loop);
        assert_eq!(kernel_findings[0].severity, Severity::Warning);
    }

    #[test]
    fn shared_atomic_outside_any_loop_is_info() {
        let text = "\
.visible .entry _Z6kernelv{
.loc 1 2 3
atom.shared.add.f32 [%rd1], %f1;
}
";
        let kernels = ir::lex(text);
        let findings = detect(&kernels);
        let kernel_findings = findings.get("_Z6kernelv").unwrap();
        assert_eq!(kernel_findings.len(), 1);
        assert_eq!(kernel_findings[0].kind, AtomicKind::Shared);
        assert!(!kernel_findings[0].inside_loop);
        assert_eq!(kernel_findings[0].severity, Severity::Info);
    }

    #[test]
    fn non_atomic_instructions_are_ignored() {
        let text = "\
.visible .entry _Z6kernelv{
.loc 1 2 3
add.f32 %f2, %f1, %f1;
}
";
        let kernels = ir::lex(text);
        assert!(detect(&kernels).is_empty());
    }
}
