//! Live-Register Indexer (spec §4.6).
//!
//! Builds a per-kernel, per-pc-offset record of concurrently-live register
//! counts from the `// | g | p | u |` annotations the disassembly lexer
//! already captured inline, plus the delta from the previous instruction in
//! kernel order (spec §3: the first instruction's delta equals its own
//! sum).

use indexmap::IndexMap;
use serde::Serialize;

use crate::instruction::PcOffset;
use crate::lexer::disasm::KernelDisassembly;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LiveRegisterRecord {
    pub general: u32,
    pub predicate: u32,
    pub uniform_general: u32,
    pub delta_from_previous: i64,
}

impl LiveRegisterRecord {
    pub fn sum(&self) -> u32 {
        self.general + self.predicate + self.uniform_general
    }
}

pub type LiveRegisterTable = IndexMap<String, IndexMap<PcOffset, LiveRegisterRecord>>;

/// Builds the live-register index from the disassembly's per-kernel
/// instruction streams (spec §4.6).
pub fn build(kernels: &IndexMap<String, KernelDisassembly>) -> LiveRegisterTable {
    let mut out = IndexMap::new();
    for (kernel_name, kernel) in kernels {
        if kernel_name.is_empty() {
            continue;
        }
        let mut per_pc = IndexMap::new();
        let mut previous_sum: Option<i64> = None;
        for inst in &kernel.instructions {
            let counts = inst.live_registers.unwrap_or_default();
            let sum = counts.sum() as i64;
            let delta = match previous_sum {
                Some(prev) => sum - prev,
                None => sum,
            };
            previous_sum = Some(sum);
            per_pc.insert(
                inst.pc_offset,
                LiveRegisterRecord {
                    general: counts.general,
                    predicate: counts.predicate,
                    uniform_general: counts.uniform_general,
                    delta_from_previous: delta,
                },
            );
        }
        out.insert(kernel_name.clone(), per_pc);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::disasm;

    #[test]
    fn first_instruction_delta_equals_its_own_sum() {
        let text = "\t.section .text._Z3fooV,\"ax\",@progbits\n\
            \t\t/*0000*/ IMAD R1, R2, R3, R4 ; // | 5 | 1 | 2 |\n\
            \t\t/*0010*/ IMAD R1, R2, R3, R4 ; // | 9 | 1 | 2 |\n";
        let kernels = disasm::lex(text);
        let table = build(&kernels);
        let per_pc = table.get("_Z3fooV").unwrap();

        let first = per_pc.get(&PcOffset::from_hex("0000").unwrap()).unwrap();
        assert_eq!(first.delta_from_previous, 8);

        let second = per_pc.get(&PcOffset::from_hex("0010").unwrap()).unwrap();
        assert_eq!(second.delta_from_previous, 4);
    }
}
