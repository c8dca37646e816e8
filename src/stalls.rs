//! Stall-name normalization (spec §4.1) and the PC-sampling report loader
//! (spec §4.5), joined against the disassembly's instruction stream.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::instruction::PcOffset;
use crate::lexer::disasm::KernelDisassembly;

/// The 18 canonical stall tags a raw PC-sampling stall name collapses to.
pub const CANONICAL_TAGS: [&str; 18] = [
    "stalled_barrier",
    "stalled_branch",
    "stalled_dispatch",
    "stalled_drain",
    "stalled_imc_miss",
    "stalled_lg_throttle",
    "stalled_long_scoreboard",
    "stalled_math_pipe_throttle",
    "stalled_membar",
    "stalled_mio_throttle",
    "stalled_misc",
    "stalled_no_instructions",
    "stalled_not_selected",
    "stalled_selected",
    "stalled_short_scoreboard",
    "stalled_sleeping",
    "stalled_tex_throttle",
    "stalled_wait",
];

/// Sentinel returned for a raw stall identifier that matches none of the 18
/// canonical tags (spec §4.1: "unknown input maps to a sentinel").
pub const UNKNOWN: &str = "STALL UNKNOWN";

/// Collapses a raw stall-counter identifier to its canonical tag.
///
/// Each canonical tag has an "issued" raw form (the tag itself) and a
/// "not-issued" raw form (the tag with a `_not_issued` suffix) -- the same
/// underlying reason reported from two sides of the issue/stall boundary.
/// Already-canonical input is returned unchanged (spec §8 idempotence).
pub fn normalize(raw: &str) -> &'static str {
    let candidate = raw.strip_suffix("_not_issued").unwrap_or(raw);
    CANONICAL_TAGS
        .iter()
        .find(|&&tag| tag == candidate)
        .copied()
        .unwrap_or(UNKNOWN)
}

/// One row of the PC-sampling report, before being joined to an instruction.
#[derive(Debug, Clone)]
pub struct RawStallRow {
    pub function_name: String,
    pub pc_offset: PcOffset,
    pub report_line_number: u32,
    pub pairs: Vec<(String, u32)>,
}

fn parse_flexible_u32(text: &str) -> Option<u32> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    text.parse::<u32>()
        .ok()
        .or_else(|| u32::from_str_radix(text, 16).ok())
}

fn parse_row(line: &str) -> Option<RawStallRow> {
    let tokens: Vec<&str> = line.split(',').map(str::trim).collect();
    let mut function_name = None;
    let mut pc_offset = None;
    let mut report_line_number = 0u32;
    let mut pairs = Vec::new();

    let mut idx = 0;
    while idx < tokens.len() {
        let tok = tokens[idx];
        if let Some(v) = tok.strip_prefix("functionName:") {
            function_name = Some(v.trim().to_string());
        } else if let Some(v) = tok.strip_prefix("pcOffset:") {
            pc_offset = parse_flexible_u32(v.trim());
        } else if let Some(v) = tok.strip_prefix("lineNumber:") {
            report_line_number = v.trim().parse().unwrap_or(0);
        } else if let Some(v) = tok.strip_prefix("stallReasonCount:") {
            let count: usize = match v.trim().parse() {
                Ok(c) => c,
                Err(_) => {
                    log::debug!("malformed stallReasonCount in row: {line}");
                    0
                }
            };
            for _ in 0..count {
                idx += 1;
                let Some(pair_tok) = tokens.get(idx) else {
                    break;
                };
                if let Some((name, count_str)) = pair_tok.split_once(':') {
                    if let Ok(count) = count_str.trim().parse::<u32>() {
                        pairs.push((name.trim().to_string(), count));
                    }
                }
            }
        }
        idx += 1;
    }

    let function_name = function_name?;
    if function_name.is_empty() {
        return None;
    }
    let pc_offset = PcOffset(pc_offset?);
    Some(RawStallRow {
        function_name,
        pc_offset,
        report_line_number,
        pairs,
    })
}

/// Parses the PC-sampling report. The first two rows are preamble.
pub fn parse_rows(text: &str) -> Vec<RawStallRow> {
    let mut rows = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if i < 2 {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        match parse_row(line) {
            Some(row) => rows.push(row),
            None => log::debug!("skipping malformed stall-sample row: {line}"),
        }
    }
    rows
}

/// A stall sample joined to a specific instruction: the raw (name, count)
/// pairs are preserved unchanged (spec §3, §4.5).
#[derive(Debug, Clone)]
pub struct StallSample {
    pub kernel: String,
    pub pc_offset: PcOffset,
    pub source_line: u32,
    pub instruction_text: String,
    pub raw_counts: Vec<(String, u32)>,
}

/// Joins PC-sampling rows against the disassembly: for each instruction in
/// each kernel, any row whose (functionName, pcOffset) matches becomes a
/// [`StallSample`] annotated with that instruction's source line (spec
/// §4.5). Uses an index map keyed by (kernel, pc-offset) for O(1) lookups,
/// per the Design Notes (spec §9).
pub fn build_samples(
    rows: &[RawStallRow],
    kernels: &IndexMap<String, KernelDisassembly>,
) -> IndexMap<String, Vec<StallSample>> {
    let mut index: FxHashMap<(&str, u32), Vec<&RawStallRow>> = FxHashMap::default();
    for row in rows {
        index
            .entry((row.function_name.as_str(), row.pc_offset.value()))
            .or_default()
            .push(row);
    }

    let mut out = IndexMap::new();
    for (kernel_name, kernel) in kernels {
        if kernel_name.is_empty() {
            continue;
        }
        let mut samples = Vec::new();
        for inst in &kernel.instructions {
            if let Some(matches) = index.get(&(kernel_name.as_str(), inst.pc_offset.value())) {
                for row in matches {
                    samples.push(StallSample {
                        kernel: kernel_name.clone(),
                        pc_offset: inst.pc_offset,
                        source_line: inst.source_line,
                        instruction_text: inst.raw_text.clone(),
                        raw_counts: row.pairs.clone(),
                    });
                }
            }
        }
        if !samples.is_empty() {
            out.insert(kernel_name.clone(), samples);
        }
    }
    out
}

/// Collapses a set of raw (name, count) pairs into canonical-tag
/// percentages (spec §4.8, §8: "sums to 100 ± 0.01 when total samples > 0").
pub fn canonical_percentages(pairs: &[(String, u32)]) -> IndexMap<String, f64> {
    let mut totals: IndexMap<&'static str, u64> = IndexMap::new();
    let mut grand_total: u64 = 0;
    for (name, count) in pairs {
        let tag = normalize(name);
        *totals.entry(tag).or_insert(0) += *count as u64;
        grand_total += *count as u64;
    }
    let mut out = IndexMap::new();
    if grand_total == 0 {
        return out;
    }
    for (tag, count) in totals {
        out.insert(tag.to_string(), 100.0 * count as f64 / grand_total as f64);
    }
    out
}
