//! Metric Table Loader (spec §4.4) and the ~50-field metric catalog
//! (spec §6.2).
//!
//! The report is a locale-variant CSV: the first three rows are preamble,
//! values are quoted, and numbers use `.` as a thousands separator with
//! `,` as the decimal point. Column 1 is a row id, column 9 the kernel
//! name, column 25 the metric name, column 29 its value (all 1-indexed,
//! matching the report's own column numbering).

use indexmap::IndexMap;
use serde::Serialize;

const KERNEL_NAME_COLUMN: usize = 9;
const METRIC_NAME_COLUMN: usize = 25;
const METRIC_VALUE_COLUMN: usize = 29;

/// A flat, all-defaulted-to-zero record of the named metrics this system
/// reads per kernel (spec §3, §6.2). Every field is a double; a metric
/// absent from the report for a given kernel stays at its default.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricRecord {
    // Warp-issue stall percentages (spec §6.2, exact names).
    pub stalled_barrier_per_warp_active: f64,
    pub stalled_membar_per_warp_active: f64,
    pub stalled_short_scoreboard_per_warp_active: f64,
    pub stalled_wait_per_warp_active: f64,
    pub stalled_imc_miss_per_warp_active: f64,
    pub stalled_long_scoreboard_per_warp_active: f64,
    pub stalled_lg_throttle_per_warp_active: f64,
    pub stalled_mio_throttle_per_warp_active: f64,
    pub stalled_tex_throttle_per_warp_active: f64,

    // Branch divergence.
    pub sass_branch_targets: f64,
    pub sass_branch_targets_threads_divergent: f64,

    // Occupancy.
    pub sm_warps_active: f64,
    pub smsp_warps_active: f64,

    // L1 <-> global/local memory sectors and hit rates, load + store.
    pub sectors_global_ld: f64,
    pub sectors_global_ld_hit_rate: f64,
    pub sectors_global_st: f64,
    pub sectors_global_st_hit_rate: f64,
    pub sectors_local_ld: f64,
    pub sectors_local_ld_hit_rate: f64,
    pub sectors_local_st: f64,
    pub sectors_local_st_hit_rate: f64,

    // L1 <-> global atomics/reductions.
    pub sectors_global_atom: f64,
    pub sectors_global_atom_hit_rate: f64,
    pub sectors_global_red: f64,
    pub sectors_global_red_hit_rate: f64,

    // L1 <-> texture.
    pub sectors_texture: f64,
    pub sectors_texture_hit_rate: f64,

    // L2 sectors and hit rates.
    pub l2_sectors_read: f64,
    pub l2_sectors_read_hit_rate: f64,
    pub l2_sectors_write: f64,
    pub l2_sectors_write_hit_rate: f64,
    pub l2_sectors_atom: f64,
    pub l2_sectors_atom_hit_rate: f64,
    pub l2_sectors_red: f64,
    pub l2_sectors_red_hit_rate: f64,
    pub l2_sectors_texture: f64,
    pub l2_sectors_texture_hit_rate: f64,

    // Shared memory.
    pub shared_wavefronts_ld: f64,
    pub shared_wavefronts_st: f64,
    pub shared_inst_executed_ld: f64,
    pub shared_inst_executed_st: f64,
    pub shared_bank_conflicts_ld: f64,
    pub shared_bank_conflicts_st: f64,

    // Ideal-vs-actual sector pairs for coalescing excess.
    pub ideal_sectors_global_ld: f64,
    pub ideal_sectors_global_st: f64,

    // Instruction mix, used by a handful of detectors' metric subobject.
    pub inst_executed: f64,
    pub inst_executed_global_loads: f64,
    pub inst_executed_shared_loads: f64,
}

type Setter = fn(&mut MetricRecord, f64);

/// The metric-name -> field mapping. Each entry is a compiled-in constant,
/// mirroring the teacher's preference for fixed lookup tables over runtime
/// configuration wherever the catalog itself is fixed.
const CATALOG: &[(&str, Setter)] = &[
    (
        "smsp__warp_issue_stalled_barrier_per_warp_active",
        |m, v| m.stalled_barrier_per_warp_active = v,
    ),
    (
        "smsp__warp_issue_stalled_membar_per_warp_active",
        |m, v| m.stalled_membar_per_warp_active = v,
    ),
    (
        "smsp__warp_issue_stalled_short_scoreboard_per_warp_active",
        |m, v| m.stalled_short_scoreboard_per_warp_active = v,
    ),
    ("smsp__warp_issue_stalled_wait_per_warp_active", |m, v| {
        m.stalled_wait_per_warp_active = v
    }),
    (
        "smsp__warp_issue_stalled_imc_miss_per_warp_active",
        |m, v| m.stalled_imc_miss_per_warp_active = v,
    ),
    (
        "smsp__warp_issue_stalled_long_scoreboard_per_warp_active",
        |m, v| m.stalled_long_scoreboard_per_warp_active = v,
    ),
    (
        "smsp__warp_issue_stalled_lg_throttle_per_warp_active",
        |m, v| m.stalled_lg_throttle_per_warp_active = v,
    ),
    (
        "smsp__warp_issue_stalled_mio_throttle_per_warp_active",
        |m, v| m.stalled_mio_throttle_per_warp_active = v,
    ),
    (
        "smsp__warp_issue_stalled_tex_throttle_per_warp_active",
        |m, v| m.stalled_tex_throttle_per_warp_active = v,
    ),
    ("sm__sass_branch_targets", |m, v| m.sass_branch_targets = v),
    (
        "sm__sass_branch_targets_threads_divergent",
        |m, v| m.sass_branch_targets_threads_divergent = v,
    ),
    ("sm__warps_active", |m, v| m.sm_warps_active = v),
    ("smsp__warps_active", |m, v| m.smsp_warps_active = v),
    (
        "l1tex__t_sectors_pipe_lsu_mem_global_op_ld",
        |m, v| m.sectors_global_ld = v,
    ),
    (
        "l1tex__t_sectors_pipe_lsu_mem_global_op_ld_hit_rate",
        |m, v| m.sectors_global_ld_hit_rate = v,
    ),
    (
        "l1tex__t_sectors_pipe_lsu_mem_global_op_st",
        |m, v| m.sectors_global_st = v,
    ),
    (
        "l1tex__t_sectors_pipe_lsu_mem_global_op_st_hit_rate",
        |m, v| m.sectors_global_st_hit_rate = v,
    ),
    (
        "l1tex__t_sectors_pipe_lsu_mem_local_op_ld",
        |m, v| m.sectors_local_ld = v,
    ),
    (
        "l1tex__t_sectors_pipe_lsu_mem_local_op_ld_hit_rate",
        |m, v| m.sectors_local_ld_hit_rate = v,
    ),
    (
        "l1tex__t_sectors_pipe_lsu_mem_local_op_st",
        |m, v| m.sectors_local_st = v,
    ),
    (
        "l1tex__t_sectors_pipe_lsu_mem_local_op_st_hit_rate",
        |m, v| m.sectors_local_st_hit_rate = v,
    ),
    (
        "l1tex__t_sectors_pipe_lsu_mem_global_op_atom",
        |m, v| m.sectors_global_atom = v,
    ),
    (
        "l1tex__t_sectors_pipe_lsu_mem_global_op_atom_hit_rate",
        |m, v| m.sectors_global_atom_hit_rate = v,
    ),
    (
        "l1tex__t_sectors_pipe_lsu_mem_global_op_red",
        |m, v| m.sectors_global_red = v,
    ),
    (
        "l1tex__t_sectors_pipe_lsu_mem_global_op_red_hit_rate",
        |m, v| m.sectors_global_red_hit_rate = v,
    ),
    (
        "l1tex__t_sectors_pipe_tex_mem_texture",
        |m, v| m.sectors_texture = v,
    ),
    (
        "l1tex__t_sectors_pipe_tex_mem_texture_hit_rate",
        |m, v| m.sectors_texture_hit_rate = v,
    ),
    ("lts__t_sectors_op_read", |m, v| m.l2_sectors_read = v),
    (
        "lts__t_sectors_op_read_hit_rate",
        |m, v| m.l2_sectors_read_hit_rate = v,
    ),
    ("lts__t_sectors_op_write", |m, v| m.l2_sectors_write = v),
    (
        "lts__t_sectors_op_write_hit_rate",
        |m, v| m.l2_sectors_write_hit_rate = v,
    ),
    ("lts__t_sectors_op_atom", |m, v| m.l2_sectors_atom = v),
    (
        "lts__t_sectors_op_atom_hit_rate",
        |m, v| m.l2_sectors_atom_hit_rate = v,
    ),
    ("lts__t_sectors_op_red", |m, v| m.l2_sectors_red = v),
    (
        "lts__t_sectors_op_red_hit_rate",
        |m, v| m.l2_sectors_red_hit_rate = v,
    ),
    (
        "lts__t_sectors_op_texture",
        |m, v| m.l2_sectors_texture = v,
    ),
    (
        "lts__t_sectors_op_texture_hit_rate",
        |m, v| m.l2_sectors_texture_hit_rate = v,
    ),
    (
        "l1tex__data_pipe_lsu_wavefronts_mem_shared_op_ld",
        |m, v| m.shared_wavefronts_ld = v,
    ),
    (
        "l1tex__data_pipe_lsu_wavefronts_mem_shared_op_st",
        |m, v| m.shared_wavefronts_st = v,
    ),
    (
        "smsp__sass_inst_executed_op_shared_ld.sum",
        |m, v| m.shared_inst_executed_ld = v,
    ),
    (
        "smsp__sass_inst_executed_op_shared_st.sum",
        |m, v| m.shared_inst_executed_st = v,
    ),
    (
        "l1tex__data_bank_conflicts_pipe_lsu_mem_shared_op_ld",
        |m, v| m.shared_bank_conflicts_ld = v,
    ),
    (
        "l1tex__data_bank_conflicts_pipe_lsu_mem_shared_op_st",
        |m, v| m.shared_bank_conflicts_st = v,
    ),
    (
        "l1tex__t_sectors_pipe_lsu_mem_global_op_ld.sum.ideal",
        |m, v| m.ideal_sectors_global_ld = v,
    ),
    (
        "l1tex__t_sectors_pipe_lsu_mem_global_op_st.sum.ideal",
        |m, v| m.ideal_sectors_global_st = v,
    ),
    ("smsp__inst_executed.sum", |m, v| m.inst_executed = v),
    (
        "smsp__sass_inst_executed_op_global_ld.sum",
        |m, v| m.inst_executed_global_loads = v,
    ),
    (
        "smsp__sass_inst_executed_op_shared_ld.sum.total",
        |m, v| m.inst_executed_shared_loads = v,
    ),
];

fn lookup(name: &str) -> Option<Setter> {
    CATALOG
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, setter)| *setter)
}

/// Strips surrounding quotes from a CSV field.
fn unquote(field: &str) -> &str {
    field.trim().trim_matches('"')
}

/// Converts a locale-formatted numeric string (`.` thousands, `,` decimal)
/// to an `f64`. Spec §4.4: strip `.` inside the field, then replace `,`
/// with `.` before parsing.
fn parse_locale_number(field: &str) -> Option<f64> {
    let cleaned = field.replace('.', "").replace(',', ".");
    cleaned.trim().parse().ok()
}

/// Splits one CSV row into fields, honoring double-quoted fields that may
/// themselves contain commas.
fn split_csv_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Parses the metrics report into one [`MetricRecord`] per kernel. The
/// first three rows are preamble. Last-writer-wins for duplicate kernel
/// rows (spec §4.4 invariant).
pub fn load(text: &str) -> IndexMap<String, MetricRecord> {
    let mut table: IndexMap<String, MetricRecord> = IndexMap::new();

    for (i, line) in text.lines().enumerate() {
        if i < 3 {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_csv_row(line);
        if fields.len() < METRIC_VALUE_COLUMN {
            log::debug!("skipping metrics row with too few columns: {line}");
            continue;
        }
        let kernel_name = unquote(&fields[KERNEL_NAME_COLUMN - 1]).to_string();
        if kernel_name.is_empty() {
            continue;
        }
        let metric_name = unquote(&fields[METRIC_NAME_COLUMN - 1]);
        let Some(setter) = lookup(metric_name) else {
            continue;
        };
        let raw_value = unquote(&fields[METRIC_VALUE_COLUMN - 1]);
        let value = match parse_locale_number(raw_value) {
            Some(v) => v,
            None => {
                log::debug!("could not parse metric value {raw_value:?} for {metric_name}");
                0.0
            }
        };

        let record = table.entry(kernel_name).or_default();
        setter(record, value);
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preamble() -> String {
        "preamble row 1\npreamble row 2\npreamble row 3\n".to_string()
    }

    fn data_row(kernel: &str, metric: &str, value: &str) -> String {
        // 29 columns; kernel at 9, metric name at 25, value at 29.
        let mut cols = vec!["\"\"".to_string(); 29];
        cols[0] = "\"1\"".to_string();
        cols[8] = format!("\"{kernel}\"");
        cols[24] = format!("\"{metric}\"");
        cols[28] = format!("\"{value}\"");
        cols.join(",")
    }

    #[test]
    fn parses_locale_formatted_numbers() {
        assert_eq!(parse_locale_number("1.234,56"), Some(1234.56));
        assert_eq!(parse_locale_number("42,0"), Some(42.0));
    }

    #[test]
    fn loads_one_record_per_kernel() {
        let mut text = preamble();
        text.push_str(&data_row(
            "kernelA",
            "smsp__warp_issue_stalled_wait_per_warp_active",
            "12,5",
        ));
        text.push('\n');
        let table = load(&text);
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get("kernelA").unwrap().stalled_wait_per_warp_active,
            12.5
        );
    }

    #[test]
    fn missing_metric_defaults_to_zero() {
        let table = load(&preamble());
        assert!(table.is_empty());
        let record = MetricRecord::default();
        assert_eq!(record.stalled_wait_per_warp_active, 0.0);
    }

    #[test]
    fn unknown_metric_name_is_ignored() {
        let mut text = preamble();
        text.push_str(&data_row("kernelA", "totally__unknown_metric", "5"));
        text.push('\n');
        let table = load(&text);
        assert!(table.is_empty());
    }

    #[test]
    fn last_writer_wins_for_duplicate_kernel_rows() {
        let mut text = preamble();
        text.push_str(&data_row(
            "kernelA",
            "smsp__warp_issue_stalled_wait_per_warp_active",
            "10",
        ));
        text.push('\n');
        text.push_str(&data_row(
            "kernelA",
            "smsp__warp_issue_stalled_wait_per_warp_active",
            "20",
        ));
        text.push('\n');
        let table = load(&text);
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get("kernelA").unwrap().stalled_wait_per_warp_active,
            20.0
        );
    }
}
