//! Join & Project phase (spec §4.8): correlates a detector's findings with
//! PC-sampling stall data, live-register pressure, and hardware metrics,
//! and shapes the result into the per-kernel JSON schema of spec §6.3.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::detectors::Located;
use crate::live_registers::LiveRegisterTable;
use crate::metrics::MetricRecord;
use crate::stalls::{canonical_percentages, StallSample};

/// Joins one detector's findings (disassembly-grounded, so each carries a
/// pc-offset and source line) against stall samples, live-register
/// pressure, and metrics, producing `{"occurrences": [...], "stalls": {...},
/// "metrics": {...}}` per kernel (spec §6.3). Each occurrence also carries
/// its own `stalls`/pressure fields per spec §4.8's per-finding join
/// language.
pub fn project<T, F>(
    findings_by_kernel: &IndexMap<String, Vec<T>>,
    stall_samples: &IndexMap<String, Vec<StallSample>>,
    live_registers: &LiveRegisterTable,
    metrics: &IndexMap<String, MetricRecord>,
    metric_view: F,
) -> IndexMap<String, Value>
where
    T: Located + Serialize,
    F: Fn(&MetricRecord) -> Map<String, Value>,
{
    let mut out = IndexMap::new();
    let empty_samples: Vec<StallSample> = Vec::new();

    for (kernel_name, findings) in findings_by_kernel {
        let samples = stall_samples.get(kernel_name).unwrap_or(&empty_samples);
        let pc_table = live_registers.get(kernel_name);

        let occurrences: Vec<Value> = findings
            .iter()
            .map(|finding| finding_occurrence(finding, samples, pc_table))
            .collect();

        let kernel_raw_counts: Vec<(String, u32)> = samples.iter().flat_map(|s| s.raw_counts.clone()).collect();
        let kernel_stalls = canonical_percentages(&kernel_raw_counts);

        let mut kernel_obj = Map::new();
        kernel_obj.insert("occurrences".to_string(), Value::Array(occurrences));
        kernel_obj.insert(
            "stalls".to_string(),
            serde_json::to_value(&kernel_stalls).unwrap_or(Value::Null),
        );
        if let Some(record) = metrics.get(kernel_name) {
            kernel_obj.insert("metrics".to_string(), Value::Object(metric_view(record)));
        }

        out.insert(kernel_name.clone(), Value::Object(kernel_obj));
    }
    out
}

fn finding_occurrence<T: Located + Serialize>(
    finding: &T,
    samples: &[StallSample],
    pc_table: Option<&IndexMap<crate::instruction::PcOffset, crate::live_registers::LiveRegisterRecord>>,
) -> Value {
    let mut obj = match serde_json::to_value(finding) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };

    // Line-level join, narrowed to a matching register when the detector
    // cares about per-instruction precision (spec §4.8).
    let matching: Vec<(String, u32)> = samples
        .iter()
        .filter(|s| s.source_line == finding.source_line())
        .filter(|s| finding.register().map_or(true, |r| s.instruction_text.contains(r)))
        .flat_map(|s| s.raw_counts.clone())
        .collect();
    let stalls = canonical_percentages(&matching);
    if !stalls.is_empty() {
        obj.insert(
            "stalls".to_string(),
            serde_json::to_value(&stalls).unwrap_or(Value::Null),
        );
    }

    if let Some(record) = pc_table.and_then(|t| t.get(&finding.pc_offset())) {
        obj.insert("used_register_count".to_string(), Value::from(record.sum()));
        obj.insert(
            "register_pressure_increase".to_string(),
            Value::from(record.delta_from_previous.max(0)),
        );
    }

    Value::Object(obj)
}

/// Joins findings with no pc-offset/register concept (the IR-grounded
/// atomic detector, spec §4.7.3) against kernel-level metrics only.
pub fn project_metrics_only<T, F>(
    findings_by_kernel: &IndexMap<String, Vec<T>>,
    metrics: &IndexMap<String, MetricRecord>,
    metric_view: F,
) -> IndexMap<String, Value>
where
    T: Serialize,
    F: Fn(&MetricRecord) -> Map<String, Value>,
{
    let mut out = IndexMap::new();
    for (kernel_name, findings) in findings_by_kernel {
        let occurrences: Vec<Value> = findings
            .iter()
            .map(|f| serde_json::to_value(f).unwrap_or(Value::Null))
            .collect();

        let mut kernel_obj = Map::new();
        kernel_obj.insert("occurrences".to_string(), Value::Array(occurrences));
        if let Some(record) = metrics.get(kernel_name) {
            kernel_obj.insert("metrics".to_string(), Value::Object(metric_view(record)));
        }
        out.insert(kernel_name.clone(), Value::Object(kernel_obj));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::{warp_divergence::DivergenceFinding, Severity};
    use crate::instruction::PcOffset;

    fn sample_finding() -> DivergenceFinding {
        DivergenceFinding {
            kernel: "k".to_string(),
            source_line: 10,
            pc_offset: PcOffset::from_hex("0010").unwrap(),
            target_label: ".L_x_1".to_string(),
            target_line: 20,
            target_pc: PcOffset::from_hex("0020").unwrap(),
            severity: Severity::Warning,
        }
    }

    #[test]
    fn occurrence_gets_pressure_fields_from_pc_table() {
        let finding = sample_finding();
        let mut pc_table = IndexMap::new();
        pc_table.insert(
            finding.pc_offset,
            crate::live_registers::LiveRegisterRecord {
                general: 3,
                predicate: 1,
                uniform_general: 0,
                delta_from_previous: -2,
            },
        );
        let value = finding_occurrence(&finding, &[], Some(&pc_table));
        assert_eq!(value["used_register_count"], 4);
        assert_eq!(value["register_pressure_increase"], 0);
    }

    #[test]
    fn occurrence_without_pc_table_entry_omits_pressure_fields() {
        let finding = sample_finding();
        let value = finding_occurrence(&finding, &[], None);
        assert!(value.get("used_register_count").is_none());
    }
}
