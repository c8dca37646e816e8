use assert_json_diff::assert_json_eq;
use indexmap::IndexMap;
use serde_json::json;

use gpu_kperf_report::detectors::{atomic_ir, deadlock, register_spill};
use gpu_kperf_report::lexer::{disasm, ir};
use gpu_kperf_report::{join, live_registers, metrics, stalls};

fn metrics_row(kernel: &str, metric: &str, value: &str) -> String {
    // 29 columns; kernel name at column 9, metric name at 25, value at 29
    // (1-indexed), matching the metrics report's own numbering.
    let mut cols = vec!["\"\"".to_string(); 29];
    cols[8] = format!("\"{kernel}\"");
    cols[24] = format!("\"{metric}\"");
    cols[28] = format!("\"{value}\"");
    cols.join(",")
}

fn stall_row(function_name: &str, pc_offset: &str, line: u32, pairs: &[(&str, u32)]) -> String {
    let mut row = format!("functionName:{function_name},pcOffset:{pc_offset},lineNumber:{line},stallReasonCount:{}", pairs.len());
    for (name, count) in pairs {
        row.push_str(&format!(",{name}:{count}"));
    }
    row
}

/// Drives the full disassembly -> register-spill -> join -> JSON pipeline
/// end to end, checking that the stall and register-pressure joins land on
/// the right occurrence.
#[test]
fn register_spill_pipeline_joins_stalls_and_pressure() {
    let disasm_text = "\t.section .text._Z3fooV,\"ax\",@progbits\n\
        \t\t// line 12\n\
        \t\t/*0020*/ IMAD R5, R3, 0x1, R7 ; // | 4 | 1 | 0 |\n\
        \t\t// line 15\n\
        \t\t/*00a0*/ STL [R2], R5 ; // | 6 | 1 | 0 |\n";
    let kernels = disasm::lex(disasm_text);

    let pc_sampling_text = format!(
        "preamble row 1\npreamble row 2\n{}\n",
        stall_row("_Z3fooV", "00a0", 15, &[("stalled_mio_throttle", 3), ("stalled_wait", 1)])
    );
    let stall_samples = stalls::build_samples(&stalls::parse_rows(&pc_sampling_text), &kernels);

    let metrics_text = format!(
        "preamble row 1\npreamble row 2\npreamble row 3\n{}\n",
        metrics_row("_Z3fooV", "sm__warps_active", "12,0")
    );
    let metric_table = metrics::load(&metrics_text);

    let live_register_table = live_registers::build(&kernels);
    let findings = register_spill::detect(&kernels);

    let projected = join::project(&findings, &stall_samples, &live_register_table, &metric_table, |m| {
        let mut map = serde_json::Map::new();
        map.insert("sm_warps_active".to_string(), json!(m.sm_warps_active));
        map
    });

    let value = serde_json::to_value(&projected).unwrap();
    let occurrence = &value["_Z3fooV"]["occurrences"][0];

    assert_eq!(occurrence["register"], json!("R5"));
    assert_eq!(occurrence["line"], json!(15));
    assert_eq!(occurrence["pc"], json!("00a0"));
    assert_eq!(occurrence["operation"], json!("STORE"));
    assert_eq!(occurrence["stalls"]["stalled_mio_throttle"], json!(75.0));
    assert_eq!(occurrence["stalls"]["stalled_wait"], json!(25.0));
    assert_eq!(occurrence["used_register_count"], json!(7));
    assert_eq!(value["_Z3fooV"]["metrics"]["sm_warps_active"], json!(12.0));
}

#[test]
fn deadlock_pipeline_distinguishes_resolved_from_unguarded_kernels() {
    let text = "\t.section .text._Z6safev,\"ax\",@progbits\n\
        \t\t/*0000*/ ATOM.E.CAS R0, [R1], R2, R3 ;\n\
        \t\t/*0010*/ @P0 BRA `(.L_x_1) ;\n\
        \t\t/*0020*/ BAR.SYNC 0x0 ;\n\
        \t.section .text._Z8unsafev,\"ax\",@progbits\n\
        \t\t/*0000*/ ATOM.E.CAS R0, [R1], R2, R3 ;\n\
        \t\t/*0010*/ @P0 BRA `(.L_x_2) ;\n";
    let kernels = disasm::lex(text);
    let findings = deadlock::detect(&kernels);

    assert_json_eq!(
        serde_json::to_value(&findings).unwrap(),
        json!({ "_Z6safev": true, "_Z8unsafev": false })
    );
}

#[test]
fn atomic_detector_join_is_metrics_only_and_marks_loop_membership() {
    let ir_text = "\
.visible .entry _Z6kernelv{
.loc 1 10 5, inlined_at 1 10 5
$L__BB0_1:
.loc 1 2 3, inlined_at 1 11 3
atom.global.add.f32 [%rd1], %f1;
.loc 1 2 3, inlined_at 1 12 3
bra $L__BB0_1;
}
";
    let kernels = ir::lex(ir_text);
    let findings = atomic_ir::detect(&kernels);

    let metrics_text = format!(
        "preamble row 1\npreamble row 2\npreamble row 3\n{}\n",
        metrics_row("_Z6kernelv", "l1tex__t_sectors_pipe_lsu_mem_global_op_atom", "8")
    );
    let metric_table = metrics::load(&metrics_text);

    let projected = join::project_metrics_only(&findings, &metric_table, |m| {
        let mut map = serde_json::Map::new();
        map.insert("sectors_global_atom".to_string(), json!(m.sectors_global_atom));
        map
    });

    let value = serde_json::to_value(&projected).unwrap();
    let occurrence = &value["_Z6kernelv"]["occurrences"][0];
    assert_eq!(occurrence["kind"], json!("GLOBAL"));
    assert_eq!(occurrence["inside_loop"], json!(true));
    assert_eq!(value["_Z6kernelv"]["metrics"]["sectors_global_atom"], json!(8.0));
}

#[test]
fn empty_kernel_set_produces_empty_output_for_every_detector() {
    let empty: IndexMap<String, disasm::KernelDisassembly> = IndexMap::new();
    assert!(register_spill::detect(&empty).is_empty());
    assert!(deadlock::detect(&empty).is_empty());
}
