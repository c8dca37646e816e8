mod cli;

use std::fs;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use indexmap::IndexMap;
use serde_json::{Map, Value};

use gpu_kperf_report::detectors::{
    atomic_ir, datatype_conversion, deadlock, register_spill, restrict_candidate, shared_memory,
    texture_memory, vectorization, warp_divergence,
};
use gpu_kperf_report::error::ReportError;
use gpu_kperf_report::lexer::{disasm, ir};
use gpu_kperf_report::{join, live_registers, memory_flow, metrics, report, stalls};

use cli::{Analysis, AllArgs, DisasmArgs, IrArgs, Opt};

fn main() -> ExitCode {
    env_logger::init();

    let opt = Opt::parse();
    match run(opt.analysis) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Reads a text input file. An unreadable input is not fatal (spec §7):
/// it's logged and treated as empty, so the rest of the pipeline proceeds
/// with an empty table for that input.
fn read_input(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            log::error!("could not read {}: {err}", path.display());
            String::new()
        }
    }
}

fn run(analysis: Analysis) -> Result<(), ReportError> {
    match analysis {
        Analysis::DatatypeConversion(args) => run_disasm_detector(
            args,
            "datatype_conversion",
            |kernels| datatype_conversion::detect(kernels),
            datatype_conversion_metrics,
        ),
        Analysis::DeadlockDetection(args) => run_deadlock(args),
        Analysis::AtomicDetection(args) => run_atomic(args),
        Analysis::RegisterSpill(args) => run_disasm_detector(
            args,
            "register_spill",
            |kernels| register_spill::detect(kernels),
            register_spill_metrics,
        ),
        Analysis::WarpDivergence(args) => run_disasm_detector(
            args,
            "warp_divergence",
            |kernels| warp_divergence::detect(kernels),
            warp_divergence_metrics,
        ),
        Analysis::RestrictCandidate(args) => run_disasm_detector(
            args,
            "restrict_candidate",
            |kernels| restrict_candidate::detect(kernels),
            restrict_candidate_metrics,
        ),
        Analysis::SharedMemoryCandidate(args) => run_disasm_detector(
            args,
            "shared_memory_candidate",
            |kernels| shared_memory::detect(kernels),
            shared_memory_metrics,
        ),
        Analysis::TextureMemoryCandidate(args) => run_disasm_detector(
            args,
            "texture_memory_candidate",
            |kernels| texture_memory::detect(kernels),
            texture_memory_metrics,
        ),
        Analysis::VectorizationCandidate(args) => run_disasm_detector(
            args,
            "vectorization_candidate",
            |kernels| vectorization::detect(kernels),
            vectorization_metrics,
        ),
        Analysis::All(args) => run_all(args),
    }
}

/// Shared shape for the eight disassembly-grounded detector subcommands:
/// lex the disassembly, optionally load stall samples and metrics, run the
/// detector, join, and emit.
fn run_disasm_detector<T, D, M>(
    args: DisasmArgs,
    analysis_name: &str,
    detect: D,
    metric_view: M,
) -> Result<(), ReportError>
where
    T: gpu_kperf_report::detectors::Located + serde::Serialize,
    D: Fn(&IndexMap<String, disasm::KernelDisassembly>) -> IndexMap<String, Vec<T>>,
    M: Fn(&metrics::MetricRecord) -> Map<String, Value>,
{
    let disasm_text = read_input(&args.disassembly);
    let kernels = disasm::lex(&disasm_text);

    let stall_samples = match &args.pc_sampling {
        Some(path) => stalls::build_samples(&stalls::parse_rows(&read_input(path)), &kernels),
        None => IndexMap::new(),
    };
    let metric_table = match &args.metrics {
        Some(path) => metrics::load(&read_input(path)),
        None => IndexMap::new(),
    };
    let live_register_table = live_registers::build(&kernels);

    let findings = detect(&kernels);
    let projected = join::project(&findings, &stall_samples, &live_register_table, &metric_table, metric_view);
    report::write(analysis_name, &projected, args.emit_json, &args.output_dir)
}

fn run_deadlock(args: DisasmArgs) -> Result<(), ReportError> {
    let disasm_text = read_input(&args.disassembly);
    let kernels = disasm::lex(&disasm_text);
    let findings = deadlock::detect(&kernels);
    report::write_deadlock(&findings, args.emit_json, &args.output_dir)
}

fn run_atomic(args: IrArgs) -> Result<(), ReportError> {
    let ir_text = read_input(&args.ir);
    let kernels = ir::lex(&ir_text);
    let metric_table = match &args.metrics {
        Some(path) => metrics::load(&read_input(path)),
        None => IndexMap::new(),
    };
    let findings = atomic_ir::detect(&kernels);
    let projected = join::project_metrics_only(&findings, &metric_table, atomic_metrics);
    report::write("atomic_detection", &projected, args.emit_json, &args.output_dir)
}

/// Runs every detector whose required input was supplied (spec §1's `all`
/// subcommand), writing each detector's JSON file.
fn run_all(args: AllArgs) -> Result<(), ReportError> {
    if let Some(disassembly) = &args.disassembly {
        let disasm_args = DisasmArgs {
            disassembly: disassembly.clone(),
            pc_sampling: args.pc_sampling.clone(),
            metrics: args.metrics.clone(),
            emit_json: args.emit_json,
            output_dir: args.output_dir.clone(),
        };
        run_disasm_detector(
            clone_disasm_args(&disasm_args),
            "datatype_conversion",
            |k| datatype_conversion::detect(k),
            datatype_conversion_metrics,
        )?;
        run_deadlock(clone_disasm_args(&disasm_args))?;
        run_disasm_detector(
            clone_disasm_args(&disasm_args),
            "register_spill",
            |k| register_spill::detect(k),
            register_spill_metrics,
        )?;
        run_disasm_detector(
            clone_disasm_args(&disasm_args),
            "warp_divergence",
            |k| warp_divergence::detect(k),
            warp_divergence_metrics,
        )?;
        run_disasm_detector(
            clone_disasm_args(&disasm_args),
            "restrict_candidate",
            |k| restrict_candidate::detect(k),
            restrict_candidate_metrics,
        )?;
        run_disasm_detector(
            clone_disasm_args(&disasm_args),
            "shared_memory_candidate",
            |k| shared_memory::detect(k),
            shared_memory_metrics,
        )?;
        run_disasm_detector(
            clone_disasm_args(&disasm_args),
            "texture_memory_candidate",
            |k| texture_memory::detect(k),
            texture_memory_metrics,
        )?;
        run_disasm_detector(
            disasm_args,
            "vectorization_candidate",
            |k| vectorization::detect(k),
            vectorization_metrics,
        )?;
    } else {
        log::warn!("no disassembly supplied, skipping all disassembly-grounded detectors");
    }

    if let Some(ir_path) = &args.ir {
        run_atomic(IrArgs {
            ir: ir_path.clone(),
            metrics: args.metrics.clone(),
            emit_json: args.emit_json,
            output_dir: args.output_dir.clone(),
        })?;
    } else {
        log::warn!("no IR supplied, skipping the atomic detector");
    }

    Ok(())
}

fn clone_disasm_args(args: &DisasmArgs) -> DisasmArgs {
    DisasmArgs {
        disassembly: args.disassembly.clone(),
        pc_sampling: args.pc_sampling.clone(),
        metrics: args.metrics.clone(),
        emit_json: args.emit_json,
        output_dir: args.output_dir.clone(),
    }
}

// --- Detector-specific metric subsets (spec §4.8: "attach a
// detector-specific subset of fields and the Memory-Flow Derivations"). ---

fn datatype_conversion_metrics(m: &metrics::MetricRecord) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("inst_executed".to_string(), Value::from(m.inst_executed));
    map.insert(
        "inst_executed_global_loads".to_string(),
        Value::from(m.inst_executed_global_loads),
    );
    map
}

fn register_spill_metrics(m: &metrics::MetricRecord) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("sm_warps_active".to_string(), Value::from(m.sm_warps_active));
    map.insert("smsp_warps_active".to_string(), Value::from(m.smsp_warps_active));
    map.insert(
        "stalled_long_scoreboard_per_warp_active".to_string(),
        Value::from(m.stalled_long_scoreboard_per_warp_active),
    );
    map
}

fn warp_divergence_metrics(m: &metrics::MetricRecord) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("sass_branch_targets".to_string(), Value::from(m.sass_branch_targets));
    map.insert(
        "sass_branch_targets_threads_divergent".to_string(),
        Value::from(m.sass_branch_targets_threads_divergent),
    );
    map
}

fn restrict_candidate_metrics(m: &metrics::MetricRecord) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("sectors_global_ld".to_string(), Value::from(m.sectors_global_ld));
    map.insert(
        "sectors_global_ld_hit_rate".to_string(),
        Value::from(m.sectors_global_ld_hit_rate),
    );
    if let Ok(flow) = serde_json::to_value(memory_flow::load_flow(m)) {
        map.insert("load_flow".to_string(), flow);
    }
    map
}

fn shared_memory_metrics(m: &metrics::MetricRecord) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("shared_wavefronts_ld".to_string(), Value::from(m.shared_wavefronts_ld));
    map.insert(
        "shared_inst_executed_ld".to_string(),
        Value::from(m.shared_inst_executed_ld),
    );
    map.insert("bank_conflict".to_string(), Value::from(memory_flow::bank_conflict(m)));
    if let Ok(flow) = serde_json::to_value(memory_flow::shared_flow(m)) {
        map.insert("shared_flow".to_string(), flow);
    }
    map
}

fn texture_memory_metrics(m: &metrics::MetricRecord) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("sectors_texture".to_string(), Value::from(m.sectors_texture));
    map.insert(
        "sectors_texture_hit_rate".to_string(),
        Value::from(m.sectors_texture_hit_rate),
    );
    if let Ok(flow) = serde_json::to_value(memory_flow::texture_flow(m)) {
        map.insert("texture_flow".to_string(), flow);
    }
    map
}

fn vectorization_metrics(m: &metrics::MetricRecord) -> Map<String, Value> {
    let mut map = Map::new();
    if let Ok(excess) = serde_json::to_value(memory_flow::coalescing_excess(m)) {
        map.insert("coalescing_excess".to_string(), excess);
    }
    if let Ok(flow) = serde_json::to_value(memory_flow::load_flow(m)) {
        map.insert("load_flow".to_string(), flow);
    }
    map
}

fn atomic_metrics(m: &metrics::MetricRecord) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("sectors_global_atom".to_string(), Value::from(m.sectors_global_atom));
    map.insert("sectors_global_red".to_string(), Value::from(m.sectors_global_red));
    if let Ok(flow) = serde_json::to_value(memory_flow::atomic_flow(m)) {
        map.insert("atomic_flow".to_string(), flow);
    }
    map
}
