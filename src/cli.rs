use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// One positional-argument convention per command, no flags (spec §6.4):
/// inputs first, then always `<emit-json> <output-dir>` last.
#[derive(Debug, Parser)]
#[command(
    name = "gpu-kperf-report",
    version,
    about = r#"
gpu-kperf-report analyzes GPU kernel disassembly, IR, PC-sampling, and
metrics reports and emits per-kernel JSON bottleneck findings.

EXAMPLES:
    # Flag registers that spill to local memory:
    gpu-kperf-report register-spill kernel.sass samples.csv metrics.csv true ./out

    # Run every detector whose inputs were supplied:
    gpu-kperf-report all kernel.sass kernel.ptx samples.csv metrics.csv true ./out
"#
)]
pub struct Opt {
    #[command(subcommand)]
    pub analysis: Analysis,
}

#[derive(Debug, Subcommand)]
pub enum Analysis {
    /// Datatype-conversion findings (spec §4.7.1).
    DatatypeConversion(DisasmArgs),
    /// Deadlock-detection findings: `{"deadlock": bool}` per kernel (spec §4.7.2).
    DeadlockDetection(DisasmArgs),
    /// Atomic-operation findings over the IR stream (spec §4.7.3).
    AtomicDetection(IrArgs),
    /// Register-spill findings (spec §4.7.4).
    RegisterSpill(DisasmArgs),
    /// Warp-divergence findings (spec §4.7.5).
    WarpDivergence(DisasmArgs),
    /// Read-only/restrict-candidate findings (spec §4.7.6).
    RestrictCandidate(DisasmArgs),
    /// Shared-memory-candidate findings (spec §4.7.7).
    SharedMemoryCandidate(DisasmArgs),
    /// Texture-memory-candidate findings (spec §4.7.8).
    TextureMemoryCandidate(DisasmArgs),
    /// Vectorization-candidate findings (spec §4.7.9).
    VectorizationCandidate(DisasmArgs),
    /// Runs every detector whose required inputs were supplied, writing one
    /// JSON file per detector (spec §1).
    All(AllArgs),
}

/// Inputs shared by every disassembly-grounded detector: the disassembly
/// listing is required, the PC-sampling and metrics reports are optional
/// (the join phase is skipped, not an error, when one is missing; spec §7).
#[derive(Debug, Args)]
pub struct DisasmArgs {
    /// Path to the SASS disassembly listing.
    pub disassembly: PathBuf,
    /// Path to the PC-sampling warp-stall report.
    pub pc_sampling: Option<PathBuf>,
    /// Path to the per-kernel metrics report.
    pub metrics: Option<PathBuf>,
    /// Whether to write the JSON report ("true"/"false").
    pub emit_json: bool,
    /// Directory the JSON report is written into.
    pub output_dir: PathBuf,
}

/// Inputs for the IR-grounded atomic detector: no pc-offset concept exists
/// in IR, so there is no PC-sampling or live-register join (spec §4.7.3).
#[derive(Debug, Args)]
pub struct IrArgs {
    /// Path to the PTX-like IR listing.
    pub ir: PathBuf,
    /// Path to the per-kernel metrics report.
    pub metrics: Option<PathBuf>,
    /// Whether to write the JSON report ("true"/"false").
    pub emit_json: bool,
    /// Directory the JSON report is written into.
    pub output_dir: PathBuf,
}

/// Inputs for `all`: every detector's input is optional here, since a
/// detector whose required input is missing is simply skipped (the "all"
/// subcommand runs every detector whose inputs were supplied, spec §1).
#[derive(Debug, Args)]
pub struct AllArgs {
    /// Path to the SASS disassembly listing.
    pub disassembly: Option<PathBuf>,
    /// Path to the PTX-like IR listing.
    pub ir: Option<PathBuf>,
    /// Path to the PC-sampling warp-stall report.
    pub pc_sampling: Option<PathBuf>,
    /// Path to the per-kernel metrics report.
    pub metrics: Option<PathBuf>,
    /// Whether to write the JSON reports ("true"/"false").
    pub emit_json: bool,
    /// Directory the JSON reports are written into.
    pub output_dir: PathBuf,
}
