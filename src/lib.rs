//! Static + dynamic performance-analysis engine for GPU kernels.
//!
//! Given a disassembly listing, an IR listing, and two profiler reports (a
//! PC-sampling warp-stall report and a per-kernel metrics report), this
//! crate classifies likely performance bottlenecks per kernel and emits one
//! JSON report per analysis kind. `main.rs` is a thin CLI shell around the
//! pipeline described here; everything that matters lives in the library.

pub mod detectors;
pub mod error;
pub mod instruction;
pub mod join;
pub mod lexer;
pub mod live_registers;
pub mod memory_flow;
pub mod metrics;
pub mod report;
pub mod stalls;
