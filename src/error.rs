use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the CLI binary.
///
/// Per-loader parse failures are *not* represented here: spec says malformed
/// input is non-fatal (logged, then the loader proceeds with empty/default
/// data). The only thing that can end the process with a non-zero exit is a
/// failure to write the output report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("could not write report to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not create output directory {path}: {source}")]
    CreateOutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}
