//! Report Emitter (spec §4.10, §6.3): one JSON file per analysis kind,
//! keyed by kernel name.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::ReportError;

/// Writes `<output_dir>/<analysis_name>.json`, pretty-printed, when
/// `emit_json` is true. When false, the report is computed but not
/// written -- the CLI's emission flag gates output, not analysis (spec
/// §6.4).
pub fn write<T: Serialize>(
    analysis_name: &str,
    data: &IndexMap<String, T>,
    emit_json: bool,
    output_dir: &Path,
) -> Result<(), ReportError> {
    if !emit_json {
        log::debug!("emit-json is false, skipping write for {analysis_name}");
        return Ok(());
    }

    fs::create_dir_all(output_dir).map_err(|source| ReportError::CreateOutputDir {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let body = serde_json::to_string_pretty(data)?;
    let path = output_dir.join(format!("{analysis_name}.json"));
    fs::write(&path, body).map_err(|source| ReportError::Write {
        path: path.clone(),
        source,
    })?;
    log::info!("wrote {}", path.display());
    Ok(())
}

/// The deadlock detector's special-cased output shape: `{"deadlock": bool}`
/// per kernel, with no occurrences/stalls/metrics (spec §4.10).
pub fn write_deadlock(
    data: &IndexMap<String, bool>,
    emit_json: bool,
    output_dir: &Path,
) -> Result<(), ReportError> {
    let wrapped: IndexMap<String, serde_json::Value> = data
        .iter()
        .map(|(kernel, deadlock)| {
            let mut obj = serde_json::Map::new();
            obj.insert("deadlock".to_string(), serde_json::Value::Bool(*deadlock));
            (kernel.clone(), serde_json::Value::Object(obj))
        })
        .collect();
    write("deadlock_detection", &wrapped, emit_json, output_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_write_when_emit_json_is_false() {
        let data: IndexMap<String, serde_json::Value> = IndexMap::new();
        let result = write("datatype_conversion", &data, false, Path::new("/nonexistent/dir"));
        assert!(result.is_ok());
    }
}
