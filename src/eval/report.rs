//! Writing the metric report

use calibrar_common::{CalibrarError, Result};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::collections::BTreeMap;
use std::path::Path;

/// File name of the metric report.
pub const EVAL_RESULTS_FILE: &str = "eval_results.json";

/// Serialize metrics as JSON with sorted keys and 4-space indentation.
pub fn report_json(metrics: &BTreeMap<String, f64>) -> Result<String> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    metrics
        .serialize(&mut ser)
        .map_err(|e| CalibrarError::serialization(format!("Failed to serialize metrics: {e}")))?;
    String::from_utf8(buf).map_err(|e| CalibrarError::serialization(e.to_string()))
}

/// Write `eval_results.json` into `output_dir` and return its path.
pub fn write_report(metrics: &BTreeMap<String, f64>, output_dir: &Path) -> Result<std::path::PathBuf> {
    let path = output_dir.join(EVAL_RESULTS_FILE);
    let mut json = report_json(metrics)?;
    json.push('\n');
    std::fs::write(&path, json).map_err(|e| CalibrarError::io(format!("writing {}", path.display()), e))?;
    Ok(path)
}
