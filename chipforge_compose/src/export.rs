// JSON export of the finished score and the run result.

use std::path::Path;

use chipforge_protocol::{RunResult, ScoreV1};
use serde::Serialize;

use crate::error::ExportError;

fn write_pretty<T: Serialize>(value: &T, path: &Path) -> Result<(), ExportError> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    std::fs::write(path, json)?;
    Ok(())
}

pub fn write_score_json(score: &ScoreV1, path: &Path) -> Result<(), ExportError> {
    write_pretty(score, path)
}

pub fn write_run_result_json(result: &RunResult, path: &Path) -> Result<(), ExportError> {
    write_pretty(result, path)
}
