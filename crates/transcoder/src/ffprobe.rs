use std::path::Path;

use crate::TranscodeError;

/// Run ffprobe on a file and return its container duration in seconds.
pub async fn probe_duration(ffprobe_path: &Path, file: &Path) -> Result<f64, TranscodeError> {
    let output = tokio::process::Command::new(ffprobe_path)
        .args(["-v", "quiet", "-print_format", "json", "-show_format"])
        .arg(file)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TranscodeError::BinaryNotFound(ffprobe_path.into()),
            _ => TranscodeError::ProbeFailed(format!("spawn failed: {e}")),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TranscodeError::ProbeFailed(stderr.into_owned()));
    }

    let raw: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| TranscodeError::ProbeFailed(format!("parse JSON: {e}")))?;

    parse_duration(&raw)
}

fn parse_duration(raw: &serde_json::Value) -> Result<f64, TranscodeError> {
    let format = raw
        .get("format")
        .ok_or_else(|| TranscodeError::ProbeFailed("missing 'format'".into()))?;

    format
        .get("duration")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|d| *d > 0.0)
        .ok_or_else(|| TranscodeError::ProbeFailed("missing or zero duration".into()))
}
