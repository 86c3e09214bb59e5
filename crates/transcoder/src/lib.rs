#![allow(
    clippy::collapsible_if,
    clippy::redundant_closure,
    clippy::unused_async
)]
pub mod ffprobe;
pub mod gpu;
pub mod progress;
pub mod runner;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use gpu::FfmpegHardwareProbe;
pub use runner::FfmpegRunner;

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("ffmpeg/ffprobe not found at {0}")]
    BinaryNotFound(PathBuf),
    #[error("ffprobe failed: {0}")]
    ProbeFailed(String),
    #[error("ffmpeg failed: {0}")]
    FfmpegFailed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TranscodeError> for transq_core::RunnerError {
    fn from(e: TranscodeError) -> Self {
        match e {
            TranscodeError::Io(io) => Self::Io(io),
            TranscodeError::BinaryNotFound(path) => {
                Self::Spawn(format!("binary not found at {}", path.display()))
            }
            other => Self::Other(other.to_string()),
        }
    }
}

/// Global transcoder configuration.
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub nvidia_smi_path: PathBuf,
    /// How long a killed encoder gets to exit before we stop waiting.
    pub stop_grace: Duration,
    /// Stderr lines kept for the failure reason.
    pub stderr_tail_lines: usize,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            nvidia_smi_path: PathBuf::from("nvidia-smi"),
            stop_grace: Duration::from_secs(5),
            stderr_tail_lines: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum HwAccel {
    Nvenc,
    Vaapi,
    Qsv,
    VideoToolbox,
}
