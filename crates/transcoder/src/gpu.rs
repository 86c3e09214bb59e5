//! GPU hardware acceleration detection.
//!
//! Probes for available encoders by running `ffmpeg -encoders` and parsing output,
//! then sizes the hardware session pool for the admission controller.

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use transq_core::{HardwareCapabilityProbe, ProbeError};

use crate::{HwAccel, TranscodeError};

/// Concurrent NVENC sessions allowed per GPU by consumer drivers.
pub const NVENC_SESSIONS_PER_GPU: usize = 3;

/// Detected GPU capabilities.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct GpuCapabilities {
    pub nvenc: bool,
    pub vaapi: bool,
    pub qsv: bool,
    pub videotoolbox: bool,
}

impl GpuCapabilities {
    pub fn from_encoder_list(encoders: &str) -> Self {
        Self {
            nvenc: encoders.contains("h264_nvenc") || encoders.contains("hevc_nvenc"),
            vaapi: encoders.contains("h264_vaapi"),
            qsv: encoders.contains("h264_qsv"),
            videotoolbox: encoders.contains("h264_videotoolbox"),
        }
    }

    /// Pick the best available HW accelerator, or None for CPU.
    pub fn best(&self) -> Option<HwAccel> {
        if self.nvenc {
            Some(HwAccel::Nvenc)
        } else if self.qsv {
            Some(HwAccel::Qsv)
        } else if self.vaapi {
            Some(HwAccel::Vaapi)
        } else if self.videotoolbox {
            Some(HwAccel::VideoToolbox)
        } else {
            None
        }
    }
}

/// Detect available hardware encoders by querying ffmpeg.
pub async fn detect(ffmpeg_path: &Path) -> Result<GpuCapabilities, TranscodeError> {
    let encoders = get_encoders(ffmpeg_path).await?;
    let caps = GpuCapabilities::from_encoder_list(&encoders);
    info!(?caps, "GPU encoder detection complete");
    Ok(caps)
}

async fn get_encoders(ffmpeg_path: &Path) -> Result<String, TranscodeError> {
    let output = tokio::process::Command::new(ffmpeg_path)
        .args(["-hide_banner", "-encoders"])
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TranscodeError::BinaryNotFound(ffmpeg_path.into()),
            _ => TranscodeError::FfmpegFailed(format!("spawn ffmpeg: {e}")),
        })?;

    if !output.status.success() {
        return Err(TranscodeError::FfmpegFailed("ffmpeg -encoders failed".into()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Count GPUs in `nvidia-smi --query-gpu=name --format=csv,noheader` output.
pub fn count_gpus(listing: &str) -> usize {
    listing.lines().filter(|l| !l.trim().is_empty()).count()
}

async fn nvidia_gpu_count(nvidia_smi: &Path) -> usize {
    let output = tokio::process::Command::new(nvidia_smi)
        .args(["--query-gpu=name", "--format=csv,noheader"])
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            count_gpus(&String::from_utf8_lossy(&out.stdout)).max(1)
        }
        Ok(_) | Err(_) => {
            warn!("nvidia-smi unavailable, assuming a single GPU");
            1
        }
    }
}

/// [`HardwareCapabilityProbe`] backed by ffmpeg's encoder list.
#[derive(Debug, Clone)]
pub struct FfmpegHardwareProbe {
    ffmpeg_path: PathBuf,
    nvidia_smi_path: PathBuf,
}

impl FfmpegHardwareProbe {
    pub fn new(config: &crate::TranscoderConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            nvidia_smi_path: config.nvidia_smi_path.clone(),
        }
    }
}

#[async_trait::async_trait]
impl HardwareCapabilityProbe for FfmpegHardwareProbe {
    async fn max_concurrent_sessions(&self) -> Result<usize, ProbeError> {
        let caps = detect(&self.ffmpeg_path)
            .await
            .map_err(|e| ProbeError::Failed(e.to_string()))?;

        let sessions = match caps.best() {
            None => return Err(ProbeError::NoHardwareEncoder),
            Some(HwAccel::Nvenc) => {
                nvidia_gpu_count(&self.nvidia_smi_path).await * NVENC_SESSIONS_PER_GPU
            }
            Some(HwAccel::Qsv | HwAccel::Vaapi | HwAccel::VideoToolbox) => 1,
        };
        info!(sessions, "hardware encoder sessions available");
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_accelerator_preference() {
        let caps = GpuCapabilities {
            nvenc: true,
            vaapi: true,
            ..Default::default()
        };
        assert!(matches!(caps.best(), Some(HwAccel::Nvenc)));

        let caps = GpuCapabilities {
            vaapi: true,
            qsv: true,
            ..Default::default()
        };
        assert!(matches!(caps.best(), Some(HwAccel::Qsv)));

        assert!(GpuCapabilities::default().best().is_none());
    }

    #[test]
    fn encoder_list_parsing() {
        let listing = " V....D h264_nvenc           NVIDIA NVENC H.264 encoder\n \
                        V....D libx264              libx264 H.264 / AVC\n";
        let caps = GpuCapabilities::from_encoder_list(listing);
        assert!(caps.nvenc);
        assert!(!caps.qsv);
        assert!(!caps.vaapi);
    }

    #[test]
    fn gpu_count_ignores_blank_lines() {
        assert_eq!(count_gpus("NVIDIA GeForce RTX 3080\nNVIDIA GeForce RTX 3090\n\n"), 2);
        assert_eq!(count_gpus(""), 0);
    }

    #[tokio::test]
    async fn missing_ffmpeg_reports_probe_failure() {
        let probe = FfmpegHardwareProbe {
            ffmpeg_path: PathBuf::from("/nonexistent/transq-ffmpeg"),
            nvidia_smi_path: PathBuf::from("/nonexistent/nvidia-smi"),
        };
        assert!(matches!(
            probe.max_concurrent_sessions().await,
            Err(ProbeError::Failed(_))
        ));
    }
}
