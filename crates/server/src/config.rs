//! Environment-driven server configuration.
//!
//! Every setting has a default; `TRANSQ_*` variables override them.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use transq_core::policy::parse_codec_limits;
use transq_core::{ConcurrencyPolicy, GlobalLimit, HardwareLimit, PolicyError};
use transq_scheduler::SchedulerConfig;
use transq_transcoder::TranscoderConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub transcoder: TranscoderConfig,
    pub scheduler: SchedulerConfig,
    pub policy: ConcurrencyPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8097".to_string(),
            transcoder: TranscoderConfig::default(),
            scheduler: SchedulerConfig::default(),
            policy: ConcurrencyPolicy::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(bind) = lookup("TRANSQ_BIND") {
            config.bind = bind;
        }
        if let Some(path) = lookup("TRANSQ_FFMPEG") {
            config.transcoder.ffmpeg_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("TRANSQ_FFPROBE") {
            config.transcoder.ffprobe_path = PathBuf::from(path);
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "TRANSQ_STOP_GRACE_SECS")? {
            config.scheduler.stop_grace = Duration::from_secs(secs);
            // Leave the scheduler room to observe the runner's own timeout.
            config.transcoder.stop_grace = Duration::from_secs(secs.div_ceil(2).max(1));
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "TRANSQ_WATCH_POLL_SECS")? {
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    var: "TRANSQ_WATCH_POLL_SECS",
                    value: secs.to_string(),
                    reason: "must be at least 1".into(),
                });
            }
            config.scheduler.watch_poll_interval = Duration::from_secs(secs);
        }

        let policy = &mut config.policy;
        if let Some(limit) = parse_var::<GlobalLimit>(&lookup, "TRANSQ_GLOBAL_LIMIT")? {
            policy.global_limit = limit;
        }
        if let Some(raw) = lookup("TRANSQ_PER_CODEC_LIMITS") {
            if !raw.trim().is_empty() {
                policy.per_codec_limits = Some(parse_codec_limits(&raw)?);
            }
        }
        if let Some(limit) = parse_var::<HardwareLimit>(&lookup, "TRANSQ_HW_LIMIT")? {
            policy.hardware_limit = limit;
        }
        if let Some(allowed) = parse_bool(&lookup, "TRANSQ_HW_SIMULTANEOUS")? {
            policy.hardware_simultaneous_allowed = allowed;
        }
        if let Some(concurrent) = parse_bool(&lookup, "TRANSQ_WATCH_CONCURRENT")? {
            policy.watch_folder_concurrent = concurrent;
        }
        config.policy.validate()?;

        Ok(config)
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        })
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<bool>, ConfigError> {
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::Invalid {
            var,
            value,
            reason: "expected a boolean".into(),
        }),
    }
}
