//! Concurrency ceilings read by the admission controller.
//!
//! A [`ConcurrencyPolicy`] is an immutable snapshot. Whoever owns the user's
//! preferences hands out a fresh snapshot on each read; a change only affects
//! jobs admitted after it.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::CodecFamily;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("concurrency limit for {0} must be at least 1")]
    ZeroLimit(String),
    #[error("invalid limit: {0}")]
    Parse(String),
}

/// Ceiling on the total number of running encode jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalLimit {
    Serial,
    Fixed(usize),
    Unlimited,
}

impl GlobalLimit {
    /// `None` means no ceiling.
    pub fn ceiling(self) -> Option<usize> {
        match self {
            Self::Serial => Some(1),
            Self::Fixed(n) => Some(n),
            Self::Unlimited => None,
        }
    }
}

impl FromStr for GlobalLimit {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serial" => Ok(Self::Serial),
            "unlimited" => Ok(Self::Unlimited),
            other => other
                .parse()
                .map(Self::Fixed)
                .map_err(|_| PolicyError::Parse(s.to_string())),
        }
    }
}

/// Ceiling on concurrent hardware-encoder sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareLimit {
    /// Use whatever the capability probe reported.
    Auto,
    Fixed(usize),
    /// One session at a time, never alongside software encodes.
    Disabled,
}

impl FromStr for HardwareLimit {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "disabled" => Ok(Self::Disabled),
            other => other
                .parse()
                .map(Self::Fixed)
                .map_err(|_| PolicyError::Parse(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyPolicy {
    pub global_limit: GlobalLimit,
    /// When set, replaces `global_limit` for every non-hardware family.
    /// Families missing from the map get a ceiling of 1.
    #[serde(default)]
    pub per_codec_limits: Option<BTreeMap<CodecFamily, usize>>,
    pub hardware_limit: HardwareLimit,
    pub hardware_simultaneous_allowed: bool,
    pub watch_folder_concurrent: bool,
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        Self {
            global_limit: GlobalLimit::Serial,
            per_codec_limits: None,
            hardware_limit: HardwareLimit::Auto,
            hardware_simultaneous_allowed: true,
            watch_folder_concurrent: true,
        }
    }
}

impl ConcurrencyPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.global_limit == GlobalLimit::Fixed(0) {
            return Err(PolicyError::ZeroLimit("global".into()));
        }
        if self.hardware_limit == HardwareLimit::Fixed(0) {
            return Err(PolicyError::ZeroLimit(CodecFamily::Hardware.to_string()));
        }
        if let Some(limits) = &self.per_codec_limits {
            if let Some((codec, _)) = limits.iter().find(|(_, n)| **n == 0) {
                return Err(PolicyError::ZeroLimit(codec.to_string()));
            }
        }
        Ok(())
    }

    pub fn per_codec_mode(&self) -> bool {
        self.per_codec_limits.is_some()
    }

    /// Per-codec ceiling for a software family, if per-codec mode is on.
    pub fn codec_ceiling(&self, codec: CodecFamily) -> Option<usize> {
        self.per_codec_limits
            .as_ref()
            .map(|limits| limits.get(&codec).copied().unwrap_or(1))
    }

    /// Effective hardware ceiling given the probed session count.
    pub fn hardware_ceiling(&self, probed_sessions: usize) -> usize {
        match self.hardware_limit {
            HardwareLimit::Auto => probed_sessions.max(1),
            HardwareLimit::Fixed(n) => n,
            HardwareLimit::Disabled => 1,
        }
    }

    /// Whether hardware and software encodes must not overlap.
    pub fn hardware_exclusive(&self) -> bool {
        !self.hardware_simultaneous_allowed || self.hardware_limit == HardwareLimit::Disabled
    }
}

/// Parse `x264=2,x265=1` into a per-codec limit map.
pub fn parse_codec_limits(s: &str) -> Result<BTreeMap<CodecFamily, usize>, PolicyError> {
    let mut limits = BTreeMap::new();
    for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| PolicyError::Parse(pair.to_string()))?;
        let codec: CodecFamily = name.parse().map_err(PolicyError::Parse)?;
        let limit: usize = value
            .trim()
            .parse()
            .map_err(|_| PolicyError::Parse(pair.to_string()))?;
        limits.insert(codec, limit);
    }
    Ok(limits)
}
