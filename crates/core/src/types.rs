use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(uuid::Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

/// What a job does when it is admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Encode a single file.
    Standard,
    /// Expand a directory into one standard job per eligible file.
    Folder,
    /// Keep watching a directory and submit every new eligible file.
    WatchFolder,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Folder => "folder",
            Self::WatchFolder => "watch_folder",
        }
    }

    /// Folder and watch-folder jobs only feed the intake; they never run an encoder.
    pub fn is_driver(self) -> bool {
        matches!(self, Self::Folder | Self::WatchFolder)
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoder family a job runs under. This is the grouping key for concurrency ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecFamily {
    X264,
    X265,
    Av1,
    /// Device-backed encoder (NVENC, QSV, VAAPI, VideoToolbox).
    Hardware,
    /// Stream copy, no re-encode.
    Copy,
}

impl CodecFamily {
    pub const ALL: [CodecFamily; 5] = [
        Self::X264,
        Self::X265,
        Self::Av1,
        Self::Hardware,
        Self::Copy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::X264 => "x264",
            Self::X265 => "x265",
            Self::Av1 => "av1",
            Self::Hardware => "hardware",
            Self::Copy => "copy",
        }
    }

    pub fn is_hardware(self) -> bool {
        self == Self::Hardware
    }
}

impl std::fmt::Display for CodecFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == lower)
            .ok_or_else(|| format!("unknown codec family: {s}"))
    }
}

/// Lifecycle state of a job.
///
/// ```text
/// Queued -> Admitted -> Running <-> Paused
///                       Running -> Finished | Failed -> Removed
/// any non-terminal -> Stopping -> Removed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Admitted,
    Running,
    Paused,
    Stopping,
    Finished,
    Failed,
    Removed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Admitted => "admitted",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Removed => "removed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Removed)
    }

    /// States in which the job holds an admission slot.
    pub fn holds_slot(self) -> bool {
        matches!(
            self,
            Self::Admitted | Self::Running | Self::Paused | Self::Stopping
        )
    }

    /// Whether `self -> next` is an edge of the lifecycle.
    ///
    /// Re-entering a terminal state is allowed so callers can treat it as a no-op.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Queued, Admitted) | (Admitted, Running) => true,
            (Running, Paused) | (Paused, Running) => true,
            (Running, Finished) | (Running, Failed) | (Paused, Failed) => true,
            (Queued | Admitted | Running | Paused, Stopping) => true,
            (Stopping | Finished | Failed, Removed) => true,
            (Finished, Finished) | (Failed, Failed) | (Removed, Removed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a job came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "parent")]
pub enum JobOrigin {
    Direct,
    Folder(JobId),
    WatchFolder(JobId),
}

impl JobOrigin {
    pub fn parent(self) -> Option<JobId> {
        match self {
            Self::Direct => None,
            Self::Folder(id) | Self::WatchFolder(id) => Some(id),
        }
    }

    pub fn is_watch_folder(self) -> bool {
        matches!(self, Self::WatchFolder(_))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("recursive scanning only applies to folder jobs")]
    RecursiveStandard,
    #[error("input path is empty")]
    EmptyInput,
    #[error("output path is empty")]
    EmptyOutput,
}

/// Everything the scheduler needs to know about one encode request.
///
/// `encoder_args` are built outside the scheduler and passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub kind: JobKind,
    pub codec: CodecFamily,
    /// Source file, or the directory for folder kinds.
    pub input: PathBuf,
    /// Destination file, or the output directory for folder kinds.
    pub output: PathBuf,
    #[serde(default)]
    pub encoder_args: Vec<String>,
    /// Extension given to outputs of derived child jobs.
    #[serde(default = "default_container")]
    pub container: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default = "default_origin")]
    pub origin: JobOrigin,
}

fn default_container() -> String {
    "mkv".to_string()
}

fn default_origin() -> JobOrigin {
    JobOrigin::Direct
}

impl JobSpec {
    pub fn standard(input: impl Into<PathBuf>, output: impl Into<PathBuf>, codec: CodecFamily) -> Self {
        Self {
            kind: JobKind::Standard,
            codec,
            input: input.into(),
            output: output.into(),
            encoder_args: Vec::new(),
            container: default_container(),
            recursive: false,
            origin: JobOrigin::Direct,
        }
    }

    pub fn folder(
        dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        codec: CodecFamily,
        recursive: bool,
    ) -> Self {
        Self {
            kind: JobKind::Folder,
            recursive,
            ..Self::standard(dir, output_dir, codec)
        }
    }

    pub fn watch_folder(
        dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        codec: CodecFamily,
        recursive: bool,
    ) -> Self {
        Self {
            kind: JobKind::WatchFolder,
            recursive,
            ..Self::standard(dir, output_dir, codec)
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.encoder_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.input.as_os_str().is_empty() {
            return Err(SpecError::EmptyInput);
        }
        if self.output.as_os_str().is_empty() {
            return Err(SpecError::EmptyOutput);
        }
        if self.recursive && !self.kind.is_driver() {
            return Err(SpecError::RecursiveStandard);
        }
        Ok(())
    }

    /// Derive the standard job encoding `file`, found under this folder job's input.
    ///
    /// The output mirrors the file's position relative to the watched root.
    pub fn child_for(&self, parent: JobId, file: &Path) -> JobSpec {
        let relative = file.strip_prefix(&self.input).unwrap_or(file);
        let mut output = self.output.join(relative);
        output.set_extension(&self.container);

        let origin = match self.kind {
            JobKind::WatchFolder => JobOrigin::WatchFolder(parent),
            _ => JobOrigin::Folder(parent),
        };

        JobSpec {
            kind: JobKind::Standard,
            codec: self.codec,
            input: file.to_path_buf(),
            output,
            encoder_args: self.encoder_args.clone(),
            container: self.container.clone(),
            recursive: false,
            origin,
        }
    }
}
