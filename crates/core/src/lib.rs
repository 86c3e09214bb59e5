pub mod error;
pub mod gate;
pub mod interfaces;
pub mod policy;
pub mod types;

pub use gate::PauseGate;
pub use interfaces::{
    EncodeRequest, EncoderProcessRunner, ExitStatus, HardwareCapabilityProbe, JobObserver,
    PreferencesSource, ProbeError, Progress, ProgressReporter, RunnerError,
};
pub use policy::{ConcurrencyPolicy, GlobalLimit, HardwareLimit, PolicyError};
pub use types::{CodecFamily, JobId, JobKind, JobOrigin, JobSpec, JobState, SpecError};
