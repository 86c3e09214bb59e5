use std::time::Duration;

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on how long a stop waits for the encoder to exit.
    pub stop_grace: Duration,
    /// Delay between two scans of a watched folder.
    pub watch_poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(10),
            watch_poll_interval: Duration::from_secs(5),
        }
    }
}
