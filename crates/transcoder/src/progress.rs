//! Parser for ffmpeg's `-progress` key/value stream.
//!
//! ffmpeg emits a block of `key=value` lines terminated by
//! `progress=continue` (or `progress=end` for the last block).

use transq_core::Progress;

/// Accumulates `-progress` lines into [`Progress`] snapshots.
#[derive(Debug, Default)]
pub struct ProgressParser {
    duration_secs: Option<f64>,
    current: Progress,
}

impl ProgressParser {
    pub fn new(duration_secs: Option<f64>) -> Self {
        Self {
            duration_secs,
            current: Progress::default(),
        }
    }

    /// Feed one line. Returns a snapshot whenever a block completes.
    pub fn feed(&mut self, line: &str) -> Option<Progress> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();
        match key {
            "frame" => {
                if let Ok(frame) = value.parse() {
                    self.current.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    self.current.fps = fps;
                }
            }
            // Despite the name, out_time_ms is also in microseconds.
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.current.out_time_secs = us.max(0) as f64 / 1_000_000.0;
                }
            }
            "speed" => {
                self.current.speed = value.trim_end_matches('x').trim().parse().ok();
            }
            "progress" => {
                self.current.percent = self.duration_secs.map(|total| {
                    if value == "end" {
                        100.0
                    } else {
                        (self.current.out_time_secs / total * 100.0).clamp(0.0, 100.0)
                    }
                });
                return Some(self.current.clone());
            }
            _ => {}
        }
        None
    }
}
