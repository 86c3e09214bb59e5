//! ffmpeg-backed [`EncoderProcessRunner`].

use std::collections::VecDeque;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use transq_core::{
    CodecFamily, EncodeRequest, EncoderProcessRunner, ExitStatus, JobId, JobSpec, PauseGate,
    RunnerError,
};

use crate::progress::ProgressParser;
use crate::{TranscoderConfig, ffprobe};

/// Runs one ffmpeg process per job and reports its `-progress` output.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    config: TranscoderConfig,
}

impl FfmpegRunner {
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }

    /// Park the process while the gate is closed. Returns true if cancelled meanwhile.
    async fn hold(&self, child: &Child, gate: &PauseGate, cancel: &CancellationToken) -> bool {
        let pid = child.id();
        suspend(pid);
        let cancelled = tokio::select! {
            _ = gate.wait_open() => false,
            _ = cancel.cancelled() => true,
        };
        resume(pid);
        cancelled
    }

    async fn terminate(&self, child: &mut Child, job_id: JobId) {
        if let Err(e) = child.start_kill() {
            debug!(job_id = %job_id, error = %e, "encoder already gone");
        }
        match tokio::time::timeout(self.config.stop_grace, child.wait()).await {
            Ok(Ok(status)) => info!(job_id = %job_id, %status, "encoder terminated"),
            Ok(Err(e)) => warn!(job_id = %job_id, error = %e, "failed to reap encoder"),
            Err(_) => warn!(job_id = %job_id, "encoder did not exit within grace period"),
        }
    }
}

#[async_trait::async_trait]
impl EncoderProcessRunner for FfmpegRunner {
    async fn run(
        &self,
        request: &EncodeRequest,
        cancel: CancellationToken,
        gate: PauseGate,
    ) -> Result<ExitStatus, RunnerError> {
        let spec = &request.spec;
        let job_id = request.job_id;

        if let Some(parent) = spec.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let duration = match ffprobe::probe_duration(&self.config.ffprobe_path, &spec.input).await
        {
            Ok(d) => Some(d),
            Err(e) => {
                debug!(job_id = %job_id, error = %e, "duration unknown, progress percent disabled");
                None
            }
        };

        let args = build_args(spec);
        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunnerError::Spawn(format!("{}: {e}", self.config.ffmpeg_path.display())))?;
        info!(job_id = %job_id, ffmpeg_path = ?self.config.ffmpeg_path, ?args, "spawned ffmpeg");

        let stderr_tail = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_tail(stderr, self.config.stderr_tail_lines)));
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::Spawn("stdout was not captured".into()))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut parser = ProgressParser::new(duration);

        loop {
            if !gate.is_open() {
                if self.hold(&child, &gate, &cancel).await {
                    self.terminate(&mut child, job_id).await;
                    return Ok(ExitStatus::Terminated);
                }
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.terminate(&mut child, job_id).await;
                    return Ok(ExitStatus::Terminated);
                }
                _ = gate.wait_closed() => {}
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(progress) = parser.feed(&line) {
                            request.progress.report(&progress);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "lost ffmpeg progress stream");
                        break;
                    }
                },
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                self.terminate(&mut child, job_id).await;
                return Ok(ExitStatus::Terminated);
            }
            status = child.wait() => status?,
        };

        let tail = match stderr_tail {
            Some(handle) => handle.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if status.success() {
            info!(job_id = %job_id, "ffmpeg finished");
            Ok(ExitStatus::Success)
        } else {
            let reason = failure_reason(&tail, status.code());
            warn!(job_id = %job_id, code = ?status.code(), %reason, "ffmpeg failed");
            Ok(ExitStatus::Failed {
                code: status.code(),
                reason,
            })
        }
    }
}

/// Build the ffmpeg command line for a job.
///
/// Encoder arguments come pre-built from the caller; only the input, the
/// output and the progress plumbing are added here.
pub fn build_args(spec: &JobSpec) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-y".into(),
        "-nostdin".into(),
        "-nostats".into(),
        "-progress".into(),
        "pipe:1".into(),
    ];

    args.extend(["-i".into(), spec.input.to_string_lossy().into_owned()]);

    if spec.codec == CodecFamily::Copy && spec.encoder_args.is_empty() {
        args.extend(["-map".into(), "0".into(), "-c".into(), "copy".into()]);
    }
    args.extend(spec.encoder_args.iter().cloned());

    args.push(spec.output.to_string_lossy().into_owned());
    args
}

/// The kept stderr tail, oldest line first, or the exit code when ffmpeg said nothing.
fn failure_reason(stderr_tail: &[String], code: Option<i32>) -> String {
    if !stderr_tail.is_empty() {
        return stderr_tail
            .iter()
            .map(|line| line.trim())
            .collect::<Vec<_>>()
            .join("\n");
    }
    match code {
        Some(code) => format!("ffmpeg exited with code {code}"),
        None => "ffmpeg was killed by a signal".to_string(),
    }
}

async fn collect_tail(stderr: ChildStderr, keep: usize) -> Vec<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(keep);
    while let Ok(Some(line)) = lines.next_line().await {
        if keep == 0 || line.trim().is_empty() {
            continue;
        }
        if tail.len() == keep {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into()
}

#[cfg(unix)]
fn suspend(pid: Option<u32>) {
    send_signal(pid, libc::SIGSTOP, "SIGSTOP");
}

#[cfg(unix)]
fn resume(pid: Option<u32>) {
    send_signal(pid, libc::SIGCONT, "SIGCONT");
}

#[cfg(unix)]
fn send_signal(pid: Option<u32>, signal: libc::c_int, name: &'static str) {
    let Some(pid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc == 0 {
        debug!(pid, signal = name, "signalled encoder");
    } else {
        let error = std::io::Error::last_os_error();
        warn!(pid, signal = name, %error, "failed to signal encoder");
    }
}

// Elsewhere the gate alone holds progress back.
#[cfg(not(unix))]
fn suspend(_pid: Option<u32>) {}

#[cfg(not(unix))]
fn resume(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use transq_core::interfaces::detached_observer;
    use transq_core::ProgressReporter;

    fn request(spec: JobSpec) -> EncodeRequest {
        let job_id = JobId::new();
        EncodeRequest {
            job_id,
            spec,
            progress: ProgressReporter::new(job_id, detached_observer()),
        }
    }

    fn runner_with(ffmpeg: &str) -> FfmpegRunner {
        FfmpegRunner::new(TranscoderConfig {
            ffmpeg_path: PathBuf::from(ffmpeg),
            ffprobe_path: PathBuf::from("/nonexistent/transq-ffprobe"),
            stop_grace: Duration::from_secs(2),
            ..TranscoderConfig::default()
        })
    }

    fn scratch_output() -> PathBuf {
        std::env::temp_dir()
            .join(format!("transq_runner_{}", std::process::id()))
            .join("out.mkv")
    }

    #[test]
    fn args_wrap_caller_encoder_settings() {
        let spec = JobSpec::standard("/in/a.mkv", "/out/a.mkv", CodecFamily::X265)
            .with_args(["-c:v", "libx265", "-crf", "22"]);
        let args = build_args(&spec);
        assert_eq!(&args[..6], &["-hide_banner", "-y", "-nostdin", "-nostats", "-progress", "pipe:1"]);
        assert_eq!(&args[6..8], &["-i", "/in/a.mkv"]);
        assert_eq!(&args[8..12], &["-c:v", "libx265", "-crf", "22"]);
        assert_eq!(args.last().map(String::as_str), Some("/out/a.mkv"));
    }

    #[test]
    fn copy_without_args_maps_all_streams() {
        let spec = JobSpec::standard("/in/a.mkv", "/out/a.mp4", CodecFamily::Copy);
        let args = build_args(&spec);
        assert!(args.windows(2).any(|w| w == ["-c", "copy"]));
    }

    #[test]
    fn failure_reason_keeps_the_whole_tail() {
        let tail = [
            "[libx264 @ 0x55] height not divisible by 2 (1920x1081)".to_string(),
            "Error initializing output stream 0:0 ".to_string(),
            "Conversion failed!".to_string(),
        ];
        assert_eq!(
            failure_reason(&tail, Some(1)),
            "[libx264 @ 0x55] height not divisible by 2 (1920x1081)\n\
             Error initializing output stream 0:0\n\
             Conversion failed!"
        );
        assert_eq!(failure_reason(&[], Some(69)), "ffmpeg exited with code 69");
        assert_eq!(failure_reason(&[], None), "ffmpeg was killed by a signal");
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let runner = runner_with("/nonexistent/transq-ffmpeg");
        let req = request(JobSpec::standard("/in/a.mkv", scratch_output(), CodecFamily::X264));
        let result = runner
            .run(&req, CancellationToken::new(), PauseGate::new())
            .await;
        assert!(matches!(result, Err(RunnerError::Spawn(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_reported_as_failure() {
        let runner = runner_with("false");
        let req = request(JobSpec::standard("/in/a.mkv", scratch_output(), CodecFamily::X264));
        let status = runner
            .run(&req, CancellationToken::new(), PauseGate::new())
            .await
            .unwrap();
        assert!(matches!(status, ExitStatus::Failed { code: Some(1), .. }));
    }

    #[cfg(target_os = "linux")]
    fn process_state(pid: u32) -> Option<char> {
        let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        stat.rsplit_once(") ")?.1.chars().next()
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn suspend_and_resume_signal_the_process() {
        let mut child = Command::new("sleep").arg("30").kill_on_drop(true).spawn().unwrap();
        let pid = child.id().unwrap();

        suspend(Some(pid));
        let mut stopped = false;
        for _ in 0..100 {
            if process_state(pid) == Some('T') {
                stopped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(stopped, "encoder was not stopped");

        resume(Some(pid));
        let mut continued = false;
        for _ in 0..100 {
            if process_state(pid).is_some_and(|s| s != 'T') {
                continued = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(continued, "encoder was not continued");

        child.kill().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_the_process() {
        // `yes` never exits on its own and floods stdout like a progress stream.
        let runner = runner_with("yes");
        let req = request(JobSpec::standard("/in/a.mkv", scratch_output(), CodecFamily::X264));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let status = tokio::time::timeout(
            Duration::from_secs(5),
            runner.run(&req, cancel, PauseGate::new()),
        )
        .await
        .expect("runner should stop promptly")
        .unwrap();
        assert_eq!(status, ExitStatus::Terminated);
    }
}
