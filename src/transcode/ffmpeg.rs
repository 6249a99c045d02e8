//! ffmpeg as an external transcoder
//!
//! ffmpeg reads the re-muxed FLV stream on stdin and writes raw PCM
//! (s16le, mono, 16 kHz) on stdout. Its stderr is only ever logged.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;

use crate::error::{PipelineError, Result};

use super::{ProcessControl, ProcessExit, Transcoder, TranscoderProcess};

pub const FFMPEG_PROGRAM: &str = "ffmpeg";

/// flv on stdin -> s16le 16 kHz mono on stdout, no input buffering
pub const FFMPEG_ARGS: &[&str] = &[
    "-hide_banner",
    "-loglevel",
    "warning",
    "-fflags",
    "nobuffer",
    "-flags",
    "low_delay",
    "-f",
    "flv",
    "-i",
    "pipe:0",
    "-vn",
    "-acodec",
    "pcm_s16le",
    "-ac",
    "1",
    "-ar",
    "16000",
    "-f",
    "s16le",
    "pipe:1",
];

/// Time allowed for the stderr logger to drain after the process exits
const STDERR_DRAIN: Duration = Duration::from_secs(1);

/// Launches one ffmpeg process per connection
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: String,
    args: Vec<String>,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self {
            program: FFMPEG_PROGRAM.to_string(),
            args: FFMPEG_ARGS.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a different program with the same stdin/stdout contract
    pub fn with_command(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(|a| a.as_str()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Transcoder for FfmpegTranscoder {
    fn start(&self) -> Result<TranscoderProcess> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(PipelineError::TranscoderStart)?;

        let pid = child.id();
        let stdin = child.stdin.take().ok_or_else(|| pipe_error("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| pipe_error("stdout"))?;
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(log_stderr(stderr, pid)));

        tracing::info!(
            "Transcoder started: pid={:?} (stdin=flv, stdout=s16le@16kHz mono)",
            pid
        );
        tracing::debug!("Transcoder command: {}", self.command_line());

        Ok(TranscoderProcess::new(
            Box::new(stdin),
            Box::new(stdout),
            Box::new(ChildControl { child, stderr_task }),
        ))
    }
}

fn pipe_error(which: &str) -> PipelineError {
    PipelineError::TranscoderStart(std::io::Error::other(format!(
        "{} pipe unavailable",
        which
    )))
}

/// Forward every stderr line to the log
async fn log_stderr(stderr: ChildStderr, pid: Option<u32>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if !line.is_empty() {
                    tracing::warn!(target: "transcoder", pid = ?pid, "{}", line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(target: "transcoder", pid = ?pid, "stderr closed: {}", e);
                break;
            }
        }
    }
}

struct ChildControl {
    child: Child,
    stderr_task: Option<JoinHandle<()>>,
}

#[async_trait]
impl ProcessControl for ChildControl {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> std::io::Result<ProcessExit> {
        let status = self.child.wait().await?;
        if let Some(task) = self.stderr_task.take() {
            if tokio::time::timeout(STDERR_DRAIN, task).await.is_err() {
                tracing::debug!("Transcoder stderr still open after exit");
            }
        }
        Ok(ProcessExit {
            code: status.code(),
            killed: false,
        })
    }

    fn start_kill(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }
}
