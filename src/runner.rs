//! Launching the external segmentation tool and streaming its output.
//!
//! [`ProcessRunner`] turns a job's parameters into the tool's argument vector
//! and spawns it. The returned [`RunningProcess`] reads standard output line
//! by line on a separate task, forwarding every line to a [`ProgressSink`]
//! and counting the lines that start with the job's progress marker.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{RunnerConfig, ToolConfig};
use crate::error::JobError;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::state_machine::{PredictParams, TrainParams};
use crate::workspace::Workspace;

/// Upper bound for the output tasks to wind down once the process is gone.
pub const STREAM_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lines of standard error kept for failure messages.
const STDERR_TAIL: usize = 20;

/// Builds and launches invocations of the external tool.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    config: RunnerConfig,
    tool: ToolConfig,
}

impl ProcessRunner {
    pub fn new(config: RunnerConfig, tool: ToolConfig) -> Self {
        Self { config, tool }
    }

    pub fn tool(&self) -> &ToolConfig {
        &self.tool
    }

    /// Fails with a configuration error when no executable or environment is set.
    pub fn validate(&self) -> Result<(), JobError> {
        self.config.validate()
    }

    pub fn predict_args(&self, workspace: &Workspace, params: &PredictParams) -> Vec<String> {
        let mut args = vec![
            "--predict".to_string(),
            "--dir".to_string(),
            path_arg(workspace.temp_dir()),
            "--model".to_string(),
            path_arg(&params.model_path),
            "--resolution".to_string(),
            params.resolution.to_string(),
            "--threshold".to_string(),
            // Debug formatting keeps the decimal point: 1.0 stays "1.0".
            format!("{:?}", params.threshold),
            "--savedir".to_string(),
            path_arg(workspace.predictions_dir()),
        ];
        if self.tool.use_less_memory {
            args.push("--use_less_memory".to_string());
        }
        args
    }

    pub fn train_args(&self, workspace: &Workspace, params: &TrainParams) -> Vec<String> {
        vec![
            "--train".to_string(),
            "--images".to_string(),
            path_arg(workspace.images_dir()),
            "--masks".to_string(),
            path_arg(workspace.masks_dir()),
            "--basedir".to_string(),
            path_arg(workspace.training_root()),
            "--name".to_string(),
            params.model_name.clone(),
            "--basemodel".to_string(),
            params.base_model.to_string(),
            "--epochs".to_string(),
            params.epochs.to_string(),
        ]
    }

    /// Program and full argument vector: interpreter prefix, `-m <module>`, then `args`.
    pub fn command(&self, args: &[String]) -> Result<(PathBuf, Vec<String>), JobError> {
        self.validate()?;
        let (program, mut full) = self.config.command_prefix();
        full.push("-m".to_string());
        full.push(self.tool.module.clone());
        full.extend(args.iter().cloned());
        Ok((program, full))
    }

    /// Spawn the tool without waiting for it.
    pub fn start(&self, args: &[String]) -> Result<RunningProcess, JobError> {
        let (program, full) = self.command(args)?;
        info!(program = %program.display(), args = %full.join(" "), "Launching external tool");

        let mut cmd = Command::new(&program);
        cmd.args(&full)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| JobError::ProcessLaunch {
            program: program.display().to_string(),
            source,
        })?;

        let stdout = child.stdout.take().map(StdoutState::Pending);
        let stderr = child.stderr.take().map(|err| tokio::spawn(drain_stderr(err)));
        Ok(RunningProcess {
            program: program.display().to_string(),
            child,
            completed: Arc::new(AtomicUsize::new(0)),
            stdout,
            stderr,
        })
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

enum StdoutState {
    Pending(tokio::process::ChildStdout),
    Streaming(JoinHandle<Vec<String>>),
}

/// Output captured from a finished process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub lines: Vec<String>,
    pub stderr_tail: Vec<String>,
}

/// A spawned tool invocation.
///
/// Dropping it kills the process.
pub struct RunningProcess {
    program: String,
    child: Child,
    completed: Arc<AtomicUsize>,
    stdout: Option<StdoutState>,
    stderr: Option<JoinHandle<Vec<String>>>,
}

impl RunningProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Marker lines seen so far.
    pub fn completed_units(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// True while the output task is still reading.
    pub fn is_streaming(&self) -> bool {
        matches!(&self.stdout, Some(StdoutState::Streaming(handle)) if !handle.is_finished())
    }

    /// Start forwarding standard output to `sink` on a separate task.
    ///
    /// Lines starting with `marker` advance the completed-units counter. Bytes
    /// that are not UTF-8 are replaced. A read error is reported as
    /// [`ProgressEvent::StreamError`], after which the rest of the output is
    /// discarded unread; the process itself is left alone.
    pub fn stream_output(&mut self, sink: ProgressSink, marker: &str) {
        let Some(StdoutState::Pending(stdout)) = self.stdout.take() else {
            return;
        };
        let marker = marker.to_string();
        let completed = Arc::clone(&self.completed);
        let handle = tokio::spawn(async move {
            let mut log = Vec::new();
            let mut reader = BufReader::new(stdout);
            loop {
                match read_line_lossy(&mut reader).await {
                    Ok(Some(line)) => {
                        let completed_units = if !marker.is_empty() && line.trim_start().starts_with(&marker) {
                            completed.fetch_add(1, Ordering::SeqCst) + 1
                        } else {
                            completed.load(Ordering::SeqCst)
                        };
                        debug!(line = %line, "tool");
                        sink.emit(ProgressEvent::Line {
                            text: line.clone(),
                            completed_units,
                        });
                        log.push(line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Reading tool output failed");
                        sink.emit(ProgressEvent::StreamError(e.to_string()));
                        // Keep the pipe open until EOF so the tool never writes into a closed pipe.
                        if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
                            warn!(error = %e, "Draining tool output failed");
                        }
                        break;
                    }
                }
            }
            log
        });
        self.stdout = Some(StdoutState::Streaming(handle));
    }

    /// Wait for the process to exit, or kill it once `cancel` fires.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> Result<ExitStatus, JobError> {
        let waited = tokio::select! {
            status = self.child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };
        match waited {
            Some(Ok(status)) => {
                debug!(program = %self.program, %status, "External tool exited");
                Ok(status)
            }
            Some(Err(e)) => Err(JobError::ProcessRuntime(format!(
                "failed to wait for {}: {e}",
                self.program
            ))),
            None => {
                self.kill().await;
                Err(JobError::Interrupted)
            }
        }
    }

    /// Terminate the process and make sure the output tasks are gone.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "Process already exited");
        }
        if let Err(e) = self.child.wait().await {
            warn!(error = %e, "Could not reap killed process");
        }
        self.finish().await;
        info!(program = %self.program, "External tool killed");
    }

    /// Join the output tasks, giving up after [`STREAM_JOIN_TIMEOUT`].
    pub async fn finish(&mut self) -> ProcessOutput {
        let lines = match self.stdout.take() {
            Some(StdoutState::Streaming(handle)) => join_bounded(handle, "stdout").await,
            _ => Vec::new(),
        };
        let stderr_tail = match self.stderr.take() {
            Some(handle) => join_bounded(handle, "stderr").await,
            None => Vec::new(),
        };
        ProcessOutput { lines, stderr_tail }
    }
}

async fn join_bounded(mut handle: JoinHandle<Vec<String>>, stream: &str) -> Vec<String> {
    match tokio::time::timeout(STREAM_JOIN_TIMEOUT, &mut handle).await {
        Ok(Ok(lines)) => lines,
        Ok(Err(e)) => {
            warn!(stream, error = %e, "Output task failed");
            Vec::new()
        }
        Err(_) => {
            warn!(stream, "Output task did not finish in time, aborting it");
            handle.abort();
            Vec::new()
        }
    }
}

async fn drain_stderr<R: AsyncRead + Unpin>(stderr: R) -> Vec<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    let mut reader = BufReader::new(stderr);
    loop {
        match read_line_lossy(&mut reader).await {
            Ok(Some(line)) => {
                debug!(line = %line, "tool stderr");
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Reading tool stderr failed");
                if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
                    warn!(error = %e, "Draining tool stderr failed");
                }
                break;
            }
        }
    }
    tail.into()
}

/// Next newline-terminated line without its line ending, decoded lossily.
async fn read_line_lossy<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<Option<String>> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}
