//! Process channel - launches single-use workers
//!
//! Features:
//! - One process per task, stdin/stdout carry the protocol
//! - Worker stderr forwarded to `tracing`
//! - Exit or closed stdout before a completion surfaces as a channel fault
//!
//! The [`Launcher`] trait is the seam: `ProcessLauncher` is the real thing,
//! anything else (tests, remote runners) can stand in.

use crate::protocol::{decode_line, encode_line, Completion, Dispatch};
use crate::state::WorkerState;
use crate::task::TaskId;
use async_trait::async_trait;
use branchy_foundation::{BranchyConfig, Error, Result, WORKER_ENV};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, trace, warn};

/// Name of the worker binary looked up when none is configured
pub const DEFAULT_WORKER_PROGRAM: &str = "branchy-worker";

/// Launcher trait - implement to run dispatches somewhere else
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Deliver one dispatch and wait for its completion
    async fn launch(&self, dispatch: Dispatch) -> Result<Completion>;

    /// Get launcher name
    fn name(&self) -> &'static str;
}

/// How to start a worker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Worker from the merged configuration, else the `branchy-worker`
    /// binary next to the current executable or on `PATH`
    pub fn discover() -> Result<Self> {
        let config = BranchyConfig::load()?;
        Self::from_config(&config)
    }

    pub fn from_config(config: &BranchyConfig) -> Result<Self> {
        let program = match &config.worker.program {
            Some(program) => program.clone(),
            None => Self::locate().ok_or_else(|| {
                Error::Config(format!(
                    "cannot find the `{}` program; set {} or `[worker] program`",
                    DEFAULT_WORKER_PROGRAM, WORKER_ENV
                ))
            })?,
        };

        Ok(Self {
            program,
            args: config.worker.args.clone(),
        })
    }

    fn locate() -> Option<PathBuf> {
        let file_name = format!("{}{}", DEFAULT_WORKER_PROGRAM, std::env::consts::EXE_SUFFIX);

        // Test and example binaries live one level below the real ones
        if let Ok(exe) = std::env::current_exe() {
            let sibling = exe
                .ancestors()
                .skip(1)
                .take(2)
                .map(|dir| dir.join(&file_name))
                .find(|candidate| candidate.is_file());
            if sibling.is_some() {
                return sibling;
            }
        }

        which::which(DEFAULT_WORKER_PROGRAM).ok()
    }
}

/// Launches each dispatch in a fresh worker process
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: WorkerCommand,
}

impl ProcessLauncher {
    pub fn new(command: WorkerCommand) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }

    fn program(&self) -> &Path {
        &self.command.program
    }
}

fn transition(task_id: TaskId, state: WorkerState) {
    if state.is_terminal() {
        debug!(task = %task_id, state = %state, "Worker finished");
    } else {
        trace!(task = %task_id, state = %state, "Worker state");
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, dispatch: Dispatch) -> Result<Completion> {
        let task_id = dispatch.id;

        let mut cmd = Command::new(self.program());
        cmd.args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Error::ChannelFault(format!(
                "failed to spawn worker {}: {}",
                self.program().display(),
                e
            ))
        })?;
        transition(task_id, WorkerState::Spawned);

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Worker logs
        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    debug!(target: "branchy::worker", task = %task_id, "{}", line);
                }
            });
        }

        // Send the dispatch, then close stdin
        transition(task_id, WorkerState::AwaitingDispatch);
        let line = encode_line(&dispatch)?;
        match stdin {
            Some(mut stdin) => {
                let sent = async {
                    stdin.write_all(line.as_bytes()).await?;
                    stdin.flush().await
                }
                .await;
                if let Err(e) = sent {
                    // The exit status below tells the real story
                    warn!(task = %task_id, "Failed to send dispatch: {}", e);
                }
            }
            None => warn!(task = %task_id, "Worker stdin unavailable"),
        }
        transition(task_id, WorkerState::Executing);

        let mut completion = None;
        if let Some(stdout) = stdout {
            let mut reader = BufReader::new(stdout).lines();
            loop {
                match reader.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match decode_line::<Completion>(&line) {
                        Ok(message) => {
                            completion = Some(message);
                            break;
                        }
                        Err(e) => warn!(task = %task_id, "Ignoring worker output: {}", e),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(task = %task_id, "Worker stdout unreadable: {}", e);
                        break;
                    }
                }
            }
        }

        match completion {
            Some(completion) => {
                transition(task_id, WorkerState::Completed);
                // Worker exits on its own right after replying; reap it off
                // the caller's path
                tokio::spawn(async move {
                    let _ = child.wait().await;
                });
                Ok(completion)
            }
            None => {
                transition(task_id, WorkerState::Crashed);
                let status = match child.wait().await {
                    Ok(status) => status.to_string(),
                    Err(e) => format!("unknown status: {}", e),
                };
                info!(task = %task_id, "Worker ended without a completion ({})", status);
                Err(Error::ChannelFault(format!(
                    "worker {} exited before reporting a result ({})",
                    task_id, status
                )))
            }
        }
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::CallableSource;
    use crate::task::TaskDescriptor;

    fn dispatch() -> Dispatch {
        Dispatch::from(&TaskDescriptor::new(
            CallableSource::Inline {
                source: "|| 1".into(),
            },
            vec![],
            "/tmp/task.rs",
        ))
    }

    #[test]
    fn test_worker_command_builder() {
        let command = WorkerCommand::new("/opt/bin/branchy-worker")
            .arg("--log-level")
            .arg("debug");
        assert_eq!(command.program, PathBuf::from("/opt/bin/branchy-worker"));
        assert_eq!(command.args, vec!["--log-level", "debug"]);
    }

    #[test]
    fn test_from_config_prefers_configured_program() {
        let config = BranchyConfig::parse(
            "[worker]\nprogram = \"/custom/worker\"\nargs = [\"-v\"]",
        )
        .unwrap();
        let command = WorkerCommand::from_config(&config).unwrap();
        assert_eq!(command, WorkerCommand::new("/custom/worker").arg("-v"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_channel_fault() {
        let launcher = ProcessLauncher::new(WorkerCommand::new(
            "/definitely/not/a/branchy-worker",
        ));
        assert_eq!(launcher.name(), "process");

        let err = launcher.launch(dispatch()).await.unwrap_err();
        assert!(err.is_channel_fault(), "{:?}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_silent_exit_is_channel_fault() {
        let launcher = ProcessLauncher::new(WorkerCommand::new("true"));
        let err = launcher.launch(dispatch()).await.unwrap_err();
        assert!(err.is_channel_fault(), "{:?}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reads_completion_from_any_program() {
        // A shell stand-in speaking the protocol
        let launcher = ProcessLauncher::new(
            WorkerCommand::new("sh")
                .arg("-c")
                .arg(r#"read line; echo 'noise'; echo '{"type":"result","value":7}'"#),
        );
        let completion = launcher.launch(dispatch()).await.unwrap();
        assert_eq!(
            completion,
            Completion::Result {
                value: serde_json::json!(7)
            }
        );
    }
}
