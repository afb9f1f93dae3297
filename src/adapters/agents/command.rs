//! Agent that runs a shell command taken from the task payload.
//!
//! Payload shape:
//!
//! ```json
//! { "command": "make test", "workdir": "/repo", "env": { "RUST_LOG": "debug" } }
//! ```
//!
//! Exit status 0 completes the task with the captured output. A non-zero
//! exit is a transient failure; a command that cannot be spawned is
//! permanent and a payload without `command` is a validation failure.

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::models::{FailureClass, Task};
use crate::domain::ports::{AgentContext, AgentOutcome, AgentRunner};

/// Trailing bytes of stderr kept in a failure message.
const STDERR_TAIL: usize = 2_000;

#[derive(Debug, Clone)]
pub struct CommandAgentConfig {
    /// Shell used to interpret the command
    pub shell: String,
    /// Interval between heartbeats while the command runs
    pub heartbeat_interval: Duration,
    /// Time between SIGTERM and SIGKILL on cancellation
    pub kill_grace: Duration,
}

impl Default for CommandAgentConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            heartbeat_interval: Duration::from_secs(5),
            kill_grace: Duration::from_secs(5),
        }
    }
}

pub struct CommandAgent {
    config: CommandAgentConfig,
}

impl CommandAgent {
    pub fn new(config: CommandAgentConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, task: &Task) -> Result<Command, AgentOutcome> {
        let command = task
            .payload
            .get("command")
            .and_then(Value::as_str)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AgentOutcome::Failure {
                error: "payload has no \"command\" string".to_string(),
                class: FailureClass::Validation,
            })?;

        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("BROOD_TASK_ID", task.id.to_string());

        if let Some(dir) = task.payload.get("workdir").and_then(Value::as_str) {
            cmd.current_dir(dir);
        }
        if let Some(env) = task.payload.get("env").and_then(Value::as_object) {
            for (key, value) in env {
                match value.as_str() {
                    Some(v) => cmd.env(key, v),
                    None => cmd.env(key, value.to_string()),
                };
            }
        }
        Ok(cmd)
    }
}

fn spawn_reader<R>(reader: Option<R>) -> tokio::task::JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[async_trait]
impl AgentRunner for CommandAgent {
    fn name(&self) -> &str {
        "command"
    }

    async fn execute(&self, task: Task, mut ctx: AgentContext) -> AgentOutcome {
        let mut cmd = match self.build_command(&task) {
            Ok(cmd) => cmd,
            Err(outcome) => return outcome,
        };

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return AgentOutcome::permanent(format!("failed to spawn command: {e}")),
        };
        let pid = child.id();
        debug!(task_id = %task.id, ?pid, slot_id = ctx.slot_id, "command started");

        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = ticker.tick() => ctx.heartbeat.beat(),
                () = ctx.cancel.cancelled() => {
                    if let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) {
                        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                            warn!(task_id = %task.id, error = %e, "failed to signal command");
                        }
                    }
                    if tokio::time::timeout(self.config.kill_grace, child.wait()).await.is_err() {
                        let _ = child.kill().await;
                    }
                    return AgentOutcome::transient("command cancelled");
                }
            }
        };

        let stdout = stdout.await.unwrap_or_default();
        let stderr = stderr.await.unwrap_or_default();

        match status {
            Ok(status) if status.success() => {
                let output = serde_json::from_str::<Value>(stdout.trim())
                    .unwrap_or_else(|_| Value::String(stdout.clone()));
                AgentOutcome::success(json!({
                    "exit_code": 0,
                    "output": output,
                    "stderr": stderr,
                }))
            }
            Ok(status) => {
                let code = status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string());
                AgentOutcome::transient(format!(
                    "command exited with {code}: {}",
                    tail(stderr.trim(), STDERR_TAIL)
                ))
            }
            Err(e) => AgentOutcome::transient(format!("failed to wait for command: {e}")),
        }
    }
}
