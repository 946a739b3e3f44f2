//! Action handlers and command execution
//!
//! `Send` actions dispatch a payload to a registered [`ActionHandler`];
//! `Execute` actions run a command looked up in a workflow-adjacent commands
//! file. The command runner merges stderr into stdout, enforces the
//! configured timeout with a force kill, and treats any non-zero exit as a
//! failure.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::state::Context;

/// Errors from action dispatch or command execution.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Unknown action handler '{0}'")]
    UnknownHandler(String),
    #[error("Unknown command '{0}'")]
    UnknownCommand(String),
    #[error("Command timed out after {0:?}")]
    CommandTimeout(Duration),
    #[error("Command exited with status {status}: {output}")]
    CommandFailed { status: i32, output: String },
    #[error("Handler error: {0}")]
    Handler(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Execute actions are not permitted on this executor")]
    ExecuteForbidden,
}

/// A registered callable consuming a resolved payload.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(
        &self,
        payload: &HashMap<String, Value>,
        context: &Context,
    ) -> Result<Value, ActionError>;
}

/// Lookup table from handler id to handler.
#[derive(Default)]
pub struct ActionHandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl ActionHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.write().insert(id.into(), handler);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.read().get(id).cloned()
    }
}

/// One entry in the commands file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    /// Shell command line; placeholders are resolved before spawn.
    pub command: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default = "default_command_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_command_timeout_ms() -> u64 {
    60_000
}

/// Commands available to `Execute` actions, loaded from a JSON file that
/// lives next to the workflow definition.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, CommandSpec>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(commands: HashMap<String, CommandSpec>) -> Self {
        Self { commands }
    }

    /// Load `{"command-id": {command, environment?, timeoutMs?}, ...}`.
    pub fn load(path: &Path) -> Result<Self, ActionError> {
        let raw = std::fs::read_to_string(path)?;
        let commands: HashMap<String, CommandSpec> = serde_json::from_str(&raw)
            .map_err(|e| ActionError::Handler(format!("invalid commands file: {e}")))?;
        Ok(Self { commands })
    }

    pub fn get(&self, id: &str) -> Option<&CommandSpec> {
        self.commands.get(id)
    }
}

/// Spawn a resolved command line, merging stderr into stdout and enforcing
/// the command's timeout with a kill.
pub async fn run_command(spec: &CommandSpec, resolved: &str) -> Result<String, ActionError> {
    let timeout = Duration::from_millis(spec.timeout_ms);

    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c")
        .arg(resolved)
        .envs(&spec.environment)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn()?;
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            // kill_on_drop reaps the process when the future is dropped.
            warn!(timeout_ms = spec.timeout_ms, "command timed out, killing");
            return Err(ActionError::CommandTimeout(timeout));
        }
    };

    let mut merged = String::from_utf8_lossy(&output.stdout).into_owned();
    merged.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        return Err(ActionError::CommandFailed {
            status: output.status.code().unwrap_or(-1),
            output: merged,
        });
    }
    Ok(merged)
}
