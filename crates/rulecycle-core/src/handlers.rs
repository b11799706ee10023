//! Built-in handlers selectable from configuration.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::registry::{ActionRegistry, Handler};
use crate::shell::run_shell;

// ---------------------------------------------------------------------------
// HandlerSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerSpec {
    /// Run a shell command; nonzero exit or timeout is a failure.
    Command {
        command: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    /// Append one line to a file, creating it if needed.
    AppendFile { path: PathBuf, line: String },
    /// Emit an info-level log event and succeed.
    Log { message: String },
}

impl HandlerSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerSpec::Command { .. } => "command",
            HandlerSpec::AppendFile { .. } => "append_file",
            HandlerSpec::Log { .. } => "log",
        }
    }

    pub fn build(&self, action_id: &str) -> Arc<dyn Handler> {
        match self {
            HandlerSpec::Command {
                command,
                timeout_secs,
            } => Arc::new(CommandHandler {
                action_id: action_id.to_string(),
                command: command.clone(),
                timeout: timeout_secs.map(Duration::from_secs),
            }),
            HandlerSpec::AppendFile { path, line } => Arc::new(AppendFileHandler {
                action_id: action_id.to_string(),
                path: path.clone(),
                line: line.clone(),
            }),
            HandlerSpec::Log { message } => Arc::new(LogHandler {
                action_id: action_id.to_string(),
                message: message.clone(),
            }),
        }
    }
}

impl ActionRegistry {
    /// Build a registry from configured handler specs.
    pub fn from_specs(specs: &BTreeMap<String, HandlerSpec>) -> Result<Self> {
        let mut reg = ActionRegistry::new();
        for (id, spec) in specs {
            reg.register(id.clone(), spec.build(id))?;
        }
        Ok(reg)
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub struct CommandHandler {
    action_id: String,
    command: String,
    timeout: Option<Duration>,
}

impl Handler for CommandHandler {
    fn run(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(Error::Action {
                action: self.action_id.clone(),
                reason: "command is empty".into(),
            });
        }
        let outcome = run_shell(&self.command, self.timeout);
        if outcome.success() {
            tracing::debug!(action_id = %self.action_id, "command finished");
            Ok(())
        } else {
            Err(Error::Action {
                action: self.action_id.clone(),
                reason: outcome.describe(),
            })
        }
    }
}

pub struct AppendFileHandler {
    action_id: String,
    path: PathBuf,
    line: String,
}

impl Handler for AppendFileHandler {
    fn run(&self) -> Result<()> {
        let fail = |e: std::io::Error| Error::Action {
            action: self.action_id.clone(),
            reason: format!("{}: {e}", self.path.display()),
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(fail)?;
            }
        }
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(fail)?;
        writeln!(f, "{}", self.line).map_err(fail)?;
        Ok(())
    }
}

pub struct LogHandler {
    action_id: String,
    message: String,
}

impl Handler for LogHandler {
    fn run(&self) -> Result<()> {
        tracing::info!(action_id = %self.action_id, "{}", self.message);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
