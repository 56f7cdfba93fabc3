use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{parse_payload, require, ActionHandler, ExecutionContext, ExecutionResult, HandlerError};
use crate::models::QueuedAction;

/// Commands that may be requested, matched on the command name or its first two words.
pub const ALLOWED_COMMANDS: &[&str] = &[
    "ls",
    "ps",
    "df",
    "free",
    "uptime",
    "whoami",
    "date",
    "systemctl status",
    "docker ps",
    "docker stats",
];

pub(crate) const SHELL_METACHARACTERS: &[char] = &[';', '|', '&', '$', '`', '<', '>'];

const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
const MAX_COMMAND_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Deserialize)]
struct SystemCommandPayload {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
}

pub(crate) fn is_allowed(command: &str, args: &[String]) -> bool {
    if ALLOWED_COMMANDS.contains(&command) {
        return true;
    }
    match args.first() {
        Some(first) => ALLOWED_COMMANDS.contains(&format!("{command} {first}").as_str()),
        None => false,
    }
}

/// Validates allow-listed commands and reports a simulated run.
///
/// Nothing is spawned: the queue has no sandbox to run host commands in.
pub struct SystemCommandHandler;

#[async_trait]
impl ActionHandler for SystemCommandHandler {
    fn name(&self) -> &str {
        "system_command"
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(5 * 60)
    }

    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        action: &QueuedAction,
    ) -> Result<ExecutionResult, HandlerError> {
        let payload: SystemCommandPayload = parse_payload(action)?;
        require("command", &payload.command)?;

        let tainted = std::iter::once(&payload.command)
            .chain(payload.args.iter())
            .any(|part| part.contains(SHELL_METACHARACTERS));
        if tainted {
            return Err(HandlerError::terminal(
                "COMMAND_REJECTED",
                "shell metacharacters are not allowed",
            ));
        }
        if !is_allowed(&payload.command, &payload.args) {
            return Err(HandlerError::terminal(
                "COMMAND_NOT_ALLOWED",
                format!("command not allowed: {}", payload.command),
            ));
        }
        if payload.working_dir.as_deref().is_some_and(|dir| dir.contains("..")) {
            return Err(HandlerError::terminal(
                "PATH_TRAVERSAL",
                "working_dir must not contain '..'",
            ));
        }

        let timeout_seconds = payload
            .timeout
            .filter(|t| (1..=MAX_COMMAND_TIMEOUT_SECS).contains(t))
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS);
        let command_line = std::iter::once(payload.command.as_str())
            .chain(payload.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        tracing::info!(
            action_id = action.id,
            command = %command_line,
            "Simulating system command"
        );

        Ok(ExecutionResult::succeeded(json!({
            "command": payload.command,
            "args": payload.args,
            "working_dir": payload.working_dir,
            "environment_keys": payload.environment.keys().collect::<Vec<_>>(),
            "timeout_seconds": timeout_seconds,
            "simulated": true,
            "exit_code": 0,
            "stdout": format!("simulated: {command_line}"),
            "stderr": "",
        })))
    }
}
