use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::system_command::SHELL_METACHARACTERS;
use super::{parse_payload, require, ActionHandler, ExecutionContext, ExecutionResult, HandlerError};
use crate::models::QueuedAction;

pub const ALLOWED_SCRIPT_DIRS: &[&str] = &["/opt/pma/scripts/", "/usr/local/bin/pma/", "./scripts/"];
pub const ALLOWED_INTERPRETERS: &[&str] = &["bash", "sh", "python3"];

const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 60;
const MAX_SCRIPT_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Deserialize)]
struct ScriptPayload {
    script_path: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    interpreter: Option<String>,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
}

fn check_path(path: &str) -> Result<(), HandlerError> {
    if path.contains("..") || path.contains('~') {
        return Err(HandlerError::terminal(
            "PATH_TRAVERSAL",
            format!("script path {path} escapes the allowed directories"),
        ));
    }
    if !ALLOWED_SCRIPT_DIRS.iter().any(|dir| path.starts_with(dir)) {
        return Err(HandlerError::terminal(
            "SCRIPT_NOT_ALLOWED",
            format!("script path {path} is outside the allowed directories"),
        ));
    }
    Ok(())
}

/// Validates scripts against the directory allow-list and reports a simulated run.
pub struct ScriptHandler;

#[async_trait]
impl ActionHandler for ScriptHandler {
    fn name(&self) -> &str {
        "script"
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(10 * 60)
    }

    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        action: &QueuedAction,
    ) -> Result<ExecutionResult, HandlerError> {
        let payload: ScriptPayload = parse_payload(action)?;
        require("script_path", &payload.script_path)?;
        check_path(&payload.script_path)?;

        if payload.working_dir.as_deref().is_some_and(|dir| dir.contains("..")) {
            return Err(HandlerError::terminal(
                "PATH_TRAVERSAL",
                "working_dir must not contain '..'",
            ));
        }
        if payload.args.iter().any(|arg| arg.contains(SHELL_METACHARACTERS)) {
            return Err(HandlerError::terminal(
                "COMMAND_REJECTED",
                "shell metacharacters are not allowed",
            ));
        }

        let interpreter = payload.interpreter.as_deref().unwrap_or("bash");
        if !ALLOWED_INTERPRETERS.contains(&interpreter) {
            return Err(HandlerError::terminal(
                "INTERPRETER_NOT_ALLOWED",
                format!("interpreter not allowed: {interpreter}"),
            ));
        }

        let timeout_seconds = payload
            .timeout
            .filter(|t| (1..=MAX_SCRIPT_TIMEOUT_SECS).contains(t))
            .unwrap_or(DEFAULT_SCRIPT_TIMEOUT_SECS);

        tracing::info!(
            action_id = action.id,
            script = %payload.script_path,
            interpreter,
            "Simulating script execution"
        );

        Ok(ExecutionResult::succeeded(json!({
            "script_path": payload.script_path,
            "interpreter": interpreter,
            "args": payload.args,
            "working_dir": payload.working_dir,
            "environment_keys": payload.environment.keys().collect::<Vec<_>>(),
            "timeout_seconds": timeout_seconds,
            "simulated": true,
            "exit_code": 0,
            "stdout": format!("simulated: {interpreter} {}", payload.script_path),
            "stderr": "",
        })))
    }
}
