//! Fallback handler for custom task types: runs payload `script` via `sh -c`

use super::{TaskExecutionContext, TaskHandler};
use crate::models::Task;
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptHandler;

#[async_trait]
impl TaskHandler for ScriptHandler {
    async fn handle(&self, task: &Task, context: &TaskExecutionContext) -> anyhow::Result<Value> {
        let Some(script) = task.payload.get("script").and_then(Value::as_str) else {
            bail!(
                "No handler registered for task type '{}' and no script provided",
                task.task_type
            );
        };

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(script)
            .env("FLEET_TASK_ID", &task.id)
            .env("FLEET_TASK_TYPE", task.task_type.as_str())
            .env("FLEET_ORCHESTRATION_ID", context.orchestration_id.to_string())
            .env("FLEET_ATTEMPT", context.attempt.to_string())
            .kill_on_drop(true);
        if let Some(repository) = &task.repository {
            command.env("FLEET_REPOSITORY", repository);
        }
        if let Some(dir) = task.payload.get("working_dir").and_then(Value::as_str) {
            command.current_dir(dir);
        }

        debug!(task_id = %task.id, "Running task script");
        let output = command
            .output()
            .await
            .with_context(|| format!("failed to spawn script for task '{}'", task.id))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |code| code.to_string());
            bail!("Script exited with code {code}: {stderr}");
        }

        Ok(json!({
            "exit_code": output.status.code(),
            "stdout": stdout,
            "stderr": stderr,
        }))
    }
}
