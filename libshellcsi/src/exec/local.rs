//! Runs scripts on the local host.

use std::process::Stdio;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{CommandExecutor, EnvRequest, ExecError};

/// Executes commands through `bash -ec` on this host.
///
/// The child inherits the daemon's environment with `env` layered on top.
/// stderr is redirected into stdout inside the shell so the returned bytes
/// keep the order in which the script wrote them.
#[derive(Debug, Default, Clone)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for LocalExecutor {
    #[instrument(skip(self, env), fields(vars = env.len()))]
    async fn execute(&self, command: &str, env: &EnvRequest) -> Result<Vec<u8>, ExecError> {
        let output = tokio::process::Command::new("bash")
            .arg("-ec")
            .arg(format!("exec 2>&1\n{command}"))
            .envs(env)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ExecError::new(format!("failed to spawn bash: {e}")))?;

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        debug!(status = %output.status, bytes = combined.len(), "local command finished");

        if !output.status.success() {
            return Err(ExecError::with_output(
                format!("command exited with {}", output.status),
                combined,
            ));
        }
        Ok(combined)
    }
}
