//! Command backends that run provisioning scripts.
//!
//! A [`CommandExecutor`] runs one command line with a set of injected
//! environment variables and returns the combined stdout/stderr.  Two
//! backends exist:
//!
//! * [`LocalExecutor`]: `bash -ec` on this host.
//! * [`SshExecutor`]: the same command line on a remote host over SSH.
//!
//! Every failure (spawn, dial, auth, non-zero exit) is reported as one opaque
//! [`ExecError`]; callers must not branch on its contents.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

mod local;
mod ssh;

pub use local::LocalExecutor;
pub use ssh::SshExecutor;

/// Environment variables handed to a script, ordered by name.
pub type EnvRequest = BTreeMap<String, String>;

/// Failure of a command execution.
///
/// `output` holds whatever the command printed before failing so the caller
/// can log it; it is never forwarded to CSI clients.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct ExecError {
    pub reason: String,
    pub output: Vec<u8>,
}

impl ExecError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            output: Vec::new(),
        }
    }

    pub(crate) fn with_output(reason: impl Into<String>, output: Vec<u8>) -> Self {
        Self {
            reason: reason.into(),
            output,
        }
    }

    /// Output decoded lossily, for log fields.
    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Runs a command line with injected environment variables.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute `command` with `env` and return its combined output.
    async fn execute(&self, command: &str, env: &EnvRequest) -> Result<Vec<u8>, ExecError>;
}

/// Render `env` as `export K=V;` statements followed by `command`.
///
/// Values are inserted verbatim.  A value containing shell metacharacters
/// is interpreted by the remote shell.
pub(crate) fn command_with_exports(command: &str, env: &EnvRequest) -> String {
    let mut line = String::from("set -e;");
    for (key, value) in env {
        line.push_str(&format!("export {key}={value};"));
    }
    line.push_str(command);
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exports_are_prepended_in_name_order() {
        let env = EnvRequest::from([
            ("CSI_VOLUME_ID".to_owned(), "pvc-1".to_owned()),
            ("CSI_CAPACITY_BYTES".to_owned(), "1024".to_owned()),
        ]);
        assert_eq!(
            command_with_exports("sh create.sh", &env),
            "set -e;export CSI_CAPACITY_BYTES=1024;export CSI_VOLUME_ID=pvc-1;sh create.sh"
        );
    }

    #[test]
    fn empty_env_keeps_command() {
        assert_eq!(
            command_with_exports("true", &EnvRequest::new()),
            "set -e;true"
        );
    }
}
