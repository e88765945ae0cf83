//! Runs scripts on a remote host over SSH.

use std::io::Read;
use std::net::TcpStream;
use std::sync::Arc;

use async_trait::async_trait;
use ssh2::{ExtendedData, Session};
use tracing::{debug, instrument};

use super::{CommandExecutor, EnvRequest, ExecError, command_with_exports};
use crate::config::SshConfig;

/// Executes commands on a fixed SSH server with public-key authentication.
///
/// Each call dials a fresh connection, opens one session, runs
/// `set -e;export K=V;...;<command>` and disconnects.  The server's host key
/// is not verified.  libssh2 is blocking, so the exchange runs on tokio's
/// blocking pool.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    config: Arc<SshConfig>,
}

impl SshExecutor {
    pub fn new(config: SshConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl CommandExecutor for SshExecutor {
    #[instrument(skip(self, env), fields(server = %self.config.server, vars = env.len()))]
    async fn execute(&self, command: &str, env: &EnvRequest) -> Result<Vec<u8>, ExecError> {
        let config = Arc::clone(&self.config);
        let line = command_with_exports(command, env);
        tokio::task::spawn_blocking(move || run_remote(&config, &line))
            .await
            .map_err(|e| ExecError::new(format!("ssh task failed: {e}")))?
    }
}

fn run_remote(config: &SshConfig, line: &str) -> Result<Vec<u8>, ExecError> {
    let tcp = TcpStream::connect(&config.server)
        .map_err(|e| ExecError::new(format!("failed to dial SSH: {e}")))?;

    let mut session =
        Session::new().map_err(|e| ExecError::new(format!("failed to init SSH: {e}")))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| ExecError::new(format!("SSH handshake failed: {e}")))?;
    session
        .userauth_pubkey_memory(&config.user, None, &config.private_key, None)
        .map_err(|e| ExecError::new(format!("SSH authentication failed: {e}")))?;
    if !session.authenticated() {
        return Err(ExecError::new("SSH authentication failed"));
    }

    let result = run_in_session(&session, line);
    let _ = session.disconnect(None, "command finished", None);
    result
}

fn run_in_session(session: &Session, line: &str) -> Result<Vec<u8>, ExecError> {
    let mut channel = session
        .channel_session()
        .map_err(|e| ExecError::new(format!("failed to create SSH session: {e}")))?;
    channel
        .handle_extended_data(ExtendedData::Merge)
        .map_err(|e| ExecError::new(format!("failed to merge stderr: {e}")))?;
    channel
        .exec(line)
        .map_err(|e| ExecError::new(format!("failed to start remote command: {e}")))?;

    let mut output = Vec::new();
    channel
        .read_to_end(&mut output)
        .map_err(|e| ExecError::new(format!("failed to read remote output: {e}")))?;
    channel
        .wait_close()
        .map_err(|e| ExecError::with_output(format!("SSH channel close failed: {e}"), output.clone()))?;

    let status = channel
        .exit_status()
        .map_err(|e| ExecError::with_output(format!("missing exit status: {e}"), output.clone()))?;
    debug!(status, bytes = output.len(), "remote command finished");

    if status != 0 {
        return Err(ExecError::with_output(
            format!("remote command exited with status {status}"),
            output,
        ));
    }
    Ok(output)
}
