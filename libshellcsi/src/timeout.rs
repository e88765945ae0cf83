//! Deadline for actions that may hang, such as an NFS mount against an
//! unreachable server.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinError;
use tracing::warn;

/// Run `action` on its own task and wait at most `timeout` for it.
///
/// When the deadline passes first, the error produced by `on_timeout` is
/// returned and the task is detached, not aborted: it runs to completion and
/// its result is dropped.  A timeout therefore means the outcome is unknown.
pub async fn run_with_timeout<F, T, E>(
    timeout: Duration,
    action: F,
    on_timeout: impl FnOnce() -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: From<JoinError> + Send + 'static,
{
    let handle = tokio::spawn(action);
    match tokio::time::timeout(timeout, handle).await {
        Ok(joined) => joined?,
        Err(_) => {
            warn!(?timeout, "action timed out, leaving it running in the background");
            Err(on_timeout())
        }
    }
}
