//! Mount primitives used by the node service.
//!
//! [`Mounter`] is the seam between the node logic and the kernel.
//! [`SystemMounter`] delegates NFS mounts to the `mount` helper (the kernel
//! NFS client needs the option parsing `mount.nfs` performs) and calls
//! `umount(2)` directly.

use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::mount::MntFlags;
use tracing::{debug, info, warn};

use crate::timeout::run_with_timeout;

/// Kernel mount operations.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Mount `source` at `target` with filesystem type `fs_type`.
    async fn mount(
        &self,
        source: &str,
        target: &str,
        fs_type: &str,
        options: &[String],
    ) -> io::Result<()>;

    /// Unmount `target`.
    async fn unmount(&self, target: &str) -> io::Result<()>;

    /// Whether [`Self::force_unmount`] is available on this platform.
    fn supports_force_unmount(&self) -> bool {
        false
    }

    /// Unmount `target` even if the server is unreachable.
    async fn force_unmount(&self, target: &str) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("force unmount of {target} is not supported"),
        ))
    }

    /// Cheap check: `true` when `path` lives on the same device as its
    /// parent.  Bind mounts of the same device are not detected.  Fails with
    /// [`io::ErrorKind::NotFound`] when `path` does not exist.
    async fn is_likely_not_mount_point(&self, path: &str) -> io::Result<bool>;

    /// Thorough check against the mount table.
    async fn is_mount_point(&self, path: &str) -> io::Result<bool>;
}

/// [`Mounter`] for the host this process runs on.
#[derive(Debug, Default, Clone)]
pub struct SystemMounter;

impl SystemMounter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Mounter for SystemMounter {
    async fn mount(
        &self,
        source: &str,
        target: &str,
        fs_type: &str,
        options: &[String],
    ) -> io::Result<()> {
        let mut cmd = tokio::process::Command::new("mount");
        cmd.arg("-t").arg(fs_type);
        if !options.is_empty() {
            cmd.arg("-o").arg(options.join(","));
        }
        cmd.arg(source).arg(target);
        debug!(?cmd, "running mount helper");

        let output = cmd.output().await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        let lowered = stderr.to_lowercase();
        let kind = if lowered.contains("permission denied")
            || lowered.contains("access denied")
            || lowered.contains("operation not permitted")
        {
            io::ErrorKind::PermissionDenied
        } else {
            io::ErrorKind::Other
        };
        Err(io::Error::new(
            kind,
            format!("mount {source} at {target} failed ({}): {stderr}", output.status),
        ))
    }

    async fn unmount(&self, target: &str) -> io::Result<()> {
        let path = target.to_owned();
        tokio::task::spawn_blocking(move || nix::mount::umount(path.as_str()))
            .await?
            .map_err(io::Error::from)
    }

    fn supports_force_unmount(&self) -> bool {
        cfg!(target_os = "linux")
    }

    async fn force_unmount(&self, target: &str) -> io::Result<()> {
        let path = target.to_owned();
        tokio::task::spawn_blocking(move || {
            nix::mount::umount2(path.as_str(), MntFlags::MNT_FORCE)
        })
        .await?
        .map_err(io::Error::from)
    }

    async fn is_likely_not_mount_point(&self, path: &str) -> io::Result<bool> {
        let meta = tokio::fs::metadata(path).await?;
        let Some(parent) = Path::new(path).parent() else {
            // The root directory is always a mount point.
            return Ok(false);
        };
        let parent_meta = tokio::fs::metadata(parent).await?;
        Ok(meta.dev() == parent_meta.dev())
    }

    async fn is_mount_point(&self, path: &str) -> io::Result<bool> {
        let resolved = match tokio::fs::canonicalize(path).await {
            Ok(p) => p.to_string_lossy().into_owned(),
            Err(_) => path.to_owned(),
        };
        let table = tokio::fs::read_to_string("/proc/self/mounts").await?;
        Ok(mount_table_contains(&table, &resolved))
    }
}

/// `true` if a line of a `/proc/self/mounts`-formatted `table` has
/// `mount_point` as its second field.
fn mount_table_contains(table: &str, mount_point: &str) -> bool {
    // Format: <device> <mountpoint> <fstype> <options> <dump> <pass>
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|field| unescape_mount_field(field) == mount_point)
}

/// Decode the octal escapes (`\040` for space, etc.) used in the mount table.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..=i + 3].iter().all(|b| (b'0'..=b'7').contains(b));
        let code = escaped.then(|| {
            bytes[i + 1..=i + 3]
                .iter()
                .fold(0u16, |acc, b| acc * 8 + u16::from(b - b'0'))
        });
        if let Some(Ok(decoded)) = code.map(u8::try_from) {
            out.push(decoded);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Unmount `target` if it is mounted and remove the directory.
///
/// A missing `target` is success.  With `force_after` set, an unmount that
/// has not finished within the budget is followed by a forced unmount; the
/// first attempt keeps running in the background.
pub async fn cleanup_mount_point(
    mounter: &Arc<dyn Mounter>,
    target: &str,
    force_after: Option<Duration>,
) -> io::Result<()> {
    match tokio::fs::symlink_metadata(target).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(%target, "target path does not exist, nothing to clean up");
            return Ok(());
        }
        // Stale NFS handles fail stat; the unmount below still applies.
        Err(e) => warn!(%target, error = %e, "failed to stat target, trying to unmount anyway"),
    }

    if mounter.is_mount_point(target).await? {
        match force_after {
            Some(budget) => {
                let inner = Arc::clone(mounter);
                let path = target.to_owned();
                let attempt = run_with_timeout(
                    budget,
                    async move { inner.unmount(&path).await },
                    || io::Error::new(io::ErrorKind::TimedOut, "unmount timed out"),
                )
                .await;
                match attempt {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                        warn!(%target, ?budget, "unmount timed out, forcing");
                        mounter.force_unmount(target).await?;
                    }
                    Err(e) => return Err(e),
                }
            }
            None => mounter.unmount(target).await?,
        }

        if mounter.is_mount_point(target).await? {
            return Err(io::Error::other(format!("{target} is still mounted")));
        }
        info!(%target, "unmounted");
    } else {
        debug!(%target, "target is not a mount point");
    }

    match tokio::fs::remove_dir(target).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
