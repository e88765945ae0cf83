//! NFS node backend.
//!
//! [`NfsNode`] implements [`CsiNode`] by mounting the `nfs_server:nfs_path`
//! export recorded in the volume context at the pod's target path.
//!
//! Operations on the same `(volume, target path)` pair are serialized with a
//! non-blocking lock: a second caller gets `Aborted` straight away and is
//! expected to retry.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::config::NodeConfig;
use crate::error::CsiError;
use crate::lock::ResourceLocks;
use crate::mount::{Mounter, SystemMounter, cleanup_mount_point};
use crate::node::CsiNode;
use crate::timeout::run_with_timeout;
use crate::types::*;

/// Budget for a single NFS mount; an unreachable server can hang it.
pub const MOUNT_TIMEOUT: Duration = Duration::from_secs(90);

/// How long a regular unmount may take before it is forced.
pub const UNMOUNT_FORCE_TIMEOUT: Duration = Duration::from_secs(30);

const NFS_FS_TYPE: &str = "nfs";

/// Node service that mounts NFS exports.
pub struct NfsNode {
    config: NodeConfig,
    mounter: Arc<dyn Mounter>,
    /// In-flight publish/unpublish operations, keyed by volume and target.
    locks: ResourceLocks,
    mount_timeout: Duration,
}

impl NfsNode {
    /// Create a node service backed by the host's mount facilities.
    pub fn new(config: NodeConfig) -> Self {
        Self::with_mounter(config, Arc::new(SystemMounter::new()))
    }

    pub fn with_mounter(config: NodeConfig, mounter: Arc<dyn Mounter>) -> Self {
        Self {
            config,
            mounter,
            locks: ResourceLocks::new(),
            mount_timeout: MOUNT_TIMEOUT,
        }
    }

    /// Override [`MOUNT_TIMEOUT`].
    pub fn with_mount_timeout(mut self, timeout: Duration) -> Self {
        self.mount_timeout = timeout;
        self
    }
}

fn lock_key(volume_id: &VolumeId, target_path: &str) -> String {
    format!("{volume_id}-{target_path}")
}

fn required_context<'a>(
    context: &'a std::collections::HashMap<String, String>,
    key: &str,
) -> Result<&'a str, CsiError> {
    context
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CsiError::InvalidArgument(format!("{key} is a required parameter")))
}

/// Map a failed mount onto the CSI status the caller should see.
fn classify_mount_error(e: io::Error) -> CsiError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        CsiError::PermissionDenied(e.to_string())
    } else if e.to_string().to_lowercase().contains("invalid argument") {
        CsiError::InvalidArgument(e.to_string())
    } else {
        CsiError::Internal(e.to_string())
    }
}

/// Set the permission bits of `target` to exactly `mode` unless they already
/// match.
async fn chmod_if_permission_mismatch(target: &str, mode: u32) -> io::Result<()> {
    let meta = tokio::fs::symlink_metadata(target).await?;
    let perm = meta.permissions().mode() & 0o777;
    if perm != mode {
        info!(
            target_path = %target,
            mode = %format!("0{mode:o}"),
            permissions = %format!("0{perm:o}"),
            "chmod",
        );
        tokio::fs::set_permissions(target, std::fs::Permissions::from_mode(mode)).await?;
    } else {
        debug!(target_path = %target, permissions = %format!("0{perm:o}"), "skip chmod");
    }
    Ok(())
}

#[async_trait]
impl CsiNode for NfsNode {
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, target_path = %req.target_path))]
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        let Some(capability) = req.volume_capability.as_ref() else {
            return Err(CsiError::InvalidArgument(
                "volume capability missing in request".into(),
            ));
        };
        if req.volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume ID missing in request".into()));
        }
        let target = req.target_path.as_str();
        if target.is_empty() {
            return Err(CsiError::InvalidArgument("target path not provided".into()));
        }

        let Some(_guard) = self.locks.try_acquire(lock_key(&req.volume_id, target)) else {
            return Err(CsiError::Aborted(format!(
                "volume operation already exists: {}",
                req.volume_id
            )));
        };

        let mut options = capability.mount_flags.clone();
        if req.read_only {
            options.push("ro".to_owned());
        }

        let server = required_context(&req.volume_context, CONTEXT_NFS_SERVER)?;
        let export = required_context(&req.volume_context, CONTEXT_NFS_PATH)?;
        let source = format!("{server}:{export}");

        let mode = self.config.mount_permission;
        let not_mounted = match self.mounter.is_likely_not_mount_point(target).await {
            Ok(not_mounted) => not_mounted,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tokio::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(mode)
                    .create(target)
                    .await
                    .map_err(CsiError::internal)?;
                true
            }
            Err(e) => return Err(CsiError::internal(e)),
        };
        if !not_mounted {
            debug!("target already mounted, assuming idempotent retry");
            return Ok(());
        }

        info!(%source, ?options, "mounting NFS export");
        let mounter = Arc::clone(&self.mounter);
        let (src, dst) = (source.clone(), target.to_owned());
        run_with_timeout(
            self.mount_timeout,
            async move { mounter.mount(&src, &dst, NFS_FS_TYPE, &options).await },
            || io::Error::new(io::ErrorKind::TimedOut, "time out"),
        )
        .await
        .map_err(classify_mount_error)?;

        if mode > 0 {
            chmod_if_permission_mismatch(target, mode)
                .await
                .map_err(CsiError::internal)?;
        } else {
            warn!("skip chmod on target path, mount permission is 0");
        }

        info!(%source, "volume mount succeeded");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError> {
        if volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume ID missing in request".into()));
        }
        if target_path.is_empty() {
            return Err(CsiError::InvalidArgument("target path missing in request".into()));
        }

        let Some(_guard) = self.locks.try_acquire(lock_key(volume_id, target_path)) else {
            return Err(CsiError::Aborted(format!(
                "volume operation already exists: {volume_id}"
            )));
        };

        let force_after = self
            .mounter
            .supports_force_unmount()
            .then_some(UNMOUNT_FORCE_TIMEOUT);
        debug!(force = force_after.is_some(), "unmounting volume");

        cleanup_mount_point(&self.mounter, target_path, force_after)
            .await
            .map_err(|e| {
                CsiError::Internal(format!("failed to unmount target {target_path:?}: {e}"))
            })?;

        info!("volume unpublished");
        Ok(())
    }

    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        Ok(vec![
            NodeCapability::SingleNodeMultiWriter,
            NodeCapability::Unknown,
        ])
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.config.node_id.clone(),
            max_volumes: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;

    use super::*;
    use crate::mount::fake::{FakeMounter, MountAction};

    fn node_config(mount_permission: u32) -> NodeConfig {
        NodeConfig {
            node_id: "test-node".into(),
            mount_permission,
        }
    }

    fn make_node(fake: FakeMounter, mount_permission: u32) -> (NfsNode, Arc<FakeMounter>) {
        let fake = Arc::new(fake);
        let node = NfsNode::with_mounter(node_config(mount_permission), fake.clone());
        (node, fake)
    }

    fn publish_request(target: &Path) -> NodePublishVolumeRequest {
        NodePublishVolumeRequest {
            volume_id: VolumeId::from("v1:test-volume"),
            target_path: target.to_str().unwrap().to_owned(),
            volume_capability: Some(VolumeCapability::default()),
            read_only: false,
            volume_context: HashMap::from([
                (CONTEXT_NFS_SERVER.to_owned(), "test-server".to_owned()),
                (CONTEXT_NFS_PATH.to_owned(), "/test/path".to_owned()),
            ]),
        }
    }

    fn mode_of(path: &Path) -> u32 {
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[tokio::test]
    async fn publish_mounts_export_once() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("pod").join("vol");
        let (node, fake) = make_node(FakeMounter::default(), 0o755);

        let req = publish_request(&target);
        node.publish_volume(req.clone()).await.unwrap();
        node.publish_volume(req).await.unwrap();

        assert_eq!(
            fake.log(),
            vec![MountAction::Mount {
                source: "test-server:/test/path".into(),
                target: target.to_str().unwrap().into(),
                fs_type: "nfs".into(),
                options: vec![],
            }]
        );
        assert!(target.is_dir());
        assert_eq!(mode_of(&target), 0o755);
    }

    #[tokio::test]
    async fn publish_read_only_appends_ro() {
        let tmp = tempfile::tempdir().unwrap();
        let (node, fake) = make_node(FakeMounter::default(), 0);

        let mut req = publish_request(tmp.path());
        req.read_only = true;
        req.volume_capability = Some(VolumeCapability {
            mount_flags: vec!["nfsvers=4.1".into()],
            ..Default::default()
        });
        node.publish_volume(req).await.unwrap();

        match &fake.log()[..] {
            [MountAction::Mount { options, .. }] => {
                assert_eq!(options, &vec!["nfsvers=4.1".to_owned(), "ro".to_owned()])
            }
            other => panic!("unexpected mount log: {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_reconciles_permission_only_when_configured() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("vol");
        std::fs::create_dir(&target).unwrap();
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o700)).unwrap();

        let (node, _) = make_node(FakeMounter::default(), 0);
        node.publish_volume(publish_request(&target)).await.unwrap();
        assert_eq!(mode_of(&target), 0o700);

        let other = tmp.path().join("vol2");
        std::fs::create_dir(&other).unwrap();
        std::fs::set_permissions(&other, std::fs::Permissions::from_mode(0o700)).unwrap();
        let (node, _) = make_node(FakeMounter::default(), 0o755);
        node.publish_volume(publish_request(&other)).await.unwrap();
        assert_eq!(mode_of(&other), 0o755);
    }

    #[tokio::test]
    async fn publish_validates_arguments() {
        let tmp = tempfile::tempdir().unwrap();
        let (node, fake) = make_node(FakeMounter::default(), 0);

        let mut req = publish_request(tmp.path());
        req.volume_capability = None;
        let err = node.publish_volume(req).await.unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument(_)));

        let mut req = publish_request(tmp.path());
        req.volume_id = VolumeId::default();
        let err = node.publish_volume(req).await.unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument(_)));

        let mut req = publish_request(tmp.path());
        req.target_path.clear();
        let err = node.publish_volume(req).await.unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument(_)));

        assert!(fake.log().is_empty());
    }

    #[tokio::test]
    async fn publish_requires_export_context_and_releases_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let (node, _) = make_node(FakeMounter::default(), 0);

        let mut req = publish_request(tmp.path());
        req.volume_context.remove(CONTEXT_NFS_PATH);
        for _ in 0..2 {
            let err = node.publish_volume(req.clone()).await.unwrap_err();
            assert_eq!(
                err,
                CsiError::InvalidArgument("nfs_path is a required parameter".into())
            );
        }
        assert!(node.locks.is_empty());
    }

    #[tokio::test]
    async fn concurrent_operations_on_same_target_abort() {
        let tmp = tempfile::tempdir().unwrap();
        let mut fake = FakeMounter::default();
        fake.mount_delay = Duration::from_millis(200);
        let (node, fake) = make_node(fake, 0);

        let req = publish_request(tmp.path());
        let (first, second) = tokio::join!(
            node.publish_volume(req.clone()),
            node.publish_volume(req.clone())
        );
        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(CsiError::Aborted(_))))
                .count(),
            1
        );
        assert_eq!(fake.log().len(), 1);

        let other = tmp.path().join("other");
        let req = publish_request(&other);
        let (published, unpublished) = tokio::join!(
            node.publish_volume(req.clone()),
            node.unpublish_volume(&req.volume_id, &req.target_path)
        );
        assert!(published.is_ok());
        assert!(matches!(unpublished, Err(CsiError::Aborted(_))));
    }

    #[tokio::test]
    async fn mount_errors_are_classified() {
        let cases = [
            (
                io::ErrorKind::PermissionDenied,
                "access denied by server",
                "PermissionDenied",
            ),
            (
                io::ErrorKind::Other,
                "mount: Invalid argument",
                "InvalidArgument",
            ),
            (io::ErrorKind::Other, "connection refused", "Internal"),
        ];
        for (kind, msg, code) in cases {
            let tmp = tempfile::tempdir().unwrap();
            let mut fake = FakeMounter::default();
            fake.mount_error = Some((kind, msg.to_owned()));
            let (node, _) = make_node(fake, 0);
            let err = node
                .publish_volume(publish_request(tmp.path()))
                .await
                .unwrap_err();
            assert_eq!(err.code(), code, "{msg}");
        }
    }

    #[tokio::test]
    async fn hung_mount_times_out_as_internal() {
        let tmp = tempfile::tempdir().unwrap();
        let mut fake = FakeMounter::default();
        fake.mount_delay = Duration::from_secs(30);
        let (node, _) = make_node(fake, 0);
        let node = node.with_mount_timeout(Duration::from_millis(20));

        let err = node
            .publish_volume(publish_request(tmp.path()))
            .await
            .unwrap_err();
        assert_eq!(err, CsiError::Internal("time out".into()));
    }

    #[tokio::test]
    async fn unpublish_unmounts_and_removes_target() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("vol");
        std::fs::create_dir(&target).unwrap();
        let target_str = target.to_str().unwrap();

        let (node, fake) = make_node(FakeMounter::with_mounts(&[target_str]), 0);
        node.unpublish_volume(&VolumeId::from("v1:test-volume"), target_str)
            .await
            .unwrap();

        assert_eq!(fake.log(), vec![MountAction::Unmount(target_str.to_owned())]);
        assert!(!target.exists());

        // A second call finds nothing to do.
        node.unpublish_volume(&VolumeId::from("v1:test-volume"), target_str)
            .await
            .unwrap();
        assert_eq!(fake.log().len(), 1);
    }

    #[tokio::test]
    async fn unpublish_validates_arguments() {
        let (node, _) = make_node(FakeMounter::default(), 0);
        let err = node
            .unpublish_volume(&VolumeId::default(), "/mnt/x")
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument(_)));
        let err = node
            .unpublish_volume(&VolumeId::from("v1:a"), "")
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn node_info_and_capabilities() {
        let (node, _) = make_node(FakeMounter::default(), 0);
        assert_eq!(node.get_info().await.unwrap().node_id, "test-node");
        assert_eq!(node.get_capabilities().await.unwrap().len(), 2);
    }
}
