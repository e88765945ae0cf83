//! CSI Node service trait.
//!
//! The Node service runs on each worker node and makes a volume's NFS export
//! visible at a pod's target path:
//!
//! 1. **Publish**: mount `server:path` at the target path.
//! 2. **Unpublish**: unmount it and remove the target directory.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{NodeCapability, NodeInfo, NodePublishVolumeRequest, VolumeId};

/// Node service: local mount / unmount operations.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Mount a volume at `req.target_path`.
    ///
    /// Idempotent: a target that is already a mount point is left alone.
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError>;

    /// Unmount a volume from `target_path` and remove the directory.
    ///
    /// Idempotent: a missing target path succeeds.
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError>;

    /// RPCs this node supports.
    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError>;

    /// Return information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, CsiError>;
}
