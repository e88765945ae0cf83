//! CSI Controller service trait.
//!
//! The Controller service manages the centralized volume lifecycle:
//! creation, deletion, expansion and snapshots.  It runs once per cluster and
//! never touches a node's filesystem.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{
    ControllerCapability, CreateSnapshotRequest, CreateVolumeRequest, Snapshot, SnapshotId,
    Volume, VolumeCapability, VolumeId,
};

/// Controller service: centralized volume management.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Provision a new volume.
    ///
    /// The returned [`Volume`] carries the external `volume_id` and the
    /// `volume_context` that must be forwarded to `NodePublishVolume`.
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError>;

    /// Delete a previously provisioned volume.
    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError>;

    /// Grow a volume to at least `capacity_bytes`; returns the new capacity.
    async fn controller_expand_volume(
        &self,
        volume_id: &VolumeId,
        capacity_bytes: u64,
    ) -> Result<u64, CsiError>;

    /// Return the subset of `capabilities` the volume supports.
    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: &[VolumeCapability],
    ) -> Result<Vec<VolumeCapability>, CsiError>;

    /// Take a snapshot of an existing volume.
    async fn create_snapshot(&self, req: CreateSnapshotRequest) -> Result<Snapshot, CsiError>;

    /// Delete a snapshot.
    async fn delete_snapshot(&self, snapshot_id: &SnapshotId) -> Result<(), CsiError>;

    /// RPCs this controller supports.
    async fn get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError>;
}
