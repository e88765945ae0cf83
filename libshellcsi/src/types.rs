//! Core CSI types: identifiers, capabilities, requests and responses.
//!
//! These types form the data model shared by the CSI traits, the transport
//! layer and the backends.  They are all [`Serialize`]/[`Deserialize`] so
//! they can be transmitted over QUIC as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use crate::error::CsiError;

/// Namespace tag prepended to every backend volume id handed to the caller.
pub const VOLUME_ID_PREFIX: &str = "v1:";

/// Namespace tag prepended to every backend snapshot id handed to the caller.
///
/// Versioned independently of [`VOLUME_ID_PREFIX`] even though both are
/// currently `v1:`.
pub const SNAPSHOT_ID_PREFIX: &str = "v1:";

/// Volume context key holding the NFS server host.
pub const CONTEXT_NFS_SERVER: &str = "nfs_server";

/// Volume context key holding the exported path on the NFS server.
pub const CONTEXT_NFS_PATH: &str = "nfs_path";

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// External volume identifier, always of the form `v1:<backend-id>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl VolumeId {
    /// Wrap an id returned by a backend script in the volume namespace tag.
    pub fn from_backend(id: &str) -> Self {
        Self(format!("{VOLUME_ID_PREFIX}{id}"))
    }

    /// Strip the namespace tag and return the backend id.
    pub fn backend_id(&self) -> Result<&str, CsiError> {
        match self.0.strip_prefix(VOLUME_ID_PREFIX) {
            Some("") => Err(CsiError::InvalidArgument("volume ID is empty".into())),
            Some(id) => Ok(id),
            None => Err(CsiError::InvalidArgument("volume ID is invalid".into())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// External snapshot identifier, always of the form `v1:<backend-id>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SnapshotId(pub String);

impl SnapshotId {
    /// Wrap an id returned by a backend script in the snapshot namespace tag.
    pub fn from_backend(id: &str) -> Self {
        Self(format!("{SNAPSHOT_ID_PREFIX}{id}"))
    }

    /// Strip the namespace tag and return the backend id.
    pub fn backend_id(&self) -> Result<&str, CsiError> {
        match self.0.strip_prefix(SNAPSHOT_ID_PREFIX) {
            Some("") => Err(CsiError::InvalidArgument("snapshot ID is empty".into())),
            Some(id) => Ok(id),
            None => Err(CsiError::InvalidArgument("snapshot ID is invalid".into())),
        }
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SnapshotId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    /// Single-node read-write.
    ReadWriteOnce,
    /// Multi-node read-only.
    ReadOnlyMany,
    /// Multi-node read-write.
    ReadWriteMany,
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Additional mount options (e.g. `"nfsvers=4.1"`).
    #[serde(default)]
    pub mount_flags: Vec<String>,
    /// Filesystem type; always `"nfs"` for this driver.
    #[serde(default = "default_fs_type")]
    pub fs_type: String,
}

fn default_fs_type() -> String {
    "nfs".to_owned()
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self {
            access_mode: AccessMode::ReadWriteMany,
            mount_flags: Vec::new(),
            fs_type: default_fs_type(),
        }
    }
}

/// Capabilities advertised by the Identity service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
}

/// RPCs supported by the Controller service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerCapability {
    CreateDeleteVolume,
    CloneVolume,
    ExpandVolume,
    CreateDeleteSnapshot,
}

/// RPCs supported by the Node service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeCapability {
    SingleNodeMultiWriter,
    Unknown,
}

// ---------------------------------------------------------------------------
// Volumes & snapshots
// ---------------------------------------------------------------------------

/// Where a new volume's initial content comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentSource {
    /// Restore from an existing snapshot.
    Snapshot { snapshot_id: SnapshotId },
    /// Clone an existing volume.
    Volume { volume_id: VolumeId },
    /// Any source kind this driver does not understand.
    #[serde(other)]
    Unspecified,
}

/// Full metadata for a provisioned volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    /// External volume identifier.
    pub volume_id: VolumeId,
    /// Provisioned capacity in bytes, as reported by the create script.
    pub capacity_bytes: u64,
    /// Opaque context passed from Controller to Node operations; carries the
    /// NFS export location.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    /// Echo of the request's content source, present only when the create
    /// script confirmed it honoured the source.
    #[serde(default)]
    pub content_source: Option<ContentSource>,
}

/// A point-in-time snapshot of a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub snapshot_id: SnapshotId,
    pub source_volume_id: VolumeId,
    pub size_bytes: u64,
    pub creation_time: SystemTime,
    pub ready_to_use: bool,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to create a new volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    /// Caller-chosen volume name; acts as the idempotency key for the script.
    pub name: String,
    /// Required capacity in bytes.
    pub capacity_bytes: u64,
    /// Required capabilities.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Storage-class parameters forwarded to the create script.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Optional initial content.
    #[serde(default)]
    pub content_source: Option<ContentSource>,
}

/// Request to snapshot an existing volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSnapshotRequest {
    pub name: String,
    pub source_volume_id: VolumeId,
}

/// Request to mount a volume's NFS export at a target path on this node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: VolumeId,
    /// Mount point, e.g. `/var/lib/rkl/pods/<pod-uid>/volumes/<vol-name>`.
    pub target_path: String,
    /// Requested capability; required.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Whether the mount should be read-only.
    #[serde(default)]
    pub read_only: bool,
    /// Context returned by `CreateVolume`.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Plugin & node info
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"rk8s.nfs-shell.csi"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// Information about the node on which the CSI Node service runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub node_id: String,
    /// Maximum number of volumes the node can host; `0` means unlimited.
    pub max_volumes: u64,
}
