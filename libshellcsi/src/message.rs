//! CSI protocol messages transmitted over QUIC.
//!
//! [`CsiMessage`] is the top-level envelope for all request and response
//! variants exchanged between a CSI caller (the orchestrator) and the driver's
//! controller or node process via QUIC bi-directional streams.

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::types::*;

/// Top-level message envelope for CSI over QUIC.
///
/// Each QUIC bi-stream carries exactly one request followed by one response.
/// The client sends a *request* variant and the server replies with the
/// corresponding *response* variant (or [`CsiMessage::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Requests --------------------------------------------------------
    /// Health probe (Identity).
    Probe,
    /// Query plugin info (Identity).
    GetPluginInfo,
    /// Query plugin capabilities (Identity).
    GetPluginCapabilities,

    /// Create a new volume (Controller).
    CreateVolume(CreateVolumeRequest),
    /// Delete a volume (Controller).
    DeleteVolume(VolumeId),
    /// Grow a volume (Controller).
    ControllerExpandVolume {
        volume_id: VolumeId,
        capacity_bytes: u64,
    },
    /// Validate volume capabilities (Controller).
    ValidateVolumeCapabilities {
        volume_id: VolumeId,
        capabilities: Vec<VolumeCapability>,
    },
    /// Query controller RPC capabilities (Controller).
    ControllerGetCapabilities,
    /// Snapshot a volume (Controller).
    CreateSnapshot(CreateSnapshotRequest),
    /// Delete a snapshot (Controller).
    DeleteSnapshot(SnapshotId),

    /// Mount a volume's export into a Pod (Node).
    PublishVolume(NodePublishVolumeRequest),
    /// Unpublish a previously published volume (Node).
    UnpublishVolume {
        volume_id: VolumeId,
        target_path: String,
    },
    /// Query node RPC capabilities (Node).
    NodeGetCapabilities,
    /// Query node info (Node).
    GetNodeInfo,

    // ----- Responses -------------------------------------------------------
    /// Probe result.
    ProbeResult(bool),
    /// Plugin information.
    PluginInfoResponse(PluginInfo),
    /// Plugin capabilities.
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    /// A volume was successfully created.
    VolumeCreated(Volume),
    /// Capacity after expansion.
    VolumeExpanded { capacity_bytes: u64 },
    /// The subset of requested capabilities the driver confirms.
    CapabilitiesConfirmed(Vec<VolumeCapability>),
    /// Controller capabilities.
    ControllerCapabilitiesResponse(Vec<ControllerCapability>),
    /// A snapshot was successfully created.
    SnapshotCreated(Snapshot),
    /// Node capabilities.
    NodeCapabilitiesResponse(Vec<NodeCapability>),
    /// Node information.
    NodeInfoResponse(NodeInfo),

    /// Generic success acknowledgement (no payload).
    Ok,
    /// An error occurred.
    Error(CsiError),
}

impl CsiMessage {
    /// Whether this variant is a request a server should dispatch.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::Probe
                | Self::GetPluginInfo
                | Self::GetPluginCapabilities
                | Self::CreateVolume(_)
                | Self::DeleteVolume(_)
                | Self::ControllerExpandVolume { .. }
                | Self::ValidateVolumeCapabilities { .. }
                | Self::ControllerGetCapabilities
                | Self::CreateSnapshot(_)
                | Self::DeleteSnapshot(_)
                | Self::PublishVolume(_)
                | Self::UnpublishVolume { .. }
                | Self::NodeGetCapabilities
                | Self::GetNodeInfo
        )
    }
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Probe => f.write_str("Probe"),
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::CreateVolume(req) => write!(f, "CreateVolume(name={})", req.name),
            Self::DeleteVolume(id) => write!(f, "DeleteVolume({})", id),
            Self::ControllerExpandVolume {
                volume_id,
                capacity_bytes,
            } => write!(f, "ControllerExpandVolume({}, {})", volume_id, capacity_bytes),
            Self::ValidateVolumeCapabilities { volume_id, .. } => {
                write!(f, "ValidateVolumeCapabilities({})", volume_id)
            }
            Self::ControllerGetCapabilities => f.write_str("ControllerGetCapabilities"),
            Self::CreateSnapshot(req) => write!(
                f,
                "CreateSnapshot(name={}, source={})",
                req.name, req.source_volume_id
            ),
            Self::DeleteSnapshot(id) => write!(f, "DeleteSnapshot({})", id),
            Self::PublishVolume(req) => write!(f, "PublishVolume({})", req.volume_id),
            Self::UnpublishVolume { volume_id, .. } => {
                write!(f, "UnpublishVolume({})", volume_id)
            }
            Self::NodeGetCapabilities => f.write_str("NodeGetCapabilities"),
            Self::GetNodeInfo => f.write_str("GetNodeInfo"),
            Self::ProbeResult(ok) => write!(f, "ProbeResult({})", ok),
            Self::PluginInfoResponse(info) => {
                write!(f, "PluginInfo(name={})", info.name)
            }
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::VolumeCreated(v) => write!(f, "VolumeCreated({})", v.volume_id),
            Self::VolumeExpanded { capacity_bytes } => {
                write!(f, "VolumeExpanded({})", capacity_bytes)
            }
            Self::CapabilitiesConfirmed(caps) => {
                write!(f, "CapabilitiesConfirmed(count={})", caps.len())
            }
            Self::ControllerCapabilitiesResponse(caps) => {
                write!(f, "ControllerCapabilities(count={})", caps.len())
            }
            Self::SnapshotCreated(s) => write!(f, "SnapshotCreated({})", s.snapshot_id),
            Self::NodeCapabilitiesResponse(caps) => {
                write!(f, "NodeCapabilities(count={})", caps.len())
            }
            Self::NodeInfoResponse(info) => write!(f, "NodeInfo({})", info.node_id),
            Self::Ok => f.write_str("Ok"),
            Self::Error(e) => write!(f, "Error({}: {})", e.code(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_volume_survives_the_wire() {
        let msg = CsiMessage::CreateVolume(CreateVolumeRequest {
            name: "test".into(),
            capacity_bytes: 1024,
            volume_capabilities: vec![VolumeCapability::default()],
            parameters: [("pk".to_owned(), "pv".to_owned())].into(),
            content_source: Some(ContentSource::Snapshot {
                snapshot_id: SnapshotId::from("v1:snap-1"),
            }),
        });
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        match de {
            CsiMessage::CreateVolume(req) => {
                assert_eq!(req.name, "test");
                assert_eq!(req.parameters["pk"], "pv");
                assert_eq!(
                    req.content_source,
                    Some(ContentSource::Snapshot {
                        snapshot_id: SnapshotId::from("v1:snap-1")
                    })
                );
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn error_keeps_its_kind() {
        let msg = CsiMessage::Error(CsiError::Aborted("busy".into()));
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(de, CsiMessage::Error(CsiError::Aborted(_))));
    }

    #[test]
    fn requests_and_responses_are_told_apart() {
        assert!(CsiMessage::Probe.is_request());
        assert!(CsiMessage::DeleteSnapshot(SnapshotId::from("v1:s")).is_request());
        assert!(!CsiMessage::Ok.is_request());
        assert!(!CsiMessage::VolumeExpanded { capacity_bytes: 1 }.is_request());
    }

    #[test]
    fn display_formatting() {
        assert_eq!(CsiMessage::Ok.to_string(), "Ok");
        assert_eq!(CsiMessage::Probe.to_string(), "Probe");
        assert_eq!(
            CsiMessage::Error(CsiError::Unimplemented("x".into())).to_string(),
            "Error(Unimplemented: unimplemented: x)"
        );
    }
}
