//! Driver configuration.
//!
//! The `rkcsi` binary fills these structs from command-line flags with
//! environment-variable fallbacks; the library only consumes them.  An empty
//! command string means the corresponding operation is not configured.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CsiError;

/// Scripts and remote host used by the controller role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Provisions a volume. Required.
    pub create_cmd: String,
    /// Deletes a volume. Required.
    pub delete_cmd: String,
    /// Grows a volume. Optional; enables `ExpandVolume`.
    #[serde(default)]
    pub expand_cmd: String,
    /// Snapshots a volume. Optional; enables `CreateDeleteSnapshot`.
    #[serde(default)]
    pub create_snapshot_cmd: String,
    /// Deletes a snapshot. Optional.
    #[serde(default)]
    pub delete_snapshot_cmd: String,
    /// Run the scripts on this host over SSH instead of locally.
    #[serde(default)]
    pub ssh: Option<SshConfig>,
}

impl ControllerConfig {
    /// Check that the mandatory commands are present.
    pub fn validate(&self) -> Result<(), CsiError> {
        if self.create_cmd.trim().is_empty() {
            return Err(CsiError::InvalidArgument("create command is required".into()));
        }
        if self.delete_cmd.trim().is_empty() {
            return Err(CsiError::InvalidArgument("delete command is required".into()));
        }
        Ok(())
    }
}

/// Remote host that runs the provisioning scripts.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SshConfig {
    /// `host:port` of the SSH server.
    pub server: String,
    pub user: String,
    /// PEM-encoded private key, held in memory.
    pub private_key: String,
}

impl fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConfig")
            .field("server", &self.server)
            .field("user", &self.user)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Settings for the node role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identifier reported by `NodeGetInfo`.
    pub node_id: String,
    /// Permission bits enforced on published target paths; `0` leaves them
    /// untouched.
    #[serde(default)]
    pub mount_permission: u32,
}
