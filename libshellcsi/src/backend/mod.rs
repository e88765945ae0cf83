//! Storage backend implementations.
//!
//! * [`script::ScriptController`]: Controller service that delegates every
//!   volume and snapshot operation to operator-supplied scripts.
//! * [`nfs::NfsNode`]: Node service that mounts the NFS exports those
//!   scripts hand out.
//!
//! Both processes answer Identity requests through [`DriverIdentity`].

use async_trait::async_trait;

use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::types::{PluginCapability, PluginInfo};

pub mod nfs;
pub mod script;

/// Name reported by `GetPluginInfo`.
pub const DRIVER_NAME: &str = "rk8s.nfs-shell.csi";

/// Version reported by `GetPluginInfo`.
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Identity service shared by the controller and node roles.
#[derive(Debug, Default, Clone)]
pub struct DriverIdentity;

#[async_trait]
impl CsiIdentity for DriverIdentity {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: DRIVER_NAME.to_owned(),
            vendor_version: DRIVER_VERSION.to_owned(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        Ok(true)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(vec![PluginCapability::ControllerService])
    }
}
