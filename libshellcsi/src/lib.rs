//! # libshellcsi, a script-driven NFS CSI driver for RK8s
//!
//! `libshellcsi` implements a [Container Storage Interface][csi] driver that
//! provisions NFS-backed volumes by running operator-supplied shell
//! commands.  Requests are translated into `CSI_*` environment variables,
//! the command runs locally or over SSH, and the command reports results by
//! printing `csi-shell-output:key=value` lines.  Node processes mount the
//! resulting NFS exports into pods.
//!
//! Like the rest of RK8s it speaks a simplified CSI over QUIC (via
//! [`quinn`]), runs on Tokio, logs through `tracing` and reports errors as
//! a `thiserror` enum.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `Volume`, `VolumeId`, capabilities, requests. |
//! | [`error`] | [`CsiError`] enum covering all failure modes. |
//! | [`config`] | Controller and node configuration. |
//! | [`protocol`] | Request → environment and script output → reply translation. |
//! | [`exec`] | [`CommandExecutor`](exec::CommandExecutor) over a local shell or SSH. |
//! | [`lock`] | Non-blocking per-resource locks. |
//! | [`timeout`] | Run an action under a deadline without cancelling it. |
//! | [`mount`] | Mount helpers and mount-point cleanup. |
//! | [`message`] | [`CsiMessage`] protocol envelope for QUIC transport. |
//! | [`identity`] | [`CsiIdentity`] trait: plugin discovery & health. |
//! | [`controller`] | [`CsiController`] trait: volumes, expansion, snapshots. |
//! | [`node`] | [`CsiNode`] trait: publish, unpublish. |
//! | [`transport`] | QUIC client/server built on `quinn`. |
//! | [`backend`] | Script controller and NFS node implementations. |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod exec;
pub mod identity;
pub mod lock;
pub mod message;
pub mod mount;
pub mod node;
pub mod protocol;
pub mod timeout;
pub mod transport;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use backend::DriverIdentity;
pub use backend::nfs::NfsNode;
pub use backend::script::ScriptController;
pub use config::{ControllerConfig, NodeConfig, SshConfig};
pub use controller::CsiController;
pub use error::CsiError;
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use node::CsiNode;
pub use types::*;
