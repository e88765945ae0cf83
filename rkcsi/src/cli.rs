use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use libshellcsi::{ControllerConfig, NodeConfig, SshConfig};

#[derive(Parser, Debug)]
#[command(name = "rkcsi", version, about = "NFS CSI driver that runs shell script hooks")]
pub struct Cli {
    /// Log filter, e.g. `info` or `libshellcsi=debug`. `RUST_LOG` wins when set.
    #[arg(short = 'l', long, global = true, default_value = "info")]
    pub log_level: String,

    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Controller service: provisions volumes and snapshots through scripts.
    #[command(subcommand)]
    Controller(ControllerCommand),
    /// Node service: mounts NFS exports into pods.
    #[command(subcommand)]
    Node(NodeCommand),
    /// Print driver name and version.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ControllerCommand {
    /// Serve the controller and identity services.
    Run {
        #[command(flatten)]
        scripts: ControllerArgs,
        #[command(flatten)]
        serve: ServeArgs,
    },
    /// Check the configuration and exit.
    Validate {
        #[command(flatten)]
        scripts: ControllerArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum NodeCommand {
    /// Serve the node and identity services.
    Run {
        #[command(flatten)]
        node: NodeArgs,
        #[command(flatten)]
        serve: ServeArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ControllerArgs {
    /// Script that creates a volume.
    #[arg(short = 'c', long, env = "CREATE_CMD")]
    pub create_cmd: Option<String>,

    /// Script that deletes a volume.
    #[arg(short = 'd', long, env = "DELETE_CMD")]
    pub delete_cmd: Option<String>,

    /// Script that expands a volume.
    #[arg(long, env = "EXPAND_CMD")]
    pub expand_cmd: Option<String>,

    #[arg(long, env = "CREATE_SNAPSHOT_CMD")]
    pub create_snapshot_cmd: Option<String>,

    #[arg(long, env = "DELETE_SNAPSHOT_CMD")]
    pub delete_snapshot_cmd: Option<String>,

    /// Run scripts on this `host:port` over SSH instead of locally.
    #[arg(long, env = "SSH_SERVER")]
    pub ssh_server: Option<String>,

    #[arg(long, env = "SSH_USER")]
    pub ssh_user: Option<String>,

    /// PEM-encoded private key (the key itself, not a path).
    #[arg(long, env = "SSH_KEY", hide_env_values = true)]
    pub ssh_key: Option<String>,
}

impl ControllerArgs {
    pub fn into_config(self) -> ControllerConfig {
        let ssh = non_empty(self.ssh_server).map(|server| SshConfig {
            server,
            user: self.ssh_user.unwrap_or_default(),
            private_key: self.ssh_key.unwrap_or_default(),
        });
        ControllerConfig {
            create_cmd: self.create_cmd.unwrap_or_default(),
            delete_cmd: self.delete_cmd.unwrap_or_default(),
            expand_cmd: self.expand_cmd.unwrap_or_default(),
            create_snapshot_cmd: self.create_snapshot_cmd.unwrap_or_default(),
            delete_snapshot_cmd: self.delete_snapshot_cmd.unwrap_or_default(),
            ssh,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// Identifier reported by NodeGetInfo.
    #[arg(short = 'n', long, env = "NODE_ID")]
    pub node_id: String,

    /// Octal permission bits for published target paths; `0` leaves them alone.
    #[arg(long, env = "MOUNT_PERMISSION", default_value = "0", value_parser = parse_mode)]
    pub mount_permission: u32,
}

impl NodeArgs {
    pub fn into_config(self) -> NodeConfig {
        NodeConfig {
            node_id: self.node_id,
            mount_permission: self.mount_permission,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// QUIC listen address.
    #[arg(short = 'e', long, env = "CSI_ENDPOINT", default_value = "0.0.0.0:9000")]
    pub endpoint: SocketAddr,

    /// PEM certificate chain presented to callers.
    #[arg(long, env = "CSI_TLS_CERT")]
    pub tls_cert: PathBuf,

    /// PEM private key for `--tls-cert`.
    #[arg(long, env = "CSI_TLS_KEY")]
    pub tls_key: PathBuf,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn parse_mode(raw: &str) -> Result<u32, String> {
    let digits = raw.trim_start_matches("0o");
    let mode =
        u32::from_str_radix(digits, 8).map_err(|e| format!("invalid octal mode {raw:?}: {e}"))?;
    if mode > 0o777 {
        return Err(format!("mode {raw:?} is out of range"));
    }
    Ok(mode)
}
