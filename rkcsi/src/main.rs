mod cli;
mod tls;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libshellcsi::backend::{DRIVER_NAME, DRIVER_VERSION};
use libshellcsi::transport::{CsiServer, Services};
use libshellcsi::{ControllerConfig, DriverIdentity, NfsNode, ScriptController};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, ControllerCommand, LogFormat, NodeCommand, ServeArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Version => {
            println!("Host NFS CSI Plugin For Shell");
            println!("Driver Name: {DRIVER_NAME}");
            println!("Version: {DRIVER_VERSION}");
            Ok(())
        }
        Command::Controller(ControllerCommand::Validate { scripts }) => {
            println!("Validating configuration...");
            validate(&scripts.into_config())?;
            println!("Configuration is valid");
            Ok(())
        }
        Command::Controller(ControllerCommand::Run { scripts, serve }) => {
            init_logging(&cli.log_level, cli.log_format)?;
            let config = scripts.into_config();
            validate(&config)?;
            info!(
                remote = config.ssh.as_ref().map(|s| s.server.as_str()),
                expand = !config.expand_cmd.is_empty(),
                snapshots = !config.create_snapshot_cmd.is_empty(),
                "starting controller",
            );
            let controller = Arc::new(ScriptController::new(config));
            serve_until_signal(Services::controller(Arc::new(DriverIdentity), controller), &serve)
                .await
        }
        Command::Node(NodeCommand::Run { node, serve }) => {
            init_logging(&cli.log_level, cli.log_format)?;
            let config = node.into_config();
            if config.node_id.is_empty() {
                anyhow::bail!("node-id is required");
            }
            info!(node_id = %config.node_id, "starting node");
            let node = Arc::new(NfsNode::new(config));
            serve_until_signal(Services::node(Arc::new(DriverIdentity), node), &serve).await
        }
    }
}

fn validate(config: &ControllerConfig) -> Result<()> {
    config
        .validate()
        .context("configuration validation failed")
}

fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid log level")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.with_target(false).init(),
        LogFormat::Json => builder.json().with_current_span(true).init(),
    }
    Ok(())
}

async fn serve_until_signal(services: Services, serve: &ServeArgs) -> Result<()> {
    let tls = tls::server_config(&serve.tls_cert, &serve.tls_key)?;
    let server = Arc::new(CsiServer::new(serve.endpoint, tls, services)?);

    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to register SIGINT")?;

    let serving = Arc::clone(&server);
    let mut task = tokio::spawn(async move { serving.serve().await });

    tokio::select! {
        res = &mut task => {
            res.context("server task failed")??;
            warn!("server stopped accepting connections");
            return Ok(());
        }
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }

    server.shutdown();
    server.endpoint().wait_idle().await;
    task.await.context("server task failed")??;
    info!("shutdown complete");
    Ok(())
}
