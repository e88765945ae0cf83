//! Script-driven controller backend.
//!
//! [`ScriptController`] implements [`CsiController`] by translating each
//! request into environment variables (see [`crate::protocol`]), running the
//! configured command through a [`CommandExecutor`], and reading the
//! `csi-shell-output:` lines the script prints back.
//!
//! The scripts own all state.  This type keeps none beyond its configuration,
//! so any replica can serve any request.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::{error, info, instrument, warn};

use crate::config::ControllerConfig;
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::exec::{CommandExecutor, EnvRequest, LocalExecutor, SshExecutor};
use crate::protocol::*;
use crate::types::*;

/// Controller service that shells out to provisioning scripts.
pub struct ScriptController {
    config: ControllerConfig,
    executor: Arc<dyn CommandExecutor>,
    capabilities: Vec<ControllerCapability>,
}

impl ScriptController {
    /// Build a controller that runs scripts over SSH when `config.ssh` is
    /// set and on this host otherwise.
    pub fn new(config: ControllerConfig) -> Self {
        let executor: Arc<dyn CommandExecutor> = match &config.ssh {
            Some(ssh) => Arc::new(SshExecutor::new(ssh.clone())),
            None => Arc::new(LocalExecutor::new()),
        };
        Self::with_executor(config, executor)
    }

    pub fn with_executor(config: ControllerConfig, executor: Arc<dyn CommandExecutor>) -> Self {
        let capabilities = controller_capabilities(&config);
        Self {
            config,
            executor,
            capabilities,
        }
    }

    /// Run `command` and parse its reply.  Execution failures are logged
    /// with the full output and reported without it.
    async fn run_script(
        &self,
        command: &str,
        env: &EnvRequest,
        action: &str,
    ) -> Result<ShellReply, CsiError> {
        match self.executor.execute(command, env).await {
            Ok(output) => Ok(ShellReply::parse(&output)),
            Err(e) => {
                error!(
                    cmd = %command,
                    error = %e,
                    output = %e.output_lossy(),
                    "{action} script failed",
                );
                Err(CsiError::Internal(format!("failed to {action}: {e}")))
            }
        }
    }
}

/// RPCs the controller advertises for `config`.  Expansion and snapshots
/// appear only when their commands are set.
pub fn controller_capabilities(config: &ControllerConfig) -> Vec<ControllerCapability> {
    let mut caps = vec![
        ControllerCapability::CreateDeleteVolume,
        ControllerCapability::CloneVolume,
    ];
    if !config.expand_cmd.is_empty() {
        caps.push(ControllerCapability::ExpandVolume);
    }
    if !config.create_snapshot_cmd.is_empty() {
        caps.push(ControllerCapability::CreateDeleteSnapshot);
    }
    caps
}

#[async_trait]
impl CsiController for ScriptController {
    #[instrument(skip(self, req), fields(name = %req.name, capacity = req.capacity_bytes))]
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        if req.name.is_empty() {
            return Err(CsiError::InvalidArgument("volume name is required".into()));
        }

        let mut env = EnvRequest::from([
            (ENV_VOLUME_ID.to_owned(), req.name.clone()),
            (ENV_CAPACITY_BYTES.to_owned(), req.capacity_bytes.to_string()),
        ]);
        for (key, value) in &req.parameters {
            env.insert(param_env_name(key), value.clone());
        }
        match &req.content_source {
            None => {}
            Some(ContentSource::Snapshot { snapshot_id }) => {
                env.insert(ENV_DATA_SOURCE.to_owned(), "snapshot".to_owned());
                env.insert(
                    ENV_SRC_SNAPSHOT_ID.to_owned(),
                    snapshot_id.backend_id()?.to_owned(),
                );
            }
            Some(ContentSource::Volume { volume_id }) => {
                env.insert(ENV_DATA_SOURCE.to_owned(), "volume".to_owned());
                env.insert(
                    ENV_SRC_VOLUME_ID.to_owned(),
                    volume_id.backend_id()?.to_owned(),
                );
            }
            Some(ContentSource::Unspecified) => {
                return Err(CsiError::InvalidArgument(
                    "content source is not a snapshot or a volume".into(),
                ));
            }
        }

        warn!("executing create volume command");
        let mut reply = self
            .run_script(&self.config.create_cmd, &env, "create volume")
            .await?;

        let backend_id = reply.pop(REPLY_VOLUME_ID).ok_or_else(|| {
            CsiError::Internal("create script did not return volume_id".into())
        })?;
        let capacity_bytes = reply.pop_capacity().map_err(|e| {
            error!(error = %e, "failed to parse capacity bytes");
            CsiError::Internal(format!("failed to parse capacity bytes: {e}"))
        })?;
        let (Some(server), Some(export)) = (reply.pop(REPLY_NFS_SERVER), reply.pop(REPLY_NFS_PATH))
        else {
            return Err(CsiError::Internal(
                "create script did not return nfs share information".into(),
            ));
        };
        let content_source = reply
            .pop(REPLY_DATA_SOURCE)
            .and(req.content_source);

        if backend_id != req.name {
            info!(requested = %req.name, returned = %backend_id, "script assigned a different volume id");
        }
        let volume = Volume {
            volume_id: VolumeId::from_backend(&backend_id),
            capacity_bytes,
            volume_context: [
                (CONTEXT_NFS_SERVER.to_owned(), server),
                (CONTEXT_NFS_PATH.to_owned(), export),
            ]
            .into(),
            content_source,
        };
        warn!(volume_id = %volume.volume_id, "volume created");
        Ok(volume)
    }

    #[instrument(skip(self))]
    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError> {
        let backend_id = volume_id.backend_id()?;
        let env = EnvRequest::from([(ENV_VOLUME_ID.to_owned(), backend_id.to_owned())]);

        info!("executing delete volume command");
        self.run_script(&self.config.delete_cmd, &env, "delete volume")
            .await?;

        warn!("volume deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn controller_expand_volume(
        &self,
        volume_id: &VolumeId,
        capacity_bytes: u64,
    ) -> Result<u64, CsiError> {
        let backend_id = volume_id.backend_id()?;
        if self.config.expand_cmd.is_empty() {
            return Err(CsiError::Unimplemented(
                "expand volume command is not configured".into(),
            ));
        }
        let env = EnvRequest::from([
            (ENV_VOLUME_ID.to_owned(), backend_id.to_owned()),
            (ENV_CAPACITY_BYTES.to_owned(), capacity_bytes.to_string()),
        ]);

        info!("executing expand volume command");
        let mut reply = self
            .run_script(&self.config.expand_cmd, &env, "expand volume")
            .await?;
        let capacity = reply.pop_capacity().map_err(|e| {
            error!(error = %e, "failed to parse capacity bytes");
            CsiError::Internal(format!("failed to parse capacity bytes: {e}"))
        })?;

        info!(capacity, "volume expanded");
        Ok(capacity)
    }

    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: &[VolumeCapability],
    ) -> Result<Vec<VolumeCapability>, CsiError> {
        info!(%volume_id, "confirming requested capabilities");
        Ok(capabilities.to_vec())
    }

    #[instrument(skip(self, req), fields(name = %req.name, source = %req.source_volume_id))]
    async fn create_snapshot(&self, req: CreateSnapshotRequest) -> Result<Snapshot, CsiError> {
        if self.config.create_snapshot_cmd.is_empty() {
            return Err(CsiError::Unimplemented(
                "create snapshot command is not configured".into(),
            ));
        }
        if req.name.is_empty() {
            return Err(CsiError::InvalidArgument(
                "snapshot name must be provided".into(),
            ));
        }
        let source_id = req.source_volume_id.backend_id()?;
        let env = EnvRequest::from([
            (ENV_SNAPSHOT_NAME.to_owned(), req.name.clone()),
            (ENV_SRC_VOLUME_ID.to_owned(), source_id.to_owned()),
        ]);

        let mut reply = self
            .run_script(&self.config.create_snapshot_cmd, &env, "create snapshot")
            .await?;
        let backend_id = reply.pop(REPLY_SNAPSHOT_ID).ok_or_else(|| {
            CsiError::Internal("failed to create snapshot: snapshot ID is empty".into())
        })?;
        let size_bytes = reply.pop_capacity().map_err(|e| {
            CsiError::Internal(format!("failed to parse snapshot capacity: {e}"))
        })?;

        let snapshot = Snapshot {
            snapshot_id: SnapshotId::from_backend(&backend_id),
            source_volume_id: req.source_volume_id,
            size_bytes,
            creation_time: SystemTime::now(),
            ready_to_use: true,
        };
        info!(snapshot_id = %snapshot.snapshot_id, "snapshot created");
        Ok(snapshot)
    }

    #[instrument(skip(self))]
    async fn delete_snapshot(&self, snapshot_id: &SnapshotId) -> Result<(), CsiError> {
        if self.config.delete_snapshot_cmd.is_empty() {
            return Err(CsiError::Unimplemented(
                "delete snapshot command is not configured".into(),
            ));
        }
        let backend_id = snapshot_id.backend_id()?;
        let env = EnvRequest::from([(ENV_SNAPSHOT_ID.to_owned(), backend_id.to_owned())]);

        warn!("executing delete snapshot command");
        let mut reply = self
            .run_script(&self.config.delete_snapshot_cmd, &env, "delete snapshot")
            .await?;
        if reply.pop(REPLY_SNAPSHOT_ID).as_deref() != Some(backend_id) {
            return Err(CsiError::Internal(
                "failed to delete snapshot: returned snapshot ID is empty or does not match requested ID"
                    .into(),
            ));
        }

        info!("snapshot deleted");
        Ok(())
    }

    async fn get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        Ok(self.capabilities.clone())
    }
}
