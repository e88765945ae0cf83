//! QUIC server that runs the controller or node process and dispatches
//! incoming CSI requests to the hosted service implementations.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;
use crate::node::CsiNode;

use super::MAX_MESSAGE_SIZE;

/// The services one process hosts.
///
/// Identity is always present.  A controller process leaves `node` empty
/// and a node process leaves `controller` empty; requests for a missing
/// service are answered with [`CsiError::Unimplemented`].
#[derive(Clone)]
pub struct Services {
    pub identity: Arc<dyn CsiIdentity>,
    pub controller: Option<Arc<dyn CsiController>>,
    pub node: Option<Arc<dyn CsiNode>>,
}

impl Services {
    pub fn controller(identity: Arc<dyn CsiIdentity>, controller: Arc<dyn CsiController>) -> Self {
        Self {
            identity,
            controller: Some(controller),
            node: None,
        }
    }

    pub fn node(identity: Arc<dyn CsiIdentity>, node: Arc<dyn CsiNode>) -> Self {
        Self {
            identity,
            controller: None,
            node: Some(node),
        }
    }

    fn require_controller(&self) -> Result<&dyn CsiController, CsiError> {
        self.controller
            .as_deref()
            .ok_or_else(|| CsiError::Unimplemented("controller service is not hosted here".into()))
    }

    fn require_node(&self) -> Result<&dyn CsiNode, CsiError> {
        self.node
            .as_deref()
            .ok_or_else(|| CsiError::Unimplemented("node service is not hosted here".into()))
    }
}

/// A CSI server that accepts QUIC connections and dispatches
/// [`CsiMessage`] requests to a set of [`Services`].
pub struct CsiServer {
    endpoint: quinn::Endpoint,
    services: Arc<Services>,
}

impl CsiServer {
    /// Create a new server bound to `addr`.
    pub fn new(
        addr: SocketAddr,
        tls_config: rustls::ServerConfig,
        services: Services,
    ) -> Result<Self, CsiError> {
        let quic_server_config = QuicServerConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("invalid TLS config: {e}")))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_server_config));
        let endpoint = quinn::Endpoint::server(server_config, addr).map_err(CsiError::transport)?;
        info!(%addr, "CSI QUIC server listening");
        Ok(Self {
            endpoint,
            services: Arc::new(services),
        })
    }

    /// Accept connections in a loop until the endpoint is closed.
    ///
    /// Each accepted connection spawns a Tokio task, and each bi-stream
    /// within a connection is handled concurrently.
    pub async fn serve(&self) -> Result<(), CsiError> {
        while let Some(incoming) = self.endpoint.accept().await {
            let services = Arc::clone(&self.services);
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        let remote = conn.remote_address();
                        debug!(%remote, "CSI connection accepted");
                        if let Err(e) = handle_connection(conn, services).await {
                            warn!(%remote, error = %e, "CSI connection error");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "CSI incoming connection failed");
                    }
                }
            });
        }
        Ok(())
    }

    /// Stop accepting connections and close the open ones.
    ///
    /// [`serve`](Self::serve) returns once the endpoint is closed.
    pub fn shutdown(&self) {
        info!("CSI QUIC server shutting down");
        self.endpoint
            .close(quinn::VarInt::from_u32(0), b"server shutdown");
    }

    /// Return a reference to the underlying QUIC endpoint, useful for
    /// obtaining the local address.
    pub fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }
}

/// Handle all bi-streams on a single connection.
async fn handle_connection(
    conn: quinn::Connection,
    services: Arc<Services>,
) -> Result<(), CsiError> {
    loop {
        let (send, recv) = match conn.accept_bi().await {
            Ok(stream) => stream,
            Err(quinn::ConnectionError::ApplicationClosed(_))
            | Err(quinn::ConnectionError::LocallyClosed) => return Ok(()),
            Err(e) => return Err(CsiError::transport(e)),
        };

        let services = Arc::clone(&services);
        tokio::spawn(async move {
            if let Err(e) = handle_stream(send, recv, &services).await {
                error!(error = %e, "CSI stream handler error");
            }
        });
    }
}

/// Process a single bi-stream: read request → dispatch → write response.
#[instrument(skip_all)]
async fn handle_stream(
    mut send: quinn::SendStream,
    mut recv: quinn::RecvStream,
    services: &Services,
) -> Result<(), CsiError> {
    let buf = recv
        .read_to_end(MAX_MESSAGE_SIZE)
        .await
        .map_err(CsiError::transport)?;

    let response = match serde_json::from_slice::<CsiMessage>(&buf) {
        Ok(request) => {
            debug!(%request, "CSI request received");
            dispatch(services, request).await
        }
        Err(e) => {
            warn!(error = %e, "malformed CSI request");
            CsiMessage::Error(CsiError::InvalidArgument(format!("malformed request: {e}")))
        }
    };
    if let CsiMessage::Error(e) = &response {
        warn!(code = e.code(), error = %e, "CSI request failed");
    }

    let payload = serde_json::to_vec(&response).map_err(CsiError::internal)?;
    send.write_all(&payload)
        .await
        .map_err(CsiError::transport)?;
    send.finish().map_err(CsiError::transport)?;
    Ok(())
}

/// Route a request to the matching service method and wrap the result in
/// its response variant.
pub async fn dispatch(services: &Services, request: CsiMessage) -> CsiMessage {
    match route(services, request).await {
        Ok(response) => response,
        Err(e) => CsiMessage::Error(e),
    }
}

async fn route(services: &Services, request: CsiMessage) -> Result<CsiMessage, CsiError> {
    let identity = services.identity.as_ref();
    let response = match request {
        // --- Identity -------------------------------------------------------
        CsiMessage::Probe => CsiMessage::ProbeResult(identity.probe().await?),
        CsiMessage::GetPluginInfo => {
            CsiMessage::PluginInfoResponse(identity.get_plugin_info().await?)
        }
        CsiMessage::GetPluginCapabilities => {
            CsiMessage::PluginCapabilitiesResponse(identity.get_plugin_capabilities().await?)
        }

        // --- Controller -----------------------------------------------------
        CsiMessage::CreateVolume(req) => {
            CsiMessage::VolumeCreated(services.require_controller()?.create_volume(req).await?)
        }
        CsiMessage::DeleteVolume(id) => {
            services.require_controller()?.delete_volume(&id).await?;
            CsiMessage::Ok
        }
        CsiMessage::ControllerExpandVolume {
            volume_id,
            capacity_bytes,
        } => {
            let capacity_bytes = services
                .require_controller()?
                .controller_expand_volume(&volume_id, capacity_bytes)
                .await?;
            CsiMessage::VolumeExpanded { capacity_bytes }
        }
        CsiMessage::ValidateVolumeCapabilities {
            volume_id,
            capabilities,
        } => CsiMessage::CapabilitiesConfirmed(
            services
                .require_controller()?
                .validate_volume_capabilities(&volume_id, &capabilities)
                .await?,
        ),
        CsiMessage::ControllerGetCapabilities => CsiMessage::ControllerCapabilitiesResponse(
            services.require_controller()?.get_capabilities().await?,
        ),
        CsiMessage::CreateSnapshot(req) => {
            CsiMessage::SnapshotCreated(services.require_controller()?.create_snapshot(req).await?)
        }
        CsiMessage::DeleteSnapshot(id) => {
            services.require_controller()?.delete_snapshot(&id).await?;
            CsiMessage::Ok
        }

        // --- Node -----------------------------------------------------------
        CsiMessage::PublishVolume(req) => {
            services.require_node()?.publish_volume(req).await?;
            CsiMessage::Ok
        }
        CsiMessage::UnpublishVolume {
            volume_id,
            target_path,
        } => {
            services
                .require_node()?
                .unpublish_volume(&volume_id, &target_path)
                .await?;
            CsiMessage::Ok
        }
        CsiMessage::NodeGetCapabilities => {
            CsiMessage::NodeCapabilitiesResponse(services.require_node()?.get_capabilities().await?)
        }
        CsiMessage::GetNodeInfo => {
            CsiMessage::NodeInfoResponse(services.require_node()?.get_info().await?)
        }

        // --- Response variants should never arrive as requests --------------
        other => {
            warn!(msg = %other, "unexpected message variant received as request");
            return Err(CsiError::InvalidArgument(format!(
                "unexpected message: {other}"
            )));
        }
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::DriverIdentity;
    use crate::backend::script::ScriptController;
    use crate::config::ControllerConfig;
    use crate::types::*;

    fn controller_services() -> Services {
        let config = ControllerConfig {
            create_cmd: "true".into(),
            delete_cmd: "true".into(),
            ..Default::default()
        };
        Services::controller(
            Arc::new(DriverIdentity),
            Arc::new(ScriptController::new(config)),
        )
    }

    #[tokio::test]
    async fn identity_is_always_served() {
        let services = controller_services();
        assert!(matches!(
            dispatch(&services, CsiMessage::Probe).await,
            CsiMessage::ProbeResult(true)
        ));
        assert!(matches!(
            dispatch(&services, CsiMessage::GetPluginInfo).await,
            CsiMessage::PluginInfoResponse(_)
        ));
    }

    #[tokio::test]
    async fn controller_requests_reach_the_controller() {
        let services = controller_services();
        match dispatch(&services, CsiMessage::ControllerGetCapabilities).await {
            CsiMessage::ControllerCapabilitiesResponse(caps) => {
                assert!(caps.contains(&ControllerCapability::CreateDeleteVolume));
            }
            other => panic!("unexpected {other}"),
        }
        assert!(matches!(
            dispatch(&services, CsiMessage::DeleteVolume(VolumeId::from("v1:a"))).await,
            CsiMessage::Ok
        ));
        assert!(matches!(
            dispatch(&services, CsiMessage::DeleteVolume(VolumeId::from("a"))).await,
            CsiMessage::Error(CsiError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn unhosted_services_are_unimplemented() {
        let services = controller_services();
        assert!(matches!(
            dispatch(&services, CsiMessage::GetNodeInfo).await,
            CsiMessage::Error(CsiError::Unimplemented(_))
        ));
        assert!(matches!(
            dispatch(
                &services,
                CsiMessage::UnpublishVolume {
                    volume_id: VolumeId::from("v1:a"),
                    target_path: "/tmp/x".into(),
                }
            )
            .await,
            CsiMessage::Error(CsiError::Unimplemented(_))
        ));
    }

    #[tokio::test]
    async fn responses_are_rejected_as_requests() {
        let services = controller_services();
        assert!(matches!(
            dispatch(&services, CsiMessage::Ok).await,
            CsiMessage::Error(CsiError::InvalidArgument(_))
        ));
    }
}
