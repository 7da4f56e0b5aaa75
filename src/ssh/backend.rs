//! The back-end connector (§4.3): starts the user's back-end server via
//! the directory service, then opens an outbound SSH client connection
//! to it and waits for that connection's own user-auth to complete.
//! Grounded on `__connect_internal`/`_InternalProxyClient` from the
//! tool this proxy reimplements.

use std::sync::Arc;

use eyre::{eyre, Result};
use russh::{client, keys::PublicKey};
use tokio::sync::Mutex;
use tracing::debug;

use super::raw::ClientTransport;
use crate::directory::{self, DirectoryService, HostKeyPolicy};
use crate::error::Error;
use crate::splice::{Engine, Side};

/// `russh::client::Handler` for the proxy's outbound connection to the
/// back-end. Host-key verification is pluggable per §4.3/§9: absent a
/// `known_hosts` policy from the directory service, any offered key is
/// trusted, since the back-end's identity is already vouched for by
/// the directory service that just started it.
pub struct BackendClient {
    policy: HostKeyPolicy,
    /// Set once the session is bridged, via the slot shared with the
    /// [`ClientTransport`] built from the same connection (see
    /// `raw.rs::ClientTransport::set_engine`). `raw_packet` has nothing
    /// to route to until then, since this handler is constructed before
    /// the engine exists.
    engine: Arc<Mutex<Option<Arc<Engine>>>>,
}

impl BackendClient {
    fn new(policy: HostKeyPolicy) -> (Self, Arc<Mutex<Option<Arc<Engine>>>>) {
        let engine = Arc::new(Mutex::new(None));

        (
            Self {
                policy,
                engine: engine.clone(),
            },
            engine,
        )
    }
}

#[async_trait::async_trait]
impl client::Handler for BackendClient {
    type Error = eyre::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        match &self.policy {
            HostKeyPolicy::Trust => Ok(true),
            HostKeyPolicy::KnownHosts(path) => {
                Ok(russh::keys::check_known_hosts_path(
                    "backend",
                    22,
                    server_public_key,
                    path,
                )
                .unwrap_or(false))
            }
        }
    }

    /// Assumed addition to `client::Handler` (see `src/ssh/raw.rs`,
    /// `DESIGN.md`): the receive-side counterpart of `raw_send`,
    /// mirroring `Session::raw_packet` on the server role. A no-op
    /// until `set_engine` has installed the engine for this connection.
    async fn raw_packet(&mut self, msg_type: u8, seq: u32, payload: &[u8]) -> Result<bool, Self::Error> {
        let engine = self.engine.lock().await.clone();
        let Some(engine) = engine else {
            return Ok(false);
        };

        engine.on_packet(Side::B, msg_type, seq, payload).await?;

        Ok(true)
    }
}

/// Starts the back-end server (with the doubling retry schedule),
/// opens an outbound client connection to it, and waits until that
/// connection finishes its own user-auth. On success returns the
/// client-role [`ClientTransport`] the session hands to the splicer.
pub async fn connect(
    directory: &dyn DirectoryService,
    connection_id: &str,
    username: &str,
    auth_secret: &str,
) -> Result<ClientTransport, Error> {
    directory::retrying_start(directory, connection_id, username, auth_secret).await?;

    debug!(connection_id, "connecting to internal host");

    let (host, args) = directory
        .get_forwarding_args(connection_id, username, auth_secret)
        .await?;

    let (handler, engine_slot) = BackendClient::new(args.host_key_policy);

    let config = Arc::new(client::Config::default());
    let addr = (host.as_str(), args.port);

    let mut handle = client::connect(config, addr, handler)
        .await
        .map_err(|e| Error::ProvisioningFailed(eyre!(e).wrap_err(format!("connecting to {host}:{}", args.port))))?;

    let authenticated_ok = handle
        .authenticate_password(&args.username, &args.password)
        .await
        .map_err(|e| Error::ProvisioningFailed(eyre!(e)))?;

    if !authenticated_ok.success() {
        return Err(Error::ProvisioningFailed(eyre!(
            "back-end rejected credentials for {}",
            args.username
        )));
    }

    debug!(
        connection_id,
        host, port = args.port, "connected internally"
    );

    Ok(ClientTransport::new(handle, connection_id.to_string(), engine_slot))
}
