mod metrics;
mod state;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use eyre::Result;
use metrics::{
    ACTIVE_SESSIONS, AUTH_ATTEMPTS, AUTH_RESULTS, BRIDGED_SESSIONS, PROVISIONING_RESULTS,
    SESSION_DURATION, STOP_SERVER_FAILURES, TOTAL_SESSIONS,
};
use russh::server::{self, Auth};
use state::State;
use tracing::{info, warn};

use super::raw::{self, ServerTransport};
use super::backend;
use crate::directory::DirectoryService;
use crate::error::Error;
use crate::splice::{Engine, Side};

/// Drives one external client's connection through §4.2's state
/// machine: password auth against the directory service, back-end
/// provisioning, and the splice that makes the rest of the connection
/// a pass-through. Grounded on `SSHProxy` from the tool this proxy
/// reimplements, adapted to where `russh` actually hands the handler a
/// connection [`server::Handle`] - `auth_succeeded`, not the
/// pre-decision `auth_password` the original runs its whole setup
/// from (see `DESIGN.md`).
pub struct Session {
    directory: Arc<dyn DirectoryService>,
    connection_id: String,

    username: Option<String>,
    auth_secret: Option<String>,
    state: State,
    provisioning_attempted: bool,
    /// The back-end transport, held between a successful `auth_password`
    /// and `auth_succeeded`, where it is consumed into the [`Engine`].
    pending_backend: Option<raw::ClientTransport>,
    /// Set exactly once, from `auth_succeeded`, and never cleared before
    /// the session is dropped (§3's back-end-handle invariant).
    engine: Option<Arc<Engine>>,
    /// Captured from the assumed `connected` hook (see `src/ssh/raw.rs`,
    /// `DESIGN.md`) the moment the connection is established, so that
    /// `auth_password` - which stock `russh` gives no session access -
    /// can still send a synchronous disconnect on failure (§7).
    handle: Option<server::Handle>,

    start: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn new(directory: Arc<dyn DirectoryService>, connection_id: String) -> Self {
        TOTAL_SESSIONS.inc();
        ACTIVE_SESSIONS.inc();

        Self {
            directory,
            connection_id,
            username: None,
            auth_secret: None,
            state: State::default(),
            provisioning_attempted: false,
            pending_backend: None,
            engine: None,
            handle: None,
            start: Utc::now(),
        }
    }

    /// Sends the disconnect mandated for the error kinds §7 surfaces
    /// synchronously to the authenticating client, using the handle
    /// captured by `connected`. A no-op for kinds with no disconnect
    /// text of their own (`InvalidCredential`, post-splice kinds), or
    /// if `connected` has not fired yet.
    async fn disconnect_with(&self, e: &Error) {
        let Some((code, reason)) = e.disconnect() else {
            return;
        };

        let Some(handle) = &self.handle else {
            warn!(reason, "no handle to send disconnect with");
            return;
        };

        if handle
            .disconnect(code, reason.to_string(), String::new())
            .await
            .is_err()
        {
            warn!(reason, "failed to send disconnect to client");
        }
    }
}

#[async_trait::async_trait]
impl server::Handler for Session {
    type Error = eyre::Error;

    /// Assumed addition to `server::Handler` (see `src/ssh/raw.rs`,
    /// `DESIGN.md`): fired once the transport-layer handshake completes
    /// and before any auth method, handing the handler a `Handle` to
    /// this specific connection.
    async fn connected(&mut self, handle: server::Handle) -> Result<()> {
        self.handle = Some(handle);

        Ok(())
    }

    #[tracing::instrument(skip(self, payload), fields(connection_id = %self.connection_id))]
    async fn raw_packet(&mut self, msg_type: u8, seq: u32, payload: &[u8]) -> Result<bool> {
        let Some(engine) = &self.engine else {
            return Ok(false);
        };

        engine.on_packet(Side::A, msg_type, seq, payload).await?;

        Ok(true)
    }

    #[tracing::instrument(skip(self, password), fields(connection_id = %self.connection_id))]
    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth> {
        AUTH_ATTEMPTS.inc();

        self.state.authenticating()?;
        self.username = Some(user.to_string());
        self.auth_secret = Some(password.to_string());

        info!(user, "login attempt");

        let valid = match self.directory.validate_auth(&self.connection_id, user, password).await {
            Ok(valid) => valid,
            Err(e) => {
                warn!(user, %e, "directory service unavailable");
                self.disconnect_with(&e).await;

                return Err(e.into());
            }
        };

        if !valid {
            AUTH_RESULTS.reject.inc();
            self.state.rejected()?;

            let e = Error::InvalidCredential;
            info!(user, %e, "invalid credentials");

            return Ok(Auth::Reject {
                proceed_with_methods: None,
            });
        }

        AUTH_RESULTS.accept.inc();
        info!(user, "login successful");

        self.state.provisioning()?;
        self.provisioning_attempted = true;

        match backend::connect(self.directory.as_ref(), &self.connection_id, user, password).await {
            Ok(client) => {
                PROVISIONING_RESULTS.success.inc();
                self.pending_backend = Some(client);

                Ok(Auth::Accept)
            }
            Err(e) => {
                PROVISIONING_RESULTS.failure.inc();

                warn!(user, %e, "failed to connect to internal host");
                self.disconnect_with(&e).await;

                Err(e.into())
            }
        }
    }

    #[tracing::instrument(skip(self, session), fields(connection_id = %self.connection_id))]
    async fn auth_succeeded(&mut self, session: &mut server::Session) -> Result<()> {
        let Some(backend) = self.pending_backend.take() else {
            return Err(eyre::eyre!("auth_succeeded without a provisioned back-end"));
        };

        let backend_id = backend.connection_id();
        let backend = Arc::new(backend);
        let client = Arc::new(ServerTransport::new(session.handle(), self.connection_id.clone()));

        let engine = Arc::new(Engine::new(client, backend.clone()));
        backend.set_engine(engine.clone()).await;
        engine.splice().await;

        self.state.bridged()?;
        self.engine = Some(engine);

        BRIDGED_SESSIONS.inc();
        info!(client = %self.connection_id, server = backend_id, "bridged");

        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        ACTIVE_SESSIONS.dec();
        self.state.closed();

        if self.engine.take().is_some() {
            BRIDGED_SESSIONS.dec();
        }

        if let Ok(duration) = (Utc::now() - self.start).to_std() {
            SESSION_DURATION.observe(duration.as_secs_f64());
        }

        // Mirrors `connection_lost`: the directory service is only asked
        // to stop a server once this session actually attempted to
        // provision one, successfully or not.
        if self.provisioning_attempted {
            let directory = self.directory.clone();
            let connection_id = self.connection_id.clone();
            let Some(username) = self.username.clone() else {
                return;
            };
            let Some(auth_secret) = self.auth_secret.clone() else {
                return;
            };

            tokio::spawn(async move {
                if let Err(e) = directory.stop_server(&connection_id, &username, &auth_secret).await {
                    STOP_SERVER_FAILURES.inc();
                    warn!(connection_id, %e, "failed to stop back-end server");
                }
            });
        }
    }
}
