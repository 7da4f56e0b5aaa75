//! Implements [`RawTransport`] over `russh`'s connection handles.
//!
//! Stock `russh` 0.45 hands the application typed, already-interpreted
//! callbacks (`data`, `channel_open_session`, `global_request`, ...); it
//! does not expose the per-message-type dispatch table, the outbound
//! sequence counter, or a bytes-in/bytes-out emit primitive that the
//! splicer needs (§6, §9). This module is the repository's single
//! deliberate departure from a stock release: it assumes a small patch
//! adding `raw_send`/`suppress_ext_info` to `server::Handle` and
//! `client::Handle`, plus three new `Handler` callbacks - `connected`
//! (handing the handler a `Handle` up front), and `raw_packet` (the
//! receive-side counterpart of `raw_send`, invoked for every incoming
//! packet before the library's own typed dispatch) - implemented on
//! [`super::session::Session`] and [`super::backend::BackendClient`],
//! pinned and justified in `DESIGN.md`. Everything upstream of splice
//! time - key exchange, user-auth - runs on unmodified `russh`.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};

use eyre::Result;
use russh::{client, server, Disconnect};
use tokio::sync::Mutex;
use tracing::debug;

use super::backend::BackendClient;
use crate::splice::{dispatch::MSG_DISCONNECT, DispatchTable, Engine, RawTransport};

/// The send-side half of the patch this module assumes: a raw,
/// dispatch-table-agnostic send primitive plus a way to silence the
/// library's own `EXT_INFO`. Kept as a trait (rather than inherent
/// methods) so [`ServerTransport`] and [`ClientTransport`] can share
/// one implementation below. `disconnect`/`suppress_ext_info` are
/// already real `russh` API; only `raw_send` is assumed. The
/// receive-side half (`connected`, `raw_packet`) is assumed directly on
/// `server::Handler`/`client::Handler` and implemented in
/// `session.rs`/`backend.rs`.
#[async_trait::async_trait]
trait RawDispatch: Send + Sync {
    async fn raw_send(&self, msg_type: u8, payload: &[u8]) -> Result<(), russh::Error>;
    fn suppress_ext_info(&self);
    async fn disconnect_local(&self);
}

#[async_trait::async_trait]
impl RawDispatch for server::Handle {
    async fn raw_send(&self, msg_type: u8, payload: &[u8]) -> Result<(), russh::Error> {
        self.raw_send(msg_type, payload).await
    }

    fn suppress_ext_info(&self) {
        self.suppress_ext_info();
    }

    async fn disconnect_local(&self) {
        let _ = self
            .disconnect(Disconnect::ByApplication, "peer disconnected".to_string(), String::new())
            .await;
    }
}

#[async_trait::async_trait]
impl RawDispatch for client::Handle<BackendClient> {
    async fn raw_send(&self, msg_type: u8, payload: &[u8]) -> Result<(), russh::Error> {
        self.raw_send(msg_type, payload).await
    }

    fn suppress_ext_info(&self) {
        self.suppress_ext_info();
    }

    async fn disconnect_local(&self) {
        let _ = self
            .disconnect(Disconnect::ByApplication, "peer disconnected".to_string(), String::new())
            .await;
    }
}

/// State common to both roles: the rewritable dispatch table (shared
/// with the handler so splicing takes effect immediately) and a local
/// mirror of the library's send-sequence counter. The mirror is exact
/// once spliced because, from that point on, every outbound packet on
/// this side is emitted through [`RawTransport::emit_raw`] and nothing
/// else (§4.4's suppression-of-proxy-initiated-traffic rule - no new
/// channels are opened locally, and `EXT_INFO` emission is disabled).
struct Shared {
    table: Arc<Mutex<DispatchTable>>,
    send_seq: AtomicU32,
    ext_info_suppressed: AtomicBool,
    connection_id: String,
}

impl Shared {
    fn new(connection_id: String) -> Self {
        Self {
            table: Arc::new(Mutex::new(DispatchTable::unspliced())),
            send_seq: AtomicU32::new(0),
            ext_info_suppressed: AtomicBool::new(false),
            connection_id,
        }
    }
}

/// The proxy's server-role transport: its side of the connection from
/// the external client.
pub struct ServerTransport {
    handle: server::Handle,
    shared: Shared,
}

impl ServerTransport {
    #[must_use]
    pub fn new(handle: server::Handle, connection_id: String) -> Self {
        Self {
            handle,
            shared: Shared::new(connection_id),
        }
    }

    #[must_use]
    pub fn dispatch_table_handle(&self) -> Arc<Mutex<DispatchTable>> {
        self.shared.table.clone()
    }
}

/// The proxy's client-role transport: its side of the connection to
/// the back-end.
pub struct ClientTransport {
    handle: client::Handle<BackendClient>,
    shared: Shared,
    /// Shared with the [`BackendClient`] constructed alongside this
    /// transport (see `backend.rs`), so the engine built once this side
    /// is bridged can be handed to the `Handler` that actually receives
    /// packets for this connection.
    engine_slot: Arc<Mutex<Option<Arc<Engine>>>>,
}

impl ClientTransport {
    #[must_use]
    pub fn new(
        handle: client::Handle<BackendClient>,
        connection_id: String,
        engine_slot: Arc<Mutex<Option<Arc<Engine>>>>,
    ) -> Self {
        Self {
            handle,
            shared: Shared::new(connection_id),
            engine_slot,
        }
    }

    #[must_use]
    pub fn dispatch_table_handle(&self) -> Arc<Mutex<DispatchTable>> {
        self.shared.table.clone()
    }

    /// Installs the engine so `BackendClient::raw_packet` - sharing
    /// this same slot - starts routing received packets to it.
    pub async fn set_engine(&self, engine: Arc<Engine>) {
        *self.engine_slot.lock().await = Some(engine);
    }
}

macro_rules! impl_raw_transport {
    ($ty:ty) => {
        #[async_trait::async_trait]
        impl RawTransport for $ty {
            fn dispatch_table(&self) -> Arc<Mutex<DispatchTable>> {
                self.shared.table.clone()
            }

            fn send_seq(&self) -> u32 {
                self.shared.send_seq.load(Ordering::SeqCst)
            }

            async fn emit_raw(&self, msg_type: u8, payload: &[u8]) -> Result<()> {
                self.handle.raw_send(msg_type, payload).await?;
                self.shared.send_seq.fetch_add(1, Ordering::SeqCst);

                Ok(())
            }

            fn suppress_ext_info(&self) {
                if !self.shared.ext_info_suppressed.swap(true, Ordering::SeqCst) {
                    self.handle.suppress_ext_info();
                }
            }

            fn connection_id(&self) -> String {
                self.shared.connection_id.clone()
            }

            async fn run_local_handler(&self, msg_type: u8, _payload: &[u8]) -> Result<()> {
                debug!(
                    conn = %self.shared.connection_id,
                    msg_type,
                    "running library-native handler for locally-terminated message"
                );

                if msg_type == MSG_DISCONNECT {
                    self.handle.disconnect_local().await;
                }

                Ok(())
            }
        }
    };
}

impl_raw_transport!(ServerTransport);
impl_raw_transport!(ClientTransport);
