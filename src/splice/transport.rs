//! The raw-dispatch hook the splicing engine needs from the SSH
//! transport library, per §6 and the Design Notes in §9.
//!
//! Neither `russh` nor any other maintained Rust SSH crate currently
//! exposes byte-level access to its per-message dispatch table or send
//! sequence counter the way `asyncssh`'s private `_packet_handlers`
//! attribute does in the original tool. Per §9 ("a systems-language
//! rewrite should ... pick an SSH library that exposes a first-class
//! raw packet filter ... or fork one; the spec assumes such a hook
//! exists"), this trait *is* that assumed hook: [`crate::ssh::raw`]
//! implements it over `russh`'s connection handles, documented as the
//! repository's single point of departure from a stock `russh` release
//! (see `DESIGN.md`).

use std::sync::Arc;

use eyre::Result;
use tokio::sync::Mutex;

use super::dispatch::DispatchTable;

/// One side of a spliced pair: either the proxy's server-role
/// connection to the external client, or its client-role connection to
/// the back-end. Implementations own a live SSH transport and expose
/// exactly the hooks §6 enumerates.
#[async_trait::async_trait]
pub trait RawTransport: Send + Sync {
    /// Shared handle to this transport's dispatch table. Shared (rather
    /// than `&mut`) because the table is read from the library's
    /// packet-processing loop and written once at splice time.
    fn dispatch_table(&self) -> Arc<Mutex<DispatchTable>>;

    /// This transport's outbound send-sequence counter, sampled at the
    /// moment of emission (§3, §4.4).
    fn send_seq(&self) -> u32;

    /// Emits `payload` as a packet of type `msg_type`, bypassing the
    /// library's typed per-message API. The payload excludes the
    /// one-byte message-type prefix; the transport applies its own
    /// compression, MAC and encryption.
    async fn emit_raw(&self, msg_type: u8, payload: &[u8]) -> Result<()>;

    /// Disables the library's own outbound `SSH_MSG_EXT_INFO`, per
    /// §4.4's suppression-of-proxy-initiated-traffic rule.
    fn suppress_ext_info(&self);

    /// A short identifier for this transport used in log-line prefixes
    /// (§6 log format).
    fn connection_id(&self) -> String;

    /// Runs this transport's original (non-splicing) handler for
    /// `msg_type`, used by [`Handler::Service`](super::dispatch::Handler::Service)
    /// when the service name is `ssh-userauth`, by
    /// [`Handler::Unimplemented`](super::dispatch::Handler::Unimplemented)
    /// when the sequence number isn't one the proxy forwarded, and by
    /// [`Handler::Disconnect`](super::dispatch::Handler::Disconnect)
    /// to additionally run local teardown.
    async fn run_local_handler(&self, msg_type: u8, payload: &[u8]) -> Result<()>;
}
