//! The splicing engine: once a session is bridged, this module is the
//! only thing standing between two independently-authenticated SSH
//! connections. Grounded directly on `__forward`,
//! `__handle_unimplemented_msg`, `__handle_service_msg`,
//! `__handle_disconnect_msg` and `__patch_connections` from the tool
//! this proxy reimplements, generalized from their dict-of-partials
//! form to a table keyed by [`Handler`].

use std::sync::Arc;

use eyre::Result;
use prometheus::IntCounter;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::dispatch::{DispatchTable, Handler, MSG_UNIMPLEMENTED};
use super::metrics::{SPLICED_PACKETS, TERMINATED_PACKETS};
use super::seqmap::SeqNumMap;
use super::transport::RawTransport;
use super::wire::{read_ssh_string, read_uint32, write_uint32};

/// Which of the two spliced transports a packet arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

/// The service name carved out of forwarding per §4.4: authentication
/// always terminates locally on each side, never crosses the splice.
const SERVICE_USERAUTH: &[u8] = b"ssh-userauth";

/// Owns the pair of sequence-number maps for one spliced session and
/// drives the forwarding/translation rules once both transports carry
/// [`DispatchTable::spliced`].
pub struct Engine {
    a: Arc<dyn RawTransport>,
    b: Arc<dyn RawTransport>,
    /// Forwards from A onto B: key = B's send-seq at emission, value =
    /// A's receive-seq for the forwarded packet.
    seq_a_to_b: Mutex<SeqNumMap>,
    /// Forwards from B onto A: key = A's send-seq at emission, value =
    /// B's receive-seq for the forwarded packet.
    seq_b_to_a: Mutex<SeqNumMap>,
}

impl Engine {
    #[must_use]
    pub fn new(a: Arc<dyn RawTransport>, b: Arc<dyn RawTransport>) -> Self {
        Self {
            a,
            b,
            seq_a_to_b: Mutex::new(SeqNumMap::new()),
            seq_b_to_a: Mutex::new(SeqNumMap::new()),
        }
    }

    /// Installs the spliced dispatch table on both transports and
    /// suppresses each side's own `EXT_INFO`, per §4.4. Called exactly
    /// once, when provisioning completes and the session moves from
    /// `Authenticating`/`Provisioning` into `Bridged`.
    pub async fn splice(&self) {
        *self.a.dispatch_table().lock().await = DispatchTable::spliced();
        *self.b.dispatch_table().lock().await = DispatchTable::spliced();

        self.a.suppress_ext_info();
        self.b.suppress_ext_info();

        debug!(
            a = %self.a.connection_id(),
            b = %self.b.connection_id(),
            "spliced dispatch tables installed"
        );
    }

    /// Entry point called by each side's transport whenever an incoming
    /// packet's dispatch-table lookup resolves to anything other than
    /// [`Handler::Local`] (the library runs `Local` packets through its
    /// own handler directly and never reaches here).
    pub async fn on_packet(
        &self,
        side: Side,
        msg_type: u8,
        pkt_id: u32,
        payload: &[u8],
    ) -> Result<()> {
        let (from, to, seq_fwd, seq_onto_from) = match side {
            Side::A => (&self.a, &self.b, &self.seq_a_to_b, &self.seq_b_to_a),
            Side::B => (&self.b, &self.a, &self.seq_b_to_a, &self.seq_a_to_b),
        };

        let handler = from.dispatch_table().lock().await.get(msg_type);
        let direction = match side {
            Side::A => &SPLICED_PACKETS.client_to_backend,
            Side::B => &SPLICED_PACKETS.backend_to_client,
        };

        match handler {
            Handler::Forward | Handler::ChannelBypass => {
                direction.inc();
                Self::forward(seq_fwd, to.as_ref(), msg_type, pkt_id, payload).await
            }
            Handler::Unimplemented => {
                self.handle_unimplemented(direction, seq_onto_from, from.as_ref(), to.as_ref(), payload)
                    .await
            }
            Handler::Service => {
                Self::handle_service(direction, seq_fwd, from.as_ref(), to.as_ref(), msg_type, pkt_id, payload)
                    .await
            }
            Handler::Disconnect => {
                direction.inc();
                Self::forward(seq_fwd, to.as_ref(), msg_type, pkt_id, payload).await?;
                from.run_local_handler(msg_type, payload).await
            }
            Handler::Local => {
                TERMINATED_PACKETS.inc();
                from.run_local_handler(msg_type, payload).await
            }
        }
    }

    /// Records the sequence-number mapping and re-emits `payload`
    /// verbatim on `to`. The map entry is written *before* emission so
    /// its key is `to`'s send-seq as of this exact packet (§3, §8
    /// invariant 1).
    async fn forward(
        seq_map: &Mutex<SeqNumMap>,
        to: &dyn RawTransport,
        msg_type: u8,
        pkt_id: u32,
        payload: &[u8],
    ) -> Result<()> {
        let key = to.send_seq();
        seq_map.lock().await.insert(key, pkt_id);

        to.emit_raw(msg_type, payload).await
    }

    /// `SSH_MSG_UNIMPLEMENTED` received on `from`: translate and
    /// forward onto `to` only if its sequence number is one the engine
    /// itself produced by forwarding something onto `from` (i.e. it's a
    /// key in `seq_onto_from`, the map populated by forwards in the
    /// *other* direction). Anything else — a reply to a packet `from`'s
    /// own peer sent outside the splice, or to a message the proxy
    /// handled locally — runs `from`'s original handler instead (§4.4,
    /// §8 invariant 4).
    async fn handle_unimplemented(
        &self,
        direction: &IntCounter,
        seq_onto_from: &Mutex<SeqNumMap>,
        from: &dyn RawTransport,
        to: &dyn RawTransport,
        payload: &[u8],
    ) -> Result<()> {
        let Some(reported_seq) = read_uint32(payload) else {
            warn!(conn = %from.connection_id(), "malformed MSG_UNIMPLEMENTED payload");
            TERMINATED_PACKETS.inc();
            return from.run_local_handler(MSG_UNIMPLEMENTED, payload).await;
        };

        let mapped = seq_onto_from.lock().await.get(reported_seq);

        match mapped {
            Some(original_seq) => {
                direction.inc();
                to.emit_raw(MSG_UNIMPLEMENTED, &write_uint32(original_seq)).await
            }
            None => {
                TERMINATED_PACKETS.inc();
                from.run_local_handler(MSG_UNIMPLEMENTED, payload).await
            }
        }
    }

    /// `SSH_MSG_SERVICE_REQUEST`/`SSH_MSG_SERVICE_ACCEPT`: `ssh-userauth`
    /// is the one service name that always terminates locally, since
    /// each side authenticates independently; every other service name
    /// forwards like any other control-plane message (§4.4).
    async fn handle_service(
        direction: &IntCounter,
        seq_fwd: &Mutex<SeqNumMap>,
        from: &dyn RawTransport,
        to: &dyn RawTransport,
        msg_type: u8,
        pkt_id: u32,
        payload: &[u8],
    ) -> Result<()> {
        if read_ssh_string(payload) == Some(SERVICE_USERAUTH) {
            TERMINATED_PACKETS.inc();
            return from.run_local_handler(msg_type, payload).await;
        }

        direction.inc();

        Self::forward(seq_fwd, to, msg_type, pkt_id, payload).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::splice::dispatch::{
        MSG_CHANNEL_OPEN, MSG_DISCONNECT, MSG_IGNORE, MSG_SERVICE_ACCEPT,
    };

    /// A transport double that records every call and lets tests script
    /// its local-handler outcome. Good enough to exercise the engine
    /// without a live `russh` connection.
    struct MockTransport {
        id: &'static str,
        table: Arc<Mutex<DispatchTable>>,
        send_seq: AtomicU32,
        emitted: StdMutex<Vec<(u8, Vec<u8>)>>,
        local_calls: StdMutex<Vec<(u8, Vec<u8>)>>,
        ext_info_suppressed: StdMutex<bool>,
    }

    impl MockTransport {
        fn new(id: &'static str, table: DispatchTable) -> Arc<Self> {
            Arc::new(Self {
                id,
                table: Arc::new(Mutex::new(table)),
                send_seq: AtomicU32::new(0),
                emitted: StdMutex::new(Vec::new()),
                local_calls: StdMutex::new(Vec::new()),
                ext_info_suppressed: StdMutex::new(false),
            })
        }

        fn emitted(&self) -> Vec<(u8, Vec<u8>)> {
            self.emitted.lock().unwrap().clone()
        }

        fn local_calls(&self) -> Vec<(u8, Vec<u8>)> {
            self.local_calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RawTransport for MockTransport {
        fn dispatch_table(&self) -> Arc<Mutex<DispatchTable>> {
            self.table.clone()
        }

        fn send_seq(&self) -> u32 {
            self.send_seq.load(Ordering::SeqCst)
        }

        async fn emit_raw(&self, msg_type: u8, payload: &[u8]) -> Result<()> {
            self.emitted.lock().unwrap().push((msg_type, payload.to_vec()));
            self.send_seq.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn suppress_ext_info(&self) {
            *self.ext_info_suppressed.lock().unwrap() = true;
        }

        fn connection_id(&self) -> String {
            self.id.to_string()
        }

        async fn run_local_handler(&self, msg_type: u8, payload: &[u8]) -> Result<()> {
            self.local_calls.lock().unwrap().push((msg_type, payload.to_vec()));
            Ok(())
        }
    }

    fn spliced_pair() -> (Arc<MockTransport>, Arc<MockTransport>, Engine) {
        let a = MockTransport::new("a", DispatchTable::spliced());
        let b = MockTransport::new("b", DispatchTable::spliced());
        let engine = Engine::new(a.clone(), b.clone());

        (a, b, engine)
    }

    #[tokio::test]
    async fn forwards_a_plain_control_message_and_bumps_the_peer_seq() {
        let (_a, b, engine) = spliced_pair();

        engine
            .on_packet(Side::A, MSG_IGNORE, 42, b"hello")
            .await
            .unwrap();

        assert_eq!(b.emitted(), vec![(MSG_IGNORE, b"hello".to_vec())]);
    }

    #[tokio::test]
    async fn channel_scoped_packets_bypass_straight_through() {
        let (_a, b, engine) = spliced_pair();

        engine
            .on_packet(Side::A, MSG_CHANNEL_OPEN, 1, b"chan")
            .await
            .unwrap();

        assert_eq!(b.emitted(), vec![(MSG_CHANNEL_OPEN, b"chan".to_vec())]);
    }

    #[tokio::test]
    async fn unimplemented_about_a_forwarded_packet_round_trips_with_translated_seq() {
        let (a, b, engine) = spliced_pair();

        // A receives packet with its own receive-seq 7, forwards onto B.
        // B's send_seq is 0 at the moment of emission, so seq_a_to_b[0] = 7.
        engine.on_packet(Side::A, MSG_IGNORE, 7, b"x").await.unwrap();
        assert_eq!(b.send_seq(), 1);

        // B's peer (the real backend) didn't understand it and reports
        // UNIMPLEMENTED(0) back - received on B.
        engine
            .on_packet(Side::B, MSG_UNIMPLEMENTED, 99, &write_uint32(0))
            .await
            .unwrap();

        // Engine looks up 0 in seq_a_to_b, finds 7, and emits
        // UNIMPLEMENTED(7) onto A - never onto B.
        assert_eq!(a.emitted(), vec![(MSG_UNIMPLEMENTED, write_uint32(7))]);
        assert!(b
            .emitted()
            .iter()
            .all(|(t, _)| *t != MSG_UNIMPLEMENTED));
    }

    #[tokio::test]
    async fn unimplemented_about_an_untracked_packet_runs_locally() {
        let (a, b, engine) = spliced_pair();

        engine
            .on_packet(Side::B, MSG_UNIMPLEMENTED, 5, &write_uint32(0))
            .await
            .unwrap();

        assert_eq!(b.local_calls(), vec![(MSG_UNIMPLEMENTED, write_uint32(0))]);
        assert!(a.emitted().is_empty());
    }

    #[tokio::test]
    async fn service_request_for_userauth_never_crosses_the_splice() {
        let (a, b, engine) = spliced_pair();

        let mut payload = write_uint32(SERVICE_USERAUTH.len() as u32);
        payload.extend_from_slice(SERVICE_USERAUTH);

        engine
            .on_packet(Side::A, MSG_SERVICE_ACCEPT, 3, &payload)
            .await
            .unwrap();

        assert_eq!(a.local_calls(), vec![(MSG_SERVICE_ACCEPT, payload)]);
        assert!(b.emitted().is_empty());
    }

    #[tokio::test]
    async fn service_request_for_another_service_forwards() {
        let (_a, b, engine) = spliced_pair();

        let mut payload = write_uint32(10);
        payload.extend_from_slice(b"ssh-connec");

        engine
            .on_packet(Side::A, MSG_SERVICE_ACCEPT, 3, &payload)
            .await
            .unwrap();

        assert_eq!(b.emitted(), vec![(MSG_SERVICE_ACCEPT, payload)]);
    }

    #[tokio::test]
    async fn disconnect_forwards_and_also_tears_down_locally() {
        let (a, b, engine) = spliced_pair();

        engine
            .on_packet(Side::A, MSG_DISCONNECT, 1, b"bye")
            .await
            .unwrap();

        assert_eq!(b.emitted(), vec![(MSG_DISCONNECT, b"bye".to_vec())]);
        assert_eq!(a.local_calls(), vec![(MSG_DISCONNECT, b"bye".to_vec())]);
    }

    #[tokio::test]
    async fn splice_installs_spliced_tables_and_suppresses_ext_info() {
        let a = MockTransport::new("a", DispatchTable::unspliced());
        let b = MockTransport::new("b", DispatchTable::unspliced());
        let engine = Engine::new(a.clone(), b.clone());

        engine.splice().await;

        assert_eq!(
            a.dispatch_table().lock().await.get(MSG_CHANNEL_OPEN),
            Handler::ChannelBypass
        );
        assert_eq!(
            b.dispatch_table().lock().await.get(MSG_DISCONNECT),
            Handler::Disconnect
        );
        assert!(*a.ext_info_suppressed.lock().unwrap());
        assert!(*b.ext_info_suppressed.lock().unwrap());
    }

    #[tokio::test]
    async fn seq_map_eviction_bounds_unimplemented_translation_window() {
        let (a, b, engine) = spliced_pair();

        for i in 0..150u32 {
            engine.on_packet(Side::A, MSG_IGNORE, i, b"x").await.unwrap();
        }
        assert_eq!(b.send_seq(), 150);

        // The very first forward (seq_a_to_b[0] = 0) should have been
        // evicted by now; UNIMPLEMENTED(0) on B runs locally instead of
        // round-tripping to A.
        engine
            .on_packet(Side::B, MSG_UNIMPLEMENTED, 1, &write_uint32(0))
            .await
            .unwrap();

        assert!(a
            .emitted()
            .iter()
            .all(|(t, _)| *t != MSG_UNIMPLEMENTED));
        assert_eq!(b.local_calls().last(), Some(&(MSG_UNIMPLEMENTED, write_uint32(0))));
    }
}
