//! Packet-level counters for the splicing engine (§2 "Observability"),
//! kept alongside the engine itself rather than under `ssh::session` so
//! the engine stays usable - and its metrics testable - against the
//! mock transport in [`super::engine`]'s tests, independent of a live
//! `russh` session.

use lazy_static::lazy_static;
use prometheus::{
    opts, register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec,
};
use prometheus_static_metric::make_static_metric;

make_static_metric! {
    pub struct SplicedPacketVec: IntCounter {
        "direction" => {
            client_to_backend,
            backend_to_client,
        }
    }
}

lazy_static! {
    static ref SPLICED_PACKETS_VEC: IntCounterVec = register_int_counter_vec!(
        opts!("spliced_packets_total", "Packets re-emitted verbatim across the splice"),
        &["direction"],
    )
    .unwrap();
    pub static ref SPLICED_PACKETS: SplicedPacketVec = SplicedPacketVec::from(&SPLICED_PACKETS_VEC);
    pub static ref TERMINATED_PACKETS: IntCounter = register_int_counter!(
        "terminated_packets_total",
        "Packets intercepted and handled locally rather than forwarded"
    )
    .unwrap();
}
