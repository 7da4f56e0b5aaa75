//! Counter for `start_server`'s retry schedule (§4.1), kept local to
//! the directory module so it's testable alongside [`super::retrying_start`]
//! without pulling in the session-level metric registry.

use lazy_static::lazy_static;
use prometheus::{register_int_counter, IntCounter};

lazy_static! {
    pub static ref PROVISIONING_RETRIES: IntCounter = register_int_counter!(
        "provisioning_retries_total",
        "start_server polls that came back pending"
    )
    .unwrap();
}
