//! Proxy-relevant Prometheus metrics (§2 "Observability", §6), built
//! with the same `lazy_static!`/`prometheus-static-metric` pairing this
//! repository used for its original session counters.

use lazy_static::lazy_static;
use prometheus::{
    histogram_opts, opts, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use prometheus_static_metric::make_static_metric;

make_static_metric! {
    pub struct AuthResultVec: IntCounter {
        "result" => {
            accept,
            reject,
        }
    }
    pub struct ProvisioningResultVec: IntCounter {
        "result" => {
            success,
            failure,
        }
    }
}

lazy_static! {
    pub static ref TOTAL_SESSIONS: IntCounter =
        register_int_counter!("sessions_total", "Total number of accepted connections").unwrap();
    pub static ref ACTIVE_SESSIONS: IntGauge =
        register_int_gauge!("active_sessions", "Sessions not yet closed").unwrap();
    pub static ref BRIDGED_SESSIONS: IntGauge = register_int_gauge!(
        "bridged_sessions",
        "Sessions currently spliced to a back-end"
    )
    .unwrap();
    pub static ref SESSION_DURATION: Histogram = register_histogram!(histogram_opts!(
        "session_duration_seconds",
        "Session duration from accept to close",
        vec!(1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0),
    ))
    .unwrap();
    pub static ref UNEXPECTED_STATE: IntCounterVec = register_int_counter_vec!(
        opts!(
            "unexpected_state_total",
            "Number of times a transition ran from a state it doesn't apply to",
        ),
        &["from", "to"],
    )
    .unwrap();
}

lazy_static! {
    pub static ref AUTH_ATTEMPTS: IntCounter =
        register_int_counter!("auth_attempts_total", "Password auth attempts").unwrap();
    static ref AUTH_RESULTS_VEC: IntCounterVec = register_int_counter_vec!(
        opts!("auth_results_total", "Password auth outcomes"),
        &["result"],
    )
    .unwrap();
    pub static ref AUTH_RESULTS: AuthResultVec = AuthResultVec::from(&AUTH_RESULTS_VEC);
}

lazy_static! {
    static ref PROVISIONING_RESULTS_VEC: IntCounterVec = register_int_counter_vec!(
        opts!("provisioning_results_total", "Back-end provisioning outcomes"),
        &["result"],
    )
    .unwrap();
    pub static ref PROVISIONING_RESULTS: ProvisioningResultVec =
        ProvisioningResultVec::from(&PROVISIONING_RESULTS_VEC);
    pub static ref STOP_SERVER_FAILURES: IntCounter = register_int_counter!(
        "stop_server_failures_total",
        "Best-effort stop_server calls that returned an error"
    )
    .unwrap();
}
